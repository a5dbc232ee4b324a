//! Outbound policy enforcement for `http` nodes, end to end.

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use waveflow::{
    Graph, HttpTransportConfig, NetworkPolicy, NetworkPolicyMode, NodeError, NodeStatus, NodeType,
    OverallStatus, WorkflowEngine,
};

/// Serve `body` as JSON to every connection; returns the base URL.
async fn json_server(body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
            });
        }
    });
    format!("http://{}", addr)
}

/// Answer every connection with a 302 to `location`; returns the base URL.
async fn redirect_server(location: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let reply = format!(
                    "HTTP/1.1 302 Found\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    location
                );
                let _ = socket.write_all(reply.as_bytes()).await;
            });
        }
    });
    format!("http://{}", addr)
}

fn fetch_graph(url: &str) -> Graph {
    Graph::new()
        .node("fetch", NodeType::Http, json!({"url": url}))
        .node("status", NodeType::Extract, json!({"path": "body.status"}))
        .edge("fetch", "status")
}

#[tokio::test]
async fn test_default_policy_blocks_internal_targets() {
    let engine = WorkflowEngine::new();
    for url in [
        "http://127.0.0.1:8080/admin",
        "http://169.254.169.254/latest/meta-data/",
        "http://10.0.0.5/",
        "http://[::1]:3000/",
    ] {
        let result = engine.run(&fetch_graph(url), Value::Null).await.unwrap();

        assert_eq!(result.overall, OverallStatus::Failed, "{}", url);
        let err = result.error_of("fetch").unwrap();
        assert!(matches!(err, NodeError::Security(_)), "{} -> {:?}", url, err);
        assert_eq!(err.to_structured_json()["retryable"], json!(false));
        assert_eq!(result.status_of("status"), Some(NodeStatus::Skipped), "{}", url);
    }
}

#[tokio::test]
async fn test_allowlist_rejects_unlisted_domains() {
    let engine = WorkflowEngine::builder()
        .network_policy(NetworkPolicy {
            mode: NetworkPolicyMode::AllowList,
            allowed_domains: vec!["*.example.com".into()],
            ..NetworkPolicy::default()
        })
        .build()
        .unwrap();

    let result = engine
        .run(&fetch_graph("https://attacker.example.org/steal"), Value::Null)
        .await
        .unwrap();

    let err = result.error_of("fetch").unwrap();
    assert!(matches!(err, NodeError::Security(_)));
    assert!(err.to_string().contains("attacker.example.org"), "{}", err);
}

#[tokio::test]
async fn test_disallowed_scheme_and_port() {
    let engine = WorkflowEngine::builder()
        .network_policy(NetworkPolicy {
            allowed_ports: vec![443],
            ..NetworkPolicy::default()
        })
        .build()
        .unwrap();

    for url in ["ftp://files.example.com/x", "https://api.example.com:8443/"] {
        let result = engine.run(&fetch_graph(url), Value::Null).await.unwrap();
        assert!(
            matches!(result.error_of("fetch"), Some(NodeError::Security(_))),
            "{}",
            url
        );
    }
}

#[tokio::test]
async fn test_permitted_target_flows_downstream() {
    let base = json_server(r#"{"status": "ok"}"#).await;
    let engine = WorkflowEngine::builder()
        .network_policy(NetworkPolicy {
            mode: NetworkPolicyMode::AllowList,
            allowed_domains: vec!["127.0.0.1".into()],
            ..NetworkPolicy::permissive()
        })
        .build()
        .unwrap();

    let result = engine
        .run(&fetch_graph(&format!("{}/health", base)), Value::Null)
        .await
        .unwrap();

    assert_eq!(result.overall, OverallStatus::Succeeded, "{:?}", result.errors);
    assert_eq!(result.output("fetch").unwrap()["status"], json!(200));
    assert_eq!(result.output("status"), Some(&json!("ok")));
}

#[tokio::test]
async fn test_transport_policy_overrides_engine_policy() {
    let base = json_server(r#"{"status": "ok"}"#).await;
    let engine = WorkflowEngine::builder()
        .network_policy(NetworkPolicy::permissive())
        .transport(
            "public",
            HttpTransportConfig::default().with_policy(NetworkPolicy::default()),
        )
        .build()
        .unwrap();
    let graph = Graph::new()
        .node("open", NodeType::Http, json!({"url": format!("{}/a", base)}))
        .node(
            "guarded",
            NodeType::Http,
            json!({"url": format!("{}/b", base), "transport": "public"}),
        );

    let result = engine.run(&graph, Value::Null).await.unwrap();

    assert_eq!(result.status_of("open"), Some(NodeStatus::Succeeded));
    assert!(matches!(result.error_of("guarded"), Some(NodeError::Security(_))));
}

#[tokio::test]
async fn test_redirect_to_blocked_ip_literal_is_refused() {
    let base = redirect_server("http://169.254.169.254/latest/meta-data/").await;
    // Loopback is allowed for the first hop only so the local server is reachable.
    let engine = WorkflowEngine::builder()
        .network_policy(NetworkPolicy {
            block_loopback: false,
            ..NetworkPolicy::default()
        })
        .build()
        .unwrap();

    let result = engine
        .run(&fetch_graph(&format!("{}/start", base)), Value::Null)
        .await
        .unwrap();

    assert_eq!(result.overall, OverallStatus::Failed);
    let err = result.error_of("fetch").unwrap();
    assert!(matches!(err, NodeError::Security(_)), "{:?}", err);
    assert_eq!(err.to_structured_json()["retryable"], json!(false));
    assert_eq!(result.status_of("status"), Some(NodeStatus::Skipped));
}

#[tokio::test]
async fn test_large_integers_survive_the_response_body() {
    let base = json_server(r#"{"id": 12345678901234567890123, "price": 19.999999999999999999}"#).await;
    let engine = WorkflowEngine::builder()
        .network_policy(NetworkPolicy::permissive())
        .build()
        .unwrap();
    let graph = Graph::new()
        .node("fetch", NodeType::Http, json!({"url": format!("{}/item", base)}))
        .node("id", NodeType::Extract, json!({"path": "body.id"}))
        .node("price", NodeType::Extract, json!({"path": "body.price"}))
        .edge("fetch", "id")
        .edge("fetch", "price");

    let result = engine.run(&graph, Value::Null).await.unwrap();

    assert_eq!(result.overall, OverallStatus::Succeeded, "{:?}", result.errors);
    assert_eq!(result.output("id").unwrap().to_string(), "12345678901234567890123");
    assert_eq!(result.output("price").unwrap().to_string(), "19.999999999999999999");
}
