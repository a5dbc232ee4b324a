//! HTTP request node.
//!
//! Every request is checked against the transport's [`NetworkPolicy`] before a
//! socket is opened, and the transport's client re-checks resolved addresses
//! and redirect hops.
//!
//! [`NetworkPolicy`]: crate::security::NetworkPolicy

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::Engine;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::NodeError;
use crate::graph::Node;
use crate::nodes::executor::{ExecutionContext, NodeExecutor, NodeInput, NodeRunResult};
use crate::nodes::utils::{millis, parse_config};
use crate::security::validate_url;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Authorization {
    BearerToken { token: String },
    BasicAuth { username: String, password: String },
}

#[derive(Debug, Deserialize)]
struct HttpConfig {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    /// Strings are sent as-is, anything else as JSON.
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    transport: Option<String>,
    #[serde(default)]
    authorization: Option<Authorization>,
    #[serde(default = "default_true")]
    fail_on_error_status: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_true() -> bool {
    true
}

fn render(ctx: &ExecutionContext, text: &str, input: &Value) -> Result<String, NodeError> {
    if text.contains("{{") {
        ctx.templates().render(text, input)
    } else {
        Ok(text.to_string())
    }
}

fn header_map(pairs: &BTreeMap<String, String>) -> Result<HeaderMap, NodeError> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| NodeError::ConfigError(format!("invalid header name '{}'", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| NodeError::ConfigError(format!("invalid value for header '{}'", name)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn map_transport_error(e: reqwest::Error) -> NodeError {
    if e.is_timeout() {
        NodeError::Timeout(e.to_string())
    } else if e.is_redirect() {
        NodeError::Security(e.to_string())
    } else {
        NodeError::HttpError(e.to_string())
    }
}

/// Read the body, refusing to buffer more than `limit` bytes.
async fn read_body_with_limit(
    resp: reqwest::Response,
    limit: usize,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, NodeError> {
    let too_large = || NodeError::Security(format!("response exceeds {} bytes", limit));
    if resp.content_length().is_some_and(|len| len as usize > limit) {
        return Err(too_large());
    }

    let mut stream = resp.bytes_stream();
    let mut buf = Vec::new();
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(NodeError::Cancelled),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk.map_err(map_transport_error)?;
        if buf.len() + chunk.len() > limit {
            return Err(too_large());
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

/// JSON when the content type says so or the text looks like JSON, else text.
fn decode_body(bytes: &[u8], content_type: Option<&str>) -> Value {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim_start();
    let looks_json = content_type.is_some_and(|ct| ct.contains("json"))
        || trimmed.starts_with('{')
        || trimmed.starts_with('[');
    if looks_json {
        if let Ok(v) = serde_json::from_str(&text) {
            return v;
        }
    }
    Value::String(text.into_owned())
}

/// Output: `{status, headers, body}`.
pub struct HttpExecutor;

#[async_trait]
impl NodeExecutor for HttpExecutor {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError> {
        let config: HttpConfig = parse_config(&node.id, &node.config)?;
        let method = reqwest::Method::from_bytes(config.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| NodeError::ConfigError(format!("invalid http method '{}'", config.method)))?;
        let transport = ctx.runtime.http.transport(config.transport.as_deref())?;

        let url = render(ctx, &config.url, &input.value)?;
        let url = validate_url(&url, &transport.policy).await?;

        let mut headers = header_map(&transport.default_headers)?;
        let mut node_headers = BTreeMap::new();
        for (name, value) in &config.headers {
            node_headers.insert(name.clone(), render(ctx, value, &input.value)?);
        }
        headers.extend(header_map(&node_headers)?);
        match &config.authorization {
            Some(Authorization::BearerToken { token }) => {
                let value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|_| NodeError::ConfigError("invalid bearer token".to_string()))?;
                headers.insert(AUTHORIZATION, value);
            }
            Some(Authorization::BasicAuth { username, password }) => {
                let encoded = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, password));
                let value = HeaderValue::from_str(&format!("Basic {}", encoded))
                    .map_err(|_| NodeError::ConfigError("invalid basic credentials".to_string()))?;
                headers.insert(AUTHORIZATION, value);
            }
            None => {}
        }

        let timeout = config.timeout_ms.map(millis).unwrap_or(transport.timeout);
        let mut request = transport
            .client
            .request(method.clone(), url.clone())
            .headers(headers)
            .timeout(timeout);
        request = match config.body {
            None | Some(Value::Null) => request,
            Some(Value::String(text)) => request.body(render(ctx, &text, &input.value)?),
            Some(json) => request.json(&json),
        };

        tracing::debug!(node_id = %ctx.node_path, %method, url = %url, transport = %transport.id, "http request");
        let resp = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(NodeError::Cancelled),
            resp = request.send() => resp.map_err(map_transport_error)?,
        };

        let status = resp.status().as_u16();
        let mut resp_headers = Map::new();
        for (name, value) in resp.headers() {
            if let Ok(v) = value.to_str() {
                resp_headers.insert(name.as_str().to_string(), Value::String(v.to_string()));
            }
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = read_body_with_limit(resp, transport.policy.max_response_bytes, &ctx.cancel).await?;
        let body = decode_body(&bytes, content_type.as_deref());

        if config.fail_on_error_status && status >= 400 {
            let preview: String = String::from_utf8_lossy(&bytes).chars().take(256).collect();
            return Err(NodeError::HttpStatus {
                status,
                message: preview,
            });
        }

        Ok(NodeRunResult::output(serde_json::json!({
            "status": status,
            "headers": resp_headers,
            "body": body,
        })))
    }
}
