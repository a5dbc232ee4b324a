use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use waveflow::{
    EngineConfig, FakeIdGenerator, NodeStatus, OverallStatus, WorkflowEngine, WorkflowFormat,
};

/// `out.json` of a case directory.
#[derive(Debug, Deserialize)]
struct ExpectedOutput {
    /// `succeeded`, `failed`, or `rejected` (refused before running).
    status: String,
    #[serde(default)]
    outputs: BTreeMap<String, Value>,
    #[serde(default)]
    node_status: BTreeMap<String, NodeStatus>,
    #[serde(default)]
    error_contains: Option<String>,
    #[serde(default)]
    counters: BTreeMap<String, i64>,
}

fn read_to_string(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    fs::read_to_string(path).unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e))
}

fn read_json<T: DeserializeOwned + Default>(path: impl AsRef<Path>) -> T {
    let path = path.as_ref();
    if !path.exists() {
        return T::default();
    }
    serde_json::from_str(&read_to_string(path))
        .unwrap_or_else(|e| panic!("Failed to parse {}: {}", path.display(), e))
}

/// Run the workflow in `case_dir` and compare with its `out.json`.
///
/// Files: `workflow.yaml` (or `workflow.json`), optional `in.json` (run
/// input), optional `config.json` (engine config), `out.json`.
pub async fn run_case(case_dir: &Path) {
    let (content, format) = if case_dir.join("workflow.yaml").exists() {
        (read_to_string(case_dir.join("workflow.yaml")), WorkflowFormat::Yaml)
    } else {
        (read_to_string(case_dir.join("workflow.json")), WorkflowFormat::Json)
    };
    let input: Value = read_json(case_dir.join("in.json"));
    let config: EngineConfig = read_json(case_dir.join("config.json"));
    let expected: ExpectedOutput = serde_json::from_str(&read_to_string(case_dir.join("out.json")))
        .unwrap_or_else(|e| panic!("Failed to parse out.json: {}", e));

    let engine = WorkflowEngine::builder()
        .config(config)
        .id_generator(Arc::new(FakeIdGenerator::new("case")))
        .build()
        .expect("engine builds");

    let definition = match engine.prepare_document(&content, format) {
        Ok(def) => def,
        Err(err) => {
            assert_eq!(
                expected.status, "rejected",
                "workflow was rejected unexpectedly: {}",
                err
            );
            if let Some(substr) = &expected.error_contains {
                assert!(
                    err.to_string().contains(substr),
                    "Error did not contain '{}': {}",
                    substr,
                    err
                );
            }
            return;
        }
    };
    assert_ne!(expected.status, "rejected", "workflow was accepted but should be rejected");

    let result = engine.execute(&definition, input).await;

    let expected_overall = match expected.status.as_str() {
        "succeeded" => OverallStatus::Succeeded,
        "failed" => OverallStatus::Failed,
        other => panic!("unknown expected status '{}'", other),
    };
    assert_eq!(
        result.overall, expected_overall,
        "overall status mismatch; errors: {:?}",
        result.errors
    );

    // Every node ends in exactly one terminal status.
    assert_eq!(result.status.len(), definition.node_count());
    for (node_id, status) in &result.status {
        assert!(status.is_terminal(), "node '{}' ended {:?}", node_id, status);
    }

    for (node_id, value) in &expected.outputs {
        assert_eq!(
            result.output(node_id),
            Some(value),
            "output mismatch for node '{}'",
            node_id
        );
    }
    for (node_id, status) in &expected.node_status {
        assert_eq!(
            result.status_of(node_id),
            Some(*status),
            "status mismatch for node '{}'",
            node_id
        );
    }
    for (name, value) in &expected.counters {
        assert_eq!(result.state.counters.get(name), Some(value), "counter '{}'", name);
    }
    if let Some(substr) = &expected.error_contains {
        let messages: Vec<String> = result.errors.values().map(|e| e.to_string()).collect();
        let run_error = result.error.as_ref().map(|e| e.to_string());
        assert!(
            messages.iter().chain(run_error.iter()).any(|m| m.contains(substr)),
            "no error contained '{}': {:?} / {:?}",
            substr,
            messages,
            run_error
        );
    }
}
