//! Payload shapes carried inside envelopes
//!
//! Field names follow the orchestration server's camelCase JSON.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::command::{RawCommand, TestStep};

/// Outcome of a step or command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Overall outcome of a test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Failed,
    Aborted,
}

// === Inbound ===

/// `init_session`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitSession {
    pub test_run_id: String,
    #[serde(default)]
    pub test_plan: Option<TestPlan>,
    #[serde(default)]
    pub config: Option<SessionOptions>,
}

/// Test plan delivered with `init_session`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPlan {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub steps: Vec<TestStep>,
}

/// Run options delivered with `init_session`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    /// Execute the test plan locally instead of waiting for `execute_step`
    #[serde(default)]
    pub auto_run: bool,
    /// Anything else the server sends is kept for diagnostics
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// `execute_step`
///
/// Both fields are read leniently: whatever arrives, the step still gets
/// a result carrying the id the server sent.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteStep {
    #[serde(default, deserialize_with = "lenient_id")]
    pub step_id: String,
    #[serde(default)]
    pub command: RawCommand,
}

/// `execute_command`
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteCommand {
    #[serde(default)]
    pub command: RawCommand,
}

/// Accept string or numeric ids; anything else becomes empty
fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(id) => id,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// `abort`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Abort {
    #[serde(default)]
    pub reason: Option<String>,
}

// === Outbound ===

/// `session_ready`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReady {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_run_id: Option<String>,
    pub sdk_version: String,
    pub runtime_version: String,
    pub device_info: DeviceInfo,
}

/// Device metadata reported in `session_ready`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub platform: String,
    pub os_version: String,
    pub device_name: String,
    pub screen_width: f64,
    pub screen_height: f64,
}

/// `step_result`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    #[serde(default)]
    pub test_run_id: Option<String>,
    pub step_id: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Base64-encoded PNG
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

/// `command_result`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    #[serde(default)]
    pub test_run_id: Option<String>,
    pub action: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Base64-encoded PNG
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

/// `test_complete`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestComplete {
    pub test_run_id: String,
    pub status: RunStatus,
    pub total_duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<String>,
}

/// `heartbeat`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_run_id: Option<String>,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_session_minimal() {
        let init: InitSession = serde_json::from_str(r#"{"testRunId":"r1"}"#).unwrap();
        assert_eq!(init.test_run_id, "r1");
        assert!(init.test_plan.is_none());
        assert!(init.config.is_none());
    }

    #[test]
    fn test_init_session_with_plan() {
        let init: InitSession = serde_json::from_str(
            r#"{
                "testRunId": "r2",
                "testPlan": {"name": "smoke", "steps": [
                    {"id": "s1", "command": {"action": "tap", "selector": {"strategy": "name", "value": "Play"}}}
                ]},
                "config": {"autoRun": true, "locale": "en"}
            }"#,
        )
        .unwrap();

        let plan = init.test_plan.unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].id, "s1");
        let options = init.config.unwrap();
        assert!(options.auto_run);
        assert_eq!(options.extra["locale"], "en");
    }

    #[test]
    fn test_execute_step_keeps_id_with_bad_command() {
        let step: ExecuteStep = serde_json::from_str(
            r#"{"stepId":"s1","command":{"action":"tap","selector":{"strategy":"xpath","value":"//a"}}}"#,
        )
        .unwrap();
        assert_eq!(step.step_id, "s1");
        assert_eq!(step.command.action(), "tap");
        assert!(step.command.parse().is_err());

        let numeric: ExecuteStep = serde_json::from_str(r#"{"stepId":7,"command":"tap"}"#).unwrap();
        assert_eq!(numeric.step_id, "7");
        assert_eq!(numeric.command.action(), "");

        let bare: ExecuteCommand = serde_json::from_str("{}").unwrap();
        assert!(bare.command.parse().is_err());
    }

    #[test]
    fn test_step_result_omits_empty_fields() {
        let result = StepResult {
            test_run_id: Some("r1".to_string()),
            step_id: "s1".to_string(),
            status: StepStatus::Passed,
            duration_ms: 12,
            error: None,
            screenshot: None,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"testRunId": "r1", "stepId": "s1", "status": "passed", "durationMs": 12})
        );
    }

    #[test]
    fn test_test_complete_status_is_snake_case() {
        let complete = TestComplete {
            test_run_id: "r1".to_string(),
            status: RunStatus::Aborted,
            total_duration_ms: 40,
            video_path: None,
        };
        let value = serde_json::to_value(&complete).unwrap();
        assert_eq!(value["status"], "aborted");
        assert_eq!(value["totalDurationMs"], 40);
    }
}
