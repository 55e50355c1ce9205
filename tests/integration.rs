//! End-to-end integration tests for the testbridge agent
//!
//! These tests verify the complete remote-command workflow by:
//! 1. Starting an in-process WebSocket server standing in for the orchestrator
//! 2. Running the agent against the in-memory host loaded from a scene fixture
//! 3. Exchanging envelopes and checking the results the agent reports

use std::future::Future;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use base64::prelude::{Engine, BASE64_STANDARD};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};
use tokio_util::sync::CancellationToken;

use testbridge::agent::Agent;
use testbridge::common::config::Config;
use testbridge::host::memory::MemoryHost;
use testbridge::host::HostBindings;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// The orchestration server's side of the socket
struct Server {
    ws: WebSocketStream<TcpStream>,
    sent: u32,
}

impl Server {
    async fn send(&mut self, message_type: &str, payload: Value) {
        self.sent += 1;
        let envelope = json!({
            "type": message_type,
            "id": format!("srv-{}", self.sent),
            "timestamp": 0,
            "payload": payload,
        });
        self.send_raw(&envelope.to_string()).await;
    }

    async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string().into()))
            .await
            .expect("Failed to send frame");
    }

    /// Next envelope from the agent
    async fn recv(&mut self) -> Value {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("Timed out waiting for the agent")
                .expect("Agent closed the connection")
                .expect("WebSocket error");
            if let Message::Text(text) = frame {
                return serde_json::from_str(text.as_str()).expect("Agent sent invalid JSON");
            }
        }
    }

    /// Next envelope of the given type, skipping everything else
    async fn recv_type(&mut self, message_type: &str) -> Value {
        loop {
            let envelope = self.recv().await;
            if envelope["type"] == message_type {
                return envelope;
            }
        }
    }
}

/// Run the agent against the fixture scene while `driver` plays the server
async fn with_agent<F, Fut, T>(tweak: impl FnOnce(&mut Config), driver: F) -> T
where
    F: FnOnce(Server) -> Fut,
    Fut: Future<Output = T>,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = Config::default();
    config.server.url = format!("ws://{}/testbridge", listener.local_addr().unwrap());
    config.session.heartbeat_interval_secs = 0;
    tweak(&mut config);

    let host = Arc::new(MemoryHost::from_file(&fixture("scene.yaml")).unwrap());
    let agent = Agent::new(config, HostBindings::from_host(host));
    let shutdown = CancellationToken::new();

    let serve = async {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        let output = driver(Server { ws, sent: 0 }).await;
        shutdown.cancel();
        output
    };

    let (result, output) = tokio::join!(agent.run(shutdown.clone()), serve);
    result.expect("Agent failed");
    output
}

fn assert_score(expected: &str) -> Value {
    json!({
        "action": "assert",
        "selector": {"strategy": "name", "value": "Score"},
        "property": "text",
        "operator": "equals",
        "expected": expected
    })
}

#[tokio::test]
async fn test_session_ready_on_connect() {
    let ready = with_agent(|_| {}, |mut server| async move { server.recv_type("session_ready").await }).await;

    let payload = &ready["payload"];
    assert_eq!(payload["sdkVersion"], env!("CARGO_PKG_VERSION"));
    assert_eq!(payload["deviceInfo"]["screenWidth"], 800.0);
    assert_eq!(payload["deviceInfo"]["screenHeight"], 600.0);
    assert!(ready["id"].as_str().is_some_and(|id| !id.is_empty()));
    assert!(ready["timestamp"].as_i64().is_some_and(|ts| ts > 0));
}

#[tokio::test]
async fn test_execute_step_reports_result_with_run_id() {
    let result = with_agent(|_| {}, |mut server| async move {
        server.recv_type("session_ready").await;
        server.send("init_session", json!({"testRunId": "r1"})).await;
        server
            .send("execute_step", json!({"stepId": "s1", "command": assert_score("100")}))
            .await;
        server.recv_type("step_result").await
    })
    .await;

    let payload = &result["payload"];
    assert_eq!(payload["testRunId"], "r1");
    assert_eq!(payload["stepId"], "s1");
    assert_eq!(payload["status"], "passed");
    assert!(payload["durationMs"].as_u64().is_some());
    assert!(payload.get("error").is_none());
}

#[tokio::test]
async fn test_failed_step_carries_error() {
    let result = with_agent(|_| {}, |mut server| async move {
        server.recv_type("session_ready").await;
        server.send("init_session", json!({"testRunId": "r1"})).await;
        server
            .send("execute_step", json!({"stepId": "s2", "command": assert_score("5")}))
            .await;
        server.recv_type("step_result").await
    })
    .await;

    let payload = &result["payload"];
    assert_eq!(payload["status"], "failed");
    let error = payload["error"].as_str().unwrap();
    assert!(error.contains("expected text equals '5'"), "got: {}", error);
    assert!(error.contains("actual '100'"), "got: {}", error);
}

#[tokio::test]
async fn test_unsupported_action_fails_command() {
    let result = with_agent(|_| {}, |mut server| async move {
        server.recv_type("session_ready").await;
        server.send("execute_command", json!({"command": {"action": "foo"}})).await;
        server.recv_type("command_result").await
    })
    .await;

    let payload = &result["payload"];
    assert_eq!(payload["action"], "foo");
    assert_eq!(payload["status"], "failed");
    assert!(payload["error"].as_str().unwrap().contains("foo"));
}

#[tokio::test]
async fn test_screenshot_command_attaches_png() {
    let result = with_agent(|_| {}, |mut server| async move {
        server.recv_type("session_ready").await;
        server
            .send("execute_command", json!({"command": {"action": "screenshot", "name": "home"}}))
            .await;
        server.recv_type("command_result").await
    })
    .await;

    let payload = &result["payload"];
    assert_eq!(payload["status"], "passed");
    let png = BASE64_STANDARD
        .decode(payload["screenshot"].as_str().unwrap())
        .unwrap();
    assert_eq!(&png[1..4], b"PNG");
}

#[tokio::test]
async fn test_wrongly_typed_unused_fields_do_not_block_commands() {
    let (tap, shot) = with_agent(|_| {}, |mut server| async move {
        server.recv_type("session_ready").await;
        server
            .send(
                "execute_command",
                json!({"command": {"action": "tap", "position": {"x": 400, "y": 300}, "value": "high"}}),
            )
            .await;
        let tap = server.recv_type("command_result").await;
        server
            .send("execute_command", json!({"command": {"action": "screenshot", "duration": "fast"}}))
            .await;
        let shot = server.recv_type("command_result").await;
        (tap, shot)
    })
    .await;

    assert_eq!(tap["payload"]["action"], "tap");
    assert_eq!(tap["payload"]["status"], "passed");
    assert_eq!(shot["payload"]["status"], "passed");
    assert!(shot["payload"]["screenshot"].is_string());
}

#[tokio::test]
async fn test_bad_selector_strategy_fails_step_with_its_id() {
    let result = with_agent(|_| {}, |mut server| async move {
        server.recv_type("session_ready").await;
        server.send("init_session", json!({"testRunId": "r1"})).await;
        server
            .send(
                "execute_step",
                json!({
                    "stepId": "s1",
                    "command": {
                        "action": "assert",
                        "selector": {"strategy": "xpath", "value": "//Score"},
                        "expected": "100"
                    }
                }),
            )
            .await;
        server.recv_type("step_result").await
    })
    .await;

    let payload = &result["payload"];
    assert_eq!(payload["stepId"], "s1");
    assert_eq!(payload["testRunId"], "r1");
    assert_eq!(payload["status"], "failed");
    let error = payload["error"].as_str().unwrap();
    assert!(error.contains("xpath"), "got: {}", error);
}

#[tokio::test]
async fn test_commands_report_in_arrival_order() {
    let (first, second) = with_agent(|_| {}, |mut server| async move {
        server.recv_type("session_ready").await;
        server
            .send(
                "execute_command",
                json!({"command": {"action": "wait", "condition": {"type": "delay", "ms": 100}}}),
            )
            .await;
        server
            .send(
                "execute_command",
                json!({"command": {"action": "tap", "selector": {"strategy": "name", "value": "Label"}}}),
            )
            .await;
        let first = server.recv_type("command_result").await;
        let second = server.recv_type("command_result").await;
        (first, second)
    })
    .await;

    assert_eq!(first["payload"]["action"], "wait");
    assert_eq!(second["payload"]["action"], "tap");
    assert_eq!(second["payload"]["status"], "passed");
}

#[tokio::test]
async fn test_malformed_frames_are_ignored() {
    let result = with_agent(|_| {}, |mut server| async move {
        server.recv_type("session_ready").await;
        server.send_raw("this is not json").await;
        server.send_raw(r#"{"id":"no-type"}"#).await;
        server.send("mystery", json!({})).await;
        server
            .send("execute_command", json!({"command": assert_score("100")}))
            .await;
        server.recv_type("command_result").await
    })
    .await;

    assert_eq!(result["payload"]["status"], "passed");
}

#[tokio::test]
async fn test_auto_run_plan_reports_every_step() {
    let (steps, complete) = with_agent(|_| {}, |mut server| async move {
        server.recv_type("session_ready").await;
        server
            .send(
                "init_session",
                json!({
                    "testRunId": "plan-1",
                    "config": {"autoRun": true},
                    "testPlan": {"name": "smoke", "steps": [
                        {"id": "s1", "command": assert_score("100")},
                        {"id": "s2", "onFailure": "continue", "command": assert_score("5")},
                        {"id": "s3", "command": {"action": "tap",
                            "selector": {"strategy": "path", "value": "Canvas/Play/Label"}}}
                    ]}
                }),
            )
            .await;

        let mut steps = Vec::new();
        for _ in 0..3 {
            steps.push(server.recv_type("step_result").await["payload"].clone());
        }
        let complete = server.recv_type("test_complete").await["payload"].clone();
        (steps, complete)
    })
    .await;

    let statuses: Vec<_> = steps
        .iter()
        .map(|s| (s["stepId"].as_str().unwrap(), s["status"].as_str().unwrap()))
        .collect();
    assert_eq!(statuses, vec![("s1", "passed"), ("s2", "failed"), ("s3", "passed")]);
    assert!(steps.iter().all(|s| s["testRunId"] == "plan-1"));

    assert_eq!(complete["testRunId"], "plan-1");
    assert_eq!(complete["status"], "failed");
    assert!(complete["totalDurationMs"].as_u64().is_some());
}

#[tokio::test]
async fn test_failed_step_with_abort_policy_skips_rest() {
    let (steps, complete) = with_agent(|_| {}, |mut server| async move {
        server.recv_type("session_ready").await;
        server
            .send(
                "init_session",
                json!({
                    "testRunId": "plan-2",
                    "config": {"autoRun": true},
                    "testPlan": {"steps": [
                        {"id": "s1", "onFailure": "abort", "command": assert_score("0")},
                        {"id": "s2", "command": assert_score("100")}
                    ]}
                }),
            )
            .await;

        let first = server.recv_type("step_result").await["payload"].clone();
        let second = server.recv_type("step_result").await["payload"].clone();
        let complete = server.recv_type("test_complete").await["payload"].clone();
        (vec![first, second], complete)
    })
    .await;

    assert_eq!(steps[0]["status"], "failed");
    assert_eq!(steps[1]["status"], "skipped");
    assert_eq!(complete["status"], "failed");
}

#[tokio::test]
async fn test_abort_stops_plan_between_steps() {
    let (last_step, complete) = with_agent(|_| {}, |mut server| async move {
        server.recv_type("session_ready").await;
        server
            .send(
                "init_session",
                json!({
                    "testRunId": "plan-3",
                    "config": {"autoRun": true},
                    "testPlan": {"steps": [
                        {"id": "s1", "command": {"action": "wait",
                            "condition": {"type": "delay", "ms": 200}}},
                        {"id": "s2", "command": assert_score("100")}
                    ]}
                }),
            )
            .await;
        server.send("abort", json!({"reason": "user cancelled"})).await;

        server.recv_type("step_result").await;
        let last_step = server.recv_type("step_result").await["payload"].clone();
        let complete = server.recv_type("test_complete").await["payload"].clone();
        (last_step, complete)
    })
    .await;

    assert_eq!(last_step["stepId"], "s2");
    assert_eq!(last_step["status"], "skipped");
    assert_eq!(complete["status"], "aborted");
}

#[tokio::test]
async fn test_heartbeat_carries_run_id() {
    let heartbeat = with_agent(
        |config| config.session.heartbeat_interval_secs = 1,
        |mut server| async move {
            server.recv_type("session_ready").await;
            server.send("init_session", json!({"testRunId": "r9"})).await;
            server.recv_type("heartbeat").await
        },
    )
    .await;

    assert_eq!(heartbeat["payload"]["testRunId"], "r9");
    assert!(heartbeat["payload"]["timestamp"].as_i64().is_some());
}

#[tokio::test]
async fn test_agent_exits_when_server_closes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = Config::default();
    config.server.url = format!("ws://{}/testbridge", listener.local_addr().unwrap());

    let host = Arc::new(MemoryHost::from_file(&fixture("scene.yaml")).unwrap());
    let agent = Agent::new(config, HostBindings::from_host(host));

    let serve = async {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.close(None).await.unwrap();
    };

    // No shutdown signal: the close frame alone must end the run.
    let (result, ()) = tokio::join!(agent.run(CancellationToken::new()), serve);
    assert!(result.is_ok());
}

#[test]
fn test_cli_inspect_lists_matches() {
    let output = Command::new(env!("CARGO_BIN_EXE_testbridge"))
        .args(["inspect", "--scene"])
        .arg(fixture("scene.yaml"))
        .args(["--strategy", "name", "--value", "Score"])
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to run testbridge");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Canvas/Score"), "stdout: {}", stdout);
    assert!(stdout.contains("visible"), "stdout: {}", stdout);
}

#[test]
fn test_cli_config_reads_explicit_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[server]\nurl = \"ws://example.test:9000/bridge\"\n").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_testbridge"))
        .args(["config", "--config"])
        .arg(&path)
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to run testbridge");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ws://example.test:9000/bridge"), "stdout: {}", stdout);
    assert!(stdout.contains("heartbeat_interval_secs"), "stdout: {}", stdout);
}

#[test]
fn test_cli_inspect_rejects_unknown_strategy() {
    let output = Command::new(env!("CARGO_BIN_EXE_testbridge"))
        .args(["inspect", "--scene"])
        .arg(fixture("scene.yaml"))
        .args(["--strategy", "xpath", "--value", "Score"])
        .output()
        .expect("Failed to run testbridge");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("xpath"));
}
