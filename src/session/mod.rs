//! Session orchestration
//!
//! Routes decoded envelopes to the interpreter, tracks the run identifier
//! and composes the result envelopes sent back to the server. Routing runs
//! inside dispatcher callbacks on the host thread; anything that awaits is
//! started there with `spawn_local` and serialized by the command lock.

mod plan;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::time::Instant;

use crate::common::config::Config;
use crate::common::{epoch_millis, Result};
use crate::interpreter::Interpreter;
use crate::protocol::messages::{
    Abort, CommandResult, DeviceInfo, ExecuteCommand, ExecuteStep, Heartbeat, InitSession,
    SessionReady, StepResult, StepStatus,
};
use crate::protocol::{ActionKind, Envelope, MessageType, RawCommand};
use crate::transport::{Connection, EnvelopeHandler};

/// Agent version reported in `session_ready`
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Session state, cheap to clone
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    connection: Arc<Connection>,
    interpreter: Interpreter,
    runtime_version: String,
    run_id: parking_lot::Mutex<Option<String>>,
    /// Set by `abort` or disconnect; checked by the plan runner between steps
    abort_requested: AtomicBool,
    /// Keeps commands in arrival order; separate from the dispatcher lock
    command_lock: tokio::sync::Mutex<()>,
}

/// Outcome of running one command
struct Execution {
    status: StepStatus,
    duration_ms: u64,
    error: Option<String>,
}

impl Execution {
    fn from_result(result: &Result<()>, started: Instant) -> Self {
        Self {
            status: if result.is_ok() {
                StepStatus::Passed
            } else {
                StepStatus::Failed
            },
            duration_ms: started.elapsed().as_millis() as u64,
            error: result.as_ref().err().map(|e| e.to_string()),
        }
    }
}

impl Session {
    pub fn new(connection: Arc<Connection>, interpreter: Interpreter, config: &Config) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                connection,
                interpreter,
                runtime_version: config.host.runtime_version.clone(),
                run_id: parking_lot::Mutex::new(None),
                abort_requested: AtomicBool::new(false),
                command_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Identifier of the active test run
    pub fn run_id(&self) -> Option<String> {
        self.inner.run_id.lock().clone()
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.inner.interpreter
    }

    fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Route one envelope
    ///
    /// Must run on the host thread inside a `LocalSet`.
    pub fn route(&self, envelope: Envelope) -> Result<()> {
        let message_type = envelope.kind();
        tracing::debug!(%message_type, id = %envelope.id, "Routing envelope");

        match message_type {
            MessageType::Connected => {
                tracing::debug!("Server acknowledged connection");
                Ok(())
            }
            MessageType::InitSession => self.init_session(envelope.payload()?),
            MessageType::ExecuteStep => {
                let step: ExecuteStep = envelope.payload()?;
                let session = self.clone();
                tokio::task::spawn_local(async move {
                    session.execute_step(step).await;
                });
                Ok(())
            }
            MessageType::ExecuteCommand => {
                let request: ExecuteCommand = envelope.payload()?;
                let session = self.clone();
                tokio::task::spawn_local(async move {
                    session.execute_command(request.command).await;
                });
                Ok(())
            }
            MessageType::Abort => {
                let abort = envelope.payload::<Abort>().unwrap_or_default();
                self.abort(abort);
                Ok(())
            }
            other => {
                tracing::debug!(message_type = %other, "Ignoring envelope");
                Ok(())
            }
        }
    }

    fn init_session(&self, init: InitSession) -> Result<()> {
        tracing::info!(run_id = %init.test_run_id, "Session initialized");
        *self.inner.run_id.lock() = Some(init.test_run_id.clone());
        self.inner.abort_requested.store(false, Ordering::Release);
        self.inner.interpreter.screenshots().clear();

        let auto_run = init.config.as_ref().is_some_and(|c| c.auto_run);
        match init.test_plan {
            Some(plan) if auto_run && !plan.steps.is_empty() => {
                let session = self.clone();
                let run_id = init.test_run_id;
                tokio::task::spawn_local(async move {
                    session.run_plan(run_id, plan).await;
                });
            }
            Some(plan) if auto_run => {
                tracing::warn!(name = ?plan.name, "autoRun requested with an empty test plan");
            }
            _ => {}
        }
        Ok(())
    }

    fn abort(&self, abort: Abort) {
        tracing::warn!(
            run_id = ?self.run_id(),
            reason = abort.reason.as_deref().unwrap_or("none given"),
            "Abort requested"
        );
        self.inner.abort_requested.store(true, Ordering::Release);
    }

    fn abort_requested(&self) -> bool {
        self.inner.abort_requested.load(Ordering::Acquire)
    }

    /// Run one command under the command lock
    ///
    /// The lock is held for the whole command so results go out in
    /// arrival order. It is never taken by the dispatcher or the reader.
    async fn run_command(&self, raw: &RawCommand) -> Execution {
        let _turn = self.inner.command_lock.lock().await;
        let started = Instant::now();
        let result = match raw.parse() {
            Ok(command) => self.inner.interpreter.execute(&command).await,
            Err(e) => Err(e),
        };
        Execution::from_result(&result, started)
    }

    /// Resolves once no command is executing
    pub async fn wait_idle(&self) {
        let _ = self.inner.command_lock.lock().await;
    }

    /// Pending capture, if the command produced one
    fn screenshot_for(&self, command: &RawCommand) -> Option<String> {
        if matches!(command.kind(), Ok(ActionKind::Screenshot)) {
            self.inner
                .interpreter
                .screenshots()
                .take()
                .map(|shot| shot.to_base64())
        } else {
            None
        }
    }

    #[tracing::instrument(skip_all, fields(step_id = %request.step_id))]
    async fn execute_step(&self, request: ExecuteStep) {
        let execution = self.run_command(&request.command).await;
        if let Some(error) = &execution.error {
            tracing::info!("Step failed: {}", error);
        }

        let result = StepResult {
            test_run_id: self.run_id(),
            step_id: request.step_id,
            status: execution.status,
            duration_ms: execution.duration_ms,
            error: execution.error,
            screenshot: self.screenshot_for(&request.command),
        };
        self.send_logged(MessageType::StepResult, &result).await;
    }

    #[tracing::instrument(skip_all, fields(action = %command.action()))]
    async fn execute_command(&self, command: RawCommand) {
        let execution = self.run_command(&command).await;
        let screenshot = self.screenshot_for(&command);

        let result = CommandResult {
            test_run_id: self.run_id(),
            action: command.action().to_string(),
            status: execution.status,
            duration_ms: execution.duration_ms,
            error: execution.error,
            screenshot,
        };
        self.send_logged(MessageType::CommandResult, &result).await;
    }

    /// Announce the agent after the connection opens
    pub async fn send_session_ready(&self) -> Result<()> {
        let viewport = self.inner.interpreter.host().directory.viewport();
        let ready = SessionReady {
            test_run_id: self.run_id(),
            sdk_version: SDK_VERSION.to_string(),
            runtime_version: self.inner.runtime_version.clone(),
            device_info: device_info(viewport.width, viewport.height),
        };
        self.connection()
            .send(MessageType::SessionReady.as_str(), &ready)
            .await
    }

    pub async fn send_heartbeat(&self) -> Result<()> {
        let heartbeat = Heartbeat {
            test_run_id: self.run_id(),
            timestamp: epoch_millis(),
        };
        self.connection()
            .send(MessageType::Heartbeat.as_str(), &heartbeat)
            .await
    }

    /// Session end: forget the run and stop any local plan
    pub fn on_disconnected(&self) {
        if let Some(run_id) = self.inner.run_id.lock().take() {
            tracing::info!(%run_id, "Session ended");
        }
        self.inner.abort_requested.store(true, Ordering::Release);
        self.inner.interpreter.screenshots().clear();
    }

    async fn send_logged<P: serde::Serialize>(&self, message_type: MessageType, payload: &P) {
        if let Err(e) = self.connection().send(message_type.as_str(), payload).await {
            tracing::error!(%message_type, "Failed to send result: {}", e);
        }
    }
}

impl EnvelopeHandler for Session {
    fn handle(&self, envelope: Envelope) -> Result<()> {
        self.route(envelope)
    }
}

/// Device metadata for `session_ready`
pub fn device_info(screen_width: f64, screen_height: f64) -> DeviceInfo {
    let info = os_info::get();
    let device_name = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    DeviceInfo {
        platform: info.os_type().to_string(),
        os_version: info.version().to_string(),
        device_name,
        screen_width,
        screen_height,
    }
}
