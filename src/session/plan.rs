//! Local test plan execution
//!
//! Used when `init_session` asks the agent to run the delivered plan
//! itself. Each step reports a `step_result`; the run ends with one
//! `test_complete`. An abort is honored between steps, never inside one.

use std::time::Duration;

use tokio::time::Instant;

use super::{Execution, Session};
use crate::common::Error;
use crate::protocol::messages::{RunStatus, StepResult, StepStatus, TestComplete, TestPlan};
use crate::protocol::{FailurePolicy, MessageType, TestStep};

/// Why the plan stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    StepFailed,
    Aborted,
}

impl Session {
    #[tracing::instrument(skip_all, fields(run_id = %run_id))]
    pub(super) async fn run_plan(&self, run_id: String, plan: TestPlan) {
        tracing::info!(name = ?plan.name, steps = plan.steps.len(), "Running test plan");
        let started = Instant::now();
        let mut status = RunStatus::Passed;
        let mut halt = None;

        for step in &plan.steps {
            if halt.is_none() && self.abort_requested() {
                tracing::info!(step_id = %step.id, "Plan aborted before step");
                halt = Some(Halt::Aborted);
            }

            if let Some(reason) = halt {
                let skipped = StepResult {
                    test_run_id: Some(run_id.clone()),
                    step_id: step.id.clone(),
                    status: StepStatus::Skipped,
                    duration_ms: 0,
                    error: Some(match reason {
                        Halt::StepFailed => "skipped after an earlier step failed".to_string(),
                        Halt::Aborted => "skipped after abort".to_string(),
                    }),
                    screenshot: None,
                };
                self.send_logged(MessageType::StepResult, &skipped).await;
                continue;
            }

            let execution = self.run_step(step).await;
            let failed = execution.status == StepStatus::Failed;
            let result = StepResult {
                test_run_id: Some(run_id.clone()),
                step_id: step.id.clone(),
                status: execution.status,
                duration_ms: execution.duration_ms,
                error: execution.error,
                screenshot: self.screenshot_for(&step.command),
            };
            self.send_logged(MessageType::StepResult, &result).await;

            if failed {
                status = RunStatus::Failed;
                if step.on_failure == FailurePolicy::Abort {
                    halt = Some(Halt::StepFailed);
                }
            }
        }

        if halt == Some(Halt::Aborted) {
            status = RunStatus::Aborted;
        }

        let complete = TestComplete {
            test_run_id: run_id,
            status,
            total_duration_ms: started.elapsed().as_millis() as u64,
            video_path: None,
        };
        tracing::info!(status = ?complete.status, duration_ms = complete.total_duration_ms, "Test plan finished");
        self.send_logged(MessageType::TestComplete, &complete).await;
    }

    /// Run a step with its retry policy and time limit
    ///
    /// The limit is checked once the command returns; a running command is
    /// never interrupted.
    async fn run_step(&self, step: &TestStep) -> Execution {
        let attempts = match step.on_failure {
            FailurePolicy::Retry => step.retry_count.saturating_add(1),
            _ => 1,
        };
        let limit = step.timeout.filter(|ms| *ms > 0).map(Duration::from_millis);

        let started = Instant::now();
        let mut attempt = 1;
        loop {
            let mut execution = self.run_command(&step.command).await;
            if let Some(limit) = limit {
                if execution.status == StepStatus::Passed && started.elapsed() > limit {
                    execution.status = StepStatus::Failed;
                    execution.error = Some(
                        Error::TimeoutExceeded(format!(
                            "step '{}' took longer than {}ms",
                            step.id,
                            limit.as_millis()
                        ))
                        .to_string(),
                    );
                }
            }
            execution.duration_ms = started.elapsed().as_millis() as u64;

            if execution.status == StepStatus::Passed || attempt >= attempts {
                return execution;
            }
            if self.abort_requested() {
                tracing::info!(step_id = %step.id, "Abort requested, not retrying");
                return execution;
            }

            tracing::info!(
                step_id = %step.id,
                attempt,
                error = execution.error.as_deref().unwrap_or_default(),
                "Step failed, retrying"
            );
            attempt += 1;
        }
    }
}
