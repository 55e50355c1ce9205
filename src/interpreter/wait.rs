//! Condition polling for `wait`

use std::time::Duration;

use tokio::time::Instant;

use super::Interpreter;
use crate::common::{Error, Result};
use crate::protocol::{Command, ConditionKind, ElementSelector, WaitCondition};

/// Poll `predicate` until it holds or `timeout` elapses
///
/// The predicate is checked immediately, then every `interval`. The last
/// sleep is shortened so the final check happens at the deadline rather
/// than past it.
pub async fn poll_until<F>(mut predicate: F, timeout: Duration, interval: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    loop {
        if predicate() {
            return true;
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return false;
        }
        tokio::time::sleep(interval.min(timeout - elapsed)).await;
    }
}

impl Interpreter {
    pub(super) async fn wait(&self, command: &Command) -> Result<()> {
        let condition = command
            .condition
            .as_ref()
            .ok_or_else(|| Error::missing_argument("wait", "condition"))?;

        if condition.kind == ConditionKind::Delay {
            let ms = condition.ms.unwrap_or(self.timeouts.delay_default_ms);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            return Ok(());
        }

        let timeout = Duration::from_millis(command.timeout.unwrap_or(self.timeouts.wait_default_ms));
        let interval = Duration::from_millis(self.timeouts.poll_interval_ms.max(1));

        let check = self.condition_check(condition)?;
        if poll_until(check, timeout, interval).await {
            Ok(())
        } else {
            Err(Error::TimeoutExceeded(format!(
                "{} not met within {}ms",
                condition,
                timeout.as_millis()
            )))
        }
    }

    /// Build the predicate for a non-delay condition
    fn condition_check<'a>(
        &'a self,
        condition: &'a WaitCondition,
    ) -> Result<Box<dyn FnMut() -> bool + 'a>> {
        match condition.kind {
            ConditionKind::ElementVisible => {
                let selector = condition_selector(condition)?;
                Ok(Box::new(move || self.selected_visible(selector)))
            }
            ConditionKind::ElementGone => {
                let selector = condition_selector(condition)?;
                Ok(Box::new(move || !self.selected_visible(selector)))
            }
            ConditionKind::SceneLoaded => {
                let scene = condition.scene_name.as_deref().ok_or_else(|| {
                    Error::InvalidCommandArguments("scene_loaded requires 'sceneName'".to_string())
                })?;
                Ok(Box::new(move || {
                    self.host.directory.active_scene().as_deref() == Some(scene)
                }))
            }
            ConditionKind::Delay => Ok(Box::new(|| true)),
        }
    }

    /// Whether the element picked by the selector exists and is shown
    fn selected_visible(&self, selector: &ElementSelector) -> bool {
        let directory = &self.host.directory;
        directory
            .find(selector)
            .get(selector.index)
            .is_some_and(|el| directory.exists(*el) && directory.is_visible(*el))
    }
}

fn condition_selector(condition: &WaitCondition) -> Result<&ElementSelector> {
    condition
        .selector
        .as_ref()
        .filter(|s| !s.value.is_empty())
        .ok_or_else(|| {
            Error::InvalidCommandArguments(format!("{} requires a selector", condition))
        })
}
