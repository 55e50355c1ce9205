//! Command interpreter
//!
//! Turns a declarative [`Command`] into host interactions and reports
//! pass/fail through its `Result`. Everything here runs on the host thread;
//! waits and gestures yield between samples instead of blocking the tick.

mod actions;
pub mod assertion;
pub mod gesture;
pub mod screenshot;
pub mod wait;

use crate::common::config::Timeouts;
use crate::common::{Error, Result};
use crate::host::{ElementHandle, HostBindings};
use crate::protocol::{ActionKind, Command, ElementSelector};

pub use assertion::Operator;
pub use screenshot::{Screenshot, ScreenshotStore};

/// Executes commands against the host
pub struct Interpreter {
    host: HostBindings,
    timeouts: Timeouts,
    screenshots: ScreenshotStore,
}

impl Interpreter {
    pub fn new(host: HostBindings, timeouts: Timeouts) -> Self {
        Self {
            host,
            timeouts,
            screenshots: ScreenshotStore::default(),
        }
    }

    /// Captures waiting to be attached to an outgoing result
    pub fn screenshots(&self) -> &ScreenshotStore {
        &self.screenshots
    }

    pub fn host(&self) -> &HostBindings {
        &self.host
    }

    /// Execute one command to completion
    #[tracing::instrument(skip_all, fields(action = %command.action))]
    pub async fn execute(&self, command: &Command) -> Result<()> {
        let kind = command.kind()?;
        tracing::debug!("Executing command");

        let result = match kind {
            ActionKind::Tap => self.tap(command).await,
            ActionKind::Swipe => self.swipe(command).await,
            ActionKind::Drag => self.drag(command).await,
            ActionKind::Wait => self.wait(command).await,
            ActionKind::Assert => self.assert(command),
            ActionKind::InputText => self.input_text(command),
            ActionKind::Screenshot => self.screenshot(command).await,
            ActionKind::SetSlider => self.set_slider(command),
        };

        if let Err(e) = &result {
            tracing::debug!(code = e.code(), "Command failed: {}", e);
        }
        result
    }

    /// The element a selector picks, honoring its index
    fn resolve(&self, selector: &ElementSelector) -> Result<ElementHandle> {
        self.host
            .directory
            .find(selector)
            .get(selector.index)
            .copied()
            .ok_or_else(|| Error::ElementNotFound(selector.to_string()))
    }

    /// Selector with a non-empty value, or an arguments error
    fn require_selector<'a>(&self, command: &'a Command) -> Result<&'a ElementSelector> {
        command
            .usable_selector()
            .ok_or_else(|| Error::missing_argument(&command.action, "selector"))
    }

    /// First element in the ancestor chain (self included) satisfying `pred`
    fn find_up(
        &self,
        element: ElementHandle,
        mut pred: impl FnMut(ElementHandle) -> bool,
    ) -> Option<ElementHandle> {
        let mut current = Some(element);
        while let Some(el) = current {
            if pred(el) {
                return Some(el);
            }
            current = self.host.directory.parent(el);
        }
        None
    }

    /// First descendant (breadth-first, self excluded) satisfying `pred`
    fn find_down(
        &self,
        element: ElementHandle,
        mut pred: impl FnMut(ElementHandle) -> bool,
    ) -> Option<ElementHandle> {
        let mut queue: std::collections::VecDeque<ElementHandle> =
            self.host.directory.children(element).into();
        while let Some(el) = queue.pop_front() {
            if pred(el) {
                return Some(el);
            }
            queue.extend(self.host.directory.children(el));
        }
        None
    }
}
