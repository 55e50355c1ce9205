//! Action handlers

use std::time::Duration;

use super::gesture::GesturePath;
use super::screenshot::{self, Screenshot};
use super::{Interpreter, Operator};
use crate::common::{Error, Result};
use crate::host::{ElementHandle, Point, WellKnownProperty};
use crate::protocol::Command;

impl Interpreter {
    pub(super) async fn tap(&self, command: &Command) -> Result<()> {
        if command.usable_selector().is_some() && command.position.is_some() {
            return Err(Error::InvalidCommandArguments(
                "'tap' takes 'selector' or 'position', not both".to_string(),
            ));
        }

        if let Some(selector) = command.usable_selector() {
            let element = self.resolve(selector)?;
            let directory = &self.host.directory;
            return match self.find_up(element, |el| directory.activate(el)) {
                Some(activated) => {
                    tracing::debug!(element = %directory.describe(activated), "Activated");
                    Ok(())
                }
                None => Err(Error::ElementNotFound(format!(
                    "no clickable element at or above {}",
                    directory.describe(element)
                ))),
            };
        }

        let position = command.position.ok_or_else(|| {
            Error::InvalidCommandArguments("'tap' requires 'selector' or 'position'".to_string())
        })?;
        let point = position.resolve(self.host.directory.viewport());

        let input = &self.host.input;
        input.pointer_down(point);
        if let Some(hold) = command.hold_duration.filter(|ms| *ms > 0) {
            tokio::time::sleep(Duration::from_millis(hold)).await;
        }
        input.pointer_up(point);
        input.click(point);
        Ok(())
    }

    pub(super) async fn swipe(&self, command: &Command) -> Result<()> {
        let viewport = self.host.directory.viewport();
        let start = match command.from.or(command.position) {
            Some(position) => position.resolve(viewport),
            None => {
                let selector = command.usable_selector().ok_or_else(|| {
                    Error::InvalidCommandArguments(
                        "'swipe' requires 'from' or 'selector'".to_string(),
                    )
                })?;
                self.element_point(self.resolve(selector)?)?
            }
        };
        let end = command
            .to
            .ok_or_else(|| Error::missing_argument("swipe", "to"))?
            .resolve(viewport);

        let path = GesturePath::new(start, end, self.gesture_duration(command), self.timeouts.gesture_steps_per_sec);
        let input = &self.host.input;

        input.pointer_down(start);
        for point in path.points() {
            tokio::time::sleep(path.step_delay).await;
            input.pointer_move(point);
        }
        input.pointer_up(end);
        Ok(())
    }

    pub(super) async fn drag(&self, command: &Command) -> Result<()> {
        let selector = self.require_selector(command)?;
        let element = self.resolve(selector)?;
        let start = self.element_point(element)?;
        let end = command
            .to
            .ok_or_else(|| Error::missing_argument("drag", "to"))?
            .resolve(self.host.directory.viewport());

        let target = self.drag_target(element);
        let path = GesturePath::new(start, end, self.gesture_duration(command), self.timeouts.gesture_steps_per_sec);
        let input = &self.host.input;

        input.begin_drag(target, start);
        for point in path.points() {
            tokio::time::sleep(path.step_delay).await;
            input.drag_move(target, point);
        }
        input.end_drag(target, end);
        Ok(())
    }

    /// The element that handles the drag: itself, a descendant, then an
    /// ancestor, falling back to the element itself
    fn drag_target(&self, element: ElementHandle) -> ElementHandle {
        let directory = &self.host.directory;
        if directory.has_drag_handler(element) {
            return element;
        }
        self.find_down(element, |el| directory.has_drag_handler(el))
            .or_else(|| self.find_up(element, |el| directory.has_drag_handler(el)))
            .unwrap_or_else(|| {
                tracing::debug!(
                    element = %directory.describe(element),
                    "No drag handler found, dragging element directly"
                );
                element
            })
    }

    pub(super) fn assert(&self, command: &Command) -> Result<()> {
        let selector = self.require_selector(command)?;
        let property = command.property.as_deref().unwrap_or("exists");
        let operator: Operator = command.operator.as_deref().unwrap_or("equals").parse()?;
        let expected = command.expected_text().unwrap_or_else(|| "true".to_string());

        let directory = &self.host.directory;
        let element = directory
            .find(selector)
            .get(selector.index)
            .copied()
            .filter(|el| directory.exists(*el));

        let actual = if property.eq_ignore_ascii_case("exists") {
            element.is_some().to_string()
        } else {
            element
                .and_then(|el| match WellKnownProperty::parse(property) {
                    Some(known) => directory.property(el, known),
                    None => directory.named_property(el, property),
                })
                .ok_or_else(|| {
                    Error::AssertionFailed(format!(
                        "property not found: '{}' on {}",
                        property, selector
                    ))
                })?
        };

        if operator.evaluate(&actual, &expected) {
            Ok(())
        } else {
            Err(Error::AssertionFailed(format!(
                "{}: expected {} {} '{}', actual '{}'",
                selector, property, operator, expected, actual
            )))
        }
    }

    pub(super) fn input_text(&self, command: &Command) -> Result<()> {
        let selector = self.require_selector(command)?;
        let element = self.resolve(selector)?;
        let directory = &self.host.directory;

        let field = if directory.is_text_input(element) {
            element
        } else {
            self.find_down(element, |el| directory.is_text_input(el))
                .ok_or_else(|| {
                    Error::ElementNotFound(format!("no text input at {}", directory.describe(element)))
                })?
        };

        let text = command.text.as_deref().unwrap_or_default();
        let content = if command.clear_first.unwrap_or(false) {
            text.to_string()
        } else {
            let existing = directory
                .property(field, WellKnownProperty::Text)
                .unwrap_or_default();
            existing + text
        };

        directory.set_text(field, &content);
        directory.notify_value_changed(field);
        Ok(())
    }

    pub(super) fn set_slider(&self, command: &Command) -> Result<()> {
        let selector = self.require_selector(command)?;
        let value = command
            .value
            .ok_or_else(|| Error::missing_argument("set_slider", "value"))?;
        let element = self.resolve(selector)?;
        let directory = &self.host.directory;

        let slider = self
            .find_up(element, |el| directory.slider_range(el).is_some())
            .ok_or_else(|| {
                Error::ElementNotFound(format!("no slider at or above {}", directory.describe(element)))
            })?;
        let range = directory
            .slider_range(slider)
            .ok_or_else(|| Error::Internal("slider range disappeared".to_string()))?;

        let clamped = value.clamp(range.min.min(range.max), range.max.max(range.min));
        directory.set_slider_value(slider, clamped);
        directory.notify_value_changed(slider);
        Ok(())
    }

    pub(super) async fn screenshot(&self, command: &Command) -> Result<()> {
        let png = self.host.frames.capture_png().await?;
        let name = command
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(screenshot::default_name);

        tracing::debug!(name = %name, bytes = png.len(), "Captured screenshot");
        self.screenshots.put(Screenshot { name, png });
        Ok(())
    }

    fn element_point(&self, element: ElementHandle) -> Result<Point> {
        self.host.directory.screen_point(element).ok_or_else(|| {
            Error::ElementNotFound(format!(
                "{} has no screen position",
                self.host.directory.describe(element)
            ))
        })
    }

    fn gesture_duration(&self, command: &Command) -> Duration {
        Duration::from_millis(command.duration.unwrap_or(self.timeouts.gesture_default_ms))
    }
}
