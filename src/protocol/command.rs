//! Command model
//!
//! A command arrives as a flat JSON object keyed by `action`. Each action
//! reads only the fields it needs; anything else present is ignored.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::Error;
use crate::host::{Point, Viewport};

/// Actions the interpreter knows how to execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Tap,
    Swipe,
    Drag,
    Wait,
    Assert,
    InputText,
    Screenshot,
    SetSlider,
}

impl FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tap" => Ok(Self::Tap),
            "swipe" => Ok(Self::Swipe),
            "drag" => Ok(Self::Drag),
            "wait" => Ok(Self::Wait),
            "assert" => Ok(Self::Assert),
            "input_text" => Ok(Self::InputText),
            "screenshot" => Ok(Self::Screenshot),
            "set_slider" => Ok(Self::SetSlider),
            other => Err(Error::UnsupportedAction(other.to_string())),
        }
    }
}

impl ActionKind {
    /// Wire fields this action reads
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            Self::Tap => &["selector", "position", "holdDuration"],
            Self::Swipe => &["selector", "position", "from", "to", "duration"],
            Self::Drag => &["selector", "to", "duration"],
            Self::Wait => &["condition", "timeout"],
            Self::Assert => &["selector", "property", "operator", "expected"],
            Self::InputText => &["selector", "text", "clearFirst"],
            Self::Screenshot => &["name"],
            Self::SetSlider => &["selector", "value"],
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tap => "tap",
            Self::Swipe => "swipe",
            Self::Drag => "drag",
            Self::Wait => "wait",
            Self::Assert => "assert",
            Self::InputText => "input_text",
            Self::Screenshot => "screenshot",
            Self::SetSlider => "set_slider",
        };
        f.write_str(name)
    }
}

/// A single declarative command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Command {
    /// Action tag (`tap`, `swipe`, ...)
    pub action: String,
    pub selector: Option<ElementSelector>,
    /// Tap point
    pub position: Option<Position>,
    /// Swipe start
    pub from: Option<Position>,
    /// Swipe/drag end
    pub to: Option<Position>,
    /// Gesture duration in milliseconds
    pub duration: Option<u64>,
    /// Press hold time for positional taps, in milliseconds
    pub hold_duration: Option<u64>,
    pub condition: Option<WaitCondition>,
    /// Wait timeout in milliseconds
    pub timeout: Option<u64>,
    pub property: Option<String>,
    pub operator: Option<String>,
    /// Expected value; numbers and booleans are compared by their text form
    pub expected: Option<Value>,
    pub text: Option<String>,
    pub clear_first: Option<bool>,
    /// Screenshot name
    pub name: Option<String>,
    /// Slider value
    pub value: Option<f64>,
}

impl Command {
    /// Build a bare command for an action
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Default::default()
        }
    }

    /// Parse the action tag
    pub fn kind(&self) -> Result<ActionKind, Error> {
        self.action.parse()
    }

    /// Selector, only if it carries a non-empty value
    pub fn usable_selector(&self) -> Option<&ElementSelector> {
        self.selector.as_ref().filter(|s| !s.value.is_empty())
    }

    /// Expected value rendered as text
    pub fn expected_text(&self) -> Option<String> {
        self.expected.as_ref().map(|v| match v {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }
}

/// A command exactly as it arrived on the wire
///
/// Conversion into a [`Command`] happens at execution time, so a malformed
/// command still produces a failed result instead of a dropped envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawCommand(pub Value);

impl RawCommand {
    /// Action tag, empty if absent
    pub fn action(&self) -> &str {
        self.0
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn kind(&self) -> Result<ActionKind, Error> {
        self.action().parse()
    }

    /// Typed command built from the fields its action reads
    ///
    /// Fields the action does not read are dropped before conversion, so
    /// their types never matter. A badly typed field the action does read
    /// is an arguments error. Unknown actions convert to a bare command
    /// and fail as unsupported when executed.
    pub fn parse(&self) -> Result<Command, Error> {
        let fields = self.0.as_object().ok_or_else(|| {
            Error::InvalidCommandArguments("command must be a JSON object".to_string())
        })?;
        let action = self.action();
        let Ok(kind) = action.parse::<ActionKind>() else {
            return Ok(Command::new(action));
        };

        let mut relevant: serde_json::Map<String, Value> = kind
            .fields()
            .iter()
            .filter_map(|field| fields.get(*field).map(|v| (field.to_string(), v.clone())))
            .collect();
        relevant.insert("action".to_string(), Value::String(action.to_string()));

        serde_json::from_value(Value::Object(relevant))
            .map_err(|e| Error::InvalidCommandArguments(format!("'{}': {}", action, e)))
    }
}

/// How a selector matches elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorStrategy {
    /// Element name
    Name,
    /// Element tag
    Tag,
    /// Slash-separated hierarchy path
    Path,
    /// Displayed text
    Text,
    /// Attached component type
    Component,
}

impl fmt::Display for SelectorStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Name => "name",
            Self::Tag => "tag",
            Self::Path => "path",
            Self::Text => "text",
            Self::Component => "component",
        };
        f.write_str(name)
    }
}

impl FromStr for SelectorStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(Self::Name),
            "tag" => Ok(Self::Tag),
            "path" => Ok(Self::Path),
            "text" => Ok(Self::Text),
            "component" => Ok(Self::Component),
            other => Err(Error::InvalidCommandArguments(format!(
                "unknown selector strategy '{}'",
                other
            ))),
        }
    }
}

/// Describes which element(s) a command targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSelector {
    pub strategy: SelectorStrategy,
    pub value: String,
    /// Which match to use when several elements match
    #[serde(default)]
    pub index: usize,
}

impl ElementSelector {
    pub fn new(strategy: SelectorStrategy, value: impl Into<String>) -> Self {
        Self {
            strategy,
            value: value.into(),
            index: 0,
        }
    }
}

impl fmt::Display for ElementSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}='{}'", self.strategy, self.value)?;
        if self.index > 0 {
            write!(f, "[{}]", self.index)?;
        }
        Ok(())
    }
}

/// A screen position, absolute or as fractions of the viewport
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub relative: bool,
}

impl Position {
    pub fn absolute(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            relative: false,
        }
    }

    pub fn relative(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            relative: true,
        }
    }

    /// Resolve to viewport coordinates
    pub fn resolve(&self, viewport: Viewport) -> Point {
        if self.relative {
            Point::new(self.x * viewport.width, self.y * viewport.height)
        } else {
            Point::new(self.x, self.y)
        }
    }
}

/// Kind of wait condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    ElementVisible,
    ElementGone,
    SceneLoaded,
    Delay,
}

/// Condition polled by `wait`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitCondition {
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    #[serde(default)]
    pub selector: Option<ElementSelector>,
    #[serde(default)]
    pub scene_name: Option<String>,
    /// Pause length for `delay`, in milliseconds
    #[serde(default)]
    pub ms: Option<u64>,
}

impl fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ConditionKind::ElementVisible => match &self.selector {
                Some(s) => write!(f, "element_visible({})", s),
                None => write!(f, "element_visible"),
            },
            ConditionKind::ElementGone => match &self.selector {
                Some(s) => write!(f, "element_gone({})", s),
                None => write!(f, "element_gone"),
            },
            ConditionKind::SceneLoaded => {
                write!(f, "scene_loaded({})", self.scene_name.as_deref().unwrap_or(""))
            }
            ConditionKind::Delay => write!(f, "delay({}ms)", self.ms.unwrap_or_default()),
        }
    }
}

/// What the plan runner does when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    Abort,
    Continue,
    Retry,
}

/// One step of a test plan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStep {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub command: RawCommand,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    #[serde(default)]
    pub retry_count: u32,
    /// Step timeout in milliseconds
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_position_scales_by_viewport() {
        let viewport = Viewport::new(1000.0, 2000.0);
        assert_eq!(
            Position::relative(0.5, 0.5).resolve(viewport),
            Point::new(500.0, 1000.0)
        );
    }

    #[test]
    fn test_absolute_position_passes_through() {
        let viewport = Viewport::new(1000.0, 2000.0);
        assert_eq!(
            Position::absolute(12.5, 99.0).resolve(viewport),
            Point::new(12.5, 99.0)
        );
    }

    #[test]
    fn test_unknown_action_is_unsupported() {
        let err = Command::new("foo").kind().unwrap_err();
        assert!(matches!(err, Error::UnsupportedAction(ref a) if a == "foo"));
    }

    fn raw(value: Value) -> RawCommand {
        RawCommand(value)
    }

    #[test]
    fn test_badly_typed_unread_fields_are_ignored() {
        let tap = raw(serde_json::json!({
            "action": "tap",
            "position": {"x": 10, "y": 20},
            "value": "high",
            "text": 42,
            "condition": "soon"
        }))
        .parse()
        .unwrap();
        assert_eq!(tap.kind().unwrap(), ActionKind::Tap);
        assert_eq!(tap.position, Some(Position::absolute(10.0, 20.0)));
        assert!(tap.value.is_none());
        assert!(tap.text.is_none());

        let shot = raw(serde_json::json!({
            "action": "screenshot",
            "name": "home",
            "duration": "fast",
            "selector": {"strategy": "xpath", "value": "//x"}
        }))
        .parse()
        .unwrap();
        assert_eq!(shot.name.as_deref(), Some("home"));
        assert!(shot.duration.is_none());
        assert!(shot.selector.is_none());
    }

    #[test]
    fn test_badly_typed_read_field_is_an_arguments_error() {
        let err = raw(serde_json::json!({
            "action": "assert",
            "selector": {"strategy": "xpath", "value": "Score"}
        }))
        .parse()
        .unwrap_err();
        assert!(matches!(err, Error::InvalidCommandArguments(ref m) if m.contains("xpath")));

        let err = raw(serde_json::json!({"action": "set_slider", "value": "high"}))
            .parse()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCommandArguments(_)));
    }

    #[test]
    fn test_unknown_action_parses_to_bare_command() {
        let cmd = raw(serde_json::json!({"action": "foo", "duration": "fast"}))
            .parse()
            .unwrap();
        assert!(matches!(cmd.kind(), Err(Error::UnsupportedAction(ref a)) if a == "foo"));
    }

    #[test]
    fn test_non_object_command_is_rejected() {
        let err = raw(Value::String("tap".into())).parse().unwrap_err();
        assert!(matches!(err, Error::InvalidCommandArguments(_)));
        assert_eq!(raw(Value::Null).action(), "");
    }

    #[test]
    fn test_assert_command_parses() {
        let cmd: Command = serde_json::from_str(
            r#"{"action":"assert","selector":{"strategy":"name","value":"Score"},"property":"text","operator":"equals","expected":100}"#,
        )
        .unwrap();
        assert_eq!(cmd.kind().unwrap(), ActionKind::Assert);
        assert_eq!(cmd.selector.as_ref().unwrap().index, 0);
        assert_eq!(cmd.expected_text().as_deref(), Some("100"));
    }

    #[test]
    fn test_empty_selector_is_not_usable() {
        let mut cmd = Command::new("tap");
        cmd.selector = Some(ElementSelector::new(SelectorStrategy::Name, ""));
        assert!(cmd.usable_selector().is_none());
    }

    #[test]
    fn test_wait_condition_parses_and_displays() {
        let condition: WaitCondition = serde_json::from_str(
            r#"{"type":"element_visible","selector":{"strategy":"path","value":"Canvas/Menu","index":1}}"#,
        )
        .unwrap();
        assert_eq!(condition.kind, ConditionKind::ElementVisible);
        assert_eq!(condition.to_string(), "element_visible(path='Canvas/Menu'[1])");
    }

    #[test]
    fn test_step_defaults() {
        let step: TestStep =
            serde_json::from_str(r#"{"id":"s1","command":{"action":"wait"}}"#).unwrap();
        assert_eq!(step.command.action(), "wait");
        assert_eq!(step.on_failure, FailurePolicy::Abort);
        assert_eq!(step.retry_count, 0);
        assert!(step.timeout.is_none());
    }
}
