//! Host application integration
//!
//! The agent never touches the application's UI directly. It goes through
//! three capability contracts supplied by the host (element lookup, input
//! synthesis and frame capture) and marshals all UI-touching work onto the
//! host thread through the [`Dispatcher`].

pub mod dispatcher;
pub mod memory;
pub mod tick;

use std::sync::Arc;

use async_trait::async_trait;

use crate::common::Result;
use crate::protocol::ElementSelector;

pub use dispatcher::Dispatcher;
pub use tick::HostLoop;

/// A point in viewport coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Linear interpolation toward `to`; `t` in `[0, 1]`
    pub fn lerp(self, to: Point, t: f64) -> Point {
        Point::new(self.x + (to.x - self.x) * t, self.y + (to.y - self.y) * t)
    }
}

/// Current viewport extents
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Opaque reference to an element owned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub u64);

/// Declared range of a slider-like control
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliderRange {
    pub min: f64,
    pub max: f64,
}

/// Element properties every host understands
///
/// Anything outside this set is looked up through
/// [`ElementDirectory::named_property`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WellKnownProperty {
    Visible,
    Interactable,
    Text,
    Name,
    Tag,
    Path,
    Value,
    X,
    Y,
}

impl WellKnownProperty {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "visible" | "active" => Some(Self::Visible),
            "interactable" | "enabled" => Some(Self::Interactable),
            "text" => Some(Self::Text),
            "name" => Some(Self::Name),
            "tag" => Some(Self::Tag),
            "path" => Some(Self::Path),
            "value" => Some(Self::Value),
            "x" => Some(Self::X),
            "y" => Some(Self::Y),
            _ => None,
        }
    }
}

/// Resolves selectors and exposes element state and affordances
///
/// All methods are called on the host thread.
pub trait ElementDirectory: Send + Sync {
    /// All elements matching the selector, in a stable order (empty if none)
    fn find(&self, selector: &ElementSelector) -> Vec<ElementHandle>;

    /// Whether the handle still refers to a live element
    fn exists(&self, element: ElementHandle) -> bool;

    /// Whether the element is currently shown
    fn is_visible(&self, element: ElementHandle) -> bool;

    /// Read a well-known property as text
    fn property(&self, element: ElementHandle, property: WellKnownProperty) -> Option<String>;

    /// Host-specific property lookup by name
    fn named_property(&self, _element: ElementHandle, _name: &str) -> Option<String> {
        None
    }

    /// Current on-screen position of the element
    fn screen_point(&self, element: ElementHandle) -> Option<Point>;

    /// Current viewport extents
    fn viewport(&self) -> Viewport;

    /// Name of the active scene, if the host has scenes
    fn active_scene(&self) -> Option<String>;

    fn parent(&self, element: ElementHandle) -> Option<ElementHandle>;

    fn children(&self, element: ElementHandle) -> Vec<ElementHandle>;

    /// Human-readable label used in error messages
    fn describe(&self, element: ElementHandle) -> String {
        format!("element #{}", element.0)
    }

    /// Fire the element's own click affordance; false if it has none
    fn activate(&self, element: ElementHandle) -> bool;

    /// Whether the element reacts to drag gestures
    fn has_drag_handler(&self, element: ElementHandle) -> bool;

    /// Whether the element accepts text entry
    fn is_text_input(&self, element: ElementHandle) -> bool;

    /// Replace the content of a text-entry element
    fn set_text(&self, element: ElementHandle, text: &str);

    /// Range of a slider-like control, if the element is one
    fn slider_range(&self, element: ElementHandle) -> Option<SliderRange>;

    fn set_slider_value(&self, element: ElementHandle, value: f64);

    /// Invoke the element's value-changed observers
    fn notify_value_changed(&self, element: ElementHandle);
}

/// Synthesizes low-level pointer input at viewport coordinates
pub trait InputSynthesizer: Send + Sync {
    fn pointer_down(&self, at: Point);
    fn pointer_move(&self, at: Point);
    fn pointer_up(&self, at: Point);
    fn click(&self, at: Point);
    fn begin_drag(&self, target: ElementHandle, at: Point);
    fn drag_move(&self, target: ElementHandle, at: Point);
    fn end_drag(&self, target: ElementHandle, at: Point);
}

/// Captures the rendered frame
#[async_trait]
pub trait FrameCapturer: Send + Sync {
    /// PNG bytes of the frame, taken once the current frame has finished rendering
    async fn capture_png(&self) -> Result<Vec<u8>>;
}

/// The host's capability implementations, shared by the interpreter
#[derive(Clone)]
pub struct HostBindings {
    pub directory: Arc<dyn ElementDirectory>,
    pub input: Arc<dyn InputSynthesizer>,
    pub frames: Arc<dyn FrameCapturer>,
}

impl HostBindings {
    /// Bind a single object that implements all three contracts
    pub fn from_host<H>(host: Arc<H>) -> Self
    where
        H: ElementDirectory + InputSynthesizer + FrameCapturer + 'static,
    {
        Self {
            directory: host.clone(),
            input: host.clone(),
            frames: host,
        }
    }
}
