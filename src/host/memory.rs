//! In-memory host
//!
//! A scene described in YAML, held as a flat element tree. It implements
//! all three host contracts and records every synthesized input so runs
//! can be inspected afterwards. Used by the `run` and `inspect` commands
//! and by tests.
//!
//! ```yaml
//! scene: MainMenu
//! viewport: { width: 1080, height: 1920 }
//! elements:
//!   - name: Canvas
//!     children:
//!       - name: PlayButton
//!         tag: Button
//!         text: Play
//!         components: [Button]
//!         position: { x: 540, y: 900 }
//!         clickable: true
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::{Engine, BASE64_STANDARD};
use parking_lot::RwLock;
use serde::Deserialize;

use super::{
    ElementDirectory, ElementHandle, FrameCapturer, InputSynthesizer, Point, SliderRange,
    Viewport, WellKnownProperty,
};
use crate::common::{Error, Result};
use crate::protocol::{ElementSelector, SelectorStrategy};

/// 1x1 transparent PNG returned by frame capture
const PLACEHOLDER_PNG: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

/// Scene file root
#[derive(Debug, Clone, Deserialize)]
pub struct SceneSpec {
    #[serde(default = "default_scene")]
    pub scene: String,
    #[serde(default)]
    pub viewport: ViewportSpec,
    #[serde(default)]
    pub elements: Vec<ElementSpec>,
}

fn default_scene() -> String {
    "Main".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ViewportSpec {
    pub width: f64,
    pub height: f64,
}

impl Default for ViewportSpec {
    fn default() -> Self {
        Self {
            width: 1080.0,
            height: 1920.0,
        }
    }
}

/// One element of the scene file
#[derive(Debug, Clone, Deserialize)]
pub struct ElementSpec {
    pub name: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub position: Option<PointSpec>,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default = "default_true")]
    pub interactable: bool,
    #[serde(default)]
    pub clickable: bool,
    #[serde(default)]
    pub draggable: bool,
    #[serde(default)]
    pub input: bool,
    #[serde(default)]
    pub slider: Option<SliderSpec>,
    /// Extra host-specific properties
    #[serde(default)]
    pub properties: HashMap<String, String>,
    #[serde(default)]
    pub children: Vec<ElementSpec>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PointSpec {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SliderSpec {
    #[serde(default)]
    pub min: f64,
    #[serde(default = "default_slider_max")]
    pub max: f64,
    #[serde(default)]
    pub value: f64,
}

fn default_slider_max() -> f64 {
    1.0
}

/// Something the host observed during a run
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    PointerDown(Point),
    PointerMove(Point),
    PointerUp(Point),
    Click(Point),
    BeginDrag(ElementHandle, Point),
    DragMove(ElementHandle, Point),
    EndDrag(ElementHandle, Point),
    Activated(ElementHandle),
    ValueChanged(ElementHandle),
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    tag: Option<String>,
    text: Option<String>,
    components: Vec<String>,
    position: Option<Point>,
    visible: bool,
    interactable: bool,
    clickable: bool,
    draggable: bool,
    input: bool,
    slider: Option<SliderSpec>,
    properties: HashMap<String, String>,
    path: String,
    parent: Option<usize>,
    children: Vec<usize>,
    removed: bool,
}

#[derive(Debug, Default)]
struct SceneState {
    scene: String,
    viewport: Option<Viewport>,
    nodes: Vec<Node>,
    events: Vec<HostEvent>,
}

impl SceneState {
    fn node(&self, element: ElementHandle) -> Option<&Node> {
        self.nodes
            .get(usize::try_from(element.0).ok()?)
            .filter(|n| !n.removed)
    }

    fn node_mut(&mut self, element: ElementHandle) -> Option<&mut Node> {
        self.nodes
            .get_mut(usize::try_from(element.0).ok()?)
            .filter(|n| !n.removed)
    }

    /// Visible only if every ancestor is visible too
    fn visible_in_hierarchy(&self, index: usize) -> bool {
        let mut current = Some(index);
        while let Some(i) = current {
            match self.nodes.get(i) {
                Some(node) if node.visible && !node.removed => current = node.parent,
                _ => return false,
            }
        }
        true
    }

    fn insert(&mut self, spec: &ElementSpec, parent: Option<usize>) -> usize {
        let path = match parent.and_then(|p| self.nodes.get(p)) {
            Some(p) => format!("{}/{}", p.path, spec.name),
            None => spec.name.clone(),
        };
        let index = self.nodes.len();
        self.nodes.push(Node {
            name: spec.name.clone(),
            tag: spec.tag.clone(),
            text: spec.text.clone(),
            components: spec.components.clone(),
            position: spec.position.map(|p| Point::new(p.x, p.y)),
            visible: spec.visible,
            interactable: spec.interactable,
            clickable: spec.clickable,
            draggable: spec.draggable,
            input: spec.input,
            slider: spec.slider,
            properties: spec.properties.clone(),
            path,
            parent,
            children: Vec::new(),
            removed: false,
        });
        if let Some(p) = parent.and_then(|p| self.nodes.get_mut(p)) {
            p.children.push(index);
        }
        for child in &spec.children {
            self.insert(child, Some(index));
        }
        index
    }
}

fn handle(index: usize) -> ElementHandle {
    ElementHandle(index as u64)
}

/// YAML-backed host used outside a real application
pub struct MemoryHost {
    state: RwLock<SceneState>,
    frame_interval: Duration,
}

impl MemoryHost {
    pub fn new(spec: &SceneSpec) -> Self {
        let host = Self {
            state: RwLock::new(SceneState::default()),
            frame_interval: Duration::from_millis(16),
        };
        host.load(spec);
        host
    }

    /// Parse a scene from YAML text
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let spec: SceneSpec = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("Invalid scene file: {}", e)))?;
        Ok(Self::new(&spec))
    }

    /// Load a scene file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_yaml(&content)
    }

    /// Replace the whole scene, as a scene load would
    pub fn load(&self, spec: &SceneSpec) {
        let mut state = self.state.write();
        state.scene = spec.scene.clone();
        state.viewport = Some(Viewport::new(spec.viewport.width, spec.viewport.height));
        state.nodes.clear();
        for element in &spec.elements {
            state.insert(element, None);
        }
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// First live element with this name
    pub fn element(&self, name: &str) -> Option<ElementHandle> {
        let state = self.state.read();
        state
            .nodes
            .iter()
            .position(|n| !n.removed && n.name == name)
            .map(handle)
    }

    pub fn set_visible(&self, element: ElementHandle, visible: bool) {
        if let Some(node) = self.state.write().node_mut(element) {
            node.visible = visible;
        }
    }

    pub fn set_text_content(&self, element: ElementHandle, text: &str) {
        if let Some(node) = self.state.write().node_mut(element) {
            node.text = Some(text.to_string());
        }
    }

    /// Remove an element and its subtree
    pub fn remove(&self, element: ElementHandle) {
        let mut state = self.state.write();
        let mut stack = vec![element];
        while let Some(current) = stack.pop() {
            if let Some(node) = state.node_mut(current) {
                node.removed = true;
                stack.extend(node.children.iter().copied().map(handle));
            }
        }
    }

    pub fn set_scene_name(&self, scene: &str) {
        self.state.write().scene = scene.to_string();
    }

    /// Everything recorded so far
    pub fn events(&self) -> Vec<HostEvent> {
        self.state.read().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.write().events.clear();
    }

    fn record(&self, event: HostEvent) {
        tracing::trace!(?event, "Host event");
        self.state.write().events.push(event);
    }

    fn matches(node: &Node, selector: &ElementSelector) -> bool {
        match selector.strategy {
            SelectorStrategy::Name => node.name == selector.value,
            SelectorStrategy::Tag => node.tag.as_deref() == Some(selector.value.as_str()),
            SelectorStrategy::Path => {
                node.path == selector.value || node.path.ends_with(&format!("/{}", selector.value))
            }
            SelectorStrategy::Text => node.text.as_deref() == Some(selector.value.as_str()),
            SelectorStrategy::Component => node.components.iter().any(|c| *c == selector.value),
        }
    }
}

impl ElementDirectory for MemoryHost {
    fn find(&self, selector: &ElementSelector) -> Vec<ElementHandle> {
        let state = self.state.read();
        state
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.removed && Self::matches(n, selector))
            .map(|(i, _)| handle(i))
            .collect()
    }

    fn exists(&self, element: ElementHandle) -> bool {
        self.state.read().node(element).is_some()
    }

    fn is_visible(&self, element: ElementHandle) -> bool {
        let state = self.state.read();
        usize::try_from(element.0)
            .map(|i| state.visible_in_hierarchy(i))
            .unwrap_or(false)
    }

    fn property(&self, element: ElementHandle, property: WellKnownProperty) -> Option<String> {
        let visible = self.is_visible(element);
        let state = self.state.read();
        let node = state.node(element)?;
        match property {
            WellKnownProperty::Visible => Some(visible.to_string()),
            WellKnownProperty::Interactable => Some(node.interactable.to_string()),
            WellKnownProperty::Text => node.text.clone(),
            WellKnownProperty::Name => Some(node.name.clone()),
            WellKnownProperty::Tag => node.tag.clone(),
            WellKnownProperty::Path => Some(node.path.clone()),
            WellKnownProperty::Value => match node.slider {
                Some(slider) => Some(slider.value.to_string()),
                None => node.text.clone(),
            },
            WellKnownProperty::X => node.position.map(|p| p.x.to_string()),
            WellKnownProperty::Y => node.position.map(|p| p.y.to_string()),
        }
    }

    fn named_property(&self, element: ElementHandle, name: &str) -> Option<String> {
        self.state.read().node(element)?.properties.get(name).cloned()
    }

    fn screen_point(&self, element: ElementHandle) -> Option<Point> {
        self.state.read().node(element)?.position
    }

    fn viewport(&self) -> Viewport {
        self.state
            .read()
            .viewport
            .unwrap_or(Viewport::new(1080.0, 1920.0))
    }

    fn active_scene(&self) -> Option<String> {
        Some(self.state.read().scene.clone())
    }

    fn parent(&self, element: ElementHandle) -> Option<ElementHandle> {
        self.state.read().node(element)?.parent.map(handle)
    }

    fn children(&self, element: ElementHandle) -> Vec<ElementHandle> {
        let state = self.state.read();
        state
            .node(element)
            .map(|n| {
                n.children
                    .iter()
                    .copied()
                    .filter(|c| state.nodes.get(*c).is_some_and(|n| !n.removed))
                    .map(handle)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn describe(&self, element: ElementHandle) -> String {
        match self.state.read().node(element) {
            Some(node) => format!("'{}'", node.path),
            None => format!("element #{}", element.0),
        }
    }

    fn activate(&self, element: ElementHandle) -> bool {
        let clickable = self
            .state
            .read()
            .node(element)
            .is_some_and(|n| n.clickable && n.interactable);
        if clickable {
            self.record(HostEvent::Activated(element));
        }
        clickable
    }

    fn has_drag_handler(&self, element: ElementHandle) -> bool {
        self.state.read().node(element).is_some_and(|n| n.draggable)
    }

    fn is_text_input(&self, element: ElementHandle) -> bool {
        self.state.read().node(element).is_some_and(|n| n.input)
    }

    fn set_text(&self, element: ElementHandle, text: &str) {
        self.set_text_content(element, text);
    }

    fn slider_range(&self, element: ElementHandle) -> Option<SliderRange> {
        let slider = self.state.read().node(element)?.slider?;
        Some(SliderRange {
            min: slider.min,
            max: slider.max,
        })
    }

    fn set_slider_value(&self, element: ElementHandle, value: f64) {
        if let Some(slider) = self
            .state
            .write()
            .node_mut(element)
            .and_then(|n| n.slider.as_mut())
        {
            slider.value = value;
        }
    }

    fn notify_value_changed(&self, element: ElementHandle) {
        self.record(HostEvent::ValueChanged(element));
    }
}

impl InputSynthesizer for MemoryHost {
    fn pointer_down(&self, at: Point) {
        self.record(HostEvent::PointerDown(at));
    }

    fn pointer_move(&self, at: Point) {
        self.record(HostEvent::PointerMove(at));
    }

    fn pointer_up(&self, at: Point) {
        self.record(HostEvent::PointerUp(at));
    }

    fn click(&self, at: Point) {
        self.record(HostEvent::Click(at));
    }

    fn begin_drag(&self, target: ElementHandle, at: Point) {
        self.record(HostEvent::BeginDrag(target, at));
    }

    fn drag_move(&self, target: ElementHandle, at: Point) {
        self.record(HostEvent::DragMove(target, at));
    }

    fn end_drag(&self, target: ElementHandle, at: Point) {
        self.record(HostEvent::EndDrag(target, at));
        if let Some(node) = self.state.write().node_mut(target) {
            node.position = Some(at);
        }
    }
}

#[async_trait]
impl FrameCapturer for MemoryHost {
    async fn capture_png(&self) -> Result<Vec<u8>> {
        // Wait out the frame in flight.
        tokio::time::sleep(self.frame_interval).await;
        BASE64_STANDARD
            .decode(PLACEHOLDER_PNG)
            .map_err(|e| Error::Capture(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENE: &str = r#"
scene: MainMenu
viewport: { width: 1000, height: 2000 }
elements:
  - name: Canvas
    children:
      - name: Menu
        children:
          - name: PlayButton
            tag: Button
            text: Play
            components: [Button, Image]
            position: { x: 500, y: 900 }
            clickable: true
          - name: Label
            text: Play
      - name: Volume
        slider: { min: 0, max: 10, value: 5 }
        properties: { unit: dB }
"#;

    fn host() -> MemoryHost {
        MemoryHost::from_yaml(SCENE).unwrap()
    }

    fn find(host: &MemoryHost, strategy: SelectorStrategy, value: &str) -> Vec<ElementHandle> {
        host.find(&ElementSelector::new(strategy, value))
    }

    #[test]
    fn test_find_by_each_strategy() {
        let host = host();
        let button = host.element("PlayButton").unwrap();

        assert_eq!(find(&host, SelectorStrategy::Name, "PlayButton"), vec![button]);
        assert_eq!(find(&host, SelectorStrategy::Tag, "Button"), vec![button]);
        assert_eq!(find(&host, SelectorStrategy::Path, "Canvas/Menu/PlayButton"), vec![button]);
        assert_eq!(find(&host, SelectorStrategy::Path, "Menu/PlayButton"), vec![button]);
        assert_eq!(find(&host, SelectorStrategy::Component, "Image"), vec![button]);
        assert_eq!(find(&host, SelectorStrategy::Text, "Play").len(), 2);
        assert!(find(&host, SelectorStrategy::Name, "Missing").is_empty());
    }

    #[test]
    fn test_visibility_follows_ancestors() {
        let host = host();
        let menu = host.element("Menu").unwrap();
        let button = host.element("PlayButton").unwrap();

        assert!(host.is_visible(button));
        host.set_visible(menu, false);
        assert!(!host.is_visible(button));
        assert_eq!(
            host.property(button, WellKnownProperty::Visible).as_deref(),
            Some("false")
        );
    }

    #[test]
    fn test_removed_elements_disappear() {
        let host = host();
        let menu = host.element("Menu").unwrap();
        let button = host.element("PlayButton").unwrap();

        host.remove(menu);
        assert!(!host.exists(button));
        assert!(find(&host, SelectorStrategy::Name, "PlayButton").is_empty());
    }

    #[test]
    fn test_properties() {
        let host = host();
        let volume = host.element("Volume").unwrap();

        assert_eq!(host.property(volume, WellKnownProperty::Value).as_deref(), Some("5"));
        assert_eq!(host.named_property(volume, "unit").as_deref(), Some("dB"));
        assert_eq!(
            host.slider_range(volume),
            Some(SliderRange { min: 0.0, max: 10.0 })
        );
        assert_eq!(
            host.property(volume, WellKnownProperty::Path).as_deref(),
            Some("Canvas/Volume")
        );
    }

    #[test]
    fn test_activate_only_clickable() {
        let host = host();
        let button = host.element("PlayButton").unwrap();
        let label = host.element("Label").unwrap();

        assert!(!host.activate(label));
        assert!(host.activate(button));
        assert_eq!(host.events(), vec![HostEvent::Activated(button)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_returns_png() {
        let png = host().capture_png().await.unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }
}
