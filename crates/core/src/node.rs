//! Node and edge records with their per-kind payloads.
//!
//! [`NodeData`] is a closed union: every node kind has exactly one payload
//! variant, and the handle catalogue in [`crate::canvas`] is keyed by the
//! same discriminant.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::canvas::{handles, NodeKind};
use crate::prompt::{compose_prompt, GenerationOptions, PromptSelection};
use crate::types::{BoardId, EdgeId, NodeId};

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub w: f64,
    pub h: f64,
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// An image held by a node.
///
/// Raw bytes stay in memory only; the persisted document keeps the asset id
/// and an optional URL so that large payloads never reach the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<uuid::Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub mime_type: String,
    #[serde(skip)]
    pub bytes: Option<Arc<[u8]>>,
}

impl ImageRef {
    /// In-memory image from raw bytes.
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>, mime_type: impl Into<String>) -> Self {
        Self {
            asset_id: None,
            url: None,
            mime_type: mime_type.into(),
            bytes: Some(bytes.into()),
        }
    }

    /// Reload bytes dropped by persistence, keeping the asset id and URL.
    pub fn reload(&mut self, bytes: impl Into<Arc<[u8]>>, mime_type: impl Into<String>) {
        self.bytes = Some(bytes.into());
        self.mime_type = mime_type.into();
    }

    /// Attach the asset-library id this image was published under.
    pub fn with_asset_id(mut self, asset_id: uuid::Uuid) -> Self {
        self.asset_id = Some(asset_id);
        self
    }
}

/// Value published by a reference node.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceValue {
    pub image: ImageRef,
    /// Influence of the reference, in `[0, 1]`.
    pub strength: f32,
    pub qualifiers: Vec<String>,
}

impl ReferenceValue {
    /// A bare image used as a reference at full strength.
    pub fn from_image(image: ImageRef) -> Self {
        Self {
            image,
            strength: 1.0,
            qualifiers: Vec::new(),
        }
    }
}

/// A value flowing out of an output handle.
#[derive(Debug, Clone, PartialEq)]
pub enum PortValue {
    Text(String),
    Image(ImageRef),
    Reference(ReferenceValue),
}

impl PortValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The image carried by this value, coercing references.
    pub fn into_image(self) -> Option<ImageRef> {
        match self {
            Self::Image(image) => Some(image),
            Self::Reference(reference) => Some(reference.image),
            Self::Text(_) => None,
        }
    }

    /// The reference carried by this value, promoting bare images.
    pub fn into_reference(self) -> Option<ReferenceValue> {
        match self {
            Self::Reference(reference) => Some(reference),
            Self::Image(image) => Some(ReferenceValue::from_image(image)),
            Self::Text(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorData {
    /// Free text appended after connected prompt fragments.
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub options: GenerationOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    /// Node-local error from the last failed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub in_progress: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptBuilderData {
    #[serde(default)]
    pub free_text: String,
    #[serde(default)]
    pub selections: Vec<PromptSelection>,
}

impl PromptBuilderData {
    /// Select an option, replacing any prior selection of the same pair.
    pub fn select(&mut self, category: &str, option: &str, fragment: &str) {
        self.deselect(category, option);
        self.selections.push(PromptSelection {
            category: category.to_string(),
            option: option.to_string(),
            fragment: fragment.to_string(),
        });
    }

    pub fn deselect(&mut self, category: &str, option: &str) {
        self.selections
            .retain(|s| !(s.category == category && s.option == option));
    }

    pub fn is_selected(&self, category: &str, option: &str) -> bool {
        self.selections
            .iter()
            .any(|s| s.category == category && s.option == option)
    }

    /// The string this node publishes on its `prompt` output.
    pub fn composed(&self) -> String {
        compose_prompt(&self.free_text, &self.selections)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceData {
    /// Uploaded image; overrides any connected image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    pub strength: f32,
    #[serde(default)]
    pub qualifiers: Vec<String>,
}

impl Default for ReferenceData {
    fn default() -> Self {
        Self {
            image: None,
            strength: 1.0,
            qualifiers: Vec::new(),
        }
    }
}

impl ReferenceData {
    pub fn set_strength(&mut self, strength: f32) {
        self.strength = if strength.is_nan() {
            0.0
        } else {
            strength.clamp(0.0, 1.0)
        };
    }

    pub fn toggle_qualifier(&mut self, qualifier: &str) {
        if let Some(pos) = self.qualifiers.iter().position(|q| q == qualifier) {
            self.qualifiers.remove(pos);
        } else {
            self.qualifiers.push(qualifier.to_string());
        }
    }
}

/// Which matting path produced a post-process result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MattingMode {
    /// Local threshold pass, no network.
    Threshold,
    /// White/black generation round-trip followed by difference matting.
    Difference,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostProcessData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<MattingMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub in_progress: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,
    #[serde(default)]
    pub caption: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteData {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextData {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardLinkData {
    pub board_id: BoardId,
    /// Cached display name of the linked board.
    pub name: String,
    /// Cached node count of the linked board.
    #[serde(default)]
    pub item_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    #[default]
    Rectangle,
    Ellipse,
    Diamond,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeData {
    pub shape: ShapeKind,
    pub color: String,
}

impl Default for ShapeData {
    fn default() -> Self {
        Self {
            shape: ShapeKind::Rectangle,
            color: "#e5e7eb".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub text: String,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistData {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub items: Vec<ChecklistItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkCardData {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Kind-specific node payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum NodeData {
    Generator(GeneratorData),
    PromptBuilder(PromptBuilderData),
    Reference(ReferenceData),
    PostProcess(PostProcessData),
    Image(ImageData),
    Note(NoteData),
    Text(TextData),
    BoardLink(BoardLinkData),
    Shape(ShapeData),
    Checklist(ChecklistData),
    LinkCard(LinkCardData),
}

impl NodeData {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Generator(_) => NodeKind::Generator,
            Self::PromptBuilder(_) => NodeKind::PromptBuilder,
            Self::Reference(_) => NodeKind::Reference,
            Self::PostProcess(_) => NodeKind::PostProcess,
            Self::Image(_) => NodeKind::Image,
            Self::Note(_) => NodeKind::Note,
            Self::Text(_) => NodeKind::Text,
            Self::BoardLink(_) => NodeKind::BoardLink,
            Self::Shape(_) => NodeKind::Shape,
            Self::Checklist(_) => NodeKind::Checklist,
            Self::LinkCard(_) => NodeKind::LinkCard,
        }
    }

    /// Fresh payload for a drag-and-drop insertion.
    ///
    /// Board links cannot be created this way; they are inserted by
    /// [`BoardHierarchy`](crate::hierarchy::BoardHierarchy) so that the
    /// target board exists.
    pub fn default_for(kind: NodeKind) -> Option<Self> {
        Some(match kind {
            NodeKind::Generator => Self::Generator(GeneratorData::default()),
            NodeKind::PromptBuilder => Self::PromptBuilder(PromptBuilderData::default()),
            NodeKind::Reference => Self::Reference(ReferenceData::default()),
            NodeKind::PostProcess => Self::PostProcess(PostProcessData::default()),
            NodeKind::Image => Self::Image(ImageData::default()),
            NodeKind::Note => Self::Note(NoteData::default()),
            NodeKind::Text => Self::Text(TextData::default()),
            NodeKind::BoardLink => return None,
            NodeKind::Shape => Self::Shape(ShapeData::default()),
            NodeKind::Checklist => Self::Checklist(ChecklistData::default()),
            NodeKind::LinkCard => Self::LinkCard(LinkCardData::default()),
        })
    }

    /// Value published on `handle` from this node's own data only.
    ///
    /// Values that depend on the node's own inputs (a reference node with a
    /// connected but not uploaded image) are resolved by the runtime.
    pub fn output(&self, handle: &str) -> Option<PortValue> {
        match (self, handle) {
            (Self::PromptBuilder(data), handles::PROMPT) => Some(PortValue::Text(data.composed())),
            (Self::Text(data), handles::TEXT) => Some(PortValue::Text(data.content.clone())),
            (Self::Reference(data), handles::REFERENCE) => {
                data.image.clone().map(|image| {
                    PortValue::Reference(ReferenceValue {
                        image,
                        strength: data.strength,
                        qualifiers: data.qualifiers.clone(),
                    })
                })
            }
            (Self::Image(data), handles::IMAGE) => data.image.clone().map(PortValue::Image),
            (Self::Generator(data), handles::IMAGE) => data.image.clone().map(PortValue::Image),
            (Self::PostProcess(data), handles::IMAGE) => data.image.clone().map(PortValue::Image),
            _ => None,
        }
    }

    /// The image a node holds, for kinds that hold one.
    pub fn image_slot_mut(&mut self) -> Option<&mut Option<ImageRef>> {
        match self {
            Self::Image(data) => Some(&mut data.image),
            Self::Reference(data) => Some(&mut data.image),
            Self::Generator(data) => Some(&mut data.image),
            Self::PostProcess(data) => Some(&mut data.image),
            _ => None,
        }
    }

    /// Target board when this node is a board link.
    pub fn linked_board(&self) -> Option<BoardId> {
        match self {
            Self::BoardLink(link) => Some(link.board_id),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub position: Position,
    pub size: Size,
    pub data: NodeData,
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        self.data.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub source_handle: String,
    pub target: NodeId,
    pub target_handle: String,
}

impl Edge {
    pub fn touches(&self, node_id: &str) -> bool {
        self.source == node_id || self.target == node_id
    }
}

/// Connection request; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEdge {
    pub source: NodeId,
    pub source_handle: String,
    pub target: NodeId,
    pub target_handle: String,
}

impl NewEdge {
    pub fn new(
        source: impl Into<NodeId>,
        source_handle: &str,
        target: impl Into<NodeId>,
        target_handle: &str,
    ) -> Self {
        Self {
            source: source.into(),
            source_handle: source_handle.to_string(),
            target: target.into(),
            target_handle: target_handle.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reloading_keeps_asset_identity() {
        let asset_id = uuid::Uuid::new_v4();
        let mut data = NodeData::Image(ImageData {
            image: Some(ImageRef {
                asset_id: Some(asset_id),
                mime_type: "image/png".into(),
                ..Default::default()
            }),
            caption: String::new(),
        });

        let slot = data.image_slot_mut().unwrap();
        slot.as_mut().unwrap().reload(vec![1u8, 2, 3], "image/jpeg");

        let image = data.output(handles::IMAGE).and_then(PortValue::into_image).unwrap();
        assert_eq!(image.asset_id, Some(asset_id));
        assert_eq!(image.mime_type, "image/jpeg");
        assert_eq!(image.bytes.as_deref(), Some(&[1u8, 2, 3][..]));
        assert!(NodeData::Note(NoteData::default()).image_slot_mut().is_none());
    }

    #[test]
    fn prompt_builder_selection_toggles() {
        let mut data = PromptBuilderData::default();
        data.select("lighting", "soft", "soft light");
        data.select("lighting", "soft", "soft diffuse light");
        assert_eq!(data.selections.len(), 1);
        assert_eq!(data.composed(), "soft diffuse light");

        data.deselect("lighting", "soft");
        assert!(!data.is_selected("lighting", "soft"));
        assert_eq!(data.composed(), "");
    }

    #[test]
    fn reference_strength_is_clamped() {
        let mut data = ReferenceData::default();
        data.set_strength(1.7);
        assert_eq!(data.strength, 1.0);
        data.set_strength(-0.5);
        assert_eq!(data.strength, 0.0);
        data.set_strength(f32::NAN);
        assert_eq!(data.strength, 0.0);
    }

    #[test]
    fn reference_without_image_publishes_nothing() {
        let data = NodeData::Reference(ReferenceData::default());
        assert!(data.output(handles::REFERENCE).is_none());
    }

    #[test]
    fn output_on_unknown_handle_is_none() {
        let data = NodeData::Text(TextData {
            content: "hello".into(),
        });
        assert_eq!(data.output("text"), Some(PortValue::Text("hello".into())));
        assert!(data.output("image").is_none());
    }

    #[test]
    fn board_links_have_no_default_payload() {
        assert!(NodeData::default_for(NodeKind::BoardLink).is_none());
        for kind in NodeKind::ALL.iter().filter(|k| **k != NodeKind::BoardLink) {
            assert_eq!(NodeData::default_for(*kind).unwrap().kind(), *kind);
        }
    }

    #[test]
    fn image_bytes_are_not_serialized() {
        let data = NodeData::Image(ImageData {
            image: Some(ImageRef::from_bytes(vec![1u8, 2, 3], "image/png")),
            caption: String::new(),
        });
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["type"], "image");
        assert!(json["payload"]["image"].get("bytes").is_none());

        let back: NodeData = serde_json::from_value(json).unwrap();
        match back {
            NodeData::Image(img) => assert!(img.image.unwrap().bytes.is_none()),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn in_progress_flag_is_transient() {
        let data = NodeData::Generator(GeneratorData {
            in_progress: true,
            ..Default::default()
        });
        let back: NodeData = serde_json::from_value(serde_json::to_value(&data).unwrap()).unwrap();
        match back {
            NodeData::Generator(g) => assert!(!g.in_progress),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn port_value_coercions() {
        let image = ImageRef::from_bytes(vec![0u8], "image/png");
        let reference = PortValue::Image(image.clone()).into_reference().unwrap();
        assert_eq!(reference.strength, 1.0);
        assert_eq!(PortValue::Reference(reference).into_image(), Some(image));
        assert!(PortValue::Text("x".into()).into_image().is_none());
    }
}
