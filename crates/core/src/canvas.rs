//! Board canvas constants, handle catalogue, and connection validation.
//!
//! Defines node kinds, port kinds, per-kind handle declarations, canvas
//! defaults, and the compatibility rule applied when an edge is created.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Node kinds
// ---------------------------------------------------------------------------

/// Discriminant of [`NodeData`](crate::node::NodeData).
///
/// Drag-and-drop insertion requests carry only a kind and a position; the
/// payload is created from [`NodeData::default_for`](crate::node::NodeData::default_for).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Generator,
    PromptBuilder,
    Reference,
    PostProcess,
    Image,
    Note,
    Text,
    BoardLink,
    Shape,
    Checklist,
    LinkCard,
}

impl NodeKind {
    /// All node kinds, in palette order.
    pub const ALL: &'static [NodeKind] = &[
        NodeKind::Generator,
        NodeKind::PromptBuilder,
        NodeKind::Reference,
        NodeKind::PostProcess,
        NodeKind::Image,
        NodeKind::Note,
        NodeKind::Text,
        NodeKind::BoardLink,
        NodeKind::Shape,
        NodeKind::Checklist,
        NodeKind::LinkCard,
    ];

    /// Stable string name, matching the serialized tag.
    pub fn name(self) -> &'static str {
        match self {
            Self::Generator => "generator",
            Self::PromptBuilder => "prompt-builder",
            Self::Reference => "reference",
            Self::PostProcess => "post-process",
            Self::Image => "image",
            Self::Note => "note",
            Self::Text => "text",
            Self::BoardLink => "board-link",
            Self::Shape => "shape",
            Self::Checklist => "checklist",
            Self::LinkCard => "link-card",
        }
    }

    /// Handles exposed by this kind of node.
    pub fn handles(self) -> &'static [HandleSpec] {
        match self {
            Self::Generator => GENERATOR_HANDLES,
            Self::PromptBuilder => PROMPT_BUILDER_HANDLES,
            Self::Reference => REFERENCE_HANDLES,
            Self::PostProcess => POST_PROCESS_HANDLES,
            Self::Image => IMAGE_HANDLES,
            Self::Text => TEXT_HANDLES,
            Self::Note | Self::BoardLink | Self::Shape | Self::Checklist | Self::LinkCard => &[],
        }
    }

    /// Look up a handle by id and direction.
    pub fn handle(self, id: &str, direction: HandleDirection) -> Option<&'static HandleSpec> {
        self.handles()
            .iter()
            .find(|h| h.id == id && h.direction == direction)
    }

    /// Default on-canvas size for freshly inserted nodes of this kind.
    pub fn default_size(self) -> (f64, f64) {
        match self {
            Self::Generator => (320.0, 360.0),
            Self::PromptBuilder => (280.0, 320.0),
            Self::Reference => (240.0, 280.0),
            Self::PostProcess => (260.0, 300.0),
            Self::Image => (260.0, 260.0),
            Self::Note | Self::Text => (DEFAULT_NODE_WIDTH, DEFAULT_NODE_HEIGHT),
            Self::BoardLink => (180.0, 140.0),
            Self::Shape => (160.0, 160.0),
            Self::Checklist => (240.0, 200.0),
            Self::LinkCard => (280.0, 120.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Ports and handles
// ---------------------------------------------------------------------------

/// Kind of value that flows through a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    Text,
    Image,
    Reference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleDirection {
    Input,
    Output,
}

/// A named port on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleSpec {
    pub id: &'static str,
    pub direction: HandleDirection,
    pub kind: PortKind,
}

/// Handle ids shared across node kinds.
pub mod handles {
    pub const PROMPT: &str = "prompt";
    pub const TEXT: &str = "text";
    pub const IMAGE: &str = "image";
    pub const REFERENCE: &str = "reference";
    pub const CHARACTER: &str = "character";
    pub const POSE: &str = "pose";
    pub const STYLE: &str = "style";

    /// Generator inputs that accept reference images, in prompt order.
    pub const GENERATOR_REFERENCE_INPUTS: &[&str] = &[CHARACTER, POSE, STYLE, REFERENCE];
}

const fn input(id: &'static str, kind: PortKind) -> HandleSpec {
    HandleSpec {
        id,
        direction: HandleDirection::Input,
        kind,
    }
}

const fn output(id: &'static str, kind: PortKind) -> HandleSpec {
    HandleSpec {
        id,
        direction: HandleDirection::Output,
        kind,
    }
}

const GENERATOR_HANDLES: &[HandleSpec] = &[
    input(handles::PROMPT, PortKind::Text),
    input(handles::CHARACTER, PortKind::Reference),
    input(handles::POSE, PortKind::Reference),
    input(handles::STYLE, PortKind::Reference),
    input(handles::REFERENCE, PortKind::Reference),
    output(handles::IMAGE, PortKind::Image),
];

const PROMPT_BUILDER_HANDLES: &[HandleSpec] = &[output(handles::PROMPT, PortKind::Text)];

const REFERENCE_HANDLES: &[HandleSpec] = &[
    input(handles::IMAGE, PortKind::Image),
    output(handles::REFERENCE, PortKind::Reference),
];

const POST_PROCESS_HANDLES: &[HandleSpec] = &[
    input(handles::IMAGE, PortKind::Image),
    output(handles::IMAGE, PortKind::Image),
];

const IMAGE_HANDLES: &[HandleSpec] = &[output(handles::IMAGE, PortKind::Image)];

const TEXT_HANDLES: &[HandleSpec] = &[output(handles::TEXT, PortKind::Text)];

// ---------------------------------------------------------------------------
// Canvas defaults
// ---------------------------------------------------------------------------

/// Default node width in canvas units.
pub const DEFAULT_NODE_WIDTH: f64 = 200.0;

/// Default node height in canvas units.
pub const DEFAULT_NODE_HEIGHT: f64 = 100.0;

/// Spacing between auto-placed nodes.
pub const NODE_SPACING: f64 = 50.0;

/// Maximum number of nodes allowed on a single board.
pub const MAX_NODES_PER_BOARD: usize = 500;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check whether an output port may feed an input port.
///
/// Identical kinds always connect. Images and references coerce into each
/// other (a plain image is a reference at full strength, a reference exposes
/// its image). Text never coerces.
pub fn ports_compatible(output: PortKind, input: PortKind) -> bool {
    if output == input {
        return true;
    }
    matches!(
        (output, input),
        (PortKind::Image, PortKind::Reference) | (PortKind::Reference, PortKind::Image)
    )
}

/// Validate that a node count does not exceed the board limit.
pub fn validate_node_count(count: usize) -> Result<(), CoreError> {
    if count > MAX_NODES_PER_BOARD {
        Err(CoreError::Validation(format!(
            "Board has {count} nodes, exceeding the maximum of {MAX_NODES_PER_BOARD}"
        )))
    } else {
        Ok(())
    }
}

/// Grid position for the `index`-th auto-placed node.
pub fn auto_position(index: usize) -> (f64, f64) {
    const COLUMNS: usize = 4;
    let col = (index % COLUMNS) as f64;
    let row = (index / COLUMNS) as f64;
    (
        NODE_SPACING + col * (DEFAULT_NODE_WIDTH + NODE_SPACING),
        NODE_SPACING + row * (DEFAULT_NODE_HEIGHT * 2.0 + NODE_SPACING),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
