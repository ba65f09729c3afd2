//! Core domain logic for the atelier whiteboard engine.
//!
//! Everything here is synchronous and free of I/O: the node graph of a
//! board, its undo history, the board hierarchy, prompt composition, and
//! the pixel-level matting passes. Async orchestration lives in
//! `atelier-pipeline`; storage and event fan-out live in `atelier-events`.

pub mod assets;
pub mod board;
pub mod canvas;
pub mod error;
pub mod graph;
pub mod history;
pub mod hierarchy;
pub mod matte;
pub mod node;
pub mod persistence;
pub mod prompt;
pub mod types;

pub use error::CoreError;
pub use graph::{GraphSnapshot, GraphStore};
pub use hierarchy::{BoardHierarchy, HierarchyEvent};
