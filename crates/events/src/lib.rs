//! Atelier event bus, workspace file store, and asset fan-out.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`WorkspaceEvent`]: the event envelope published on the bus.
//! - [`JsonFileStore`]: [`WorkspaceStore`](atelier_core::persistence::WorkspaceStore)
//!   that keeps the document in a single JSON file.
//! - [`RecentAssets`]: asset sink that remembers the latest generations and
//!   announces them on the bus.

pub mod assets;
pub mod bus;
pub mod store;

pub use assets::RecentAssets;
pub use bus::{EventBus, WorkspaceEvent};
pub use store::{JsonFileStore, StoreError};
