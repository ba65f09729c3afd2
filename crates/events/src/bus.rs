//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans [`WorkspaceEvent`]s out to any number of listeners,
//! e.g. a UI shell repainting board-link labels after a rename. Share it
//! via `Arc<EventBus>`.

use atelier_core::hierarchy::HierarchyEvent;
use atelier_core::types::{BoardId, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

pub const BOARD_CREATED: &str = "board.created";
pub const BOARD_RENAMED: &str = "board.renamed";
pub const BOARD_DELETED: &str = "board.deleted";
pub const BOARD_NAVIGATED: &str = "board.navigated";
pub const ASSET_CREATED: &str = "asset.created";
pub const NODE_COMPLETED: &str = "node.completed";
pub const NODE_FAILED: &str = "node.failed";

// ---------------------------------------------------------------------------
// WorkspaceEvent
// ---------------------------------------------------------------------------

/// Something that happened in the workspace.
///
/// Constructed via [`WorkspaceEvent::new`] and enriched with
/// [`with_board`](WorkspaceEvent::with_board),
/// [`with_node`](WorkspaceEvent::with_node), and
/// [`with_payload`](WorkspaceEvent::with_payload).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceEvent {
    /// Dot-separated event name, e.g. `"board.renamed"`.
    pub event_type: String,

    pub board_id: Option<BoardId>,

    pub node_id: Option<NodeId>,

    /// Event-specific data.
    pub payload: serde_json::Value,

    pub timestamp: DateTime<Utc>,
}

impl WorkspaceEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            board_id: None,
            node_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_board(mut self, board_id: BoardId) -> Self {
        self.board_id = Some(board_id);
        self
    }

    pub fn with_node(mut self, node_id: impl Into<NodeId>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

impl From<HierarchyEvent> for WorkspaceEvent {
    fn from(event: HierarchyEvent) -> Self {
        match event {
            HierarchyEvent::BoardCreated {
                board_id,
                parent_id,
            } => WorkspaceEvent::new(BOARD_CREATED)
                .with_board(board_id)
                .with_payload(serde_json::json!({ "parentId": parent_id })),
            HierarchyEvent::BoardRenamed { board_id, name } => WorkspaceEvent::new(BOARD_RENAMED)
                .with_board(board_id)
                .with_payload(serde_json::json!({ "name": name })),
            HierarchyEvent::BoardDeleted { board_id } => {
                WorkspaceEvent::new(BOARD_DELETED).with_board(board_id)
            }
            HierarchyEvent::Navigated { from, to } => WorkspaceEvent::new(BOARD_NAVIGATED)
                .with_board(to)
                .with_payload(serde_json::json!({ "from": from })),
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use atelier_events::bus::{EventBus, WorkspaceEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(WorkspaceEvent::new("board.created"));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<WorkspaceEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed messages are dropped
    /// and slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Dropped silently when nobody is listening.
    pub fn publish(&self, event: WorkspaceEvent) {
        // SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Publish every queued hierarchy change, in order.
    pub fn publish_all<I>(&self, events: I)
    where
        I: IntoIterator<Item = HierarchyEvent>,
    {
        for event in events {
            self.publish(event.into());
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let board = uuid::Uuid::new_v4();

        bus.publish(
            WorkspaceEvent::new(NODE_COMPLETED)
                .with_board(board)
                .with_node("node-7")
                .with_payload(serde_json::json!({"mimeType": "image/png"})),
        );

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.event_type, NODE_COMPLETED);
        assert_eq!(received.board_id, Some(board));
        assert_eq!(received.node_id.as_deref(), Some("node-7"));
        assert_eq!(received.payload["mimeType"], "image/png");
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(WorkspaceEvent::new(BOARD_DELETED));

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");
        assert_eq!(e1.event_type, BOARD_DELETED);
        assert_eq!(e2.event_type, BOARD_DELETED);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(WorkspaceEvent::new("orphan.event"));
    }

    #[tokio::test]
    async fn hierarchy_events_keep_their_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let a = uuid::Uuid::new_v4();
        let b = uuid::Uuid::new_v4();

        bus.publish_all([
            HierarchyEvent::BoardCreated {
                board_id: b,
                parent_id: a,
            },
            HierarchyEvent::BoardRenamed {
                board_id: b,
                name: "Characters".into(),
            },
        ]);

        let created = rx.recv().await.unwrap();
        assert_eq!(created.event_type, BOARD_CREATED);
        assert_eq!(created.payload["parentId"], a.to_string());

        let renamed = rx.recv().await.unwrap();
        assert_eq!(renamed.event_type, BOARD_RENAMED);
        assert_eq!(renamed.board_id, Some(b));
        assert_eq!(renamed.payload["name"], "Characters");
    }
}
