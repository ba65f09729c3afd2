/// Node ids are allocated by [`GraphStore`](crate::graph::GraphStore) and are
/// unique within a session.
pub type NodeId = String;

/// Boards are keyed by random UUIDs.
pub type BoardId = uuid::Uuid;

/// Edges are keyed by random UUIDs.
pub type EdgeId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
