use crate::types::BoardId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// Edge rejected at creation: missing endpoint, unknown handle, or
    /// incompatible port kinds. Never partially applied.
    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    /// A node was triggered while a previous run is still in flight.
    #[error("Node {0} is already in progress")]
    AlreadyInProgress(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// A board-link node or a `parent_id` points at a board that does not exist.
    #[error("Corrupted board reference: board {board_id} does not exist")]
    CorruptedBoardReference { board_id: BoardId },

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Image codec error: {0}")]
    ImageCodec(String),
}

impl CoreError {
    /// Shorthand for a missing node.
    pub fn node_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "node",
            id: id.into(),
        }
    }

    /// Shorthand for a missing edge.
    pub fn edge_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "edge",
            id: id.to_string(),
        }
    }
}
