//! Board records and the persisted workspace document.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::node::{Edge, Node};
use crate::types::{BoardId, Timestamp};

/// Name given to the root board of a new workspace.
pub const ROOT_BOARD_NAME: &str = "Home";

/// Maximum length of a board name in characters.
pub const MAX_BOARD_NAME_LENGTH: usize = 120;

/// A named canvas. Boards nest through `parent_id` and board-link nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: BoardId,
    pub name: String,
    pub parent_id: Option<BoardId>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Board {
    pub fn new(name: impl Into<String>, parent_id: Option<BoardId>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4(),
            name: name.into(),
            parent_id,
            nodes: Vec::new(),
            edges: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Top-level persisted aggregate: every board plus the open one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDocument {
    pub boards: BTreeMap<BoardId, Board>,
    pub current_board_id: BoardId,
}

impl Default for WorkspaceDocument {
    fn default() -> Self {
        let root = Board::new(ROOT_BOARD_NAME, None);
        let current_board_id = root.id;
        Self {
            boards: BTreeMap::from([(root.id, root)]),
            current_board_id,
        }
    }
}

impl WorkspaceDocument {
    /// The oldest parentless board.
    pub fn root_id(&self) -> Option<BoardId> {
        self.boards
            .values()
            .filter(|b| b.is_root())
            .min_by_key(|b| b.created_at)
            .map(|b| b.id)
    }

    /// Repair structural damage in a loaded document.
    ///
    /// - a missing root is recreated;
    /// - extra roots, dangling `parent_id`s and parent cycles are re-parented
    ///   under the root;
    /// - a dangling `current_board_id` falls back to the root;
    /// - edges whose endpoints are missing are pruned.
    ///
    /// Returns the number of repairs made.
    pub fn sanitize(&mut self) -> usize {
        let mut repairs = 0;

        let root_id = match self.root_id() {
            Some(id) => id,
            None => {
                let root = Board::new(ROOT_BOARD_NAME, None);
                let id = root.id;
                tracing::warn!(board_id = %id, "Workspace had no root board, created one");
                self.boards.insert(id, root);
                repairs += 1;
                id
            }
        };

        let ids: Vec<BoardId> = self.boards.keys().copied().collect();
        for id in ids {
            if id == root_id {
                continue;
            }
            if self.parent_chain_is_broken(id, root_id) {
                tracing::warn!(board_id = %id, "Re-parenting board with a broken parent chain");
                if let Some(board) = self.boards.get_mut(&id) {
                    board.parent_id = Some(root_id);
                }
                repairs += 1;
            }
        }

        if !self.boards.contains_key(&self.current_board_id) {
            tracing::warn!(
                board_id = %self.current_board_id,
                "Current board is missing, falling back to root"
            );
            self.current_board_id = root_id;
            repairs += 1;
        }

        for board in self.boards.values_mut() {
            let node_ids: HashSet<&str> = board.nodes.iter().map(|n| n.id.as_str()).collect();
            let before = board.edges.len();
            board
                .edges
                .retain(|e| node_ids.contains(e.source.as_str()) && node_ids.contains(e.target.as_str()));
            let pruned = before - board.edges.len();
            if pruned > 0 {
                tracing::warn!(board_id = %board.id, pruned, "Pruned dangling edges");
                repairs += pruned;
            }
        }

        repairs
    }

    /// Whether walking up from `id` fails to reach `root_id`.
    fn parent_chain_is_broken(&self, id: BoardId, root_id: BoardId) -> bool {
        let mut seen = HashSet::new();
        let mut current = id;
        loop {
            if current == root_id {
                return false;
            }
            if !seen.insert(current) {
                return true;
            }
            match self.boards.get(&current).and_then(|b| b.parent_id) {
                Some(parent) if self.boards.contains_key(&parent) => current = parent,
                _ => return true,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
