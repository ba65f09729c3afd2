//! Board tree ownership, navigation, and the live graph of the open board.
//!
//! [`BoardHierarchy`] is the single owner of the [`WorkspaceDocument`]. The
//! open board's nodes and edges live in a [`GraphStore`]; its stored record
//! is refreshed when the user navigates away and whenever the document is
//! persisted. History is scoped to one board visit.
//!
//! Changes that other components care about are queued as
//! [`HierarchyEvent`]s and drained with [`BoardHierarchy::take_events`].

use std::time::Instant;

use chrono::Utc;

use crate::board::{Board, WorkspaceDocument, MAX_BOARD_NAME_LENGTH};
use crate::canvas::{auto_position, validate_node_count, NodeKind};
use crate::error::CoreError;
use crate::graph::{GraphSnapshot, GraphStore};
use crate::history::{HistoryConfig, HistoryManager};
use crate::node::{BoardLinkData, Node, NodeData, Position, Size};
use crate::persistence::{PersistenceScheduler, WorkspaceStore};
use crate::types::{BoardId, NodeId};

/// Notification emitted by structural board changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HierarchyEvent {
    BoardCreated { board_id: BoardId, parent_id: BoardId },
    BoardRenamed { board_id: BoardId, name: String },
    BoardDeleted { board_id: BoardId },
    Navigated { from: BoardId, to: BoardId },
}

pub struct BoardHierarchy {
    document: WorkspaceDocument,
    graph: GraphStore,
    history: HistoryManager,
    store: Box<dyn WorkspaceStore>,
    saver: PersistenceScheduler,
    events: Vec<HierarchyEvent>,
}

impl BoardHierarchy {
    /// Load the workspace from `store`, falling back to an empty document
    /// when nothing is stored or the stored document cannot be read.
    pub fn open(
        store: Box<dyn WorkspaceStore>,
        history: HistoryConfig,
        saver: PersistenceScheduler,
    ) -> Self {
        let mut document = match store.load() {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                tracing::info!("No stored workspace, starting with an empty one");
                WorkspaceDocument::default()
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load workspace, starting with an empty one");
                WorkspaceDocument::default()
            }
        };
        let repairs = document.sanitize();
        if repairs > 0 {
            tracing::warn!(repairs, "Repaired stored workspace");
        }
        Self::from_document(document, store, history, saver)
    }

    /// Wrap an already sanitized document.
    pub fn from_document(
        document: WorkspaceDocument,
        store: Box<dyn WorkspaceStore>,
        history: HistoryConfig,
        saver: PersistenceScheduler,
    ) -> Self {
        let mut hierarchy = Self {
            document,
            graph: GraphStore::new(),
            history: HistoryManager::new(history),
            store,
            saver,
            events: Vec::new(),
        };
        hierarchy.load_current();
        hierarchy
    }

    /// Move the stored nodes/edges of the current board into the live graph.
    fn load_current(&mut self) {
        let snapshot = self
            .document
            .boards
            .get(&self.document.current_board_id)
            .map(|b| GraphSnapshot {
                nodes: b.nodes.clone(),
                edges: b.edges.clone(),
            })
            .unwrap_or_default();
        self.graph.restore(snapshot);
        self.history.reset(self.graph.snapshot());
    }

    /// Write the live graph back into the current board record.
    fn store_current(&mut self) {
        let snapshot = self.graph.snapshot();
        if let Some(board) = self.document.boards.get_mut(&self.document.current_board_id) {
            board.nodes = snapshot.nodes;
            board.edges = snapshot.edges;
            board.updated_at = Utc::now();
        }
    }

    // ---- queries ----

    pub fn current_board_id(&self) -> BoardId {
        self.document.current_board_id
    }

    /// Board record by id. The open board's nodes may lag behind the live
    /// graph; use [`graph`](Self::graph) for its contents.
    pub fn board(&self, id: BoardId) -> Option<&Board> {
        self.document.boards.get(&id)
    }

    pub fn current_board(&self) -> Option<&Board> {
        self.board(self.document.current_board_id)
    }

    pub fn root_id(&self) -> Option<BoardId> {
        self.document.root_id()
    }

    /// Direct children of `id`, oldest first.
    pub fn child_boards(&self, id: BoardId) -> Vec<&Board> {
        let mut children: Vec<&Board> = self
            .document
            .boards
            .values()
            .filter(|b| b.parent_id == Some(id))
            .collect();
        children.sort_by_key(|b| b.created_at);
        children
    }

    pub fn board_count(&self) -> usize {
        self.document.boards.len()
    }

    /// Live graph of the open board.
    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    /// Boards from the root down to the current board.
    ///
    /// Stops walking at a missing parent or a parent cycle instead of failing.
    pub fn breadcrumbs(&self) -> Vec<&Board> {
        let mut trail = Vec::new();
        let mut next = Some(self.document.current_board_id);
        while let Some(id) = next {
            let Some(board) = self.document.boards.get(&id) else {
                tracing::warn!(board_id = %id, "Breadcrumb trail hit a missing board");
                break;
            };
            if trail.iter().any(|b: &&Board| b.id == id) {
                tracing::warn!(board_id = %id, "Breadcrumb trail hit a parent cycle");
                break;
            }
            trail.push(board);
            next = board.parent_id;
        }
        trail.reverse();
        trail
    }

    /// Whether `ancestor` is `id` itself or one of its ancestors.
    pub fn is_ancestor_or_self(&self, ancestor: BoardId, id: BoardId) -> bool {
        let mut seen = Vec::new();
        let mut next = Some(id);
        while let Some(current) = next {
            if current == ancestor {
                return true;
            }
            if seen.contains(&current) {
                return false;
            }
            seen.push(current);
            next = self.document.boards.get(&current).and_then(|b| b.parent_id);
        }
        false
    }

    /// Snapshot of the whole document with the live graph written in.
    pub fn document(&self) -> WorkspaceDocument {
        merge_live_graph(&self.document, &self.graph)
    }

    // ---- editing ----

    /// Mutate the live graph. Marks history and persistence dirty and keeps
    /// board-link item counts in sync.
    pub fn edit<R, F>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut GraphStore) -> R,
    {
        let before = self.graph.node_count();
        let result = f(&mut self.graph);
        if self.graph.node_count() != before {
            self.sync_item_count(self.document.current_board_id);
        }
        self.touch();
        result
    }

    /// Mutate a node that may live on a board other than the open one, such
    /// as a generator whose run finished after the user navigated away.
    pub fn edit_node_in_board<F>(
        &mut self,
        board_id: BoardId,
        node_id: &str,
        patch: F,
    ) -> Result<(), CoreError>
    where
        F: FnOnce(&mut NodeData),
    {
        if board_id == self.document.current_board_id {
            return self.edit(|g| g.update_node_data(node_id, patch));
        }
        let board = self
            .document
            .boards
            .get_mut(&board_id)
            .ok_or(CoreError::CorruptedBoardReference { board_id })?;
        let node = board
            .nodes
            .iter_mut()
            .find(|n| n.id == node_id)
            .ok_or_else(|| CoreError::node_not_found(node_id))?;
        let kind = node.kind();
        let mut data = node.data.clone();
        patch(&mut data);
        if data.kind() != kind {
            return Err(CoreError::Validation(format!(
                "Node {node_id} cannot change type from '{}' to '{}'",
                kind.name(),
                data.kind().name()
            )));
        }
        node.data = data;
        board.updated_at = Utc::now();
        self.saver.mark_dirty(Instant::now());
        Ok(())
    }

    fn touch(&mut self) {
        let now = Instant::now();
        self.history.mark_dirty(now);
        self.saver.mark_dirty(now);
    }

    /// Run debounced work: commit settled history and save the document.
    pub fn tick(&mut self, now: Instant) {
        self.history.flush(now, &self.graph);
        let Self {
            document,
            graph,
            store,
            saver,
            ..
        } = self;
        saver.flush(now, store.as_ref(), || merge_live_graph(document, graph));
    }

    /// Persist immediately, e.g. on shutdown.
    pub fn save_now(&mut self) -> bool {
        let doc = self.document();
        self.saver.save_now(self.store.as_ref(), doc)
    }

    // ---- history ----

    pub fn undo(&mut self) -> bool {
        match self.history.undo() {
            Some(snapshot) => {
                self.apply_replay(snapshot);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.history.redo() {
            Some(snapshot) => {
                self.apply_replay(snapshot);
                true
            }
            None => false,
        }
    }

    fn apply_replay(&mut self, snapshot: GraphSnapshot) {
        let before = self.graph.node_count();
        self.graph.restore(snapshot);
        if self.graph.node_count() != before {
            self.sync_item_count(self.document.current_board_id);
        }
        self.touch();
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    // ---- navigation ----

    /// Make `board_id` the open board.
    ///
    /// The board being left is written back, the target's contents become
    /// the live graph, and history starts a new scope.
    pub fn navigate_to(&mut self, board_id: BoardId) -> Result<(), CoreError> {
        if !self.document.boards.contains_key(&board_id) {
            return Err(CoreError::CorruptedBoardReference { board_id });
        }
        let from = self.document.current_board_id;
        if from == board_id {
            return Ok(());
        }
        self.store_current();
        self.document.current_board_id = board_id;
        self.load_current();
        self.saver.mark_dirty(Instant::now());
        tracing::debug!(from = %from, to = %board_id, "Navigated between boards");
        self.events.push(HierarchyEvent::Navigated { from, to: board_id });
        Ok(())
    }

    /// Navigate into the board referenced by a board-link node on the open
    /// board.
    pub fn open_board_link(&mut self, node_id: &str) -> Result<BoardId, CoreError> {
        let target = self
            .graph
            .node(node_id)
            .ok_or_else(|| CoreError::node_not_found(node_id))?
            .data
            .linked_board()
            .ok_or_else(|| {
                CoreError::Validation(format!("Node {node_id} is not a board link"))
            })?;
        self.navigate_to(target)?;
        Ok(target)
    }

    /// Navigate to the parent of the open board. No-op at the root.
    pub fn navigate_up(&mut self) -> Result<bool, CoreError> {
        match self.current_board().and_then(|b| b.parent_id) {
            Some(parent) => self.navigate_to(parent).map(|_| true),
            None => Ok(false),
        }
    }

    // ---- structure ----

    /// Create a board under `parent_id` and place a link to it on the parent.
    pub fn create_child_board(
        &mut self,
        parent_id: BoardId,
        name: &str,
    ) -> Result<BoardId, CoreError> {
        if !self.document.boards.contains_key(&parent_id) {
            return Err(CoreError::CorruptedBoardReference {
                board_id: parent_id,
            });
        }
        let name = validate_board_name(name)?;
        let board = Board::new(name.clone(), Some(parent_id));
        let board_id = board.id;
        self.document.boards.insert(board_id, board);

        let link = NodeData::BoardLink(BoardLinkData {
            board_id,
            name,
            item_count: 0,
        });
        if let Err(e) = self.insert_node_into(parent_id, link) {
            self.document.boards.remove(&board_id);
            return Err(e);
        }

        tracing::info!(board_id = %board_id, parent_id = %parent_id, "Created child board");
        self.events.push(HierarchyEvent::BoardCreated {
            board_id,
            parent_id,
        });
        Ok(board_id)
    }

    /// Add another board-link shortcut to `target` on `host`.
    ///
    /// Rejected when `target` is `host` or one of its ancestors, which would
    /// make the board tree cyclic.
    pub fn link_board(&mut self, host: BoardId, target: BoardId) -> Result<NodeId, CoreError> {
        if !self.document.boards.contains_key(&host) {
            return Err(CoreError::CorruptedBoardReference { board_id: host });
        }
        let target_board = self
            .document
            .boards
            .get(&target)
            .ok_or(CoreError::CorruptedBoardReference { board_id: target })?;
        if self.is_ancestor_or_self(target, host) {
            return Err(CoreError::Validation(format!(
                "Board {target} is {host} or one of its ancestors and cannot be linked from it"
            )));
        }
        let link = NodeData::BoardLink(BoardLinkData {
            board_id: target,
            name: target_board.name.clone(),
            item_count: self.node_count_of(target),
        });
        self.insert_node_into(host, link)
    }

    /// Place a node on any board, live or stored.
    fn insert_node_into(&mut self, board_id: BoardId, data: NodeData) -> Result<NodeId, CoreError> {
        if board_id == self.document.current_board_id {
            let position = auto_position(self.graph.node_count());
            return self.edit(|g| g.add_node(data, Position::new(position.0, position.1)));
        }

        let id = self.graph.allocate_node_id();
        let board = self
            .document
            .boards
            .get_mut(&board_id)
            .ok_or(CoreError::CorruptedBoardReference { board_id })?;
        validate_node_count(board.nodes.len() + 1)?;
        let (x, y) = auto_position(board.nodes.len());
        let (w, h) = NodeKind::BoardLink.default_size();
        board.nodes.push(Node {
            id: id.clone(),
            position: Position::new(x, y),
            size: Size { w, h },
            data,
        });
        board.updated_at = Utc::now();
        self.sync_item_count(board_id);
        self.saver.mark_dirty(Instant::now());
        Ok(id)
    }

    /// Rename a board and every board-link node that points at it.
    pub fn rename_board(&mut self, board_id: BoardId, name: &str) -> Result<(), CoreError> {
        let name = validate_board_name(name)?;
        let board = self
            .document
            .boards
            .get_mut(&board_id)
            .ok_or(CoreError::CorruptedBoardReference { board_id })?;
        board.name = name.clone();
        board.updated_at = Utc::now();

        self.update_links(board_id, |link| link.name = name.clone());
        self.touch();
        tracing::info!(board_id = %board_id, name = %name, "Renamed board");
        self.events.push(HierarchyEvent::BoardRenamed { board_id, name });
        Ok(())
    }

    /// Delete a board, all its descendants, and every link into them.
    ///
    /// The root cannot be deleted. If the open board is removed, the
    /// deleted board's parent is opened first.
    pub fn delete_board(&mut self, board_id: BoardId) -> Result<Vec<BoardId>, CoreError> {
        let board = self
            .document
            .boards
            .get(&board_id)
            .ok_or(CoreError::CorruptedBoardReference { board_id })?;
        let Some(parent_id) = board.parent_id else {
            return Err(CoreError::Validation(
                "The root board cannot be deleted".to_string(),
            ));
        };

        if self.is_ancestor_or_self(board_id, self.document.current_board_id) {
            self.navigate_to(parent_id)?;
        }

        let doomed: Vec<BoardId> = self
            .document
            .boards
            .keys()
            .copied()
            .filter(|id| self.is_ancestor_or_self(board_id, *id))
            .collect();
        for id in &doomed {
            self.document.boards.remove(id);
        }

        let removed_links = self.graph.remove_nodes_where(|n| {
            n.data.linked_board().is_some_and(|target| doomed.contains(&target))
        });
        for board in self.document.boards.values_mut() {
            let before = board.nodes.len();
            board.nodes.retain(|n| {
                !n.data
                    .linked_board()
                    .is_some_and(|target| doomed.contains(&target))
            });
            if board.nodes.len() != before {
                let ids: Vec<&str> = board.nodes.iter().map(|n| n.id.as_str()).collect();
                board
                    .edges
                    .retain(|e| ids.contains(&e.source.as_str()) && ids.contains(&e.target.as_str()));
                board.updated_at = Utc::now();
            }
        }
        if removed_links > 0 {
            self.sync_item_count(self.document.current_board_id);
        }
        self.sync_item_count(parent_id);
        self.touch();

        tracing::info!(board_id = %board_id, removed = doomed.len(), "Deleted board");
        for id in &doomed {
            self.events.push(HierarchyEvent::BoardDeleted { board_id: *id });
        }
        Ok(doomed)
    }

    /// Drain queued events.
    pub fn take_events(&mut self) -> Vec<HierarchyEvent> {
        std::mem::take(&mut self.events)
    }

    // ---- link bookkeeping ----

    fn node_count_of(&self, board_id: BoardId) -> usize {
        if board_id == self.document.current_board_id {
            self.graph.node_count()
        } else {
            self.document
                .boards
                .get(&board_id)
                .map_or(0, |b| b.nodes.len())
        }
    }

    /// Refresh the displayed item count on every link to `board_id`.
    fn sync_item_count(&mut self, board_id: BoardId) {
        let count = self.node_count_of(board_id);
        self.update_links(board_id, |link| link.item_count = count);
    }

    /// Apply `f` to every board-link payload targeting `board_id`, on the
    /// live graph and on every stored board.
    fn update_links<F>(&mut self, board_id: BoardId, mut f: F)
    where
        F: FnMut(&mut BoardLinkData),
    {
        let mut apply = |data: &mut NodeData| {
            if let NodeData::BoardLink(link) = data {
                if link.board_id == board_id {
                    f(link);
                }
            }
        };
        self.graph.for_each_node_data(&mut apply);
        let current = self.document.current_board_id;
        for board in self.document.boards.values_mut() {
            if board.id == current {
                continue;
            }
            for node in &mut board.nodes {
                apply(&mut node.data);
            }
        }
    }
}

fn validate_board_name(name: &str) -> Result<String, CoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation(
            "Board name must not be empty".to_string(),
        ));
    }
    if trimmed.chars().count() > MAX_BOARD_NAME_LENGTH {
        return Err(CoreError::Validation(format!(
            "Board name exceeds maximum length of {MAX_BOARD_NAME_LENGTH} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn merge_live_graph(document: &WorkspaceDocument, graph: &GraphStore) -> WorkspaceDocument {
    let mut doc = document.clone();
    let snapshot = graph.snapshot();
    if let Some(board) = doc.boards.get_mut(&doc.current_board_id) {
        board.nodes = snapshot.nodes;
        board.edges = snapshot.edges;
    }
    doc
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
