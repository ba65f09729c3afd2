//! Bounded undo/redo log of graph snapshots for the open board.
//!
//! Commits are debounced: callers mark the graph dirty on every mutation and
//! call [`HistoryManager::flush`] periodically. A snapshot is recorded only
//! once the graph has been quiescent for the debounce window and its node or
//! edge count differs from the last recorded state, so intermediate drag
//! positions never flood the log.
//!
//! Undo and redo set a replay flag; the next commit after a replay is
//! suppressed so that applying a restored snapshot is not itself recorded.

use std::time::{Duration, Instant};

use crate::graph::{GraphSnapshot, GraphStore};

/// Default number of snapshots kept per board visit.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Default quiescence window before a change is committed.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryConfig {
    pub capacity: usize,
    pub debounce: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_HISTORY_CAPACITY,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryManager {
    log: Vec<GraphSnapshot>,
    index: usize,
    capacity: usize,
    debounce: Duration,
    replaying: bool,
    dirty_since: Option<Instant>,
    last_counts: Option<(usize, usize)>,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

impl HistoryManager {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            log: Vec::new(),
            index: 0,
            capacity: config.capacity.max(1),
            debounce: config.debounce,
            replaying: false,
            dirty_since: None,
            last_counts: None,
        }
    }

    /// Start a fresh history scope whose only entry is `initial`.
    pub fn reset(&mut self, initial: GraphSnapshot) {
        self.last_counts = Some(initial.counts());
        self.log = vec![initial];
        self.index = 0;
        self.replaying = false;
        self.dirty_since = None;
    }

    /// Record a snapshot.
    ///
    /// Suppressed (and the replay flag cleared) when an undo or redo is
    /// being applied. Otherwise entries after the cursor are discarded, the
    /// snapshot is appended, and the oldest entries are dropped beyond
    /// capacity. Returns whether an entry was recorded.
    pub fn commit(&mut self, snapshot: GraphSnapshot) -> bool {
        if self.replaying {
            self.replaying = false;
            return false;
        }
        if !self.log.is_empty() {
            self.log.truncate(self.index + 1);
        }
        self.last_counts = Some(snapshot.counts());
        self.log.push(snapshot);
        if self.log.len() > self.capacity {
            let excess = self.log.len() - self.capacity;
            self.log.drain(..excess);
        }
        self.index = self.log.len() - 1;
        true
    }

    /// Step back one entry and return the snapshot to apply.
    pub fn undo(&mut self) -> Option<GraphSnapshot> {
        if !self.can_undo() {
            return None;
        }
        self.index -= 1;
        self.replaying = true;
        Some(self.log[self.index].clone())
    }

    /// Step forward one entry and return the snapshot to apply.
    pub fn redo(&mut self) -> Option<GraphSnapshot> {
        if !self.can_redo() {
            return None;
        }
        self.index += 1;
        self.replaying = true;
        Some(self.log[self.index].clone())
    }

    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.log.len()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    // ---- debounce ----

    /// Note a mutation at `now`, restarting the quiescence window.
    pub fn mark_dirty(&mut self, now: Instant) {
        self.dirty_since = Some(now);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_since.is_some()
    }

    /// Commit the graph if it has been quiescent long enough.
    ///
    /// A settled change that follows a replay only clears the replay flag.
    /// Otherwise the graph is recorded when its node or edge count differs
    /// from the last recorded state. Returns whether an entry was recorded.
    pub fn flush(&mut self, now: Instant, graph: &GraphStore) -> bool {
        let Some(since) = self.dirty_since else {
            return false;
        };
        if now.saturating_duration_since(since) < self.debounce {
            return false;
        }
        self.dirty_since = None;

        let counts = (graph.node_count(), graph.edge_count());
        if self.replaying {
            self.last_counts = Some(counts);
            return self.commit(graph.snapshot());
        }
        if self.last_counts == Some(counts) {
            return false;
        }
        self.commit(graph.snapshot())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
