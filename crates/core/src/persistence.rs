//! Persistence collaborator contract and save debouncing.
//!
//! The core never blocks on storage: saves are scheduled after a quiet
//! period, and a failed save is logged and retried after the next change.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::board::WorkspaceDocument;
use crate::error::CoreError;

/// Default quiet period before the workspace is written.
pub const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_millis(500);

/// Backing store for the workspace document.
///
/// Implementations should tolerate size-limited backends; image bytes are
/// never part of the serialized document.
pub trait WorkspaceStore: Send + Sync {
    /// Load the stored document, or `None` when nothing was saved yet.
    fn load(&self) -> Result<Option<WorkspaceDocument>, CoreError>;

    fn save(&self, document: &WorkspaceDocument) -> Result<(), CoreError>;
}

/// Volatile store, used for tests and sessions without a workspace file.
#[derive(Debug, Default)]
pub struct MemoryStore {
    document: Mutex<Option<WorkspaceDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last saved document.
    pub fn saved(&self) -> Option<WorkspaceDocument> {
        self.document
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl WorkspaceStore for MemoryStore {
    fn load(&self) -> Result<Option<WorkspaceDocument>, CoreError> {
        Ok(self.saved())
    }

    fn save(&self, document: &WorkspaceDocument) -> Result<(), CoreError> {
        *self.document.lock().unwrap_or_else(|e| e.into_inner()) = Some(document.clone());
        Ok(())
    }
}

/// "Mark dirty, flush on quiescence" scheduler for document saves.
#[derive(Debug, Clone)]
pub struct PersistenceScheduler {
    debounce: Duration,
    dirty_since: Option<Instant>,
    failures: u32,
}

impl Default for PersistenceScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_SAVE_DEBOUNCE)
    }
}

impl PersistenceScheduler {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            dirty_since: None,
            failures: 0,
        }
    }

    pub fn mark_dirty(&mut self, now: Instant) {
        self.dirty_since = Some(now);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_since.is_some()
    }

    /// Whether a save is pending and the quiet period has elapsed.
    pub fn is_due(&self, now: Instant) -> bool {
        self.dirty_since
            .is_some_and(|since| now.saturating_duration_since(since) >= self.debounce)
    }

    /// Consecutive failed saves since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Save `document` through `store` if due.
    ///
    /// Failures are logged, never propagated; the pending flag is cleared
    /// either way so that the next mutation schedules the retry.
    pub fn flush<F>(&mut self, now: Instant, store: &dyn WorkspaceStore, document: F) -> bool
    where
        F: FnOnce() -> WorkspaceDocument,
    {
        if !self.is_due(now) {
            return false;
        }
        self.save_now(store, document())
    }

    /// Save immediately, regardless of the debounce window.
    pub fn save_now(&mut self, store: &dyn WorkspaceStore, document: WorkspaceDocument) -> bool {
        self.dirty_since = None;
        match store.save(&document) {
            Ok(()) => {
                self.failures = 0;
                tracing::debug!(boards = document.boards.len(), "Workspace saved");
                true
            }
            Err(e) => {
                self.failures += 1;
                tracing::error!(
                    error = %e,
                    failures = self.failures,
                    "Failed to save workspace, will retry after the next change"
                );
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
