//! Snapshot-based undo/redo for the local author's layer.
//!
//! Strokes are rasterized irreversibly, so the only lossless undo unit is a
//! full copy of the layer taken before each action.

use crate::layer::{AuthorId, LayerStore};
use crate::snapshot::{Snapshot, SnapshotResult};
use std::collections::VecDeque;

/// Maximum number of undo states to keep.
pub const DEFAULT_HISTORY_DEPTH: usize = 50;

/// Bounded linear history of the local layer.
#[derive(Debug, Clone)]
pub struct HistoryManager {
    undo_stack: VecDeque<Snapshot>,
    redo_stack: VecDeque<Snapshot>,
    max_depth: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_DEPTH)
    }
}

impl HistoryManager {
    /// Create a history keeping at most `max_depth` states per stack.
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_depth: max_depth.max(1),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Record the local layer before a new action mutates it.
    ///
    /// Invalidates the redo history.
    pub fn capture_before_action(&mut self, layers: &LayerStore) -> SnapshotResult<()> {
        let snapshot = layers.snapshot(&AuthorId::Local)?;
        push_bounded(&mut self.undo_stack, snapshot, self.max_depth);
        self.redo_stack.clear();
        Ok(())
    }

    /// Restore the state before the last action.
    ///
    /// Returns `Ok(false)` when there is nothing to undo. If the stored
    /// snapshot cannot be decoded, both stacks and the layer are left as
    /// they were and the error is returned.
    pub fn undo(&mut self, layers: &mut LayerStore) -> SnapshotResult<bool> {
        Self::step(&mut self.undo_stack, &mut self.redo_stack, self.max_depth, layers)
    }

    /// Re-apply the last undone action. Mirror of [`undo`](Self::undo).
    pub fn redo(&mut self, layers: &mut LayerStore) -> SnapshotResult<bool> {
        Self::step(&mut self.redo_stack, &mut self.undo_stack, self.max_depth, layers)
    }

    fn step(
        from: &mut VecDeque<Snapshot>,
        to: &mut VecDeque<Snapshot>,
        max_depth: usize,
        layers: &mut LayerStore,
    ) -> SnapshotResult<bool> {
        let Some(target) = from.back() else {
            return Ok(false);
        };
        let current = layers.snapshot(&AuthorId::Local)?;
        layers.restore(&AuthorId::Local, target)?;
        from.pop_back();
        push_bounded(to, current, max_depth);
        Ok(true)
    }

    /// Check if undo is available.
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Check if redo is available.
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    /// Forget all history.
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    #[cfg(test)]
    pub(crate) fn push_undo(&mut self, snapshot: Snapshot) {
        push_bounded(&mut self.undo_stack, snapshot, self.max_depth);
    }

    #[cfg(test)]
    pub(crate) fn push_redo(&mut self, snapshot: Snapshot) {
        push_bounded(&mut self.redo_stack, snapshot, self.max_depth);
    }
}

/// Push onto a stack, evicting the oldest entry when full.
fn push_bounded(stack: &mut VecDeque<Snapshot>, snapshot: Snapshot, max_depth: usize) {
    stack.push_back(snapshot);
    while stack.len() > max_depth {
        stack.pop_front();
    }
}
