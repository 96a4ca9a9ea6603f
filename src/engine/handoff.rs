//! Holding area for chapters that arrive before the player is ready.

use std::collections::VecDeque;

/// Items are held until the first `flush`, then pass straight through.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingHandoff<T> {
    Waiting(VecDeque<T>),
    Flushed,
}

impl<T> PendingHandoff<T> {
    pub fn new() -> Self {
        PendingHandoff::Waiting(VecDeque::new())
    }

    /// Hold `item` if still waiting; otherwise hand it back for immediate use.
    pub fn offer(&mut self, item: T) -> Option<T> {
        match self {
            PendingHandoff::Waiting(queue) => {
                queue.push_back(item);
                None
            }
            PendingHandoff::Flushed => Some(item),
        }
    }

    /// Release everything held, in arrival order. Only the first call returns items.
    pub fn flush(&mut self) -> Vec<T> {
        match std::mem::replace(self, PendingHandoff::Flushed) {
            PendingHandoff::Waiting(queue) => queue.into(),
            PendingHandoff::Flushed => Vec::new(),
        }
    }

    pub fn is_flushed(&self) -> bool {
        matches!(self, PendingHandoff::Flushed)
    }

    pub fn held(&self) -> usize {
        match self {
            PendingHandoff::Waiting(queue) => queue.len(),
            PendingHandoff::Flushed => 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl<T> Default for PendingHandoff<T> {
    fn default() -> Self {
        Self::new()
    }
}
