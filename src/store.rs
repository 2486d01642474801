//! ==============================================================================
//! store.rs - bounded in-memory message window
//! ==============================================================================
//!
//! purpose:
//!     keeps the most recent normalized messages for the dashboard and the
//!     json api, oldest first, capped by `store.max_messages`.
//!
//! concurrency:
//!     a single RwLock guards the sequence. writers (add, add_bounded,
//!     trim_to_size) take the write half, everything else the read half.
//!     nothing here does i/o or awaits while holding the lock, so a plain
//!     std lock is enough even inside async handlers.
//!
//!     messages are stored as Arc<NormalizedMessage>; copies handed out are
//!     independent vectors of shared, immutable messages.
//!
//! ==============================================================================

use crate::domain::NormalizedMessage;

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
pub struct MessageStore {
    messages: RwLock<Vec<Arc<NormalizedMessage>>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    // a panic while holding the lock cannot leave the vec half-updated
    // (push and drain are the only mutations), so poisoning is ignored
    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<NormalizedMessage>>> {
        self.messages.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<NormalizedMessage>>> {
        self.messages.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// append at the tail, unbounded
    #[allow(dead_code)]
    pub fn add(&self, message: impl Into<Arc<NormalizedMessage>>) {
        self.write().push(message.into());
    }

    /// every retained message, oldest first
    pub fn snapshot(&self) -> Vec<Arc<NormalizedMessage>> {
        self.read().clone()
    }

    /// the last `n` messages, oldest first; fewer if the store is smaller
    pub fn latest(&self, n: usize) -> Vec<Arc<NormalizedMessage>> {
        let messages = self.read();
        let skip = messages.len().saturating_sub(n);
        messages[skip..].to_vec()
    }

    pub fn latest_one(&self) -> Option<Arc<NormalizedMessage>> {
        self.read().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// append and trim under one write guard, so no reader ever sees more
    /// than `max_size` messages
    pub fn add_bounded(&self, message: impl Into<Arc<NormalizedMessage>>, max_size: usize) {
        let mut messages = self.write();
        messages.push(message.into());
        drop_oldest(&mut messages, max_size);
    }

    /// drop the oldest messages until at most `max_size` remain
    #[allow(dead_code)]
    pub fn trim_to_size(&self, max_size: usize) {
        drop_oldest(&mut self.write(), max_size);
    }

    /// zero-copy read access to the whole window.
    ///
    /// the guard holds the read lock: every writer blocks until it is
    /// dropped. use it only for short synchronous aggregation and never keep
    /// it across an `.await` or hand it to another thread.
    pub fn borrow_all(&self) -> RwLockReadGuard<'_, Vec<Arc<NormalizedMessage>>> {
        self.read()
    }
}

fn drop_oldest(messages: &mut Vec<Arc<NormalizedMessage>>, max_size: usize) {
    if messages.len() > max_size {
        let excess = messages.len() - max_size;
        messages.drain(..excess);
    }
}
