//! Lock-free work distribution over a borrowed batch

use std::sync::atomic::{AtomicUsize, Ordering};

/// Hands out each item of a batch exactly once, in order, to any number of
/// workers.
pub struct WorkQueue<'a, S> {
    items: &'a [S],
    cursor: AtomicUsize,
}

impl<'a, S> WorkQueue<'a, S> {
    pub fn new(items: &'a [S]) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Claim the next item with its batch index (lock-free)
    pub fn next(&self) -> Option<(usize, &'a S)> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(i).map(|item| (i, item))
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Items handed out so far
    pub fn claimed(&self) -> usize {
        self.cursor.load(Ordering::Relaxed).min(self.items.len())
    }
}
