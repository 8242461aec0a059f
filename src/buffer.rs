//! # Reading Buffer
//! Capacity-bounded store of readings kept in ascending `observed_at` order.
//!
//! Every insert publishes a complete new ordered+truncated state under the
//! write lock. Snapshots are `Arc`s of a published state, so readers never see
//! a half-merged sequence and never block writers for longer than a pointer
//! clone.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::reading::Reading;

pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug)]
pub struct ReadingBuffer {
    inner: RwLock<Arc<Vec<Reading>>>,
    cap: usize,
}

impl ReadingBuffer {
    /// `cap` of zero is bumped to one; an empty buffer can't hold anything.
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            inner: RwLock::new(Arc::new(Vec::with_capacity(cap.min(10_000)))),
            cap,
        }
    }

    /// Merge `readings` into the ordered sequence, then evict the oldest
    /// entries beyond capacity. Returns how many were evicted.
    ///
    /// The batch is sorted first (the history store does not guarantee
    /// order). Equal timestamps keep arrival order: existing entries first.
    pub fn insert<I>(&self, readings: I) -> usize
    where
        I: IntoIterator<Item = Reading>,
    {
        let mut batch: Vec<Reading> = readings.into_iter().collect();
        if batch.is_empty() {
            return 0;
        }
        batch.sort_by_key(|r| r.observed_at());

        let mut guard = self.inner.write();
        let seq = Arc::make_mut(&mut *guard);

        let appends = seq
            .last()
            .map_or(true, |last| last.observed_at() <= batch[0].observed_at());
        if appends {
            // Live path: the new reading is the newest one.
            seq.extend(batch);
        } else {
            let existing = std::mem::take(seq);
            *seq = merge_sorted(existing, batch);
        }

        let excess = seq.len().saturating_sub(self.cap);
        if excess > 0 {
            seq.drain(0..excess);
        }
        excess
    }

    /// Current ordered contents. Later inserts don't affect a taken snapshot.
    pub fn snapshot(&self) -> Arc<Vec<Reading>> {
        Arc::clone(&self.inner.read())
    }

    pub fn size(&self) -> usize {
        self.inner.read().len()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }
}

impl Default for ReadingBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

/// Linear merge of two ascending sequences; ties favour `a`.
fn merge_sorted(a: Vec<Reading>, b: Vec<Reading>) -> Vec<Reading> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let mut a = a.into_iter().peekable();
    let mut b = b.into_iter().peekable();

    loop {
        let take_a = match (a.peek(), b.peek()) {
            (Some(x), Some(y)) => x.observed_at() <= y.observed_at(),
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_a { a.next() } else { b.next() };
        out.extend(next);
    }
    out
}
