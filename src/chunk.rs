use std::ops::Range;
use std::sync::Arc;

use crate::retry::{BackoffPolicy, RetryTracker};

/// A contiguous slice of the caller's input sent as one request.
///
/// Tasks share the input through an `Arc` and only own their index range, so
/// splitting never copies items.
#[derive(Debug)]
pub struct Task<I> {
    items: Arc<[I]>,
    range: Range<usize>,
    /// Retry state owned by this task alone.
    pub tracker: RetryTracker,
}

impl<I> Task<I> {
    /// Task covering `range` of `items`.
    pub fn new(items: Arc<[I]>, range: Range<usize>, tracker: RetryTracker) -> Self {
        debug_assert!(range.end <= items.len());
        Self {
            items,
            range,
            tracker,
        }
    }

    /// Items carried by this task, in input order.
    pub fn items(&self) -> &[I] {
        &self.items[self.range.clone()]
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.range.len()
    }

    /// Whether the task carries nothing.
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Position of the first item in the original input.
    pub fn offset(&self) -> usize {
        self.range.start
    }

    /// Another handle on the same items with a copy of the tracker.
    pub fn shallow_clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
            range: self.range.clone(),
            tracker: self.tracker.copy(),
        }
    }

    /// Halves the task into `floor(n/2)` and `n - floor(n/2)` items.
    ///
    /// Each half gets its own copy of the tracker. Returns the task unchanged
    /// when it holds fewer than two items.
    pub fn split(self) -> Result<(Task<I>, Task<I>), Task<I>> {
        let len = self.len();
        if len < 2 {
            return Err(self);
        }
        let mid = self.range.start + len / 2;
        let left = Task {
            items: Arc::clone(&self.items),
            range: self.range.start..mid,
            tracker: self.tracker.copy(),
        };
        let right = Task {
            items: self.items,
            range: mid..self.range.end,
            tracker: self.tracker,
        };
        Ok((left, right))
    }
}

/// Splits `items` into tasks of at most `limit` items each.
///
/// Every task starts with zero retry counters. Empty input yields no tasks.
pub fn chunk<I>(items: Arc<[I]>, limit: usize, policy: &Arc<BackoffPolicy>) -> Vec<Task<I>> {
    let limit = limit.max(1);
    let total = items.len();
    (0..total)
        .step_by(limit)
        .map(|start| {
            let end = (start + limit).min(total);
            Task::new(
                Arc::clone(&items),
                start..end,
                RetryTracker::new(Arc::clone(policy)),
            )
        })
        .collect()
}
