//! RCU-style deferred reclamation (component C7).
//!
//! A page-table page detached from the tree (marked stale, unlinked from
//! its parent) cannot be freed immediately: a concurrent reader may have
//! already cloned an `Arc` to it via the lock-free descent path and be
//! about to lock it. Instead of freeing it, the detaching thread hands it
//! to a [`RcuReclaimer`], which holds it for a grace period and only then
//! lets it actually drop (by releasing its last `Arc`).
//!
//! This mirrors the teacher's own RCU reclaimer, which defers a `delay()`'d
//! object's drop until the next grace period elapses, except here the
//! grace period is a plain wall-clock deadline rather than a quiescent-state
//! epoch count, which keeps the simulator's reclaimer independent of any
//! particular reader-tracking scheme.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::node::Descriptor;

/// Default grace period before a retired node becomes eligible for reclaim.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(1);

struct Entry {
    deadline: Instant,
    node: Arc<Descriptor>,
}

struct Inner {
    grace_period: Duration,
    queue: VecDeque<Entry>,
}

/// A FIFO queue of stale page-table pages awaiting their grace period.
pub struct RcuReclaimer {
    inner: Mutex<Inner>,
}

impl RcuReclaimer {
    pub fn new() -> Self {
        Self::with_grace_period(DEFAULT_GRACE_PERIOD)
    }

    pub fn with_grace_period(grace_period: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                grace_period,
                queue: VecDeque::new(),
            }),
        }
    }

    /// Enqueues `node` for reclamation once the grace period elapses.
    ///
    /// The caller must have already marked `node` stale and unlinked it
    /// from the tree; this function only governs when the last `Arc` is
    /// allowed to be dropped.
    pub fn defer_free(&self, node: Arc<Descriptor>) {
        debug_assert!(node.is_stale());
        let mut inner = self.inner.lock().unwrap();
        let deadline = Instant::now() + inner.grace_period;
        inner.queue.push_back(Entry { deadline, node });
    }

    /// Drops every entry whose grace period has elapsed, returning how many
    /// were reclaimed. Entries are reclaimed in FIFO (enqueue) order, so a
    /// still-pending entry at the front of the queue stops the scan: later
    /// entries were enqueued with a deadline no earlier than the one that
    /// blocked, so checking them now would waste work. Callers that run
    /// this periodically (e.g. a background reclaim thread) will pick up
    /// the stragglers on a later call.
    pub fn try_reclaim(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let mut reclaimed = 0;
        while let Some(front) = inner.queue.front() {
            if front.deadline > now {
                break;
            }
            inner.queue.pop_front();
            reclaimed += 1;
        }
        reclaimed
    }

    /// Number of nodes currently awaiting reclamation.
    pub fn pending(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }
}

impl Default for RcuReclaimer {
    fn default() -> Self {
        Self::new()
    }
}
