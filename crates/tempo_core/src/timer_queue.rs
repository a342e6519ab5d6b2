//! Ordered queue of scheduled callbacks.
//!
//! Both the virtual clock and the system timer keep their pending callbacks
//! here. Entries are keyed by `(due, seq)`, so two callbacks due at the same
//! instant always come out in the order they were scheduled.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// A deferred zero-argument procedure.
pub type Action = Box<dyn FnOnce()>;

/// Cancellation handle for a scheduled callback.
///
/// Identifies the issuing queue and the sequence number assigned at
/// scheduling time. A handle only ever matches entries of the queue that
/// issued it, and sequence numbers are never reused within one queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimerHandle {
    queue: u64,
    seq: u64,
}

impl TimerHandle {
    /// Sequence number of the callback this handle refers to.
    #[must_use]
    pub const fn sequence(self) -> u64 {
        self.seq
    }

    /// Identifier of the queue that issued this handle.
    #[must_use]
    pub const fn queue(self) -> u64 {
        self.queue
    }
}

thread_local! {
    static NEXT_QUEUE_ID: Cell<u64> = const { Cell::new(0) };
}

fn next_queue_id() -> u64 {
    NEXT_QUEUE_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        id
    })
}

/// A callback waiting in a [`TimerQueue`].
pub struct ScheduledCallback {
    /// Time at which the callback becomes due, in milliseconds.
    pub due: u64,
    /// Tie-break assigned at scheduling time.
    pub seq: u64,
    /// Optional label recorded in firing traces.
    pub label: Option<String>,
    queue: u64,
    action: Action,
}

impl ScheduledCallback {
    /// Handle that identifies this callback.
    #[must_use]
    pub const fn handle(&self) -> TimerHandle {
        TimerHandle {
            queue: self.queue,
            seq: self.seq,
        }
    }

    /// Run the callback, consuming it.
    pub fn fire(self) {
        (self.action)();
    }
}

impl fmt::Debug for ScheduledCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledCallback")
            .field("due", &self.due)
            .field("seq", &self.seq)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Priority queue of callbacks ordered by `(due, seq)`.
pub struct TimerQueue {
    id: u64,
    entries: BTreeMap<(u64, u64), ScheduledCallback>,
    due_by_seq: HashMap<u64, u64>,
    next_seq: u64,
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self {
            id: next_queue_id(),
            entries: BTreeMap::new(),
            due_by_seq: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl TimerQueue {
    /// Create an empty queue with an identity no other queue on this thread shares.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifier stamped into every handle this queue issues.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Insert a callback due at `due` and return its handle.
    pub fn push(&mut self, due: u64, label: Option<String>, action: Action) -> TimerHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.due_by_seq.insert(seq, due);
        self.entries.insert(
            (due, seq),
            ScheduledCallback {
                due,
                seq,
                label,
                queue: self.id,
                action,
            },
        );
        TimerHandle {
            queue: self.id,
            seq,
        }
    }

    /// Remove a callback that has not fired yet.
    ///
    /// Returns `false` when the handle already fired, was already cancelled,
    /// or was issued by another queue.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        if handle.queue != self.id {
            return false;
        }
        let Some(due) = self.due_by_seq.remove(&handle.seq) else {
            return false;
        };
        self.entries.remove(&(due, handle.seq)).is_some()
    }

    /// Pop the earliest callback if it is due at or before `horizon`.
    pub fn pop_due(&mut self, horizon: u64) -> Option<ScheduledCallback> {
        let (&(due, _), _) = self.entries.first_key_value()?;
        if due > horizon {
            return None;
        }
        let (_, callback) = self.entries.pop_first()?;
        self.due_by_seq.remove(&callback.seq);
        Some(callback)
    }

    /// Due time of the earliest pending callback.
    #[must_use]
    pub fn next_due(&self) -> Option<u64> {
        self.entries.keys().next().map(|&(due, _)| due)
    }

    /// Whether the handle still refers to a pending callback.
    #[must_use]
    pub fn contains(&self, handle: TimerHandle) -> bool {
        handle.queue == self.id && self.due_by_seq.contains_key(&handle.seq)
    }

    /// Number of pending callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no callbacks are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every pending callback without running it.
    ///
    /// Sequence numbers keep counting, so stale handles never match new entries.
    pub fn drain(&mut self) -> Vec<ScheduledCallback> {
        self.due_by_seq.clear();
        std::mem::take(&mut self.entries).into_values().collect()
    }
}

impl fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerQueue")
            .field("id", &self.id)
            .field("pending", &self.entries.len())
            .field("next_due", &self.next_due())
            .field("next_seq", &self.next_seq)
            .finish()
    }
}
