//! Async completion gates.
//!
//! [`await_all`] and [`await_one`] turn a set of [`PendingOperation`]s into a
//! single future. Neither uses a timer of its own: they become ready only when
//! the member operations actually settle.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::{HarnessError, Result};
use crate::operation::{OperationId, PendingOperation};

/// Wait until every operation has settled.
///
/// Resolves with the values in input order. If any member rejected, resolves
/// with the rejection that settled first instead. An empty set is ready
/// immediately.
pub fn await_all<T, I>(operations: I) -> AllSettled<T>
where
    I: IntoIterator<Item = PendingOperation<T>>,
{
    AllSettled {
        operations: operations.into_iter().collect(),
    }
}

/// Wait until the first operation settles.
///
/// The others keep running. The caller must drain or cancel them before the
/// test ends.
///
/// # Errors
/// [`HarnessError::InvalidArgument`] for an empty set, which could never settle.
pub fn await_one<T, I>(operations: I) -> Result<FirstSettled<T>>
where
    I: IntoIterator<Item = PendingOperation<T>>,
{
    let operations: Vec<_> = operations.into_iter().collect();
    if operations.is_empty() {
        return Err(HarnessError::InvalidArgument(
            "await_one needs at least one operation".into(),
        ));
    }
    Ok(FirstSettled { operations })
}

/// Whether every operation in the slice has settled.
#[must_use]
pub fn all_settled<T>(operations: &[PendingOperation<T>]) -> bool {
    operations.iter().all(PendingOperation::is_settled)
}

/// Future returned by [`await_all`].
#[must_use = "futures do nothing unless awaited"]
#[derive(Debug)]
pub struct AllSettled<T> {
    operations: Vec<PendingOperation<T>>,
}

impl<T> AllSettled<T> {
    /// The operations this gate waits on.
    pub fn operations(&self) -> &[PendingOperation<T>] {
        &self.operations
    }

    /// Number of members still pending.
    pub fn pending_count(&self) -> usize {
        self.operations.iter().filter(|op| op.is_pending()).count()
    }
}

impl<T: Clone> Future for AllSettled<T> {
    type Output = Result<Vec<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Waiting on one pending member is enough: its settlement re-polls us.
        if let Some(pending) = self.operations.iter().find(|op| op.is_pending()) {
            pending.register_waker(cx.waker());
            return Poll::Pending;
        }

        let first_rejection = self
            .operations
            .iter()
            .filter(|op| op.is_rejected())
            .min_by_key(|op| op.settled_seq());
        if let Some(op) = first_rejection {
            let reason = op.rejection().unwrap_or_default();
            tracing::debug!(operation = %op.id(), %reason, "await_all failed");
            return Poll::Ready(Err(HarnessError::rejected(op.id(), reason)));
        }

        let values = self.operations.iter().filter_map(PendingOperation::value).collect();
        tracing::debug!(members = self.operations.len(), "await_all settled");
        Poll::Ready(Ok(values))
    }
}

/// Future returned by [`await_one`].
#[must_use = "futures do nothing unless awaited"]
#[derive(Debug)]
pub struct FirstSettled<T> {
    operations: Vec<PendingOperation<T>>,
}

impl<T> FirstSettled<T> {
    /// Members other than `winner`, for draining after the race.
    pub fn remaining(&self, winner: OperationId) -> Vec<PendingOperation<T>> {
        self.operations
            .iter()
            .filter(|op| op.id() != winner)
            .cloned()
            .collect()
    }
}

impl<T: Clone> Future for FirstSettled<T> {
    type Output = (OperationId, Result<T>);

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let winner = self
            .operations
            .iter()
            .filter(|op| op.is_settled())
            .min_by_key(|op| op.settled_seq());

        match winner.and_then(|op| op.outcome().map(|outcome| (op.id(), outcome))) {
            Some((id, outcome)) => {
                tracing::debug!(winner = %id, ok = outcome.is_ok(), "await_one settled");
                Poll::Ready((id, outcome))
            }
            None => {
                for op in &self.operations {
                    op.register_waker(cx.waker());
                }
                Poll::Pending
            }
        }
    }
}
