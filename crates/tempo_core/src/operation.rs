//! Pending operations and their resolvers.
//!
//! A [`PendingOperation`] is the read side of a one-shot completion signal;
//! the matching [`Resolver`] is the write side. Settlement happens exactly
//! once. Every settlement is stamped from a per-thread counter, which gives a
//! total order over settlements that the gates use to pick "first" results.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

thread_local! {
    static NEXT_OPERATION_ID: Cell<u64> = const { Cell::new(1) };
    static NEXT_SETTLEMENT: Cell<u64> = const { Cell::new(0) };
}

/// Identifier of a pending operation, unique within a thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationId(u64);

impl OperationId {
    fn next() -> Self {
        NEXT_OPERATION_ID.with(|id| {
            let value = id.get();
            id.set(value + 1);
            Self(value)
        })
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Lifecycle state of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationState<T> {
    /// Not settled yet.
    Pending,
    /// Settled successfully.
    Resolved(T),
    /// Settled in failure with a reason.
    Rejected(String),
}

impl<T> OperationState<T> {
    /// Whether the state is still [`OperationState::Pending`].
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

struct Shared<T> {
    id: OperationId,
    label: Option<String>,
    state: OperationState<T>,
    settled_seq: Option<u64>,
    wakers: Vec<Waker>,
}

/// Create a linked operation / resolver pair.
#[must_use]
pub fn pending<T>() -> (PendingOperation<T>, Resolver<T>) {
    pending_labeled(None)
}

/// Create a linked pair whose operation carries a label for reports.
#[must_use]
pub fn pending_labeled<T>(label: Option<String>) -> (PendingOperation<T>, Resolver<T>) {
    let shared = Rc::new(RefCell::new(Shared {
        id: OperationId::next(),
        label,
        state: OperationState::Pending,
        settled_seq: None,
        wakers: Vec::new(),
    }));
    (
        PendingOperation {
            shared: Rc::clone(&shared),
        },
        Resolver { shared },
    )
}

/// Read side of a one-shot completion signal.
///
/// Clones observe the same operation. Awaiting it directly yields its outcome
/// once settled.
pub struct PendingOperation<T> {
    shared: Rc<RefCell<Shared<T>>>,
}

impl<T> Clone for PendingOperation<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T> PendingOperation<T> {
    /// Identifier of this operation.
    #[must_use]
    pub fn id(&self) -> OperationId {
        self.shared.borrow().id
    }

    /// Label given at creation, if any.
    #[must_use]
    pub fn label(&self) -> Option<String> {
        self.shared.borrow().label.clone()
    }

    /// Whether the operation has not settled yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.shared.borrow().state.is_pending()
    }

    /// Whether the operation has settled either way.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }

    /// Whether the operation resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self.shared.borrow().state, OperationState::Resolved(_))
    }

    /// Whether the operation rejected.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self.shared.borrow().state, OperationState::Rejected(_))
    }

    /// Settlement stamp; lower stamps settled earlier.
    #[must_use]
    pub fn settled_seq(&self) -> Option<u64> {
        self.shared.borrow().settled_seq
    }

    /// Rejection reason, if the operation rejected.
    #[must_use]
    pub fn rejection(&self) -> Option<String> {
        match &self.shared.borrow().state {
            OperationState::Rejected(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Whether both handles refer to the same operation.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn register_waker(&self, waker: &Waker) {
        let mut shared = self.shared.borrow_mut();
        if !shared.wakers.iter().any(|w| w.will_wake(waker)) {
            shared.wakers.push(waker.clone());
        }
    }
}

impl<T: Clone> PendingOperation<T> {
    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> OperationState<T> {
        self.shared.borrow().state.clone()
    }

    /// Resolved value, if the operation resolved.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        match &self.shared.borrow().state {
            OperationState::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Outcome once settled, `None` while pending.
    #[must_use]
    pub fn outcome(&self) -> Option<Result<T>> {
        let shared = self.shared.borrow();
        match &shared.state {
            OperationState::Pending => None,
            OperationState::Resolved(value) => Some(Ok(value.clone())),
            OperationState::Rejected(reason) => {
                Some(Err(HarnessError::rejected(shared.id, reason.clone())))
            }
        }
    }
}

impl<T: Clone> Future for PendingOperation<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.outcome() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                self.register_waker(cx.waker());
                Poll::Pending
            }
        }
    }
}

impl<T> fmt::Debug for PendingOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.borrow();
        f.debug_struct("PendingOperation")
            .field("id", &shared.id)
            .field("label", &shared.label)
            .field("pending", &shared.state.is_pending())
            .field("settled_seq", &shared.settled_seq)
            .finish()
    }
}

/// Write side of a one-shot completion signal.
pub struct Resolver<T> {
    shared: Rc<RefCell<Shared<T>>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<T> Resolver<T> {
    /// Identifier of the linked operation.
    #[must_use]
    pub fn id(&self) -> OperationId {
        self.shared.borrow().id
    }

    /// Settle successfully. Returns `false` if the operation had already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(OperationState::Resolved(value))
    }

    /// Settle in failure. Returns `false` if the operation had already settled.
    pub fn reject(&self, reason: impl Into<String>) -> bool {
        self.settle(OperationState::Rejected(reason.into()))
    }

    fn settle(&self, state: OperationState<T>) -> bool {
        let wakers = {
            let mut shared = self.shared.borrow_mut();
            if !shared.state.is_pending() {
                tracing::warn!(operation = %shared.id, "Ignoring second settlement");
                return false;
            }
            let stamp = NEXT_SETTLEMENT.with(|next| {
                let value = next.get();
                next.set(value + 1);
                value
            });
            tracing::debug!(
                operation = %shared.id,
                resolved = !matches!(state, OperationState::Rejected(_)),
                stamp,
                "Operation settled"
            );
            shared.state = state;
            shared.settled_seq = Some(stamp);
            std::mem::take(&mut shared.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
        true
    }
}
