//! Batching Queue
//!
//! Notifications produced while a batch is open are queued and delivered in
//! one flush when the outermost batch closes.
//!
//! # Contract
//!
//! - `begin_batch`/`end_batch` form a nesting counter. Every mutation opens
//!   one batch around its diff-and-notify phase, so one API-level operation
//!   delivers its notifications together.
//! - The queue is keyed by listener: a listener already queued keeps its
//!   position and receives only the newest change, so each listener runs at
//!   most once per flush.
//! - The queue is taken before dispatch starts. Mutations made by listeners
//!   queue a new round that is dispatched after the current round finishes,
//!   never interleaved with it.
//!
//! The queue is thread-local, matching the cooperative single-threaded model
//! of the engine.

use std::cell::RefCell;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use super::change::Change;
use super::subscriber::{Listener, ListenerId};

/// A listener paired with the change it is about to receive.
pub(crate) struct Notification {
    pub(crate) listener: Arc<Listener>,
    pub(crate) change: Arc<Change>,
}

#[derive(Default)]
struct BatchState {
    depth: usize,
    flushing: bool,
    pending: IndexMap<ListenerId, Notification>,
}

thread_local! {
    static BATCH: RefCell<BatchState> = RefCell::new(BatchState::default());
}

/// Open a batch. Must be matched by [`end_batch`].
pub fn begin_batch() {
    BATCH.with(|batch| batch.borrow_mut().depth += 1);
}

/// Close a batch, flushing the queue if this was the outermost one.
pub fn end_batch() {
    let outermost = BATCH.with(|batch| {
        let mut batch = batch.borrow_mut();
        batch.depth = batch.depth.saturating_sub(1);
        batch.depth == 0
    });

    if outermost {
        flush();
    }
}

/// Run `f` inside one batch.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let _batch = BatchGuard::begin();
    f()
}

/// Scoped batch used by the mutation engine.
pub(crate) struct BatchGuard;

impl BatchGuard {
    pub(crate) fn begin() -> Self {
        begin_batch();
        BatchGuard
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            // Close without dispatching; listeners must not run during unwinding.
            BATCH.with(|batch| {
                let mut batch = batch.borrow_mut();
                batch.depth = batch.depth.saturating_sub(1);
            });
        } else {
            end_batch();
        }
    }
}

/// Queue notifications, dispatching right away when no batch is open.
pub(crate) fn enqueue(notifications: Vec<Notification>) {
    if notifications.is_empty() {
        return;
    }

    let idle = BATCH.with(|batch| {
        let mut batch = batch.borrow_mut();
        for notification in notifications {
            batch.pending.insert(notification.listener.id(), notification);
        }
        batch.depth == 0
    });

    if idle {
        flush();
    }
}

fn flush() {
    let already_flushing = BATCH.with(|batch| {
        let mut batch = batch.borrow_mut();
        std::mem::replace(&mut batch.flushing, true)
    });
    if already_flushing {
        return;
    }

    struct Reset;

    impl Drop for Reset {
        fn drop(&mut self) {
            BATCH.with(|batch| batch.borrow_mut().flushing = false);
        }
    }

    let _reset = Reset;
    loop {
        let round = BATCH.with(|batch| std::mem::take(&mut batch.borrow_mut().pending));
        if round.is_empty() {
            break;
        }

        trace!(notifications = round.len(), "flushing batch");
        for (_, notification) in round {
            notification.listener.notify(&notification.change);
        }
    }
}
