//! Reactive Primitives
//!
//! This module implements the reactive side of arbor: dependency tracking,
//! listeners, notification batching, and the effects built on top of them.
//!
//! # Concepts
//!
//! ## Tracking
//!
//! Reads through an [`Observable`](crate::Observable) inside a tracking
//! context are recorded, node by node, together with whether the read was
//! deep (the value) or shallow (keys, length, iteration).
//!
//! ## Listeners
//!
//! A listener is a callback registered on one node. It receives a
//! [`Change`] describing what changed at or below that node. Its
//! [`ListenerMode`] decides which changes it cares about.
//!
//! ## Batches
//!
//! Notifications are queued while a batch is open and delivered once, each
//! listener at most once, when the outermost batch closes.
//!
//! ## Effects
//!
//! An Effect is a computation that re-runs whenever the nodes it read
//! change. [`computed`], [`when`] and [`Event`] are compositions of effects
//! and observables.
//!
//! # Implementation Notes
//!
//! Tracking state and the batch queue are thread-local. A change and the
//! notifications it causes are always handled on the thread that made it.

mod batch;
mod change;
mod computed;
mod context;
mod effect;
mod event;
mod subscriber;
mod when;

pub use batch::{batch, begin_batch, end_batch};
pub use change::{Change, ChangePath};
pub use computed::{computed, Computed};
pub use context::{untrack, TrackedNodes, TrackingContext, TrackingNode};
pub use effect::Effect;
pub use event::Event;
pub use subscriber::{Disposer, Listener, ListenerId, ListenerMode, ListenerOptions};
pub use when::{truthy, when, when_ready, WhenOptions};

pub(crate) use batch::{enqueue, BatchGuard, Notification};
