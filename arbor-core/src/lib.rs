//! Arbor Core
//!
//! This crate provides a fine-grained observable state tree. It implements:
//!
//! - Lazily built path nodes over a JSON value tree
//! - Dependency tracking of reads inside tracked computations
//! - Structural diffing of writes, with array move detection by identity
//! - Hierarchical change notification, batched per write
//! - Effects, computed values and gates built on those pieces
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: path nodes, the per-root node arena, and value resolution
//! - `observable`: the [`Observable`] accessor handle and the mutation engine
//! - `reactive`: tracking context, listeners, batching, effects
//! - `error`: the crate's error type
//!
//! # Example
//!
//! ```rust,ignore
//! use arbor_core::{observable, Effect, ListenerOptions};
//! use serde_json::json;
//!
//! let state = observable(json!({ "count": 0 }));
//!
//! // Log every change below the root
//! state.on_change(
//!     |change| println!("{:?} -> {:?}", change.path(), change.value_at_path()),
//!     ListenerOptions::default(),
//! );
//!
//! // Re-run whenever `count` changes
//! let count = state.prop("count");
//! let effect = Effect::new(move || println!("count = {:?}", count.get()));
//!
//! state.prop("count").set(1)?;
//! ```

pub mod error;
pub mod graph;
pub mod observable;
pub mod reactive;

pub use error::{Error, Result};
pub use graph::{NodeId, NodeKind, PathKey, ID_FIELDS, PATH_DELIMITER, ROOT_PATH};
pub use observable::{
    is_observable, lock_edits, merge_into_observable, merge_into_value, observable,
    observable_from_future, on_equals, on_has_value, on_true, MaybeObservable, Observable,
    ObservableOptions, OnValue, Read, SafeMode, DATE_MODIFIED_KEY,
};
pub use reactive::{
    batch, begin_batch, computed, end_batch, truthy, untrack, when, when_ready, Change, ChangePath,
    Computed, Disposer, Effect, Event, ListenerMode, ListenerOptions, TrackingContext, WhenOptions,
};
