//! Tracking Context
//!
//! The tracking context records which nodes a computation reads, so that the
//! computation can later subscribe to exactly those nodes.
//!
//! # Implementation
//!
//! We use a thread-local stack of tracking frames. Beginning a tracked
//! computation pushes an empty frame; every instrumented read inserts into
//! the top frame; ending the computation pops the frame and hands its
//! contents back. Reads performed while no frame is active are plain,
//! untracked reads.
//!
//! The stack supports nested tracked computations (an effect created inside
//! another effect). Reads always go to the innermost frame.
//!
//! Each frame remembers the [`untrack`] depth it was opened at. Reads are
//! recorded only while the depth has not grown past that baseline, so a
//! frame opened inside `untrack` still records its own reads.

use std::cell::{Cell, RefCell};

use indexmap::IndexMap;

use crate::graph::NodeId;
use crate::Observable;

thread_local! {
    static TRACKING_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
    static UNTRACKED_DEPTH: Cell<usize> = const { Cell::new(0) };
}

struct Frame {
    untracked: usize,
    nodes: IndexMap<NodeId, TrackingNode>,
}

/// One node read during a tracked computation.
#[derive(Debug, Clone)]
pub struct TrackingNode {
    /// The node that was read.
    pub node: Observable,

    /// Whether the node's value itself was read, as opposed to only its keys
    /// or length.
    pub value_read: bool,

    /// Whether only shallow interest was recorded. Sticky: once a pass reads
    /// a node shallowly the entry stays shallow.
    pub shallow: bool,

    /// How many times the node was read during the pass.
    pub num: u32,
}

/// The dependency set of one tracked computation, in first-read order.
#[derive(Debug, Clone, Default)]
pub struct TrackedNodes {
    nodes: IndexMap<NodeId, TrackingNode>,
}

impl TrackedNodes {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&TrackingNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, node: &Observable) -> bool {
        self.nodes.contains_key(&node.id())
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackingNode> {
        self.nodes.values()
    }
}

impl IntoIterator for TrackedNodes {
    type Item = TrackingNode;
    type IntoIter = indexmap::map::IntoValues<NodeId, TrackingNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_values()
    }
}

/// Guard for one tracked computation.
///
/// Dropping the guard without calling [`end`](TrackingContext::end) discards
/// the frame, which keeps the stack balanced if the computation panics.
pub struct TrackingContext {
    depth: usize,
    ended: bool,
}

impl TrackingContext {
    /// Begin tracking reads on this thread.
    ///
    /// A new frame records reads even when opened inside [`untrack`].
    pub fn begin() -> Self {
        let untracked = UNTRACKED_DEPTH.with(Cell::get);
        let depth = TRACKING_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(Frame {
                untracked,
                nodes: IndexMap::new(),
            });
            stack.len()
        });

        Self {
            depth,
            ended: false,
        }
    }

    /// Stop tracking and return everything that was read.
    pub fn end(mut self) -> TrackedNodes {
        self.ended = true;
        let nodes = TRACKING_STACK
            .with(|stack| stack.borrow_mut().pop())
            .map(|frame| frame.nodes)
            .unwrap_or_default();
        TrackedNodes { nodes }
    }

    /// Check whether reads on this thread are currently being recorded.
    pub fn is_active() -> bool {
        let untracked = UNTRACKED_DEPTH.with(Cell::get);
        TRACKING_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .is_some_and(|frame| untracked <= frame.untracked)
        })
    }

    /// Record a read of `node` in the innermost frame.
    ///
    /// Repeat reads bump the counter of the existing entry.
    pub fn record_read(node: &Observable, shallow: bool, value_read: bool) {
        if !Self::is_active() {
            return;
        }

        TRACKING_STACK.with(|stack| {
            if let Some(frame) = stack.borrow_mut().last_mut() {
                frame
                    .nodes
                    .entry(node.id())
                    .and_modify(|existing| {
                        existing.shallow |= shallow;
                        existing.value_read |= value_read;
                        existing.num += 1;
                    })
                    .or_insert_with(|| TrackingNode {
                        node: node.clone(),
                        value_read,
                        shallow,
                        num: 1,
                    });
            }
        });
    }
}

impl Drop for TrackingContext {
    fn drop(&mut self) {
        if self.ended {
            return;
        }

        TRACKING_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            debug_assert_eq!(
                stack.len(),
                self.depth,
                "TrackingContext mismatch: expected depth {}, got {}",
                self.depth,
                stack.len()
            );
            stack.pop();
        });
    }
}

/// Run `f` without recording any reads.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    struct Restore;

    impl Drop for Restore {
        fn drop(&mut self) {
            UNTRACKED_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
        }
    }

    UNTRACKED_DEPTH.with(|depth| depth.set(depth.get() + 1));
    let _restore = Restore;
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable;
    use serde_json::json;

    #[test]
    fn context_is_scoped() {
        assert!(!TrackingContext::is_active());

        {
            let _ctx = TrackingContext::begin();
            assert!(TrackingContext::is_active());
        }

        // Context should be cleaned up after drop
        assert!(!TrackingContext::is_active());
    }

    #[test]
    fn repeat_reads_increment_the_counter() {
        let obs = observable(json!({ "a": 1 }));
        let a = obs.prop("a");

        let ctx = TrackingContext::begin();
        TrackingContext::record_read(&a, false, true);
        TrackingContext::record_read(&a, true, false);
        TrackingContext::record_read(&a, false, true);
        let tracked = ctx.end();

        assert_eq!(tracked.len(), 1);
        let entry = tracked.get(a.id()).unwrap();
        assert_eq!(entry.num, 3);
        assert!(entry.shallow);
        assert!(entry.value_read);
    }

    #[test]
    fn untrack_suppresses_recording() {
        let obs = observable(json!({ "a": 1 }));

        let ctx = TrackingContext::begin();
        untrack(|| {
            assert!(!TrackingContext::is_active());
            TrackingContext::record_read(&obs, false, true);
        });
        assert!(TrackingContext::is_active());
        let tracked = ctx.end();

        assert!(tracked.is_empty());
    }

    #[test]
    fn nested_contexts_record_separately() {
        let obs = observable(json!({ "a": 1, "b": 2 }));
        let a = obs.prop("a");
        let b = obs.prop("b");

        let outer = TrackingContext::begin();
        TrackingContext::record_read(&a, false, true);

        let inner = TrackingContext::begin();
        TrackingContext::record_read(&b, false, true);
        let inner_nodes = inner.end();

        let outer_nodes = outer.end();

        assert!(inner_nodes.contains(&b));
        assert!(!inner_nodes.contains(&a));
        assert!(outer_nodes.contains(&a));
        assert!(!outer_nodes.contains(&b));
    }

    #[test]
    fn frames_opened_while_untracked_still_record() {
        let obs = observable(json!({ "a": 1 }));

        let tracked = untrack(|| {
            let ctx = TrackingContext::begin();
            TrackingContext::record_read(&obs, false, true);
            let tracked = ctx.end();
            assert!(!TrackingContext::is_active());
            tracked
        });

        assert_eq!(tracked.len(), 1);
    }

    #[test]
    fn frames_outlive_the_untrack_scope_they_began_in() {
        let obs = observable(json!({ "a": 1 }));

        let ctx = untrack(TrackingContext::begin);
        assert!(TrackingContext::is_active());
        TrackingContext::record_read(&obs, false, true);

        untrack(|| {
            assert!(!TrackingContext::is_active());
            TrackingContext::record_read(&obs.prop("a"), false, true);
        });

        let tracked = ctx.end();
        assert_eq!(tracked.len(), 1);
        assert!(tracked.contains(&obs));
        assert!(!TrackingContext::is_active());
    }
}
