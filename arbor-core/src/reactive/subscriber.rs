//! Listener types for the change-propagation engine.
//!
//! A listener is a callback registered on one node, together with the mode
//! that decides which changes it cares about.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::change::Change;
use crate::graph::NodeIndex;
use crate::observable::Root;

/// Unique identifier for a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Which changes a listener is notified about.
///
/// Changes carry a level: `-1` for a freshly created value, `0` when the
/// node's own value changed, and one more for every hop the notification
/// travelled up from the changed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerMode {
    /// Any change at or below the node.
    #[default]
    All,

    /// Only changes to the node's own value, not pass-through changes of
    /// descendants.
    Shallow,

    /// Like `Shallow`, but only when the change resized a collection.
    Optimized,
}

impl ListenerMode {
    /// Decide whether a listener in this mode fires.
    pub fn fires(self, level: i32, resized: bool) -> bool {
        match self {
            ListenerMode::All => true,
            ListenerMode::Shallow => level <= 0,
            ListenerMode::Optimized => resized && level <= 0,
        }
    }
}

/// Options for [`Observable::on_change`](crate::Observable::on_change).
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenerOptions {
    pub shallow: bool,
    pub optimized: bool,
    /// Invoke the callback once with the current value right after
    /// subscribing.
    pub run_immediately: bool,
}

impl ListenerOptions {
    pub fn shallow() -> Self {
        Self {
            shallow: true,
            ..Self::default()
        }
    }

    pub fn optimized() -> Self {
        Self {
            optimized: true,
            ..Self::default()
        }
    }

    pub fn run_immediately(mut self) -> Self {
        self.run_immediately = true;
        self
    }

    pub fn mode(&self) -> ListenerMode {
        if self.optimized {
            ListenerMode::Optimized
        } else if self.shallow {
            ListenerMode::Shallow
        } else {
            ListenerMode::All
        }
    }
}

type Callback = Box<dyn Fn(&Change) + Send + Sync>;

/// A registered listener.
pub struct Listener {
    id: ListenerId,
    mode: ListenerMode,
    callback: Callback,
    active: AtomicBool,
}

impl Listener {
    pub(crate) fn new<F>(mode: ListenerMode, callback: F) -> Self
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        Self {
            id: ListenerId::new(),
            mode,
            callback: Box::new(callback),
            active: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn mode(&self) -> ListenerMode {
        self.mode
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Invoke the callback unless the listener was disposed.
    pub(crate) fn notify(&self, change: &Change) {
        if self.is_active() {
            (self.callback)(change);
        }
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Handle returned by a subscription.
///
/// Calling [`dispose`](Disposer::dispose) removes the listener. Disposal is
/// idempotent. Dropping the handle leaves the listener registered.
#[derive(Clone)]
pub struct Disposer {
    root: Weak<Root>,
    index: NodeIndex,
    id: ListenerId,
    listener: Weak<Listener>,
}

impl Disposer {
    pub(crate) fn new(root: &Arc<Root>, index: NodeIndex, listener: &Arc<Listener>) -> Self {
        Self {
            root: Arc::downgrade(root),
            index,
            id: listener.id(),
            listener: Arc::downgrade(listener),
        }
    }

    /// The id of the listener this handle controls.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener. Notifications already queued for it are dropped.
    pub fn dispose(&self) {
        if let Some(listener) = self.listener.upgrade() {
            listener.deactivate();
        }
        if let Some(root) = self.root.upgrade() {
            root.graph.lock().remove_listener(self.index, self.id);
        }
    }
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_ids_are_unique() {
        let id1 = ListenerId::new();
        let id2 = ListenerId::new();
        let id3 = ListenerId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn mode_firing_rules() {
        assert!(ListenerMode::All.fires(3, false));

        assert!(ListenerMode::Shallow.fires(-1, false));
        assert!(ListenerMode::Shallow.fires(0, false));
        assert!(!ListenerMode::Shallow.fires(1, true));

        assert!(ListenerMode::Optimized.fires(0, true));
        assert!(!ListenerMode::Optimized.fires(0, false));
        assert!(!ListenerMode::Optimized.fires(1, true));
    }

    #[test]
    fn options_pick_the_mode() {
        assert_eq!(ListenerOptions::default().mode(), ListenerMode::All);
        assert_eq!(ListenerOptions::shallow().mode(), ListenerMode::Shallow);
        assert_eq!(ListenerOptions::optimized().mode(), ListenerMode::Optimized);
        assert!(ListenerOptions::shallow().run_immediately().run_immediately);
    }
}
