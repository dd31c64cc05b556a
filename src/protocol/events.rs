//! Event triggers and the continuation bridge.
//!
//! A handler that performs an action subject to external veto (chat, block
//! changes) raises an event trigger toward the scripting engine and attaches
//! a deferred default action under a fresh event id. The engine's resolution
//! message races against the attachment: the engine may resolve before the
//! handler has stored its continuation. The bridge reconciles both orderings
//! so that the default action runs exactly once when the event is not
//! suppressed, and never when it is.

use std::collections::HashMap;

use crate::core::types::BlockPos;

/// Deferred default action for one event trigger. Captures cloned peer
/// handles only, never a borrow of the session.
pub type Continuation = Box<dyn FnOnce() + Send>;

/// Payload of an event trigger sent to the scripting engine for
/// adjudication.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    PlayerChat { message: String },
    PlayerChangeBlock { pos: BlockPos, block_id: u16 },
}

/// Order-independent matcher between event resolutions and locally attached
/// continuations.
///
/// At any moment an event id lives in at most one of the two maps: `pending`
/// holds continuations waiting for a resolution, `early` holds resolutions
/// that arrived before their continuation was attached. Consuming an entry
/// removes it, so each id is resolved at most once.
#[derive(Default)]
pub struct ContinuationBridge {
    next_id: u64,
    pending: HashMap<u64, Continuation>,
    early: HashMap<u64, bool>,
}

impl ContinuationBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh event id for a trigger. Ids are never reused within
    /// a session.
    pub fn next_event_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Attaches the deferred default action for `event_id`. If the
    /// resolution already arrived, the action is invoked now unless it was
    /// suppressed; otherwise it is stored until the resolution comes in.
    pub fn attach(&mut self, event_id: u64, action: Continuation) {
        match self.early.remove(&event_id) {
            Some(suppressed) => {
                if !suppressed {
                    action();
                }
            }
            None => {
                self.pending.insert(event_id, action);
            }
        }
    }

    /// Applies a resolution from the scripting engine. If the continuation
    /// is already attached it is consumed (and invoked unless suppressed);
    /// otherwise the resolution is recorded for a later attachment.
    pub fn resolve(&mut self, event_id: u64, suppressed: bool) {
        match self.pending.remove(&event_id) {
            Some(action) => {
                if !suppressed {
                    action();
                }
            }
            None => {
                self.early.insert(event_id, suppressed);
            }
        }
    }

    /// Number of continuations still waiting for a resolution.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter_action(counter: &Arc<AtomicUsize>) -> Continuation {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn attach_then_resolve_runs_once() {
        let mut bridge = ContinuationBridge::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let id = bridge.next_event_id();
        bridge.attach(id, counter_action(&runs));
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        bridge.resolve(id, false);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.pending_len(), 0);
    }

    #[test]
    fn resolve_then_attach_runs_once() {
        let mut bridge = ContinuationBridge::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let id = bridge.next_event_id();
        bridge.resolve(id, false);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        bridge.attach(id, counter_action(&runs));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.pending_len(), 0);
    }

    #[test]
    fn suppressed_never_runs_either_ordering() {
        let runs = Arc::new(AtomicUsize::new(0));

        let mut bridge = ContinuationBridge::new();
        let id = bridge.next_event_id();
        bridge.attach(id, counter_action(&runs));
        bridge.resolve(id, true);

        let id = bridge.next_event_id();
        bridge.resolve(id, true);
        bridge.attach(id, counter_action(&runs));

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(bridge.pending_len(), 0);
    }

    #[test]
    fn event_ids_are_unique_and_independent() {
        let mut bridge = ContinuationBridge::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let a = bridge.next_event_id();
        let b = bridge.next_event_id();
        assert_ne!(a, b);

        bridge.attach(a, counter_action(&runs));
        bridge.attach(b, counter_action(&runs));
        bridge.resolve(b, true);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        bridge.resolve(a, false);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
