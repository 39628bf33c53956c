//! # Actions and Patches
//!
//! A public mutation can touch many fields (attaching a relationship writes
//! the forward field, the index, maybe other models). The tracker folds such
//! a burst into one notification and one [`Patch`]: observers see the state
//! before or after the action, never a half-applied one.

use super::RefId;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// One completed action on a model.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub model: RefId,
    /// Snapshot before the action.
    pub old: Value,
    /// Snapshot after the action.
    pub new: Value,
}

pub type PatchListener = Arc<dyn Fn(&Patch) + Send + Sync>;

/// Handle returned by [`Model::on_patch`](crate::model::Model::on_patch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatchListenerId(u64);

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct Batch {
    depth: usize,
    dirty: bool,
    before: Option<Value>,
}

pub(crate) struct PatchTracker {
    batch: Mutex<Batch>,
    revision: watch::Sender<u64>,
    listeners: Mutex<Vec<(PatchListenerId, PatchListener)>>,
}

/// What [`PatchTracker::end`] asks the model to do once the outermost
/// action finishes.
pub(crate) enum Flush {
    Nothing,
    Notify { before: Option<Value> },
}

impl PatchTracker {
    pub(crate) fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            batch: Mutex::new(Batch::default()),
            revision,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Opens an action. Returns true for the outermost one, in which case
    /// the caller should hand over a "before" snapshot if anyone listens.
    pub(crate) fn begin(&self) -> bool {
        let mut batch = self.batch.lock();
        batch.depth += 1;
        batch.depth == 1
    }

    pub(crate) fn wants_patches(&self) -> bool {
        !self.listeners.lock().is_empty()
    }

    pub(crate) fn set_before(&self, snapshot: Value) {
        self.batch.lock().before = Some(snapshot);
    }

    pub(crate) fn mark_changed(&self) {
        self.batch.lock().dirty = true;
    }

    pub(crate) fn end(&self) -> Flush {
        let mut batch = self.batch.lock();
        batch.depth = batch.depth.saturating_sub(1);
        if batch.depth > 0 {
            return Flush::Nothing;
        }
        let before = batch.before.take();
        if !std::mem::take(&mut batch.dirty) {
            return Flush::Nothing;
        }
        Flush::Notify { before }
    }

    /// Bumps the revision and calls the listeners. Must run without any
    /// model or collection lock held.
    pub(crate) fn notify(&self, patch: Option<Patch>) {
        self.revision.send_modify(|rev| *rev += 1);
        if let Some(patch) = patch {
            let listeners: Vec<PatchListener> = self
                .listeners
                .lock()
                .iter()
                .map(|(_, l)| l.clone())
                .collect();
            for listener in listeners {
                listener(&patch);
            }
        }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub(crate) fn add_listener(&self, listener: PatchListener) -> PatchListenerId {
        let id = PatchListenerId(NEXT_LISTENER.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().push((id, listener));
        id
    }

    pub(crate) fn remove_listener(&self, id: PatchListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_actions_flush_once() {
        let tracker = PatchTracker::new();
        let rx = tracker.subscribe();

        assert!(tracker.begin());
        assert!(!tracker.begin());
        tracker.mark_changed();
        assert!(matches!(tracker.end(), Flush::Nothing));
        tracker.mark_changed();
        assert!(matches!(tracker.end(), Flush::Notify { .. }));
        tracker.notify(None);

        assert_eq!(*rx.borrow(), 1);
    }

    #[test]
    fn clean_actions_do_not_notify() {
        let tracker = PatchTracker::new();
        tracker.begin();
        assert!(matches!(tracker.end(), Flush::Nothing));
    }
}
