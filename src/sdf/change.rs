//! Change notification for layer edits.
//!
//! Every layer edit records [`ChangeEntry`] values. Outside a
//! [`ChangeBlock`] they are delivered when the edit finishes; inside one
//! they accumulate (per thread) until the outermost block drops. Listeners
//! are always called with no layer lock held.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tracing::trace;

use super::LayerHandle;
use crate::util::Path;

/// One recorded edit.
#[derive(Clone, Debug, PartialEq)]
pub enum ChangeEntry {
    /// A spec was created.
    SpecAdded(Path),
    /// A spec and its subtree were removed.
    SpecRemoved(Path),
    /// A spec subtree moved.
    SpecMoved { from: Path, to: Path },
    /// A field was set or erased.
    FieldChanged { path: Path, field: String },
}

impl ChangeEntry {
    /// Paths touched by this entry.
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            Self::SpecAdded(p) | Self::SpecRemoved(p) => vec![p],
            Self::SpecMoved { from, to } => vec![from, to],
            Self::FieldChanged { path, .. } => vec![path],
        }
    }
}

/// All entries recorded for one layer in one delivery.
#[derive(Clone)]
pub struct LayerChanges {
    pub layer: LayerHandle,
    pub entries: Vec<ChangeEntry>,
}

impl std::fmt::Debug for LayerChanges {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerChanges")
            .field("layer", &self.layer.identifier())
            .field("entries", &self.entries)
            .finish()
    }
}

/// Receiver of layer change deliveries.
pub trait LayerListener: Send + Sync {
    /// Called once per delivery with the changes of every layer this
    /// listener is registered on.
    fn layers_did_change(&self, changes: &[LayerChanges]);
}

/// Handle returned by listener registration, used to revoke it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerKey(u64);

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

impl ListenerKey {
    fn next() -> Self {
        Self(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

/// Listeners registered on one layer.
#[derive(Default)]
pub(crate) struct ListenerList {
    entries: Vec<(ListenerKey, Weak<dyn LayerListener>)>,
}

impl ListenerList {
    pub(crate) fn register(&mut self, listener: Weak<dyn LayerListener>) -> ListenerKey {
        let key = ListenerKey::next();
        // drop registrations whose listener is gone
        self.entries.retain(|(_, l)| l.strong_count() > 0);
        self.entries.push((key, listener));
        key
    }

    pub(crate) fn revoke(&mut self, key: ListenerKey) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| *k != key);
        before != self.entries.len()
    }

    pub(crate) fn live(&self) -> Vec<Arc<dyn LayerListener>> {
        self.entries.iter().filter_map(|(_, l)| l.upgrade()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.iter().filter(|(_, l)| l.strong_count() > 0).count()
    }
}

// ============================================================================
// Change blocks
// ============================================================================

#[derive(Default)]
struct Pending {
    depth: usize,
    changes: Vec<LayerChanges>,
}

thread_local! {
    static PENDING: RefCell<Pending> = RefCell::new(Pending::default());
}

/// Batches change delivery until dropped.
///
/// Blocks nest; only the outermost block delivers. Not `Send`: a block
/// belongs to the thread that opened it.
pub struct ChangeBlock {
    _not_send: PhantomData<*const ()>,
}

impl ChangeBlock {
    /// Open a change block.
    pub fn new() -> Self {
        PENDING.with(|p| p.borrow_mut().depth += 1);
        Self { _not_send: PhantomData }
    }

    /// Check if a block is open on this thread.
    pub fn is_active() -> bool {
        PENDING.with(|p| p.borrow().depth > 0)
    }
}

impl Default for ChangeBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ChangeBlock {
    fn drop(&mut self) {
        let ready = PENDING.with(|p| {
            let mut p = p.borrow_mut();
            p.depth = p.depth.saturating_sub(1);
            if p.depth == 0 {
                std::mem::take(&mut p.changes)
            } else {
                Vec::new()
            }
        });
        if !ready.is_empty() {
            deliver(ready);
        }
    }
}

/// Record an entry for `layer`. Must be called inside a change block.
pub(crate) fn record(layer: &LayerHandle, entry: ChangeEntry) {
    PENDING.with(|p| {
        let mut p = p.borrow_mut();
        if let Some(existing) = p.changes.iter_mut().find(|c| Arc::ptr_eq(&c.layer, layer)) {
            existing.entries.push(entry);
        } else {
            p.changes.push(LayerChanges {
                layer: Arc::clone(layer),
                entries: vec![entry],
            });
        }
    });
}

fn deliver(changes: Vec<LayerChanges>) {
    let mut groups: Vec<(Arc<dyn LayerListener>, Vec<LayerChanges>)> = Vec::new();
    for change in &changes {
        for listener in change.layer.live_listeners() {
            let ptr = Arc::as_ptr(&listener) as *const ();
            match groups.iter_mut().find(|(l, _)| Arc::as_ptr(l) as *const () == ptr) {
                Some((_, list)) => list.push(change.clone()),
                None => groups.push((listener, vec![change.clone()])),
            }
        }
    }
    trace!(layers = changes.len(), listeners = groups.len(), "delivering layer changes");
    for (listener, list) in groups {
        listener.layers_did_change(&list);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdf::{Layer, Specifier};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Vec<ChangeEntry>>>,
    }

    impl LayerListener for Recorder {
        fn layers_did_change(&self, changes: &[LayerChanges]) {
            let entries = changes.iter().flat_map(|c| c.entries.clone()).collect();
            self.calls.lock().push(entries);
        }
    }

    fn p(s: &str) -> Path {
        Path::parse(s).expect("valid path")
    }

    #[test]
    fn test_immediate_delivery_outside_block() {
        let layer = Layer::anonymous("changes");
        let recorder = Arc::new(Recorder::default());
        let weak: Weak<dyn LayerListener> = Arc::downgrade(&recorder) as Weak<dyn LayerListener>;
        layer.register_listener(weak);

        layer.create_prim_spec(&p("/A"), Specifier::Def).expect("create");
        assert_eq!(recorder.calls.lock().len(), 1);
    }

    #[test]
    fn test_block_batches_and_revoke_stops_delivery() {
        let layer = Layer::anonymous("changes");
        let recorder = Arc::new(Recorder::default());
        let key = layer.register_listener(Arc::downgrade(&recorder) as Weak<dyn LayerListener>);
        {
            let _block = ChangeBlock::new();
            layer.create_prim_spec(&p("/A"), Specifier::Def).expect("create");
            layer.create_prim_spec(&p("/B"), Specifier::Def).expect("create");
            assert!(ChangeBlock::is_active());
            assert!(recorder.calls.lock().is_empty());
        }
        {
            let calls = recorder.calls.lock();
            assert_eq!(calls.len(), 1);
            assert!(calls[0].contains(&ChangeEntry::SpecAdded(p("/A"))));
            assert!(calls[0].contains(&ChangeEntry::SpecAdded(p("/B"))));
        }

        assert!(layer.revoke_listener(key));
        layer.create_prim_spec(&p("/C"), Specifier::Def).expect("create");
        assert_eq!(recorder.calls.lock().len(), 1);
    }
}
