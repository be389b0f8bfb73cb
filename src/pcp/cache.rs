//! Prim index cache for one stage.
//!
//! A cache owns the stage's root layer stack, every other layer stack
//! reached through arcs, and the prim indices computed so far. It is not
//! invalidated incrementally: a layer change rebuilds the cache.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Weak};

use tracing::debug;

use super::{LayerStack, LayerStackHandle, LayerStackIdentifier, PrimIndex};
use crate::sdf::{Layer, LayerHandle, LayerListener, LayerRegistry, ListenerKey};
use crate::util::{CompositionConfig, InitialLoadSet, Path};

pub(crate) type IndexKey = (LayerStackIdentifier, Path);

// ============================================================================
// Payload inclusion
// ============================================================================

/// Which prims have their payloads included.
///
/// The deepest explicit load or unload at or above a path decides; paths
/// without one follow the initial load set.
#[derive(Clone, Debug, PartialEq)]
pub struct PayloadSet {
    load_all: bool,
    included: BTreeSet<Path>,
    excluded: BTreeSet<Path>,
}

impl PayloadSet {
    pub fn new(initial: InitialLoadSet) -> Self {
        Self {
            load_all: initial == InitialLoadSet::LoadAll,
            included: BTreeSet::new(),
            excluded: BTreeSet::new(),
        }
    }

    /// Include payloads at and below `path`.
    pub fn load(&mut self, path: &Path) {
        self.included.retain(|p| !p.has_prefix(path));
        self.excluded.retain(|p| !p.has_prefix(path));
        self.included.insert(path.clone());
    }

    /// Exclude payloads at and below `path`.
    pub fn unload(&mut self, path: &Path) {
        self.included.retain(|p| !p.has_prefix(path));
        self.excluded.retain(|p| !p.has_prefix(path));
        self.excluded.insert(path.clone());
    }

    /// Check if the payloads of `path` are included.
    pub fn includes(&self, path: &Path) -> bool {
        let deepest = |set: &BTreeSet<Path>| {
            set.iter()
                .filter(|p| path.has_prefix(p))
                .map(|p| p.elements().len())
                .max()
        };
        match (deepest(&self.included), deepest(&self.excluded)) {
            (Some(i), Some(e)) => i > e,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => self.load_all,
        }
    }

    /// Inclusion for indices outside the root layer stack.
    #[inline]
    pub fn default_inclusion(&self) -> bool {
        self.load_all
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Prim indices and layer stacks used by one stage.
pub struct PcpCache {
    pub(super) registry: Arc<LayerRegistry>,
    pub(super) config: CompositionConfig,
    pub(super) root_stack: LayerStackHandle,
    pub(super) stacks: HashMap<LayerStackIdentifier, LayerStackHandle>,
    pub(super) indices: HashMap<IndexKey, Arc<PrimIndex>>,
    pub(super) in_progress: HashSet<IndexKey>,
    pub(super) payloads: PayloadSet,
    pub(super) variant_fallbacks: BTreeMap<String, Vec<String>>,
    populated: BTreeSet<Path>,
}

impl PcpCache {
    /// Create a cache and compose its root layer stack.
    pub fn new(
        registry: Arc<LayerRegistry>,
        root_layer: &LayerHandle,
        session_layer: Option<&LayerHandle>,
        config: CompositionConfig,
        variant_fallbacks: BTreeMap<String, Vec<String>>,
        payloads: PayloadSet,
    ) -> Self {
        let root_stack = LayerStack::compute(root_layer, session_layer, &registry, &config);
        let mut stacks = HashMap::new();
        stacks.insert(root_stack.identifier().clone(), Arc::clone(&root_stack));
        Self {
            registry,
            config,
            root_stack,
            stacks,
            indices: HashMap::new(),
            in_progress: HashSet::new(),
            payloads,
            variant_fallbacks,
            populated: BTreeSet::new(),
        }
    }

    pub fn layer_stack(&self) -> &LayerStackHandle {
        &self.root_stack
    }

    pub fn registry(&self) -> &Arc<LayerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &CompositionConfig {
        &self.config
    }

    pub fn payloads(&self) -> &PayloadSet {
        &self.payloads
    }

    pub fn variant_fallbacks(&self) -> &BTreeMap<String, Vec<String>> {
        &self.variant_fallbacks
    }

    /// Layer stack rooted at `layer` (no session layer), composed on demand.
    pub fn layer_stack_for(&mut self, layer: &LayerHandle) -> LayerStackHandle {
        let id = LayerStackIdentifier::new(layer, None);
        if let Some(stack) = self.stacks.get(&id) {
            return Arc::clone(stack);
        }
        let stack = LayerStack::compute(layer, None, &self.registry, &self.config);
        self.stacks.insert(id, Arc::clone(&stack));
        stack
    }

    /// Every layer stack composed so far.
    pub fn layer_stacks(&self) -> impl Iterator<Item = &LayerStackHandle> {
        self.stacks.values()
    }

    /// Every layer used by any composed layer stack, deduplicated.
    pub fn used_layers(&self) -> Vec<LayerHandle> {
        let mut seen: HashSet<usize> = HashSet::new();
        let mut layers = Vec::new();
        let mut ids: Vec<&LayerStackIdentifier> = self.stacks.keys().collect();
        ids.sort();
        for id in ids {
            for layer in self.stacks[id].layers() {
                if seen.insert(Arc::as_ptr(layer) as usize) {
                    layers.push(Arc::clone(layer));
                }
            }
        }
        layers
    }

    /// Compute (or fetch) the index of `path` in the root layer stack.
    pub fn compute_prim_index(&mut self, path: &Path) -> Option<Arc<PrimIndex>> {
        let stack = Arc::clone(&self.root_stack);
        self.compute_index(&stack, path)
    }

    /// Index of `path` in the root layer stack, if already computed.
    pub fn find_prim_index(&self, path: &Path) -> Option<Arc<PrimIndex>> {
        self.indices
            .get(&(self.root_stack.identifier().clone(), path.clone()))
            .cloned()
    }

    /// Compute indices for every prim reachable from the pseudo-root.
    pub fn populate(&mut self) {
        let mut queue = vec![Path::root()];
        while let Some(path) = queue.pop() {
            let Some(index) = self.compute_prim_index(&path) else {
                continue;
            };
            if !path.is_absolute_root() {
                self.populated.insert(path.clone());
            }
            for name in index.child_names().iter().rev() {
                queue.push(path.append_child(name));
            }
        }
        debug!(
            stack = %self.root_stack.identifier(),
            prims = self.populated.len(),
            indices = self.indices.len(),
            "populated prim indices"
        );
    }

    /// Stage prim paths found by `populate`, in path order.
    pub fn populated_paths(&self) -> impl Iterator<Item = &Path> {
        self.populated.iter()
    }

    /// Check if `path` is a populated stage prim.
    pub fn is_populated(&self, path: &Path) -> bool {
        path.is_absolute_root() || self.populated.contains(path)
    }

    /// Stage prims whose composition consulted `site` in `layer`.
    pub fn find_site_dependencies(&self, layer: &Layer, site: &Path) -> Vec<super::SiteDependency> {
        super::dependencies::find_site_dependencies(self, layer, site)
    }
}

impl std::fmt::Debug for PcpCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcpCache")
            .field("stack", self.root_stack.identifier())
            .field("indices", &self.indices.len())
            .field("populated", &self.populated.len())
            .finish()
    }
}

// ============================================================================
// Listener registrations
// ============================================================================

/// Listener registrations held on a set of layers, revoked on drop.
#[derive(Default)]
pub struct ListenerRegistrations {
    entries: Vec<(Weak<Layer>, ListenerKey)>,
}

impl ListenerRegistrations {
    /// Register `listener` on every layer in `layers` not yet registered,
    /// and revoke registrations on layers no longer listed.
    pub fn sync(&mut self, layers: &[LayerHandle], listener: &Weak<dyn LayerListener>) {
        let wanted: HashSet<usize> = layers.iter().map(|l| Arc::as_ptr(l) as usize).collect();
        self.entries.retain(|(layer, key)| match layer.upgrade() {
            Some(layer) if wanted.contains(&(Arc::as_ptr(&layer) as usize)) => true,
            Some(layer) => {
                layer.revoke_listener(*key);
                false
            }
            None => false,
        });
        for layer in layers {
            let known = self
                .entries
                .iter()
                .any(|(l, _)| std::ptr::eq(l.as_ptr(), Arc::as_ptr(layer)));
            if !known {
                let key = layer.register_listener(listener.clone());
                self.entries.push((Arc::downgrade(layer), key));
            }
        }
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|(l, _)| l.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Revoke every registration.
    pub fn clear(&mut self) {
        for (layer, key) in self.entries.drain(..) {
            if let Some(layer) = layer.upgrade() {
                layer.revoke_listener(key);
            }
        }
    }
}

impl Drop for ListenerRegistrations {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdf::LayerChanges;

    fn p(s: &str) -> Path {
        Path::parse(s).expect("valid path")
    }

    #[test]
    fn test_payload_set_nearest_rule() {
        let mut set = PayloadSet::new(InitialLoadSet::LoadNone);
        assert!(!set.includes(&p("/A")));
        set.load(&p("/A"));
        assert!(set.includes(&p("/A/B")));
        set.unload(&p("/A/B"));
        assert!(!set.includes(&p("/A/B/C")));
        assert!(set.includes(&p("/A/D")));
        set.load(&p("/A"));
        assert!(set.includes(&p("/A/B")));
        assert!(PayloadSet::new(InitialLoadSet::LoadAll).includes(&p("/X")));
    }

    struct Nop;

    impl LayerListener for Nop {
        fn layers_did_change(&self, _changes: &[LayerChanges]) {}
    }

    #[test]
    fn test_listener_registrations_sync_and_drop() {
        let a = Layer::anonymous("a");
        let b = Layer::anonymous("b");
        let listener: Arc<dyn LayerListener> = Arc::new(Nop);
        let weak = Arc::downgrade(&listener);

        let mut regs = ListenerRegistrations::default();
        regs.sync(&[Arc::clone(&a), Arc::clone(&b)], &weak);
        assert_eq!(regs.len(), 2);
        assert_eq!(a.listener_count(), 1);

        regs.sync(&[Arc::clone(&b)], &weak);
        assert_eq!(a.listener_count(), 0);
        assert_eq!(b.listener_count(), 1);

        drop(regs);
        assert_eq!(b.listener_count(), 0);
    }
}
