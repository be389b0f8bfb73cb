//! Stages: a composed view of a root layer stack.
//!
//! A [`Stage`] owns a [`PcpCache`] populated from its root (and session)
//! layer and listens to every layer the cache uses. Any delivered layer
//! change rebuilds the cache and sends an [`ObjectsChanged`] notice to the
//! stage's notice listeners.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, trace};

use super::notice::{NoticeKey, ObjectsChanged};
use super::resync::{compute_notice, PendingEditInfo};
use super::{Attribute, Prim};
use crate::pcp::{LayerStackHandle, ListenerRegistrations, PayloadSet, PcpCache, PrimIndex};
use crate::sdf::{LayerChanges, LayerHandle, LayerListener, LayerOffset, LayerRegistry, Specifier};
use crate::util::{Error, InterpolationType, Path, Result, StageOptions};

type NoticeHandler = Arc<dyn Fn(&ObjectsChanged) + Send + Sync>;

/// Where authoring through stage objects lands.
#[derive(Clone, Debug)]
pub struct EditTarget {
    layer: LayerHandle,
    offset: LayerOffset,
}

impl EditTarget {
    /// Target `layer`, whose times map to stage time through `offset`.
    pub fn new(layer: LayerHandle, offset: LayerOffset) -> Self {
        Self { layer, offset }
    }

    /// Layer that receives authored opinions.
    pub fn layer(&self) -> &LayerHandle {
        &self.layer
    }

    /// Layer-to-stage time offset.
    pub fn offset(&self) -> LayerOffset {
        self.offset
    }
}

struct StageState {
    cache: PcpCache,
    edit_target: EditTarget,
    interpolation: InterpolationType,
}

pub(crate) struct StageInner {
    root_layer: LayerHandle,
    session_layer: Option<LayerHandle>,
    registry: Arc<LayerRegistry>,
    options: StageOptions,
    state: RwLock<StageState>,
    notice_listeners: Mutex<Vec<(NoticeKey, NoticeHandler)>>,
    registrations: Mutex<ListenerRegistrations>,
    pending_edit: Mutex<Option<PendingEditInfo>>,
    self_ref: Weak<StageInner>,
}

/// A composed stage. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Stage {
    inner: Arc<StageInner>,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("root_layer", &self.inner.root_layer.identifier())
            .field("session_layer", &self.inner.session_layer.as_ref().map(|l| l.identifier()))
            .finish()
    }
}

impl Stage {
    // ========================================================================
    // Opening
    // ========================================================================

    /// Open a stage on `root` with default options.
    pub fn open(registry: &Arc<LayerRegistry>, root: &LayerHandle) -> Result<Stage> {
        Self::open_with_options(registry, root, StageOptions::default())
    }

    /// Open a stage on `root` with a session layer.
    pub fn open_with_session(
        registry: &Arc<LayerRegistry>,
        root: &LayerHandle,
        session: &LayerHandle,
    ) -> Result<Stage> {
        Self::open_with_options(registry, root, StageOptions::default().with_session_layer(Arc::clone(session)))
    }

    /// Open a stage on `root`.
    ///
    /// The root and session layers are added to `registry` when missing.
    pub fn open_with_options(registry: &Arc<LayerRegistry>, root: &LayerHandle, options: StageOptions) -> Result<Stage> {
        if let Some(session) = &options.session_layer {
            if Arc::ptr_eq(session, root) {
                return Err(Error::other(format!(
                    "layer {} cannot be both root and session layer",
                    root.identifier()
                )));
            }
        }
        for layer in std::iter::once(root).chain(options.session_layer.as_ref()) {
            if registry.find(layer.identifier()).is_none() {
                registry.insert(Arc::clone(layer));
            }
        }

        let payloads = PayloadSet::new(options.initial_load);
        let cache = build_cache(registry, root, options.session_layer.as_ref(), &options, payloads);
        let edit_target = EditTarget::new(Arc::clone(root), LayerOffset::identity());
        let inner = Arc::new_cyclic(|weak| StageInner {
            root_layer: Arc::clone(root),
            session_layer: options.session_layer.clone(),
            registry: Arc::clone(registry),
            state: RwLock::new(StageState {
                cache,
                edit_target,
                interpolation: options.interpolation,
            }),
            options,
            notice_listeners: Mutex::new(Vec::new()),
            registrations: Mutex::new(ListenerRegistrations::default()),
            pending_edit: Mutex::new(None),
            self_ref: weak.clone(),
        });
        inner.sync_registrations();
        debug!(root = root.identifier(), "opened stage");
        Ok(Stage { inner })
    }

    // ========================================================================
    // Layers
    // ========================================================================

    pub fn root_layer(&self) -> &LayerHandle {
        &self.inner.root_layer
    }

    /// Session layer, stronger than the root layer, if the stage has one.
    pub fn session_layer(&self) -> Option<&LayerHandle> {
        self.inner.session_layer.as_ref()
    }

    /// Registry used to resolve asset paths for this stage.
    pub fn registry(&self) -> &Arc<LayerRegistry> {
        &self.inner.registry
    }

    /// The stage's root layer stack.
    pub fn layer_stack(&self) -> LayerStackHandle {
        Arc::clone(self.inner.state.read().cache.layer_stack())
    }

    /// Every layer used by the stage's composition.
    pub fn used_layers(&self) -> Vec<LayerHandle> {
        self.inner.state.read().cache.used_layers()
    }

    /// Check if two handles refer to the same stage.
    pub fn ptr_eq(&self, other: &Stage) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ========================================================================
    // Prims
    // ========================================================================

    /// The prim at `/`. Always present, even on an empty stage.
    pub fn pseudo_root(&self) -> Prim {
        Prim::new(self.clone(), Path::root())
    }

    /// The composed prim at `path`, if it exists on the stage.
    pub fn prim_at_path(&self, path: &Path) -> Option<Prim> {
        self.has_prim(path).then(|| Prim::new(self.clone(), path.clone()))
    }

    /// Attribute handle at a property path.
    pub fn attribute_at_path(&self, path: &Path) -> Option<Attribute> {
        if !path.is_property_path() || !self.has_prim(&path.prim_path()) {
            return None;
        }
        Some(Attribute::new(self.clone(), path.clone()))
    }

    /// Check if `path` is a composed prim (or the pseudo-root).
    pub fn has_prim(&self, path: &Path) -> bool {
        self.inner.state.read().cache.is_populated(path)
    }

    /// Every prim in depth-first order, children in composed order.
    pub fn traverse(&self) -> Vec<Prim> {
        let paths = {
            let state = self.inner.state.read();
            let mut paths = Vec::new();
            collect_descendants(&state.cache, &Path::root(), &mut paths);
            paths
        };
        paths.into_iter().map(|p| Prim::new(self.clone(), p)).collect()
    }

    /// Prim index of a composed prim.
    pub fn prim_index(&self, path: &Path) -> Option<Arc<PrimIndex>> {
        let state = self.inner.state.read();
        if !state.cache.is_populated(path) {
            return None;
        }
        state.cache.find_prim_index(path)
    }

    /// Define a prim (and `over` ancestors) in the edit target.
    pub fn define_prim(&self, path: &Path, type_name: &str) -> Result<Prim> {
        let target = self.edit_target();
        target.layer().create_prim_spec(path, Specifier::Def)?;
        if !type_name.is_empty() {
            target.layer().set_type_name(path, type_name)?;
        }
        Ok(Prim::new(self.clone(), path.clone()))
    }

    /// Author an `over` for `path` in the edit target.
    pub fn override_prim(&self, path: &Path) -> Result<Prim> {
        let target = self.edit_target();
        if !target.layer().has_spec(path) {
            target.layer().create_prim_spec(path, Specifier::Over)?;
        }
        Ok(Prim::new(self.clone(), path.clone()))
    }

    // ========================================================================
    // Edit target, payloads, interpolation
    // ========================================================================

    /// Where `define_prim`, `override_prim` and attribute authoring write.
    ///
    /// Defaults to the root layer.
    pub fn edit_target(&self) -> EditTarget {
        self.inner.state.read().edit_target.clone()
    }

    /// Author into `layer`, which must be in the stage's layer stack.
    pub fn set_edit_target(&self, layer: &LayerHandle) -> Result<()> {
        let mut state = self.inner.state.write();
        let offset = state
            .cache
            .layer_stack()
            .layer_offset_for(layer)
            .ok_or_else(|| Error::LayerNotFound(layer.identifier().to_string()))?;
        state.edit_target = EditTarget::new(Arc::clone(layer), offset);
        Ok(())
    }

    /// Include payloads at and below `path`.
    pub fn load(&self, path: &Path) {
        self.inner.change_payloads(path, true);
    }

    /// Exclude payloads at and below `path`.
    pub fn unload(&self, path: &Path) {
        self.inner.change_payloads(path, false);
    }

    /// Check if payloads at `path` are included.
    pub fn is_loaded(&self, path: &Path) -> bool {
        self.inner.state.read().cache.payloads().includes(path)
    }

    pub fn interpolation_type(&self) -> InterpolationType {
        self.inner.state.read().interpolation
    }

    /// Switch between linear and held interpolation of time samples.
    /// Takes effect on the next value query.
    pub fn set_interpolation_type(&self, interpolation: InterpolationType) {
        self.inner.state.write().interpolation = interpolation;
    }

    // ========================================================================
    // Notices
    // ========================================================================

    /// Call `handler` with every notice this stage sends.
    pub fn register_notice_listener(&self, handler: impl Fn(&ObjectsChanged) + Send + Sync + 'static) -> NoticeKey {
        let key = NoticeKey::next();
        self.inner.notice_listeners.lock().push((key, Arc::new(handler)));
        key
    }

    /// Stop delivering notices to a handler. Returns false if unknown.
    pub fn revoke_notice_listener(&self, key: NoticeKey) -> bool {
        let mut listeners = self.inner.notice_listeners.lock();
        let before = listeners.len();
        listeners.retain(|(k, _)| *k != key);
        before != listeners.len()
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Composed namespace as nested JSON: each prim maps child names to
    /// objects, with its property names under `"."` when it has any.
    pub fn contents_json(&self) -> JsonValue {
        let state = self.inner.state.read();
        prim_json(&state.cache, &Path::root())
    }

    // ========================================================================
    // Crate internals
    // ========================================================================

    /// Run `f` with the stage's cache.
    pub(crate) fn with_cache<R>(&self, f: impl FnOnce(&PcpCache) -> R) -> R {
        f(&self.inner.state.read().cache)
    }

    /// Describe the namespace edit about to be applied, for classification.
    pub(crate) fn set_pending_edit(&self, info: Option<PendingEditInfo>) {
        *self.inner.pending_edit.lock() = info;
    }
}

impl StageInner {
    fn build(&self, payloads: PayloadSet) -> PcpCache {
        build_cache(
            &self.registry,
            &self.root_layer,
            self.session_layer.as_ref(),
            &self.options,
            payloads,
        )
    }

    fn sync_registrations(&self) {
        let layers = self.state.read().cache.used_layers();
        let listener: Weak<dyn LayerListener> = self.self_ref.clone();
        self.registrations.lock().sync(&layers, &listener);
    }

    fn change_payloads(&self, path: &Path, load: bool) {
        let notice = {
            let mut state = self.state.write();
            let mut payloads = state.cache.payloads().clone();
            if load {
                payloads.load(path);
            } else {
                payloads.unload(path);
            }
            if payloads == *state.cache.payloads() {
                return;
            }
            state.cache = self.build(payloads);
            ObjectsChanged {
                resynced: vec![path.clone()],
                ..Default::default()
            }
        };
        self.sync_registrations();
        self.send(&notice);
    }

    fn send(&self, notice: &ObjectsChanged) {
        if notice.is_empty() {
            return;
        }
        debug!(
            root = self.root_layer.identifier(),
            resynced = notice.resynced_paths().len(),
            info_only = notice.changed_info_only_paths().len(),
            "sending objects changed"
        );
        let handlers: Vec<NoticeHandler> = self
            .notice_listeners
            .lock()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(notice);
        }
    }
}

impl LayerListener for StageInner {
    fn layers_did_change(&self, changes: &[LayerChanges]) {
        trace!(root = self.root_layer.identifier(), layers = changes.len(), "stage recomposing");
        let pending = self.pending_edit.lock().clone();
        let notice = {
            let mut state = self.state.write();
            let cache = self.build(state.cache.payloads().clone());
            let notice = compute_notice(&state.cache, &cache, changes, pending.as_ref());
            state.cache = cache;
            notice
        };
        self.sync_registrations();
        self.send(&notice);
    }
}

fn build_cache(
    registry: &Arc<LayerRegistry>,
    root: &LayerHandle,
    session: Option<&LayerHandle>,
    options: &StageOptions,
    payloads: PayloadSet,
) -> PcpCache {
    let mut cache = PcpCache::new(
        Arc::clone(registry),
        root,
        session,
        options.composition.clone(),
        options.variant_fallbacks.clone(),
        payloads,
    );
    cache.populate();
    cache
}

fn collect_descendants(cache: &PcpCache, path: &Path, out: &mut Vec<Path>) {
    let Some(index) = cache.find_prim_index(path) else {
        return;
    };
    for name in index.child_names() {
        let child = path.append_child(name);
        if cache.is_populated(&child) {
            out.push(child.clone());
            collect_descendants(cache, &child, out);
        }
    }
}

fn prim_json(cache: &PcpCache, path: &Path) -> JsonValue {
    let mut map = Map::new();
    let Some(index) = cache.find_prim_index(path) else {
        return JsonValue::Object(map);
    };
    if !path.is_absolute_root() && !index.property_names().is_empty() {
        map.insert(
            ".".to_string(),
            JsonValue::Array(
                index
                    .property_names()
                    .iter()
                    .map(|n| JsonValue::String(n.clone()))
                    .collect(),
            ),
        );
    }
    for name in index.child_names() {
        let child = path.append_child(name);
        if cache.is_populated(&child) {
            map.insert(name.clone(), prim_json(cache, &child));
        }
    }
    JsonValue::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdf::{FieldValue, ListOp, Reference};
    use crate::usd::PrimResyncType;
    use crate::util::Value;
    use serde_json::json;

    fn p(s: &str) -> Path {
        Path::parse(s).expect("valid path")
    }

    #[test]
    fn test_contents_and_traversal() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.usda");
        root.create_prim_spec(&p("/World/Cube"), Specifier::Def).expect("spec");
        root.create_attribute_spec(&p("/World/Cube.size"), "double").expect("attr");
        let stage = Stage::open(&registry, &root).expect("stage");

        assert_eq!(stage.contents_json(), json!({"World": {"Cube": {".": ["size"]}}}));
        let paths: Vec<Path> = stage.traverse().iter().map(|prim| prim.path().clone()).collect();
        assert_eq!(paths, vec![p("/World"), p("/World/Cube")]);
        assert!(stage.prim_at_path(&p("/Nope")).is_none());
    }

    #[test]
    fn test_layer_edits_recompose_and_notify() {
        let registry = LayerRegistry::new();
        let model = registry.create("model.usda");
        model.create_prim_spec(&p("/Model"), Specifier::Def).expect("spec");
        let root = registry.create("root.usda");
        root.create_prim_spec(&p("/Char"), Specifier::Def).expect("spec");
        let stage = Stage::open(&registry, &root).expect("stage");

        let seen: Arc<Mutex<Vec<ObjectsChanged>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let key = stage.register_notice_listener(move |n| sink.lock().push(n.clone()));

        root.set_references(&p("/Char"), ListOp::prepended(vec![Reference::new("model.usda", p("/Model"))]))
            .expect("refs");
        {
            let seen = seen.lock();
            assert_eq!(seen.len(), 1);
            assert_eq!(seen[0].resynced_paths(), [p("/Char")]);
        }
        assert_eq!(stage.used_layers().len(), 2);

        // model is now used, so its edits reach the stage
        model.create_prim_spec(&p("/Model/Child"), Specifier::Def).expect("spec");
        assert!(stage.prim_at_path(&p("/Char/Child")).is_some());
        {
            let seen = seen.lock();
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[1].resynced_paths(), [p("/Char/Child")]);
            assert_eq!(seen[1].prim_resync_type(&p("/Char/Child")).0, PrimResyncType::Other);
        }

        model
            .set_field(&p("/Model"), "documentation", FieldValue::Value(Value::String("hero".into())))
            .expect("doc");
        {
            let seen = seen.lock();
            assert_eq!(seen[2].changed_info_only_paths(), [p("/Char")]);
            assert_eq!(seen[2].changed_fields(&p("/Char")), vec!["documentation".to_string()]);
            assert!(seen[2].resynced_paths().is_empty());
        }

        assert!(stage.revoke_notice_listener(key));
        model.create_prim_spec(&p("/Model/Other"), Specifier::Def).expect("spec");
        assert_eq!(seen.lock().len(), 3);
    }

    #[test]
    fn test_edit_target_must_be_in_stack() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.usda");
        let sub = registry.create("sub.usda");
        let stray = registry.create("stray.usda");
        root.set_sublayer_paths(vec!["sub.usda".into()]).expect("sublayers");
        root.set_sublayer_offset(LayerOffset::new(10.0, 1.0), 0).expect("offset");
        let stage = Stage::open(&registry, &root).expect("stage");

        stage.set_edit_target(&sub).expect("sublayer target");
        assert_eq!(stage.edit_target().offset(), LayerOffset::new(10.0, 1.0));
        assert!(matches!(stage.set_edit_target(&stray), Err(Error::LayerNotFound(_))));
        stage.define_prim(&p("/FromSub"), "Scope").expect("define");
        assert!(sub.has_spec(&p("/FromSub")));
        assert!(stage.has_prim(&p("/FromSub")));
    }
}
