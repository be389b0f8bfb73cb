//! In-memory layers: a map from paths to specs holding typed fields.
//!
//! A layer is shared as a [`LayerHandle`] by every layer stack that uses it.
//! All mutation goes through `&self`; each edit records change entries and
//! delivers them to registered listeners once no lock is held.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value as JsonValue};
use tracing::trace;

use super::change::{record, ChangeBlock, ChangeEntry, LayerListener, ListenerKey, ListenerList};
use super::{LayerOffset, ListOp, Payload, Reference, TimeSamples};
use crate::ts::Spline;
use crate::util::{Error, Path, PathElement, Result, Value};

/// Shared handle to a layer.
pub type LayerHandle = Arc<Layer>;

/// Well-known field names.
pub mod fields {
    pub const SPECIFIER: &str = "specifier";
    pub const TYPE_NAME: &str = "typeName";
    pub const ACTIVE: &str = "active";
    pub const REFERENCES: &str = "references";
    pub const PAYLOAD: &str = "payload";
    pub const INHERIT_PATHS: &str = "inheritPaths";
    pub const SPECIALIZES: &str = "specializes";
    pub const VARIANT_SET_NAMES: &str = "variantSetNames";
    pub const VARIANT_SELECTION: &str = "variantSelection";
    pub const DEFAULT: &str = "default";
    pub const TIME_SAMPLES: &str = "timeSamples";
    pub const SPLINE: &str = "spline";
    pub const SUB_LAYERS: &str = "subLayers";
    pub const SUB_LAYER_OFFSETS: &str = "subLayerOffsets";
    pub const LAYER_RELOCATES: &str = "layerRelocates";
    pub const DEFAULT_PRIM: &str = "defaultPrim";

    /// Prim fields whose change alters composition of the prim.
    pub const COMPOSITION: &[&str] = &[
        SPECIFIER,
        TYPE_NAME,
        ACTIVE,
        REFERENCES,
        PAYLOAD,
        INHERIT_PATHS,
        SPECIALIZES,
        VARIANT_SET_NAMES,
        VARIANT_SELECTION,
    ];
}

/// Prim specifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Specifier {
    /// Defines the prim.
    Def,
    /// Overrides opinions without defining.
    #[default]
    Over,
    /// Abstract class prim.
    Class,
}

impl Specifier {
    /// Check if this specifier defines a prim (def or class).
    #[inline]
    pub fn is_defining(&self) -> bool {
        !matches!(self, Self::Over)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Def => "def",
            Self::Over => "over",
            Self::Class => "class",
        }
    }
}

/// Kind of object a spec describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpecKind {
    PseudoRoot,
    Prim,
    Attribute,
    VariantSet,
    Variant,
}

impl SpecKind {
    /// Check if specs of this kind can own prim children and properties.
    #[inline]
    pub fn is_prim_like(&self) -> bool {
        matches!(self, Self::PseudoRoot | Self::Prim | Self::Variant)
    }
}

/// A typed field payload.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Value(Value),
    TimeSamples(TimeSamples),
    Spline(Spline),
    References(ListOp<Reference>),
    Payloads(ListOp<Payload>),
    Paths(ListOp<Path>),
    Tokens(ListOp<String>),
    VariantSelections(BTreeMap<String, String>),
    Relocates(Vec<(Path, Path)>),
    Strings(Vec<String>),
    Offsets(Vec<LayerOffset>),
    Specifier(Specifier),
}

impl FieldValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::TimeSamples(_) => "timeSamples",
            Self::Spline(_) => "spline",
            Self::References(_) => "reference list-op",
            Self::Payloads(_) => "payload list-op",
            Self::Paths(_) => "path list-op",
            Self::Tokens(_) => "token list-op",
            Self::VariantSelections(_) => "variant selections",
            Self::Relocates(_) => "relocates",
            Self::Strings(_) => "string list",
            Self::Offsets(_) => "layer offsets",
            Self::Specifier(_) => "specifier",
        }
    }
}

/// A spec: its kind plus named fields.
#[derive(Clone, Debug, PartialEq)]
pub struct Spec {
    pub kind: SpecKind,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Spec {
    fn new(kind: SpecKind) -> Self {
        Self {
            kind,
            fields: BTreeMap::new(),
        }
    }
}

type SpecMap = BTreeMap<Path, Spec>;

static ANON_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A layer of scene description.
pub struct Layer {
    identifier: String,
    anonymous: bool,
    self_ref: Weak<Layer>,
    specs: RwLock<SpecMap>,
    listeners: Mutex<ListenerList>,
    editable: AtomicBool,
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer").field("identifier", &self.identifier).finish()
    }
}

fn subtree<'a>(specs: &'a SpecMap, prefix: &'a Path) -> impl Iterator<Item = (&'a Path, &'a Spec)> + 'a {
    specs.range(prefix.clone()..).take_while(move |(p, _)| p.has_prefix(prefix))
}

impl Layer {
    /// Create a layer with the given identifier.
    pub fn new(identifier: impl Into<String>) -> LayerHandle {
        Self::create(identifier.into(), false)
    }

    /// Create an anonymous layer; `tag` is embedded in the identifier.
    pub fn anonymous(tag: &str) -> LayerHandle {
        let n = ANON_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self::create(format!("anon:{n:04}:{tag}"), true)
    }

    fn create(identifier: String, anonymous: bool) -> LayerHandle {
        let mut specs = SpecMap::new();
        specs.insert(Path::root(), Spec::new(SpecKind::PseudoRoot));
        Arc::new_cyclic(|weak| Self {
            identifier,
            anonymous,
            self_ref: weak.clone(),
            specs: RwLock::new(specs),
            listeners: Mutex::new(ListenerList::default()),
            editable: AtomicBool::new(true),
        })
    }

    /// Identifier the layer was created or registered under.
    #[inline]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Check if the layer was created with [`Layer::anonymous`].
    #[inline]
    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    /// Check if the layer accepts edits.
    #[inline]
    pub fn permission_to_edit(&self) -> bool {
        self.editable.load(Ordering::Relaxed)
    }

    /// Allow or refuse edits. Refused edits fail with
    /// [`Error::LayerNotEditable`] and leave the layer unchanged.
    pub fn set_permission_to_edit(&self, allow: bool) {
        self.editable.store(allow, Ordering::Relaxed);
    }

    /// Check if the layer holds nothing but an empty pseudo-root.
    pub fn is_empty(&self) -> bool {
        let specs = self.specs.read();
        specs.len() == 1 && specs.get(&Path::root()).is_some_and(|s| s.fields.is_empty())
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Register a change listener.
    pub fn register_listener(&self, listener: Weak<dyn LayerListener>) -> ListenerKey {
        self.listeners.lock().register(listener)
    }

    /// Revoke a registration. Returns false if the key was unknown.
    pub fn revoke_listener(&self, key: ListenerKey) -> bool {
        self.listeners.lock().revoke(key)
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub(crate) fn live_listeners(&self) -> Vec<Arc<dyn LayerListener>> {
        self.listeners.lock().live()
    }

    /// Run a mutation under the write lock, then record its entries.
    fn edit<R>(&self, f: impl FnOnce(&mut SpecMap, &mut Vec<ChangeEntry>) -> Result<R>) -> Result<R> {
        if !self.permission_to_edit() {
            return Err(Error::LayerNotEditable(self.identifier.clone()));
        }
        let _block = ChangeBlock::new();
        let mut entries = Vec::new();
        let result = {
            let mut specs = self.specs.write();
            f(&mut specs, &mut entries)
        };
        if let Some(handle) = self.self_ref.upgrade() {
            for entry in entries {
                trace!(layer = %self.identifier, ?entry, "layer edit");
                record(&handle, entry);
            }
        }
        result
    }

    // ========================================================================
    // Spec queries
    // ========================================================================

    /// Check if a spec of any kind exists at `path`.
    pub fn has_spec(&self, path: &Path) -> bool {
        self.specs.read().contains_key(path)
    }

    /// Kind of the spec at `path`, `None` when there is no spec.
    pub fn spec_kind(&self, path: &Path) -> Option<SpecKind> {
        self.specs.read().get(path).map(|s| s.kind)
    }

    /// Copy of the spec at `path`.
    pub fn spec(&self, path: &Path) -> Option<Spec> {
        self.specs.read().get(path).cloned()
    }

    /// Every spec path, in path order.
    pub fn spec_paths(&self) -> Vec<Path> {
        self.specs.read().keys().cloned().collect()
    }

    /// Spec paths at or under `prefix`.
    pub fn spec_paths_under(&self, prefix: &Path) -> Vec<Path> {
        let specs = self.specs.read();
        subtree(&specs, prefix).map(|(p, _)| p.clone()).collect()
    }

    /// Names of prim specs directly under `path` (a prim, variant or `/`).
    pub fn prim_children(&self, path: &Path) -> Vec<String> {
        self.direct_children(path, |e| match e {
            PathElement::Prim(name) => Some(name.clone()),
            _ => None,
        })
    }

    /// Names of property specs directly owned by `path`.
    pub fn property_names(&self, path: &Path) -> Vec<String> {
        self.direct_children(path, |e| match e {
            PathElement::Property(name) => Some(name.clone()),
            _ => None,
        })
    }

    /// Variant set names that have variant set specs under `path`.
    pub fn variant_set_spec_names(&self, path: &Path) -> Vec<String> {
        self.direct_children(path, |e| match e {
            PathElement::VariantSelection { set, variant } if variant.is_empty() => Some(set.clone()),
            _ => None,
        })
    }

    /// Variant names authored for `set` under `path`.
    pub fn variant_names(&self, path: &Path, set: &str) -> Vec<String> {
        self.direct_children(path, |e| match e {
            PathElement::VariantSelection { set: s, variant } if s == set && !variant.is_empty() => {
                Some(variant.clone())
            }
            _ => None,
        })
    }

    fn direct_children<T>(&self, path: &Path, pick: impl Fn(&PathElement) -> Option<T>) -> Vec<T> {
        let specs = self.specs.read();
        let depth = path.elements().len() + 1;
        subtree(&specs, path)
            .filter(|(p, _)| p.elements().len() == depth)
            .filter_map(|(p, _)| p.elements().last().and_then(&pick))
            .collect()
    }

    // ========================================================================
    // Field access
    // ========================================================================

    /// Copy of a field.
    pub fn get_field(&self, path: &Path, field: &str) -> Option<FieldValue> {
        self.specs.read().get(path).and_then(|s| s.fields.get(field).cloned())
    }

    /// Check if a field is authored.
    pub fn has_field(&self, path: &Path, field: &str) -> bool {
        self.specs.read().get(path).is_some_and(|s| s.fields.contains_key(field))
    }

    /// Names of authored fields.
    pub fn field_names(&self, path: &Path) -> Vec<String> {
        self.specs
            .read()
            .get(path)
            .map(|s| s.fields.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Set a field on an existing spec.
    pub fn set_field(&self, path: &Path, field: &str, value: FieldValue) -> Result<()> {
        let id = self.identifier.clone();
        self.edit(|specs, entries| {
            let spec = specs.get_mut(path).ok_or_else(|| Error::spec_not_found(&id, path))?;
            if spec.fields.get(field) != Some(&value) {
                spec.fields.insert(field.to_string(), value);
                entries.push(ChangeEntry::FieldChanged {
                    path: path.clone(),
                    field: field.to_string(),
                });
            }
            Ok(())
        })
    }

    /// Erase a field. Returns whether it existed.
    pub fn erase_field(&self, path: &Path, field: &str) -> Result<bool> {
        self.edit(|specs, entries| {
            let removed = specs
                .get_mut(path)
                .and_then(|spec| spec.fields.remove(field))
                .is_some();
            if removed {
                entries.push(ChangeEntry::FieldChanged {
                    path: path.clone(),
                    field: field.to_string(),
                });
            }
            Ok(removed)
        })
    }

    // ========================================================================
    // Spec creation, removal, moves
    // ========================================================================

    /// Create (or re-specify) a prim spec, creating missing ancestors as
    /// overs and missing variant containers.
    pub fn create_prim_spec(&self, path: &Path, specifier: Specifier) -> Result<()> {
        if !path.is_prim_path() {
            return Err(Error::invalid_path(format!("{path} is not a prim path")));
        }
        self.edit(|specs, entries| {
            ensure_container(specs, &path.parent(), entries);
            let spec = specs.entry(path.clone()).or_insert_with(|| {
                entries.push(ChangeEntry::SpecAdded(path.clone()));
                Spec::new(SpecKind::Prim)
            });
            let value = FieldValue::Specifier(specifier);
            if spec.fields.get(fields::SPECIFIER) != Some(&value) {
                spec.fields.insert(fields::SPECIFIER.to_string(), value);
                entries.push(ChangeEntry::FieldChanged {
                    path: path.clone(),
                    field: fields::SPECIFIER.to_string(),
                });
            }
            Ok(())
        })
    }

    /// Create an attribute spec with a type name.
    pub fn create_attribute_spec(&self, path: &Path, type_name: &str) -> Result<()> {
        if !path.is_property_path() {
            return Err(Error::invalid_path(format!("{path} is not a property path")));
        }
        self.edit(|specs, entries| {
            ensure_container(specs, &path.parent(), entries);
            let spec = specs.entry(path.clone()).or_insert_with(|| {
                entries.push(ChangeEntry::SpecAdded(path.clone()));
                Spec::new(SpecKind::Attribute)
            });
            spec.fields.insert(
                fields::TYPE_NAME.to_string(),
                FieldValue::Value(Value::Token(type_name.to_string())),
            );
            Ok(())
        })
    }

    /// Create the variant `set=variant` under `prim_path` and return its path.
    pub fn create_variant_spec(&self, prim_path: &Path, set: &str, variant: &str) -> Result<Path> {
        if !prim_path.is_prim_path() {
            return Err(Error::invalid_path(format!("{prim_path} is not a prim path")));
        }
        let variant_path = prim_path.append_variant_selection(set, variant);
        self.edit(|specs, entries| {
            ensure_container(specs, &variant_path, entries);
            Ok(())
        })?;
        Ok(variant_path)
    }

    /// Remove a spec and its whole subtree.
    pub fn erase_spec(&self, path: &Path) -> Result<()> {
        if path.is_absolute_root() {
            return Err(Error::invalid_path("cannot erase the pseudo-root"));
        }
        let id = self.identifier.clone();
        self.edit(|specs, entries| {
            if !specs.contains_key(path) {
                return Err(Error::spec_not_found(&id, path));
            }
            let doomed: Vec<Path> = subtree(specs, path).map(|(p, _)| p.clone()).collect();
            for p in &doomed {
                specs.remove(p);
            }
            entries.push(ChangeEntry::SpecRemoved(path.clone()));
            Ok(())
        })
    }

    /// Move a spec subtree from `from` to `to`.
    ///
    /// Missing ancestors of `to` are created as overs. When specs already
    /// exist at a destination, moved fields replace same-named fields and
    /// the rest of the destination is kept.
    pub fn move_spec(&self, from: &Path, to: &Path) -> Result<()> {
        if from == to {
            return Ok(());
        }
        if from.is_absolute_root() || to.is_absolute_root() || to.has_prefix(from) {
            return Err(Error::invalid_path(format!("cannot move {from} to {to}")));
        }
        if from.is_property_path() != to.is_property_path() {
            return Err(Error::invalid_path(format!("{from} and {to} name different kinds of spec")));
        }
        let id = self.identifier.clone();
        self.edit(|specs, entries| {
            if !specs.contains_key(from) {
                return Err(Error::spec_not_found(&id, from));
            }
            let moved: Vec<(Path, Spec)> = subtree(specs, from)
                .map(|(p, s)| (p.clone(), s.clone()))
                .collect();
            for (p, _) in &moved {
                specs.remove(p);
            }
            ensure_container(specs, &to.parent(), entries);
            for (p, spec) in moved {
                let Some(target) = p.replace_prefix(from, to) else {
                    continue;
                };
                match specs.get_mut(&target) {
                    Some(existing) => existing.fields.extend(spec.fields),
                    None => {
                        specs.insert(target, spec);
                    }
                }
            }
            entries.push(ChangeEntry::SpecMoved {
                from: from.clone(),
                to: to.clone(),
            });
            Ok(())
        })
    }

    // ========================================================================
    // Typed helpers
    // ========================================================================

    /// Plain value stored in a field.
    pub fn field_value(&self, path: &Path, field: &str) -> Option<Value> {
        match self.get_field(path, field)? {
            FieldValue::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn specifier(&self, path: &Path) -> Option<Specifier> {
        match self.get_field(path, fields::SPECIFIER)? {
            FieldValue::Specifier(s) => Some(s),
            _ => None,
        }
    }

    /// Authored type name, if any.
    pub fn type_name(&self, path: &Path) -> Option<String> {
        self.field_value(path, fields::TYPE_NAME)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn set_type_name(&self, path: &Path, type_name: &str) -> Result<()> {
        self.set_field(path, fields::TYPE_NAME, FieldValue::Value(Value::Token(type_name.to_string())))
    }

    pub fn active(&self, path: &Path) -> Option<bool> {
        self.field_value(path, fields::ACTIVE).and_then(|v| v.as_bool())
    }

    pub fn set_active(&self, path: &Path, active: bool) -> Result<()> {
        self.set_field(path, fields::ACTIVE, FieldValue::Value(Value::Bool(active)))
    }

    fn set_or_erase(&self, path: &Path, field: &str, value: FieldValue, empty: bool) -> Result<()> {
        if empty {
            self.erase_field(path, field).map(|_| ())
        } else {
            self.set_field(path, field, value)
        }
    }

    /// Authored references at `path`; an empty list op when unauthored.
    pub fn references(&self, path: &Path) -> ListOp<Reference> {
        match self.get_field(path, fields::REFERENCES) {
            Some(FieldValue::References(op)) => op,
            _ => ListOp::default(),
        }
    }

    /// Author references at `path`.
    ///
    /// An empty list op erases the field instead of storing it.
    pub fn set_references(&self, path: &Path, op: ListOp<Reference>) -> Result<()> {
        let empty = op.is_empty();
        self.set_or_erase(path, fields::REFERENCES, FieldValue::References(op), empty)
    }

    /// Authored payloads at `path`; an empty list op when unauthored.
    pub fn payloads(&self, path: &Path) -> ListOp<Payload> {
        match self.get_field(path, fields::PAYLOAD) {
            Some(FieldValue::Payloads(op)) => op,
            _ => ListOp::default(),
        }
    }

    /// Author payloads at `path`. An empty list op erases the field.
    pub fn set_payloads(&self, path: &Path, op: ListOp<Payload>) -> Result<()> {
        let empty = op.is_empty();
        self.set_or_erase(path, fields::PAYLOAD, FieldValue::Payloads(op), empty)
    }

    /// Path list-op field (`inheritPaths` or `specializes`).
    pub fn path_list(&self, path: &Path, field: &str) -> ListOp<Path> {
        match self.get_field(path, field) {
            Some(FieldValue::Paths(op)) => op,
            _ => ListOp::default(),
        }
    }

    /// Author a path list-op field. An empty list op erases the field.
    pub fn set_path_list(&self, path: &Path, field: &str, op: ListOp<Path>) -> Result<()> {
        let empty = op.is_empty();
        self.set_or_erase(path, field, FieldValue::Paths(op), empty)
    }

    pub fn inherits(&self, path: &Path) -> ListOp<Path> {
        self.path_list(path, fields::INHERIT_PATHS)
    }

    /// Author inherit arcs at `path`.
    pub fn set_inherits(&self, path: &Path, op: ListOp<Path>) -> Result<()> {
        self.set_path_list(path, fields::INHERIT_PATHS, op)
    }

    pub fn specializes(&self, path: &Path) -> ListOp<Path> {
        self.path_list(path, fields::SPECIALIZES)
    }

    /// Author specialize arcs at `path`.
    pub fn set_specializes(&self, path: &Path, op: ListOp<Path>) -> Result<()> {
        self.set_path_list(path, fields::SPECIALIZES, op)
    }

    /// Variant set names declared on the prim at `path`.
    pub fn variant_set_names(&self, path: &Path) -> ListOp<String> {
        match self.get_field(path, fields::VARIANT_SET_NAMES) {
            Some(FieldValue::Tokens(op)) => op,
            _ => ListOp::default(),
        }
    }

    pub fn set_variant_set_names(&self, path: &Path, op: ListOp<String>) -> Result<()> {
        let empty = op.is_empty();
        self.set_or_erase(path, fields::VARIANT_SET_NAMES, FieldValue::Tokens(op), empty)
    }

    /// Authored variant selections keyed by variant set name.
    pub fn variant_selections(&self, path: &Path) -> BTreeMap<String, String> {
        match self.get_field(path, fields::VARIANT_SELECTION) {
            Some(FieldValue::VariantSelections(map)) => map,
            _ => BTreeMap::new(),
        }
    }

    /// Set (or clear, with `None`) the selection for a variant set.
    pub fn set_variant_selection(&self, path: &Path, set: &str, selection: Option<&str>) -> Result<()> {
        let mut map = self.variant_selections(path);
        match selection {
            Some(s) => map.insert(set.to_string(), s.to_string()),
            None => map.remove(set),
        };
        let empty = map.is_empty();
        self.set_or_erase(path, fields::VARIANT_SELECTION, FieldValue::VariantSelections(map), empty)
    }

    // --- layer metadata (pseudo-root) ---

    /// Sublayer asset paths, strongest first.
    pub fn sublayer_paths(&self) -> Vec<String> {
        match self.get_field(&Path::root(), fields::SUB_LAYERS) {
            Some(FieldValue::Strings(v)) => v,
            _ => Vec::new(),
        }
    }

    /// Replace the sublayer list. Offsets are kept by index.
    pub fn set_sublayer_paths(&self, paths: Vec<String>) -> Result<()> {
        let empty = paths.is_empty();
        self.set_or_erase(&Path::root(), fields::SUB_LAYERS, FieldValue::Strings(paths), empty)
    }

    /// Append a sublayer path (strongest sublayers come first).
    pub fn insert_sublayer_path(&self, path: &str, index: Option<usize>) -> Result<()> {
        let mut paths = self.sublayer_paths();
        let at = index.unwrap_or(paths.len()).min(paths.len());
        paths.insert(at, path.to_string());
        self.set_sublayer_paths(paths)
    }

    /// Offsets parallel to `sublayer_paths`, identity where unauthored.
    pub fn sublayer_offsets(&self) -> Vec<LayerOffset> {
        let count = self.sublayer_paths().len();
        let mut offsets = match self.get_field(&Path::root(), fields::SUB_LAYER_OFFSETS) {
            Some(FieldValue::Offsets(v)) => v,
            _ => Vec::new(),
        };
        offsets.resize(count, LayerOffset::identity());
        offsets
    }

    /// Set the offset of the sublayer at `index`.
    ///
    /// Fails when `index` is past the end of the sublayer list.
    pub fn set_sublayer_offset(&self, offset: LayerOffset, index: usize) -> Result<()> {
        let mut offsets = self.sublayer_offsets();
        if index >= offsets.len() {
            return Err(Error::other(format!(
                "sublayer index {index} out of range in {}",
                self.identifier
            )));
        }
        offsets[index] = offset;
        self.set_field(&Path::root(), fields::SUB_LAYER_OFFSETS, FieldValue::Offsets(offsets))
    }

    /// Relocation pairs `(source, target)` in authored order.
    pub fn relocates(&self) -> Vec<(Path, Path)> {
        match self.get_field(&Path::root(), fields::LAYER_RELOCATES) {
            Some(FieldValue::Relocates(v)) => v,
            _ => Vec::new(),
        }
    }

    /// Replace the relocates table. An empty table erases the field.
    ///
    /// An empty target path marks the source as deleted.
    pub fn set_relocates(&self, relocates: Vec<(Path, Path)>) -> Result<()> {
        let empty = relocates.is_empty();
        self.set_or_erase(&Path::root(), fields::LAYER_RELOCATES, FieldValue::Relocates(relocates), empty)
    }

    /// Name of the prim targeted by arcs that name no prim path.
    pub fn default_prim(&self) -> Option<String> {
        self.field_value(&Path::root(), fields::DEFAULT_PRIM)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn set_default_prim(&self, name: &str) -> Result<()> {
        self.set_field(&Path::root(), fields::DEFAULT_PRIM, FieldValue::Value(Value::Token(name.to_string())))
    }

    // --- attribute values ---

    /// Default (non time-varying) value, including block sentinels.
    pub fn default_value(&self, path: &Path) -> Option<Value> {
        self.field_value(path, fields::DEFAULT)
    }

    /// Author the default value. [`Value::ValueBlock`] and
    /// [`Value::AnimationBlock`] are stored as-is.
    pub fn set_default_value(&self, path: &Path, value: Value) -> Result<()> {
        self.set_field(path, fields::DEFAULT, FieldValue::Value(value))
    }

    pub fn time_samples(&self, path: &Path) -> Option<TimeSamples> {
        match self.get_field(path, fields::TIME_SAMPLES)? {
            FieldValue::TimeSamples(s) => Some(s),
            _ => None,
        }
    }

    /// Replace every time sample of the attribute at `path`.
    pub fn set_time_samples(&self, path: &Path, samples: TimeSamples) -> Result<()> {
        self.set_field(path, fields::TIME_SAMPLES, FieldValue::TimeSamples(samples))
    }

    /// Set one time sample, creating the sample map if needed.
    pub fn set_time_sample(&self, path: &Path, time: f64, value: Value) -> Result<()> {
        let mut samples = self.time_samples(path).unwrap_or_default();
        samples.set(time, value);
        self.set_time_samples(path, samples)
    }

    pub fn spline(&self, path: &Path) -> Option<Spline> {
        match self.get_field(path, fields::SPLINE)? {
            FieldValue::Spline(s) => Some(s),
            _ => None,
        }
    }

    /// Author a spline. Knot times are in this layer's time.
    pub fn set_spline(&self, path: &Path, spline: Spline) -> Result<()> {
        self.set_field(path, fields::SPLINE, FieldValue::Spline(spline))
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Composition-relevant fields of every spec as JSON, keyed by path.
    pub fn composition_fields_json(&self) -> JsonValue {
        let specs = self.specs.read();
        let mut out = Map::new();
        for (path, spec) in specs.iter() {
            let mut entry = Map::new();
            for (name, value) in &spec.fields {
                let rendered = match value {
                    FieldValue::References(op) | FieldValue::Payloads(op) => list_op_json(op, |r| r.to_string()),
                    FieldValue::Paths(op) => list_op_json(op, |p| p.to_string()),
                    FieldValue::Tokens(op) => list_op_json(op, |t| t.clone()),
                    FieldValue::VariantSelections(map) => json!(map),
                    FieldValue::Relocates(pairs) => JsonValue::Array(
                        pairs
                            .iter()
                            .map(|(s, t)| json!([s.to_string(), t.to_string()]))
                            .collect(),
                    ),
                    FieldValue::Strings(v) => json!(v),
                    _ => continue,
                };
                entry.insert(name.clone(), rendered);
            }
            if !entry.is_empty() {
                out.insert(path.to_string(), JsonValue::Object(entry));
            }
        }
        JsonValue::Object(out)
    }
}

fn list_op_json<T: Clone + PartialEq>(op: &ListOp<T>, show: impl Fn(&T) -> String) -> JsonValue {
    let render = |items: &[T]| JsonValue::Array(items.iter().map(|i| JsonValue::String(show(i))).collect());
    let mut out = Map::new();
    if op.is_explicit() {
        out.insert("explicit".into(), render(op.explicit_items()));
    }
    for (key, items) in [
        ("prepend", op.prepended_items()),
        ("append", op.appended_items()),
        ("delete", op.deleted_items()),
    ] {
        if !items.is_empty() {
            out.insert(key.into(), render(items));
        }
    }
    JsonValue::Object(out)
}

/// Make sure a container spec (prim, variant or `/`) exists at `path`,
/// creating ancestors as needed.
fn ensure_container(specs: &mut SpecMap, path: &Path, entries: &mut Vec<ChangeEntry>) {
    if path.is_empty() || specs.contains_key(path) {
        return;
    }
    ensure_container(specs, &path.parent(), entries);
    match path.variant_selection() {
        Some((set, _)) => {
            let owner = path.parent();
            let set_path = owner.append_variant_selection(set, "");
            if !specs.contains_key(&set_path) {
                specs.insert(set_path.clone(), Spec::new(SpecKind::VariantSet));
                entries.push(ChangeEntry::SpecAdded(set_path));
                if let Some(owner_spec) = specs.get_mut(&owner) {
                    let entry = owner_spec
                        .fields
                        .entry(fields::VARIANT_SET_NAMES.to_string())
                        .or_insert_with(|| FieldValue::Tokens(ListOp::default()));
                    if let FieldValue::Tokens(op) = entry {
                        op.add_prepended(set.to_string());
                    }
                    entries.push(ChangeEntry::FieldChanged {
                        path: owner.clone(),
                        field: fields::VARIANT_SET_NAMES.to_string(),
                    });
                }
            }
            let mut spec = Spec::new(SpecKind::Variant);
            spec.fields
                .insert(fields::SPECIFIER.to_string(), FieldValue::Specifier(Specifier::Over));
            specs.insert(path.clone(), spec);
        }
        None if path.is_prim_path() => {
            let mut spec = Spec::new(SpecKind::Prim);
            spec.fields
                .insert(fields::SPECIFIER.to_string(), FieldValue::Specifier(Specifier::Over));
            specs.insert(path.clone(), spec);
        }
        // variant set specs and properties are never implicit containers
        None => return,
    }
    entries.push(ChangeEntry::SpecAdded(path.clone()));
}
