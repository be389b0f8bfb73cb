//! Layer stacks: a root layer, its sublayers and the composed relocates.
//!
//! Layers are ordered strongest first. A session layer, when present, and
//! its sublayers come before the root layer's stack. Each layer carries the
//! cumulative offset mapping its times into the stack's time.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::CompositionError;
use crate::sdf::{Layer, LayerHandle, LayerOffset, LayerRegistry};
use crate::util::{CompositionConfig, Path};

/// Shared handle to a composed layer stack.
pub type LayerStackHandle = Arc<LayerStack>;

/// Identity of a layer stack: its root and session layer identifiers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerStackIdentifier {
    pub root: String,
    pub session: Option<String>,
}

impl LayerStackIdentifier {
    pub fn new(root: &Layer, session: Option<&Layer>) -> Self {
        Self {
            root: root.identifier().to_string(),
            session: session.map(|s| s.identifier().to_string()),
        }
    }
}

impl fmt::Display for LayerStackIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.session {
            Some(session) => write!(f, "@{}@ (session @{}@)", self.root, session),
            None => write!(f, "@{}@", self.root),
        }
    }
}

// ============================================================================
// Relocates
// ============================================================================

/// Composed relocation table, queryable in both directions.
///
/// A deletion relocate maps its source to the empty path and has no
/// reverse entry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Relocates {
    source_to_target: BTreeMap<Path, Path>,
    target_to_source: BTreeMap<Path, Path>,
}

impl Relocates {
    /// Target for a relocation source. The empty path marks a deletion.
    pub fn target_for(&self, source: &Path) -> Option<&Path> {
        self.source_to_target.get(source)
    }

    /// Source relocated to `target`.
    pub fn source_for(&self, target: &Path) -> Option<&Path> {
        self.target_to_source.get(target)
    }

    /// Check if `path` is a relocation source (moved or deleted).
    #[inline]
    pub fn is_source(&self, path: &Path) -> bool {
        self.source_to_target.contains_key(path)
    }

    /// Check if `path` is a relocation target.
    #[inline]
    pub fn is_target(&self, path: &Path) -> bool {
        self.target_to_source.contains_key(path)
    }

    /// `(source, target)` pairs in source order.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.source_to_target.iter()
    }

    pub fn len(&self) -> usize {
        self.source_to_target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source_to_target.is_empty()
    }

    /// Names of relocation sources directly under `parent`.
    pub fn source_names_under(&self, parent: &Path) -> Vec<String> {
        self.source_to_target
            .keys()
            .filter(|s| s.parent() == *parent)
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Names of relocation targets directly under `parent`.
    pub fn target_names_under(&self, parent: &Path) -> Vec<String> {
        self.target_to_source
            .keys()
            .filter(|t| t.parent() == *parent)
            .map(|t| t.name().to_string())
            .collect()
    }

    fn insert(&mut self, source: Path, target: Path) {
        if !target.is_empty() {
            self.target_to_source.insert(target.clone(), source.clone());
        }
        self.source_to_target.insert(source, target);
    }
}

// ============================================================================
// LayerStack
// ============================================================================

/// An ordered set of layers composed from a root (and session) layer.
#[derive(Debug)]
pub struct LayerStack {
    identifier: LayerStackIdentifier,
    root_layer: LayerHandle,
    session_layer: Option<LayerHandle>,
    layers: Vec<LayerHandle>,
    offsets: Vec<LayerOffset>,
    relocates: Relocates,
    errors: Vec<CompositionError>,
}

impl LayerStack {
    /// Compose the stack rooted at `root`, resolving sublayers through
    /// `registry`.
    pub fn compute(
        root: &LayerHandle,
        session: Option<&LayerHandle>,
        registry: &LayerRegistry,
        config: &CompositionConfig,
    ) -> LayerStackHandle {
        let mut builder = StackBuilder {
            registry,
            config,
            layers: Vec::new(),
            offsets: Vec::new(),
            seen: HashSet::new(),
            errors: Vec::new(),
        };
        if let Some(session) = session {
            builder.add_layer(session, LayerOffset::identity(), &mut Vec::new());
        }
        builder.add_layer(root, LayerOffset::identity(), &mut Vec::new());

        let StackBuilder {
            layers,
            offsets,
            mut errors,
            ..
        } = builder;
        let relocates = compose_relocates(&layers, &mut errors);
        let identifier = LayerStackIdentifier::new(root, session.map(|s| &**s));
        debug!(stack = %identifier, layers = layers.len(), relocates = relocates.len(), "composed layer stack");

        Arc::new(Self {
            identifier,
            root_layer: Arc::clone(root),
            session_layer: session.cloned(),
            layers,
            offsets,
            relocates,
            errors,
        })
    }

    #[inline]
    pub fn identifier(&self) -> &LayerStackIdentifier {
        &self.identifier
    }

    pub fn root_layer(&self) -> &LayerHandle {
        &self.root_layer
    }

    pub fn session_layer(&self) -> Option<&LayerHandle> {
        self.session_layer.as_ref()
    }

    /// Layers in strength order.
    pub fn layers(&self) -> &[LayerHandle] {
        &self.layers
    }

    /// Layers paired with their offsets into stack time.
    pub fn layers_with_offsets(&self) -> impl Iterator<Item = (&LayerHandle, LayerOffset)> {
        self.layers.iter().zip(self.offsets.iter().copied())
    }

    /// Cumulative offset of `layer` in this stack.
    pub fn layer_offset_for(&self, layer: &Layer) -> Option<LayerOffset> {
        self.layers
            .iter()
            .position(|l| std::ptr::eq(l.as_ref(), layer))
            .map(|i| self.offsets[i])
    }

    /// Check if `layer` is part of this stack.
    pub fn has_layer(&self, layer: &Layer) -> bool {
        self.layers.iter().any(|l| std::ptr::eq(l.as_ref(), layer))
    }

    /// Check if this stack and `other` share any layer.
    pub fn shares_layer_with(&self, other: &LayerStack) -> bool {
        self.layers.iter().any(|l| other.has_layer(l))
    }

    pub fn relocates(&self) -> &Relocates {
        &self.relocates
    }

    /// Errors found while composing sublayers and relocates.
    pub fn errors(&self) -> &[CompositionError] {
        &self.errors
    }

    /// Check if any layer has a spec at `path`.
    pub fn has_spec(&self, path: &Path) -> bool {
        self.layers.iter().any(|l| l.has_spec(path))
    }
}

struct StackBuilder<'a> {
    registry: &'a LayerRegistry,
    config: &'a CompositionConfig,
    layers: Vec<LayerHandle>,
    offsets: Vec<LayerOffset>,
    seen: HashSet<String>,
    errors: Vec<CompositionError>,
}

impl StackBuilder<'_> {
    /// Depth-first sublayer walk; `chain` holds identifiers being expanded.
    fn add_layer(&mut self, layer: &LayerHandle, offset: LayerOffset, chain: &mut Vec<String>) {
        if !self.seen.insert(layer.identifier().to_string()) {
            return;
        }
        self.layers.push(Arc::clone(layer));
        self.offsets.push(offset);
        chain.push(layer.identifier().to_string());

        let offsets = layer.sublayer_offsets();
        for (i, asset_path) in layer.sublayer_paths().iter().enumerate() {
            let sublayer = match self.registry.find_or_resolve(asset_path, layer) {
                Ok(sublayer) => sublayer,
                Err(_) => {
                    self.error(CompositionError::InvalidSublayerPath {
                        layer: layer.identifier().to_string(),
                        asset_path: asset_path.clone(),
                    });
                    continue;
                }
            };
            if chain.iter().any(|id| id == sublayer.identifier()) {
                self.error(CompositionError::SublayerCycle {
                    layer: layer.identifier().to_string(),
                    sublayer: sublayer.identifier().to_string(),
                });
                continue;
            }

            let mut sub_offset = offsets.get(i).copied().unwrap_or_default();
            if !sub_offset.is_valid() {
                self.error(CompositionError::InvalidSublayerOffset {
                    layer: layer.identifier().to_string(),
                    sublayer: sublayer.identifier().to_string(),
                    offset: sub_offset.to_string(),
                });
                sub_offset = LayerOffset::identity();
            } else if sub_offset.scale() < 0.0 {
                if self.config.allow_negative_layer_offset_scale {
                    warn!(
                        layer = layer.identifier(),
                        sublayer = sublayer.identifier(),
                        scale = sub_offset.scale(),
                        "negative layer offset scale is deprecated"
                    );
                } else {
                    self.error(CompositionError::NegativeLayerOffsetScale {
                        layer: layer.identifier().to_string(),
                        site: Path::root().to_string(),
                        arc: "sublayer".into(),
                        scale: sub_offset.scale(),
                    });
                    sub_offset = LayerOffset::identity();
                }
            }
            self.add_layer(&sublayer, offset.compose(&sub_offset), chain);
        }
        chain.pop();
    }

    fn error(&mut self, err: CompositionError) {
        warn!(kind = err.kind(), "{err}");
        self.errors.push(err);
    }
}

/// Build the relocation table from every layer's `layerRelocates`, strongest
/// layer first. The first declaration for a source wins.
pub fn compose_relocates(layers: &[LayerHandle], errors: &mut Vec<CompositionError>) -> Relocates {
    let mut table = Relocates::default();
    for layer in layers {
        for (source, target) in layer.relocates() {
            let reason = if !source.is_prim_path() || source.contains_variant_selection() {
                Some("source must be a prim path without variant selections")
            } else if !target.is_empty() && (!target.is_prim_path() || target.contains_variant_selection()) {
                Some("target must be a prim path without variant selections")
            } else if source.is_root_prim_path() || target.is_root_prim_path() {
                Some("root prims cannot be relocated")
            } else if source == target {
                Some("a prim cannot be relocated to itself")
            } else if !target.is_empty() && (target.has_prefix(&source) || source.has_prefix(&target)) {
                Some("source and target cannot be ancestors of each other")
            } else {
                None
            };
            if let Some(reason) = reason {
                let err = CompositionError::InvalidRelocate {
                    layer: layer.identifier().to_string(),
                    source_path: source.to_string(),
                    target_path: target.to_string(),
                    reason: reason.into(),
                };
                warn!(kind = err.kind(), "{err}");
                errors.push(err);
                continue;
            }
            if table.is_source(&source) {
                continue;
            }
            if !target.is_empty() && table.is_target(&target) {
                let err = CompositionError::InvalidRelocate {
                    layer: layer.identifier().to_string(),
                    source_path: source.to_string(),
                    target_path: target.to_string(),
                    reason: "target is already the target of another relocate".into(),
                };
                warn!(kind = err.kind(), "{err}");
                errors.push(err);
                continue;
            }
            table.insert(source, target);
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdf::Specifier;

    fn p(s: &str) -> Path {
        Path::parse(s).expect("valid path")
    }

    #[test]
    fn test_sublayer_order_and_offsets() {
        let registry = LayerRegistry::new();
        let root = registry.create("shot/root.usda");
        let anim = registry.create("shot/anim.usda");
        let model = registry.create("shot/model.usda");
        root.set_sublayer_paths(vec!["./anim.usda".into(), "./model.usda".into()]).expect("sublayers");
        root.set_sublayer_offset(LayerOffset::new(10.0, 1.0), 0).expect("offset");
        anim.set_sublayer_paths(vec!["./model.usda".into()]).expect("sublayers");
        anim.set_sublayer_offset(LayerOffset::new(0.0, 2.0), 0).expect("offset");

        let stack = LayerStack::compute(&root, None, &registry, &CompositionConfig::strict());
        let ids: Vec<&str> = stack.layers().iter().map(|l| l.identifier()).collect();
        assert_eq!(ids, vec!["shot/root.usda", "shot/anim.usda", "shot/model.usda"]);
        assert_eq!(stack.layer_offset_for(&anim), Some(LayerOffset::new(10.0, 1.0)));
        // model reached through anim first
        assert_eq!(stack.layer_offset_for(&model).map(|o| o.apply(1.0)), Some(12.0));
        assert!(stack.errors().is_empty());
    }

    #[test]
    fn test_sublayer_errors() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.usda");
        let sub = registry.create("sub.usda");
        root.set_sublayer_paths(vec!["sub.usda".into(), "missing.usda".into()]).expect("sublayers");
        sub.set_sublayer_paths(vec!["root.usda".into()]).expect("sublayers");
        root.set_sublayer_offset(LayerOffset::new(0.0, -1.0), 0).expect("offset");

        let stack = LayerStack::compute(&root, None, &registry, &CompositionConfig::strict());
        let kinds: Vec<&str> = stack.errors().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["NegativeLayerOffsetScale", "SublayerCycle", "InvalidSublayerPath"]);
        assert_eq!(stack.layer_offset_for(&sub), Some(LayerOffset::identity()));

        let lenient = CompositionConfig::strict().with_negative_layer_offset_scale(true);
        let stack = LayerStack::compute(&root, None, &registry, &lenient);
        assert_eq!(stack.layer_offset_for(&sub), Some(LayerOffset::new(0.0, -1.0)));
        assert_eq!(stack.errors().len(), 2);
    }

    #[test]
    fn test_session_layer_is_strongest() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.usda");
        let session = registry.create_anonymous("session");
        let stack = LayerStack::compute(&root, Some(&session), &registry, &CompositionConfig::strict());
        assert!(Arc::ptr_eq(&stack.layers()[0], &session));
        assert!(stack.has_layer(&root));
        assert_eq!(stack.identifier().session.as_deref(), Some(session.identifier()));
    }

    #[test]
    fn test_compose_relocates() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.usda");
        let sub = registry.create("sub.usda");
        root.set_sublayer_paths(vec!["sub.usda".into()]).expect("sublayers");
        root.create_prim_spec(&p("/World/A"), Specifier::Def).expect("prim");
        root.set_relocates(vec![
            (p("/World/A"), p("/World/B")),
            (p("/World"), p("/Other")),
            (p("/World/C"), p("/World/C/D")),
            (p("/World/E"), Path::empty()),
        ])
        .expect("relocates");
        sub.set_relocates(vec![(p("/World/A"), p("/World/X")), (p("/World/F"), p("/World/B"))])
            .expect("relocates");

        let stack = LayerStack::compute(&root, None, &registry, &CompositionConfig::strict());
        let relocates = stack.relocates();
        assert_eq!(relocates.target_for(&p("/World/A")), Some(&p("/World/B")));
        assert_eq!(relocates.source_for(&p("/World/B")), Some(&p("/World/A")));
        assert_eq!(relocates.target_for(&p("/World/E")), Some(&Path::empty()));
        assert_eq!(relocates.len(), 2);
        assert_eq!(relocates.target_names_under(&p("/World")), vec!["B"]);
        assert_eq!(relocates.source_names_under(&p("/World")), vec!["A", "E"]);
        // root prim, ancestor overlap, duplicate target
        assert_eq!(stack.errors().len(), 3);
        assert!(stack.errors().iter().all(|e| e.kind() == "InvalidRelocate"));
    }
}
