//! Prim indexing.
//!
//! An index starts from its parent's graph carried to the child path, then
//! runs a worklist to a fixed point:
//!
//! 1. evaluate the direct arcs of every unevaluated node (relocates,
//!    references, payloads, inherits, specializes), grafting each target's
//!    ancestral graph under the node;
//! 2. propagate class arcs found under reference-like nodes to the
//!    referencing namespace as implied arcs;
//! 3. once nothing else changes, select variants for the strongest node
//!    with unevaluated variant sets and go again.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::cache::PcpCache;
use super::prim_index::{insert_child_sorted, root_node, strength_order};
use super::{ArcType, CompositionError, LayerStackHandle, MapFunction, Node, NodeId, PrimIndex};
use crate::sdf::{LayerHandle, LayerOffset, ListOp, Reference};
use crate::util::Path;

/// Working state of one index computation.
struct IndexBuilder {
    path: Path,
    include_payloads: bool,
    nodes: Vec<Node>,
    errors: Vec<CompositionError>,
}

impl IndexBuilder {
    fn error(&mut self, err: CompositionError) {
        warn!(kind = err.kind(), path = %self.path, "{err}");
        self.errors.push(err);
    }
}

/// An arc about to be added to the graph.
struct NewArc {
    parent: NodeId,
    arc: ArcType,
    stack: LayerStackHandle,
    path: Path,
    intro_path: Path,
    map: MapFunction,
    sibling_num: usize,
    origin: Option<NodeId>,
    implied: bool,
    /// Graft the target's ancestral graph instead of a lone node.
    ancestral: bool,
}

impl PcpCache {
    /// Index of `path` on `stack`, computed on first use.
    ///
    /// Returns `None` while the same index is being computed further up the
    /// call chain; callers report that as a cycle.
    pub(crate) fn compute_index(&mut self, stack: &LayerStackHandle, path: &Path) -> Option<Arc<PrimIndex>> {
        let key = (stack.identifier().clone(), path.clone());
        if let Some(index) = self.indices.get(&key) {
            return Some(Arc::clone(index));
        }
        if self.in_progress.contains(&key) {
            return None;
        }
        if path.is_absolute_root() {
            let index = Arc::new(PrimIndex::pseudo_root(stack));
            self.indices.insert(key, Arc::clone(&index));
            return Some(index);
        }

        self.in_progress.insert(key.clone());
        let mut nodes = match self.compute_index(stack, &path.parent()) {
            Some(parent) => parent.child_graph(path.name()),
            None => Vec::new(),
        };
        if nodes.is_empty() {
            nodes.push(root_node(stack, path));
        }
        let include_payloads = if Arc::ptr_eq(stack, &self.root_stack) {
            self.payloads.includes(path)
        } else {
            self.payloads.default_inclusion()
        };
        let mut builder = IndexBuilder {
            path: path.clone(),
            include_payloads,
            nodes,
            errors: Vec::new(),
        };
        self.run_worklist(&mut builder);
        self.in_progress.remove(&key);

        let index = Arc::new(PrimIndex::finish(path.clone(), builder.nodes, builder.errors));
        debug!(
            path = %path,
            stack = %stack.identifier(),
            nodes = index.nodes().len(),
            errors = index.errors().len(),
            "computed prim index"
        );
        self.indices.insert(key, Arc::clone(&index));
        Some(index)
    }

    fn run_worklist(&mut self, b: &mut IndexBuilder) {
        loop {
            let before = b.nodes.len();
            let mut i = 0;
            while i < b.nodes.len() {
                if !b.nodes[i].evaluated {
                    b.nodes[i].evaluated = true;
                    self.eval_direct_arcs(b, i);
                }
                i += 1;
            }
            self.eval_implied_arcs(b);
            if b.nodes.len() != before {
                continue;
            }
            if !self.eval_next_variants(b) {
                break;
            }
        }
    }

    // ========================================================================
    // Direct arcs
    // ========================================================================

    fn eval_direct_arcs(&mut self, b: &mut IndexBuilder, id: NodeId) {
        let stack = Arc::clone(&b.nodes[id].layer_stack);
        let site = b.nodes[id].path.clone();

        if let Some(source) = stack.relocates().source_for(&site).cloned() {
            let map = MapFunction::new(source.clone(), site.clone()).with_root_identity(true);
            self.add_arc(
                b,
                NewArc {
                    parent: id,
                    arc: ArcType::Relocate,
                    stack: Arc::clone(&stack),
                    intro_path: source.clone(),
                    path: source,
                    map,
                    sibling_num: 0,
                    origin: None,
                    implied: false,
                    ancestral: true,
                },
            );
        }

        let references = collect_arcs(&stack, |layer| layer.references(&site));
        for (num, (reference, layer)) in references.into_iter().enumerate() {
            self.add_ref_arc(b, id, ArcType::Reference, &reference, &layer, num);
        }
        if b.include_payloads {
            let payloads = collect_arcs(&stack, |layer| layer.payloads(&site));
            for (num, (payload, layer)) in payloads.into_iter().enumerate() {
                self.add_ref_arc(b, id, ArcType::Payload, &payload, &layer, num);
            }
        }
        let inherits = collect_arcs(&stack, |layer| layer.inherits(&site));
        for (num, (class, layer)) in inherits.into_iter().enumerate() {
            self.add_class_arc(b, id, ArcType::Inherit, class, &layer, num);
        }
        let specializes = collect_arcs(&stack, |layer| layer.specializes(&site));
        for (num, (class, layer)) in specializes.into_iter().enumerate() {
            self.add_class_arc(b, id, ArcType::Specialize, class, &layer, num);
        }
    }

    fn add_ref_arc(
        &mut self,
        b: &mut IndexBuilder,
        parent: NodeId,
        arc: ArcType,
        reference: &Reference,
        layer: &LayerHandle,
        sibling_num: usize,
    ) {
        let site = b.nodes[parent].path.clone();
        let parent_stack = Arc::clone(&b.nodes[parent].layer_stack);

        let target_stack = if reference.is_internal() {
            parent_stack.clone()
        } else {
            match self.registry.find_or_resolve(&reference.asset_path, layer) {
                Ok(target) => self.layer_stack_for(&target),
                Err(_) => {
                    b.error(CompositionError::UnresolvedAsset {
                        layer: layer.identifier().to_string(),
                        site: site.to_string(),
                        asset_path: reference.asset_path.clone(),
                        arc: arc.to_string(),
                    });
                    return;
                }
            }
        };

        let target_path = if reference.prim_path.is_empty() {
            match target_stack.root_layer().default_prim() {
                Some(name) => Path::root().append_child(&name),
                None => {
                    b.error(CompositionError::UnresolvedDefaultPrim {
                        target_layer: target_stack.root_layer().identifier().to_string(),
                        site: site.to_string(),
                        arc: arc.to_string(),
                    });
                    return;
                }
            }
        } else {
            reference.prim_path.clone()
        };
        if !target_path.is_prim_path() || target_path.contains_variant_selection() {
            b.error(CompositionError::InvalidTargetPath {
                layer: layer.identifier().to_string(),
                site: site.to_string(),
                target: target_path.to_string(),
                arc: arc.to_string(),
            });
            return;
        }

        let mut offset = reference.layer_offset;
        if !offset.is_valid() {
            b.error(CompositionError::InvalidReferenceOffset {
                layer: layer.identifier().to_string(),
                site: site.to_string(),
                arc: arc.to_string(),
                offset: offset.to_string(),
            });
            offset = LayerOffset::identity();
        } else if offset.scale() < 0.0 {
            if self.config.allow_negative_layer_offset_scale {
                warn!(
                    layer = layer.identifier(),
                    site = %site,
                    scale = offset.scale(),
                    "negative layer offset scale is deprecated"
                );
            } else {
                b.error(CompositionError::NegativeLayerOffsetScale {
                    layer: layer.identifier().to_string(),
                    site: site.to_string(),
                    arc: arc.to_string(),
                    scale: offset.scale(),
                });
                offset = LayerOffset::identity();
            }
        }
        let layer_offset = parent_stack.layer_offset_for(layer).unwrap_or_default();
        let map = MapFunction::new(target_path.clone(), site)
            .with_root_identity(true)
            .with_time_offset(layer_offset.compose(&offset));

        self.add_arc(
            b,
            NewArc {
                parent,
                arc,
                stack: target_stack,
                intro_path: target_path.clone(),
                path: target_path,
                map,
                sibling_num,
                origin: None,
                implied: false,
                ancestral: true,
            },
        );
    }

    fn add_class_arc(
        &mut self,
        b: &mut IndexBuilder,
        parent: NodeId,
        arc: ArcType,
        class: Path,
        layer: &LayerHandle,
        sibling_num: usize,
    ) {
        let site = b.nodes[parent].path.clone();
        if !class.is_prim_path() || class.contains_variant_selection() {
            b.error(CompositionError::InvalidTargetPath {
                layer: layer.identifier().to_string(),
                site: site.to_string(),
                target: class.to_string(),
                arc: arc.to_string(),
            });
            return;
        }
        let stack = Arc::clone(&b.nodes[parent].layer_stack);
        let map = MapFunction::new(class.clone(), site);
        self.add_arc(
            b,
            NewArc {
                parent,
                arc,
                stack,
                intro_path: class.clone(),
                path: class,
                map,
                sibling_num,
                origin: None,
                implied: false,
                ancestral: true,
            },
        );
    }

    // ========================================================================
    // Grafting
    // ========================================================================

    /// Add an arc under `new.parent`, grafting the target's ancestral graph
    /// when asked to. Returns the new node, or `None` when the arc was
    /// skipped as a duplicate or a cycle.
    fn add_arc(&mut self, b: &mut IndexBuilder, new: NewArc) -> Option<NodeId> {
        let stack_id = new.stack.identifier();
        let duplicate = b.nodes[new.parent]
            .children
            .iter()
            .any(|&c| b.nodes[c].layer_stack.identifier() == stack_id && b.nodes[c].path == new.path);
        if duplicate {
            trace!(path = %new.path, arc = %new.arc, "skipping duplicate arc");
            return None;
        }

        let mut graft: Vec<Node> = Vec::new();
        if new.ancestral {
            let target = if self.chain_revisits(b, new.parent, &new.stack, &new.path) {
                None
            } else {
                self.compute_index(&new.stack, &new.path.parent())
            };
            match target {
                Some(index) => graft = index.child_graph(new.path.name()),
                None => {
                    if !new.implied {
                        b.error(CompositionError::ArcCycle {
                            site: b.nodes[new.parent].path.to_string(),
                            target: new.path.to_string(),
                            arc: new.arc.to_string(),
                        });
                    }
                    return None;
                }
            }
        }

        let mut node = Node::new(new.arc, new.stack, new.path, new.map);
        node.parent = Some(new.parent);
        node.origin = new.origin;
        node.intro_path = new.intro_path;
        node.namespace_depth = b.path.depth();
        node.sibling_num = new.sibling_num;
        node.implied = new.implied;
        node.inert = new.arc == ArcType::Relocate;
        node.evaluated = node.inert;
        node.implied_done = node.inert;
        node.variants_done = node.inert;
        node.map_to_root = b.nodes[new.parent].map_to_root.compose(&node.map_to_parent);

        let base = b.nodes.len();
        if let Some(first) = graft.first() {
            node.children = first.children.iter().map(|c| c + base).collect();
        }
        b.nodes.push(node);
        for mut sub in graft.into_iter().skip(1) {
            sub.parent = sub.parent.map(|p| p + base);
            sub.origin = sub.origin.map(|o| o + base);
            sub.children = sub.children.iter().map(|c| c + base).collect();
            b.nodes.push(sub);
        }
        for i in base + 1..b.nodes.len() {
            if let Some(p) = b.nodes[i].parent {
                b.nodes[i].map_to_root = b.nodes[p].map_to_root.compose(&b.nodes[i].map_to_parent);
            }
        }
        insert_child_sorted(&mut b.nodes, new.parent, base);
        trace!(
            index = %b.path,
            arc = %b.nodes[base].arc,
            path = %b.nodes[base].path,
            grafted = b.nodes.len() - base - 1,
            "added node"
        );
        Some(base)
    }

    /// Check if an arc to `path` on `stack` leads back to a site on the
    /// chain from `from` up to the root.
    fn chain_revisits(&self, b: &IndexBuilder, from: NodeId, stack: &LayerStackHandle, path: &Path) -> bool {
        let mut cur = Some(from);
        while let Some(id) = cur {
            let node = &b.nodes[id];
            if node.layer_stack.identifier() == stack.identifier() {
                let site = node.path.strip_all_variant_selections();
                if site.has_prefix(path) || path.has_prefix(&site) {
                    return true;
                }
            }
            cur = node.parent;
        }
        false
    }

    // ========================================================================
    // Implied arcs
    // ========================================================================

    fn eval_implied_arcs(&mut self, b: &mut IndexBuilder) {
        let mut i = 0;
        while i < b.nodes.len() {
            let id = i;
            i += 1;
            if b.nodes[id].implied_done || !b.nodes[id].arc.is_class_based() {
                continue;
            }
            b.nodes[id].implied_done = true;

            let Some(carrier) = b.nodes[id].parent else {
                continue;
            };
            if !matches!(
                b.nodes[carrier].arc,
                ArcType::Reference | ArcType::Payload | ArcType::Relocate | ArcType::Variant
            ) {
                continue;
            }
            let Some(dest) = b.nodes[carrier].parent else {
                continue;
            };

            let across = b.nodes[carrier].map_to_parent.clone();
            let class = &b.nodes[id];
            let Some(path) = across.map_source_to_target_with_root_identity(&class.path) else {
                continue;
            };
            let Some(intro_path) = across.map_source_to_target_with_root_identity(&class.intro_path) else {
                continue;
            };
            let mut pairs = Vec::new();
            for (source, target) in class.map_to_parent.pairs() {
                match (
                    across.map_source_to_target_with_root_identity(source),
                    across.map_source_to_target_with_root_identity(target),
                ) {
                    (Some(s), Some(t)) => pairs.push((s, t)),
                    _ => continue,
                }
            }
            if pairs.is_empty() {
                continue;
            }

            let dest_stack = Arc::clone(&b.nodes[dest].layer_stack);
            let exists = b
                .nodes
                .iter()
                .any(|n| n.layer_stack.identifier() == dest_stack.identifier() && n.path == path);
            if exists {
                continue;
            }

            let map = MapFunction::from_pairs(pairs)
                .with_time_offset(across.time_offset().compose(&class.map_to_parent.time_offset()));
            let arc = class.arc;
            let sibling_num = class.sibling_num;
            trace!(index = %b.path, class = %path, arc = %arc, "implied class arc");
            self.add_arc(
                b,
                NewArc {
                    parent: dest,
                    arc,
                    stack: dest_stack,
                    path,
                    intro_path,
                    map,
                    sibling_num,
                    origin: Some(id),
                    implied: true,
                    ancestral: true,
                },
            );
        }
    }

    // ========================================================================
    // Variants
    // ========================================================================

    /// Select variants for the strongest node with unevaluated variant
    /// sets. Returns `false` when no node is left.
    fn eval_next_variants(&mut self, b: &mut IndexBuilder) -> bool {
        let order = strength_order(&b.nodes);
        let Some(id) = order
            .iter()
            .copied()
            .find(|&id| !b.nodes[id].variants_done && !b.nodes[id].inert)
        else {
            return false;
        };
        b.nodes[id].variants_done = true;

        let stack = Arc::clone(&b.nodes[id].layer_stack);
        let site = b.nodes[id].path.clone();
        let ops: Vec<ListOp<String>> = stack.layers().iter().map(|l| l.variant_set_names(&site)).collect();
        let sets = ListOp::compose_strongest_first(ops.iter());

        for (num, set) in sets.iter().enumerate() {
            let Some(selection) = self.variant_selection(b, &order, id, set) else {
                trace!(site = %site, set = %set, "no variant selected");
                continue;
            };
            let variant_path = site.append_variant_selection(set, &selection);
            let map = MapFunction::new(variant_path.clone(), site.clone());
            self.add_arc(
                b,
                NewArc {
                    parent: id,
                    arc: ArcType::Variant,
                    stack: Arc::clone(&stack),
                    intro_path: variant_path.clone(),
                    path: variant_path,
                    map,
                    sibling_num: num,
                    origin: None,
                    implied: false,
                    ancestral: false,
                },
            );
        }
        true
    }

    /// The strongest authored selection for `set` across the graph, then
    /// the first fallback with a variant in the owning node's stack.
    fn variant_selection(&self, b: &IndexBuilder, order: &[NodeId], owner: NodeId, set: &str) -> Option<String> {
        for &id in order {
            let node = &b.nodes[id];
            if node.inert {
                continue;
            }
            for layer in node.layer_stack.layers() {
                if let Some(selection) = layer.variant_selections(&node.path).get(set) {
                    return (!selection.is_empty()).then(|| selection.clone());
                }
            }
        }
        let node = &b.nodes[owner];
        self.variant_fallbacks.get(set)?.iter().find_map(|fallback| {
            node.layer_stack
                .layers()
                .iter()
                .any(|l| l.variant_names(&node.path, set).contains(fallback))
                .then(|| fallback.clone())
        })
    }
}

/// Arc items authored at a site, composed strongest first, each paired
/// with the strongest layer that mentions it.
fn collect_arcs<T, F>(stack: &LayerStackHandle, field: F) -> Vec<(T, LayerHandle)>
where
    T: Clone + PartialEq,
    F: Fn(&LayerHandle) -> ListOp<T>,
{
    let ops: Vec<(LayerHandle, ListOp<T>)> = stack
        .layers()
        .iter()
        .map(|layer| (Arc::clone(layer), field(layer)))
        .filter(|(_, op)| !op.is_empty())
        .collect();
    if ops.is_empty() {
        return Vec::new();
    }
    let items = ListOp::compose_strongest_first(ops.iter().map(|(_, op)| op));
    items
        .into_iter()
        .filter_map(|item| {
            let layer = ops.iter().find(|(_, op)| op.items().any(|i| *i == item))?;
            Some((item, Arc::clone(&layer.0)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::pcp::PayloadSet;
    use crate::sdf::{LayerRegistry, Specifier};
    use crate::util::{CompositionConfig, InitialLoadSet};

    fn p(s: &str) -> Path {
        Path::parse(s).expect("valid path")
    }

    fn cache_with(registry: &Arc<LayerRegistry>, root: &LayerHandle, config: CompositionConfig) -> PcpCache {
        PcpCache::new(
            Arc::clone(registry),
            root,
            None,
            config,
            BTreeMap::new(),
            PayloadSet::new(InitialLoadSet::LoadAll),
        )
    }

    fn cache(registry: &Arc<LayerRegistry>, root: &LayerHandle) -> PcpCache {
        cache_with(registry, root, CompositionConfig::strict())
    }

    fn stack_sites(index: &PrimIndex) -> Vec<(String, String)> {
        index
            .prim_stack()
            .iter()
            .map(|e| (e.layer.identifier().to_string(), e.path.to_string()))
            .collect()
    }

    fn arcs(index: &PrimIndex) -> Vec<(ArcType, String)> {
        index
            .strength_order()
            .iter()
            .map(|&id| (index.node(id).arc(), index.node(id).path().to_string()))
            .collect()
    }

    fn site(layer: &str, path: &str) -> (String, String) {
        (layer.to_string(), path.to_string())
    }

    #[test]
    fn test_reference_composes_target() {
        let registry = LayerRegistry::new();
        let model = registry.create("model.usda");
        model.create_prim_spec(&p("/Model/Child"), Specifier::Def).expect("spec");
        model.create_attribute_spec(&p("/Model.size"), "double").expect("attr");
        let shot = registry.create("shot.usda");
        shot.create_prim_spec(&p("/Char"), Specifier::Def).expect("spec");
        shot.set_references(&p("/Char"), ListOp::prepended(vec![Reference::new("model.usda", p("/Model"))]))
            .expect("refs");

        let mut cache = cache(&registry, &shot);
        cache.populate();
        let index = cache.find_prim_index(&p("/Char")).expect("index");
        assert_eq!(stack_sites(&index), vec![site("shot.usda", "/Char"), site("model.usda", "/Model")]);
        assert_eq!(index.child_names(), ["Child".to_string()]);
        assert_eq!(index.property_names(), ["size".to_string()]);
        assert!(index.errors().is_empty());

        let child = cache.find_prim_index(&p("/Char/Child")).expect("child index");
        assert_eq!(stack_sites(&child), vec![site("model.usda", "/Model/Child")]);
        let deps = cache.find_site_dependencies(&model, &p("/Model/Child"));
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].prim_path, p("/Char/Child"));
        assert!(deps[0].ancestral);
    }

    #[test]
    fn test_default_prim_and_unresolved_targets() {
        let registry = LayerRegistry::new();
        let model = registry.create("model.usda");
        model.create_prim_spec(&p("/Model"), Specifier::Def).expect("spec");
        model.set_default_prim("Model").expect("default prim");
        let bare = registry.create("bare.usda");
        bare.create_prim_spec(&p("/Thing"), Specifier::Def).expect("spec");
        let shot = registry.create("shot.usda");
        shot.create_prim_spec(&p("/A"), Specifier::Def).expect("spec");
        shot.set_references(
            &p("/A"),
            ListOp::explicit(vec![
                Reference::new("model.usda", Path::empty()),
                Reference::new("bare.usda", Path::empty()),
                Reference::new("missing.usda", p("/X")),
            ]),
        )
        .expect("refs");

        let mut cache = cache(&registry, &shot);
        let index = cache.compute_prim_index(&p("/A")).expect("index");
        assert_eq!(stack_sites(&index), vec![site("shot.usda", "/A"), site("model.usda", "/Model")]);
        let kinds: Vec<&str> = index.errors().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["UnresolvedDefaultPrim", "UnresolvedAsset"]);
    }

    #[test]
    fn test_implied_inherit_in_referencing_stack() {
        let registry = LayerRegistry::new();
        let model = registry.create("model.usda");
        model.create_prim_spec(&p("/Model"), Specifier::Def).expect("spec");
        model.create_prim_spec(&p("/Class"), Specifier::Class).expect("spec");
        model.set_inherits(&p("/Model"), ListOp::prepended(vec![p("/Class")])).expect("inherits");
        let shot = registry.create("shot.usda");
        shot.create_prim_spec(&p("/Char"), Specifier::Def).expect("spec");
        shot.create_prim_spec(&p("/Class"), Specifier::Class).expect("spec");
        shot.set_references(&p("/Char"), ListOp::prepended(vec![Reference::new("model.usda", p("/Model"))]))
            .expect("refs");

        let mut cache = cache(&registry, &shot);
        let index = cache.compute_prim_index(&p("/Char")).expect("index");
        assert_eq!(
            arcs(&index),
            vec![
                (ArcType::Root, "/Char".to_string()),
                (ArcType::Inherit, "/Class".to_string()),
                (ArcType::Reference, "/Model".to_string()),
                (ArcType::Inherit, "/Class".to_string()),
            ]
        );
        let implied = index.node(index.strength_order()[1]);
        assert!(implied.is_implied());
        assert!(implied.origin().is_some());
        assert_eq!(
            stack_sites(&index),
            vec![
                site("shot.usda", "/Char"),
                site("shot.usda", "/Class"),
                site("model.usda", "/Model"),
                site("model.usda", "/Class"),
            ]
        );
    }

    #[test]
    fn test_specializes_are_weakest() {
        let registry = LayerRegistry::new();
        let layer = registry.create("root.usda");
        for path in ["/A", "/R", "/Spec", "/Cls"] {
            layer.create_prim_spec(&p(path), Specifier::Def).expect("spec");
        }
        layer.set_references(&p("/A"), ListOp::prepended(vec![Reference::internal(p("/R"))])).expect("refs");
        layer.set_inherits(&p("/A"), ListOp::prepended(vec![p("/Cls")])).expect("inherits");
        layer.set_specializes(&p("/R"), ListOp::prepended(vec![p("/Spec")])).expect("specializes");

        let mut cache = cache(&registry, &layer);
        let index = cache.compute_prim_index(&p("/A")).expect("index");
        let order: Vec<ArcType> = arcs(&index).into_iter().map(|(arc, _)| arc).collect();
        assert_eq!(order, vec![ArcType::Root, ArcType::Inherit, ArcType::Reference, ArcType::Specialize]);
        assert_eq!(index.prim_stack().last().map(|e| e.path.clone()), Some(p("/Spec")));
    }

    #[test]
    fn test_variant_selection_and_fallback() {
        let registry = LayerRegistry::new();
        let layer = registry.create("set.usda");
        for prim in ["/Set", "/Other"] {
            layer.create_prim_spec(&p(prim), Specifier::Def).expect("spec");
            layer
                .set_variant_set_names(&p(prim), ListOp::prepended(vec!["shading".to_string()]))
                .expect("sets");
            for variant in ["red", "blue"] {
                layer.create_variant_spec(&p(prim), "shading", variant).expect("variant");
            }
        }
        layer.create_prim_spec(&p("/Set{shading=blue}Leaf"), Specifier::Def).expect("spec");
        layer.set_variant_selection(&p("/Set"), "shading", Some("blue")).expect("selection");

        let mut fallbacks = BTreeMap::new();
        fallbacks.insert("shading".to_string(), vec!["green".to_string(), "red".to_string()]);
        let mut cache = PcpCache::new(
            Arc::clone(&registry),
            &layer,
            None,
            CompositionConfig::strict(),
            fallbacks,
            PayloadSet::new(InitialLoadSet::LoadAll),
        );
        cache.populate();

        let index = cache.find_prim_index(&p("/Set")).expect("index");
        assert_eq!(index.variant_selection("shading"), Some("blue"));
        assert_eq!(index.child_names(), ["Leaf".to_string()]);
        let leaf = cache.find_prim_index(&p("/Set/Leaf")).expect("leaf");
        assert_eq!(stack_sites(&leaf), vec![site("set.usda", "/Set{shading=blue}Leaf")]);

        let other = cache.find_prim_index(&p("/Other")).expect("index");
        assert_eq!(other.variant_selection("shading"), Some("red"));
    }

    #[test]
    fn test_relocated_prim_composes_source() {
        let registry = LayerRegistry::new();
        let model = registry.create("model.usda");
        model.create_prim_spec(&p("/Model/Rig"), Specifier::Def).expect("spec");
        model.create_attribute_spec(&p("/Model/Rig.weight"), "double").expect("attr");
        let shot = registry.create("shot.usda");
        shot.create_prim_spec(&p("/Char"), Specifier::Def).expect("spec");
        shot.set_references(&p("/Char"), ListOp::prepended(vec![Reference::new("model.usda", p("/Model"))]))
            .expect("refs");
        shot.set_relocates(vec![(p("/Char/Rig"), p("/Char/Anim"))]).expect("relocates");

        let mut cache = cache(&registry, &shot);
        cache.populate();
        let char_index = cache.find_prim_index(&p("/Char")).expect("index");
        assert_eq!(char_index.child_names(), ["Anim".to_string()]);
        assert!(!cache.is_populated(&p("/Char/Rig")));

        let anim = cache.find_prim_index(&p("/Char/Anim")).expect("index");
        assert!(anim.nodes().iter().any(|n| n.arc() == ArcType::Relocate && n.is_inert()));
        assert_eq!(stack_sites(&anim), vec![site("model.usda", "/Model/Rig")]);
        assert_eq!(anim.property_names(), ["weight".to_string()]);

        let deps = cache.find_site_dependencies(&model, &p("/Model/Rig"));
        assert!(deps.iter().any(|d| d.prim_path == p("/Char/Anim")));
    }

    #[test]
    fn test_reference_cycle_is_reported() {
        let registry = LayerRegistry::new();
        let layer = registry.create("root.usda");
        layer.create_prim_spec(&p("/A"), Specifier::Def).expect("spec");
        layer.create_prim_spec(&p("/B"), Specifier::Def).expect("spec");
        layer.set_references(&p("/A"), ListOp::prepended(vec![Reference::internal(p("/B"))])).expect("refs");
        layer.set_references(&p("/B"), ListOp::prepended(vec![Reference::internal(p("/A"))])).expect("refs");

        let mut cache = cache(&registry, &layer);
        let index = cache.compute_prim_index(&p("/A")).expect("index");
        assert!(index.errors().iter().any(|e| e.kind() == "ArcCycle"));
        assert_eq!(stack_sites(&index), vec![site("root.usda", "/A"), site("root.usda", "/B")]);
    }

    #[test]
    fn test_negative_reference_scale() {
        let registry = LayerRegistry::new();
        let model = registry.create("model.usda");
        model.create_prim_spec(&p("/Model"), Specifier::Def).expect("spec");
        let shot = registry.create("shot.usda");
        shot.create_prim_spec(&p("/A"), Specifier::Def).expect("spec");
        let reference = Reference::new("model.usda", p("/Model")).with_offset(LayerOffset::new(5.0, -1.0));
        shot.set_references(&p("/A"), ListOp::prepended(vec![reference])).expect("refs");

        let mut strict = cache(&registry, &shot);
        let index = strict.compute_prim_index(&p("/A")).expect("index");
        let kinds: Vec<&str> = index.errors().iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["NegativeLayerOffsetScale"]);
        assert_eq!(index.prim_stack()[1].offset, LayerOffset::identity());

        let lenient_config = CompositionConfig::strict().with_negative_layer_offset_scale(true);
        let mut lenient = cache_with(&registry, &shot, lenient_config);
        let index = lenient.compute_prim_index(&p("/A")).expect("index");
        assert!(index.errors().is_empty());
        assert_eq!(index.prim_stack()[1].offset, LayerOffset::new(5.0, -1.0));
    }

    #[test]
    fn test_invalid_reference_offset() {
        let registry = LayerRegistry::new();
        let model = registry.create("model.usda");
        model.create_prim_spec(&p("/Model"), Specifier::Def).expect("spec");
        let shot = registry.create("shot.usda");
        shot.create_prim_spec(&p("/A"), Specifier::Def).expect("spec");
        shot.create_prim_spec(&p("/B"), Specifier::Def).expect("spec");
        let zero_scale = Reference::new("model.usda", p("/Model")).with_offset(LayerOffset::new(3.0, 0.0));
        shot.set_references(&p("/A"), ListOp::prepended(vec![zero_scale])).expect("refs");
        let nan_offset = Reference::new("model.usda", p("/Model")).with_offset(LayerOffset::new(f64::NAN, 1.0));
        shot.set_payloads(&p("/B"), ListOp::prepended(vec![nan_offset])).expect("payloads");

        let mut cache = cache(&registry, &shot);
        for path in ["/A", "/B"] {
            let index = cache.compute_prim_index(&p(path)).expect("index");
            let kinds: Vec<&str> = index.errors().iter().map(|e| e.kind()).collect();
            assert_eq!(kinds, vec!["InvalidReferenceOffset"]);
            assert_eq!(index.prim_stack().len(), 2);
            assert_eq!(index.prim_stack()[1].offset, LayerOffset::identity());
        }
    }

    #[test]
    fn test_payload_inclusion() {
        let registry = LayerRegistry::new();
        let model = registry.create("model.usda");
        model.create_prim_spec(&p("/Model"), Specifier::Def).expect("spec");
        let shot = registry.create("shot.usda");
        shot.create_prim_spec(&p("/A"), Specifier::Def).expect("spec");
        shot.set_payloads(&p("/A"), ListOp::prepended(vec![Reference::new("model.usda", p("/Model"))]))
            .expect("payloads");

        let mut payloads = PayloadSet::new(InitialLoadSet::LoadNone);
        let mut unloaded = PcpCache::new(
            Arc::clone(&registry),
            &shot,
            None,
            CompositionConfig::strict(),
            BTreeMap::new(),
            payloads.clone(),
        );
        let index = unloaded.compute_prim_index(&p("/A")).expect("index");
        assert_eq!(index.prim_stack().len(), 1);

        payloads.load(&p("/A"));
        let mut loaded = PcpCache::new(
            Arc::clone(&registry),
            &shot,
            None,
            CompositionConfig::strict(),
            BTreeMap::new(),
            payloads,
        );
        let index = loaded.compute_prim_index(&p("/A")).expect("index");
        assert_eq!(index.node(index.strength_order()[1]).arc(), ArcType::Payload);
        assert_eq!(index.prim_stack().len(), 2);
    }
}
