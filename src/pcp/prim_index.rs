//! Prim indices: the composed node graph of one prim.
//!
//! The graph lives in an arena; node 0 is the root node. A parent always
//! precedes its children in the arena, and children are kept in strength
//! order.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use super::{ArcType, CompositionError, LayerStackHandle, MapFunction, Node, NodeId};
use crate::sdf::{LayerHandle, LayerOffset};
use crate::util::Path;

/// One opinion source of a prim: a spec in a layer and the offset mapping
/// that layer's time to stage time.
#[derive(Clone, Debug)]
pub struct PrimStackEntry {
    pub layer: LayerHandle,
    pub path: Path,
    pub offset: LayerOffset,
}

impl PrimStackEntry {
    /// `(layer identifier, spec path)`.
    pub fn site(&self) -> (String, Path) {
        (self.layer.identifier().to_string(), self.path.clone())
    }
}

impl PartialEq for PrimStackEntry {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.layer, &other.layer) && self.path == other.path && self.offset == other.offset
    }
}

/// Composition result for one prim path on one layer stack.
#[derive(Debug)]
pub struct PrimIndex {
    path: Path,
    nodes: Vec<Node>,
    order: Vec<NodeId>,
    prim_stack: Vec<PrimStackEntry>,
    child_names: Vec<String>,
    property_names: Vec<String>,
    variant_selections: BTreeMap<String, String>,
    errors: Vec<CompositionError>,
}

impl PrimIndex {
    /// Index of the pseudo-root: a single root node at `/`.
    pub(crate) fn pseudo_root(stack: &LayerStackHandle) -> Self {
        let node = root_node(stack, &Path::root());
        Self::finish(Path::root(), vec![node], Vec::new())
    }

    /// Finalize a computed graph.
    pub(crate) fn finish(path: Path, mut nodes: Vec<Node>, errors: Vec<CompositionError>) -> Self {
        for node in nodes.iter_mut() {
            node.has_specs = node.layer_stack.has_spec(&node.path);
        }
        let order = strength_order(&nodes);
        let mut index = Self {
            path,
            nodes,
            order,
            prim_stack: Vec::new(),
            child_names: Vec::new(),
            property_names: Vec::new(),
            variant_selections: BTreeMap::new(),
            errors,
        };
        index.prim_stack = index.compute_prim_stack();
        index.child_names = index.compute_child_names();
        index.property_names = index.compute_property_names();
        index.variant_selections = index
            .order
            .iter()
            .filter_map(|&id| index.nodes[id].path.variant_selection())
            .fold(BTreeMap::new(), |mut map, (set, variant)| {
                map.entry(set.to_string()).or_insert_with(|| variant.to_string());
                map
            });
        index
    }

    // ========================================================================
    // Queries
    // ========================================================================

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn root_node(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Nodes in arena order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Node ids, strongest first.
    pub fn strength_order(&self) -> &[NodeId] {
        &self.order
    }

    /// Opinion sources, strongest first.
    pub fn prim_stack(&self) -> &[PrimStackEntry] {
        &self.prim_stack
    }

    /// Composed child prim names.
    pub fn child_names(&self) -> &[String] {
        &self.child_names
    }

    /// Property names authored on any contributing node.
    pub fn property_names(&self) -> &[String] {
        &self.property_names
    }

    /// Selected variant for `set`, if a variant node for it exists.
    pub fn variant_selection(&self, set: &str) -> Option<&str> {
        self.variant_selections.get(set).map(String::as_str)
    }

    pub fn errors(&self) -> &[CompositionError] {
        &self.errors
    }

    /// Check if any node contributes specs.
    pub fn has_specs(&self) -> bool {
        self.nodes.iter().any(|n| n.has_specs && !n.inert)
    }

    /// `id` and every node below it, in arena order.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = vec![id];
        let mut i = 0;
        while i < out.len() {
            out.extend(self.nodes[out[i]].children.iter().copied());
            i += 1;
        }
        out.sort_unstable();
        out
    }

    /// Chain from `id` up to the root, `id` first.
    pub fn ancestors_of(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = vec![id];
        let mut cur = self.nodes[id].parent;
        while let Some(p) = cur {
            out.push(p);
            cur = self.nodes[p].parent;
        }
        out
    }

    // ========================================================================
    // Child indices
    // ========================================================================

    /// The graph carried to child prim `name`: every node at its child
    /// path, minus nodes whose layer stack relocates that path away.
    pub(crate) fn child_graph(&self, name: &str) -> Vec<Node> {
        let mut remap: Vec<Option<NodeId>> = vec![None; self.nodes.len()];
        let mut out: Vec<Node> = Vec::with_capacity(self.nodes.len());
        for (id, node) in self.nodes.iter().enumerate() {
            let parent = match node.parent {
                Some(p) => match remap[p] {
                    Some(np) => Some(np),
                    None => continue,
                },
                None => None,
            };
            let child_path = node.path.append_child(name);
            if id != 0 && node.layer_stack.relocates().is_source(&child_path) {
                continue;
            }
            let mut copy = node.clone();
            copy.path = child_path;
            copy.parent = parent;
            copy.origin = node.origin.and_then(|o| remap[o]);
            copy.children.clear();
            copy.has_specs = false;
            copy.evaluated = copy.inert;
            copy.implied_done = copy.inert;
            copy.variants_done = copy.inert;
            if id == 0 {
                copy.intro_path = copy.path.clone();
                copy.namespace_depth = copy.path.depth();
            }
            remap[id] = Some(out.len());
            out.push(copy);
        }
        for (id, node) in self.nodes.iter().enumerate() {
            if let Some(new_id) = remap[id] {
                out[new_id].children = node.children.iter().filter_map(|c| remap[*c]).collect();
            }
        }
        out
    }

    // ========================================================================
    // Derived data
    // ========================================================================

    fn compute_prim_stack(&self) -> Vec<PrimStackEntry> {
        let mut seen: HashSet<(usize, Path)> = HashSet::new();
        let mut stack = Vec::new();
        for &id in &self.order {
            let node = &self.nodes[id];
            if node.inert || !node.has_specs {
                continue;
            }
            let node_offset = node.map_to_root.time_offset();
            for (layer, offset) in node.layer_stack.layers_with_offsets() {
                if !layer.has_spec(&node.path) {
                    continue;
                }
                let key = (Arc::as_ptr(layer) as usize, node.path.clone());
                if seen.insert(key) {
                    stack.push(PrimStackEntry {
                        layer: Arc::clone(layer),
                        path: node.path.clone(),
                        offset: node_offset.compose(&offset),
                    });
                }
            }
        }
        stack
    }

    fn compute_child_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let mut push = |name: String| {
            if !names.contains(&name) {
                names.push(name);
            }
        };
        for &id in &self.order {
            let node = &self.nodes[id];
            if node.inert {
                continue;
            }
            let relocates = node.layer_stack.relocates();
            let removed = relocates.source_names_under(&node.path);
            let mut local: Vec<String> = Vec::new();
            for layer in node.layer_stack.layers() {
                for name in layer.prim_children(&node.path) {
                    if !local.contains(&name) {
                        local.push(name);
                    }
                }
            }
            for name in relocates.target_names_under(&node.path) {
                if !local.contains(&name) {
                    local.push(name);
                }
            }
            for name in local.into_iter().filter(|n| !removed.contains(n)) {
                let child = node.path.append_child(&name);
                let Some(mapped) = node.map_to_root.map_source_to_target(&child) else {
                    continue;
                };
                if mapped.parent() == self.path {
                    push(mapped.name().to_string());
                }
            }
        }
        let root_removed = self.nodes[0].layer_stack.relocates().source_names_under(&self.path);
        names.retain(|n| !root_removed.contains(n));
        names
    }

    fn compute_property_names(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        for node in self.nodes.iter().filter(|n| !n.inert && n.has_specs) {
            for layer in node.layer_stack.layers() {
                names.extend(layer.property_names(&node.path));
            }
        }
        names.into_iter().collect()
    }
}

/// Root node of an index at `path`.
pub(crate) fn root_node(stack: &LayerStackHandle, path: &Path) -> Node {
    let mut node = Node::new(ArcType::Root, Arc::clone(stack), path.clone(), MapFunction::identity());
    node.namespace_depth = path.depth();
    node
}

/// Pre-order walk by sibling strength, with specialize subtrees moved
/// after everything else.
pub(crate) fn strength_order(nodes: &[Node]) -> Vec<NodeId> {
    let mut out = Vec::with_capacity(nodes.len());
    if nodes.is_empty() {
        return out;
    }
    let mut deferred = VecDeque::from([0]);
    while let Some(start) = deferred.pop_front() {
        visit(nodes, start, &mut out, &mut deferred);
    }
    out
}

fn visit(nodes: &[Node], id: NodeId, out: &mut Vec<NodeId>, deferred: &mut VecDeque<NodeId>) {
    out.push(id);
    for &child in &nodes[id].children {
        if nodes[child].arc == ArcType::Specialize {
            deferred.push_back(child);
        } else {
            visit(nodes, child, out, deferred);
        }
    }
}

/// Insert `child` into `parent`'s children at its strength position.
pub(crate) fn insert_child_sorted(nodes: &mut [Node], parent: NodeId, child: NodeId) {
    let key = nodes[child].sibling_key();
    let position = nodes[parent]
        .children
        .iter()
        .position(|&c| nodes[c].sibling_key() > key)
        .unwrap_or(nodes[parent].children.len());
    nodes[parent].children.insert(position, child);
}
