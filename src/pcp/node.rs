//! Composition graph nodes.

use std::cmp::Reverse;
use std::fmt;

use smallvec::SmallVec;

use super::{LayerStackHandle, MapFunction};
use crate::util::Path;

/// Index of a node in its prim index arena.
pub type NodeId = usize;

/// Kind of arc that introduced a node, in strength order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArcType {
    Root,
    Inherit,
    Variant,
    Relocate,
    Reference,
    Payload,
    Specialize,
}

impl ArcType {
    /// Strength rank among sibling arcs; lower is stronger.
    #[inline]
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    /// Check if this is an inherit or specialize arc.
    #[inline]
    pub fn is_class_based(&self) -> bool {
        matches!(self, Self::Inherit | Self::Specialize)
    }

    /// Check if this is a reference or payload arc.
    #[inline]
    pub fn is_ref_like(&self) -> bool {
        matches!(self, Self::Reference | Self::Payload)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Inherit => "inherit",
            Self::Variant => "variant",
            Self::Relocate => "relocate",
            Self::Reference => "reference",
            Self::Payload => "payload",
            Self::Specialize => "specialize",
        }
    }
}

impl fmt::Display for ArcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One node of a prim index graph.
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) path: Path,
    pub(crate) arc: ArcType,
    pub(crate) layer_stack: LayerStackHandle,
    pub(crate) map_to_parent: MapFunction,
    pub(crate) map_to_root: MapFunction,
    pub(crate) parent: Option<NodeId>,
    pub(crate) origin: Option<NodeId>,
    pub(crate) children: SmallVec<[NodeId; 4]>,
    pub(crate) intro_path: Path,
    pub(crate) namespace_depth: usize,
    pub(crate) sibling_num: usize,
    pub(crate) implied: bool,
    pub(crate) has_specs: bool,
    pub(crate) inert: bool,
    // worklist state
    pub(crate) evaluated: bool,
    pub(crate) implied_done: bool,
    pub(crate) variants_done: bool,
}

impl Node {
    pub(crate) fn new(arc: ArcType, layer_stack: LayerStackHandle, path: Path, map_to_parent: MapFunction) -> Self {
        Self {
            intro_path: path.clone(),
            path,
            arc,
            layer_stack,
            map_to_root: map_to_parent.clone(),
            map_to_parent,
            parent: None,
            origin: None,
            children: SmallVec::new(),
            namespace_depth: 0,
            sibling_num: 0,
            implied: false,
            has_specs: false,
            inert: false,
            evaluated: false,
            implied_done: false,
            variants_done: false,
        }
    }

    /// Site path in this node's layer stack namespace.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn arc(&self) -> ArcType {
        self.arc
    }

    pub fn layer_stack(&self) -> &LayerStackHandle {
        &self.layer_stack
    }

    /// Mapping from this node's namespace into its parent's.
    pub fn map_to_parent(&self) -> &MapFunction {
        &self.map_to_parent
    }

    /// Mapping from this node's namespace into the index root's.
    pub fn map_to_root(&self) -> &MapFunction {
        &self.map_to_root
    }

    #[inline]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Class node this implied node was propagated from.
    #[inline]
    pub fn origin(&self) -> Option<NodeId> {
        self.origin
    }

    /// Children, strongest first.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Arc target path at the namespace level where the arc was authored.
    pub fn intro_path(&self) -> &Path {
        &self.intro_path
    }

    /// Depth of the root namespace site that introduced this arc.
    #[inline]
    pub fn namespace_depth(&self) -> usize {
        self.namespace_depth
    }

    #[inline]
    pub fn sibling_num(&self) -> usize {
        self.sibling_num
    }

    #[inline]
    pub fn is_implied(&self) -> bool {
        self.implied
    }

    #[inline]
    pub fn has_specs(&self) -> bool {
        self.has_specs
    }

    /// Inert nodes contribute no opinions.
    #[inline]
    pub fn is_inert(&self) -> bool {
        self.inert
    }

    /// Check if the arc was introduced at the index path itself.
    pub fn is_direct_at(&self, index_path: &Path) -> bool {
        self.arc == ArcType::Root || self.namespace_depth >= index_path.depth()
    }

    /// Sibling order: arc strength, deeper introduction first, direct
    /// before implied, then authored position.
    pub(crate) fn sibling_key(&self) -> (u8, Reverse<usize>, bool, usize) {
        (self.arc.rank(), Reverse(self.namespace_depth), self.implied, self.sibling_num)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arc_strength_order() {
        let order = [
            ArcType::Root,
            ArcType::Inherit,
            ArcType::Variant,
            ArcType::Relocate,
            ArcType::Reference,
            ArcType::Payload,
            ArcType::Specialize,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
        assert!(ArcType::Specialize.is_class_based());
        assert!(ArcType::Payload.is_ref_like());
        assert!(!ArcType::Relocate.is_ref_like());
        assert_eq!(ArcType::Inherit.to_string(), "inherit");
    }
}
