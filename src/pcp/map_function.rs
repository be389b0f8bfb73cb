//! Path mapping across composition arcs.
//!
//! A [`MapFunction`] maps paths from a node's namespace (source) into its
//! parent's namespace (target) by longest-prefix substitution, and carries
//! the time offset of the arc.

use crate::sdf::LayerOffset;
use crate::util::Path;

/// Prefix-substitution map from a node namespace into its parent's.
///
/// A mapping is rejected when the result would also be claimed by a
/// longer target prefix of a different pair, which keeps the function
/// invertible. The root identity (`/ -> /`) is optional and only consulted
/// by the `*_with_root_identity` queries; global class paths map through it.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct MapFunction {
    pairs: Vec<(Path, Path)>,
    root_identity: bool,
    time_offset: LayerOffset,
}

impl MapFunction {
    /// The identity map.
    pub fn identity() -> Self {
        Self {
            pairs: vec![(Path::root(), Path::root())],
            root_identity: true,
            time_offset: LayerOffset::identity(),
        }
    }

    /// Map `source` (and everything under it) onto `target`.
    pub fn new(source: Path, target: Path) -> Self {
        Self {
            pairs: vec![(source, target)],
            root_identity: false,
            time_offset: LayerOffset::identity(),
        }
    }

    /// Build from several `(source, target)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Path, Path)>) -> Self {
        Self {
            pairs: pairs.into_iter().collect(),
            root_identity: false,
            time_offset: LayerOffset::identity(),
        }
    }

    /// Builder: include the root identity for non-strict queries.
    pub fn with_root_identity(mut self, root_identity: bool) -> Self {
        self.root_identity = root_identity;
        self
    }

    /// Builder: set the time offset.
    pub fn with_time_offset(mut self, offset: LayerOffset) -> Self {
        self.time_offset = offset;
        self
    }

    pub fn pairs(&self) -> &[(Path, Path)] {
        &self.pairs
    }

    #[inline]
    pub fn has_root_identity(&self) -> bool {
        self.root_identity
    }

    /// Offset mapping node time to parent time.
    #[inline]
    pub fn time_offset(&self) -> LayerOffset {
        self.time_offset
    }

    /// Check if every path maps to itself with no time offset.
    pub fn is_identity(&self) -> bool {
        self.time_offset.is_identity()
            && self.pairs.iter().all(|(s, t)| s == t)
            && self.pairs.iter().any(|(s, _)| s.is_absolute_root())
    }

    /// Map a node path into the parent namespace using the explicit pairs.
    pub fn map_source_to_target(&self, path: &Path) -> Option<Path> {
        map_through(&self.pairs, path, true)
    }

    /// Map a parent path back into the node namespace.
    pub fn map_target_to_source(&self, path: &Path) -> Option<Path> {
        map_through(&self.pairs, path, false)
    }

    /// Map a node path into the parent namespace, falling back to the root
    /// identity if this map has one.
    pub fn map_source_to_target_with_root_identity(&self, path: &Path) -> Option<Path> {
        if !self.root_identity || self.pairs.iter().any(|(s, _)| s.is_absolute_root()) {
            return self.map_source_to_target(path);
        }
        let mut pairs = self.pairs.clone();
        pairs.push((Path::root(), Path::root()));
        map_through(&pairs, path, true)
    }

    /// `self ∘ inner`: map through `inner`, then through `self`.
    ///
    /// Pairs of `inner` whose target cannot be mapped by `self` are dropped.
    pub fn compose(&self, inner: &MapFunction) -> MapFunction {
        let mut pairs: Vec<(Path, Path)> = Vec::new();
        for (source, target) in &inner.pairs {
            if let Some(mapped) = self.map_source_to_target(target) {
                if !pairs.iter().any(|(s, _)| s == source) {
                    pairs.push((source.clone(), mapped));
                }
            }
        }
        for (source, target) in &self.pairs {
            if let Some(back) = inner.map_target_to_source(source) {
                if !pairs.iter().any(|(s, _)| *s == back) {
                    pairs.push((back, target.clone()));
                }
            }
        }
        MapFunction {
            pairs,
            root_identity: self.root_identity && inner.root_identity,
            time_offset: self.time_offset.compose(&inner.time_offset),
        }
    }
}

/// Longest-prefix substitution with the bijectivity check.
fn map_through(pairs: &[(Path, Path)], path: &Path, forward: bool) -> Option<Path> {
    let side = |pair: &(Path, Path)| -> (Path, Path) {
        if forward {
            (pair.0.clone(), pair.1.clone())
        } else {
            (pair.1.clone(), pair.0.clone())
        }
    };
    let (index, (from, to)) = pairs
        .iter()
        .map(side)
        .enumerate()
        .filter(|(_, (from, _))| path.has_prefix(from))
        .max_by_key(|(_, (from, _))| from.elements().len())?;
    let mapped = path.replace_prefix(&from, &to)?;

    // a longer prefix on the other side belongs to a different pair
    let blocked = pairs.iter().map(side).enumerate().any(|(i, (_, other_to))| {
        i != index && other_to.elements().len() > to.elements().len() && mapped.has_prefix(&other_to)
    });
    if blocked {
        None
    } else {
        Some(mapped)
    }
}
