//! Turning delivered layer changes into an [`ObjectsChanged`] notice.
//!
//! Each change entry is mapped to the stage paths that depend on the edited
//! site, using the cache from before the change and the recomposed cache
//! after it. Removed sites are only visible in the old cache and added
//! sites only in the new one.

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use super::notice::{ObjectsChanged, PrimResyncType};
use crate::pcp::PcpCache;
use crate::sdf::{fields, ChangeEntry, Layer, LayerChanges};
use crate::util::Path;

/// A namespace edit being applied, so its resyncs can be classified as
/// moves rather than unrelated changes.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct PendingEditInfo {
    /// Spec moves about to be performed, as `(layer id, from, to)`.
    pub spec_moves: Vec<(String, Path, Path)>,
    /// Stage prims that move, as `(from, to)`.
    pub prim_moves: Vec<(Path, Path)>,
    /// Stage prims that are deleted.
    pub prim_deletes: Vec<Path>,
}

impl PendingEditInfo {
    fn move_of(&self, path: &Path) -> Option<(PrimResyncType, Path)> {
        self.prim_moves.iter().find_map(|(from, to)| {
            let (source, destination) = PrimResyncType::for_move(from, to);
            if from == path {
                Some((source, to.clone()))
            } else if to == path {
                Some((destination, from.clone()))
            } else {
                None
            }
        })
    }

    /// Check if `path` is an ancestor of a pending move destination in
    /// `layer`, added only to hold the moved spec.
    fn holds_move_destination(&self, layer: &str, path: &Path) -> bool {
        self.spec_moves
            .iter()
            .any(|(id, _, to)| id == layer && to != path && to.has_prefix(path))
    }

    /// Map a spec site through the pending spec moves.
    fn map_site(&self, layer: &str, path: &Path) -> Path {
        self.spec_moves
            .iter()
            .filter(|(id, from, _)| id == layer && path.has_prefix(from))
            .max_by_key(|(_, from, _)| from.elements().len())
            .and_then(|(_, from, to)| path.replace_prefix(from, to))
            .unwrap_or_else(|| path.clone())
    }
}

/// Compute the notice for `changes`, given the caches before and after.
pub(crate) fn compute_notice(
    old: &PcpCache,
    new: &PcpCache,
    changes: &[LayerChanges],
    pending: Option<&PendingEditInfo>,
) -> ObjectsChanged {
    let mut resync: BTreeSet<Path> = BTreeSet::new();
    let mut info: BTreeMap<Path, BTreeSet<String>> = BTreeMap::new();

    for change in changes {
        let layer = &change.layer;
        for entry in &change.entries {
            match entry {
                // an `over` created to hold a moved spec changes nothing for
                // prims that were already composed
                ChangeEntry::SpecAdded(path)
                    if pending.is_some_and(|p| p.holds_move_destination(layer.identifier(), path)) =>
                {
                    resync.extend(
                        dependents(old, new, layer, path)
                            .into_iter()
                            .filter(|d| !old.is_populated(d)),
                    );
                }
                ChangeEntry::SpecAdded(path) | ChangeEntry::SpecRemoved(path) => {
                    resync.extend(dependents(old, new, layer, path));
                }
                ChangeEntry::SpecMoved { from, to } => {
                    resync.extend(dependents(old, new, layer, from));
                    resync.extend(dependents(old, new, layer, to));
                }
                ChangeEntry::FieldChanged { path, field } => {
                    if path.is_absolute_root() {
                        match field.as_str() {
                            fields::SUB_LAYERS | fields::SUB_LAYER_OFFSETS | fields::DEFAULT_PRIM => {
                                resync.insert(Path::root());
                            }
                            fields::LAYER_RELOCATES => {
                                for site in changed_relocates(old, new, layer) {
                                    resync.extend(dependents(old, new, layer, &site));
                                }
                            }
                            _ => {
                                info.entry(Path::root()).or_default().insert(field.clone());
                            }
                        }
                    } else if fields::COMPOSITION.contains(&field.as_str()) && path.is_prim_path() {
                        resync.extend(dependents(old, new, layer, path));
                    } else {
                        for dependent in exact_dependents(new, layer, path) {
                            info.entry(dependent).or_default().insert(field.clone());
                        }
                    }
                }
            }
        }
    }

    let resynced = prune_descendants(resync);
    let info_only: Vec<Path> = info
        .keys()
        .filter(|p| !resynced.iter().any(|r| p.has_prefix(r)))
        .cloned()
        .collect();

    let mut notice = ObjectsChanged {
        changed_fields: info_only
            .iter()
            .filter_map(|p| info.get(p).map(|f| (p.clone(), f.iter().cloned().collect())))
            .collect(),
        info_only,
        ..Default::default()
    };
    for path in &resynced {
        if path.is_prim_path() {
            notice.resync_types.insert(path.clone(), classify(old, new, path, pending));
        }
    }
    notice.resynced = resynced;
    trace!(
        resynced = notice.resynced.len(),
        info_only = notice.info_only.len(),
        "computed notice"
    );
    notice
}

/// Stage paths depending on a site in either cache.
fn dependents(old: &PcpCache, new: &PcpCache, layer: &Layer, site: &Path) -> Vec<Path> {
    old.find_site_dependencies(layer, site)
        .into_iter()
        .chain(new.find_site_dependencies(layer, site))
        .map(|d| d.prim_path)
        .collect()
}

/// Stage paths whose node sits exactly at `site`.
fn exact_dependents(cache: &PcpCache, layer: &Layer, site: &Path) -> Vec<Path> {
    let stripped = site.strip_all_variant_selections();
    cache
        .find_site_dependencies(layer, site)
        .into_iter()
        .filter(|d| {
            site.is_property_path()
                || d.node_path == *site
                || d.node_path.strip_all_variant_selections() == stripped
        })
        .map(|d| d.prim_path)
        .collect()
}

/// Relocation sources and targets that differ between the caches, over
/// every layer stack containing `layer`.
fn changed_relocates(old: &PcpCache, new: &PcpCache, layer: &Layer) -> BTreeSet<Path> {
    let pairs = |cache: &PcpCache| -> BTreeSet<(Path, Path)> {
        cache
            .layer_stacks()
            .filter(|stack| stack.has_layer(layer))
            .flat_map(|stack| {
                stack
                    .relocates()
                    .iter()
                    .map(|(s, t)| (s.clone(), t.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    };
    let before = pairs(old);
    let after = pairs(new);
    before
        .symmetric_difference(&after)
        .flat_map(|(s, t)| [s.clone(), t.clone()])
        .filter(|p| !p.is_empty())
        .collect()
}

/// Drop paths that have a resynced ancestor.
fn prune_descendants(paths: BTreeSet<Path>) -> Vec<Path> {
    let mut out: Vec<Path> = Vec::new();
    for path in paths {
        if !out.iter().any(|kept| path.has_prefix(kept)) {
            out.push(path);
        }
    }
    out
}

fn classify(old: &PcpCache, new: &PcpCache, path: &Path, pending: Option<&PendingEditInfo>) -> (PrimResyncType, Path) {
    if let Some(found) = pending.and_then(|p| p.move_of(path)) {
        return found;
    }
    if !new.is_populated(path) {
        return (PrimResyncType::Delete, Path::empty());
    }
    let (Some(before), Some(after)) = (old.find_prim_index(path), new.find_prim_index(path)) else {
        return (PrimResyncType::Other, Path::empty());
    };
    if !old.is_populated(path) {
        return (PrimResyncType::Other, Path::empty());
    }
    let mapped: Vec<(String, Path)> = before
        .prim_stack()
        .iter()
        .map(|entry| {
            let (id, site) = entry.site();
            let site = match pending {
                Some(p) => p.map_site(&id, &site),
                None => site,
            };
            (id, site)
        })
        .collect();
    let current: Vec<(String, Path)> = after.prim_stack().iter().map(|e| e.site()).collect();
    if mapped == current {
        (PrimResyncType::UnchangedPrimStack, Path::empty())
    } else {
        (PrimResyncType::Other, Path::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Path {
        Path::parse(s).expect("valid path")
    }

    #[test]
    fn test_prune_descendants() {
        let paths: BTreeSet<Path> = [p("/A/B"), p("/A"), p("/C/D"), p("/AB")].into_iter().collect();
        assert_eq!(prune_descendants(paths), vec![p("/A"), p("/AB"), p("/C/D")]);
    }

    #[test]
    fn test_pending_moves_map_sites() {
        let info = PendingEditInfo {
            spec_moves: vec![
                ("a.usda".into(), p("/A"), p("/B")),
                ("a.usda".into(), p("/A/C"), p("/X")),
            ],
            prim_moves: vec![(p("/A"), p("/B"))],
            prim_deletes: Vec::new(),
        };
        assert_eq!(info.map_site("a.usda", &p("/A/C/D")), p("/X/D"));
        assert_eq!(info.map_site("a.usda", &p("/A/E")), p("/B/E"));
        assert_eq!(info.map_site("b.usda", &p("/A")), p("/A"));
        assert_eq!(info.move_of(&p("/B")), Some((PrimResyncType::RenameDestination, p("/A"))));
        assert_eq!(info.move_of(&p("/Q")), None);
    }

    #[test]
    fn test_move_destination_containers() {
        let info = PendingEditInfo {
            spec_moves: vec![("a.usda".into(), p("/A/Child"), p("/A/Sibling/Moved"))],
            ..Default::default()
        };
        assert!(info.holds_move_destination("a.usda", &p("/A/Sibling")));
        assert!(info.holds_move_destination("a.usda", &p("/A")));
        assert!(!info.holds_move_destination("a.usda", &p("/A/Sibling/Moved")));
        assert!(!info.holds_move_destination("b.usda", &p("/A/Sibling")));
        assert!(!info.holds_move_destination("a.usda", &p("/B")));
    }
}
