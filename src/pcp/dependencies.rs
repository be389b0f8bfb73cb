//! Site dependencies of a cache's prim indices.

use super::cache::PcpCache;
use super::ArcType;
use crate::sdf::Layer;
use crate::util::Path;

/// A stage prim (or property) whose composition consulted a site.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SiteDependency {
    /// Dependent stage path; a property path when the site is a property.
    pub prim_path: Path,
    /// Arc of the node that consulted the site.
    pub arc: ArcType,
    /// Check if the arc was introduced at an ancestor of the prim.
    pub ancestral: bool,
    /// Path of the consulting node in its own layer stack.
    pub node_path: Path,
}

/// Dependencies on `site` in `layer` across every populated prim of
/// `cache`. Sites at or below `site` count.
pub(crate) fn find_site_dependencies(cache: &PcpCache, layer: &Layer, site: &Path) -> Vec<SiteDependency> {
    let (prim_site, property) = if site.is_property_path() {
        (site.prim_path(), Some(site.name().to_string()))
    } else {
        (site.clone(), None)
    };

    let mut out: Vec<SiteDependency> = Vec::new();
    for prim_path in cache.populated_paths() {
        let Some(index) = cache.find_prim_index(prim_path) else {
            continue;
        };
        for node in index.nodes() {
            if !node.layer_stack().has_layer(layer) {
                continue;
            }
            let stripped = node.path().strip_all_variant_selections();
            let matches = match &property {
                Some(_) => *node.path() == prim_site || stripped == prim_site,
                None => node.path().has_prefix(&prim_site) || stripped.has_prefix(&prim_site),
            };
            if !matches {
                continue;
            }
            let dependent = match &property {
                Some(name) => prim_path.append_property(name),
                None => prim_path.clone(),
            };
            let dep = SiteDependency {
                prim_path: dependent,
                arc: node.arc(),
                ancestral: node.arc() != ArcType::Root && node.namespace_depth() < prim_path.depth(),
                node_path: node.path().clone(),
            };
            if !out.contains(&dep) {
                out.push(dep);
            }
        }
    }
    out.sort();
    out
}
