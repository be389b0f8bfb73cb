//! In-memory layer registry standing in for asset resolution.
//!
//! Asset paths authored in a layer are anchored to that layer's identifier
//! (`./x` and `../x` relative to its directory) unless a resolve callback
//! is installed, in which case the callback decides.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::{Layer, LayerHandle};
use crate::util::{Error, Result};

/// Callback `(anchor layer identifier, asset path) -> resolved identifier`.
/// Returning `None` falls back to default anchoring.
pub type ResolveCallback = Arc<dyn Fn(&str, &str) -> Option<String> + Send + Sync>;

/// Registry of loaded layers by identifier.
#[derive(Default)]
pub struct LayerRegistry {
    layers: RwLock<HashMap<String, LayerHandle>>,
    resolver: RwLock<Option<ResolveCallback>>,
}

impl LayerRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a layer under its identifier, replacing any previous one.
    pub fn insert(&self, layer: LayerHandle) {
        self.layers.write().insert(layer.identifier().to_string(), layer);
    }

    /// Create and register a named layer.
    pub fn create(&self, identifier: &str) -> LayerHandle {
        let layer = Layer::new(identifier);
        self.insert(Arc::clone(&layer));
        layer
    }

    /// Create and register an anonymous layer.
    pub fn create_anonymous(&self, tag: &str) -> LayerHandle {
        let layer = Layer::anonymous(tag);
        self.insert(Arc::clone(&layer));
        layer
    }

    /// Remove a layer from the registry.
    pub fn remove(&self, identifier: &str) -> Option<LayerHandle> {
        self.layers.write().remove(identifier)
    }

    /// Find a layer by exact identifier.
    pub fn find(&self, identifier: &str) -> Option<LayerHandle> {
        self.layers.read().get(identifier).cloned()
    }

    /// Install or clear the resolve callback.
    pub fn set_resolve_callback(&self, callback: Option<ResolveCallback>) {
        *self.resolver.write() = callback;
    }

    /// Resolve an asset path authored in `anchor` to a layer identifier.
    pub fn resolve(&self, asset_path: &str, anchor: &Layer) -> String {
        if let Some(callback) = self.resolver.read().as_ref() {
            if let Some(resolved) = callback(anchor.identifier(), asset_path) {
                return resolved;
            }
        }
        anchor_asset_path(asset_path, anchor.identifier(), anchor.is_anonymous())
    }

    /// Resolve and look up a layer authored as `asset_path` in `anchor`.
    pub fn find_or_resolve(&self, asset_path: &str, anchor: &Layer) -> Result<LayerHandle> {
        let resolved = self.resolve(asset_path, anchor);
        self.find(&resolved)
            .or_else(|| self.find(asset_path))
            .ok_or_else(|| {
                debug!(asset_path, resolved = %resolved, anchor = anchor.identifier(), "unresolved asset");
                Error::LayerNotFound(resolved)
            })
    }

    /// Number of registered layers.
    pub fn len(&self) -> usize {
        self.layers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.read().is_empty()
    }
}

/// Anchor a relative asset path to the directory of `anchor_id`.
fn anchor_asset_path(asset_path: &str, anchor_id: &str, anchor_is_anonymous: bool) -> String {
    let relative = asset_path.starts_with("./") || asset_path.starts_with("../");
    if !relative || anchor_is_anonymous {
        return asset_path.to_string();
    }
    let dir = anchor_id.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
    let mut parts: Vec<&str> = dir.split('/').filter(|s| !s.is_empty()).collect();
    let absolute = anchor_id.starts_with('/');
    for segment in asset_path.split('/') {
        match segment {
            "." | "" => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchoring() {
        assert_eq!(anchor_asset_path("./b.usda", "dir/a.usda", false), "dir/b.usda");
        assert_eq!(anchor_asset_path("../b.usda", "/x/dir/a.usda", false), "/x/b.usda");
        assert_eq!(anchor_asset_path("b.usda", "dir/a.usda", false), "b.usda");
        assert_eq!(anchor_asset_path("./b.usda", "anon:0001:x", true), "./b.usda");
        assert_eq!(anchor_asset_path("./b.usda", "a.usda", false), "b.usda");
    }

    #[test]
    fn test_find_or_resolve() {
        let registry = LayerRegistry::new();
        let anchor = registry.create("shots/shot.usda");
        let target = registry.create("shots/asset.usda");
        let found = registry.find_or_resolve("./asset.usda", &anchor).expect("resolves");
        assert!(Arc::ptr_eq(&found, &target));
        assert!(registry.find_or_resolve("missing.usda", &anchor).is_err());
    }

    #[test]
    fn test_resolve_callback_overrides() {
        let registry = LayerRegistry::new();
        let anchor = registry.create("a.usda");
        registry.set_resolve_callback(Some(Arc::new(|_: &str, asset: &str| {
            asset.strip_prefix("alias:").map(|s| format!("{s}.usda"))
        })));
        assert_eq!(registry.resolve("alias:model", &anchor), "model.usda");
        assert_eq!(registry.resolve("./x.usda", &anchor), "x.usda");
    }
}
