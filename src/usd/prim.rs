//! Composed prims.

use std::sync::Arc;

use super::{Attribute, Stage};
use crate::pcp::{PrimIndex, PrimStackEntry};
use crate::sdf::Specifier;
use crate::util::{is_valid_property_name, Error, Path, Result};

/// Handle to a prim of a [`Stage`].
///
/// Handles are cheap and do not pin composition; every query reads the
/// stage's current state.
#[derive(Clone, Debug)]
pub struct Prim {
    stage: Stage,
    path: Path,
}

impl Prim {
    pub(crate) fn new(stage: Stage, path: Path) -> Self {
        Self { stage, path }
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.path.name()
    }

    /// Check if this is the pseudo-root.
    #[inline]
    pub fn is_pseudo_root(&self) -> bool {
        self.path.is_absolute_root()
    }

    /// Check if the prim still exists on the stage.
    pub fn is_valid(&self) -> bool {
        self.stage.has_prim(&self.path)
    }

    /// Parent prim; `None` for the pseudo-root.
    pub fn parent(&self) -> Option<Prim> {
        if self.is_pseudo_root() {
            return None;
        }
        Some(Prim::new(self.stage.clone(), self.path.parent()))
    }

    pub fn index(&self) -> Option<Arc<PrimIndex>> {
        self.stage.prim_index(&self.path)
    }

    /// Names of composed children, strongest opinion order first.
    pub fn child_names(&self) -> Vec<String> {
        self.stage.with_cache(|cache| {
            let Some(index) = cache.find_prim_index(&self.path) else {
                return Vec::new();
            };
            index
                .child_names()
                .iter()
                .filter(|name| cache.is_populated(&self.path.append_child(name)))
                .cloned()
                .collect()
        })
    }

    pub fn children(&self) -> Vec<Prim> {
        self.child_names()
            .iter()
            .map(|name| Prim::new(self.stage.clone(), self.path.append_child(name)))
            .collect()
    }

    pub fn child(&self, name: &str) -> Option<Prim> {
        self.stage.prim_at_path(&self.path.append_child(name))
    }

    /// Names of composed properties.
    pub fn property_names(&self) -> Vec<String> {
        self.index()
            .map(|index| index.property_names().to_vec())
            .unwrap_or_default()
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.property_names().iter().any(|n| n == name)
    }

    /// Composed attribute `name`, if any layer has a spec for it.
    pub fn attribute(&self, name: &str) -> Option<Attribute> {
        self.has_attribute(name)
            .then(|| Attribute::new(self.stage.clone(), self.path.append_property(name)))
    }

    /// Author an attribute spec in the edit target.
    pub fn create_attribute(&self, name: &str, type_name: &str) -> Result<Attribute> {
        if !is_valid_property_name(name) {
            return Err(Error::InvalidIdentifier(name.to_string()));
        }
        if self.is_pseudo_root() {
            return Err(Error::invalid_path("the pseudo-root has no attributes"));
        }
        let path = self.path.append_property(name);
        let target = self.stage.edit_target();
        let layer = target.layer();
        if !layer.has_spec(&self.path) {
            layer.create_prim_spec(&self.path, Specifier::Over)?;
        }
        if !layer.has_spec(&path) {
            layer.create_attribute_spec(&path, type_name)?;
        }
        Ok(Attribute::new(self.stage.clone(), path))
    }

    /// Opinion sources, strongest first.
    pub fn prim_stack(&self) -> Vec<PrimStackEntry> {
        self.index()
            .map(|index| index.prim_stack().to_vec())
            .unwrap_or_default()
    }

    /// Strongest authored specifier.
    pub fn specifier(&self) -> Option<Specifier> {
        self.prim_stack()
            .iter()
            .find_map(|entry| entry.layer.specifier(&entry.path))
    }

    /// Strongest non-empty type name, or `""`.
    pub fn type_name(&self) -> String {
        self.prim_stack()
            .iter()
            .filter_map(|entry| entry.layer.type_name(&entry.path))
            .find(|name| !name.is_empty())
            .unwrap_or_default()
    }

    /// Strongest authored `active` flag; prims are active by default.
    pub fn is_active(&self) -> bool {
        self.prim_stack()
            .iter()
            .find_map(|entry| entry.layer.active(&entry.path))
            .unwrap_or(true)
    }
}

impl PartialEq for Prim {
    fn eq(&self, other: &Self) -> bool {
        self.stage.ptr_eq(&other.stage) && self.path == other.path
    }
}
