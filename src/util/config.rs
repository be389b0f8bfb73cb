//! Runtime configuration for composition, stages and namespace editing.
//!
//! Environment switches are read once when a config is created with
//! `Default`; explicit setters always win over the environment.

use std::collections::BTreeMap;

use crate::sdf::LayerHandle;

/// Environment switch allowing negative layer offset scales.
pub const ALLOW_NEGATIVE_SCALE_ENV: &str = "PCP_ALLOW_NEGATIVE_LAYER_OFFSET_SCALE";

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "on" | "yes"))
        .unwrap_or(false)
}

/// Options affecting prim index computation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompositionConfig {
    /// Keep negative layer offset scales (with a deprecation warning)
    /// instead of reporting them as errors.
    pub allow_negative_layer_offset_scale: bool,
}

impl CompositionConfig {
    /// Config with the environment ignored.
    pub fn strict() -> Self {
        Self {
            allow_negative_layer_offset_scale: false,
        }
    }

    /// Builder: allow or reject negative layer offset scales.
    pub fn with_negative_layer_offset_scale(mut self, allow: bool) -> Self {
        self.allow_negative_layer_offset_scale = allow;
        self
    }
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self {
            allow_negative_layer_offset_scale: env_flag(ALLOW_NEGATIVE_SCALE_ENV),
        }
    }
}

/// Which payloads are included when a stage is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InitialLoadSet {
    /// Include every payload.
    #[default]
    LoadAll,
    /// Include no payloads until loaded explicitly.
    LoadNone,
}

/// Interpolation applied between time samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InterpolationType {
    /// Linear for interpolatable types, held otherwise.
    #[default]
    Linear,
    /// Always hold the previous sample.
    Held,
}

impl InterpolationType {
    /// Check if this is held interpolation.
    #[inline]
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Held)
    }
}

/// Options used when opening a stage.
#[derive(Clone, Debug, Default)]
pub struct StageOptions {
    /// Session layer stacked above the root layer.
    pub session_layer: Option<LayerHandle>,
    /// Initial payload inclusion.
    pub initial_load: InitialLoadSet,
    /// Time sample interpolation.
    pub interpolation: InterpolationType,
    /// Variant set name to ordered fallback selections.
    pub variant_fallbacks: BTreeMap<String, Vec<String>>,
    /// Prim indexing options.
    pub composition: CompositionConfig,
}

impl StageOptions {
    /// Builder: set the session layer.
    pub fn with_session_layer(mut self, layer: LayerHandle) -> Self {
        self.session_layer = Some(layer);
        self
    }

    /// Builder: set the initial load set.
    pub fn with_initial_load(mut self, load: InitialLoadSet) -> Self {
        self.initial_load = load;
        self
    }

    /// Builder: set the interpolation type.
    pub fn with_interpolation(mut self, interpolation: InterpolationType) -> Self {
        self.interpolation = interpolation;
        self
    }

    /// Builder: add fallback selections for a variant set.
    pub fn with_variant_fallback(mut self, set: &str, selections: &[&str]) -> Self {
        self.variant_fallbacks
            .insert(set.to_string(), selections.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Builder: set the composition config.
    pub fn with_composition(mut self, composition: CompositionConfig) -> Self {
        self.composition = composition;
        self
    }
}

/// Options for the namespace editor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EditOptions {
    /// Allow edits that can only be expressed by authoring relocates.
    pub allow_relocates_authoring: bool,
}

impl EditOptions {
    /// Builder: allow relocates authoring.
    pub fn with_relocates_authoring(mut self, allow: bool) -> Self {
        self.allow_relocates_authoring = allow;
        self
    }
}
