//! Composition errors.
//!
//! These are collected on [`LayerStack`](super::LayerStack) and
//! [`PrimIndex`](super::PrimIndex) values rather than returned: composition
//! always produces a best-effort result.

use thiserror::Error;

/// A problem found while composing a layer stack or a prim index.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompositionError {
    /// A sublayer asset path could not be resolved to a layer
    #[error("Could not open sublayer @{asset_path}@ of layer {layer}")]
    InvalidSublayerPath { layer: String, asset_path: String },

    /// A layer includes itself through its sublayers
    #[error("Sublayer cycle: {layer} includes {sublayer} which is already being composed")]
    SublayerCycle { layer: String, sublayer: String },

    /// A sublayer offset is not usable (zero or non-finite scale)
    #[error("Invalid offset {offset} for sublayer @{sublayer}@ of layer {layer}")]
    InvalidSublayerOffset {
        layer: String,
        sublayer: String,
        offset: String,
    },

    /// A relocation entry cannot be honoured
    #[error("Invalid relocate <{source_path}> -> <{target_path}> in layer {layer}: {reason}")]
    InvalidRelocate {
        layer: String,
        source_path: String,
        target_path: String,
        reason: String,
    },

    /// A reference or payload offset is not usable (zero or non-finite scale)
    #[error("Invalid offset {offset} for {arc} authored at <{site}> in layer {layer}")]
    InvalidReferenceOffset {
        layer: String,
        site: String,
        arc: String,
        offset: String,
    },

    /// A layer offset with a negative scale was authored
    #[error("Negative layer offset scale {scale} on {arc} authored at <{site}> in layer {layer}")]
    NegativeLayerOffsetScale {
        layer: String,
        site: String,
        arc: String,
        scale: f64,
    },

    /// An arc targets a path that cannot be composed
    #[error("Invalid {arc} target <{target}> authored at <{site}> in layer {layer}")]
    InvalidTargetPath {
        layer: String,
        site: String,
        target: String,
        arc: String,
    },

    /// A reference or payload asset could not be resolved
    #[error("Could not open asset @{asset_path}@ for {arc} authored at <{site}> in layer {layer}")]
    UnresolvedAsset {
        layer: String,
        site: String,
        asset_path: String,
        arc: String,
    },

    /// An arc without a prim path targets a layer with no default prim
    #[error("Layer {target_layer} has no default prim for {arc} authored at <{site}>")]
    UnresolvedDefaultPrim {
        target_layer: String,
        site: String,
        arc: String,
    },

    /// An arc leads back to a site already on the composition chain
    #[error("Cycle: {arc} from <{site}> to <{target}> revisits a site being composed")]
    ArcCycle {
        site: String,
        target: String,
        arc: String,
    },
}

impl CompositionError {
    /// Short kind name, stable across message changes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidSublayerPath { .. } => "InvalidSublayerPath",
            Self::SublayerCycle { .. } => "SublayerCycle",
            Self::InvalidSublayerOffset { .. } => "InvalidSublayerOffset",
            Self::InvalidRelocate { .. } => "InvalidRelocate",
            Self::InvalidReferenceOffset { .. } => "InvalidReferenceOffset",
            Self::NegativeLayerOffsetScale { .. } => "NegativeLayerOffsetScale",
            Self::InvalidTargetPath { .. } => "InvalidTargetPath",
            Self::UnresolvedAsset { .. } => "UnresolvedAsset",
            Self::UnresolvedDefaultPrim { .. } => "UnresolvedDefaultPrim",
            Self::ArcCycle { .. } => "ArcCycle",
        }
    }
}
