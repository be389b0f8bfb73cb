//! # usd-compose
//!
//! Scene description composition core: layers of opinions, layer stacks,
//! per-prim composition graphs, namespace editing that dependent stages
//! follow, and attribute value resolution over defaults, time samples and
//! splines.
//!
//! ## Modules
//!
//! - [`util`] - Paths, values, time codes, errors, configuration, tracing
//! - [`sdf`] - Layers, list ops, references, change notification
//! - [`pcp`] - Layer stacks, relocates, prim indexing, dependencies
//! - [`ts`] - Animation splines
//! - [`usd`] - Stages, prims, attributes, namespace editing, notices
//!
//! ## Example
//!
//! ```ignore
//! use usd_compose::prelude::*;
//!
//! let registry = LayerRegistry::new();
//! let root = registry.create("shot.usda");
//! let stage = Stage::open(&registry, &root)?;
//! stage.define_prim(&Path::parse("/World/Child")?, "Xform")?;
//!
//! let mut editor = NamespaceEditor::new(&stage);
//! editor.rename_prim(&Path::parse("/World/Child")?, "Renamed");
//! editor.apply_edits()?;
//! ```

pub mod util;
pub mod sdf;
pub mod pcp;
pub mod ts;
pub mod usd;

// Re-export commonly used types
pub use util::{Error, Path, Result};
pub use usd::{NamespaceEditor, Stage};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::util::{EditOptions, Error, Path, Result, StageOptions, TimeCode, Value};
    pub use crate::sdf::{Layer, LayerHandle, LayerOffset, LayerRegistry, ListOp, Reference, Specifier};
    pub use crate::pcp::{ArcType, PcpCache, PrimIndex};
    pub use crate::ts::{Knot, Spline};
    pub use crate::usd::{Attribute, NamespaceEditor, ObjectsChanged, Prim, PrimResyncType, Stage};
}
