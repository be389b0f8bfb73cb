//! Scene description layers.
//!
//! - [`Layer`] - path to spec store with typed fields and change delivery
//! - [`ListOp`] - list editing for composition arcs
//! - [`Reference`] / [`LayerOffset`] - arc payloads
//! - [`ChangeBlock`] - batched change notification
//! - [`LayerRegistry`] - identifier lookup and asset anchoring

mod change;
mod layer;
mod list_op;
mod reference;
mod registry;
mod time_samples;

pub use change::{ChangeBlock, ChangeEntry, LayerChanges, LayerListener, ListenerKey};
pub use layer::*;
pub use list_op::*;
pub use reference::*;
pub use registry::*;
pub use time_samples::*;
