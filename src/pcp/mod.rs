//! Prim composition.
//!
//! - [`LayerStack`] - sublayers, offsets and relocates of a root layer
//! - [`MapFunction`] - path and time mapping across arcs
//! - [`PrimIndex`] - per-prim node graph and prim stack
//! - [`PcpCache`] - memoized indices for one stage, plus dependency lookup

mod cache;
mod dependencies;
mod errors;
mod indexer;
mod layer_stack;
mod map_function;
mod node;
mod prim_index;

pub use cache::{ListenerRegistrations, PayloadSet, PcpCache};
pub use dependencies::SiteDependency;
pub use errors::*;
pub use layer_stack::*;
pub use map_function::*;
pub use node::*;
pub use prim_index::{PrimIndex, PrimStackEntry};
