//! Stages: composed scenes over a layer stack.
//!
//! - [`Stage`] - composed namespace, edit target, payload loading, notices
//! - [`Prim`] / [`Attribute`] - handles into the composed scene
//! - [`resolve`] - value source resolution over a property's opinions
//! - [`NamespaceEditor`] - moves and deletes that dependent stages follow
//! - [`DependentStageTracker`] - stages depending on an edited site

mod attribute;
mod dependencies;
mod interpolation;
mod namespace_editor;
mod notice;
mod prim;
mod resolve;
mod resync;
mod stage;

pub use attribute::{Attribute, AttributeQuery};
pub use dependencies::{DependentIndex, DependentStageTracker};
pub use namespace_editor::{EditOutcome, EditState, EditValidationError, NamespaceEdit, NamespaceEditor};
pub use notice::{NoticeKey, ObjectsChanged, PrimResyncType};
pub use prim::Prim;
pub use resolve::{resolve, PropertyOpinion, ResolveInfo, ResolveSource};
pub use stage::{EditTarget, Stage};
