//! Namespace editing: moving and deleting prims and properties so that
//! every registered stage keeps composing the same scene.
//!
//! An edit is planned per stage by walking each prim index that has a node
//! at or below the edited site. From such a node the edited path is mapped
//! up the arc chain to the root of the index:
//!
//! - an arc whose target is the moved path (or lies under it) is rewritten
//!   at the site that authored it, or removed when the target goes away;
//! - otherwise the new path is mapped across the arc, and the local specs
//!   of every node on the chain follow it;
//! - a path that can no longer be mapped means the chain's specs are
//!   deleted instead.
//!
//! Local specs stay where they are when another arc still supplies specs
//! for the same composed prim. Plans from all stages are merged and
//! applied inside one change block.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::resync::PendingEditInfo;
use super::{DependentStageTracker, Stage};
use crate::pcp::{ArcType, LayerStackHandle, Node, NodeId, PcpCache, PrimIndex};
use crate::sdf::{fields, ChangeBlock, LayerHandle, LayerRegistry, Reference};
use crate::util::{is_valid_identifier, is_valid_property_name, EditOptions, Error, Path, Result};

// ============================================================================
// Edits and validation
// ============================================================================

/// Why a pending namespace edit cannot be applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EditValidationError {
    #[error("no namespace edit is pending")]
    NoPendingEdit,

    #[error("{0} is not a valid path for this edit")]
    InvalidPath(String),

    #[error("no prim at {0}")]
    NoSourcePrim(String),

    #[error("no property at {0}")]
    NoSourceProperty(String),

    #[error("an object already exists at {0}")]
    DestinationExists(String),

    #[error("the parent of {0} does not exist")]
    NoDestinationParent(String),

    #[error("cannot move {0} under itself")]
    MoveUnderSelf(String),

    /// The prim has ancestral opinions from other layer stacks.
    #[error("editing {0} requires authoring relocates")]
    RequiresRelocates(String),

    /// The property has opinions in layers outside the stage's layer stack.
    #[error("{0} has opinions that cannot be edited from this stage")]
    ExternalOpinions(String),

    #[error("layer {0} is not editable")]
    LayerNotEditable(String),
}

/// One namespace edit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NamespaceEdit {
    MovePrim { from: Path, to: Path },
    DeletePrim(Path),
    MoveProperty { from: Path, to: Path },
    DeleteProperty(Path),
}

impl NamespaceEdit {
    /// Path being moved or deleted.
    pub fn source(&self) -> &Path {
        match self {
            Self::MovePrim { from, .. } | Self::MoveProperty { from, .. } => from,
            Self::DeletePrim(path) | Self::DeleteProperty(path) => path,
        }
    }

    /// New path, `None` for deletes.
    pub fn destination(&self) -> Option<&Path> {
        match self {
            Self::MovePrim { to, .. } | Self::MoveProperty { to, .. } => Some(to),
            Self::DeletePrim(_) | Self::DeleteProperty(_) => None,
        }
    }

    #[inline]
    pub fn is_property_edit(&self) -> bool {
        matches!(self, Self::MoveProperty { .. } | Self::DeleteProperty(_))
    }
}

/// Progress of the editor's current edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum EditState {
    #[default]
    Idle,
    Validating,
    Applying,
    Done,
    Failed,
}

/// Summary of an applied edit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EditOutcome {
    warnings: Vec<String>,
    spec_moves: usize,
    spec_deletes: usize,
    arc_edits: usize,
    relocate_edits: usize,
}

impl EditOutcome {
    /// Conflicts and failures that left parts of the edit unpropagated.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    #[inline]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Specs moved across all participating layers.
    pub fn spec_moves(&self) -> usize {
        self.spec_moves
    }

    /// Specs deleted across all participating layers.
    pub fn spec_deletes(&self) -> usize {
        self.spec_deletes
    }

    /// Reference, payload, inherit and specialize entries rewritten.
    pub fn arc_edits(&self) -> usize {
        self.arc_edits
    }

    /// Layers whose relocates were rewritten.
    pub fn relocate_edits(&self) -> usize {
        self.relocate_edits
    }
}

// ============================================================================
// NamespaceEditor
// ============================================================================

/// Records one namespace edit on a stage and applies it to the stage and
/// every registered dependent stage.
#[derive(Debug)]
pub struct NamespaceEditor {
    stage: Stage,
    options: EditOptions,
    dependents: DependentStageTracker,
    pending: Option<NamespaceEdit>,
    state: EditState,
}

impl NamespaceEditor {
    /// Editor for `stage` with default [`EditOptions`] and no dependent
    /// stages.
    pub fn new(stage: &Stage) -> Self {
        Self::with_options(stage, EditOptions::default())
    }

    pub fn with_options(stage: &Stage, options: EditOptions) -> Self {
        Self {
            stage: stage.clone(),
            options,
            dependents: DependentStageTracker::new(),
            pending: None,
            state: EditState::Idle,
        }
    }

    /// Stage whose namespace is edited.
    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn options(&self) -> EditOptions {
        self.options
    }

    /// Progress of the last validated or applied edit.
    pub fn state(&self) -> EditState {
        self.state
    }

    /// The edit `apply_edits` would apply, if one is recorded.
    pub fn pending_edit(&self) -> Option<&NamespaceEdit> {
        self.pending.as_ref()
    }

    // ------------------------------------------------------------------------
    // Recording edits
    // ------------------------------------------------------------------------

    fn record(&mut self, edit: NamespaceEdit) {
        trace!(?edit, "recorded namespace edit");
        self.pending = Some(edit);
        self.state = EditState::Idle;
    }

    /// Record a move of the prim at `from` to `to`.
    ///
    /// Replaces any pending edit. Nothing is validated until
    /// [`can_apply_edits`](Self::can_apply_edits) or
    /// [`apply_edits`](Self::apply_edits).
    pub fn move_prim_at_path(&mut self, from: &Path, to: &Path) {
        self.record(NamespaceEdit::MovePrim {
            from: from.clone(),
            to: to.clone(),
        });
    }

    /// Record a delete of the prim at `path` and its descendants.
    pub fn delete_prim_at_path(&mut self, path: &Path) {
        self.record(NamespaceEdit::DeletePrim(path.clone()));
    }

    /// Rename the prim at `path` in place.
    pub fn rename_prim(&mut self, path: &Path, new_name: &str) {
        self.move_prim_at_path(path, &path.parent().append_child(new_name));
    }

    /// Move the prim at `path` under `new_parent`, keeping its name.
    pub fn reparent_prim(&mut self, path: &Path, new_parent: &Path) {
        self.move_prim_at_path(path, &new_parent.append_child(path.name()));
    }

    /// Record a move of the property at `from` to `to`, which may be on
    /// another prim.
    pub fn move_property_at_path(&mut self, from: &Path, to: &Path) {
        self.record(NamespaceEdit::MoveProperty {
            from: from.clone(),
            to: to.clone(),
        });
    }

    /// Record a delete of the property at `path`.
    pub fn delete_property_at_path(&mut self, path: &Path) {
        self.record(NamespaceEdit::DeleteProperty(path.clone()));
    }

    /// Rename the property at `path`, keeping its owning prim.
    pub fn rename_property(&mut self, path: &Path, new_name: &str) {
        self.move_property_at_path(path, &path.prim_path().append_property(new_name));
    }

    // ------------------------------------------------------------------------
    // Dependent stages
    // ------------------------------------------------------------------------

    /// Propagate edits to `stage` as well. Returns false if already added.
    pub fn add_dependent_stage(&mut self, stage: &Stage) -> bool {
        self.dependents.add_stage(stage)
    }

    /// Stop propagating edits to `stage`. Returns false if it was not added.
    pub fn remove_dependent_stage(&mut self, stage: &Stage) -> bool {
        self.dependents.remove_stage(stage)
    }

    /// Replace the dependent stages.
    pub fn set_dependent_stages(&mut self, stages: &[Stage]) {
        self.dependents.set_stages(stages);
    }

    pub fn dependent_stages(&self) -> &[Stage] {
        self.dependents.stages()
    }

    // ------------------------------------------------------------------------
    // Validation and application
    // ------------------------------------------------------------------------

    /// Check that the pending edit can be applied. Nothing is modified.
    pub fn can_apply_edits(&self) -> std::result::Result<(), EditValidationError> {
        self.prepare().map(|_| ())
    }

    /// Apply the pending edit to every participating layer.
    ///
    /// Fails without modifying anything when validation fails. The pending
    /// edit is consumed on success.
    pub fn apply_edits(&mut self) -> Result<EditOutcome> {
        self.state = EditState::Validating;
        let prepared = match self.prepare() {
            Ok(prepared) => prepared,
            Err(err) => {
                warn!(error = %err, "namespace edit rejected");
                self.state = EditState::Failed;
                return Err(Error::InvalidEdit(err));
            }
        };

        self.state = EditState::Applying;
        let outcome = prepared.apply(self.stage.registry());
        self.pending = None;
        self.state = EditState::Done;
        Ok(outcome)
    }

    /// The editing stage first, then dependents not already listed.
    fn participating_stages(&self) -> Vec<Stage> {
        let mut stages = vec![self.stage.clone()];
        for stage in self.dependents.stages() {
            if !stages.iter().any(|s| s.ptr_eq(stage)) {
                stages.push(stage.clone());
            }
        }
        stages
    }

    fn prepare(&self) -> std::result::Result<PreparedEdit, EditValidationError> {
        let edit = self.pending.clone().ok_or(EditValidationError::NoPendingEdit)?;
        let author_relocates = self.validate(&edit)?;

        let root_stack = self.stage.layer_stack();
        let edited_layers = root_stack.layers().to_vec();
        let stage_plans: Vec<StagePlan> = self
            .participating_stages()
            .par_iter()
            .map(|stage| {
                let mut planner = Planner::new(&edit, &edited_layers);
                stage.with_cache(|cache| planner.run(cache));
                planner.finish(stage.clone())
            })
            .collect();

        let mut plan = EditPlan::default();
        for stage_plan in &stage_plans {
            plan.extend(&stage_plan.plan);
        }

        if !edit.is_property_edit() {
            let source = edit.source();
            for layer in &edited_layers {
                let touched = layer
                    .relocates()
                    .iter()
                    .any(|(s, t)| s.has_prefix(source) || t.has_prefix(source));
                if touched {
                    plan.relocate_edits.push(RelocateEdit {
                        layer: Arc::clone(layer),
                        from: source.clone(),
                        to: edit.destination().cloned(),
                        sources_only: false,
                    });
                }
            }
            if author_relocates {
                let target = edit.destination().cloned().unwrap_or_else(Path::empty);
                debug!(source = %source, target = %target, "authoring relocate");
                plan.relocate_additions
                    .push((self.stage.edit_target().layer().clone(), source.clone(), target));
            }
        }
        plan.normalize();

        if let Some(layer) = plan.layers().into_iter().find(|l| !l.permission_to_edit()) {
            return Err(EditValidationError::LayerNotEditable(layer.identifier().to_string()));
        }
        Ok(PreparedEdit { plan, stage_plans })
    }

    /// Returns whether the edit must author a relocate.
    fn validate(&self, edit: &NamespaceEdit) -> std::result::Result<bool, EditValidationError> {
        match edit {
            NamespaceEdit::MovePrim { from, to } => {
                self.check_prim_source(from)?;
                self.check_prim_destination(from, to)?;
                self.check_ancestral_opinions(from)
            }
            NamespaceEdit::DeletePrim(path) => {
                self.check_prim_source(path)?;
                self.check_ancestral_opinions(path)
            }
            NamespaceEdit::MoveProperty { from, to } => {
                self.check_property_source(from)?;
                self.check_property_destination(from, to)?;
                Ok(false)
            }
            NamespaceEdit::DeleteProperty(path) => {
                self.check_property_source(path)?;
                Ok(false)
            }
        }
    }

    fn check_prim_source(&self, path: &Path) -> std::result::Result<(), EditValidationError> {
        if !path.is_prim_path() || path.contains_variant_selection() {
            return Err(EditValidationError::InvalidPath(path.to_string()));
        }
        if !self.stage.has_prim(path) {
            return Err(EditValidationError::NoSourcePrim(path.to_string()));
        }
        Ok(())
    }

    fn check_prim_destination(&self, from: &Path, to: &Path) -> std::result::Result<(), EditValidationError> {
        if !to.is_prim_path() || to.contains_variant_selection() || !is_valid_identifier(to.name()) {
            return Err(EditValidationError::InvalidPath(to.to_string()));
        }
        if to == from || self.stage.has_prim(to) || self.stage.layer_stack().has_spec(to) {
            return Err(EditValidationError::DestinationExists(to.to_string()));
        }
        if to.has_prefix(from) {
            return Err(EditValidationError::MoveUnderSelf(to.to_string()));
        }
        let parent = to.parent();
        if !parent.is_absolute_root() && !self.stage.has_prim(&parent) {
            return Err(EditValidationError::NoDestinationParent(to.to_string()));
        }
        Ok(())
    }

    /// A prim with specs from ancestral arcs into other layer stacks can
    /// only be moved or deleted by relocating it.
    fn check_ancestral_opinions(&self, path: &Path) -> std::result::Result<bool, EditValidationError> {
        let Some(index) = self.stage.prim_index(path) else {
            return Ok(false);
        };
        let root_stack = self.stage.layer_stack();
        if root_stack.relocates().is_target(path) {
            return Ok(false);
        }
        let ancestral = index.nodes().iter().any(|node| {
            node.has_specs()
                && !node.is_inert()
                && node.namespace_depth() < path.depth()
                && !node.layer_stack().shares_layer_with(&root_stack)
        });
        if ancestral && !self.options.allow_relocates_authoring {
            return Err(EditValidationError::RequiresRelocates(path.to_string()));
        }
        Ok(ancestral)
    }

    fn check_property_source(&self, path: &Path) -> std::result::Result<(), EditValidationError> {
        if !path.is_property_path() || path.contains_variant_selection() {
            return Err(EditValidationError::InvalidPath(path.to_string()));
        }
        let prim = self
            .stage
            .prim_at_path(&path.prim_path())
            .filter(|prim| prim.property_names().iter().any(|n| n == path.name()))
            .ok_or_else(|| EditValidationError::NoSourceProperty(path.to_string()))?;
        let root_stack = self.stage.layer_stack();
        let external = prim.prim_stack().iter().any(|entry| {
            !root_stack.has_layer(&entry.layer) && entry.layer.has_spec(&entry.path.append_property(path.name()))
        });
        if external {
            return Err(EditValidationError::ExternalOpinions(path.to_string()));
        }
        Ok(())
    }

    fn check_property_destination(&self, from: &Path, to: &Path) -> std::result::Result<(), EditValidationError> {
        if !to.is_property_path() || to.contains_variant_selection() || !is_valid_property_name(to.name()) {
            return Err(EditValidationError::InvalidPath(to.to_string()));
        }
        let Some(prim) = self.stage.prim_at_path(&to.prim_path()) else {
            return Err(EditValidationError::NoDestinationParent(to.to_string()));
        };
        if to == from || prim.has_attribute(to.name()) || self.stage.layer_stack().has_spec(to) {
            return Err(EditValidationError::DestinationExists(to.to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Plans
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArcField {
    References,
    Payloads,
    Inherits,
    Specializes,
}

/// Rewrite (or removal) of one arc target at an authoring site.
#[derive(Clone, Debug)]
struct ArcEdit {
    layer: LayerHandle,
    site: Path,
    field: ArcField,
    /// Root layer of the stack the arc targets.
    target_root: String,
    old_target: Path,
    new_target: Option<Path>,
}

impl ArcEdit {
    fn same_as(&self, other: &ArcEdit) -> bool {
        Arc::ptr_eq(&self.layer, &other.layer)
            && self.site == other.site
            && self.field == other.field
            && self.old_target == other.old_target
    }

    fn apply(&self, registry: &LayerRegistry) -> Result<bool> {
        let layer = &self.layer;
        let targets = |r: &Reference| {
            r.prim_path == self.old_target
                && (r.is_internal()
                    || registry
                        .find_or_resolve(&r.asset_path, layer)
                        .is_ok_and(|target| target.identifier() == self.target_root))
        };
        let retarget = |r: &Reference| {
            if targets(r) {
                self.new_target.as_ref().map(|t| r.with_prim_path(t.clone()))
            } else {
                Some(r.clone())
            }
        };
        match self.field {
            ArcField::References => {
                let mut op = layer.references(&self.site);
                let changed = op.modify_items(retarget);
                if changed {
                    layer.set_references(&self.site, op)?;
                }
                Ok(changed)
            }
            ArcField::Payloads => {
                let mut op = layer.payloads(&self.site);
                let changed = op.modify_items(retarget);
                if changed {
                    layer.set_payloads(&self.site, op)?;
                }
                Ok(changed)
            }
            ArcField::Inherits | ArcField::Specializes => {
                let field = if self.field == ArcField::Inherits {
                    fields::INHERIT_PATHS
                } else {
                    fields::SPECIALIZES
                };
                let mut op = layer.path_list(&self.site, field);
                let changed = op.modify_items(|p| {
                    if *p == self.old_target {
                        self.new_target.clone()
                    } else {
                        Some(p.clone())
                    }
                });
                if changed {
                    layer.set_path_list(&self.site, field, op)?;
                }
                Ok(changed)
            }
        }
    }
}

/// Prefix rewrite of one layer's relocates.
#[derive(Clone, Debug)]
struct RelocateEdit {
    layer: LayerHandle,
    from: Path,
    to: Option<Path>,
    /// Only rewrite sources; targets are left alone.
    sources_only: bool,
}

impl RelocateEdit {
    /// Entries whose rewritten source or target no longer exists are dropped.
    fn rewrite(&self, pairs: Vec<(Path, Path)>) -> Vec<(Path, Path)> {
        let map = |path: &Path| -> Option<Path> {
            if !path.has_prefix(&self.from) {
                return Some(path.clone());
            }
            self.to.as_ref().and_then(|to| path.replace_prefix(&self.from, to))
        };
        pairs
            .into_iter()
            .filter_map(|(source, target)| {
                let source = map(&source)?;
                let target = if self.sources_only || target.is_empty() {
                    target
                } else {
                    map(&target)?
                };
                Some((source, target))
            })
            .collect()
    }
}

#[derive(Clone, Debug, Default)]
struct EditPlan {
    moves: Vec<(LayerHandle, Path, Path)>,
    deletes: Vec<(LayerHandle, Path)>,
    arc_edits: Vec<ArcEdit>,
    relocate_edits: Vec<RelocateEdit>,
    relocate_additions: Vec<(LayerHandle, Path, Path)>,
    warnings: Vec<String>,
}

impl EditPlan {
    fn extend(&mut self, other: &EditPlan) {
        self.moves.extend(other.moves.iter().cloned());
        self.deletes.extend(other.deletes.iter().cloned());
        self.arc_edits.extend(other.arc_edits.iter().cloned());
        self.relocate_edits.extend(other.relocate_edits.iter().cloned());
        self.relocate_additions.extend(other.relocate_additions.iter().cloned());
        self.warnings.extend(other.warnings.iter().cloned());
    }

    /// Dedup and resolve overlaps. A move beats a delete of the same site;
    /// ops covered by an ancestor op are dropped.
    fn normalize(&mut self) {
        let same = |a: &LayerHandle, b: &LayerHandle| Arc::ptr_eq(a, b);

        let mut moves: Vec<(LayerHandle, Path, Path)> = Vec::new();
        for (layer, from, to) in self.moves.drain(..) {
            if !moves.iter().any(|(l, f, _)| same(l, &layer) && *f == from) {
                moves.push((layer, from, to));
            }
        }
        let mut deletes: Vec<(LayerHandle, Path)> = Vec::new();
        for (layer, path) in self.deletes.drain(..) {
            let moved = moves.iter().any(|(l, f, _)| same(l, &layer) && *f == path);
            if !moved && !deletes.iter().any(|(l, p)| same(l, &layer) && *p == path) {
                deletes.push((layer, path));
            }
        }

        let covering_deletes = deletes.clone();
        deletes.retain(|(layer, path)| {
            !covering_deletes
                .iter()
                .any(|(l, p)| same(l, layer) && p != path && path.has_prefix(p))
        });
        moves.retain(|(layer, from, _)| {
            !covering_deletes
                .iter()
                .any(|(l, p)| same(l, layer) && from.has_prefix(p))
        });
        let covering_moves = moves.clone();
        moves.retain(|(layer, from, to)| {
            !covering_moves.iter().any(|(l, f, t)| {
                same(l, layer) && f != from && from.has_prefix(f) && from.replace_prefix(f, t).as_ref() == Some(to)
            })
        });
        self.moves = moves;
        self.deletes = deletes;

        let mut arc_edits: Vec<ArcEdit> = Vec::new();
        for edit in self.arc_edits.drain(..) {
            if !arc_edits.iter().any(|e| e.same_as(&edit)) {
                arc_edits.push(edit);
            }
        }
        self.arc_edits = arc_edits;

        let mut relocate_edits: Vec<RelocateEdit> = Vec::new();
        for edit in self.relocate_edits.drain(..) {
            let dup = relocate_edits.iter().any(|e| {
                same(&e.layer, &edit.layer) && e.from == edit.from && e.sources_only == edit.sources_only
            });
            if !dup {
                relocate_edits.push(edit);
            }
        }
        self.relocate_edits = relocate_edits;
    }

    /// Every layer the plan modifies.
    fn layers(&self) -> Vec<LayerHandle> {
        let mut out: Vec<LayerHandle> = Vec::new();
        let all = self
            .moves
            .iter()
            .map(|(l, _, _)| l)
            .chain(self.deletes.iter().map(|(l, _)| l))
            .chain(self.arc_edits.iter().map(|e| &e.layer))
            .chain(self.relocate_edits.iter().map(|e| &e.layer))
            .chain(self.relocate_additions.iter().map(|(l, _, _)| l));
        for layer in all {
            if !out.iter().any(|l| Arc::ptr_eq(l, layer)) {
                out.push(Arc::clone(layer));
            }
        }
        out
    }
}

/// One stage's share of the plan, plus the stage-level moves it implies.
#[derive(Debug)]
struct StagePlan {
    stage: Stage,
    plan: EditPlan,
    prim_moves: Vec<(Path, Path)>,
    prim_deletes: Vec<Path>,
}

/// A validated edit with its merged plan.
#[derive(Debug)]
struct PreparedEdit {
    plan: EditPlan,
    stage_plans: Vec<StagePlan>,
}

impl PreparedEdit {
    fn apply(self, registry: &LayerRegistry) -> EditOutcome {
        let plan = self.plan;
        let mut outcome = EditOutcome {
            warnings: plan.warnings.clone(),
            ..Default::default()
        };

        let spec_moves: Vec<(String, Path, Path)> = plan
            .moves
            .iter()
            .map(|(l, f, t)| (l.identifier().to_string(), f.clone(), t.clone()))
            .collect();
        for stage_plan in &self.stage_plans {
            stage_plan.stage.set_pending_edit(Some(PendingEditInfo {
                spec_moves: spec_moves.clone(),
                prim_moves: stage_plan.prim_moves.clone(),
                prim_deletes: stage_plan.prim_deletes.clone(),
            }));
        }

        let mut failures: Vec<String> = Vec::new();
        {
            let _block = ChangeBlock::new();
            let mut fail = |what: String, err: Error| {
                warn!(error = %err, "{what}");
                failures.push(format!("{what}: {err}"));
            };

            for edit in &plan.arc_edits {
                match edit.apply(registry) {
                    Ok(true) => outcome.arc_edits += 1,
                    Ok(false) => {}
                    Err(err) => fail(format!("failed to retarget arc at {}", edit.site), err),
                }
            }

            for layer in plan.layers() {
                let edits: Vec<&RelocateEdit> = plan
                    .relocate_edits
                    .iter()
                    .filter(|e| Arc::ptr_eq(&e.layer, &layer))
                    .collect();
                let additions: Vec<(Path, Path)> = plan
                    .relocate_additions
                    .iter()
                    .filter(|(l, _, _)| Arc::ptr_eq(l, &layer))
                    .map(|(_, s, t)| (s.clone(), t.clone()))
                    .collect();
                if edits.is_empty() && additions.is_empty() {
                    continue;
                }
                let before = layer.relocates();
                let mut pairs = edits.iter().fold(before.clone(), |pairs, edit| edit.rewrite(pairs));
                for (source, target) in additions {
                    if !pairs.iter().any(|(s, _)| *s == source) {
                        pairs.push((source, target));
                    }
                }
                if pairs != before {
                    match layer.set_relocates(pairs) {
                        Ok(()) => outcome.relocate_edits += 1,
                        Err(err) => fail(format!("failed to rewrite relocates in {}", layer.identifier()), err),
                    }
                }
            }

            // deepest first, so ancestor moves carry already-edited subtrees
            let mut ops: Vec<(&LayerHandle, &Path, Option<&Path>)> = plan
                .moves
                .iter()
                .map(|(l, f, t)| (l, f, Some(t)))
                .chain(plan.deletes.iter().map(|(l, p)| (l, p, None)))
                .collect();
            ops.sort_by_key(|(_, path, _)| std::cmp::Reverse(path.elements().len()));
            for (layer, from, to) in ops {
                if !layer.has_spec(from) {
                    continue;
                }
                match to {
                    Some(to) => {
                        trace!(layer = layer.identifier(), from = %from, to = %to, "moving spec");
                        match layer.move_spec(from, to) {
                            Ok(()) => outcome.spec_moves += 1,
                            Err(err) => fail(format!("failed to move {from} to {to}"), err),
                        }
                    }
                    None => {
                        trace!(layer = layer.identifier(), path = %from, "deleting spec");
                        match layer.erase_spec(from) {
                            Ok(()) => outcome.spec_deletes += 1,
                            Err(err) => fail(format!("failed to delete {from}"), err),
                        }
                    }
                }
            }
        }

        outcome.warnings.extend(failures);
        for stage_plan in &self.stage_plans {
            stage_plan.stage.set_pending_edit(None);
        }
        debug!(
            moves = outcome.spec_moves,
            deletes = outcome.spec_deletes,
            arcs = outcome.arc_edits,
            relocates = outcome.relocate_edits,
            warnings = outcome.warnings.len(),
            "applied namespace edit"
        );
        outcome
    }
}

// ============================================================================
// Per-stage planning
// ============================================================================

/// Walk state for one prim index.
struct IndexWalk<'i> {
    index: &'i PrimIndex,
    affected: Vec<NodeId>,
    /// New site of each node decided so far; `None` means deleted.
    fates: HashMap<NodeId, Option<Path>>,
    /// Nodes whose arc was retargeted instead of mapped across.
    retargeted: HashSet<NodeId>,
    /// A conflict left this index's local specs in place.
    blocked: bool,
}

struct Planner<'a> {
    /// Edited prim path; the owning prim for property edits.
    source: Path,
    destination: Option<Path>,
    /// `(old name, new name)` for property edits.
    property: Option<(String, Option<String>)>,
    edited_layers: &'a [LayerHandle],
    plan: EditPlan,
    prim_moves: Vec<(Path, Path)>,
    prim_deletes: Vec<Path>,
}

impl<'a> Planner<'a> {
    fn new(edit: &NamespaceEdit, edited_layers: &'a [LayerHandle]) -> Self {
        let (source, destination, property) = if edit.is_property_edit() {
            let from = edit.source();
            let to = edit.destination();
            (
                from.prim_path(),
                Some(to.map_or_else(|| from.prim_path(), Path::prim_path)),
                Some((from.name().to_string(), to.map(|t| t.name().to_string()))),
            )
        } else {
            (edit.source().clone(), edit.destination().cloned(), None)
        };
        Self {
            source,
            destination,
            property,
            edited_layers,
            plan: EditPlan::default(),
            prim_moves: Vec::new(),
            prim_deletes: Vec::new(),
        }
    }

    fn finish(self, stage: Stage) -> StagePlan {
        StagePlan {
            stage,
            plan: self.plan,
            prim_moves: self.prim_moves,
            prim_deletes: self.prim_deletes,
        }
    }

    fn run(&mut self, cache: &PcpCache) {
        let mut paths: Vec<Path> = cache.populated_paths().cloned().collect();
        paths.sort();
        for path in paths {
            if let Some(index) = cache.find_prim_index(&path) {
                self.plan_index(cache, &index);
            }
        }
    }

    fn touches(&self, stack: &LayerStackHandle) -> bool {
        self.edited_layers.iter().any(|layer| stack.has_layer(layer))
    }

    fn is_affected(&self, node: &Node) -> bool {
        if node.is_inert() || !self.touches(node.layer_stack()) {
            return false;
        }
        let stripped = node.path().strip_all_variant_selections();
        if self.property.is_some() {
            stripped == self.source
        } else {
            stripped.has_prefix(&self.source)
        }
    }

    /// Check if `node` has specs for the edited object.
    fn supplies_specs(&self, node: &Node) -> bool {
        match &self.property {
            Some((name, _)) => node.layer_stack().has_spec(&node.path().append_property(name)),
            None => node.has_specs(),
        }
    }

    /// Move or delete the specs at a node site in every layer of `stack`.
    fn site_action(&mut self, stack: &LayerStackHandle, from: &Path, to: Option<&Path>) {
        let (from, to) = match &self.property {
            Some((name, new_name)) => (
                from.append_property(name),
                to.zip(new_name.as_ref()).map(|(p, n)| p.append_property(n)),
            ),
            None => (from.clone(), to.cloned()),
        };
        for layer in stack.layers() {
            if !layer.has_spec(&from) {
                continue;
            }
            match &to {
                Some(to) if *to == from => {}
                Some(to) => self.plan.moves.push((Arc::clone(layer), from.clone(), to.clone())),
                None => self.plan.deletes.push((Arc::clone(layer), from.clone())),
            }
        }
    }

    fn record_prim(&mut self, cache: &PcpCache, path: &Path, fate: Option<&Path>) {
        if self.property.is_some() {
            return;
        }
        match fate {
            Some(to) if !cache.is_populated(to) => {
                let pair = (path.clone(), to.clone());
                if !self.prim_moves.contains(&pair) {
                    self.prim_moves.push(pair);
                }
            }
            Some(_) => {}
            None if !self.prim_deletes.contains(path) => self.prim_deletes.push(path.clone()),
            None => {}
        }
    }

    fn plan_index(&mut self, cache: &PcpCache, index: &PrimIndex) {
        let nodes = index.nodes();
        let affected: Vec<NodeId> = (0..nodes.len()).filter(|&id| self.is_affected(&nodes[id])).collect();
        if affected.is_empty() {
            return;
        }
        trace!(prim = %index.path(), nodes = affected.len(), "planning namespace edit");

        let mut walk = IndexWalk {
            index,
            affected: affected.clone(),
            fates: HashMap::new(),
            retargeted: HashSet::new(),
            blocked: false,
        };
        for id in affected {
            let node = &nodes[id];
            let fate = self
                .destination
                .as_ref()
                .and_then(|d| node.path().replace_prefix_with_variants(&self.source, d));
            let top = node.path().strip_all_variant_selections() == self.source;
            if top {
                self.site_action(node.layer_stack(), node.path(), fate.as_ref());
                walk.fates.insert(id, fate.clone());
                if id == 0 {
                    self.record_prim(cache, index.path(), fate.as_ref());
                }
            }
            if id != 0 {
                self.walk_chain(cache, &mut walk, id, fate, top);
            }
        }
        self.plan_implied(cache, &mut walk);
    }

    /// Map the edit from affected node `start` up to the index root.
    fn walk_chain(&mut self, cache: &PcpCache, walk: &mut IndexWalk<'_>, start: NodeId, fate: Option<Path>, top: bool) {
        let index = walk.index;
        let nodes = index.nodes();
        let mut chain: Vec<(NodeId, Path, Option<Path>)> = Vec::new();
        let mut cur = start;
        let mut image = self.source.clone();
        let mut old = nodes[start].path().clone();
        let mut new = fate;
        let mut deleting_ancestors = false;

        while let Some(parent) = nodes[cur].parent() {
            let node = &nodes[cur];
            if node.is_implied() {
                return;
            }
            let retargetable = !deleting_ancestors && self.property.is_none() && node.arc() != ArcType::Variant;
            if retargetable {
                let intro = node.intro_path().strip_all_variant_selections();
                if intro.has_prefix(&image) {
                    if old.strip_all_variant_selections() == intro {
                        let target = new.as_ref().map(Path::strip_all_variant_selections);
                        self.retarget_arc(node, &nodes[parent], target.as_ref());
                        walk.fates.insert(cur, new);
                        walk.retargeted.insert(cur);
                        return;
                    }
                    if new.is_some() {
                        return;
                    }
                    // the arc is removed at an ancestor; specs below it lose their source
                    deleting_ancestors = true;
                }
            }

            let map = node.map_to_parent();
            let relocated = node.arc() == ArcType::Relocate;
            let map_path = |path: &Path| {
                if relocated {
                    map.map_source_to_target_with_root_identity(path)
                } else {
                    map.map_source_to_target(path)
                }
            };
            let image_full = old.prefix_matching_stripped(&image).unwrap_or_else(|| image.clone());
            let Some(parent_image) = map_path(&image_full) else {
                return;
            };
            let parent_old = nodes[parent].path().clone();
            let parent_new = if deleting_ancestors {
                None
            } else {
                new.as_ref().and_then(|n| map_path(n))
            };
            trace!(node = %parent_old, new = ?parent_new, arc = %node.arc(), "mapped across arc");
            chain.push((parent, parent_old.clone(), parent_new.clone()));
            image = parent_image.strip_all_variant_selections();
            old = parent_old;
            new = parent_new;
            cur = parent;
            if walk.affected.contains(&cur) {
                break;
            }
        }

        if !top && !deleting_ancestors {
            return;
        }
        let reached_root = cur == 0 && !walk.affected.contains(&0);
        if walk.affected.contains(&cur) {
            // that node plans its own site
            chain.pop();
        }
        if walk.blocked {
            return;
        }

        let locals = if reached_root { self.local_variant_nodes(walk, start, &chain) } else { Vec::new() };
        if let Some(conflict) = self.find_conflict(walk, start, &chain, &locals) {
            walk.blocked = true;
            let message = format!(
                "{} still has opinions from {} at {}; local opinions were left in place",
                walk.index.path(),
                nodes[conflict].arc(),
                nodes[conflict].path()
            );
            warn!(prim = %walk.index.path(), "namespace edit conflict: {message}");
            self.plan.warnings.push(message);
            return;
        }

        for (id, old, new) in &chain {
            self.site_action(nodes[*id].layer_stack(), old, new.as_ref());
            walk.fates.insert(*id, new.clone());
        }
        if reached_root {
            let root_path = nodes[0].path().clone();
            let root_new = chain.last().and_then(|(_, _, n)| n.clone());
            for id in locals {
                let local = nodes[id].path().clone();
                let local_new = root_new
                    .as_ref()
                    .and_then(|n| local.replace_prefix_with_variants(&root_path, n));
                self.site_action(nodes[id].layer_stack(), &local, local_new.as_ref());
                walk.fates.insert(id, local_new);
            }
            self.record_prim(cache, &root_path, root_new.as_ref());
        }
    }

    /// Variant nodes of the root's own layer stack at the index path.
    fn local_variant_nodes(&self, walk: &IndexWalk<'_>, start: NodeId, chain: &[(NodeId, Path, Option<Path>)]) -> Vec<NodeId> {
        let nodes = walk.index.nodes();
        let root = &nodes[0];
        let claimed: HashSet<NodeId> = walk.index.subtree(start).into_iter().chain(chain.iter().map(|c| c.0)).collect();
        nodes
            .iter()
            .enumerate()
            .filter(|(id, node)| {
                *id != 0
                    && !claimed.contains(id)
                    && !node.is_inert()
                    && node.arc() == ArcType::Variant
                    && Arc::ptr_eq(node.layer_stack(), root.layer_stack())
                    && node.path().strip_all_variant_selections() == *root.path()
            })
            .map(|(id, _)| id)
            .collect()
    }

    /// A node outside the moving part of the graph that still supplies
    /// specs for the composed prim.
    fn find_conflict(
        &self,
        walk: &IndexWalk<'_>,
        start: NodeId,
        chain: &[(NodeId, Path, Option<Path>)],
        locals: &[NodeId],
    ) -> Option<NodeId> {
        let nodes = walk.index.nodes();
        let mut claimed: HashSet<NodeId> = walk.index.subtree(start).into_iter().collect();
        claimed.extend(chain.iter().map(|c| c.0));
        claimed.extend(locals.iter().copied());
        for &id in &walk.affected {
            claimed.extend(walk.index.subtree(id));
        }
        for (id, node) in nodes.iter().enumerate() {
            if node.is_implied() && node.origin().is_some_and(|o| claimed.contains(&o)) {
                claimed.extend(walk.index.subtree(id));
            }
        }
        nodes
            .iter()
            .enumerate()
            .find(|(id, node)| !claimed.contains(id) && !node.is_inert() && self.supplies_specs(node))
            .map(|(id, _)| id)
    }

    /// Rewrite the arc that introduced `node` at its parent's site.
    fn retarget_arc(&mut self, node: &Node, parent: &Node, target: Option<&Path>) {
        let field = match node.arc() {
            ArcType::Reference => ArcField::References,
            ArcType::Payload => ArcField::Payloads,
            ArcType::Inherit => ArcField::Inherits,
            ArcType::Specialize => ArcField::Specializes,
            ArcType::Relocate => {
                for layer in parent.layer_stack().layers() {
                    if layer.relocates().iter().any(|(s, _)| s == node.intro_path()) {
                        self.plan.relocate_edits.push(RelocateEdit {
                            layer: Arc::clone(layer),
                            from: node.intro_path().clone(),
                            to: target.cloned(),
                            sources_only: true,
                        });
                    }
                }
                return;
            }
            ArcType::Root | ArcType::Variant => return,
        };
        let site = parent.path();
        debug!(site = %site, arc = %node.arc(), from = %node.intro_path(), to = ?target, "retargeting arc");
        for layer in parent.layer_stack().layers() {
            if !layer.has_spec(site) {
                continue;
            }
            self.plan.arc_edits.push(ArcEdit {
                layer: Arc::clone(layer),
                site: site.clone(),
                field,
                target_root: node.layer_stack().root_layer().identifier().to_string(),
                old_target: node.intro_path().clone(),
                new_target: target.cloned(),
            });
        }
    }

    /// Implied class nodes follow their origin: class-relative renames
    /// carry over, and members that leave the class are deleted.
    ///
    /// An implied node in the root layer stack sits at a stage prim of its
    /// own, which moves or goes away with the spec.
    fn plan_implied(&mut self, cache: &PcpCache, walk: &mut IndexWalk<'_>) {
        if walk.blocked {
            return;
        }
        let index = walk.index;
        let nodes = index.nodes();
        for (id, node) in nodes.iter().enumerate() {
            if !node.is_implied() || node.is_inert() || walk.fates.contains_key(&id) || walk.affected.contains(&id) {
                continue;
            }
            let Some(origin) = node.origin() else {
                continue;
            };
            let Some(origin_fate) = walk.fates.get(&origin).cloned() else {
                continue;
            };
            let origin_node = &nodes[origin];
            let parent_deleted = node
                .parent()
                .and_then(|p| walk.fates.get(&p))
                .is_some_and(Option::is_none);
            let fate = if parent_deleted {
                None
            } else if walk.retargeted.contains(&origin) {
                origin_fate.and_then(|n| {
                    origin_node
                        .parent()
                        .and_then(|carrier| nodes[carrier].map_to_parent().map_source_to_target_with_root_identity(&n))
                })
            } else {
                origin_fate.and_then(|n| n.replace_prefix(origin_node.intro_path(), node.intro_path()))
            };
            trace!(node = %node.path(), new = ?fate, "implied class spec");
            self.site_action(node.layer_stack(), node.path(), fate.as_ref());
            let stage_prim = node.path().strip_all_variant_selections();
            let root_stack = node.layer_stack().identifier() == nodes[0].layer_stack().identifier();
            if root_stack && cache.is_populated(&stage_prim) {
                let stage_fate = fate.as_ref().map(Path::strip_all_variant_selections);
                self.record_prim(cache, &stage_prim, stage_fate.as_ref());
            }
            walk.fates.insert(id, fate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdf::{LayerRegistry, ListOp, Reference, Specifier};

    fn p(s: &str) -> Path {
        Path::parse(s).expect("valid path")
    }

    #[test]
    fn test_validation_errors() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.usda");
        root.create_prim_spec(&p("/A/B"), Specifier::Def).expect("spec");
        root.create_prim_spec(&p("/C"), Specifier::Def).expect("spec");
        root.create_attribute_spec(&p("/A.size"), "double").expect("attr");
        let stage = Stage::open(&registry, &root).expect("stage");
        let mut editor = NamespaceEditor::new(&stage);

        assert_eq!(editor.can_apply_edits(), Err(EditValidationError::NoPendingEdit));

        editor.move_prim_at_path(&p("/Missing"), &p("/D"));
        assert_eq!(editor.can_apply_edits(), Err(EditValidationError::NoSourcePrim("/Missing".into())));

        editor.move_prim_at_path(&p("/A"), &p("/C"));
        assert_eq!(editor.can_apply_edits(), Err(EditValidationError::DestinationExists("/C".into())));

        editor.reparent_prim(&p("/A"), &p("/A/B"));
        assert_eq!(editor.can_apply_edits(), Err(EditValidationError::MoveUnderSelf("/A/B/A".into())));

        editor.move_prim_at_path(&p("/A/B"), &p("/Nowhere/B"));
        assert_eq!(
            editor.can_apply_edits(),
            Err(EditValidationError::NoDestinationParent("/Nowhere/B".into()))
        );

        editor.delete_prim_at_path(&Path::root());
        assert!(matches!(editor.can_apply_edits(), Err(EditValidationError::InvalidPath(_))));

        editor.rename_property(&p("/A.missing"), "other");
        assert_eq!(editor.can_apply_edits(), Err(EditValidationError::NoSourceProperty("/A.missing".into())));

        editor.rename_prim(&p("/A/B"), "Renamed");
        assert_eq!(editor.can_apply_edits(), Ok(()));

        root.set_permission_to_edit(false);
        assert_eq!(editor.can_apply_edits(), Err(EditValidationError::LayerNotEditable("root.usda".into())));
        assert!(editor.apply_edits().is_err());
        assert_eq!(editor.state(), EditState::Failed);
        assert!(root.has_spec(&p("/A/B")));
    }

    #[test]
    fn test_rename_moves_specs_in_every_stack_layer() {
        let registry = LayerRegistry::new();
        let root = registry.create("root.usda");
        let sub = registry.create("sub.usda");
        root.set_sublayer_paths(vec!["sub.usda".into()]).expect("sublayers");
        root.create_prim_spec(&p("/World/Child"), Specifier::Over).expect("spec");
        sub.create_prim_spec(&p("/World/Child"), Specifier::Def).expect("spec");
        sub.create_attribute_spec(&p("/World/Child.size"), "double").expect("attr");
        let stage = Stage::open(&registry, &root).expect("stage");

        let mut editor = NamespaceEditor::new(&stage);
        editor.rename_prim(&p("/World/Child"), "Renamed");
        let outcome = editor.apply_edits().expect("apply");
        assert_eq!(editor.state(), EditState::Done);
        assert_eq!(outcome.spec_moves(), 2);
        assert!(!outcome.has_warnings());

        for layer in [&root, &sub] {
            assert!(!layer.has_spec(&p("/World/Child")));
            assert!(layer.has_spec(&p("/World/Renamed")));
        }
        assert!(sub.has_spec(&p("/World/Renamed.size")));
        assert!(stage.has_prim(&p("/World/Renamed")));
        assert!(!stage.has_prim(&p("/World/Child")));
        assert!(editor.pending_edit().is_none());
    }

    #[test]
    fn test_reference_target_rename_retargets_arc() {
        let registry = LayerRegistry::new();
        let model = registry.create("model.usda");
        model.create_prim_spec(&p("/Model"), Specifier::Def).expect("spec");
        let shot = registry.create("shot.usda");
        shot.create_prim_spec(&p("/Char"), Specifier::Def).expect("spec");
        shot.set_references(&p("/Char"), ListOp::prepended(vec![Reference::new("model.usda", p("/Model"))]))
            .expect("refs");
        let model_stage = Stage::open(&registry, &model).expect("stage");
        let shot_stage = Stage::open(&registry, &shot).expect("stage");

        let mut editor = NamespaceEditor::new(&model_stage);
        assert!(editor.add_dependent_stage(&shot_stage));
        editor.rename_prim(&p("/Model"), "Asset");
        let outcome = editor.apply_edits().expect("apply");
        assert_eq!(outcome.arc_edits(), 1);

        let refs = shot.references(&p("/Char"));
        assert_eq!(refs.prepended_items(), &[Reference::new("model.usda", p("/Asset"))]);
        assert_eq!(shot_stage.prim_at_path(&p("/Char")).expect("prim").prim_stack().len(), 2);
    }

    #[test]
    fn test_unregistered_stage_is_untouched() {
        let registry = LayerRegistry::new();
        let model = registry.create("model.usda");
        model.create_prim_spec(&p("/Model"), Specifier::Def).expect("spec");
        let shot = registry.create("shot.usda");
        shot.create_prim_spec(&p("/Char"), Specifier::Def).expect("spec");
        shot.set_references(&p("/Char"), ListOp::prepended(vec![Reference::new("model.usda", p("/Model"))]))
            .expect("refs");
        let model_stage = Stage::open(&registry, &model).expect("stage");
        let _shot_stage = Stage::open(&registry, &shot).expect("stage");

        let mut editor = NamespaceEditor::new(&model_stage);
        editor.rename_prim(&p("/Model"), "Asset");
        editor.apply_edits().expect("apply");
        assert_eq!(
            shot.references(&p("/Char")).prepended_items(),
            &[Reference::new("model.usda", p("/Model"))]
        );
    }

    #[test]
    fn test_normalize_prefers_moves_and_ancestors() {
        let layer = crate::sdf::Layer::anonymous("plan");
        let mut plan = EditPlan::default();
        plan.moves.push((layer.clone(), p("/A"), p("/B")));
        plan.moves.push((layer.clone(), p("/A/C"), p("/B/C")));
        plan.moves.push((layer.clone(), p("/A"), p("/B")));
        plan.deletes.push((layer.clone(), p("/A")));
        plan.deletes.push((layer.clone(), p("/X")));
        plan.deletes.push((layer.clone(), p("/X/Y")));
        plan.normalize();
        let moves: Vec<(Path, Path)> = plan.moves.iter().map(|(_, f, t)| (f.clone(), t.clone())).collect();
        assert_eq!(moves, vec![(p("/A"), p("/B"))]);
        let deletes: Vec<Path> = plan.deletes.iter().map(|(_, d)| d.clone()).collect();
        assert_eq!(deletes, vec![p("/X")]);
    }

    #[test]
    fn test_relocate_rewrite_drops_unreachable_entries() {
        let layer = crate::sdf::Layer::anonymous("relocates");
        let pairs = vec![(p("/Char/Rig"), p("/Char/Anim")), (p("/Other/A"), p("/Other/B"))];
        let moved = RelocateEdit {
            layer: layer.clone(),
            from: p("/Char"),
            to: Some(p("/Hero")),
            sources_only: false,
        };
        assert_eq!(
            moved.rewrite(pairs.clone()),
            vec![(p("/Hero/Rig"), p("/Hero/Anim")), (p("/Other/A"), p("/Other/B"))]
        );
        let deleted = RelocateEdit {
            layer,
            from: p("/Other/B"),
            to: None,
            sources_only: false,
        };
        assert_eq!(deleted.rewrite(pairs), vec![(p("/Char/Rig"), p("/Char/Anim"))]);
    }
}
