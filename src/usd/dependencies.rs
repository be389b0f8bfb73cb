//! Dependent stage tracking.
//!
//! Every prim index of a populated stage is fully expanded, so a single
//! site lookup per stage finds dependents however many arcs separate them
//! from the edited site.

use rayon::prelude::*;

use super::Stage;
use crate::pcp::ArcType;
use crate::sdf::Layer;
use crate::util::Path;

/// A prim of a tracked stage that depends on an edited site.
#[derive(Clone, Debug)]
pub struct DependentIndex {
    pub stage: Stage,
    pub prim_path: Path,
    pub arc: ArcType,
    pub ancestral: bool,
}

/// A set of stages whose composed prims must follow namespace edits.
#[derive(Clone, Debug, Default)]
pub struct DependentStageTracker {
    stages: Vec<Stage>,
}

impl DependentStageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `stage`. Returns false if it was already tracked.
    pub fn add_stage(&mut self, stage: &Stage) -> bool {
        if self.contains(stage) {
            return false;
        }
        self.stages.push(stage.clone());
        true
    }

    /// Stop tracking `stage`. Returns false if it was not tracked.
    pub fn remove_stage(&mut self, stage: &Stage) -> bool {
        let before = self.stages.len();
        self.stages.retain(|s| !s.ptr_eq(stage));
        before != self.stages.len()
    }

    /// Replace the tracked set.
    pub fn set_stages(&mut self, stages: &[Stage]) {
        self.stages.clear();
        for stage in stages {
            self.add_stage(stage);
        }
    }

    pub fn contains(&self, stage: &Stage) -> bool {
        self.stages.iter().any(|s| s.ptr_eq(stage))
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Prims of every tracked stage whose composition uses `path` (or a
    /// descendant) in `layer`.
    pub fn find_dependent_indexes(&self, layer: &Layer, path: &Path) -> Vec<DependentIndex> {
        self.stages
            .par_iter()
            .map(|stage| {
                stage
                    .with_cache(|cache| cache.find_site_dependencies(layer, path))
                    .into_iter()
                    .map(|dep| DependentIndex {
                        stage: stage.clone(),
                        prim_path: dep.prim_path,
                        arc: dep.arc,
                        ancestral: dep.ancestral,
                    })
                    .collect::<Vec<_>>()
            })
            .flatten()
            .collect()
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
    fn test_dependents_across_hops() {
        let registry = LayerRegistry::new();
        let base = registry.create("base.usda");
        base.create_prim_spec(&p("/Base/Geo"), Specifier::Def).expect("spec");
        let mid = registry.create("mid.usda");
        mid.create_prim_spec(&p("/Mid"), Specifier::Def).expect("spec");
        mid.set_references(&p("/Mid"), ListOp::prepended(vec![Reference::new("base.usda", p("/Base"))]))
            .expect("refs");
        let shot = registry.create("shot.usda");
        shot.create_prim_spec(&p("/Shot"), Specifier::Def).expect("spec");
        shot.set_references(&p("/Shot"), ListOp::prepended(vec![Reference::new("mid.usda", p("/Mid"))]))
            .expect("refs");

        let mid_stage = Stage::open(&registry, &mid).expect("stage");
        let shot_stage = Stage::open(&registry, &shot).expect("stage");
        let mut tracker = DependentStageTracker::new();
        assert!(tracker.add_stage(&mid_stage));
        assert!(tracker.add_stage(&shot_stage));
        assert!(!tracker.add_stage(&shot_stage));

        let mut found: Vec<(bool, Path, ArcType)> = tracker
            .find_dependent_indexes(&base, &p("/Base/Geo"))
            .into_iter()
            .map(|d| (d.stage.ptr_eq(&shot_stage), d.prim_path, d.arc))
            .collect();
        found.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(
            found,
            vec![
                (false, p("/Mid/Geo"), ArcType::Reference),
                (true, p("/Shot/Geo"), ArcType::Reference),
            ]
        );

        assert!(tracker.remove_stage(&mid_stage));
        assert_eq!(tracker.find_dependent_indexes(&base, &p("/Base/Geo")).len(), 1);
    }
}
