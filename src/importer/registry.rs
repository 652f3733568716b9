//! Declarative stage registration and execution ordering.
//!
//! Dependencies are purely declarative: a stage names the stages that must
//! precede it. Nothing is inferred from provided entity kinds, because the
//! pipeline does not track per-field consumption.

use std::collections::BTreeSet;
use std::collections::HashMap;

use thiserror::Error;

use crate::target::{EntityKind, TargetEntity};

use super::context::{Context, IntermediateData};
use super::error::ImportError;

pub type StageFn = fn(&Context, &mut IntermediateData) -> Result<Vec<TargetEntity>, ImportError>;

#[derive(Debug)]
pub struct Stage {
    pub name: &'static str,
    /// Entity kinds this stage yields. A stage may provide several kinds;
    /// multiplicity is on kind, not on stage.
    pub provides: &'static [EntityKind],
    /// Names of stages that must run before this one.
    pub requires: &'static [&'static str],
    pub run: StageFn,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("stage {0:?} registered twice")]
    DuplicateStage(String),
    #[error("stage {stage:?} requires unknown stage {requirement:?}")]
    UnknownRequirement { stage: String, requirement: String },
    #[error("cyclic stage dependency between: {}", members.join(", "))]
    CyclicDependency { members: Vec<String> },
}

#[derive(Default)]
pub struct TranslationRegistry {
    stages: Vec<Stage>,
}

impl TranslationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, stage: Stage) -> Result<(), RegistryError> {
        if self.stages.iter().any(|s| s.name == stage.name) {
            return Err(RegistryError::DuplicateStage(stage.name.to_string()));
        }
        self.stages.push(stage);
        Ok(())
    }

    /// Topological order over the declared predecessor edges, ties broken by
    /// registration order so runs are reproducible. Fails before any stage
    /// runs if the graph has a cycle, naming the participating stages.
    pub fn execution_order(&self) -> Result<Vec<&Stage>, RegistryError> {
        let index: HashMap<&str, usize> = self
            .stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name, i))
            .collect();

        let mut indegree = vec![0usize; self.stages.len()];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); self.stages.len()];
        for (i, stage) in self.stages.iter().enumerate() {
            for requirement in stage.requires {
                let &j = index.get(requirement).ok_or_else(|| {
                    RegistryError::UnknownRequirement {
                        stage: stage.name.to_string(),
                        requirement: requirement.to_string(),
                    }
                })?;
                successors[j].push(i);
                indegree[i] += 1;
            }
        }

        let mut ready: BTreeSet<usize> = indegree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.stages.len());
        let mut emitted = vec![false; self.stages.len()];
        while let Some(&i) = ready.iter().next() {
            ready.remove(&i);
            emitted[i] = true;
            order.push(&self.stages[i]);
            for &succ in &successors[i] {
                indegree[succ] -= 1;
                if indegree[succ] == 0 {
                    ready.insert(succ);
                }
            }
        }

        if order.len() < self.stages.len() {
            let mut remaining: BTreeSet<usize> =
                (0..self.stages.len()).filter(|&i| !emitted[i]).collect();
            // Stages downstream of a cycle are stuck too but take no part in
            // it. A cycle member always has a stuck successor, so peeling
            // stages whose successors all got emitted leaves the cycles.
            loop {
                let peel: Vec<usize> = remaining
                    .iter()
                    .copied()
                    .filter(|&i| successors[i].iter().all(|s| !remaining.contains(s)))
                    .collect();
                if peel.is_empty() {
                    break;
                }
                for i in peel {
                    remaining.remove(&i);
                }
            }
            let members = remaining
                .iter()
                .map(|&i| self.stages[i].name.to_string())
                .collect();
            return Err(RegistryError::CyclicDependency { members });
        }
        Ok(order)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &Context, _: &mut IntermediateData) -> Result<Vec<TargetEntity>, ImportError> {
        Ok(Vec::new())
    }

    fn stage(name: &'static str, requires: &'static [&'static str]) -> Stage {
        Stage {
            name,
            provides: &[],
            requires,
            run: noop,
        }
    }

    fn names(order: &[&Stage]) -> Vec<&'static str> {
        order.iter().map(|s| s.name).collect()
    }

    #[test]
    fn respects_declared_predecessors() {
        let mut reg = TranslationRegistry::new();
        reg.register(stage("c", &["b"])).unwrap();
        reg.register(stage("a", &[])).unwrap();
        reg.register(stage("b", &["a"])).unwrap();
        let order = reg.execution_order().unwrap();
        assert_eq!(names(&order), vec!["a", "b", "c"]);
    }

    #[test]
    fn independent_stages_keep_registration_order() {
        let mut reg = TranslationRegistry::new();
        reg.register(stage("third", &[])).unwrap();
        reg.register(stage("first", &[])).unwrap();
        reg.register(stage("second", &[])).unwrap();
        let order = reg.execution_order().unwrap();
        assert_eq!(names(&order), vec!["third", "first", "second"]);
    }

    #[test]
    fn mixed_graph_breaks_ties_by_registration_order() {
        let mut reg = TranslationRegistry::new();
        reg.register(stage("root", &[])).unwrap();
        reg.register(stage("left", &["root"])).unwrap();
        reg.register(stage("right", &["root"])).unwrap();
        reg.register(stage("sink", &["left", "right"])).unwrap();
        let order = reg.execution_order().unwrap();
        assert_eq!(names(&order), vec!["root", "left", "right", "sink"]);
    }

    #[test]
    fn cycle_is_reported_with_members() {
        let mut reg = TranslationRegistry::new();
        reg.register(stage("standalone", &[])).unwrap();
        reg.register(stage("x", &["y"])).unwrap();
        reg.register(stage("y", &["x"])).unwrap();
        let err = reg.execution_order().unwrap_err();
        assert_eq!(
            err,
            RegistryError::CyclicDependency {
                members: vec!["x".to_string(), "y".to_string()],
            }
        );
    }

    #[test]
    fn cycle_report_excludes_mere_dependents() {
        let mut reg = TranslationRegistry::new();
        reg.register(stage("x", &["y"])).unwrap();
        reg.register(stage("y", &["x"])).unwrap();
        // Stuck behind the cycle, but not part of it.
        reg.register(stage("z", &["x"])).unwrap();
        reg.register(stage("after", &["z"])).unwrap();
        let err = reg.execution_order().unwrap_err();
        assert_eq!(
            err,
            RegistryError::CyclicDependency {
                members: vec!["x".to_string(), "y".to_string()],
            }
        );
    }

    #[test]
    fn unknown_requirement_is_rejected() {
        let mut reg = TranslationRegistry::new();
        reg.register(stage("a", &["missing"])).unwrap();
        let err = reg.execution_order().unwrap_err();
        assert_eq!(
            err,
            RegistryError::UnknownRequirement {
                stage: "a".to_string(),
                requirement: "missing".to_string(),
            }
        );
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = TranslationRegistry::new();
        reg.register(stage("a", &[])).unwrap();
        let err = reg.register(stage("a", &[])).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateStage("a".to_string()));
    }
}
