//! Staged output accumulator.
//!
//! Objects produced by the running stage sit in `staging` and become visible
//! only after `flush()`. Iterating while anything is staged is a pipeline
//! ordering bug and fails hard. Lookup-store entries are deliberately *not*
//! staged this way; they need cross-stage visibility immediately.

use std::slice;

use thiserror::Error;
use tracing::{debug, info};

use crate::target::{count_kinds, kind_summary, TargetEntity};

pub type InterestFilter = Box<dyn Fn(&TargetEntity) -> bool>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StagingError {
    #[error("{staged} object(s) still staged; flush before iterating")]
    NotFlushed { staged: usize },
}

#[derive(Default)]
pub struct ObjectRegistry {
    committed: Vec<TargetEntity>,
    staging: Vec<TargetEntity>,
    filters: Vec<InterestFilter>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a debug introspection filter. Matching objects are logged at
    /// an elevated level on insert; control flow is unaffected.
    pub fn add_filter(&mut self, filter: InterestFilter) {
        self.filters.push(filter);
    }

    pub fn add(&mut self, entity: TargetEntity) {
        self.insert_hook(&entity);
        self.staging.push(entity);
    }

    pub fn add_all(&mut self, entities: Vec<TargetEntity>) {
        for entity in &entities {
            self.insert_hook(entity);
        }
        self.staging.extend(entities);
    }

    /// Moves all staged objects into the committed sequence.
    pub fn flush(&mut self) {
        let counts = count_kinds(&self.staging);
        debug!(
            event = "registry_flush",
            staged = self.staging.len(),
            summary = %kind_summary(&counts),
        );
        self.committed.append(&mut self.staging);
    }

    pub fn iter(&self) -> Result<slice::Iter<'_, TargetEntity>, StagingError> {
        if !self.staging.is_empty() {
            return Err(StagingError::NotFlushed {
                staged: self.staging.len(),
            });
        }
        Ok(self.committed.iter())
    }

    pub fn into_committed(self) -> Result<Vec<TargetEntity>, StagingError> {
        if !self.staging.is_empty() {
            return Err(StagingError::NotFlushed {
                staged: self.staging.len(),
            });
        }
        Ok(self.committed)
    }

    /// Committed objects only; staged ones do not count.
    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }

    fn insert_hook(&self, entity: &TargetEntity) {
        if self.filters.iter().any(|interesting| interesting(entity)) {
            info!(event = "interesting_object", object = ?entity);
        }
    }
}
