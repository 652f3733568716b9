use thiserror::Error;

use crate::target::TransactionError;

use super::registry::RegistryError;

/// Failures surfaced by the pipeline itself.
///
/// Row-level defects never appear here directly; stages log and count them,
/// then convert a non-zero count into [`ImportError::Aborted`] at their end.
/// Everything else in this enum is structural: the pipeline is miswired, not
/// the data dirty.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("import aborted: stage {stage} reported {errors} row-level defect(s)")]
    Aborted { stage: &'static str, errors: usize },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error("lookup key {key:?} registered twice in {map}")]
    DuplicateLookupKey { map: &'static str, key: String },
    #[error("{map} entry {key:?} missing although the providing stage already ran")]
    LookupMissing { map: &'static str, key: String },
    #[error("address for {context} matches {matches} already generated addresses; at most one duplicate is consistent")]
    AddressInvariant { context: String, matches: usize },
}
