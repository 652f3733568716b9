//! The translation pipeline: ordered stages, a shared lookup store and a
//! staged output buffer.

pub mod context;
pub mod error;
pub mod registry;
pub mod staging;
pub mod stages;

use tracing::{error, info};

pub use context::{Context, IntermediateData};
pub use error::ImportError;
pub use registry::{RegistryError, Stage, StageFn, TranslationRegistry};
pub use staging::{ObjectRegistry, StagingError};

use crate::target::{count_kinds, kind_summary};

/// Drives the registered stages in execution order.
///
/// Each stage receives the immutable context plus the mutable lookup store,
/// returns its newly created entities, and has them staged and flushed before
/// the next stage starts. The first [`ImportError::Aborted`] stops the run;
/// whether anything gets persisted is the caller's decision.
pub fn do_import(ctx: &Context) -> Result<ObjectRegistry, ImportError> {
    let registry = stages::build_registry()?;
    run_pipeline(ctx, &registry)
}

pub fn run_pipeline(
    ctx: &Context,
    registry: &TranslationRegistry,
) -> Result<ObjectRegistry, ImportError> {
    let order = registry.execution_order()?;
    info!(event = "import_start", stages = order.len());

    let mut data = IntermediateData::default();
    let mut objects = ObjectRegistry::new();
    for stage in order {
        info!(event = "stage_start", stage = stage.name);
        let produced = (stage.run)(ctx, &mut data)?;
        let counts = count_kinds(&produced);
        info!(
            event = "stage_done",
            stage = stage.name,
            produced = produced.len(),
            summary = %kind_summary(&counts),
        );
        objects.add_all(produced);
        objects.flush();
    }

    info!(event = "import_done", objects = objects.len());
    Ok(objects)
}

/// Shared end-of-stage abort check.
///
/// Row-level defects are logged and counted while the stage keeps going, so
/// one pass surfaces the full defect list; any non-zero count then promotes
/// to a whole-run abort here, at the stage boundary.
pub(crate) fn abort_on_errors(stage: &'static str, errors: usize) -> Result<(), ImportError> {
    if errors > 0 {
        error!(event = "stage_aborting", stage, errors);
        return Err(ImportError::Aborted { stage, errors });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_check_passes_without_errors() {
        assert!(abort_on_errors("test_stage", 0).is_ok());
    }

    #[test]
    fn abort_check_promotes_row_defects() {
        let err = abort_on_errors("test_stage", 3).unwrap_err();
        assert!(matches!(
            err,
            ImportError::Aborted {
                stage: "test_stage",
                errors: 3,
            }
        ));
    }
}
