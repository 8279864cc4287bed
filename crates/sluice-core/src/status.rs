//! Read-only readiness check.

use crate::event::LifecycleEvent;
use crate::stage::Stage;
use crate::CoreError;
use sluice_schema::{Phase, ValidationResult};
use tracing::debug;

/// Run the status-check validators and return what they found.
///
/// Never changes stage state and works whether or not a stage exists. A
/// failure to collect exclusions is reported as a result, not raised, and the
/// validators still run.
pub fn status_check(stage: &Stage) -> Result<Vec<ValidationResult>, CoreError> {
    let mut event = LifecycleEvent::new(Phase::StatusCheck, stage);
    match stage.exclusions().collect(stage.target()) {
        Ok(paths) => event = event.with_excluded_paths(paths),
        Err(e) => event.add_result(ValidationResult::from_failure(
            &e,
            Some("Unable to collect the paths to exclude.".to_owned()),
        )),
    }
    stage.pipeline().run(&mut event)?;
    let results = event.into_results();
    debug!("status check produced {} results", results.len());
    Ok(results)
}
