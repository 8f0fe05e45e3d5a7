// Pipeline actions: copy (download), put (upload) and delete
// Each run owns one remote session and records its outcome in the invocation context

pub mod copy;
pub mod delete;
pub mod put;

#[cfg(test)]
mod fakes;

pub use copy::CopyAction;
pub use delete::DeleteAction;
pub use put::PutAction;

use crate::config::ActionConfig;
use crate::context::ActionContext;
use crate::errors::ActionError;
use crate::models::{ActionOutcome, ErrorPolicy, OutcomeStatus};
use crate::session::SessionFactory;
use crate::store::DestinationStore;
use crate::telemetry;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// A discrete pipeline step
pub trait Action: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run the action against the invocation context
    ///
    /// Configuration is resolved and validated before any connection is opened.
    fn run(&self, ctx: &mut ActionContext) -> Result<(), ActionError>;
}

/// Build the configured action with its collaborators
pub fn build_action(
    config: ActionConfig,
    sessions: Arc<dyn SessionFactory>,
    store: Arc<dyn DestinationStore>,
    connect_timeout_seconds: u64,
) -> Box<dyn Action> {
    match config {
        ActionConfig::Copy(config) => Box::new(
            CopyAction::new(config, sessions, store).with_connect_timeout(connect_timeout_seconds),
        ),
        ActionConfig::Put(config) => Box::new(
            PutAction::new(config, sessions, store).with_connect_timeout(connect_timeout_seconds),
        ),
        ActionConfig::Delete(config) => Box::new(
            DeleteAction::new(config, sessions).with_connect_timeout(connect_timeout_seconds),
        ),
    }
}

/// Time `body`, then record the outcome and duration
pub(crate) fn run_recorded<F>(
    action: &'static str,
    ctx: &mut ActionContext,
    body: F,
) -> Result<(), ActionError>
where
    F: FnOnce(&mut ActionContext) -> Result<Vec<String>, ActionError>,
{
    let started_at = Utc::now();
    let timer = Instant::now();
    info!(action = action, execution_id = %ctx.execution_id, "Starting action");

    let result = body(ctx);

    let elapsed = timer.elapsed();
    telemetry::record_action_duration(action, elapsed.as_secs_f64());

    let outcome = match &result {
        Ok(files) => {
            info!(
                action = action,
                files = files.len(),
                duration_ms = elapsed.as_millis() as u64,
                "Action completed"
            );
            ActionOutcome {
                action: action.to_string(),
                status: OutcomeStatus::Success,
                files: files.clone(),
                error: None,
                started_at,
                completed_at: Utc::now(),
            }
        }
        Err(e) => {
            error!(
                action = action,
                error = %e,
                kind = e.kind(),
                duration_ms = elapsed.as_millis() as u64,
                "Action failed"
            );
            ActionOutcome {
                action: action.to_string(),
                status: OutcomeStatus::Failed,
                files: Vec::new(),
                error: Some(e.to_string()),
                started_at,
                completed_at: Utc::now(),
            }
        }
    };
    ctx.record_outcome(outcome);

    result.map(|_| ())
}

/// Apply the loop's error policy to one failed item
///
/// `Continue` logs and swallows the failure; `Abort` hands it back for propagation.
pub(crate) fn on_item_failure(
    policy: ErrorPolicy,
    action: &'static str,
    protocol: &'static str,
    item: &str,
    err: ActionError,
) -> Result<(), ActionError> {
    telemetry::record_transfer_failure(action, protocol);
    match policy {
        ErrorPolicy::Abort => {
            error!(action = action, item = %item, error = %err, "Aborting after failure");
            Err(err)
        }
        ErrorPolicy::Continue => {
            warn!(action = action, item = %item, error = %err, "Continuing after failure");
            Ok(())
        }
    }
}
