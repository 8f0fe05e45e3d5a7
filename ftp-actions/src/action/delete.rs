// Delete action: remove a list of files from the remote server

use super::{on_item_failure, run_recorded, Action};
use crate::config::{DeleteConfig, DEFAULT_CONNECT_TIMEOUT_SECONDS};
use crate::context::ActionContext;
use crate::errors::ActionError;
use crate::models::{ErrorPolicy, TransferResult};
use crate::session::{SessionFactory, SessionGuard};
use std::sync::Arc;
use tracing::{info, instrument};

const ACTION: &str = "delete";

pub struct DeleteAction {
    config: DeleteConfig,
    sessions: Arc<dyn SessionFactory>,
    connect_timeout_seconds: u64,
}

impl DeleteAction {
    pub fn new(config: DeleteConfig, sessions: Arc<dyn SessionFactory>) -> Self {
        Self {
            config,
            sessions,
            connect_timeout_seconds: DEFAULT_CONNECT_TIMEOUT_SECONDS,
        }
    }

    pub fn with_connect_timeout(mut self, seconds: u64) -> Self {
        self.connect_timeout_seconds = seconds;
        self
    }

    #[instrument(skip(self, ctx), fields(execution_id = %ctx.execution_id))]
    fn execute(&self, ctx: &mut ActionContext) -> Result<Vec<String>, ActionError> {
        let request = self.config.resolve(ctx, self.connect_timeout_seconds)?;
        let protocol = request.connection.protocol.as_str();
        let policy = ErrorPolicy::from_continue_flag(request.continue_on_error);

        let mut session = SessionGuard::open(self.sessions.as_ref(), &request.connection)?;

        let mut deleted = TransferResult::new();
        for path in &request.paths {
            match session.delete(path) {
                Ok(()) => {
                    info!(path = %path, "Deleted remote file");
                    deleted.record(path.clone());
                }
                Err(e) => on_item_failure(policy, ACTION, protocol, path, e)?,
            }
        }
        session.close();

        Ok(deleted.paths().to_vec())
    }
}

impl Action for DeleteAction {
    fn name(&self) -> &'static str {
        ACTION
    }

    fn run(&self, ctx: &mut ActionContext) -> Result<(), ActionError> {
        run_recorded(ACTION, ctx, |ctx| self.execute(ctx))
    }
}
