// Put action: upload local files to a remote directory

use super::{on_item_failure, run_recorded, Action};
use crate::config::{PutConfig, DEFAULT_CONNECT_TIMEOUT_SECONDS};
use crate::context::ActionContext;
use crate::errors::ActionError;
use crate::models::{ErrorPolicy, TransferResult};
use crate::session::{RemoteSession, SessionFactory, SessionGuard};
use crate::store::{DestinationStore, StoreEntry};
use crate::telemetry;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const ACTION: &str = "put";

pub struct PutAction {
    config: PutConfig,
    sessions: Arc<dyn SessionFactory>,
    store: Arc<dyn DestinationStore>,
    connect_timeout_seconds: u64,
}

impl PutAction {
    pub fn new(
        config: PutConfig,
        sessions: Arc<dyn SessionFactory>,
        store: Arc<dyn DestinationStore>,
    ) -> Self {
        Self {
            config,
            sessions,
            store,
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

        let src = Path::new(&request.src_path);
        if !self.store.exists(src)? {
            return Err(ActionError::SourceNotFound(request.src_path.clone()));
        }

        let mut session = SessionGuard::open(self.sessions.as_ref(), &request.connection)?;
        enter_directory(&mut *session, &request.dest_directory)?;

        let filter = &request.filter;
        let entries = self.store.list_status(src, &|name: &str| filter.matches(name))?;
        info!(
            src = %request.src_path,
            dest = %request.dest_directory,
            candidates = entries.len(),
            "Uploading local files"
        );

        let mut uploaded = TransferResult::new();
        for entry in &entries {
            if entry.is_directory {
                debug!(path = %entry.path.display(), "Skipping directory");
                continue;
            }
            match self.upload(&mut *session, entry) {
                Ok(bytes) => {
                    telemetry::record_file_transferred(ACTION, protocol, bytes);
                    info!(file = %entry.name, bytes = bytes, "Uploaded file");
                    uploaded.record(entry.name.clone());
                }
                // One rejected upload never stops the others.
                Err(e) => on_item_failure(ErrorPolicy::Continue, ACTION, protocol, &entry.name, e)?,
            }
        }
        session.close();

        Ok(uploaded.paths().to_vec())
    }

    fn upload(&self, session: &mut dyn RemoteSession, entry: &StoreEntry) -> Result<u64, ActionError> {
        let mut source = self.store.open(&entry.path)?;
        session.write_stream(&entry.name, &mut source)
    }
}

/// Change into `dir`, creating it first when the change fails
fn enter_directory(session: &mut dyn RemoteSession, dir: &str) -> Result<(), ActionError> {
    if session.change_dir(dir).is_ok() {
        return Ok(());
    }
    info!(dir = %dir, "Remote directory does not exist, creating it");
    if let Err(e) = session.make_dir(dir) {
        warn!(dir = %dir, error = %e, "Failed to create remote directory");
    }
    session.change_dir(dir)
}

impl Action for PutAction {
    fn name(&self) -> &'static str {
        ACTION
    }

    fn run(&self, ctx: &mut ActionContext) -> Result<(), ActionError> {
        run_recorded(ACTION, ctx, |ctx| self.execute(ctx))
    }
}
