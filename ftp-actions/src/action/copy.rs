// Copy action: download matching remote files, expanding ZIP archives on the fly

use super::{on_item_failure, run_recorded, Action};
use crate::archive::ZipExpander;
use crate::config::{CopyConfig, CopyRequest, DEFAULT_CONNECT_TIMEOUT_SECONDS};
use crate::context::ActionContext;
use crate::errors::{ActionError, StorageError};
use crate::models::{ErrorPolicy, RemoteEntry, TransferResult};
use crate::planner::plan;
use crate::session::{RemoteSession, SessionFactory, SessionGuard};
use crate::store::DestinationStore;
use crate::telemetry;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument};

const ACTION: &str = "copy";

pub struct CopyAction {
    config: CopyConfig,
    sessions: Arc<dyn SessionFactory>,
    store: Arc<dyn DestinationStore>,
    connect_timeout_seconds: u64,
}

impl CopyAction {
    pub fn new(
        config: CopyConfig,
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

        let dest = self
            .store
            .make_qualified(Path::new(&request.dest_directory))?;
        if !self.store.exists(&dest)? {
            info!(dest = %dest.display(), "Destination directory does not exist, creating it");
            self.store.mkdirs(&dest)?;
        }

        let mut session = SessionGuard::open(self.sessions.as_ref(), &request.connection)?;

        let listed = session.list(&request.src_directory)?;
        let planned = plan(listed, &request.filter);
        info!(
            src = %request.src_directory,
            dest = %dest.display(),
            files = planned.len(),
            pattern = %request.filter.pattern(),
            "Copying remote files"
        );

        let mut copied = TransferResult::new();
        for entry in &planned {
            match self.copy_entry(&mut *session, entry, &dest, &request) {
                Ok(()) => copied.record(entry.path.clone()),
                // Any failed file ends the copy; the guard still closes the session.
                Err(e) => on_item_failure(ErrorPolicy::Abort, ACTION, protocol, &entry.path, e)?,
            }
        }
        session.close();

        ctx.set_variable(request.file_list_variable.clone(), copied.joined());
        info!(
            variable = %request.file_list_variable,
            copied = copied.len(),
            "Published copied file list"
        );
        Ok(copied.paths().to_vec())
    }

    fn copy_entry(
        &self,
        session: &mut dyn RemoteSession,
        entry: &RemoteEntry,
        dest: &Path,
        request: &CopyRequest,
    ) -> Result<(), ActionError> {
        let protocol = request.connection.protocol.as_str();
        let expand = request.zip_policy.should_expand(&entry.name);
        let store = self.store.as_ref();

        session.read_stream(&entry.path, &mut |reader: &mut dyn Read| {
            if expand {
                info!(archive = %entry.path, "Extracting zip archive");
                let mut archive = ZipExpander::spool(reader, entry.path.as_str())?;
                let extracted = archive.for_each_file(|name, member| {
                    let bytes = write_file(store, &dest.join(name), member)?;
                    telemetry::record_file_transferred(ACTION, protocol, bytes);
                    Ok(())
                })?;
                debug!(archive = %entry.path, entries = extracted, "Archive extracted");
            } else {
                let bytes = write_file(store, &dest.join(&entry.name), reader)?;
                telemetry::record_file_transferred(ACTION, protocol, bytes);
                debug!(path = %entry.path, bytes = bytes, "Copied file");
            }
            Ok(())
        })
    }
}

/// Stream `source` into a fresh file at `target`, returning the bytes written
pub(crate) fn write_file(
    store: &dyn DestinationStore,
    target: &Path,
    source: &mut dyn Read,
) -> Result<u64, ActionError> {
    let write_error = |e: io::Error| StorageError::io(target.display().to_string(), e);
    let mut sink = store.create(target)?;
    let bytes = io::copy(source, &mut sink).map_err(write_error)?;
    sink.flush().map_err(write_error)?;
    Ok(bytes)
}

impl Action for CopyAction {
    fn name(&self) -> &'static str {
        ACTION
    }

    fn run(&self, ctx: &mut ActionContext) -> Result<(), ActionError> {
        run_recorded(ACTION, ctx, |ctx| self.execute(ctx))
    }
}
