// SFTP sessions over ssh2

mod connection;
mod options;

pub use options::{HostKeyPolicy, SshOptions};

use super::{RemoteSession, StreamConsumer};
use crate::errors::ActionError;
use crate::models::{join_remote, ConnectionSpec, RemoteEntry};
use ssh2::{Session, Sftp};
use std::io::{self, Read};
use std::path::Path;
use tracing::{info, instrument, warn};

/// Authenticated SSH session with an open SFTP channel
pub struct SftpSession {
    session: Option<Session>,
    sftp: Option<Sftp>,
    host: String,
    /// Working directory for relative paths; empty means the login directory
    cwd: String,
}

impl SftpSession {
    pub fn connect(spec: &ConnectionSpec) -> Result<Self, ActionError> {
        let session = connection::open_session(spec)?;
        let sftp = session.sftp().map_err(|e| ActionError::Connection {
            host: spec.host.clone(),
            port: spec.port,
            reason: format!("Failed to open SFTP channel: {}", e),
        })?;
        Ok(Self {
            session: Some(session),
            sftp: Some(sftp),
            host: spec.host.clone(),
            cwd: String::new(),
        })
    }

    fn channel(&self) -> Result<&Sftp, String> {
        self.sftp
            .as_ref()
            .ok_or_else(|| "session already closed".to_string())
    }

    fn absolute(&self, path: &str) -> String {
        if path.starts_with('/') || self.cwd.is_empty() {
            path.to_string()
        } else {
            join_remote(&self.cwd, path)
        }
    }
}

impl RemoteSession for SftpSession {
    #[instrument(skip(self), fields(host = %self.host))]
    fn list(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, ActionError> {
        let list_error = |reason: String| ActionError::List {
            path: dir.to_string(),
            reason,
        };
        let target = self.absolute(dir);
        let listing = self
            .channel()
            .map_err(&list_error)?
            .readdir(Path::new(&target))
            .map_err(|e| list_error(e.to_string()))?;

        info!(dir = %dir, entries = listing.len(), "Listed remote directory");

        Ok(listing
            .into_iter()
            .filter_map(|(path, stat)| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                Some(if stat.is_dir() {
                    RemoteEntry::directory(dir, &name)
                } else {
                    RemoteEntry::file(dir, &name)
                })
            })
            .collect())
    }

    fn read_stream(
        &mut self,
        path: &str,
        consumer: &mut StreamConsumer<'_>,
    ) -> Result<(), ActionError> {
        let target = self.absolute(path);
        let mut file = self
            .channel()
            .map_err(|e| ActionError::transfer(path, e))?
            .open(Path::new(&target))
            .map_err(|e| ActionError::transfer(path, format!("Failed to open remote file: {}", e)))?;
        // The remote handle closes when `file` drops, on success or failure.
        consumer(&mut file)
    }

    fn write_stream(&mut self, path: &str, source: &mut dyn Read) -> Result<u64, ActionError> {
        let target = self.absolute(path);
        let mut file = self
            .channel()
            .map_err(|e| ActionError::transfer(path, e))?
            .create(Path::new(&target))
            .map_err(|e| ActionError::transfer(path, format!("Failed to create remote file: {}", e)))?;
        io::copy(source, &mut file).map_err(|e| ActionError::transfer(path, e))
    }

    fn delete(&mut self, path: &str) -> Result<(), ActionError> {
        let delete_error = |reason: String| ActionError::Delete {
            path: path.to_string(),
            reason,
        };
        let target = self.absolute(path);
        self.channel()
            .map_err(&delete_error)?
            .unlink(Path::new(&target))
            .map_err(|e| delete_error(e.to_string()))
    }

    fn change_dir(&mut self, dir: &str) -> Result<(), ActionError> {
        let target = self.absolute(dir);
        let stat = self
            .channel()
            .map_err(|e| ActionError::transfer(dir, e))?
            .stat(Path::new(&target))
            .map_err(|e| ActionError::transfer(dir, e))?;
        if !stat.is_dir() {
            return Err(ActionError::transfer(dir, "not a directory"));
        }
        self.cwd = target;
        Ok(())
    }

    fn make_dir(&mut self, dir: &str) -> Result<(), ActionError> {
        let target = self.absolute(dir);
        self.channel()
            .map_err(|e| ActionError::transfer(dir, e))?
            .mkdir(Path::new(&target), 0o755)
            .map_err(|e| ActionError::transfer(dir, e))
    }

    fn close(&mut self) {
        // Channel before transport.
        drop(self.sftp.take());
        let Some(session) = self.session.take() else {
            return;
        };
        info!(host = %self.host, "Closing SFTP session");
        if let Err(e) = session.disconnect(None, "Closing SFTP session", None) {
            warn!(error = %e, host = %self.host, "Failure to disconnect the sftp session");
        }
    }
}

impl Drop for SftpSession {
    fn drop(&mut self) {
        self.close();
    }
}
