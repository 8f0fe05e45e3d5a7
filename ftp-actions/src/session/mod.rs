// Remote session management
// One authenticated connection per action run, closed exactly once on every exit path

mod ftp;
mod sftp;

pub use ftp::{is_protection_required, FtpSession, TLS_ACCEPT_INVALID_CERTS};
pub use sftp::{HostKeyPolicy, SftpSession, SshOptions};

use crate::errors::ActionError;
use crate::models::{ConnectionSpec, Protocol, RemoteEntry};
use std::io::Read;
use std::ops::{Deref, DerefMut};
use tracing::{debug, instrument};

/// Consumer handed an open remote read stream
pub type StreamConsumer<'a> = dyn FnMut(&mut dyn Read) -> Result<(), ActionError> + 'a;

/// Operations every protocol backend provides
pub trait RemoteSession {
    /// List the entries of a remote directory
    fn list(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, ActionError>;

    /// Open `path` for reading and hand the stream to `consumer`
    ///
    /// The stream is finalised before this returns, whatever the consumer did.
    fn read_stream(&mut self, path: &str, consumer: &mut StreamConsumer<'_>)
        -> Result<(), ActionError>;

    /// Upload everything readable from `source` to `path`; returns bytes written
    fn write_stream(&mut self, path: &str, source: &mut dyn Read) -> Result<u64, ActionError>;

    fn delete(&mut self, path: &str) -> Result<(), ActionError>;

    fn change_dir(&mut self, dir: &str) -> Result<(), ActionError>;

    fn make_dir(&mut self, dir: &str) -> Result<(), ActionError>;

    /// Release the channel and transport
    ///
    /// Idempotent. Teardown failures are logged, never returned.
    fn close(&mut self);
}

/// Opens sessions for a connection spec
///
/// Passed into each action explicitly rather than held as shared state.
pub trait SessionFactory: Send + Sync {
    fn open(&self, spec: &ConnectionSpec) -> Result<Box<dyn RemoteSession>, ActionError>;
}

/// Factory backed by the real FTP, FTPS and SFTP clients
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSessionFactory;

impl SessionFactory for DefaultSessionFactory {
    #[instrument(skip(self, spec), fields(protocol = %spec.protocol, host = %spec.host, port = spec.port))]
    fn open(&self, spec: &ConnectionSpec) -> Result<Box<dyn RemoteSession>, ActionError> {
        match spec.protocol {
            Protocol::Ftp | Protocol::Ftps => Ok(Box::new(FtpSession::connect(spec)?)),
            Protocol::Sftp => Ok(Box::new(SftpSession::connect(spec)?)),
        }
    }
}

/// Owns an open session and closes it on drop
///
/// Explicit `close` and the drop both route through the same once-only path.
pub struct SessionGuard {
    session: Box<dyn RemoteSession>,
    closed: bool,
}

impl SessionGuard {
    pub fn open(factory: &dyn SessionFactory, spec: &ConnectionSpec) -> Result<Self, ActionError> {
        let session = factory.open(spec)?;
        Ok(Self {
            session,
            closed: false,
        })
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        debug!("Closing remote session");
        self.session.close();
    }
}

impl Deref for SessionGuard {
    type Target = dyn RemoteSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.close();
    }
}
