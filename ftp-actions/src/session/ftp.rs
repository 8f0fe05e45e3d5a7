// FTP and FTPS sessions
// Passive data connections, binary transfers, explicit TLS for FTPS

use super::{RemoteSession, StreamConsumer};
use crate::errors::ActionError;
use crate::models::{ConnectionSpec, Protocol, RemoteEntry};
use native_tls::TlsConnector;
use std::io::Read;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::time::Duration;
use suppaftp::list::File as ListedFile;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode, NativeTlsConnector, NativeTlsFtpStream, Status};
use tracing::{debug, error, info, instrument, warn};

/// Protocol option accepting self-signed server certificates
pub const TLS_ACCEPT_INVALID_CERTS: &str = "tlsAcceptInvalidCerts";

enum Control {
    Plain(FtpStream),
    Secure(NativeTlsFtpStream),
}

// Both stream flavours expose the same inherent API; dispatch on the variant.
macro_rules! on_stream {
    ($control:expr, $stream:ident => $body:expr) => {
        match $control {
            Control::Plain($stream) => $body,
            Control::Secure($stream) => $body,
        }
    };
}

/// Failure of one FTP operation: either the server or the stream consumer
enum OpFailure {
    Ftp(FtpError),
    Consumer(ActionError),
}

impl From<FtpError> for OpFailure {
    fn from(err: FtpError) -> Self {
        OpFailure::Ftp(err)
    }
}

/// True when a server reply says the data channel must be protected (reply 522)
pub fn is_protection_required(reply: &str) -> bool {
    let reply = reply.trim_start();
    reply.starts_with("522")
        || reply
            .to_ascii_lowercase()
            .contains("data connections must be encrypted")
}

fn reply_text(err: &FtpError) -> Option<String> {
    match err {
        FtpError::UnexpectedResponse(response) => {
            Some(String::from_utf8_lossy(&response.body).into_owned())
        }
        _ => None,
    }
}

fn needs_protection(err: &FtpError) -> bool {
    reply_text(err).is_some_and(|reply| is_protection_required(&reply))
}

fn describe(err: &FtpError) -> String {
    match reply_text(err) {
        Some(reply) => format!("{} ({})", err, reply.trim()),
        None => err.to_string(),
    }
}

/// Session over an FTP control connection, optionally TLS-secured
pub struct FtpSession {
    control: Option<Control>,
    host: String,
    port: u16,
}

impl FtpSession {
    /// Connect, verify the greeting, log in and switch to passive binary mode
    #[instrument(skip(spec), fields(host = %spec.host, port = spec.port, protocol = %spec.protocol))]
    pub fn connect(spec: &ConnectionSpec) -> Result<Self, ActionError> {
        let connection_error = |reason: String| ActionError::Connection {
            host: spec.host.clone(),
            port: spec.port,
            reason,
        };

        let addr = resolve(spec).map_err(&connection_error)?;
        let timeout = Duration::from_secs(spec.connect_timeout_seconds);

        // The client rejects any greeting other than a positive completion reply
        // and drops the transport with the failed stream.
        let mut control = match spec.protocol {
            Protocol::Ftps => {
                let stream = NativeTlsFtpStream::connect_timeout(addr, timeout)
                    .map_err(|e| connection_error(format!("FTP server refused connection: {}", describe(&e))))?;
                log_welcome(spec, stream.get_welcome_msg());
                let accept_invalid = spec
                    .option(TLS_ACCEPT_INVALID_CERTS)
                    .is_some_and(|v| v.eq_ignore_ascii_case("true"));
                let connector = TlsConnector::builder()
                    .danger_accept_invalid_certs(accept_invalid)
                    .build()
                    .map_err(|e| connection_error(format!("Failed to build TLS connector: {}", e)))?;
                let stream = stream
                    .into_secure(NativeTlsConnector::from(connector), &spec.host)
                    .map_err(|e| connection_error(format!("TLS negotiation failed: {}", describe(&e))))?;
                Control::Secure(stream)
            }
            _ => {
                let stream = FtpStream::connect_timeout(addr, timeout)
                    .map_err(|e| connection_error(format!("FTP server refused connection: {}", describe(&e))))?;
                log_welcome(spec, stream.get_welcome_msg());
                Control::Plain(stream)
            }
        };

        let login = on_stream!(&mut control, s => s.login(&spec.username, &spec.password));
        if let Err(e) = login {
            error!(
                error = %describe(&e),
                host = %spec.host,
                port = spec.port,
                username = %spec.username,
                "Login command failed"
            );
            if let Err(quit_err) = on_stream!(&mut control, s => s.quit()) {
                warn!(error = %quit_err, "Logout after failed login failed");
            }
            return Err(ActionError::Authentication {
                host: spec.host.clone(),
                port: spec.port,
                user: spec.username.clone(),
                reason: format!("{}. Please check user name and password", describe(&e)),
            });
        }

        on_stream!(&mut control, s => s.set_mode(Mode::Passive));
        on_stream!(&mut control, s => s.transfer_type(FileType::Binary))
            .map_err(|e| connection_error(format!("Failed to switch to binary mode: {}", describe(&e))))?;

        info!(host = %spec.host, port = spec.port, "FTP session established");
        Ok(Self {
            control: Some(control),
            host: spec.host.clone(),
            port: spec.port,
        })
    }

    fn control(&mut self) -> Result<&mut Control, FtpError> {
        self.control.as_mut().ok_or_else(|| {
            FtpError::ConnectionError(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "session already closed",
            ))
        })
    }

    /// Run a data-channel operation; on FTPS a 522 reply protects the channel and retries once
    ///
    /// `into_secure` already negotiates `PBSZ 0`/`PROT P`, so this only fires when a server
    /// still demands protection afterwards (for example after resetting its data-channel state).
    fn with_protection_retry<T>(
        &mut self,
        mut op: impl FnMut(&mut Control) -> Result<T, OpFailure>,
    ) -> Result<T, OpFailure> {
        let control = self.control()?;
        if !matches!(control, Control::Secure(_)) {
            return op(control);
        }
        retry_once_protected(
            control,
            op,
            |failure: &OpFailure| matches!(failure, OpFailure::Ftp(err) if needs_protection(err)),
            |control: &mut Control| protect_data_channel(control).map_err(OpFailure::Ftp),
        )
    }

    fn transfer_error(&self, path: &str, failure: OpFailure) -> ActionError {
        match failure {
            OpFailure::Ftp(e) => ActionError::transfer(
                path,
                format!("{} (server {}:{})", describe(&e), self.host, self.port),
            ),
            OpFailure::Consumer(e) => e,
        }
    }
}

fn resolve(spec: &ConnectionSpec) -> Result<SocketAddr, String> {
    spec.address()
        .to_socket_addrs()
        .map_err(|e| format!("Failed to resolve {}: {}", spec.address(), e))?
        .next()
        .ok_or_else(|| format!("No address found for {}", spec.address()))
}

fn log_welcome(spec: &ConnectionSpec, welcome: Option<&str>) {
    info!(
        host = %spec.host,
        port = spec.port,
        reply = welcome.unwrap_or_default().trim(),
        "Connected to FTP server"
    );
}

fn protect_data_channel(control: &mut Control) -> Result<(), FtpError> {
    if let Control::Secure(s) = control {
        s.custom_command("PBSZ 0", &[Status::CommandOk])?;
        s.custom_command("PROT P", &[Status::CommandOk])?;
    }
    Ok(())
}

/// Run `op`; when its failure satisfies `needs_protection`, call `protect` and run `op` once more
fn retry_once_protected<C, T, E>(
    control: &mut C,
    mut op: impl FnMut(&mut C) -> Result<T, E>,
    needs_protection: impl Fn(&E) -> bool,
    protect: impl FnOnce(&mut C) -> Result<(), E>,
) -> Result<T, E> {
    match op(control) {
        Err(err) if needs_protection(&err) => {
            warn!("Server requires an encrypted data channel, switching to protected mode and retrying");
            protect(control)?;
            op(control)
        }
        other => other,
    }
}

/// Base name of a listed entry; some servers list full paths
fn base_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

impl RemoteSession for FtpSession {
    #[instrument(skip(self), fields(host = %self.host))]
    fn list(&mut self, dir: &str) -> Result<Vec<RemoteEntry>, ActionError> {
        let lines = self
            .with_protection_retry(|control| Ok(on_stream!(control, s => s.list(Some(dir)))?))
            .map_err(|failure| match failure {
                OpFailure::Ftp(e) => ActionError::List {
                    path: dir.to_string(),
                    reason: format!("{} (server {}:{})", describe(&e), self.host, self.port),
                },
                OpFailure::Consumer(e) => e,
            })?;

        info!(dir = %dir, lines = lines.len(), "Listed remote directory");

        let mut entries = Vec::with_capacity(lines.len());
        for line in &lines {
            match ListedFile::from_str(line) {
                Ok(file) => {
                    let name = base_name(file.name());
                    if file.is_directory() {
                        entries.push(RemoteEntry::directory(dir, name));
                    } else {
                        entries.push(RemoteEntry::file(dir, name));
                    }
                }
                Err(e) => debug!(line = %line, error = %e, "Skipping unparseable listing line"),
            }
        }
        Ok(entries)
    }

    fn read_stream(
        &mut self,
        path: &str,
        consumer: &mut StreamConsumer<'_>,
    ) -> Result<(), ActionError> {
        let result = self.with_protection_retry(|control| {
            on_stream!(control, s => {
                let mut data = s.retr_as_stream(path)?;
                let consumed = consumer(&mut data);
                if let Err(e) = s.finalize_retr_stream(data) {
                    error!(path = %path, error = %describe(&e), "Error completing command");
                }
                consumed.map_err(OpFailure::Consumer)
            })
        });
        result.map_err(|failure| self.transfer_error(path, failure))
    }

    fn write_stream(&mut self, path: &str, source: &mut dyn Read) -> Result<u64, ActionError> {
        let result = self.with_protection_retry(|control| {
            let mut reader: &mut dyn Read = &mut *source;
            Ok(on_stream!(control, s => s.put_file(path, &mut reader))?)
        });
        result.map_err(|failure| self.transfer_error(path, failure))
    }

    fn delete(&mut self, path: &str) -> Result<(), ActionError> {
        let host = self.host.clone();
        let control = self.control().map_err(|e| ActionError::Delete {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        on_stream!(control, s => s.rm(path)).map_err(|e| ActionError::Delete {
            path: path.to_string(),
            reason: format!("{} (server {})", describe(&e), host),
        })
    }

    fn change_dir(&mut self, dir: &str) -> Result<(), ActionError> {
        let control = self.control().map_err(|e| ActionError::transfer(dir, e))?;
        on_stream!(control, s => s.cwd(dir)).map_err(|e| ActionError::transfer(dir, describe(&e)))
    }

    fn make_dir(&mut self, dir: &str) -> Result<(), ActionError> {
        let control = self.control().map_err(|e| ActionError::transfer(dir, e))?;
        on_stream!(control, s => s.mkdir(dir)).map_err(|e| ActionError::transfer(dir, describe(&e)))
    }

    fn close(&mut self) {
        let Some(control) = self.control.take() else {
            return;
        };
        info!(host = %self.host, port = self.port, "Closing FTP session");
        let quit = match control {
            Control::Plain(mut s) => s.quit(),
            Control::Secure(mut s) => s.quit(),
        };
        if let Err(e) = quit {
            warn!(error = %e, host = %self.host, "Failure to disconnect the ftp connection");
        }
    }
}

impl Drop for FtpSession {
    fn drop(&mut self) {
        self.close();
    }
}
