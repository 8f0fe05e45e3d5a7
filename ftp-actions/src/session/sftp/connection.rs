// SSH transport setup and authentication for SFTP sessions

use super::options::{
    HostKeyPolicy, CIPHERS, COMPRESSION, CONNECT_TIMEOUT, HOST_KEY_ALGORITHMS, KEX_ALGORITHMS,
    LOG_LEVEL, MACS, SERVER_ALIVE_INTERVAL, STRICT_HOST_KEY_CHECKING, USER_KNOWN_HOSTS_FILE,
};
use crate::errors::ActionError;
use crate::models::ConnectionSpec;
use ssh2::{CheckResult, KnownHostFileKind, MethodType, Session};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Connect, handshake, verify the host key and authenticate with username/password
#[instrument(skip(spec), fields(host = %spec.host, port = spec.port))]
pub(super) fn open_session(spec: &ConnectionSpec) -> Result<Session, ActionError> {
    let connection_error = |reason: String| ActionError::Connection {
        host: spec.host.clone(),
        port: spec.port,
        reason,
    };

    let timeout_seconds = spec
        .option(CONNECT_TIMEOUT)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(spec.connect_timeout_seconds);
    let timeout = Duration::from_secs(timeout_seconds);

    if let Some(level) = spec.option(LOG_LEVEL) {
        debug!(log_level = %level, "SSH LogLevel requested; verbosity follows the tracing filter");
    }

    info!(host = %spec.host, port = spec.port, "Establishing SFTP connection");

    let addr = spec
        .address()
        .to_socket_addrs()
        .map_err(|e| connection_error(format!("Failed to resolve {}: {}", spec.address(), e)))?
        .next()
        .ok_or_else(|| connection_error(format!("No address found for {}", spec.address())))?;

    let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
        error!(error = %e, host = %spec.host, port = spec.port, "Failed to connect");
        connection_error(format!("Failed to connect: {}", e))
    })?;
    tcp.set_read_timeout(Some(timeout))
        .and_then(|_| tcp.set_write_timeout(Some(timeout)))
        .map_err(|e| connection_error(format!("Failed to set socket timeout: {}", e)))?;
    let socket = tcp
        .try_clone()
        .map_err(|e| connection_error(format!("Failed to clone socket: {}", e)))?;

    let mut session = Session::new()
        .map_err(|e| connection_error(format!("Failed to create SSH session: {}", e)))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));

    apply_options(&session, spec).map_err(&connection_error)?;

    session.handshake().map_err(|e| {
        error!(error = %e, "SSH handshake failed");
        connection_error(format!("SSH handshake failed: {}", e))
    })?;

    verify_host_key(&session, spec).map_err(&connection_error)?;

    debug!(username = %spec.username, "Authenticating with password");
    let auth_error = |reason: String| ActionError::Authentication {
        host: spec.host.clone(),
        port: spec.port,
        user: spec.username.clone(),
        reason,
    };
    session
        .userauth_password(&spec.username, &spec.password)
        .map_err(|e| {
            error!(error = %e, username = %spec.username, "Password authentication failed");
            auth_error(format!("Password authentication failed: {}", e))
        })?;
    if !session.authenticated() {
        error!("Authentication failed - session not authenticated");
        return Err(auth_error("Session not authenticated".to_string()));
    }

    clear_timeouts(&session, &socket);

    info!(host = %spec.host, port = spec.port, "SFTP connection established");
    Ok(session)
}

/// Drop the connect timeout once the session is established; transfers run unbounded
fn clear_timeouts(session: &Session, socket: &TcpStream) {
    session.set_timeout(0);
    if let Err(e) = socket
        .set_read_timeout(None)
        .and_then(|_| socket.set_write_timeout(None))
    {
        warn!(error = %e, "Failed to clear socket timeouts");
    }
}

fn apply_options(session: &Session, spec: &ConnectionSpec) -> Result<(), String> {
    for (key, value) in &spec.options {
        let method = match key.as_str() {
            KEX_ALGORITHMS => Some(vec![MethodType::Kex]),
            HOST_KEY_ALGORITHMS => Some(vec![MethodType::HostKey]),
            CIPHERS => Some(vec![MethodType::CryptCs, MethodType::CryptSc]),
            MACS => Some(vec![MethodType::MacCs, MethodType::MacSc]),
            _ => None,
        };
        if let Some(methods) = method {
            for method_type in methods {
                session
                    .method_pref(method_type, value)
                    .map_err(|e| format!("Unsupported {} '{}': {}", key, value, e))?;
            }
            continue;
        }

        match key.as_str() {
            COMPRESSION => session.set_compress(value.eq_ignore_ascii_case("yes")),
            SERVER_ALIVE_INTERVAL => {
                let interval = value.parse::<u32>().unwrap_or(0);
                session.set_keepalive(false, interval);
            }
            STRICT_HOST_KEY_CHECKING | USER_KNOWN_HOSTS_FILE | CONNECT_TIMEOUT | LOG_LEVEL => {}
            other => warn!(key = %other, "Ignoring unsupported SSH property"),
        }
    }
    Ok(())
}

fn known_hosts_path(spec: &ConnectionSpec) -> Option<PathBuf> {
    match spec.option(USER_KNOWN_HOSTS_FILE) {
        Some(path) => Some(PathBuf::from(path)),
        None => std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".ssh/known_hosts")),
    }
}

fn verify_host_key(session: &Session, spec: &ConnectionSpec) -> Result<(), String> {
    let policy = spec
        .option(STRICT_HOST_KEY_CHECKING)
        .and_then(HostKeyPolicy::parse)
        .unwrap_or(HostKeyPolicy::Disabled);

    if let Some(hash) = session.host_key_hash(ssh2::HashType::Sha256) {
        let fingerprint = hash
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":");
        debug!(fingerprint = %fingerprint, policy = ?policy, "Server host key");
    }

    if policy == HostKeyPolicy::Disabled {
        return Ok(());
    }

    let (key, _) = session
        .host_key()
        .ok_or_else(|| "Server did not present a host key".to_string())?;

    let mut known_hosts = session
        .known_hosts()
        .map_err(|e| format!("Failed to initialise known hosts: {}", e))?;
    if let Some(path) = known_hosts_path(spec) {
        if let Err(e) = known_hosts.read_file(&path, KnownHostFileKind::OpenSSH) {
            debug!(path = %path.display(), error = %e, "Could not read known hosts file");
        }
    }

    match (known_hosts.check_port(&spec.host, spec.port, key), policy) {
        (CheckResult::Match, _) => Ok(()),
        (CheckResult::NotFound, HostKeyPolicy::AcceptNew) => {
            warn!(host = %spec.host, "Accepting unknown host key");
            Ok(())
        }
        (CheckResult::Mismatch, _) => Err(format!(
            "Host key verification failed: the key for {} has changed",
            spec.host
        )),
        (result, _) => Err(format!(
            "Host key verification failed for {}: {:?}",
            spec.host, result
        )),
    }
}
