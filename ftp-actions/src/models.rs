use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Connection Models
// ============================================================================

/// Transfer protocol spoken by the remote server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Ftp,
    Ftps,
    Sftp,
}

impl Protocol {
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Ftp | Protocol::Ftps => 21,
            Protocol::Sftp => 22,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Ftp => "ftp",
            Protocol::Ftps => "ftps",
            Protocol::Sftp => "sftp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ftp" => Ok(Protocol::Ftp),
            "ftps" => Ok(Protocol::Ftps),
            "sftp" => Ok(Protocol::Sftp),
            other => Err(format!("Unsupported protocol: {}", other)),
        }
    }
}

/// Everything needed to open one remote session
///
/// Built once per action invocation from validated configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionSpec {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Protocol-specific options, in the order they were configured
    pub options: Vec<(String, String)>,
    pub connect_timeout_seconds: u64,
}

impl ConnectionSpec {
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// The password never reaches the logs.
impl fmt::Debug for ConnectionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSpec")
            .field("protocol", &self.protocol)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("options", &self.options)
            .field("connect_timeout_seconds", &self.connect_timeout_seconds)
            .finish()
    }
}

// ============================================================================
// Transfer Models
// ============================================================================

/// One entry of a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
}

impl RemoteEntry {
    pub fn file(dir: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: join_remote(dir, name),
            is_directory: false,
        }
    }

    pub fn directory(dir: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: join_remote(dir, name),
            is_directory: true,
        }
    }
}

/// Join a remote directory and an entry name with a single separator
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Remote paths transferred by one invocation, in transfer order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    paths: Vec<String>,
}

impl TransferResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, path: impl Into<String>) {
        self.paths.push(path.into());
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Comma-joined form published to the invocation context
    pub fn joined(&self) -> String {
        self.paths.join(",")
    }
}

/// What a batch loop does when one item fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Stop at the first failure and propagate it
    Abort,
    /// Log the failure and move on to the next item
    Continue,
}

impl ErrorPolicy {
    pub fn from_continue_flag(continue_on_error: bool) -> Self {
        if continue_on_error {
            ErrorPolicy::Continue
        } else {
            ErrorPolicy::Abort
        }
    }
}

// ============================================================================
// Outcome Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// Record of one action run, kept in the invocation context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: String,
    pub status: OutcomeStatus,
    pub files: Vec<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}
