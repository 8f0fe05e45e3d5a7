// SSH session options
// Parsed from the comma-separated "key:value" form of sshProperties

use std::fmt;

pub const STRICT_HOST_KEY_CHECKING: &str = "StrictHostKeyChecking";
pub const USER_KNOWN_HOSTS_FILE: &str = "UserKnownHostsFile";
pub const CONNECT_TIMEOUT: &str = "ConnectTimeout";
pub const SERVER_ALIVE_INTERVAL: &str = "ServerAliveInterval";
pub const COMPRESSION: &str = "Compression";
pub const LOG_LEVEL: &str = "LogLevel";
pub const KEX_ALGORITHMS: &str = "KexAlgorithms";
pub const HOST_KEY_ALGORITHMS: &str = "HostKeyAlgorithms";
pub const CIPHERS: &str = "Ciphers";
pub const MACS: &str = "MACs";

/// How the server's host key is checked against known_hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Accept any key
    Disabled,
    /// Key must already be known and match
    Strict,
    /// Unknown keys are accepted, changed keys are not
    AcceptNew,
}

impl HostKeyPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "no" | "off" => Some(HostKeyPolicy::Disabled),
            "yes" | "ask" => Some(HostKeyPolicy::Strict),
            "accept-new" => Some(HostKeyPolicy::AcceptNew),
            _ => None,
        }
    }
}

/// Ordered SSH options; later keys override earlier ones in place
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    entries: Vec<(String, String)>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            entries: vec![(STRICT_HOST_KEY_CHECKING.to_string(), "no".to_string())],
        }
    }
}

impl SshOptions {
    /// Parse `key:value` pairs separated by commas
    ///
    /// Defaults are applied first so that configured keys override them.
    pub fn parse(raw: Option<&str>) -> Result<Self, String> {
        let mut options = Self::default();
        let Some(raw) = raw else {
            return Ok(options);
        };

        for item in raw.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            let Some((key, value)) = item.split_once(':') else {
                return Err(format!(
                    "Invalid SSH property '{}'. Expected the form key:value",
                    item
                ));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("SSH property '{}' has an empty key", item));
            }
            options.set(key, value.trim());
        }

        options.check_values()?;
        Ok(options)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn into_pairs(self) -> Vec<(String, String)> {
        self.entries
    }

    fn check_values(&self) -> Result<(), String> {
        if let Some(value) = self.get(STRICT_HOST_KEY_CHECKING) {
            if HostKeyPolicy::parse(value).is_none() {
                return Err(format!(
                    "Invalid {} value '{}'. Expected one of no, yes, ask, accept-new",
                    STRICT_HOST_KEY_CHECKING, value
                ));
            }
        }
        for key in [CONNECT_TIMEOUT, SERVER_ALIVE_INTERVAL] {
            if let Some(value) = self.get(key) {
                if value.parse::<u32>().is_err() {
                    return Err(format!(
                        "Invalid {} value '{}'. Expected a number of seconds",
                        key, value
                    ));
                }
            }
        }
        if let Some(value) = self.get(COMPRESSION) {
            if !matches!(value.to_ascii_lowercase().as_str(), "yes" | "no") {
                return Err(format!(
                    "Invalid {} value '{}'. Expected yes or no",
                    COMPRESSION, value
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for SshOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .entries
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&joined)
    }
}
