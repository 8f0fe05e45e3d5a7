// Configuration management
// Action configs resolve their macros and validate through the invocation context;
// runner settings are layered with the config crate (file, env, CLI path).

use crate::context::ActionContext;
use crate::errors::ActionError;
use crate::models::{ConnectionSpec, Protocol};
use crate::planner::{TransferFilter, ZipPolicy, DEFAULT_FILE_NAME_REGEX};
use crate::session::SshOptions;
use crate::session::TLS_ACCEPT_INVALID_CERTS;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_FILE_LIST_VARIABLE: &str = "ftp.files.copied";
pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 30;
const ANONYMOUS: &str = "anonymous";

// ============================================================================
// Action configuration
// ============================================================================

/// Remote server connection settings shared by every action
///
/// camelCase names are accepted as aliases. The lowercase ones match keys after the
/// config crate has folded them while loading runner settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: Option<i64>,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default, alias = "userName", alias = "username")]
    pub user_name: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, alias = "sshProperties", alias = "sshproperties")]
    pub ssh_properties: Option<String>,
    #[serde(default, alias = "tlsAcceptInvalidCerts", alias = "tlsacceptinvalidcerts")]
    pub tls_accept_invalid_certs: bool,
}

impl ConnectionConfig {
    /// Resolve macros and validate, collecting failures into the context
    ///
    /// Always returns a spec; callers must check `ctx.get_or_fail()` before using it.
    pub fn resolve(&self, ctx: &mut ActionContext, connect_timeout_seconds: u64) -> ConnectionSpec {
        let host = ctx.resolve_field("host", &self.host);
        if host.trim().is_empty() {
            ctx.report_failure("Host must be specified", Some("host"));
        }

        let port = match self.port {
            None => self.protocol.default_port(),
            Some(port) => u16::try_from(port).unwrap_or_else(|_| {
                ctx.report_failure(
                    format!("Port must be in the range 0-65535, got {}", port),
                    Some("port"),
                );
                self.protocol.default_port()
            }),
        };

        let user_name = ctx
            .resolve_optional_field("userName", self.user_name.as_deref())
            .filter(|name| !name.is_empty());
        let username = match (user_name, self.protocol) {
            (Some(name), _) => name,
            (None, Protocol::Sftp) => {
                ctx.report_failure("User name is required for SFTP", Some("userName"));
                String::new()
            }
            (None, _) => ANONYMOUS.to_string(),
        };

        let password = ctx
            .resolve_optional_field("password", self.password.as_deref())
            .unwrap_or_default();

        let options = match self.protocol {
            Protocol::Sftp => {
                let raw = ctx.resolve_optional_field("sshProperties", self.ssh_properties.as_deref());
                match SshOptions::parse(raw.as_deref()) {
                    Ok(options) => options.into_pairs(),
                    Err(message) => {
                        ctx.report_failure(message, Some("sshProperties"));
                        Vec::new()
                    }
                }
            }
            Protocol::Ftps if self.tls_accept_invalid_certs => {
                vec![(TLS_ACCEPT_INVALID_CERTS.to_string(), "true".to_string())]
            }
            _ => Vec::new(),
        };

        ConnectionSpec {
            protocol: self.protocol,
            host: host.trim().to_string(),
            port,
            username,
            password,
            options,
            connect_timeout_seconds,
        }
    }
}

fn default_extract_zip_files() -> bool {
    true
}

fn default_file_list_variable() -> String {
    DEFAULT_FILE_LIST_VARIABLE.to_string()
}

fn require_non_empty(ctx: &mut ActionContext, field: &str, value: &str, message: &str) {
    if value.trim().is_empty() {
        ctx.report_failure(message, Some(field));
    }
}

fn compile_filter(ctx: &mut ActionContext, pattern: Option<&str>) -> TransferFilter {
    let pattern = ctx
        .resolve_optional_field("fileNameRegex", pattern)
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_FILE_NAME_REGEX.to_string());
    match TransferFilter::new(&pattern) {
        Ok(filter) => filter,
        Err(e) => {
            ctx.report_failure(
                format!("Invalid file name regex '{}': {}", pattern, e),
                Some("fileNameRegex"),
            );
            TransferFilter::default()
        }
    }
}

/// Copy (download) action configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyConfig {
    #[serde(flatten)]
    pub connection: ConnectionConfig,
    #[serde(default, alias = "srcDirectory", alias = "srcdirectory")]
    pub src_directory: String,
    #[serde(default, alias = "destDirectory", alias = "destdirectory")]
    pub dest_directory: String,
    #[serde(default, alias = "fileNameRegex", alias = "filenameregex")]
    pub file_name_regex: Option<String>,
    #[serde(
        default = "default_extract_zip_files",
        alias = "extractZipFiles",
        alias = "extractzipfiles"
    )]
    pub extract_zip_files: bool,
    #[serde(
        default = "default_file_list_variable",
        alias = "variableNameHoldingFileList",
        alias = "variablenameholdingfilelist"
    )]
    pub variable_name_holding_file_list: String,
}

/// Validated copy request
#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub connection: ConnectionSpec,
    pub src_directory: String,
    pub dest_directory: String,
    pub filter: TransferFilter,
    pub zip_policy: ZipPolicy,
    pub file_list_variable: String,
}

impl CopyConfig {
    pub fn new(connection: ConnectionConfig, src_directory: &str, dest_directory: &str) -> Self {
        Self {
            connection,
            src_directory: src_directory.to_string(),
            dest_directory: dest_directory.to_string(),
            file_name_regex: None,
            extract_zip_files: true,
            variable_name_holding_file_list: DEFAULT_FILE_LIST_VARIABLE.to_string(),
        }
    }

    pub fn resolve(
        &self,
        ctx: &mut ActionContext,
        connect_timeout_seconds: u64,
    ) -> Result<CopyRequest, ActionError> {
        let connection = self.connection.resolve(ctx, connect_timeout_seconds);
        let src_directory = ctx.resolve_field("srcDirectory", &self.src_directory);
        let dest_directory = ctx.resolve_field("destDirectory", &self.dest_directory);
        require_non_empty(ctx, "srcDirectory", &src_directory, "Source directory must be specified");
        require_non_empty(
            ctx,
            "destDirectory",
            &dest_directory,
            "Destination directory must be specified",
        );
        let filter = compile_filter(ctx, self.file_name_regex.as_deref());
        let file_list_variable = ctx.resolve_field(
            "variableNameHoldingFileList",
            &self.variable_name_holding_file_list,
        );
        require_non_empty(
            ctx,
            "variableNameHoldingFileList",
            &file_list_variable,
            "Variable name holding the file list must be specified",
        );

        ctx.get_or_fail()?;
        Ok(CopyRequest {
            connection,
            src_directory,
            dest_directory,
            filter,
            zip_policy: ZipPolicy::new(self.extract_zip_files),
            file_list_variable,
        })
    }
}

/// Put (upload) action configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutConfig {
    #[serde(flatten)]
    pub connection: ConnectionConfig,
    #[serde(default, alias = "srcPath", alias = "srcpath")]
    pub src_path: String,
    #[serde(default, alias = "destDirectory", alias = "destdirectory")]
    pub dest_directory: String,
    #[serde(default, alias = "fileNameRegex", alias = "filenameregex")]
    pub file_name_regex: Option<String>,
}

/// Validated put request
#[derive(Debug, Clone)]
pub struct PutRequest {
    pub connection: ConnectionSpec,
    pub src_path: String,
    pub dest_directory: String,
    pub filter: TransferFilter,
}

impl PutConfig {
    pub fn new(connection: ConnectionConfig, src_path: &str, dest_directory: &str) -> Self {
        Self {
            connection,
            src_path: src_path.to_string(),
            dest_directory: dest_directory.to_string(),
            file_name_regex: None,
        }
    }

    pub fn resolve(
        &self,
        ctx: &mut ActionContext,
        connect_timeout_seconds: u64,
    ) -> Result<PutRequest, ActionError> {
        let connection = self.connection.resolve(ctx, connect_timeout_seconds);
        let src_path = ctx.resolve_field("srcPath", &self.src_path);
        let dest_directory = ctx.resolve_field("destDirectory", &self.dest_directory);
        require_non_empty(ctx, "srcPath", &src_path, "Source path must be specified");
        require_non_empty(
            ctx,
            "destDirectory",
            &dest_directory,
            "Destination directory must be specified",
        );
        let filter = compile_filter(ctx, self.file_name_regex.as_deref());

        ctx.get_or_fail()?;
        Ok(PutRequest {
            connection,
            src_path,
            dest_directory,
            filter,
        })
    }
}

/// Delete action configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteConfig {
    #[serde(flatten)]
    pub connection: ConnectionConfig,
    #[serde(default, alias = "filesToDelete", alias = "filestodelete")]
    pub files_to_delete: String,
    #[serde(default, alias = "continueOnError", alias = "continueonerror")]
    pub continue_on_error: bool,
}

/// Validated delete request
#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub connection: ConnectionSpec,
    pub paths: Vec<String>,
    pub continue_on_error: bool,
}

/// Split a comma-separated path list, trimming and dropping empty items
pub fn split_path_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(str::to_string)
        .collect()
}

impl DeleteConfig {
    pub fn new(connection: ConnectionConfig, files_to_delete: &str, continue_on_error: bool) -> Self {
        Self {
            connection,
            files_to_delete: files_to_delete.to_string(),
            continue_on_error,
        }
    }

    pub fn resolve(
        &self,
        ctx: &mut ActionContext,
        connect_timeout_seconds: u64,
    ) -> Result<DeleteRequest, ActionError> {
        let connection = self.connection.resolve(ctx, connect_timeout_seconds);
        let files = ctx.resolve_field("filesToDelete", &self.files_to_delete);
        let paths = split_path_list(&files);
        if paths.is_empty() {
            ctx.report_failure("Files to delete must be specified", Some("filesToDelete"));
        }

        ctx.get_or_fail()?;
        Ok(DeleteRequest {
            connection,
            paths,
            continue_on_error: self.continue_on_error,
        })
    }
}

// ============================================================================
// Runner settings
// ============================================================================

/// Action selected by the runner, tagged by `type`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActionConfig {
    Copy(CopyConfig),
    Put(PutConfig),
    Delete(DeleteConfig),
}

impl ActionConfig {
    pub fn name(&self) -> &'static str {
        match self {
            ActionConfig::Copy(_) => "copy",
            ActionConfig::Put(_) => "put",
            ActionConfig::Delete(_) => "delete",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_port: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDefaults {
    pub connect_timeout_seconds: u64,
}

impl Default for ConnectionDefaults {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: DEFAULT_CONNECT_TIMEOUT_SECONDS,
        }
    }
}

/// Main runner settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub connection: ConnectionDefaults,
    /// Initial invocation-context variables
    #[serde(default)]
    pub variables: HashMap<String, String>,
    pub action: ActionConfig,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → local → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config", None)
    }

    /// Load from a config directory, optionally adding an explicit file above the directory layers
    pub fn load_from_path<P: AsRef<Path>>(
        config_dir: P,
        explicit_file: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let mut builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Not committed to git
            .add_source(File::from(config_dir.join("local.toml")).required(false));

        if let Some(path) = explicit_file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        config.try_deserialize()
    }

    /// Validate runner-level settings; action fields validate when the action runs
    pub fn validate(&self) -> Result<(), String> {
        if self.observability.log_level.trim().is_empty() {
            return Err("Observability log_level cannot be empty".to_string());
        }
        if self.observability.metrics_port == Some(0) {
            return Err("Metrics port must be greater than 0".to_string());
        }
        if self.connection.connect_timeout_seconds == 0 {
            return Err("Connection connect_timeout_seconds must be greater than 0".to_string());
        }
        Ok(())
    }
}
