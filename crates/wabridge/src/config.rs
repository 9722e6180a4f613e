use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub instance: InstanceConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Self::parse(&contents)
    }

    /// Parse config from YAML text, expanding environment variables first.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        if expanded.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_saphyr::from_str(&expanded)?)
    }
}

/// Resolve a path relative to the config file directory.
///
/// Absolute paths are returned as-is.
pub fn resolve_path(config_path: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }

    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    config_dir.join(path)
}

// ============================================================================
// Defaults
// ============================================================================

/// Default config file name.
pub const DEFAULT_CONFIG_FILE: &str = "wabridge.yaml";
/// Default credential directory handed to the session sidecar (relative to config file).
pub const DEFAULT_AUTH_DIR: &str = ".wabridge/auth";
/// Default sidecar command.
pub const DEFAULT_SESSION_COMMAND: &str = "wabridge-session";

fn default_instance_name() -> String {
    "default".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    60
}

fn default_session_command() -> String {
    DEFAULT_SESSION_COMMAND.to_string()
}

fn default_auth_dir() -> PathBuf {
    PathBuf::from(DEFAULT_AUTH_DIR)
}

fn default_send_timeout() -> u64 {
    30
}

fn default_reconnect_delay() -> u64 {
    3
}

fn default_connect_error_delay() -> u64 {
    5
}

fn default_max_reconnect_delay() -> u64 {
    60
}

fn default_webhook_timeout() -> u64 {
    10
}

/// Serde default for bool fields that should be `true` (serde's default is `false`).
fn default_true() -> bool {
    true
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports the following syntax (shell-compatible):
/// - `${VAR}` - Required variable, errors if not set
/// - `${VAR:-default}` - Optional variable with default value
/// - `${VAR:-}` - Optional variable, empty string if not set
/// - `$$` - Escaped `$` (only needed before `{` to prevent expansion)
///
/// Nested expansion (`${VAR:-${OTHER}}`) is not supported.
///
/// ```yaml
/// instance:
///   api_key: ${WABRIDGE_API_KEY}
/// server:
///   port: ${PORT:-8080}
/// webhook:
///   url: ${WEBHOOK_URL:-}
/// ```
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                result.push('$');
            }
            Some('{') => {
                chars.next();
                let expanded = parse_var_reference(&mut chars)?;
                result.push_str(&expanded);
            }
            _ => result.push('$'),
        }
    }

    Ok(result)
}

/// Parse a variable reference after seeing `${`.
fn parse_var_reference(
    chars: &mut std::iter::Peekable<std::str::Chars>,
) -> Result<String, ConfigError> {
    let mut var_name = String::new();
    let mut default_value: Option<String> = None;
    let mut found_closing_brace = false;

    while let Some(c) = chars.next() {
        match (c, default_value.as_mut()) {
            ('}', _) => {
                found_closing_brace = true;
                break;
            }
            (':', None) if chars.peek() == Some(&'-') => {
                chars.next();
                default_value = Some(String::new());
            }
            (c, Some(default)) => default.push(c),
            (c, None) => var_name.push(c),
        }
    }

    if !found_closing_brace {
        return Err(ConfigError::UnclosedVarReference);
    }

    match std::env::var(&var_name) {
        Ok(value) => Ok(value),
        Err(_) => default_value.ok_or(ConfigError::MissingEnvVar(var_name)),
    }
}

// ============================================================================
// InstanceConfig
// ============================================================================

/// Identity of this bridge instance as seen by API clients and webhook receivers.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    #[serde(default = "default_instance_name")]
    pub name: String,
    /// Shared secret for authenticated endpoints. If unset, only loopback
    /// clients are accepted.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Public URL of this server, echoed in webhook payloads.
    #[serde(default)]
    pub server_url: Option<String>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            name: default_instance_name(),
            api_key: None,
            server_url: None,
        }
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl ServerConfig {
    /// URL this server is reachable at from the local machine.
    pub fn local_url(&self) -> String {
        let host = match self.host.as_str() {
            "0.0.0.0" | "::" => "127.0.0.1",
            other => other,
        };
        format!("http://{}:{}", host, self.port)
    }
}

// ============================================================================
// SessionConfig
// ============================================================================

/// Configuration for the WhatsApp session sidecar and the connection lifecycle.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Command to execute (path to the sidecar binary or script).
    #[serde(default = "default_session_command")]
    pub command: String,

    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables to set.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Directory where the sidecar persists credentials.
    #[serde(default = "default_auth_dir")]
    pub auth_dir: PathBuf,

    /// Connect as soon as the server starts.
    #[serde(default = "default_true")]
    pub connect_on_start: bool,

    /// Print pairing codes to the terminal as QR codes.
    #[serde(default = "default_true")]
    pub print_qr: bool,

    /// How long to wait for the sidecar to acknowledge a sent message.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_seconds: u64,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command: default_session_command(),
            args: Vec::new(),
            env: HashMap::new(),
            auth_dir: default_auth_dir(),
            connect_on_start: true,
            print_qr: true,
            send_timeout_seconds: default_send_timeout(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_seconds)
    }
}

/// Reconnection timing after a non-terminal closure.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default)]
    pub strategy: ReconnectStrategy,
    /// Delay after the connection closed.
    #[serde(default = "default_reconnect_delay")]
    pub delay_seconds: u64,
    /// Delay after a connect attempt failed outright.
    #[serde(default = "default_connect_error_delay")]
    pub connect_error_delay_seconds: u64,
    /// Upper bound for the exponential strategy.
    #[serde(default = "default_max_reconnect_delay")]
    pub max_delay_seconds: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            strategy: ReconnectStrategy::default(),
            delay_seconds: default_reconnect_delay(),
            connect_error_delay_seconds: default_connect_error_delay(),
            max_delay_seconds: default_max_reconnect_delay(),
        }
    }
}

/// Reconnect delay strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectStrategy {
    /// Same delay every time.
    #[default]
    Fixed,
    /// Double the delay after each consecutive failure, up to `max_delay_seconds`.
    Exponential,
}

// ============================================================================
// WebhookConfig
// ============================================================================

/// Initial webhook target. Can be replaced at runtime via the API.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_seconds: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            enabled: true,
            timeout_seconds: default_webhook_timeout(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
