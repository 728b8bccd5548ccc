//! TOML configuration file parsing.
//!
//! Defines the structure of the configuration file with serde.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::ConfigError;

/// Root configuration structure from TOML file.
///
/// All fields are optional to allow partial configuration
/// that can be merged with CLI arguments.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlConfig {
    /// Connection configuration section
    #[serde(default)]
    pub connection: ConnectionSection,

    /// Credential store configuration section
    #[serde(default)]
    pub store: StoreSection,

    /// OAuth application configuration section
    #[serde(default)]
    pub oauth: OAuthSection,

    /// Error recovery configuration
    #[serde(default)]
    pub retry: RetrySection,

    /// Batch configuration
    #[serde(default)]
    pub batch: BatchSection,
}

/// Connection configuration section.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionSection {
    /// Authentication mode: "webhook" or "token"
    pub auth: Option<String>,

    /// Inbound webhook URL
    pub webhook_url: Option<String>,

    /// Member id of an installed application
    pub member_id: Option<String>,

    /// HTTP request timeout in seconds
    pub timeout: Option<u64>,
}

/// Credential store configuration section.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    /// Path to the credential store file
    pub path: Option<PathBuf>,
}

/// OAuth application configuration section.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OAuthSection {
    /// Token endpoint URL
    pub token_url: Option<String>,

    /// Application client id
    pub client_id: Option<String>,

    /// Application client secret
    pub client_secret: Option<String>,
}

/// Error recovery configuration section.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySection {
    /// Retry empty responses
    pub empty_response: Option<bool>,

    /// Delay before resending after an empty response, in milliseconds
    pub empty_response_delay_ms: Option<u64>,

    /// Retry `QUERY_LIMIT_EXCEEDED` responses
    pub query_limit: Option<bool>,

    /// Delay before resending after `QUERY_LIMIT_EXCEEDED`, in milliseconds
    pub query_limit_delay_ms: Option<u64>,

    /// Retry `OPERATION_TIME_LIMIT` responses
    pub operation_time_limit: Option<bool>,

    /// Delay before resending after `OPERATION_TIME_LIMIT`, in milliseconds
    pub operation_time_limit_delay_ms: Option<u64>,

    /// Attempt ceiling for empty responses and token refreshes
    pub attempts_limit: Option<u32>,

    /// Retry counter lifetime: "per-call" or "per-client"
    pub budget_scope: Option<String>,

    /// Upper bound on sends per request
    pub max_dispatch_attempts: Option<u32>,
}

/// Batch configuration section.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchSection {
    /// Commands per batch envelope
    pub request_limit: Option<usize>,

    /// Rows per page of list methods
    pub page_size: Option<usize>,
}

impl TomlConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::from)
    }
}

/// Generates a default configuration file with comments.
#[must_use]
pub fn default_config_template() -> String {
    r#"# b24-client Configuration File

[connection]
# Authentication mode: "webhook" or "token"
# Inferred when omitted: webhook_url selects webhook, member_id selects token
# auth = "webhook"

# Inbound webhook URL (webhook mode)
# webhook_url = "https://example.bitrix24.com/rest/1/your-secret/"

# Member id of an installed application (token mode, see `b24-client install`)
# member_id = "your-member-id"

# HTTP request timeout in seconds (default: 30)
timeout = 30

[store]
# Credential store file (default: <config dir>/b24-client/credentials.json)
# "~" expands to the home directory
# path = "~/.config/b24-client/credentials.json"

[oauth]
# Token endpoint used to refresh expired access tokens
# token_url = "https://oauth.bitrix.info/oauth/token/"

# Application credentials (required by `b24-client install`)
# client_id = "local.0000000000000.00000000"
# client_secret = "your-client-secret"

[retry]
# Resend after an empty response (default: true, 500 ms)
empty_response = true
# empty_response_delay_ms = 500

# Resend after QUERY_LIMIT_EXCEEDED (default: true, 1000 ms)
query_limit = true
# query_limit_delay_ms = 1000

# Resend after OPERATION_TIME_LIMIT (default: true, 5000 ms)
operation_time_limit = true
# operation_time_limit_delay_ms = 5000

# Attempt ceiling for empty responses and token refreshes (default: 6)
# attempts_limit = 6

# Retry counter lifetime: "per-call" or "per-client" (default: per-call)
# budget_scope = "per-call"

# Upper bound on sends per request (default: 32)
# max_dispatch_attempts = 32

[batch]
# Commands per batch envelope, at most 50 (default: 50)
# request_limit = 50

# Rows per page of list methods (default: 50)
# page_size = 50
"#
    .to_string()
}
