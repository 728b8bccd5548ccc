//! Validated configuration after merging CLI and TOML sources.
//!
//! This module contains the final, validated configuration that is used
//! by the application. All validation is performed during construction.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use crate::classifier::{BudgetScope, RecoveryPolicy};
use crate::credential::Webhook;

use super::cli::{AuthArg, Cli, Command};
use super::defaults;
use super::error::{ConfigError, field};
use super::toml::TomlConfig;

/// Where REST calls are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    /// Inbound webhook.
    Webhook(Webhook),
    /// Stored token credential of a member.
    Member(String),
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // The webhook path embeds its secret; show the host only.
            Self::Webhook(webhook) => {
                let host = webhook
                    .endpoint()
                    .and_then(|url| url.host_str().map(str::to_string))
                    .unwrap_or_default();
                write!(f, "webhook@{host}")
            }
            Self::Member(member_id) => write!(f, "member {member_id}"),
        }
    }
}

/// Fully validated configuration ready for use by the application.
///
/// This struct represents a complete, validated configuration where all
/// required fields are present and all values have been validated.
///
/// # Construction
///
/// Use [`ValidatedConfig::from_raw`] to create from CLI args and optional TOML config.
/// The function validates all inputs and returns errors for invalid configurations.
#[derive(Debug)]
pub struct ValidatedConfig {
    /// Connection to use. Always set for commands that call the API.
    pub connection: Option<ConnectionTarget>,

    /// Credential store file
    pub store_path: PathBuf,

    /// OAuth token endpoint override
    pub token_url: Option<Url>,

    /// Application client id
    pub client_id: Option<String>,

    /// Application client secret
    pub client_secret: Option<String>,

    /// Error recovery rules
    pub policy: RecoveryPolicy,

    /// Commands per batch envelope
    pub request_limit: usize,

    /// Rows per page of list methods
    pub page_size: usize,

    /// HTTP request timeout
    pub timeout: Duration,

    /// Verbose logging enabled
    pub verbose: bool,
}

impl fmt::Display for ValidatedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let connection = self
            .connection
            .as_ref()
            .map_or_else(|| "none".to_string(), ToString::to_string);
        let scope = match self.policy.budget_scope {
            BudgetScope::PerCall => "per-call",
            BudgetScope::PerClient => "per-client",
        };

        write!(
            f,
            "Config {{ connection: {}, store: {}, attempts_limit: {}, budget_scope: {}, \
             max_dispatch_attempts: {}, request_limit: {}, page_size: {}, timeout: {}s }}",
            connection,
            self.store_path.display(),
            self.policy.attempts_limit,
            scope,
            self.policy.max_dispatch_attempts,
            self.request_limit,
            self.page_size,
            self.timeout.as_secs(),
        )
    }
}

impl ValidatedConfig {
    /// Creates a validated configuration from CLI arguments and optional TOML config.
    ///
    /// CLI arguments take precedence over TOML config values.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The command needs a connection and none is configured
    /// - `install` lacks the member id or application credentials
    /// - A URL is invalid
    /// - Retry or batch limits are out of range
    /// - The timeout is zero
    pub fn from_raw(cli: &Cli, toml: Option<&TomlConfig>) -> Result<Self, ConfigError> {
        let connection = Self::resolve_connection(cli, toml)?;

        let client_id = cli
            .client_id
            .clone()
            .or_else(|| toml.and_then(|t| t.oauth.client_id.clone()));
        let client_secret = cli
            .client_secret
            .clone()
            .or_else(|| toml.and_then(|t| t.oauth.client_secret.clone()));

        if matches!(cli.command, Command::Install { .. }) {
            if client_id.as_deref().is_none_or(str::is_empty) {
                return Err(ConfigError::missing(
                    field::CLIENT_ID,
                    "Use --client-id or set oauth.client_id in config file",
                ));
            }
            if client_secret.as_deref().is_none_or(str::is_empty) {
                return Err(ConfigError::missing(
                    field::CLIENT_SECRET,
                    "Use --client-secret or set oauth.client_secret in config file",
                ));
            }
        }

        let (request_limit, page_size) = Self::resolve_batch(cli, toml)?;

        Ok(Self {
            connection,
            store_path: Self::resolve_store_path(cli, toml),
            token_url: Self::resolve_token_url(cli, toml)?,
            client_id,
            client_secret,
            policy: Self::build_policy(cli, toml)?,
            request_limit,
            page_size,
            timeout: Self::resolve_timeout(cli, toml)?,
            verbose: cli.verbose,
        })
    }

    /// Loads and merges configuration from CLI and optional config file.
    ///
    /// If `cli.config` is set, loads the TOML file from that path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The config file cannot be read or parsed
    /// - The merged configuration is invalid
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let toml = if let Some(ref path) = cli.config {
            Some(TomlConfig::load(path)?)
        } else {
            None
        };

        Self::from_raw(cli, toml.as_ref())
    }

    fn resolve_connection(
        cli: &Cli,
        toml: Option<&TomlConfig>,
    ) -> Result<Option<ConnectionTarget>, ConfigError> {
        let section = toml.map(|t| &t.connection);
        let webhook_url = cli
            .webhook
            .as_deref()
            .or_else(|| section.and_then(|s| s.webhook_url.as_deref()));
        let member_id = cli
            .member_id
            .as_deref()
            .or_else(|| section.and_then(|s| s.member_id.as_deref()))
            .filter(|id| !id.trim().is_empty());

        // install registers a member; the configured auth mode is irrelevant
        if matches!(cli.command, Command::Install { .. }) {
            let member_id = member_id.ok_or_else(|| {
                ConfigError::missing(
                    field::MEMBER_ID,
                    "Use --member-id or set connection.member_id in config file",
                )
            })?;
            return Ok(Some(ConnectionTarget::Member(member_id.to_string())));
        }

        let auth = match cli.auth {
            Some(auth) => Some(auth),
            None => section
                .and_then(|s| s.auth.as_deref())
                .map(parse_auth)
                .transpose()?,
        };

        // Explicit mode > webhook URL > member id
        let auth = auth.or_else(|| {
            if webhook_url.is_some() {
                Some(AuthArg::Webhook)
            } else if member_id.is_some() {
                Some(AuthArg::Token)
            } else {
                None
            }
        });

        let target = match auth {
            Some(AuthArg::Webhook) => {
                let url = webhook_url.ok_or_else(|| {
                    ConfigError::missing(
                        field::WEBHOOK_URL,
                        "Use --webhook or set connection.webhook_url in config file",
                    )
                })?;
                Some(ConnectionTarget::Webhook(parse_webhook(url)?))
            }
            Some(AuthArg::Token) => {
                let member_id = member_id.ok_or_else(|| {
                    ConfigError::missing(
                        field::MEMBER_ID,
                        "Use --member-id or set connection.member_id in config file",
                    )
                })?;
                Some(ConnectionTarget::Member(member_id.to_string()))
            }
            None => None,
        };

        if target.is_none() && cli.command.needs_connection() {
            return Err(ConfigError::missing(
                field::CONNECTION,
                "Use --webhook or --member-id, or set them in the [connection] section",
            ));
        }

        Ok(target)
    }

    fn resolve_store_path(cli: &Cli, toml: Option<&TomlConfig>) -> PathBuf {
        cli.store
            .clone()
            .or_else(|| toml.and_then(|t| t.store.path.clone()))
            .map_or_else(defaults::store_path, |path| expand_tilde(&path))
    }

    fn resolve_token_url(cli: &Cli, toml: Option<&TomlConfig>) -> Result<Option<Url>, ConfigError> {
        let Some(url_str) = cli
            .token_url
            .as_deref()
            .or_else(|| toml.and_then(|t| t.oauth.token_url.as_deref()))
        else {
            return Ok(None);
        };

        let url = Url::parse(url_str).map_err(|e| ConfigError::InvalidUrl {
            url: url_str.to_string(),
            reason: e.to_string(),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl {
                url: url_str.to_string(),
                reason: "scheme must be http or https".to_string(),
            });
        }

        Ok(Some(url))
    }

    fn build_policy(cli: &Cli, toml: Option<&TomlConfig>) -> Result<RecoveryPolicy, ConfigError> {
        let retry = toml.map(|t| &t.retry);

        // Priority: CLI explicit > TOML > default
        let attempts_limit = cli
            .attempts_limit
            .or_else(|| retry.and_then(|r| r.attempts_limit))
            .unwrap_or(defaults::ATTEMPTS_LIMIT);

        let max_dispatch_attempts = cli
            .max_dispatch_attempts
            .or_else(|| retry.and_then(|r| r.max_dispatch_attempts))
            .unwrap_or(defaults::MAX_DISPATCH_ATTEMPTS);

        let budget_scope = match cli.budget_scope {
            Some(scope) => scope.into(),
            None => retry
                .and_then(|r| r.budget_scope.as_deref())
                .map(parse_budget_scope)
                .transpose()?
                .unwrap_or_default(),
        };

        if attempts_limit < RecoveryPolicy::MIN_ATTEMPTS {
            return Err(ConfigError::InvalidRetry(
                "attempts_limit must be greater than 0".to_string(),
            ));
        }

        if max_dispatch_attempts < RecoveryPolicy::MIN_ATTEMPTS {
            return Err(ConfigError::InvalidRetry(
                "max_dispatch_attempts must be greater than 0".to_string(),
            ));
        }

        // Handler toggles and delays are TOML-only
        let rule = |enabled: Option<bool>, delay_ms: Option<u64>, default_ms: u64| {
            (
                enabled.unwrap_or(true),
                Duration::from_millis(delay_ms.unwrap_or(default_ms)),
            )
        };
        let (empty_on, empty_delay) = rule(
            retry.and_then(|r| r.empty_response),
            retry.and_then(|r| r.empty_response_delay_ms),
            defaults::EMPTY_RESPONSE_DELAY_MS,
        );
        let (query_on, query_delay) = rule(
            retry.and_then(|r| r.query_limit),
            retry.and_then(|r| r.query_limit_delay_ms),
            defaults::QUERY_LIMIT_DELAY_MS,
        );
        let (time_on, time_delay) = rule(
            retry.and_then(|r| r.operation_time_limit),
            retry.and_then(|r| r.operation_time_limit_delay_ms),
            defaults::OPERATION_TIME_LIMIT_DELAY_MS,
        );

        Ok(RecoveryPolicy::new()
            .with_empty_response(empty_on, empty_delay)
            .with_query_limit(query_on, query_delay)
            .with_operation_time_limit(time_on, time_delay)
            .with_attempts_limit(attempts_limit)
            .with_budget_scope(budget_scope)
            .with_max_dispatch_attempts(max_dispatch_attempts))
    }

    fn resolve_batch(cli: &Cli, toml: Option<&TomlConfig>) -> Result<(usize, usize), ConfigError> {
        let batch = toml.map(|t| &t.batch);

        let request_limit = cli
            .request_limit
            .or_else(|| batch.and_then(|b| b.request_limit))
            .unwrap_or(defaults::REQUEST_LIMIT);

        let page_size = cli
            .page_size
            .or_else(|| batch.and_then(|b| b.page_size))
            .unwrap_or(defaults::PAGE_SIZE);

        if request_limit == 0 || request_limit > defaults::REQUEST_LIMIT {
            return Err(ConfigError::InvalidBatch(format!(
                "request_limit must be between 1 and {}, got {request_limit}",
                defaults::REQUEST_LIMIT
            )));
        }

        if page_size == 0 {
            return Err(ConfigError::InvalidBatch(
                "page_size must be greater than 0".to_string(),
            ));
        }

        Ok((request_limit, page_size))
    }

    fn resolve_timeout(cli: &Cli, toml: Option<&TomlConfig>) -> Result<Duration, ConfigError> {
        // Priority: CLI explicit > TOML > default
        let seconds = cli
            .timeout
            .or_else(|| toml.and_then(|t| t.connection.timeout))
            .unwrap_or(defaults::TIMEOUT_SECS);

        if seconds == 0 {
            return Err(ConfigError::InvalidDuration {
                field: "timeout",
                reason: "must be greater than 0".to_string(),
            });
        }

        Ok(Duration::from_secs(seconds))
    }
}

/// Writes the default configuration template to a file.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_default_config(path: &Path) -> Result<(), ConfigError> {
    let template = super::toml::default_config_template();
    std::fs::write(path, template).map_err(|e| ConfigError::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })
}

// Helper functions

fn parse_auth(s: &str) -> Result<AuthArg, ConfigError> {
    match s.to_lowercase().as_str() {
        "webhook" => Ok(AuthArg::Webhook),
        "token" | "oauth" => Ok(AuthArg::Token),
        _ => Err(ConfigError::InvalidAuth {
            value: s.to_string(),
        }),
    }
}

fn parse_budget_scope(s: &str) -> Result<BudgetScope, ConfigError> {
    match s.to_lowercase().replace('_', "-").as_str() {
        "per-call" => Ok(BudgetScope::PerCall),
        "per-client" => Ok(BudgetScope::PerClient),
        _ => Err(ConfigError::InvalidBudgetScope {
            value: s.to_string(),
        }),
    }
}

fn parse_webhook(url: &str) -> Result<Webhook, ConfigError> {
    let webhook = Webhook::new(url);
    if webhook.endpoint().is_none() {
        return Err(ConfigError::InvalidUrl {
            url: url.to_string(),
            reason: "expected an absolute http(s) URL with a host".to_string(),
        });
    }
    Ok(webhook)
}

/// Expands a leading `~` to the home directory.
///
/// Paths without one, and all paths on systems without a home
/// directory, are returned unchanged.
fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    dirs::home_dir().map_or_else(|| path.to_path_buf(), |home| home.join(rest))
}
