//! CLI argument parsing using clap.
//!
//! Defines the command-line interface with all options and subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::classifier::BudgetScope;

/// b24-client: Bitrix24 REST API client
///
/// Calls REST methods through an inbound webhook or on behalf of an
/// installed application, retrying transient errors and refreshing
/// expired tokens.
#[derive(Debug, Parser)]
#[command(name = "b24-client")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Authentication mode (inferred from the other options when omitted)
    #[arg(long, value_enum, global = true)]
    pub auth: Option<AuthArg>,

    /// Inbound webhook URL, e.g. `https://example.bitrix24.com/rest/1/secret/`
    #[arg(long, global = true)]
    pub webhook: Option<String>,

    /// Member id of an installed application
    #[arg(long = "member-id", global = true)]
    pub member_id: Option<String>,

    /// Path to the credential store file
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// OAuth token endpoint used to refresh expired tokens
    #[arg(long = "token-url", global = true)]
    pub token_url: Option<String>,

    /// Application client id
    #[arg(long = "client-id", global = true)]
    pub client_id: Option<String>,

    /// Application client secret
    #[arg(long = "client-secret", global = true)]
    pub client_secret: Option<String>,

    /// Attempt ceiling for empty-response retries and token refreshes
    #[arg(long = "attempts-limit", global = true)]
    pub attempts_limit: Option<u32>,

    /// Upper bound on sends per request
    #[arg(long = "max-dispatch-attempts", global = true)]
    pub max_dispatch_attempts: Option<u32>,

    /// Lifetime of the retry counters
    #[arg(long = "budget-scope", value_enum, global = true)]
    pub budget_scope: Option<BudgetScopeArg>,

    /// Commands per batch envelope
    #[arg(long = "request-limit", global = true)]
    pub request_limit: Option<usize>,

    /// Rows per page of list methods
    #[arg(long = "page-size", global = true)]
    pub page_size: Option<usize>,

    /// HTTP request timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Enable verbose logging
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

/// Subcommands for b24-client
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a default configuration file
    Init {
        /// Output path for the configuration file
        #[arg(long, short, default_value = "b24-client.toml")]
        output: PathBuf,
    },

    /// Call a single REST method
    Call {
        /// Method name, e.g. `crm.deal.get`
        method: String,

        /// Method parameters as a JSON object
        #[arg(long, short)]
        params: Option<String>,
    },

    /// Call several methods in batch envelopes
    Batch {
        /// JSON array of `{"method": ..., "params": {...}}` objects
        queries: String,
    },

    /// Fetch every row of a list method
    GetAll {
        /// List method name, e.g. `crm.deal.list`
        method: String,

        /// Method parameters as a JSON object
        #[arg(long, short)]
        params: Option<String>,
    },

    /// Register an application installation in the credential store
    Install {
        /// Portal domain, e.g. `example.bitrix24.com`
        #[arg(long)]
        domain: String,

        /// Access token handed over by the portal
        #[arg(long = "access-token")]
        access_token: String,

        /// Refresh token handed over by the portal
        #[arg(long = "refresh-token")]
        refresh_token: String,

        /// Access token lifetime in seconds
        #[arg(long = "expires-in")]
        expires_in: Option<u64>,
    },
}

impl Command {
    /// Returns true if the command talks to the REST API through an
    /// existing connection.
    #[must_use]
    pub const fn needs_connection(&self) -> bool {
        matches!(
            self,
            Self::Call { .. } | Self::Batch { .. } | Self::GetAll { .. }
        )
    }
}

/// Authentication mode argument for CLI parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthArg {
    /// Inbound webhook URL
    Webhook,
    /// Stored OAuth token pair of an installed application
    Token,
}

/// Retry counter lifetime argument for CLI parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BudgetScopeArg {
    /// Counters start over with every request
    #[value(name = "per-call")]
    PerCall,
    /// Counters live as long as the connection
    #[value(name = "per-client")]
    PerClient,
}

impl From<BudgetScopeArg> for BudgetScope {
    fn from(arg: BudgetScopeArg) -> Self {
        match arg {
            BudgetScopeArg::PerCall => Self::PerCall,
            BudgetScopeArg::PerClient => Self::PerClient,
        }
    }
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Parses CLI arguments from an iterator (useful for testing).
    pub fn parse_from_iter<I, T>(iter: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::parse_from(iter)
    }

    /// Parses CLI arguments from an iterator, returning clap's error
    /// instead of exiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments do not match the interface.
    pub fn try_parse_from_iter<I, T>(iter: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::try_parse_from(iter)
    }

    /// Returns true if this is the init command.
    #[must_use]
    pub const fn is_init(&self) -> bool {
        matches!(self.command, Command::Init { .. })
    }
}
