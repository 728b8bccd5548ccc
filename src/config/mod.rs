//! Configuration layer for the `b24-client` binary.
//!
//! This module provides:
//! - CLI argument parsing ([`Cli`], [`Command`])
//! - TOML configuration file parsing ([`TomlConfig`])
//! - Validated configuration ([`ValidatedConfig`])
//! - Configuration file generation ([`write_default_config`])
//! - Default values ([`defaults`])
//!
//! # Priority
//!
//! Configuration values are resolved with the following priority (highest to lowest):
//!
//! 1. **Explicit CLI arguments** - Values explicitly passed via command line
//! 2. **TOML config file** - Values from the configuration file
//! 3. **Built-in defaults** - Hardcoded default values
//!
//! # Connection
//!
//! `call`, `batch` and `get-all` need a connection. The auth mode comes from
//! `--auth` or `connection.auth`; when neither is set it is inferred: a
//! webhook URL selects webhook mode, otherwise a member id selects token
//! mode. `install` always targets the member id and ignores the auth mode.
//!
//! # CLI-Only vs TOML-Only Options
//!
//! The per-rule retry toggles and delays are TOML-only:
//! - `retry.empty_response` / `retry.empty_response_delay_ms`
//! - `retry.query_limit` / `retry.query_limit_delay_ms`
//! - `retry.operation_time_limit` / `retry.operation_time_limit_delay_ms`
//!
//! Attempt ceilings and the budget scope are available on both.

mod cli;
pub mod defaults;
mod error;
mod toml;
mod validated;

#[cfg(test)]
mod validated_tests;

pub use cli::{AuthArg, BudgetScopeArg, Cli, Command};
pub use error::{ConfigError, field};
pub use toml::{TomlConfig, default_config_template};
pub use validated::{ConnectionTarget, ValidatedConfig, write_default_config};
