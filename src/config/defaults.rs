//! Default values for configuration options.
//!
//! Centralized constants to avoid magic numbers scattered across the codebase.
//! Retry defaults mirror [`RecoveryPolicy::new`](crate::classifier::RecoveryPolicy::new).

use std::path::PathBuf;
use std::time::Duration;

/// Default HTTP request timeout in seconds.
pub const TIMEOUT_SECS: u64 = 30;

/// Default empty-response retry delay in milliseconds.
pub const EMPTY_RESPONSE_DELAY_MS: u64 = 500;

/// Default query-limit retry delay in milliseconds.
pub const QUERY_LIMIT_DELAY_MS: u64 = 1_000;

/// Default operation-time-limit retry delay in milliseconds.
pub const OPERATION_TIME_LIMIT_DELAY_MS: u64 = 5_000;

/// Default attempt ceiling for empty responses and token refreshes.
pub const ATTEMPTS_LIMIT: u32 = 6;

/// Default upper bound on sends per request.
pub const MAX_DISPATCH_ATTEMPTS: u32 = 32;

/// Default commands per batch envelope; also the server maximum.
pub const REQUEST_LIMIT: usize = 50;

/// Default rows per page of list methods.
pub const PAGE_SIZE: usize = 50;

/// File name of the credential store inside the config directory.
pub const STORE_FILE_NAME: &str = "credentials.json";

/// Default HTTP request timeout as Duration.
#[must_use]
pub const fn timeout() -> Duration {
    Duration::from_secs(TIMEOUT_SECS)
}

/// Default credential store location.
///
/// `<config dir>/b24-client/credentials.json`, or a file in the working
/// directory when the platform has no config directory.
#[must_use]
pub fn store_path() -> PathBuf {
    dirs::config_dir().map_or_else(
        || PathBuf::from(STORE_FILE_NAME),
        |dir| dir.join("b24-client").join(STORE_FILE_NAME),
    )
}
