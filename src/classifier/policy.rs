//! Recovery policy configuration for the error classifier.

use std::time::Duration;

/// How long retry budgets live.
///
/// Handlers that cap their attempts (empty response, token refresh)
/// count against a ledger. With [`BudgetScope::PerCall`] every logical
/// request starts from zero; with [`BudgetScope::PerClient`] one ledger
/// is shared by every request made through the same client, so the cap
/// also acts as a lifetime limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BudgetScope {
    /// Fresh budget for every call.
    #[default]
    PerCall,
    /// One budget for the lifetime of the client.
    PerClient,
}

/// Settings of a sleep-and-retry rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryRule {
    /// Retry at all; when `false` the rule raises its error immediately.
    pub enabled: bool,
    /// Pause before resending.
    pub delay: Duration,
}

impl RetryRule {
    /// Enabled rule with the given delay.
    #[must_use]
    pub const fn enabled(delay: Duration) -> Self {
        Self {
            enabled: true,
            delay,
        }
    }

    /// Rule that never retries.
    #[must_use]
    pub const fn disabled(delay: Duration) -> Self {
        Self {
            enabled: false,
            delay,
        }
    }
}

/// Configuration of the response recovery pipeline.
///
/// # Defaults
///
/// - `empty_response`: enabled, 500 ms
/// - `query_limit`: enabled, 1 s
/// - `operation_time_limit`: enabled, 5 s
/// - `attempts_limit`: 6 (empty responses and token refreshes)
/// - `budget_scope`: [`BudgetScope::PerCall`]
/// - `max_dispatch_attempts`: 32
///
/// # Example
///
/// ```
/// use b24_client::classifier::{BudgetScope, RecoveryPolicy};
/// use std::time::Duration;
///
/// let policy = RecoveryPolicy::new()
///     .with_query_limit(false, Duration::from_secs(1))
///     .with_attempts_limit(3)
///     .with_budget_scope(BudgetScope::PerClient);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// Empty-body rule.
    pub empty_response: RetryRule,

    /// `QUERY_LIMIT_EXCEEDED` rule.
    pub query_limit: RetryRule,

    /// `OPERATION_TIME_LIMIT` rule.
    pub operation_time_limit: RetryRule,

    /// Attempt ceiling shared by the empty-response and token-refresh rules.
    ///
    /// The attempt that reaches the ceiling raises instead of retrying.
    pub attempts_limit: u32,

    /// Lifetime of the attempt counters.
    pub budget_scope: BudgetScope,

    /// Upper bound on sends per logical request, whatever the handlers say.
    pub max_dispatch_attempts: u32,
}

impl RecoveryPolicy {
    /// Default empty-response delay (500 ms).
    pub const DEFAULT_EMPTY_RESPONSE_DELAY: Duration = Duration::from_millis(500);

    /// Default query-limit delay (1 second).
    pub const DEFAULT_QUERY_LIMIT_DELAY: Duration = Duration::from_secs(1);

    /// Default operation-time-limit delay (5 seconds).
    pub const DEFAULT_OPERATION_TIME_LIMIT_DELAY: Duration = Duration::from_secs(5);

    /// Default attempt ceiling.
    pub const DEFAULT_ATTEMPTS_LIMIT: u32 = 6;

    /// Default dispatcher ceiling.
    pub const DEFAULT_MAX_DISPATCH_ATTEMPTS: u32 = 32;

    /// Minimum value for `attempts_limit` and `max_dispatch_attempts`.
    pub const MIN_ATTEMPTS: u32 = 1;

    /// Creates a policy with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            empty_response: RetryRule::enabled(Self::DEFAULT_EMPTY_RESPONSE_DELAY),
            query_limit: RetryRule::enabled(Self::DEFAULT_QUERY_LIMIT_DELAY),
            operation_time_limit: RetryRule::enabled(Self::DEFAULT_OPERATION_TIME_LIMIT_DELAY),
            attempts_limit: Self::DEFAULT_ATTEMPTS_LIMIT,
            budget_scope: BudgetScope::PerCall,
            max_dispatch_attempts: Self::DEFAULT_MAX_DISPATCH_ATTEMPTS,
        }
    }

    /// Configures the empty-response rule.
    #[must_use]
    pub const fn with_empty_response(mut self, enabled: bool, delay: Duration) -> Self {
        self.empty_response = RetryRule { enabled, delay };
        self
    }

    /// Configures the query-limit rule.
    #[must_use]
    pub const fn with_query_limit(mut self, enabled: bool, delay: Duration) -> Self {
        self.query_limit = RetryRule { enabled, delay };
        self
    }

    /// Configures the operation-time-limit rule.
    #[must_use]
    pub const fn with_operation_time_limit(mut self, enabled: bool, delay: Duration) -> Self {
        self.operation_time_limit = RetryRule { enabled, delay };
        self
    }

    /// Sets the attempt ceiling.
    ///
    /// # Panics
    ///
    /// Panics if `limit` is less than 1.
    #[must_use]
    pub const fn with_attempts_limit(mut self, limit: u32) -> Self {
        assert!(limit >= Self::MIN_ATTEMPTS, "attempts_limit must be at least 1");
        self.attempts_limit = limit;
        self
    }

    /// Sets the budget scope.
    #[must_use]
    pub const fn with_budget_scope(mut self, scope: BudgetScope) -> Self {
        self.budget_scope = scope;
        self
    }

    /// Sets the dispatcher ceiling.
    ///
    /// # Panics
    ///
    /// Panics if `limit` is less than 1.
    #[must_use]
    pub const fn with_max_dispatch_attempts(mut self, limit: u32) -> Self {
        assert!(
            limit >= Self::MIN_ATTEMPTS,
            "max_dispatch_attempts must be at least 1"
        );
        self.max_dispatch_attempts = limit;
        self
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::new()
    }
}
