//! Built-in classification rules.

use super::{AttemptLedger, ErrorContext, ErrorHandler, RetryDecision, RetryRule};
use crate::error::{ApiError, RefreshTokenError};

/// Resends when the API answers with an empty body.
#[derive(Debug, Clone, Copy)]
pub struct EmptyResponseHandler {
    rule: RetryRule,
    limit: u32,
}

impl EmptyResponseHandler {
    /// Ledger key.
    pub const NAME: &'static str = "empty_response";

    /// Creates the rule; the attempt reaching `limit` fails.
    #[must_use]
    pub const fn new(rule: RetryRule, limit: u32) -> Self {
        Self { rule, limit }
    }
}

impl ErrorHandler for EmptyResponseHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn can_handle(&self, ctx: &ErrorContext<'_>) -> bool {
        ctx.response.is_empty()
    }

    fn handle(
        &self,
        _ctx: &ErrorContext<'_>,
        ledger: &AttemptLedger,
    ) -> Result<RetryDecision, ApiError> {
        let attempts = ledger.record(Self::NAME);
        if !self.rule.enabled || attempts >= self.limit {
            return Err(ApiError::EmptyResponse);
        }
        Ok(RetryDecision::Retry {
            delay: self.rule.delay,
        })
    }
}

/// Refreshes the access token on `expired_token`.
#[derive(Debug, Clone, Copy)]
pub struct ExpiredTokenHandler {
    limit: u32,
}

impl ExpiredTokenHandler {
    /// Ledger key.
    pub const NAME: &'static str = "refresh_token";

    /// Error code sent by the API.
    pub const ERROR_CODE: &'static str = "expired_token";

    /// Creates the rule; the refresh attempt reaching `limit` fails.
    #[must_use]
    pub const fn new(limit: u32) -> Self {
        Self { limit }
    }
}

impl ErrorHandler for ExpiredTokenHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn can_handle(&self, ctx: &ErrorContext<'_>) -> bool {
        ctx.error_code() == Some(Self::ERROR_CODE)
    }

    fn handle(
        &self,
        ctx: &ErrorContext<'_>,
        ledger: &AttemptLedger,
    ) -> Result<RetryDecision, ApiError> {
        if ctx.credential.is_none() {
            return Err(RefreshTokenError::MissingCredential.into());
        }
        let attempts = ledger.record(Self::NAME);
        if attempts >= self.limit {
            return Err(RefreshTokenError::AttemptLimitExceeded { limit: self.limit }.into());
        }
        Ok(RetryDecision::RefreshThenRetry)
    }
}

/// Waits and resends on `QUERY_LIMIT_EXCEEDED`.
#[derive(Debug, Clone, Copy)]
pub struct QueryLimitHandler {
    rule: RetryRule,
}

impl QueryLimitHandler {
    /// Ledger key.
    pub const NAME: &'static str = "query_limit";
    const ERROR: &'static str = "QUERY_LIMIT_EXCEEDED";
    const DESCRIPTION: &'static str = "Too many requests";

    /// Creates the rule.
    #[must_use]
    pub const fn new(rule: RetryRule) -> Self {
        Self { rule }
    }
}

impl ErrorHandler for QueryLimitHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn can_handle(&self, ctx: &ErrorContext<'_>) -> bool {
        ctx.matches(Self::ERROR, Self::DESCRIPTION)
    }

    fn handle(
        &self,
        ctx: &ErrorContext<'_>,
        ledger: &AttemptLedger,
    ) -> Result<RetryDecision, ApiError> {
        ledger.record(Self::NAME);
        retry_or(self.rule, || ApiError::QueryLimitExceeded {
            response: ctx.to_response(),
        })
    }
}

/// Waits and resends on `OPERATION_TIME_LIMIT`.
#[derive(Debug, Clone, Copy)]
pub struct OperationTimeLimitHandler {
    rule: RetryRule,
}

impl OperationTimeLimitHandler {
    /// Ledger key.
    pub const NAME: &'static str = "operation_time_limit";
    const ERROR: &'static str = "OPERATION_TIME_LIMIT";
    const DESCRIPTION: &'static str = "Method is blocked due to operation time limit.";

    /// Creates the rule.
    #[must_use]
    pub const fn new(rule: RetryRule) -> Self {
        Self { rule }
    }
}

impl ErrorHandler for OperationTimeLimitHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn can_handle(&self, ctx: &ErrorContext<'_>) -> bool {
        ctx.matches(Self::ERROR, Self::DESCRIPTION)
    }

    fn handle(
        &self,
        ctx: &ErrorContext<'_>,
        ledger: &AttemptLedger,
    ) -> Result<RetryDecision, ApiError> {
        ledger.record(Self::NAME);
        retry_or(self.rule, || ApiError::OperationTimeLimit {
            response: ctx.to_response(),
        })
    }
}

/// Fails on `Access denied.` with an empty error code.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessDeniedHandler;

impl AccessDeniedHandler {
    /// Ledger key.
    pub const NAME: &'static str = "access_denied";
}

impl ErrorHandler for AccessDeniedHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn can_handle(&self, ctx: &ErrorContext<'_>) -> bool {
        ctx.matches("", "Access denied.")
    }

    fn handle(
        &self,
        ctx: &ErrorContext<'_>,
        _ledger: &AttemptLedger,
    ) -> Result<RetryDecision, ApiError> {
        Err(ApiError::AccessDenied {
            response: ctx.to_response(),
        })
    }
}

/// Fails on any response carrying `error` and `error_description`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericErrorHandler;

impl GenericErrorHandler {
    /// Ledger key.
    pub const NAME: &'static str = "error";
}

impl ErrorHandler for GenericErrorHandler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn can_handle(&self, ctx: &ErrorContext<'_>) -> bool {
        ctx.has_error_keys()
    }

    fn handle(
        &self,
        ctx: &ErrorContext<'_>,
        _ledger: &AttemptLedger,
    ) -> Result<RetryDecision, ApiError> {
        Err(ApiError::Api {
            response: ctx.to_response(),
        })
    }
}

fn retry_or(
    rule: RetryRule,
    error: impl FnOnce() -> ApiError,
) -> Result<RetryDecision, ApiError> {
    if rule.enabled {
        Ok(RetryDecision::Retry { delay: rule.delay })
    } else {
        Err(error())
    }
}

