//! Response classification and recovery decisions.
//!
//! Every decoded response goes through an ordered chain of
//! [`ErrorHandler`]s. The first handler that recognises the response
//! decides what happens next: accept it, resend after a pause, refresh
//! the access token and resend, or fail with an [`ApiError`].
//!
//! Handlers are pure. They only look at the response and count attempts
//! in an [`AttemptLedger`]; sleeping and refreshing are carried out by
//! the dispatcher that asked for the decision.

mod handlers;
mod policy;

#[cfg(test)]
mod policy_tests;

pub use handlers::{
    AccessDeniedHandler, EmptyResponseHandler, ExpiredTokenHandler, GenericErrorHandler,
    OperationTimeLimitHandler, QueryLimitHandler,
};
pub use policy::{BudgetScope, RecoveryPolicy, RetryRule};

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::credential::TokenUser;
use crate::error::{ApiError, ApiResponse};

/// What the dispatcher should do with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The response is final; hand it to the caller.
    Accept,
    /// Resend the same request after `delay`.
    Retry {
        /// Pause before resending.
        delay: Duration,
    },
    /// Refresh the access token, then resend.
    RefreshThenRetry,
}

impl RetryDecision {
    /// Returns `true` if the request has to be sent again.
    #[must_use]
    pub const fn repeat(&self) -> bool {
        !matches!(self, Self::Accept)
    }
}

/// A response under classification.
#[derive(Debug, Clone, Copy)]
pub struct ErrorContext<'a> {
    /// The decoded response.
    pub response: &'a ApiResponse,
    /// The token credential used, if the request was token-authorized.
    pub credential: Option<&'a TokenUser>,
}

impl<'a> ErrorContext<'a> {
    /// Context for a webhook-authorized response.
    #[must_use]
    pub const fn new(response: &'a ApiResponse) -> Self {
        Self {
            response,
            credential: None,
        }
    }

    /// Attaches the token credential used for the request.
    #[must_use]
    pub const fn with_credential(mut self, credential: &'a TokenUser) -> Self {
        self.credential = Some(credential);
        self
    }

    /// The `error` field, when it is a string.
    #[must_use]
    pub fn error_code(&self) -> Option<&'a str> {
        self.response.get("error").and_then(Value::as_str)
    }

    /// The `error_description` field, when it is a string.
    #[must_use]
    pub fn error_description(&self) -> Option<&'a str> {
        self.response.get("error_description").and_then(Value::as_str)
    }

    /// Returns `true` if both error fields equal the given values.
    #[must_use]
    pub fn matches(&self, error: &str, description: &str) -> bool {
        self.error_code() == Some(error) && self.error_description() == Some(description)
    }

    /// Returns `true` if the response carries both error keys.
    #[must_use]
    pub fn has_error_keys(&self) -> bool {
        self.response.contains_key("error") && self.response.contains_key("error_description")
    }

    /// An owned copy of the response, for error payloads.
    #[must_use]
    pub fn to_response(&self) -> ApiResponse {
        self.response.clone()
    }
}

/// One rule of the classification chain.
///
/// `handle` is only called after `can_handle` returned `true` for the
/// same context.
pub trait ErrorHandler: Send + Sync + fmt::Debug {
    /// Short rule name used for logging and attempt accounting.
    fn name(&self) -> &'static str;

    /// Returns `true` if this rule recognises the response.
    fn can_handle(&self, ctx: &ErrorContext<'_>) -> bool;

    /// Decides how to proceed.
    ///
    /// # Errors
    ///
    /// Returns the error to surface when the response is final and failed.
    fn handle(
        &self,
        ctx: &ErrorContext<'_>,
        ledger: &AttemptLedger,
    ) -> Result<RetryDecision, ApiError>;
}

/// Attempt counters keyed by rule name.
#[derive(Debug, Default)]
pub struct AttemptLedger {
    counts: Mutex<HashMap<&'static str, u32>>,
}

impl AttemptLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the counter of `rule` and returns the new value.
    pub fn record(&self, rule: &'static str) -> u32 {
        let mut counts = self
            .counts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let count = counts.entry(rule).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Current counter of `rule`.
    #[must_use]
    pub fn count(&self, rule: &'static str) -> u32 {
        self.counts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(rule)
            .copied()
            .unwrap_or(0)
    }
}

/// Ledger used for one logical request.
///
/// Borrowed from the classifier under [`BudgetScope::PerClient`], owned
/// otherwise.
#[derive(Debug)]
pub enum CallBudget<'a> {
    /// The client-wide ledger.
    Shared(&'a AttemptLedger),
    /// A ledger private to this call.
    Own(AttemptLedger),
}

impl Deref for CallBudget<'_> {
    type Target = AttemptLedger;

    fn deref(&self) -> &AttemptLedger {
        match self {
            Self::Shared(ledger) => ledger,
            Self::Own(ledger) => ledger,
        }
    }
}

/// Ordered chain of [`ErrorHandler`]s.
///
/// Built with [`ErrorClassifier::builder`], which always lays the rules
/// out in the same order:
///
/// 1. empty response
/// 2. expired token (token mode only)
/// 3. query limit exceeded
/// 4. operation time limit
/// 5. access denied
/// 6. custom handlers, in registration order
/// 7. generic `error` / `error_description`
///
/// A response no rule claims is accepted.
#[derive(Debug)]
pub struct ErrorClassifier {
    handlers: Vec<Arc<dyn ErrorHandler>>,
    scope: BudgetScope,
    shared: AttemptLedger,
}

impl ErrorClassifier {
    /// Starts building a classifier with the default policy.
    #[must_use]
    pub fn builder() -> ClassifierBuilder {
        ClassifierBuilder::new(&RecoveryPolicy::default())
    }

    /// Classifier for webhook-authorized requests.
    #[must_use]
    pub fn for_webhook(policy: &RecoveryPolicy) -> Self {
        ClassifierBuilder::new(policy).build()
    }

    /// Classifier for token-authorized requests.
    #[must_use]
    pub fn for_token(policy: &RecoveryPolicy) -> Self {
        ClassifierBuilder::new(policy).with_token_refresh().build()
    }

    /// Names of the handlers, in evaluation order.
    #[must_use]
    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Budget scope of this classifier.
    #[must_use]
    pub const fn scope(&self) -> BudgetScope {
        self.scope
    }

    /// Ledger to use for the next logical request.
    #[must_use]
    pub fn begin_call(&self) -> CallBudget<'_> {
        match self.scope {
            BudgetScope::PerClient => CallBudget::Shared(&self.shared),
            BudgetScope::PerCall => CallBudget::Own(AttemptLedger::new()),
        }
    }

    /// Runs the chain over a response.
    ///
    /// # Errors
    ///
    /// Returns the error of the first matching handler that rejects the
    /// response.
    pub fn evaluate(
        &self,
        ctx: &ErrorContext<'_>,
        ledger: &AttemptLedger,
    ) -> Result<RetryDecision, ApiError> {
        let Some(handler) = self.handlers.iter().find(|h| h.can_handle(ctx)) else {
            return Ok(RetryDecision::Accept);
        };

        let decision = handler.handle(ctx, ledger);
        match &decision {
            Ok(RetryDecision::Accept) => {}
            Ok(RetryDecision::Retry { delay }) => {
                tracing::warn!(rule = handler.name(), ?delay, "Retrying request");
            }
            Ok(RetryDecision::RefreshThenRetry) => {
                tracing::info!(rule = handler.name(), "Access token expired, refreshing");
            }
            Err(e) => tracing::debug!(rule = handler.name(), "Response rejected: {e}"),
        }
        decision
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::for_webhook(&RecoveryPolicy::default())
    }
}

/// Builder for [`ErrorClassifier`].
///
/// Only the optional parts of the chain are configurable; the position
/// of each rule is fixed. Cloning is cheap; custom handlers are shared.
#[derive(Debug, Clone)]
pub struct ClassifierBuilder {
    empty_response: EmptyResponseHandler,
    expired_token: Option<ExpiredTokenHandler>,
    attempts_limit: u32,
    query_limit: QueryLimitHandler,
    operation_time_limit: OperationTimeLimitHandler,
    custom: Vec<Arc<dyn ErrorHandler>>,
    scope: BudgetScope,
}

impl ClassifierBuilder {
    /// Builder seeded from a policy, without token refresh.
    #[must_use]
    pub fn new(policy: &RecoveryPolicy) -> Self {
        Self {
            empty_response: EmptyResponseHandler::new(policy.empty_response, policy.attempts_limit),
            expired_token: None,
            attempts_limit: policy.attempts_limit,
            query_limit: QueryLimitHandler::new(policy.query_limit),
            operation_time_limit: OperationTimeLimitHandler::new(policy.operation_time_limit),
            custom: Vec::new(),
            scope: policy.budget_scope,
        }
    }

    /// Adds the expired-token rule.
    #[must_use]
    pub fn with_token_refresh(mut self) -> Self {
        self.expired_token = Some(ExpiredTokenHandler::new(self.attempts_limit));
        self
    }

    /// Registers a handler evaluated after the built-in rules and before
    /// the generic error rule.
    #[must_use]
    pub fn with_handler(self, handler: impl ErrorHandler + 'static) -> Self {
        self.with_shared_handler(Arc::new(handler))
    }

    /// Registers an already shared handler.
    #[must_use]
    pub fn with_shared_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.custom.push(handler);
        self
    }

    /// Overrides the budget scope.
    #[must_use]
    pub const fn with_budget_scope(mut self, scope: BudgetScope) -> Self {
        self.scope = scope;
        self
    }

    /// Builds the chain.
    #[must_use]
    pub fn build(self) -> ErrorClassifier {
        let mut handlers: Vec<Arc<dyn ErrorHandler>> = Vec::with_capacity(6 + self.custom.len());
        handlers.push(Arc::new(self.empty_response));
        if let Some(expired) = self.expired_token {
            handlers.push(Arc::new(expired));
        }
        handlers.push(Arc::new(self.query_limit));
        handlers.push(Arc::new(self.operation_time_limit));
        handlers.push(Arc::new(AccessDeniedHandler));
        handlers.extend(self.custom);
        handlers.push(Arc::new(GenericErrorHandler));

        ErrorClassifier {
            handlers,
            scope: self.scope,
            shared: AttemptLedger::new(),
        }
    }
}
