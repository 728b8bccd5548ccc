//! Request dispatch.
//!
//! A [`Connector`] turns a method call into an HTTP request against the
//! endpoint of its credential, sends it and runs the decoded response
//! through the [`ErrorClassifier`]. The same request is resent for as
//! long as the classifier asks for it, up to the dispatcher ceiling.
//!
//! - [`WebhookConnector`]: endpoint taken from an inbound webhook URL
//! - [`TokenConnector`]: portal endpoint plus an `auth` token, with
//!   automatic refresh on `expired_token`

mod token;
mod webhook;
pub mod wire;

#[cfg(test)]
mod webhook_tests;
#[cfg(test)]
mod wire_tests;

pub use token::TokenConnector;
pub use webhook::WebhookConnector;
pub use wire::{BatchQuery, Params};

use url::Url;

use crate::classifier::{ErrorClassifier, RetryDecision};
use crate::error::{ApiError, ApiResponse};
use crate::time::Sleeper;
use crate::transport::{HttpClient, HttpError, HttpRequest};

/// Sends REST calls on behalf of one credential.
pub trait Connector: Send + Sync {
    /// Calls a single method.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the credential is unusable, the request
    /// cannot be delivered, or the classifier rejects the response.
    fn send_request(
        &self,
        method: &str,
        params: &Params,
    ) -> impl std::future::Future<Output = Result<ApiResponse, ApiError>> + Send;

    /// Calls several methods in one batch envelope.
    ///
    /// Recovery applies to the envelope; per-query failures are left in
    /// the response's `result_error`.
    ///
    /// # Errors
    ///
    /// Same as [`Connector::send_request`].
    fn send_batch_request(
        &self,
        queries: &[BatchQuery],
    ) -> impl std::future::Future<Output = Result<ApiResponse, ApiError>> + Send;
}

/// Transport, delays and classification shared by both connectors.
#[derive(Debug)]
pub struct Pipeline<H, S> {
    http: H,
    sleeper: S,
    classifier: ErrorClassifier,
    max_attempts: u32,
}

impl<H, S> Pipeline<H, S> {
    /// Assembles a pipeline.
    #[must_use]
    pub const fn new(http: H, sleeper: S, classifier: ErrorClassifier, max_attempts: u32) -> Self {
        Self {
            http,
            sleeper,
            classifier,
            max_attempts,
        }
    }

    /// The classifier in use.
    #[must_use]
    pub const fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }
}

impl<H: HttpClient, S: Sleeper> Pipeline<H, S> {
    /// Sends one request and decodes the body.
    async fn exchange(&self, request: HttpRequest) -> Result<ApiResponse, ApiError> {
        let response = self.http.request(request).await?;
        if !response.is_success() {
            tracing::debug!("REST endpoint answered with status {}", response.status);
        }
        wire::decode(&response.body)
    }

    /// Checks the dispatcher ceiling, then waits if the decision asks for it.
    async fn prepare_resend(&self, decision: RetryDecision, attempt: u32) -> Result<(), ApiError> {
        if attempt >= self.max_attempts {
            tracing::warn!("Giving up after {attempt} attempts");
            return Err(ApiError::RetryLoopExhausted { attempts: attempt });
        }
        if let RetryDecision::Retry { delay } = decision {
            self.sleeper.sleep(delay).await;
        }
        Ok(())
    }
}

/// `{endpoint}{method}.json`.
fn method_url(endpoint: &Url, method: &str) -> Result<Url, ApiError> {
    let raw = format!("{endpoint}{method}.json");
    Url::parse(&raw).map_err(|e| ApiError::Transport(HttpError::InvalidUrl(format!("{raw}: {e}"))))
}
