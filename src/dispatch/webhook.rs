//! Webhook-authorized dispatch.

use serde_json::Value;

use super::{BatchQuery, Connector, Params, Pipeline, method_url, wire};
use crate::classifier::{ErrorContext, RetryDecision};
use crate::credential::Webhook;
use crate::error::{ApiError, ApiResponse};
use crate::time::Sleeper;
use crate::transport::{HttpClient, HttpRequest};

/// Connector for an inbound webhook URL.
///
/// The URL is validated on every call, before anything is sent.
#[derive(Debug)]
pub struct WebhookConnector<H, S> {
    webhook: Webhook,
    pipeline: Pipeline<H, S>,
}

impl<H, S> WebhookConnector<H, S> {
    /// Creates a connector.
    #[must_use]
    pub const fn new(webhook: Webhook, pipeline: Pipeline<H, S>) -> Self {
        Self { webhook, pipeline }
    }

    /// The webhook in use.
    #[must_use]
    pub const fn webhook(&self) -> &Webhook {
        &self.webhook
    }
}

impl<H: HttpClient, S: Sleeper> WebhookConnector<H, S> {
    async fn dispatch(&self, path: &str, body: &Value) -> Result<ApiResponse, ApiError> {
        let endpoint = self.webhook.endpoint().ok_or_else(|| {
            ApiError::InvalidCredential(format!(
                "the webhook is incorrect: '{}'",
                self.webhook.url()
            ))
        })?;
        let url = method_url(&endpoint, path)?;

        let budget = self.pipeline.classifier.begin_call();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = self
                .pipeline
                .exchange(HttpRequest::post_json(url.clone(), body))
                .await?;

            let decision = self
                .pipeline
                .classifier
                .evaluate(&ErrorContext::new(&response), &budget)?;
            if decision == RetryDecision::Accept {
                return Ok(response);
            }
            self.pipeline.prepare_resend(decision, attempt).await?;
        }
    }
}

impl<H: HttpClient, S: Sleeper> Connector for WebhookConnector<H, S> {
    async fn send_request(&self, method: &str, params: &Params) -> Result<ApiResponse, ApiError> {
        self.dispatch(method, &wire::call_payload(params, None)).await
    }

    async fn send_batch_request(&self, queries: &[BatchQuery]) -> Result<ApiResponse, ApiError> {
        self.dispatch("batch", &wire::batch_payload(queries, None))
            .await
    }
}
