//! Token-authorized dispatch.

use std::sync::Arc;

use tokio::sync::RwLock;
use url::Url;

use super::{BatchQuery, Connector, Params, Pipeline, method_url, wire};
use crate::classifier::{ErrorContext, RetryDecision};
use crate::credential::{CredentialStore, TokenUser};
use crate::error::{ApiError, ApiResponse};
use crate::refresh::TokenRefresher;
use crate::time::Sleeper;
use crate::transport::{HttpClient, HttpRequest};

/// Connector for an installed application's token pair.
///
/// Each attempt reads the current token, so a resend after a refresh
/// carries the new one. The credential is shared: clones of the handle
/// returned by [`TokenConnector::user`] observe rotations.
#[derive(Debug)]
pub struct TokenConnector<H, St, S> {
    user: Arc<RwLock<TokenUser>>,
    pipeline: Pipeline<H, S>,
    refresher: TokenRefresher<H, St>,
}

impl<H, St, S> TokenConnector<H, St, S> {
    /// Creates a connector.
    #[must_use]
    pub fn new(user: TokenUser, pipeline: Pipeline<H, S>, refresher: TokenRefresher<H, St>) -> Self {
        Self {
            user: Arc::new(RwLock::new(user)),
            pipeline,
            refresher,
        }
    }

    /// Shared handle to the credential.
    #[must_use]
    pub fn user(&self) -> Arc<RwLock<TokenUser>> {
        Arc::clone(&self.user)
    }
}

impl<H, St, S> TokenConnector<H, St, S>
where
    H: HttpClient,
    St: CredentialStore,
    S: Sleeper,
{
    async fn dispatch(
        &self,
        path: &str,
        payload: impl Fn(&str) -> serde_json::Value + Send + Sync,
    ) -> Result<ApiResponse, ApiError> {
        let budget = self.pipeline.classifier.begin_call();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let user = self.user.read().await.clone();
            let url = method_url(&endpoint(&user)?, path)?;
            let request = HttpRequest::post_json(url, &payload(&user.access_token));

            let response = self.pipeline.exchange(request).await?;
            let ctx = ErrorContext::new(&response).with_credential(&user);
            let decision = self.pipeline.classifier.evaluate(&ctx, &budget)?;
            if decision == RetryDecision::Accept {
                return Ok(response);
            }

            self.pipeline.prepare_resend(decision, attempt).await?;
            if decision == RetryDecision::RefreshThenRetry {
                self.refresher
                    .refresh(&self.user, &user.access_token)
                    .await?;
            }
        }
    }
}

impl<H, St, S> Connector for TokenConnector<H, St, S>
where
    H: HttpClient,
    St: CredentialStore,
    S: Sleeper,
{
    async fn send_request(&self, method: &str, params: &Params) -> Result<ApiResponse, ApiError> {
        self.dispatch(method, |auth| wire::call_payload(params, Some(auth)))
            .await
    }

    async fn send_batch_request(&self, queries: &[BatchQuery]) -> Result<ApiResponse, ApiError> {
        self.dispatch("batch", |auth| wire::batch_payload(queries, Some(auth)))
            .await
    }
}

/// REST endpoint of a registered user.
fn endpoint(user: &TokenUser) -> Result<Url, ApiError> {
    if !user.is_registered() {
        return Err(ApiError::InvalidCredential(format!(
            "member '{}' is not registered in the credential store",
            user.member_id
        )));
    }
    Url::parse(&user.client_endpoint()).map_err(|_| {
        ApiError::InvalidCredential(format!(
            "the portal domain is incorrect: '{}'",
            user.domain
        ))
    })
}
