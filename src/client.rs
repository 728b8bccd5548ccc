//! The REST client facade.
//!
//! [`ApiClient`] owns one active connection (webhook or token) and the
//! settings needed to open another one with [`ApiClient::connect_to`].
//! Failures are logged here and returned unchanged.

use std::sync::Arc;

use url::Url;

use crate::batch::BatchAggregator;
use crate::classifier::{ClassifierBuilder, ErrorClassifier, ErrorHandler, RecoveryPolicy};
use crate::credential::{Credential, CredentialStore, TokenUser};
use crate::dispatch::{BatchQuery, Connector, Params, Pipeline, TokenConnector, WebhookConnector};
use crate::error::{ApiError, ApiResponse};
use crate::refresh::TokenRefresher;
use crate::time::{Sleeper, TokioSleeper};
use crate::transport::HttpClient;

/// Method-call surface of a REST client.
///
/// Implemented by [`ApiClient`]; [`BatchAggregator`] is written against
/// this trait.
pub trait RestApi: Send + Sync {
    /// Calls a single method.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the call fails after recovery.
    fn call(
        &self,
        method: &str,
        params: &Params,
    ) -> impl std::future::Future<Output = Result<ApiResponse, ApiError>> + Send;

    /// Calls up to one envelope's worth of methods.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the envelope fails after recovery.
    fn call_batch(
        &self,
        queries: &[BatchQuery],
    ) -> impl std::future::Future<Output = Result<ApiResponse, ApiError>> + Send;
}

impl<T: RestApi> RestApi for Arc<T> {
    fn call(
        &self,
        method: &str,
        params: &Params,
    ) -> impl std::future::Future<Output = Result<ApiResponse, ApiError>> + Send {
        (**self).call(method, params)
    }

    fn call_batch(
        &self,
        queries: &[BatchQuery],
    ) -> impl std::future::Future<Output = Result<ApiResponse, ApiError>> + Send {
        (**self).call_batch(queries)
    }
}

/// Kind of the active connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// Inbound webhook.
    Webhook,
    /// Application token pair.
    Token,
}

impl std::fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Webhook => write!(f, "webhook"),
            Self::Token => write!(f, "token"),
        }
    }
}

#[derive(Debug)]
enum ActiveConnector<H, St, S> {
    Webhook(WebhookConnector<H, S>),
    Token(TokenConnector<H, St, S>),
}

/// Builder for [`ApiClient`].
#[derive(Debug)]
pub struct ApiClientBuilder<H, St, S = TokioSleeper> {
    http: H,
    store: St,
    sleeper: S,
    policy: RecoveryPolicy,
    handlers: Vec<Arc<dyn ErrorHandler>>,
    token_url: Option<Url>,
}

impl<H, St, S> ApiClientBuilder<H, St, S> {
    /// Sets the sleeper used for retry delays.
    ///
    /// This is primarily useful for testing to avoid actual delays.
    #[must_use]
    pub fn with_sleeper<S2>(self, sleeper: S2) -> ApiClientBuilder<H, St, S2> {
        ApiClientBuilder {
            http: self.http,
            store: self.store,
            sleeper,
            policy: self.policy,
            handlers: self.handlers,
            token_url: self.token_url,
        }
    }

    /// Sets the recovery policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Registers a custom classification rule.
    #[must_use]
    pub fn with_handler(mut self, handler: impl ErrorHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Sets the OAuth token endpoint.
    #[must_use]
    pub fn with_token_url(mut self, url: Url) -> Self {
        self.token_url = Some(url);
        self
    }
}

impl<H: Clone, St: Clone, S: Clone> ApiClientBuilder<H, St, S> {
    /// Builds a client connected with `credential`.
    #[must_use]
    pub fn build(self, credential: impl Into<Credential>) -> ApiClient<H, St, S> {
        let connector = self.open(credential.into());
        ApiClient {
            settings: self,
            connector,
        }
    }

    fn classifier(&self, token_mode: bool) -> ErrorClassifier {
        let mut builder = ClassifierBuilder::new(&self.policy);
        for handler in &self.handlers {
            builder = builder.with_shared_handler(Arc::clone(handler));
        }
        if token_mode {
            builder = builder.with_token_refresh();
        }
        builder.build()
    }

    fn pipeline(&self, token_mode: bool) -> Pipeline<H, S> {
        Pipeline::new(
            self.http.clone(),
            self.sleeper.clone(),
            self.classifier(token_mode),
            self.policy.max_dispatch_attempts,
        )
    }

    fn open(&self, credential: Credential) -> ActiveConnector<H, St, S> {
        match credential {
            Credential::Webhook(webhook) => {
                ActiveConnector::Webhook(WebhookConnector::new(webhook, self.pipeline(false)))
            }
            Credential::Token(user) => {
                let mut refresher = TokenRefresher::new(self.http.clone(), self.store.clone());
                if let Some(url) = &self.token_url {
                    refresher = refresher.with_token_url(url.clone());
                }
                ActiveConnector::Token(TokenConnector::new(
                    user,
                    self.pipeline(true),
                    refresher,
                ))
            }
        }
    }
}

/// REST API client.
///
/// # Example
///
/// ```no_run
/// use b24_client::client::ApiClient;
/// use b24_client::credential::{MemoryCredentialStore, Webhook};
/// use b24_client::transport::ReqwestClient;
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), b24_client::error::ApiError> {
/// let api = ApiClient::builder(ReqwestClient::new(), Arc::new(MemoryCredentialStore::new()))
///     .build(Webhook::new("https://example.bitrix24.com/rest/1/secret/"));
///
/// let params = serde_json::json!({"id": 2}).as_object().cloned().unwrap_or_default();
/// let _deal = api.call("crm.deal.get", &params).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ApiClient<H, St, S = TokioSleeper> {
    settings: ApiClientBuilder<H, St, S>,
    connector: ActiveConnector<H, St, S>,
}

impl<H, St> ApiClient<H, St, TokioSleeper> {
    /// Starts building a client with default settings.
    #[must_use]
    pub const fn builder(http: H, store: St) -> ApiClientBuilder<H, St, TokioSleeper> {
        ApiClientBuilder {
            http,
            store,
            sleeper: TokioSleeper,
            policy: RecoveryPolicy::new(),
            handlers: Vec::new(),
            token_url: None,
        }
    }
}

impl<H, St, S> ApiClient<H, St, S> {
    /// Kind of the active connection.
    #[must_use]
    pub const fn connection_kind(&self) -> ConnectionKind {
        match self.connector {
            ActiveConnector::Webhook(_) => ConnectionKind::Webhook,
            ActiveConnector::Token(_) => ConnectionKind::Token,
        }
    }

    /// The active credential, including any token rotation so far.
    pub async fn credential(&self) -> Credential {
        match &self.connector {
            ActiveConnector::Webhook(c) => Credential::Webhook(c.webhook().clone()),
            ActiveConnector::Token(c) => Credential::Token(c.user().read().await.clone()),
        }
    }

    /// The recovery policy in use.
    #[must_use]
    pub const fn policy(&self) -> &RecoveryPolicy {
        &self.settings.policy
    }

    /// The credential store.
    #[must_use]
    pub const fn store(&self) -> &St {
        &self.settings.store
    }

    /// Batch aggregator over this client.
    #[must_use]
    pub fn batch(&self) -> BatchAggregator<'_, Self> {
        BatchAggregator::new(self)
    }
}

impl<H: Clone, St: Clone, S: Clone> ApiClient<H, St, S> {
    /// Switches to another credential.
    ///
    /// Attempt budgets start over with the new connection.
    pub fn connect_to(&mut self, credential: impl Into<Credential>) -> ConnectionKind {
        self.connector = self.settings.open(credential.into());
        let kind = self.connection_kind();
        tracing::debug!("Switched to {kind} connection");
        kind
    }
}

impl<H: Clone, St: CredentialStore + Clone, S: Clone> ApiClient<H, St, S> {
    /// Switches to the stored credential of `member_id`.
    ///
    /// An unknown member still yields a token connection; its calls fail
    /// with [`ApiError::InvalidCredential`].
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Store`] if the store cannot be read.
    pub fn connect_to_member(&mut self, member_id: &str) -> Result<ConnectionKind, ApiError> {
        let user = self
            .settings
            .store
            .find_by_member_id(member_id)?
            .unwrap_or_else(|| {
                tracing::warn!("Member {member_id} not found in credential store");
                TokenUser::unregistered(member_id)
            });
        Ok(self.connect_to(user))
    }
}

impl<H, St, S> ApiClient<H, St, S>
where
    H: HttpClient,
    St: CredentialStore,
    S: Sleeper,
{
    /// Calls a single method.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the call fails after recovery.
    pub async fn call(&self, method: &str, params: &Params) -> Result<ApiResponse, ApiError> {
        let result = match &self.connector {
            ActiveConnector::Webhook(c) => c.send_request(method, params).await,
            ActiveConnector::Token(c) => c.send_request(method, params).await,
        };
        match &result {
            Ok(response) if response.contains_key("error") => {
                tracing::warn!(
                    method,
                    "Call returned an error: {}",
                    serde_json::Value::Object(response.clone())
                );
            }
            Ok(_) => tracing::debug!(method, "Call succeeded"),
            Err(e) => tracing::error!(method, "Call failed: {e}"),
        }
        result
    }

    /// Calls up to one envelope's worth of methods.
    ///
    /// Use [`ApiClient::batch`] for more queries than one envelope takes.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the envelope fails after recovery.
    pub async fn call_batch(&self, queries: &[BatchQuery]) -> Result<ApiResponse, ApiError> {
        let result = match &self.connector {
            ActiveConnector::Webhook(c) => c.send_batch_request(queries).await,
            ActiveConnector::Token(c) => c.send_batch_request(queries).await,
        };
        match &result {
            Ok(response) => log_batch_errors(queries, response),
            Err(e) => tracing::error!(queries = queries.len(), "Batch call failed: {e}"),
        }
        result
    }
}

impl<H, St, S> RestApi for ApiClient<H, St, S>
where
    H: HttpClient,
    St: CredentialStore,
    S: Sleeper,
{
    async fn call(&self, method: &str, params: &Params) -> Result<ApiResponse, ApiError> {
        Self::call(self, method, params).await
    }

    async fn call_batch(&self, queries: &[BatchQuery]) -> Result<ApiResponse, ApiError> {
        Self::call_batch(self, queries).await
    }
}

fn log_batch_errors(queries: &[BatchQuery], response: &ApiResponse) {
    let errors = response
        .get("result")
        .and_then(|r| r.get("result_error"))
        .filter(|e| match e {
            serde_json::Value::Array(items) => !items.is_empty(),
            serde_json::Value::Object(map) => !map.is_empty(),
            _ => false,
        });

    match errors {
        Some(errors) => tracing::warn!(
            queries = queries.len(),
            "Batch call returned errors: {errors}"
        ),
        None => tracing::debug!(queries = queries.len(), "Batch call succeeded"),
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
