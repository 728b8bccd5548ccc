//! OAuth token refresh.
//!
//! When the API reports `expired_token`, the dispatcher hands the shared
//! credential to a [`TokenRefresher`]. The refresher exchanges the
//! refresh token for a new pair at the OAuth server, rotates the
//! credential in place and persists it.
//!
//! The credential sits behind a [`tokio::sync::RwLock`]. A refresh holds
//! the write lock for the whole exchange; requests that failed with the
//! same stale token queue up behind it and then find the token already
//! rotated, so only one of them talks to the OAuth server.

use serde_json::Value;
use tokio::sync::RwLock;
use url::Url;

use crate::credential::{CredentialStore, TokenUser};
use crate::error::{ApiError, ApiResponse, RefreshTokenError};
use crate::transport::{HttpClient, HttpError, HttpRequest};

/// Public OAuth token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://oauth.bitrix.info/oauth/token/";

const WRONG_CLIENT: &str = "wrong_client";
const INVALID_GRANT: &str = "invalid_grant";

/// Exchanges refresh tokens and persists the rotated credential.
#[derive(Debug, Clone)]
pub struct TokenRefresher<H, St> {
    http: H,
    store: St,
    token_url: Option<Url>,
}

impl<H, St> TokenRefresher<H, St> {
    /// Creates a refresher talking to [`DEFAULT_TOKEN_URL`].
    #[must_use]
    pub const fn new(http: H, store: St) -> Self {
        Self {
            http,
            store,
            token_url: None,
        }
    }

    /// Talks to another OAuth endpoint.
    #[must_use]
    pub fn with_token_url(mut self, url: Url) -> Self {
        self.token_url = Some(url);
        self
    }

    /// The OAuth endpoint in use.
    #[must_use]
    pub fn token_url(&self) -> &str {
        self.token_url.as_ref().map_or(DEFAULT_TOKEN_URL, Url::as_str)
    }
}

impl<H: HttpClient, St: CredentialStore> TokenRefresher<H, St> {
    /// Refreshes the credential unless it was rotated since `stale_access_token`
    /// was read.
    ///
    /// On success the credential holds the new pair and has been saved
    /// exactly once.
    ///
    /// # Errors
    ///
    /// - [`ApiError::RefreshToken`] if the OAuth server rejects the request
    ///   or answers with something other than a token pair
    /// - [`ApiError::Transport`] if the OAuth server cannot be reached
    /// - [`ApiError::Store`] if the rotated credential cannot be saved; the
    ///   in-memory credential is rotated regardless
    pub async fn refresh(
        &self,
        user: &RwLock<TokenUser>,
        stale_access_token: &str,
    ) -> Result<(), ApiError> {
        let mut guard = user.write().await;
        if guard.access_token != stale_access_token {
            tracing::debug!(
                "Access token of member {} already rotated, skipping refresh",
                guard.member_id
            );
            return Ok(());
        }

        let url = Url::parse(self.token_url())
            .map_err(|e| HttpError::InvalidUrl(format!("{}: {e}", self.token_url())))?;
        let request = HttpRequest::post_form(
            url,
            [
                ("grant_type", "refresh_token"),
                ("client_id", guard.client_id.as_str()),
                ("client_secret", guard.client_secret.as_str()),
                ("refresh_token", guard.refresh_token.as_str()),
            ],
        );
        let response = self.http.request(request).await?;
        let grant = TokenGrant::parse(&response.body)?;

        guard.rotate(grant.access_token, grant.refresh_token, grant.expires_in);
        self.store.save(&guard).await?;

        tracing::info!("Refreshed access token of member {}", guard.member_id);
        Ok(())
    }
}

/// A successful OAuth answer.
#[derive(Debug)]
struct TokenGrant {
    access_token: String,
    refresh_token: String,
    expires_in: Option<u64>,
}

impl TokenGrant {
    fn parse(body: &[u8]) -> Result<Self, RefreshTokenError> {
        let response: ApiResponse = match serde_json::from_slice(body) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Err(RefreshTokenError::Malformed(format!(
                    "expected a JSON object, got {other}"
                )));
            }
            Err(e) => return Err(RefreshTokenError::Malformed(e.to_string())),
        };

        if let Some(error) = response.get("error") {
            return Err(match error.as_str() {
                Some(WRONG_CLIENT) => RefreshTokenError::WrongClient { response },
                Some(INVALID_GRANT) => RefreshTokenError::InvalidGrant { response },
                _ => RefreshTokenError::Rejected { response },
            });
        }

        let field = |name: &str| {
            response
                .get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .ok_or_else(|| RefreshTokenError::Malformed(format!("missing {name}")))
        };

        Ok(Self {
            access_token: field("access_token")?,
            refresh_token: field("refresh_token")?,
            expires_in: response.get("expires_in").and_then(Value::as_u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::mock::RecordingStore;
    use crate::transport::mock::ScriptedClient;
    use serde_json::json;
    use std::sync::Arc;

    fn user() -> RwLock<TokenUser> {
        RwLock::new(
            TokenUser::new("member-1", "example.bitrix24.com", "A", "R", "app.1", "s3cret")
                .with_id(7),
        )
    }

    fn refresher(
        client: &Arc<ScriptedClient>,
        store: &Arc<RecordingStore>,
    ) -> TokenRefresher<Arc<ScriptedClient>, Arc<RecordingStore>> {
        TokenRefresher::new(Arc::clone(client), Arc::clone(store))
    }

    #[tokio::test]
    async fn rotates_tokens_and_saves_once() {
        let client = Arc::new(ScriptedClient::with_json(vec![json!({
            "access_token": "B",
            "refresh_token": "R2",
            "expires_in": 3600
        })]));
        let store = Arc::new(RecordingStore::default());
        let user = user();

        refresher(&client, &store).refresh(&user, "A").await.unwrap();

        let rotated = user.read().await;
        assert_eq!(rotated.access_token, "B");
        assert_eq!(rotated.refresh_token, "R2");
        assert_eq!(rotated.expires_in, Some(3600));
        assert_eq!(store.saved().len(), 1);
        assert_eq!(store.saved()[0].access_token, "B");
    }

    #[tokio::test]
    async fn posts_form_to_token_endpoint() {
        let client = Arc::new(ScriptedClient::with_json(vec![json!({
            "access_token": "B",
            "refresh_token": "R2"
        })]));
        let store = Arc::new(RecordingStore::default());

        refresher(&client, &store)
            .refresh(&user(), "A")
            .await
            .unwrap();

        let request = &client.captured_requests()[0];
        assert_eq!(request.method, http::Method::POST);
        assert_eq!(request.url.as_str(), DEFAULT_TOKEN_URL);
        assert_eq!(
            request.headers.get(http::header::ACCEPT).unwrap(),
            "application/json"
        );
        let body = String::from_utf8(request.body.clone().unwrap()).unwrap();
        assert_eq!(
            body,
            "grant_type=refresh_token&client_id=app.1&client_secret=s3cret&refresh_token=R"
        );
    }

    #[tokio::test]
    async fn custom_token_url_is_used() {
        let client = Arc::new(ScriptedClient::with_json(vec![json!({
            "access_token": "B",
            "refresh_token": "R2"
        })]));
        let store = Arc::new(RecordingStore::default());
        let refresher = refresher(&client, &store)
            .with_token_url(Url::parse("http://127.0.0.1:9000/oauth/token/").unwrap());

        refresher.refresh(&user(), "A").await.unwrap();

        assert_eq!(
            client.captured_requests()[0].url.as_str(),
            "http://127.0.0.1:9000/oauth/token/"
        );
    }

    #[tokio::test]
    async fn skips_network_when_already_rotated() {
        let client = Arc::new(ScriptedClient::with_json(vec![json!({
            "access_token": "B",
            "refresh_token": "R2"
        })]));
        let store = Arc::new(RecordingStore::default());
        let user = user();
        let refresher = refresher(&client, &store);

        refresher.refresh(&user, "A").await.unwrap();
        refresher.refresh(&user, "A").await.unwrap();

        assert_eq!(client.calls(), 1);
        assert_eq!(store.saved().len(), 1);
    }

    #[tokio::test]
    async fn wrong_client_names_client_credentials() {
        let client = Arc::new(ScriptedClient::with_json(vec![json!({
            "error": "wrong_client",
            "error_description": "Wrong client"
        })]));
        let store = Arc::new(RecordingStore::default());

        let err = refresher(&client, &store)
            .refresh(&user(), "A")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ApiError::RefreshToken(RefreshTokenError::WrongClient { .. })
        ));
        assert!(
            err.to_string()
                .contains("client_id or client_secret are incorrect")
        );
        assert!(store.saved().is_empty());
    }

    #[tokio::test]
    async fn invalid_grant_keeps_old_tokens() {
        let client = Arc::new(ScriptedClient::with_json(vec![json!({
            "error": "invalid_grant",
            "error_description": "Invalid grant"
        })]));
        let store = Arc::new(RecordingStore::default());
        let user = user();

        let err = refresher(&client, &store)
            .refresh(&user, "A")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ApiError::RefreshToken(RefreshTokenError::InvalidGrant { .. })
        ));
        assert!(err.to_string().contains("invalid or expired"));
        assert_eq!(user.read().await.access_token, "A");
    }

    #[tokio::test]
    async fn other_oauth_error_is_rejected() {
        let client = Arc::new(ScriptedClient::with_json(vec![json!({
            "error": "server_error"
        })]));
        let store = Arc::new(RecordingStore::default());

        let err = refresher(&client, &store)
            .refresh(&user(), "A")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ApiError::RefreshToken(RefreshTokenError::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn missing_tokens_are_malformed() {
        let client = Arc::new(ScriptedClient::with_json(vec![json!({"access_token": "B"})]));
        let store = Arc::new(RecordingStore::default());

        let err = refresher(&client, &store)
            .refresh(&user(), "A")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ApiError::RefreshToken(RefreshTokenError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn html_answer_is_malformed() {
        let client = Arc::new(ScriptedClient::default());
        client.push_raw(b"<html>502</html>".to_vec());
        let store = Arc::new(RecordingStore::default());

        let err = refresher(&client, &store)
            .refresh(&user(), "A")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ApiError::RefreshToken(RefreshTokenError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let client = Arc::new(ScriptedClient::default());
        client.push_error(HttpError::Timeout);
        let store = Arc::new(RecordingStore::default());

        let err = refresher(&client, &store)
            .refresh(&user(), "A")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Transport(HttpError::Timeout)));
    }

    #[tokio::test]
    async fn failed_save_still_rotates_in_memory() {
        let client = Arc::new(ScriptedClient::with_json(vec![json!({
            "access_token": "B",
            "refresh_token": "R2"
        })]));
        let store = Arc::new(RecordingStore::failing());
        let user = user();

        let err = refresher(&client, &store)
            .refresh(&user, "A")
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Store(_)));
        assert_eq!(user.read().await.access_token, "B");
    }
}
