//! Application installation.
//!
//! When the portal installs the application it hands over a fresh token
//! pair. [`register_member`] asks the portal who installed it, then
//! stores the credential so later calls can connect by member id.

use serde_json::Value;

use crate::classifier::{ErrorClassifier, RecoveryPolicy};
use crate::credential::{CredentialStore, TokenUser, Webhook};
use crate::dispatch::{Connector, Params, Pipeline, WebhookConnector};
use crate::error::{ApiError, ApiResponse};
use crate::time::Sleeper;
use crate::transport::HttpClient;

/// Installation data sent by the portal.
#[derive(Clone, PartialEq, Eq)]
pub struct InstallRequest {
    /// Portal identifier.
    pub member_id: String,
    /// Portal domain, e.g. `example.bitrix24.com`.
    pub domain: String,
    /// Fresh access token.
    pub access_token: String,
    /// Fresh refresh token.
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: Option<u64>,
    /// Application client id.
    pub client_id: String,
    /// Application client secret.
    pub client_secret: String,
}

impl std::fmt::Debug for InstallRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallRequest")
            .field("member_id", &self.member_id)
            .field("domain", &self.domain)
            .field("expires_in", &self.expires_in)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Fetches the installing user's profile and stores the credential.
///
/// The profile call goes through the regular recovery rules, without
/// token refresh: a token handed over at install time is fresh.
///
/// # Errors
///
/// Returns [`ApiError`] if the profile call fails, the profile lacks a
/// user id, or the credential cannot be saved.
pub async fn register_member<H, St, S>(
    http: H,
    sleeper: S,
    store: &St,
    request: InstallRequest,
    policy: &RecoveryPolicy,
) -> Result<TokenUser, ApiError>
where
    H: HttpClient,
    St: CredentialStore,
    S: Sleeper,
{
    let mut user = TokenUser::new(
        request.member_id,
        request.domain,
        request.access_token,
        request.refresh_token,
        request.client_id,
        request.client_secret,
    );
    user.expires_in = request.expires_in;

    let portal = WebhookConnector::new(
        Webhook::new(user.client_endpoint()),
        Pipeline::new(
            http,
            sleeper,
            ErrorClassifier::for_webhook(policy),
            policy.max_dispatch_attempts,
        ),
    );
    let mut params = Params::new();
    params.insert("auth".to_string(), Value::String(user.access_token.clone()));
    let response = portal.send_request("profile", &params).await?;

    let profile = Profile::parse(&response)?;
    user.user_id = Some(profile.id);
    user.is_admin = profile.admin;

    let saved = store.save(&user).await?;
    tracing::info!(
        "Registered member {} (user {}, admin: {})",
        saved.member_id,
        profile.id,
        profile.admin
    );
    Ok(saved)
}

#[derive(Debug)]
struct Profile {
    id: u64,
    admin: bool,
}

impl Profile {
    fn parse(response: &ApiResponse) -> Result<Self, ApiError> {
        let profile = response.get("result").unwrap_or(&Value::Null);
        let id = match profile.get("ID") {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
        .ok_or_else(|| {
            ApiError::UnexpectedResponse(format!("profile without a user ID: {profile}"))
        })?;
        let admin = profile.get("ADMIN").and_then(Value::as_bool).unwrap_or(false);
        Ok(Self { id, admin })
    }
}
