//! Credentials and their persistence.
//!
//! A client talks to the REST API either through a static inbound
//! webhook URL or on behalf of an installed application using an OAuth
//! access/refresh token pair. Token credentials are rotated by the
//! refresh flow and written back through a [`CredentialStore`].

mod file;
mod memory;

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

pub use file::FileCredentialStore;
pub use memory::MemoryCredentialStore;

use std::fmt;
use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Credential used to authorize REST calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Inbound webhook; authorization is embedded in the URL.
    Webhook(Webhook),
    /// OAuth token pair of an installed application.
    Token(TokenUser),
}

impl From<Webhook> for Credential {
    fn from(webhook: Webhook) -> Self {
        Self::Webhook(webhook)
    }
}

impl From<TokenUser> for Credential {
    fn from(user: TokenUser) -> Self {
        Self::Token(user)
    }
}

/// Inbound webhook credential.
///
/// The URL is kept verbatim; it is validated when a request is built so
/// that a malformed value is reported with the original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Webhook {
    url: String,
}

impl Webhook {
    /// Creates a webhook credential from its URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Returns the URL as given.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Parses the URL into a REST endpoint base.
    ///
    /// Only absolute `http`/`https` URLs with a host are accepted. A
    /// trailing `/` is added when missing so method names can be appended.
    /// Returns `None` for anything else.
    #[must_use]
    pub fn endpoint(&self) -> Option<Url> {
        let mut url = Url::parse(self.url.trim()).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        if url.host_str().is_none_or(str::is_empty) {
            return None;
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Some(url)
    }
}

/// OAuth credential of one installed application instance (member).
///
/// `id` is the primary key assigned by the [`CredentialStore`]; a user
/// without one has never been persisted and is rejected before any
/// request is sent.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUser {
    /// Store-assigned primary key.
    #[serde(default)]
    pub id: Option<u64>,
    /// Portal (installation) identifier.
    pub member_id: String,
    /// Portal user the tokens were issued to.
    #[serde(default)]
    pub user_id: Option<u64>,
    /// Whether that user is a portal administrator.
    #[serde(default)]
    pub is_admin: bool,
    /// Current access token.
    pub access_token: String,
    /// Current refresh token.
    pub refresh_token: String,
    /// Access token lifetime in seconds, as last reported by the OAuth server.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Portal domain, e.g. `example.bitrix24.com`.
    pub domain: String,
    /// Application client id.
    pub client_id: String,
    /// Application client secret.
    pub client_secret: String,
}

impl TokenUser {
    /// Creates an unpersisted token credential.
    #[must_use]
    pub fn new(
        member_id: impl Into<String>,
        domain: impl Into<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            member_id: member_id.into(),
            user_id: None,
            is_admin: false,
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_in: None,
            domain: domain.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Placeholder for a member that is not in the store.
    ///
    /// Requests made with it fail with an invalid-credential error.
    #[must_use]
    pub fn unregistered(member_id: impl Into<String>) -> Self {
        Self::new(member_id, "", "", "", "", "")
    }

    /// Sets the primary key.
    #[must_use]
    pub const fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Returns `true` if the credential came from the store.
    #[must_use]
    pub const fn is_registered(&self) -> bool {
        self.id.is_some()
    }

    /// REST endpoint base for this portal: `https://{domain}/rest/`.
    #[must_use]
    pub fn client_endpoint(&self) -> String {
        format!("https://{}/rest/", self.domain)
    }

    /// Replaces the token pair after a successful refresh.
    pub fn rotate(
        &mut self,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in: Option<u64>,
    ) {
        self.access_token = access_token.into();
        self.refresh_token = refresh_token.into();
        if expires_in.is_some() {
            self.expires_in = expires_in;
        }
    }
}

impl fmt::Debug for TokenUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenUser")
            .field("id", &self.id)
            .field("member_id", &self.member_id)
            .field("user_id", &self.user_id)
            .field("is_admin", &self.is_admin)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("domain", &self.domain)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Errors that can occur in credential persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to read the credential file.
    #[error("Failed to read credential store: {0}")]
    Read(#[source] io::Error),

    /// Failed to write the credential file.
    #[error("Failed to write credential store: {0}")]
    Write(#[source] io::Error),

    /// Failed to serialize credentials to JSON.
    #[error("Failed to serialize credentials: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The store exists but its content cannot be used.
    #[error("Credential store is corrupted: {reason}")]
    Corrupted {
        /// Reason for corruption (for logging/debugging).
        reason: String,
    },
}

/// Key-value persistence for token credentials, keyed by member id.
///
/// Implementations assign a primary key on first save and keep it on
/// subsequent saves of the same member.
pub trait CredentialStore: Send + Sync {
    /// Looks up the credential of a member.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn find_by_member_id(&self, member_id: &str) -> Result<Option<TokenUser>, StoreError>;

    /// Inserts or updates a credential and returns the stored record.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential cannot be written.
    fn save(
        &self,
        user: &TokenUser,
    ) -> impl std::future::Future<Output = Result<TokenUser, StoreError>> + Send;

    /// Removes the credential of a member. Returns `true` if one existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn delete_by_member_id(
        &self,
        member_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;
}

impl<T: CredentialStore> CredentialStore for Arc<T> {
    fn find_by_member_id(&self, member_id: &str) -> Result<Option<TokenUser>, StoreError> {
        (**self).find_by_member_id(member_id)
    }

    fn save(
        &self,
        user: &TokenUser,
    ) -> impl std::future::Future<Output = Result<TokenUser, StoreError>> + Send {
        (**self).save(user)
    }

    fn delete_by_member_id(
        &self,
        member_id: &str,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send {
        (**self).delete_by_member_id(member_id)
    }
}
