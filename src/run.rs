//! Application execution logic.
//!
//! This module runs one subcommand against the REST API and prints the
//! result as JSON on stdout.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::signal;

use b24_client::batch::Listing;
use b24_client::client::ApiClient;
use b24_client::config::{Command, ConnectionTarget, ValidatedConfig};
use b24_client::credential::{
    Credential, CredentialStore, FileCredentialStore, StoreError, TokenUser,
};
use b24_client::dispatch::{BatchQuery, Params};
use b24_client::error::ApiError;
use b24_client::install::{InstallRequest, register_member};
use b24_client::time::TokioSleeper;
use b24_client::transport::{HttpClient, ReqwestClient};

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;

/// Error type for runtime execution failures.
#[derive(Debug, Error)]
pub enum RunError {
    /// A command argument is not valid JSON.
    #[error("Invalid JSON in {what}: {source}")]
    InvalidJson {
        /// Which argument
        what: &'static str,
        /// Underlying parse error
        #[source]
        source: serde_json::Error,
    },

    /// The command needs a setting the configuration does not provide.
    #[error("Missing setting for {command}: {setting}")]
    MissingSetting {
        /// Subcommand name
        command: &'static str,
        /// Setting name
        setting: &'static str,
    },

    /// Failed to read the credential store.
    #[error("Failed to load credentials: {0}")]
    Store(#[from] StoreError),

    /// The API call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Failed to render the result.
    #[error("Failed to render output: {0}")]
    Output(#[source] serde_json::Error),

    /// Ctrl+C or SIGTERM arrived before the command finished.
    #[error("Interrupted before the command finished")]
    Interrupted,
}

/// One entry of the `batch` subcommand's query list.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct QuerySpec {
    method: String,
    #[serde(default)]
    params: Params,
}

/// Executes a subcommand.
///
/// Stops early with [`RunError::Interrupted`] on a shutdown signal.
///
/// # Errors
///
/// Returns an error if:
/// - A JSON argument is malformed
/// - The credential store cannot be read
/// - The API call fails after recovery
///
/// # Coverage Note
///
/// This function is excluded from coverage because it requires network
/// access and signal handling.
#[cfg(not(tarpaulin_include))]
pub async fn execute(config: ValidatedConfig, command: Command) -> Result<(), RunError> {
    let http = ReqwestClient::with_timeout(config.timeout);
    let store = Arc::new(FileCredentialStore::new(config.store_path.clone()));
    tracing::debug!("Credential store: {}", store.path().display());

    let output = tokio::select! {
        biased;

        () = shutdown_signal() => {
            tracing::warn!("Shutdown signal received, abandoning command");
            return Err(RunError::Interrupted);
        }

        result = run_command(&config, command, http, store) => result?,
    };

    if let Some(output) = output {
        let text = serde_json::to_string_pretty(&output).map_err(RunError::Output)?;
        println!("{text}");
    }
    Ok(())
}

/// Runs a subcommand and returns what should be printed.
async fn run_command<H, St>(
    config: &ValidatedConfig,
    command: Command,
    http: H,
    store: St,
) -> Result<Option<Value>, RunError>
where
    H: HttpClient + Clone,
    St: CredentialStore + Clone,
{
    match command {
        Command::Init { .. } => Ok(None),
        Command::Install {
            domain,
            access_token,
            refresh_token,
            expires_in,
        } => {
            let request = install_request(config, domain, access_token, refresh_token, expires_in)?;
            let user = register_member(http, TokioSleeper, &store, request, &config.policy).await?;
            Ok(Some(user_summary(&user)))
        }
        Command::Call { method, params } => {
            let params = parse_params(params.as_deref())?;
            let client = build_client(config, http, store)?;
            let response = client.call(&method, &params).await?;
            Ok(Some(Value::Object(response)))
        }
        Command::Batch { queries } => {
            let queries = parse_queries(&queries)?;
            let client = build_client(config, http, store)?;
            let results = client
                .batch()
                .with_request_limit(config.request_limit)
                .call(&queries)
                .await?;
            Ok(Some(Value::Array(results)))
        }
        Command::GetAll { method, params } => {
            let params = parse_params(params.as_deref())?;
            let client = build_client(config, http, store)?;
            let listing = client
                .batch()
                .with_request_limit(config.request_limit)
                .with_page_size(config.page_size)
                .get_all(&method, &params)
                .await?;
            match listing {
                Listing::Items(items) => {
                    tracing::info!("Fetched {} row(s) from {method}", items.len());
                    Ok(Some(Value::Array(items)))
                }
                Listing::Failed(response) => Err(ApiError::Api { response }.into()),
            }
        }
    }
}

/// Builds the client for the configured connection.
fn build_client<H, St>(
    config: &ValidatedConfig,
    http: H,
    store: St,
) -> Result<ApiClient<H, St>, RunError>
where
    H: HttpClient + Clone,
    St: CredentialStore + Clone,
{
    let target = config
        .connection
        .as_ref()
        .ok_or(RunError::MissingSetting {
            command: "api call",
            setting: "connection",
        })?;
    let credential = resolve_credential(&store, target)?;

    let mut builder = ApiClient::builder(http, store).with_policy(config.policy.clone());
    if let Some(url) = &config.token_url {
        builder = builder.with_token_url(url.clone());
    }

    let client = builder.build(credential);
    tracing::debug!("Connected via {}", client.connection_kind());
    Ok(client)
}

/// Turns the configured target into a credential.
///
/// An unknown member yields an unregistered credential; the first call
/// then fails with an invalid-credential error.
fn resolve_credential(
    store: &impl CredentialStore,
    target: &ConnectionTarget,
) -> Result<Credential, RunError> {
    match target {
        ConnectionTarget::Webhook(webhook) => Ok(Credential::Webhook(webhook.clone())),
        ConnectionTarget::Member(member_id) => {
            let user = store.find_by_member_id(member_id)?.unwrap_or_else(|| {
                tracing::warn!("Member {member_id} is not in the credential store");
                TokenUser::unregistered(member_id.as_str())
            });
            Ok(Credential::Token(user))
        }
    }
}

fn install_request(
    config: &ValidatedConfig,
    domain: String,
    access_token: String,
    refresh_token: String,
    expires_in: Option<u64>,
) -> Result<InstallRequest, RunError> {
    let missing = |setting| RunError::MissingSetting {
        command: "install",
        setting,
    };
    let Some(ConnectionTarget::Member(member_id)) = &config.connection else {
        return Err(missing("member_id"));
    };
    let client_id = config.client_id.clone().ok_or_else(|| missing("client_id"))?;
    let client_secret = config
        .client_secret
        .clone()
        .ok_or_else(|| missing("client_secret"))?;

    Ok(InstallRequest {
        member_id: member_id.clone(),
        domain,
        access_token,
        refresh_token,
        expires_in,
        client_id,
        client_secret,
    })
}

/// Public fields of a stored credential.
fn user_summary(user: &TokenUser) -> Value {
    serde_json::json!({
        "id": user.id,
        "member_id": user.member_id,
        "domain": user.domain,
        "user_id": user.user_id,
        "is_admin": user.is_admin,
    })
}

/// Parses `--params`; absent means no parameters.
fn parse_params(raw: Option<&str>) -> Result<Params, RunError> {
    let Some(raw) = raw else {
        return Ok(Params::new());
    };
    serde_json::from_str(raw).map_err(|source| RunError::InvalidJson {
        what: "--params",
        source,
    })
}

/// Parses the `batch` query list.
fn parse_queries(raw: &str) -> Result<Vec<BatchQuery>, RunError> {
    let specs: Vec<QuerySpec> =
        serde_json::from_str(raw).map_err(|source| RunError::InvalidJson {
            what: "batch queries",
            source,
        })?;
    Ok(specs
        .into_iter()
        .map(|spec| BatchQuery::new(spec.method, spec.params))
        .collect())
}

/// Returns a future that completes when a shutdown signal is received.
///
/// Excluded from coverage - requires OS signal handling.
#[cfg(not(tarpaulin_include))]
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
