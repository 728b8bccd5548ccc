//! b24-client: Bitrix24 REST API client
//!
//! A library for calling the Bitrix24 REST API through an inbound webhook
//! or on behalf of an installed application, with automatic recovery from
//! rate limits, empty responses and expired tokens, and batch aggregation
//! of large requests.
//!
//! # Layers
//!
//! - [`transport`]: pluggable HTTP POST capability
//! - [`classifier`]: ordered error handlers deciding retry, refresh or fail
//! - [`refresh`]: OAuth token refresh with single-flight rotation
//! - [`dispatch`]: webhook and token connectors running the recovery loop
//! - [`client`]: the [`ApiClient`] facade
//! - [`batch`]: splitting and merging batch envelopes
//! - [`credential`]: credentials and their persistence
//! - [`install`]: registering an application installation

pub mod batch;
pub mod classifier;
pub mod client;
pub mod config;
pub mod credential;
pub mod dispatch;
pub mod error;
pub mod install;
pub mod refresh;
pub mod time;
pub mod transport;

pub use client::{ApiClient, ConnectionKind, RestApi};
pub use credential::{Credential, TokenUser, Webhook};
pub use error::{ApiError, ApiResponse, RefreshTokenError};
