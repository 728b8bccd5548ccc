//! Transport layer for talking to the REST endpoint.
//!
//! This module provides types and traits for:
//! - Building HTTP requests ([`HttpRequest`])
//! - Handling HTTP responses ([`HttpResponse`])
//! - Abstracting HTTP clients ([`HttpClient`])
//! - Production HTTP client implementation ([`ReqwestClient`])

mod client;
mod error;
mod http;

#[cfg(test)]
mod client_tests;

pub use client::ReqwestClient;
pub use error::HttpError;
pub use http::{HttpClient, HttpRequest, HttpResponse, USER_AGENT};

/// Scripted HTTP client for tests.
///
/// Returns queued responses in order and records every request it sees,
/// so tests can assert on both the wire payload and the call count.
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// A mock implementation of [`HttpClient`] backed by a response queue.
    #[derive(Debug, Default)]
    pub struct ScriptedClient {
        responses: Mutex<VecDeque<Result<HttpResponse, HttpError>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedClient {
        /// Creates a client that answers with the given JSON bodies, in order.
        #[must_use]
        pub fn with_json(bodies: Vec<serde_json::Value>) -> Self {
            let client = Self::default();
            for body in bodies {
                client.push_json(body);
            }
            client
        }

        /// Queues a `200 OK` response carrying the given JSON body.
        pub fn push_json(&self, body: serde_json::Value) {
            self.push_raw(body.to_string().into_bytes());
        }

        /// Queues a `200 OK` response carrying the given raw body.
        pub fn push_raw(&self, body: Vec<u8>) {
            self.responses.lock().unwrap().push_back(Ok(HttpResponse::new(
                ::http::StatusCode::OK,
                ::http::HeaderMap::new(),
                body,
            )));
        }

        /// Queues a transport failure.
        pub fn push_error(&self, error: HttpError) {
            self.responses.lock().unwrap().push_back(Err(error));
        }

        /// Number of requests received so far.
        #[must_use]
        pub fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        /// All captured requests, in order.
        #[must_use]
        pub fn captured_requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }

        /// The JSON body of the n-th captured request.
        #[must_use]
        pub fn json_body(&self, index: usize) -> serde_json::Value {
            let requests = self.requests.lock().unwrap();
            let body = requests[index].body.as_deref().unwrap_or_default();
            serde_json::from_slice(body).unwrap()
        }
    }

    impl HttpClient for ScriptedClient {
        async fn request(&self, req: HttpRequest) -> Result<HttpResponse, HttpError> {
            self.requests.lock().unwrap().push(req);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("ScriptedClient ran out of responses")
        }
    }
}
