//! Wire format of REST calls.
//!
//! Single calls send the parameters as a JSON object. Batch calls send
//! each query as a `method?query-string` command, with the query string
//! built the way PHP's `http_build_query` builds it, since that is what
//! the server parses.

use serde_json::{Map, Value};
use url::form_urlencoded::byte_serialize;

use crate::error::{ApiError, ApiResponse};

/// Parameters of a REST call.
pub type Params = Map<String, Value>;

/// One query of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchQuery {
    /// REST method name, e.g. `crm.deal.get`.
    pub method: String,
    /// Method parameters.
    pub params: Params,
}

impl BatchQuery {
    /// Creates a query.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Params) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Query without parameters.
    #[must_use]
    pub fn bare(method: impl Into<String>) -> Self {
        Self::new(method, Params::new())
    }

    /// The `cmd` entry for this query.
    #[must_use]
    pub fn command(&self) -> String {
        format!("{}?{}", self.method, build_query(&self.params))
    }
}

/// Encodes parameters as a PHP-style query string.
///
/// Nested objects become `key[sub]=value`, arrays `key[0]=value`,
/// booleans `1`/`0`. `null` values and empty containers are dropped.
#[must_use]
pub fn build_query(params: &Params) -> String {
    let mut pairs = Vec::new();
    for (key, value) in params {
        flatten(key.clone(), value, &mut pairs);
    }
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn flatten(prefix: String, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push((prefix, if *b { "1" } else { "0" }.to_string())),
        Value::Number(n) => out.push((prefix, n.to_string())),
        Value::String(s) => out.push((prefix, s.clone())),
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                flatten(format!("{prefix}[{index}]"), item, out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                flatten(format!("{prefix}[{key}]"), item, out);
            }
        }
    }
}

fn encode(s: &str) -> String {
    byte_serialize(s.as_bytes()).collect()
}

/// Body of a single call.
#[must_use]
pub fn call_payload(params: &Params, auth: Option<&str>) -> Value {
    let mut body = params.clone();
    if let Some(token) = auth {
        body.insert("auth".to_string(), Value::String(token.to_string()));
    }
    Value::Object(body)
}

/// Body of a batch call.
#[must_use]
pub fn batch_payload(queries: &[BatchQuery], auth: Option<&str>) -> Value {
    let mut body = Params::new();
    body.insert(
        "cmd".to_string(),
        Value::Array(queries.iter().map(|q| Value::String(q.command())).collect()),
    );
    body.insert("halt".to_string(), Value::from(0));
    if let Some(token) = auth {
        body.insert("auth".to_string(), Value::String(token.to_string()));
    }
    Value::Object(body)
}

/// Decodes a response body.
///
/// Bodies that carry no object (blank, not JSON, `null`, `[]`) decode to
/// an empty response so the empty-response rule can deal with them.
///
/// # Errors
///
/// Returns [`ApiError::UnexpectedResponse`] for any other non-object
/// JSON value.
pub fn decode(body: &[u8]) -> Result<ApiResponse, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ApiResponse::new());
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(ApiResponse::new()),
        Ok(Value::Array(items)) if items.is_empty() => Ok(ApiResponse::new()),
        Ok(other) => Err(ApiError::UnexpectedResponse(other.to_string())),
        Err(e) => {
            tracing::debug!("Response body is not JSON ({e}), treating it as empty");
            Ok(ApiResponse::new())
        }
    }
}
