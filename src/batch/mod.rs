//! Batch aggregation over the 50-command envelope limit.
//!
//! [`BatchAggregator::call`] runs any number of queries, split into
//! envelopes of at most `request_limit` commands, and returns one entry
//! per query in submission order. [`BatchAggregator::get_all`] pages
//! through a list method and returns every row.

mod shape;


pub use shape::{ResponseShape, ShapeRegistry};

use serde_json::Value;

use crate::client::RestApi;
use crate::dispatch::{BatchQuery, Params};
use crate::error::{ApiError, ApiResponse};

/// Outcome of [`BatchAggregator::get_all`].
#[derive(Debug, Clone, PartialEq)]
pub enum Listing {
    /// Every row, in page order.
    Items(Vec<Value>),
    /// The priming call answered with an error; the response is returned as is.
    Failed(ApiResponse),
}

impl Listing {
    /// Rows, or `None` for a failed listing.
    #[must_use]
    pub fn into_items(self) -> Option<Vec<Value>> {
        match self {
            Self::Items(items) => Some(items),
            Self::Failed(_) => None,
        }
    }
}

/// Splits work into batch envelopes and merges the answers.
#[derive(Debug)]
pub struct BatchAggregator<'a, A> {
    api: &'a A,
    shapes: ShapeRegistry,
    request_limit: usize,
    page_size: usize,
}

impl<'a, A> BatchAggregator<'a, A> {
    /// Commands per envelope accepted by the server.
    pub const DEFAULT_REQUEST_LIMIT: usize = 50;

    /// Rows per page returned by list methods.
    pub const DEFAULT_PAGE_SIZE: usize = 50;

    /// Aggregator with default limits and shapes.
    #[must_use]
    pub fn new(api: &'a A) -> Self {
        Self {
            api,
            shapes: ShapeRegistry::default(),
            request_limit: Self::DEFAULT_REQUEST_LIMIT,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }

    /// Replaces the shape registry.
    #[must_use]
    pub fn with_shapes(mut self, shapes: ShapeRegistry) -> Self {
        self.shapes = shapes;
        self
    }

    /// Sets the number of commands per envelope.
    ///
    /// # Panics
    ///
    /// Panics if `limit` is 0.
    #[must_use]
    pub fn with_request_limit(mut self, limit: usize) -> Self {
        assert!(limit >= 1, "request_limit must be at least 1");
        self.request_limit = limit;
        self
    }

    /// Sets the page size of list methods.
    ///
    /// # Panics
    ///
    /// Panics if `size` is 0.
    #[must_use]
    pub fn with_page_size(mut self, size: usize) -> Self {
        assert!(size >= 1, "page_size must be at least 1");
        self.page_size = size;
        self
    }
}

impl<A: RestApi> BatchAggregator<'_, A> {
    /// Fetches every row of a list method.
    ///
    /// A first call reads `total`. Small listings are served from that
    /// page; larger ones are fetched again page by page (`start` offsets)
    /// through batch envelopes. A response without `total` is treated as
    /// a single page. Paging stops early once an envelope yields no rows.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::BatchItem`] if a page query fails, or any error
    /// raised by the underlying calls.
    pub async fn get_all(&self, list_method: &str, params: &Params) -> Result<Listing, ApiError> {
        let first = self.api.call(list_method, params).await?;
        if first.contains_key("error") {
            return Ok(Listing::Failed(first));
        }

        let result = first.get("result").unwrap_or(&Value::Null);
        let Some(total) = first.get("total").and_then(Value::as_u64) else {
            return Ok(Listing::Items(self.shapes.rows(list_method, result)));
        };
        let total = usize::try_from(total).unwrap_or(usize::MAX);
        if total == 0 {
            return Ok(Listing::Items(Vec::new()));
        }
        if total <= self.page_size {
            return Ok(Listing::Items(self.shapes.rows(list_method, result)));
        }

        let pages = total.div_ceil(self.page_size);
        tracing::debug!("Fetching {total} rows of {list_method} in {pages} pages");

        let mut items = Vec::new();
        let mut first_page = 0;
        while first_page < pages {
            let last_page = first_page.saturating_add(self.request_limit).min(pages);
            let chunk: Vec<BatchQuery> = (first_page..last_page)
                .map(|page| {
                    let mut page_params = params.clone();
                    let start = page.saturating_mul(self.page_size);
                    page_params.insert("start".to_string(), Value::from(start));
                    BatchQuery::new(list_method, page_params)
                })
                .collect();

            let response = self.api.call_batch(&chunk).await?;
            if response.contains_key("error") {
                return Ok(Listing::Failed(response));
            }
            let mut fetched = 0;
            for (index, entry) in entries(&response, chunk.len()).into_iter().enumerate() {
                match entry {
                    Entry::Result(page) => {
                        let rows = self.shapes.rows(list_method, &page);
                        fetched += rows.len();
                        items.extend(rows);
                    }
                    Entry::Error(error) => {
                        return Err(ApiError::BatchItem {
                            index: first_page + index,
                            error,
                        });
                    }
                }
            }
            if fetched == 0 {
                tracing::warn!(
                    "{list_method} returned no rows at page {first_page} of {pages}, stopping"
                );
                break;
            }
            first_page = last_page;
        }

        Ok(Listing::Items(items))
    }

    /// Runs any number of queries.
    ///
    /// Returns one value per query, in submission order: the query's
    /// result, unwrapped according to its declared shape, or its
    /// `result_error` entry.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Api`] if an envelope answers with a top-level
    /// `error`, or any error raised by the underlying batch calls.
    pub async fn call(&self, queries: &[BatchQuery]) -> Result<Vec<Value>, ApiError> {
        let mut merged = Vec::with_capacity(queries.len());
        for chunk in queries.chunks(self.request_limit) {
            let response = self.api.call_batch(chunk).await?;
            if response.contains_key("error") {
                return Err(ApiError::Api { response });
            }
            for (query, entry) in chunk.iter().zip(entries(&response, chunk.len())) {
                merged.push(match entry {
                    Entry::Result(value) => self.shapes.unwrap(&query.method, value),
                    Entry::Error(error) => error,
                });
            }
        }
        Ok(merged)
    }
}

/// Outcome of one command inside an envelope.
#[derive(Debug)]
enum Entry {
    Result(Value),
    Error(Value),
}

/// Per-command outcomes of a batch response, by position.
///
/// The server keys `result` and `result_error` either as arrays or as
/// objects with stringified indices.
fn entries(response: &ApiResponse, count: usize) -> Vec<Entry> {
    let envelope = response.get("result");
    let results = envelope.and_then(|e| e.get("result"));
    let errors = envelope.and_then(|e| e.get("result_error"));

    (0..count)
        .map(|i| {
            if let Some(value) = at(results, i) {
                Entry::Result(value.clone())
            } else if let Some(error) = at(errors, i) {
                Entry::Error(error.clone())
            } else {
                Entry::Result(Value::Null)
            }
        })
        .collect()
}

fn at(container: Option<&Value>, index: usize) -> Option<&Value> {
    let value = match container? {
        Value::Array(items) => items.get(index),
        Value::Object(map) => map.get(&index.to_string()),
        _ => None,
    }?;
    (!value.is_null()).then_some(value)
}
