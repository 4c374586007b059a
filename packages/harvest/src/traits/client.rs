//! The remote query service as seen by the engine.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::CallResult;

/// One flattened result row: variable name to value.
pub type Row = HashMap<String, String>;

/// A fully rendered query plus the paging parameters it was rendered with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub query: String,
    /// What the request is for, used in logs (`"branch:agencies"`, `"detail:locations"`)
    pub label: String,
    pub limit: usize,
    pub offset: usize,
}

impl QueryRequest {
    pub fn new(label: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            label: label.into(),
            limit: 0,
            offset: 0,
        }
    }

    pub fn with_page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}

/// Rows returned by a successful call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResults {
    pub rows: Vec<Row>,
}

impl QueryResults {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Issues one query with a deadline and classifies the outcome.
///
/// Implementations never sleep or retry; that belongs to the caller.
#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn call(&self, request: &QueryRequest, timeout: Duration) -> CallResult<QueryResults>;
}

#[async_trait]
impl<C: QueryClient + ?Sized> QueryClient for std::sync::Arc<C> {
    async fn call(&self, request: &QueryRequest, timeout: Duration) -> CallResult<QueryResults> {
        (**self).call(request, timeout).await
    }
}
