//! [`QueryClient`] over a SPARQL endpoint.

use async_trait::async_trait;
use sparql_client::{SparqlClient, SparqlError};
use std::time::Duration;

use crate::error::{CallResult, Failure};
use crate::traits::client::{QueryClient, QueryRequest, QueryResults};

/// Adapts [`SparqlClient`] to the engine, classifying every error into a
/// [`Failure`] kind.
#[derive(Clone)]
pub struct SparqlQueryClient {
    client: SparqlClient,
}

impl SparqlQueryClient {
    pub fn new(client: SparqlClient) -> Self {
        Self { client }
    }

    pub fn endpoint(&self) -> &str {
        self.client.endpoint()
    }
}

#[async_trait]
impl QueryClient for SparqlQueryClient {
    async fn call(&self, request: &QueryRequest, timeout: Duration) -> CallResult<QueryResults> {
        tracing::debug!(
            label = %request.label,
            limit = request.limit,
            offset = request.offset,
            "Issuing query"
        );

        let results = self
            .client
            .query(&request.query, timeout)
            .await
            .map_err(classify)?;

        Ok(QueryResults::new(results.rows()))
    }
}

/// Map a transport error onto the failure taxonomy.
///
/// 5xx and 429 are load-related; other 4xx mean the query itself is wrong.
/// A body that cannot be read or decoded after a 2xx is treated as a
/// truncated response under load.
pub fn classify(err: SparqlError) -> Failure {
    match err {
        SparqlError::Timeout { .. } => Failure::Timeout(err.to_string()),
        SparqlError::Api { status, .. } if status >= 500 || status == 429 => {
            Failure::ServerError(err.to_string())
        }
        SparqlError::Api { .. } => Failure::ClientError(err.to_string()),
        SparqlError::Decode(_) => Failure::ServerError(err.to_string()),
        SparqlError::Http(ref e) if e.is_timeout() => Failure::Timeout(err.to_string()),
        SparqlError::Http(ref e) if e.is_body() || e.is_decode() => {
            Failure::ServerError(err.to_string())
        }
        SparqlError::Http(_) => Failure::NetworkError(err.to_string()),
    }
}
