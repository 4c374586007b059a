//! Testing utilities including mock implementations.

use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::CallResult;
use crate::traits::client::{QueryClient, QueryRequest, QueryResults, Row};
use crate::traits::sleeper::Sleeper;

type Handler = dyn Fn(&QueryRequest) -> CallResult<QueryResults> + Send + Sync;

/// A mock query client for testing.
///
/// Answers are produced by a script closure; without one every call succeeds
/// with no rows. Every request is logged.
#[derive(Clone)]
pub struct MockQueryClient {
    handler: Option<Arc<Handler>>,

    /// Simulated latency per call
    delay: Duration,

    /// Call tracking
    calls: Arc<RwLock<Vec<QueryRequest>>>,
}

impl Default for MockQueryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockQueryClient {
    pub fn new() -> Self {
        Self {
            handler: None,
            delay: Duration::ZERO,
            calls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Script every answer.
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&QueryRequest) -> CallResult<QueryResults> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<QueryRequest> {
        self.calls.read().unwrap().clone()
    }

    /// Calls whose label starts with `prefix`.
    pub fn calls_for(&self, prefix: &str) -> Vec<QueryRequest> {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.label.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl QueryClient for MockQueryClient {
    async fn call(&self, request: &QueryRequest, _timeout: Duration) -> CallResult<QueryResults> {
        self.calls.write().unwrap().push(request.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.handler {
            Some(handler) => handler(request),
            None => Ok(QueryResults::default()),
        }
    }
}

/// A sleeper that records requested waits and returns at once.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    sleeps: RwLock<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.read().unwrap().clone()
    }

    pub fn total(&self) -> Duration {
        self.sleeps.read().unwrap().iter().sum()
    }

    /// How many recorded sleeps equal `duration`.
    pub fn count(&self, duration: Duration) -> usize {
        self.sleeps
            .read()
            .unwrap()
            .iter()
            .filter(|d| **d == duration)
            .count()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.write().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}

/// Build a result row from pairs.
pub fn row(pairs: &[(&str, &str)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Rows of `entity`/`entityLabel` pairs for the given ids.
pub fn entity_rows<'a>(ids: impl IntoIterator<Item = &'a str>) -> QueryResults {
    QueryResults::new(
        ids.into_iter()
            .map(|id| {
                let uri = format!("http://www.wikidata.org/entity/{}", id);
                let label = format!("Label {}", id);
                row(&[("entity", uri.as_str()), ("entityLabel", label.as_str())])
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Failure;

    #[tokio::test]
    async fn test_mock_client_default_is_empty() {
        let client = MockQueryClient::new();
        let res = client
            .call(&QueryRequest::new("branch:all", "SELECT"), Duration::from_secs(1))
            .await
            .unwrap();

        assert!(res.is_empty());
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_client_scripted() {
        let client = MockQueryClient::new().with_handler(|req| {
            if req.label.starts_with("detail:") {
                Err(Failure::Timeout("slow".into()))
            } else {
                Ok(entity_rows(["Q1", "Q2"]))
            }
        });

        let ok = client
            .call(&QueryRequest::new("branch:all", "SELECT"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(ok.len(), 2);

        let err = client
            .call(&QueryRequest::new("detail:locations", "SELECT"), Duration::from_secs(1))
            .await;
        assert!(err.is_err());
        assert_eq!(client.calls_for("detail:").len(), 1);
    }

    #[tokio::test]
    async fn test_recording_sleeper() {
        let sleeper = RecordingSleeper::new();
        sleeper.sleep(Duration::from_secs(5)).await;
        sleeper.sleep(Duration::from_secs(10)).await;

        assert_eq!(sleeper.total(), Duration::from_secs(15));
        assert_eq!(sleeper.count(Duration::from_secs(5)), 1);
    }
}
