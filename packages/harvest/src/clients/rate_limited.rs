//! Request budget wrapper.
//!
//! Wraps any [`QueryClient`] with a token bucket from the governor crate, so
//! all workers sharing the wrapper together stay under a per-minute budget.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CallResult;
use crate::traits::client::{QueryClient, QueryRequest, QueryResults};

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// A query client that waits for a permit before every call.
///
/// The wait happens before the call's own deadline starts, so the timeout
/// still bounds only the remote exchange.
pub struct RateLimitedClient<C: QueryClient> {
    inner: C,
    limiter: Arc<DefaultRateLimiter>,
}

impl<C: QueryClient> RateLimitedClient<C> {
    /// Allow `requests_per_minute` calls per minute, without bursts.
    ///
    /// Zero is treated as one.
    pub fn per_minute(client: C, requests_per_minute: u32) -> Self {
        let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(nonzero!(1u32));
        Self::with_quota(client, Quota::per_minute(rpm))
    }

    /// Create with a custom quota.
    pub fn with_quota(client: C, quota: Quota) -> Self {
        Self {
            inner: client,
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: QueryClient> QueryClient for RateLimitedClient<C> {
    async fn call(&self, request: &QueryRequest, timeout: Duration) -> CallResult<QueryResults> {
        self.limiter.until_ready().await;
        self.inner.call(request, timeout).await
    }
}

/// Extension trait for easy rate limiting.
pub trait QueryClientExt: QueryClient + Sized {
    fn rate_limited(self, requests_per_minute: u32) -> RateLimitedClient<Self> {
        RateLimitedClient::per_minute(self, requests_per_minute)
    }
}

impl<C: QueryClient + Sized> QueryClientExt for C {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockQueryClient;
    use std::time::Instant;

    #[tokio::test]
    async fn test_rate_limiting() {
        let mock = MockQueryClient::new();
        // 2 per second, no burst
        let client = RateLimitedClient::with_quota(mock, Quota::per_second(nonzero!(2u32)));
        let req = QueryRequest::new("probe", "SELECT");

        let start = Instant::now();
        for _ in 0..3 {
            client.call(&req, Duration::from_secs(1)).await.unwrap();
        }
        let elapsed = start.elapsed();

        assert_eq!(client.inner().calls().len(), 3);
        // First is immediate, 2nd and 3rd wait
        assert!(elapsed.as_millis() >= 400, "rate limiting not applied: {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_extension_trait_passes_through() {
        let client = MockQueryClient::new().rate_limited(60);
        let req = QueryRequest::new("probe", "SELECT");

        let res = client.call(&req, Duration::from_secs(1)).await.unwrap();
        assert!(res.is_empty());
        assert_eq!(client.inner().calls()[0].label, "probe");
    }

    #[test]
    fn test_zero_budget_is_clamped() {
        let client = RateLimitedClient::per_minute(MockQueryClient::new(), 0);
        assert!(client.inner().calls().is_empty());
    }
}
