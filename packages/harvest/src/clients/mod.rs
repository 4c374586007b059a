//! Query client implementations.

pub mod rate_limited;
#[cfg(feature = "sparql")]
pub mod sparql;

pub use rate_limited::{QueryClientExt, RateLimitedClient};
#[cfg(feature = "sparql")]
pub use sparql::SparqlQueryClient;
