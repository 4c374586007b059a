//! Pure SPARQL endpoint client.
//!
//! A minimal client for SPARQL 1.1 query endpoints such as the Wikidata Query
//! Service. It issues one `SELECT` query per call and decodes the JSON result
//! set. Retrying, pacing and batching belong to the caller.
//!
//! # Example
//!
//! ```rust,ignore
//! use sparql_client::SparqlClient;
//! use std::time::Duration;
//!
//! let client = SparqlClient::new("https://query.wikidata.org/sparql", "MyBot/1.0");
//!
//! let results = client
//!     .query("SELECT ?item WHERE { ?item wdt:P31 wd:Q146 } LIMIT 5", Duration::from_secs(60))
//!     .await?;
//! for row in results.rows() {
//!     println!("{}", row["item"]);
//! }
//! ```

pub mod error;
pub mod types;

pub use error::{Result, SparqlError};
pub use types::{BindingValue, ResultBindings, ResultHead, SparqlResults};

use std::time::Duration;

/// Public Wikidata Query Service endpoint.
pub const WIKIDATA_ENDPOINT: &str = "https://query.wikidata.org/sparql";

const RESULTS_ACCEPT: &str = "application/sparql-results+json";

#[derive(Clone)]
pub struct SparqlClient {
    client: reqwest::Client,
    endpoint: String,
    user_agent: String,
}

impl SparqlClient {
    pub fn new(endpoint: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            user_agent: user_agent.into(),
        }
    }

    /// Set a custom HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run a `SELECT` query with an explicit deadline.
    ///
    /// The deadline covers the whole exchange including reading the body.
    pub async fn query(&self, sparql: &str, timeout: Duration) -> Result<SparqlResults> {
        tracing::debug!(endpoint = %self.endpoint, timeout_secs = timeout.as_secs(), "SPARQL query");

        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("query", sparql), ("format", "json")])
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .header(reqwest::header::ACCEPT, RESULTS_ACCEPT)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_transport(e, timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SparqlError::Api {
                status: status.as_u16(),
                message: truncate(&body, 300),
            });
        }

        let body = resp.text().await.map_err(|e| map_transport(e, timeout))?;
        serde_json::from_str(&body).map_err(|e| SparqlError::Decode(e.to_string()))
    }
}

fn map_transport(err: reqwest::Error, timeout: Duration) -> SparqlError {
    if err.is_timeout() {
        SparqlError::Timeout {
            seconds: timeout.as_secs(),
        }
    } else {
        SparqlError::Http(err)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
