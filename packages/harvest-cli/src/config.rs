use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;

/// Runner configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub sparql_endpoint: String,
    pub user_agent: String,
    pub output_dir: PathBuf,
    /// Request budget across all workers; unlimited if unset
    pub requests_per_minute: Option<u32>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        Self::from_vars(|key| env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let requests_per_minute = match var("HARVEST_REQUESTS_PER_MINUTE") {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u32>()
                    .context("HARVEST_REQUESTS_PER_MINUTE must be a positive number")?,
            )
            .filter(|rpm| *rpm > 0),
            None => None,
        };

        Ok(Self {
            sparql_endpoint: var("HARVEST_SPARQL_ENDPOINT")
                .unwrap_or_else(|| sparql_client::WIKIDATA_ENDPOINT.to_string()),
            user_agent: var("HARVEST_USER_AGENT")
                .unwrap_or_else(|| format!("harvest/{}", env!("CARGO_PKG_VERSION"))),
            output_dir: var("HARVEST_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            requests_per_minute,
        })
    }
}
