//! Per-entity enrichment through secondary detail queries.
//!
//! Each detail query is retried on its own. When one gives up, only the
//! attributes it feeds stay empty; the record is kept.

use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{HarvestError, Result};
use crate::retry::{AdaptiveRetryPolicy, RetryOutcome};
use crate::traits::client::{QueryClient, QueryRequest, QueryResults};
use crate::types::profile::{DetailQuery, FieldKind, JobProfile};
use crate::types::record::{EnrichedRecord, RawRecord};

lazy_static! {
    /// Bare entity, property or lexeme identifiers (`Q42`, `P31`, `L7`).
    static ref BARE_ID: Regex = Regex::new(r"^[QPL]\d+$").unwrap();
}

/// Whether `value` is a human-readable label rather than an unresolved
/// reference.
///
/// Label services fall back to the raw identifier when an entity has no
/// label in the requested language; such values, and raw entity URIs, must
/// never be stored as labels.
pub fn is_resolved_label(value: &str) -> bool {
    let value = value.trim();
    if value.is_empty() || BARE_ID.is_match(value) {
        return false;
    }
    !is_entity_uri(value)
}

fn is_entity_uri(value: &str) -> bool {
    let Ok(uri) = url::Url::parse(value) else {
        return false;
    };
    if !matches!(uri.scheme(), "http" | "https") {
        return false;
    }
    uri.path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(|last| BARE_ID.is_match(last))
        .unwrap_or(false)
}

/// `+1998-04-01T00:00:00Z` becomes `1998-04-01`.
pub fn normalize_date(value: &str) -> String {
    let value = value.trim().trim_start_matches('+');
    match value.split_once('T') {
        Some((date, _)) => date.to_string(),
        None => value.to_string(),
    }
}

/// Runs a profile's detail queries for one entity at a time.
#[derive(Clone)]
pub struct DetailEnricher {
    client: Arc<dyn QueryClient>,
    policy: AdaptiveRetryPolicy,
    profile: Arc<JobProfile>,
    timeout: Duration,
}

impl DetailEnricher {
    pub fn new(
        client: Arc<dyn QueryClient>,
        policy: AdaptiveRetryPolicy,
        profile: Arc<JobProfile>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            policy,
            profile,
            timeout,
        }
    }

    /// Enrich one record.
    ///
    /// Only `Interrupted` escapes; every other failure degrades the affected
    /// attributes and is listed in [`EnrichedRecord::incomplete`].
    pub async fn enrich(&self, raw: &RawRecord, cancel: &CancellationToken) -> Result<EnrichedRecord> {
        let mut record = EnrichedRecord::from_raw(raw);

        for detail in &self.profile.details {
            for target in detail.list_targets() {
                record.declare_attribute(target);
            }

            match self.run_detail(detail, &raw.external_id, cancel).await {
                Ok(Some(results)) => apply(&mut record, detail, &results),
                Ok(None) => record.incomplete.push(detail.name.clone()),
                Err(HarvestError::Rejected(failure)) => {
                    tracing::warn!(
                        entity = %raw.external_id,
                        detail = %detail.name,
                        error = %failure,
                        "Detail query rejected, leaving its attributes empty"
                    );
                    record.incomplete.push(detail.name.clone());
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(span) = &self.profile.span {
            if let Some(start) = record.scalar(&span.start).map(str::to_string) {
                let end = record.scalar(&span.end).unwrap_or("present").to_string();
                record.set_scalar_once(&span.target, &format!("{} - {}", start, end));
            }
        }

        tracing::debug!(
            entity = %record.id,
            data_points = record.data_points(),
            incomplete = record.incomplete.len(),
            "Enriched entity"
        );

        Ok(record)
    }

    async fn run_detail(
        &self,
        detail: &DetailQuery,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<QueryResults>> {
        let label = format!("detail:{}", detail.name);
        let client = &self.client;
        let timeout = self.timeout;

        let outcome = self
            .policy
            .run(&label, self.profile.detail_limit, cancel, |limit| {
                let request = QueryRequest::new(label.clone(), detail.render(id, limit)).with_page(limit, 0);
                async move { client.call(&request, timeout).await }
            })
            .await?;

        match outcome {
            RetryOutcome::Succeeded { value, .. } => Ok(Some(value)),
            RetryOutcome::Exhausted {
                attempts,
                last_failure,
            } => {
                tracing::warn!(
                    entity = %id,
                    detail = %detail.name,
                    attempts,
                    error = %last_failure,
                    "Detail query exhausted retries, leaving its attributes empty"
                );
                Ok(None)
            }
        }
    }
}

fn apply(record: &mut EnrichedRecord, detail: &DetailQuery, results: &QueryResults) {
    for row in &results.rows {
        for field in &detail.fields {
            let Some(value) = row.get(&field.variable) else {
                continue;
            };
            match field.kind {
                FieldKind::List => {
                    if !is_resolved_label(value) {
                        continue;
                    }
                    match &field.prefix {
                        Some(prefix) => record.add_label(&field.target, &format!("{}{}", prefix, value.trim())),
                        None => record.add_label(&field.target, value),
                    };
                }
                FieldKind::Scalar => {
                    record.set_scalar_once(&field.target, value);
                }
                FieldKind::Date => {
                    record.set_scalar_once(&field.target, &normalize_date(value));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Failure;
    use crate::testing::{row, MockQueryClient, RecordingSleeper};
    use crate::types::config::RetryConfig;
    use crate::types::profile::{BranchQuery, FieldMapping};

    fn profile() -> JobProfile {
        JobProfile::new("agencies")
            .branch(BranchQuery::new("all", "LIMIT {limit} OFFSET {offset}"))
            .detail(
                DetailQuery::new("basic", "basic {id} LIMIT {limit}")
                    .field(FieldMapping::list("serviceTypeLabel", "service_types"))
                    .field(FieldMapping::date("foundingDate", "founded"))
                    .field(FieldMapping::date("dissolutionDate", "dissolved"))
                    .field(FieldMapping::scalar("website", "website")),
            )
            .detail(
                DetailQuery::new("locations", "locations {id}")
                    .field(FieldMapping::list("locationLabel", "locations")),
            )
            .detail(
                DetailQuery::new("awards", "awards {id}")
                    .field(FieldMapping::list("awardLabel", "awards").with_prefix("Award: ")),
            )
            .with_span("years_active", "founded", "dissolved")
    }

    fn enricher(client: MockQueryClient, profile: JobProfile) -> DetailEnricher {
        let policy = AdaptiveRetryPolicy::new(RetryConfig::detail())
            .with_sleeper(Arc::new(RecordingSleeper::new()));
        DetailEnricher::new(Arc::new(client), policy, Arc::new(profile), Duration::from_secs(60))
    }

    fn results(rows: Vec<crate::traits::client::Row>) -> QueryResults {
        QueryResults::new(rows)
    }

    #[test]
    fn test_is_resolved_label() {
        assert!(is_resolved_label("Paris"));
        assert!(is_resolved_label("Q-Tip"));
        assert!(is_resolved_label("Queen"));
        assert!(!is_resolved_label("Q90"));
        assert!(!is_resolved_label("P31"));
        assert!(!is_resolved_label("L7"));
        assert!(!is_resolved_label("  "));
        assert!(!is_resolved_label("http://www.wikidata.org/entity/Q90"));
        assert!(is_resolved_label("https://example.com/about"));
    }

    #[test]
    fn test_normalize_date() {
        assert_eq!(normalize_date("+1998-04-01T00:00:00Z"), "1998-04-01");
        assert_eq!(normalize_date("2001-02-03"), "2001-02-03");
    }

    #[tokio::test]
    async fn test_enrich_merges_fields() {
        let client = MockQueryClient::new().with_handler(|req| match req.label.as_str() {
            "detail:basic" => Ok(results(vec![
                row(&[
                    ("serviceTypeLabel", "talent agency"),
                    ("foundingDate", "+1975-01-01T00:00:00Z"),
                    ("website", "https://first.example"),
                ]),
                row(&[
                    ("serviceTypeLabel", "talent agency"),
                    ("website", "https://second.example"),
                ]),
                row(&[("serviceTypeLabel", "Q1009964")]),
            ])),
            "detail:locations" => Ok(results(vec![
                row(&[("locationLabel", "Los Angeles")]),
                row(&[("locationLabel", "New York City")]),
            ])),
            _ => Ok(results(vec![row(&[("awardLabel", "Emmy")])])),
        });

        let record = enricher(client, profile())
            .enrich(&RawRecord::new("Q1", "CAA"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.attribute("service_types"), ["talent agency"]);
        assert_eq!(record.attribute("locations"), ["Los Angeles", "New York City"]);
        assert_eq!(record.attribute("awards"), ["Award: Emmy"]);
        assert_eq!(record.scalar("website"), Some("https://first.example"));
        assert_eq!(record.scalar("founded"), Some("1975-01-01"));
        assert_eq!(record.scalar("years_active"), Some("1975-01-01 - present"));
        assert!(record.incomplete.is_empty());
    }

    #[tokio::test]
    async fn test_partial_enrichment_survives_exhausted_query() {
        let client = MockQueryClient::new().with_handler(|req| match req.label.as_str() {
            "detail:locations" => Err(Failure::Timeout("slow".into())),
            "detail:basic" => Ok(results(vec![row(&[("serviceTypeLabel", "model agency")])])),
            _ => Ok(results(vec![row(&[("awardLabel", "Clio")])])),
        });

        let record = enricher(client.clone(), profile())
            .enrich(&RawRecord::new("Q2", "Elite"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.attribute("service_types"), ["model agency"]);
        assert_eq!(record.attribute("awards"), ["Award: Clio"]);
        assert!(record.attributes.contains_key("locations"));
        assert!(record.attribute("locations").is_empty());
        assert_eq!(record.incomplete, ["locations"]);
        assert_eq!(client.calls_for("detail:locations").len(), 3);
    }

    #[tokio::test]
    async fn test_detail_limit_shrinks_on_timeout() {
        let client = MockQueryClient::new().with_handler(|req| {
            if req.limit > 50 {
                Err(Failure::Timeout("slow".into()))
            } else {
                Ok(QueryResults::default())
            }
        });

        enricher(client.clone(), profile())
            .enrich(&RawRecord::new("Q3", "WME"), &CancellationToken::new())
            .await
            .unwrap();

        let basic = client.calls_for("detail:basic");
        assert_eq!(basic.len(), 2);
        assert_eq!(basic[0].query, "basic Q3 LIMIT 100");
        assert_eq!(basic[1].query, "basic Q3 LIMIT 50");
    }

    #[tokio::test]
    async fn test_rejected_detail_degrades_attribute() {
        let client = MockQueryClient::new().with_handler(|req| match req.label.as_str() {
            "detail:awards" => Err(Failure::ClientError("400".into())),
            _ => Ok(QueryResults::default()),
        });

        let record = enricher(client.clone(), profile())
            .enrich(&RawRecord::new("Q4", "IMG"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.incomplete, ["awards"]);
        assert_eq!(client.calls_for("detail:awards").len(), 1);
    }

    #[tokio::test]
    async fn test_span_with_end() {
        let client = MockQueryClient::new().with_handler(|req| match req.label.as_str() {
            "detail:basic" => Ok(results(vec![row(&[
                ("foundingDate", "1990-05-01"),
                ("dissolutionDate", "+2004-01-01T00:00:00Z"),
            ])])),
            _ => Ok(QueryResults::default()),
        });

        let record = enricher(client, profile())
            .enrich(&RawRecord::new("Q5", "Old Agency"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(record.scalar("years_active"), Some("1990-05-01 - 2004-01-01"));
    }

    #[tokio::test]
    async fn test_interrupt_escapes() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = enricher(MockQueryClient::new(), profile())
            .enrich(&RawRecord::new("Q6", "X"), &cancel)
            .await;

        assert!(matches!(result, Err(HarvestError::Interrupted)));
    }
}
