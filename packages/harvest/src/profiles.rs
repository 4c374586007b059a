//! Built-in job profiles for the Wikidata Query Service.

use std::time::Duration;

use crate::types::config::PacingConfig;
use crate::types::profile::{BranchQuery, DetailQuery, FieldMapping, JobProfile};

const LABEL_SERVICE: &str =
    r#"SERVICE wikibase:label { bd:serviceParam wikibase:language "[AUTO_LANGUAGE],en". }"#;

/// Names accepted by [`builtin`].
pub fn builtin_names() -> &'static [&'static str] {
    &["media-talent-agencies", "political-figures"]
}

pub fn builtin(name: &str) -> Option<JobProfile> {
    match name {
        "media-talent-agencies" => Some(media_talent_agencies()),
        "political-figures" => Some(political_figures()),
        _ => None,
    }
}

/// Page through instances of one class, English label required.
fn class_branch(name: &str, class_pattern: &str) -> BranchQuery {
    BranchQuery::new(
        name,
        format!(
            r#"SELECT DISTINCT ?entity ?entityLabel WHERE {{
  {class_pattern}
  ?entity rdfs:label ?label . FILTER(LANG(?label) = "en")
  {LABEL_SERVICE}
}}
ORDER BY ?entity
LIMIT {{limit}}
OFFSET {{offset}}"#
        ),
    )
}

/// Labels of everything reachable from the entity through any of `props`.
fn label_detail(name: &str, var: &str, props: &[&str]) -> DetailQuery {
    let union = props
        .iter()
        .map(|p| format!("{{ wd:{{id}} wdt:{} ?{} . }}", p, var))
        .collect::<Vec<_>>()
        .join(" UNION ");
    DetailQuery::new(
        name,
        format!(
            "SELECT DISTINCT ?{var}Label WHERE {{\n  {union}\n  {LABEL_SERVICE}\n}}\nLIMIT {{limit}}"
        ),
    )
}

fn media_talent_agencies() -> JobProfile {
    let mut profile = JobProfile::new("media-talent-agencies");
    profile.description = "Talent, media, sports, model and literary agencies".to_string();

    profile
        .branch(class_branch("talent", "?entity wdt:P31 wd:Q1009964 ."))
        .branch(class_branch("media", "?entity wdt:P31 wd:Q10863255 ."))
        .branch(class_branch("sports", "?entity wdt:P31 wd:Q56876626 ."))
        .branch(class_branch("model", "?entity wdt:P31 wd:Q1194769 ."))
        .branch(class_branch("literary", "?entity wdt:P31 wd:Q11396470 ."))
        .branch(class_branch(
            "entertainment",
            "?entity wdt:P31/wdt:P279* wd:Q783794 ; wdt:P452 wd:Q173799 .",
        ))
        .detail(
            DetailQuery::new(
                "basic",
                format!(
                    r#"SELECT ?serviceTypeLabel ?foundingDate ?dissolutionDate ?website ?parentCompanyLabel WHERE {{
  OPTIONAL {{ {{ wd:{{id}} wdt:P31 ?serviceType . }} UNION {{ wd:{{id}} wdt:P452 ?serviceType . }} }}
  OPTIONAL {{ {{ wd:{{id}} wdt:P571 ?foundingDate . }} UNION {{ wd:{{id}} wdt:P1619 ?foundingDate . }} }}
  OPTIONAL {{ {{ wd:{{id}} wdt:P576 ?dissolutionDate . }} UNION {{ wd:{{id}} wdt:P582 ?dissolutionDate . }} }}
  OPTIONAL {{ wd:{{id}} wdt:P856 ?website . }}
  OPTIONAL {{ wd:{{id}} wdt:P749 ?parentCompany . }}
  {LABEL_SERVICE}
}}
LIMIT {{limit}}"#
                ),
            )
            .field(FieldMapping::list("serviceTypeLabel", "service_types"))
            .field(FieldMapping::date("foundingDate", "founded"))
            .field(FieldMapping::date("dissolutionDate", "dissolved"))
            .field(FieldMapping::scalar("website", "website"))
            .field(FieldMapping::scalar("parentCompanyLabel", "parent_company")),
        )
        .detail(
            label_detail("industries", "industry", &["P452", "P2770", "P1056"])
                .field(FieldMapping::list("industryLabel", "industries_served")),
        )
        .detail(
            label_detail("locations", "location", &["P159", "P740", "P131", "P276", "P17"])
                .field(FieldMapping::list("locationLabel", "locations")),
        )
        .detail(
            label_detail("clients", "client", &["P1327", "P710"])
                .field(FieldMapping::list("clientLabel", "notable_clients")),
        )
        .detail(
            label_detail("awards", "award", &["P166"])
                .field(FieldMapping::list("awardLabel", "achievements").with_prefix("Award: ")),
        )
        .with_span("years_active", "founded", "dissolved")
}

fn political_figures() -> JobProfile {
    let mut profile = JobProfile::new("political-figures");
    profile.description = "People whose occupation is politician or a subclass".to_string();

    profile
        .branch(class_branch("politicians", "?entity wdt:P106/wdt:P279* wd:Q82955 ."))
        .detail(
            label_detail("parties", "party", &["P102"])
                .field(FieldMapping::list("partyLabel", "parties")),
        )
        .detail(
            DetailQuery::new(
                "positions",
                format!(
                    r#"SELECT ?positionLabel ?startDate ?endDate WHERE {{
  wd:{{id}} p:P39 ?statement .
  ?statement ps:P39 ?position .
  OPTIONAL {{ ?statement pq:P580 ?startDate . }}
  OPTIONAL {{ ?statement pq:P582 ?endDate . }}
  {LABEL_SERVICE}
}}
ORDER BY ?startDate
LIMIT {{limit}}"#
                ),
            )
            .field(FieldMapping::list("positionLabel", "positions"))
            .field(FieldMapping::date("startDate", "first_term_start"))
            .field(FieldMapping::date("endDate", "first_term_end")),
        )
        .detail(
            label_detail("citizenship", "country", &["P27"])
                .field(FieldMapping::list("countryLabel", "countries")),
        )
        .with_span("first_term", "first_term_start", "first_term_end")
        .with_pacing(PacingConfig {
            entity_pause: Duration::from_secs(1),
            batch_pause: Duration::from_secs(2),
        })
}
