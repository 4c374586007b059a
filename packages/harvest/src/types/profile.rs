//! Job profiles: the declarative description of what one extraction queries.
//!
//! A profile names the sub-query branches that page through primary entities,
//! the detail queries that enrich each entity, and how detail results map onto
//! record attributes. The engine never looks at query text beyond substituting
//! the `{limit}`, `{offset}` and `{id}` placeholders.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{HarvestError, Result};
use crate::types::config::PacingConfig;

const LIMIT: &str = "{limit}";
const OFFSET: &str = "{offset}";
const ID: &str = "{id}";

fn default_id_variable() -> String {
    "entity".to_string()
}

fn default_label_variable() -> String {
    "entityLabel".to_string()
}

fn default_detail_limit() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProfile {
    /// Job name; also the stem of the checkpoint artifacts
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Disjoint sub-queries that together cover the domain
    pub branches: Vec<BranchQuery>,

    #[serde(default = "default_id_variable")]
    pub id_variable: String,

    #[serde(default = "default_label_variable")]
    pub label_variable: String,

    #[serde(default)]
    pub details: Vec<DetailQuery>,

    /// Human-readable span derived from two scalars
    #[serde(default)]
    pub span: Option<SpanSpec>,

    /// Result limit for detail queries before any shrinking
    #[serde(default = "default_detail_limit")]
    pub detail_limit: usize,

    /// Job-specific pacing, sized empirically for the service
    #[serde(default)]
    pub pacing: Option<PacingConfig>,
}

/// One paged sub-query over primary entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchQuery {
    pub name: String,
    /// Query text with `{limit}` and `{offset}` placeholders
    pub template: String,
}

impl BranchQuery {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
        }
    }

    pub fn render(&self, limit: usize, offset: usize) -> String {
        self.template
            .replace(LIMIT, &limit.to_string())
            .replace(OFFSET, &offset.to_string())
    }
}

/// A secondary query issued once per unique entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailQuery {
    pub name: String,
    /// Query text with an `{id}` placeholder and optionally `{limit}`
    pub template: String,
    pub fields: Vec<FieldMapping>,
}

impl DetailQuery {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, mapping: FieldMapping) -> Self {
        self.fields.push(mapping);
        self
    }

    pub fn render(&self, id: &str, limit: usize) -> String {
        self.template
            .replace(ID, id)
            .replace(LIMIT, &limit.to_string())
    }

    /// List attributes this query populates.
    pub fn list_targets(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.kind == FieldKind::List)
            .map(|f| f.target.as_str())
    }
}

/// Maps one result variable onto a record attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMapping {
    pub variable: String,
    pub target: String,
    #[serde(default)]
    pub kind: FieldKind,
    /// Prepended to list values, e.g. `"Award: "`
    #[serde(default)]
    pub prefix: Option<String>,
}

impl FieldMapping {
    pub fn list(variable: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            target: target.into(),
            kind: FieldKind::List,
            prefix: None,
        }
    }

    pub fn scalar(variable: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: FieldKind::Scalar,
            ..Self::list(variable, target)
        }
    }

    pub fn date(variable: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: FieldKind::Date,
            ..Self::list(variable, target)
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Deduplicated, insertion-ordered label list
    #[default]
    List,
    /// First-write-wins string
    Scalar,
    /// First-write-wins date, time part stripped
    Date,
}

/// `"<start> - <end>"` or `"<start> - present"` from two scalars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanSpec {
    pub target: String,
    pub start: String,
    pub end: String,
}

impl JobProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            branches: Vec::new(),
            id_variable: default_id_variable(),
            label_variable: default_label_variable(),
            details: Vec::new(),
            span: None,
            detail_limit: default_detail_limit(),
            pacing: None,
        }
    }

    pub fn branch(mut self, branch: BranchQuery) -> Self {
        self.branches.push(branch);
        self
    }

    pub fn detail(mut self, detail: DetailQuery) -> Self {
        self.details.push(detail);
        self
    }

    pub fn with_span(
        mut self,
        target: impl Into<String>,
        start: impl Into<String>,
        end: impl Into<String>,
    ) -> Self {
        self.span = Some(SpanSpec {
            target: target.into(),
            start: start.into(),
            end: end.into(),
        });
        self
    }

    pub fn with_pacing(mut self, pacing: PacingConfig) -> Self {
        self.pacing = Some(pacing);
        self
    }

    /// Load a profile from a JSON file and validate it.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            HarvestError::profile(format!("cannot read {}: {}", path.display(), e))
        })?;
        let profile: JobProfile = serde_json::from_str(&text).map_err(|e| {
            HarvestError::profile(format!("cannot parse {}: {}", path.display(), e))
        })?;
        profile.validate()?;
        Ok(profile)
    }

    /// Check the profile can drive a run.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(HarvestError::profile("name is empty"));
        }
        if self.name.contains(['/', '\\']) {
            return Err(HarvestError::profile(format!(
                "name '{}' must not contain path separators",
                self.name
            )));
        }
        if self.branches.is_empty() {
            return Err(HarvestError::profile("at least one branch is required"));
        }

        let mut names = HashSet::new();
        for branch in &self.branches {
            if !names.insert(branch.name.as_str()) {
                return Err(HarvestError::profile(format!(
                    "duplicate branch '{}'",
                    branch.name
                )));
            }
            if !branch.template.contains(LIMIT) || !branch.template.contains(OFFSET) {
                return Err(HarvestError::profile(format!(
                    "branch '{}' needs both {} and {} placeholders",
                    branch.name, LIMIT, OFFSET
                )));
            }
        }

        for detail in &self.details {
            if !detail.template.contains(ID) {
                return Err(HarvestError::profile(format!(
                    "detail query '{}' needs an {} placeholder",
                    detail.name, ID
                )));
            }
            if detail.fields.is_empty() {
                return Err(HarvestError::profile(format!(
                    "detail query '{}' maps no fields",
                    detail.name
                )));
            }
        }

        if self.detail_limit == 0 {
            return Err(HarvestError::profile("detail_limit must be positive"));
        }

        Ok(())
    }
}
