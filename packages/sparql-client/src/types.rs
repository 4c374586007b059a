use serde::Deserialize;
use std::collections::HashMap;

/// A SPARQL 1.1 JSON result set.
///
/// Only the `SELECT` form is modelled; `ASK` responses are not used here.
#[derive(Debug, Clone, Deserialize)]
pub struct SparqlResults {
    pub head: ResultHead,
    pub results: ResultBindings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultHead {
    #[serde(default)]
    pub vars: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResultBindings {
    #[serde(default)]
    pub bindings: Vec<HashMap<String, BindingValue>>,
}

/// A single bound value (`{"type": "uri", "value": "..."}`).
#[derive(Debug, Clone, Deserialize)]
pub struct BindingValue {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
    #[serde(rename = "xml:lang")]
    pub lang: Option<String>,
    pub datatype: Option<String>,
}

impl SparqlResults {
    /// Number of solutions in the result set.
    pub fn len(&self) -> usize {
        self.results.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.bindings.is_empty()
    }

    /// Flatten bindings into `variable -> value` rows, dropping type metadata.
    pub fn rows(&self) -> Vec<HashMap<String, String>> {
        self.results
            .bindings
            .iter()
            .map(|binding| {
                binding
                    .iter()
                    .map(|(var, v)| (var.clone(), v.value.clone()))
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_flatten_bindings() {
        let raw = serde_json::json!({
            "head": { "vars": ["entity", "entityLabel"] },
            "results": { "bindings": [
                {
                    "entity": { "type": "uri", "value": "http://www.wikidata.org/entity/Q42" },
                    "entityLabel": { "type": "literal", "value": "Douglas Adams", "xml:lang": "en" }
                },
                {
                    "entity": { "type": "uri", "value": "http://www.wikidata.org/entity/Q1" }
                }
            ]}
        });

        let results: SparqlResults = serde_json::from_value(raw).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results.head.vars, vec!["entity", "entityLabel"]);

        let rows = results.rows();
        assert_eq!(rows[0]["entityLabel"], "Douglas Adams");
        assert!(!rows[1].contains_key("entityLabel"));
    }

    #[test]
    fn test_missing_bindings_is_empty() {
        let results: SparqlResults =
            serde_json::from_value(serde_json::json!({ "head": {}, "results": {} })).unwrap();
        assert!(results.is_empty());
    }
}
