use crate::model::{CriteriaNode, RelatedClassSpecifier};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const PARAM_SOURCE: &str = "source";
pub const PARAM_POLYGON: &str = "polygon";
pub const PARAM_PAGE_SIZE: &str = "pageSize";
pub const PARAM_PAGE_START: &str = "pageStart";

/// Either every property of the class or an explicit list, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertySelection {
    All,
    Properties(Vec<String>),
}

impl Default for PropertySelection {
    fn default() -> Self {
        PropertySelection::All
    }
}

impl PropertySelection {
    pub fn of<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PropertySelection::Properties(names.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedInstanceSpec {
    pub specifier: RelatedClassSpecifier,
    #[serde(default)]
    pub selection: PropertySelection,
}

/// Provider-specific parameters that travel beside the WHERE tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtendedParams(pub HashMap<String, serde_json::Value>);

impl ExtendedParams {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    pub fn source(&self) -> Option<&str> {
        self.get(PARAM_SOURCE).and_then(|v| v.as_str())
    }

    pub fn polygon(&self) -> Option<&serde_json::Value> {
        self.get(PARAM_POLYGON).filter(|v| !v.is_null())
    }

    pub fn page_size(&self) -> Option<u64> {
        self.get(PARAM_PAGE_SIZE).and_then(as_u64)
    }

    pub fn page_start(&self) -> Option<u64> {
        self.get(PARAM_PAGE_START).and_then(as_u64)
    }
}

// Paging hints arrive as numbers or numeric strings depending on the caller.
fn as_u64(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub class: String,
    #[serde(default)]
    pub polymorphic: bool,
    #[serde(default)]
    pub selection: PropertySelection,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<RelatedInstanceSpec>,
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<CriteriaNode>,
    #[serde(default)]
    pub extended: ExtendedParams,
}

impl Query {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            polymorphic: false,
            selection: PropertySelection::All,
            related: Vec::new(),
            where_clause: None,
            extended: ExtendedParams::default(),
        }
    }

    pub fn polymorphic(mut self) -> Self {
        self.polymorphic = true;
        self
    }

    pub fn select<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection = PropertySelection::of(names);
        self
    }

    pub fn with_related(mut self, specifier: RelatedClassSpecifier, selection: PropertySelection) -> Self {
        self.related.push(RelatedInstanceSpec {
            specifier,
            selection,
        });
        self
    }

    pub fn filter(mut self, criteria: impl Into<CriteriaNode>) -> Self {
        self.where_clause = Some(criteria.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extended.insert(key, value);
        self
    }
}
