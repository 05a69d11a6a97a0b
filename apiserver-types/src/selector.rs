//! Label/field selector compilation (spec §3 `predicateFunc`).
//!
//! Implements the equality-based subset of Kubernetes selector syntax:
//! `key=value`, `key==value`, `key!=value`, bare `key` (existence), `!key`
//! (non-existence), comma-separated conjunction. Arbitrary field-path
//! expressions into a resource's spec are out of scope (see SPEC_FULL.md).
use crate::error::ApiError;
use std::collections::BTreeMap;

/// A single parsed requirement.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k).is_some_and(|got| got == v),
            Requirement::NotEquals(k, v) => labels.get(k).is_none_or(|got| got != v),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::NotExists(k) => !labels.contains_key(k),
        }
    }
}

/// A compiled selector: a label-requirement conjunction and a field-
/// requirement conjunction, evaluated against two separate maps (labels are
/// never a valid stand-in for fields, and vice versa).
#[derive(Clone, Debug, Default)]
pub struct Predicate {
    label_requirements: Vec<Requirement>,
    field_requirements: Vec<Requirement>,
}

impl Predicate {
    /// Parses a comma-separated label-selector expression.
    pub fn parse(expr: &str) -> Result<Self, ApiError> {
        Ok(Self {
            label_requirements: parse_terms(expr)?,
            field_requirements: Vec::new(),
        })
    }

    /// Parses a comma-separated field-selector expression (e.g.
    /// `metadata.name=widget-1`).
    pub fn parse_fields(expr: &str) -> Result<Self, ApiError> {
        Ok(Self {
            label_requirements: Vec::new(),
            field_requirements: parse_terms(expr)?,
        })
    }

    /// `labels` is the object's label map; `fields` is a metadata-derived map
    /// (at minimum `metadata.name`/`metadata.namespace`) the field
    /// requirements are evaluated against.
    pub fn matches(&self, labels: &BTreeMap<String, String>, fields: &BTreeMap<String, String>) -> bool {
        self.label_requirements.iter().all(|r| r.matches(labels)) && self.field_requirements.iter().all(|r| r.matches(fields))
    }

    pub fn is_empty(&self) -> bool {
        self.label_requirements.is_empty() && self.field_requirements.is_empty()
    }

    /// Conjoins a label selector and a field selector.
    #[must_use]
    pub fn and(mut self, other: Self) -> Self {
        self.label_requirements.extend(other.label_requirements);
        self.field_requirements.extend(other.field_requirements);
        self
    }

    /// If the field selector pins a single name via an equality requirement
    /// on `metadata.name`, returns it (spec §4.5.7 single-name narrowing).
    pub fn single_name(&self) -> Option<&str> {
        self.field_requirements.iter().find_map(|r| match r {
            Requirement::Equals(k, v) if k == "metadata.name" => Some(v.as_str()),
            _ => None,
        })
    }
}

fn parse_terms(expr: &str) -> Result<Vec<Requirement>, ApiError> {
    expr.split(',').map(str::trim).filter(|t| !t.is_empty()).map(parse_term).collect()
}

fn parse_term(term: &str) -> Result<Requirement, ApiError> {
    if let Some(key) = term.strip_prefix('!') {
        if key.is_empty() {
            return Err(ApiError::BadRequest(format!("invalid selector term: {term}")));
        }
        return Ok(Requirement::NotExists(key.to_string()));
    }
    if let Some((k, v)) = term.split_once("!=") {
        return Ok(Requirement::NotEquals(k.trim().to_string(), v.trim().to_string()));
    }
    if let Some((k, v)) = term.split_once("==") {
        return Ok(Requirement::Equals(k.trim().to_string(), v.trim().to_string()));
    }
    if let Some((k, v)) = term.split_once('=') {
        return Ok(Requirement::Equals(k.trim().to_string(), v.trim().to_string()));
    }
    Ok(Requirement::Exists(term.to_string()))
}
