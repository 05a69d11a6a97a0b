//! Metadata carried by every stored [`crate::object::ResourceObject`].
use serde::{Deserialize, Serialize};

/// Standard metadata fields owned partly by the client, partly by the store.
///
/// `uid` is immutable once set. `resource_version` is opaque and is only ever
/// written by the store (callers must treat it as an inert comparison token).
/// `deletion_timestamp`, once set, may only move earlier in time -- except
/// that it is cleared entirely when an object is replaced via create.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// DNS-label-like name; non-empty after creation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// If set and `name` is empty at create time, the store synthesizes a
    /// unique name from this base (see [`crate::generate_name`]).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub generate_name: String,

    /// Present only for namespaced kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Server-assigned, immutable once set.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,

    /// Opaque token set only by the store; `""` means "not yet stored".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,

    /// Bumped by the server whenever the spec changes.
    #[serde(default, skip_serializing_if = "num_is_zero")]
    pub generation: i64,

    /// Set by the store at create time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<i64>,

    /// Unix-seconds deadline at which the object should be finalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<i64>,

    /// Grace period requested alongside `deletion_timestamp`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_grace_period_seconds: Option<i64>,

    /// Ordered, deduplicated tokens that block physical deletion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,

    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub labels: std::collections::BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub annotations: std::collections::BTreeMap<String, String>,
}

fn num_is_zero(n: &i64) -> bool {
    *n == 0
}

impl ObjectMeta {
    pub fn is_being_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, name: &str) -> bool {
        self.finalizers.iter().any(|f| f == name)
    }
}
