//! Request option structs, ported from apimachinery's `*Options` types.
use serde::Serialize;

/// The validation directive used for `fieldValidation` on create/update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ValidationDirective {
    #[default]
    Ignore,
    Warn,
    Strict,
}

/// Common options for create/update calls.
#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    pub dry_run: bool,
    pub field_manager: Option<String>,
    pub field_validation: ValidationDirective,
}

/// Alias: update shares the same option surface as create.
pub type UpdateOptions = CreateOptions;

/// Conditions that must hold for a mutating call (update/delete) to proceed.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preconditions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl Preconditions {
    pub fn check(&self, uid: &str, resource_version: &str) -> bool {
        self.uid.as_deref().is_none_or(|want| want == uid)
            && self
                .resource_version
                .as_deref()
                .is_none_or(|want| want == resource_version)
    }
}

/// Cascading-deletion policy for dependents tracked by an external GC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PropagationPolicy {
    Orphan,
    Background,
    Foreground,
}

/// Options governing a single `Delete` call.
#[derive(Clone, Debug, Default)]
pub struct DeleteOptions {
    pub grace_period_seconds: Option<i64>,
    pub preconditions: Option<Preconditions>,
    pub propagation_policy: Option<PropagationPolicy>,
    /// Deprecated boolean form, still honored when `propagation_policy` is unset.
    pub orphan_dependents: Option<bool>,
    pub dry_run: bool,
}

impl DeleteOptions {
    pub fn background() -> Self {
        Self {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Self::default()
        }
    }

    pub fn foreground() -> Self {
        Self {
            propagation_policy: Some(PropagationPolicy::Foreground),
            ..Self::default()
        }
    }

    pub fn orphan() -> Self {
        Self {
            propagation_policy: Some(PropagationPolicy::Orphan),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn grace_period(mut self, secs: i64) -> Self {
        self.grace_period_seconds = Some(secs);
        self
    }

    #[must_use]
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// How `resource_version` constrains a `List`/`Watch` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ResourceVersionMatch {
    #[default]
    Unset,
    Exact,
    NotOlderThan,
}

/// Options governing `List`/`Watch` calls.
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    pub resource_version: Option<String>,
    pub resource_version_match: ResourceVersionMatch,
    pub limit: Option<u32>,
    pub continue_token: Option<String>,
    pub allow_watch_bookmarks: bool,
    /// How often to emit a synthetic bookmark on an otherwise idle watch.
    /// `None` disables bookmark ticking even if `allow_watch_bookmarks` is set.
    pub bookmark_every: Option<std::time::Duration>,
}

impl ListOptions {
    #[must_use]
    pub fn labels(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    #[must_use]
    pub fn fields(mut self, selector: impl Into<String>) -> Self {
        self.field_selector = Some(selector.into());
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}
