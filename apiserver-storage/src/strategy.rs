//! Per-kind policy hooks the store consults but never second-guesses (spec §4.4).
use apiserver_types::{DeleteOptions, Resource, StatusCause};

/// Cascading-deletion default for kinds that never received an explicit
/// `propagationPolicy` (spec §4.5.5 step 4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GarbageCollectionPolicy {
    Unsupported,
    OrphanDependents,
    DeleteDependents,
}

/// Result of consulting `checkGracefulDelete`.
#[derive(Clone, Copy, Debug, Default)]
pub struct GracefulDeleteDecision {
    pub graceful: bool,
    pub pending_graceful: bool,
}

/// A finish hook: `beginCreate`/`beginUpdate` return one of these, to be
/// invoked exactly once with the operation's success flag, on every exit
/// path (spec §9, "finish-hook pattern"). See [`crate::store::FinishGuard`].
pub type FinishHook = Box<dyn FnOnce(bool) + Send>;

/// The bundle of per-kind policy operations the generic [`crate::store::Store`]
/// consults. No inheritance hierarchy: implementations supply one value
/// carrying closures/impls for each hook (spec §9, "polymorphism over resource kinds").
pub trait Strategy<K: Resource>: Send + Sync {
    fn namespace_scoped(&self) -> bool;

    /// Defaulting/normalization/status-reset before `validate_create`.
    fn prepare_for_create(&self, _obj: &mut K) {}

    /// Defaulting/normalization before `validate_update`.
    fn prepare_for_update(&self, _new: &mut K, _old: &K) {}

    fn validate_create(&self, _obj: &K) -> Vec<StatusCause> {
        Vec::new()
    }

    fn validate_update(&self, _new: &K, _old: &K) -> Vec<StatusCause> {
        Vec::new()
    }

    fn allow_create_on_update(&self) -> bool {
        false
    }

    fn allow_unconditional_update(&self) -> bool {
        false
    }

    /// May mutate `options.grace_period_seconds`; sets `pending_graceful`
    /// only if the object is already mid-graceful-delete (never on a
    /// first observation of a nil `deletionTimestamp` -- see SPEC_FULL.md
    /// Open Question resolution).
    fn check_graceful_delete(&self, _obj: &K, _options: &mut DeleteOptions) -> GracefulDeleteDecision {
        GracefulDeleteDecision::default()
    }

    fn default_garbage_collection_policy(&self) -> GarbageCollectionPolicy {
        GarbageCollectionPolicy::Unsupported
    }

    /// Invoked when `generateName` is set and `name` is empty.
    fn generate_name(&self, base: &str) -> String {
        apiserver_types::generate_name::generate(base)
    }

    /// Optional pre-commit hook returning a finish callback. Default: none.
    fn begin_create(&self, _obj: &K) -> Option<FinishHook> {
        None
    }

    fn begin_update(&self, _new: &K, _old: &K) -> Option<FinishHook> {
        None
    }

    fn after_create(&self, _obj: &K) {}
    fn after_update(&self, _obj: &K) {}
    fn after_delete(&self, _obj: &K) {}

    /// The generic `shouldDeleteDuringUpdate` rule (new has no finalizers,
    /// existing is mid-deletion with no grace remaining) is evaluated by the
    /// store; this hook lets a kind veto the shortcut.
    fn allow_delete_during_update(&self, _existing: &K, _new: &K) -> bool {
        true
    }
}
