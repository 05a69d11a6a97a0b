//! Finalizer / propagation-policy resolution (spec §4.5.5).
use crate::strategy::GarbageCollectionPolicy;
use apiserver_types::PropagationPolicy;

/// GC tokens drained by the external garbage collector (spec §1, out of
/// scope beyond this wire contract).
pub const ORPHAN_TOKEN: &str = "apiserver.kubernetes.io/orphan-dependents";
pub const DELETE_DEPENDENTS_TOKEN: &str = "apiserver.kubernetes.io/delete-dependents";

fn is_gc_token(t: &str) -> bool {
    t == ORPHAN_TOKEN || t == DELETE_DEPENDENTS_TOKEN
}

/// Resolves the finalizer set a graceful delete should stamp, per the
/// priority order of spec §4.5.5: explicit `propagationPolicy`, then the
/// deprecated `orphanDependents` bool, then whatever GC tokens already sit
/// on the object, then the strategy's default policy.
pub fn resolve_finalizers(
    existing: &[String],
    propagation_policy: Option<PropagationPolicy>,
    orphan_dependents: Option<bool>,
    gc_policy: GarbageCollectionPolicy,
) -> Vec<String> {
    if gc_policy == GarbageCollectionPolicy::Unsupported {
        return existing.to_vec();
    }

    let base: Vec<String> = existing.iter().filter(|f| !is_gc_token(f)).cloned().collect();

    let token: Option<&str> = match propagation_policy {
        Some(PropagationPolicy::Orphan) => Some(ORPHAN_TOKEN),
        Some(PropagationPolicy::Foreground) => Some(DELETE_DEPENDENTS_TOKEN),
        Some(PropagationPolicy::Background) => None,
        None => orphan_dependents
            .and_then(|b| b.then_some(ORPHAN_TOKEN))
            .or_else(|| {
                if existing.iter().any(|f| f == DELETE_DEPENDENTS_TOKEN) {
                    Some(DELETE_DEPENDENTS_TOKEN)
                } else if existing.iter().any(|f| f == ORPHAN_TOKEN) {
                    Some(ORPHAN_TOKEN)
                } else {
                    None
                }
            })
            .or_else(|| match gc_policy {
                GarbageCollectionPolicy::OrphanDependents => Some(ORPHAN_TOKEN),
                GarbageCollectionPolicy::DeleteDependents => Some(DELETE_DEPENDENTS_TOKEN),
                GarbageCollectionPolicy::Unsupported => None,
            }),
    };

    let mut result = base;
    if let Some(t) = token {
        if !result.iter().any(|f| f == t) {
            result.push(t.to_string());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_policy_leaves_finalizers_untouched() {
        let existing = vec!["custom".to_string()];
        let out = resolve_finalizers(&existing, None, None, GarbageCollectionPolicy::Unsupported);
        assert_eq!(out, existing);
    }

    #[test]
    fn explicit_foreground_adds_delete_dependents_token() {
        let out = resolve_finalizers(&[], Some(PropagationPolicy::Foreground), None, GarbageCollectionPolicy::OrphanDependents);
        assert_eq!(out, vec![DELETE_DEPENDENTS_TOKEN.to_string()]);
    }

    #[test]
    fn background_strips_existing_gc_tokens() {
        let existing = vec!["custom".to_string(), ORPHAN_TOKEN.to_string()];
        let out = resolve_finalizers(&existing, Some(PropagationPolicy::Background), None, GarbageCollectionPolicy::OrphanDependents);
        assert_eq!(out, vec!["custom".to_string()]);
    }

    #[test]
    fn falls_back_to_existing_tokens_then_default() {
        let existing = vec![ORPHAN_TOKEN.to_string()];
        let out = resolve_finalizers(&existing, None, None, GarbageCollectionPolicy::DeleteDependents);
        assert_eq!(out, vec![ORPHAN_TOKEN.to_string()]);

        let out2 = resolve_finalizers(&[], None, None, GarbageCollectionPolicy::DeleteDependents);
        assert_eq!(out2, vec![DELETE_DEPENDENTS_TOKEN.to_string()]);
    }

    #[test]
    fn deprecated_bool_takes_priority_over_existing_tokens() {
        let existing = vec![DELETE_DEPENDENTS_TOKEN.to_string()];
        let out = resolve_finalizers(&existing, None, Some(true), GarbageCollectionPolicy::OrphanDependents);
        assert_eq!(out, vec![ORPHAN_TOKEN.to_string()]);
    }
}
