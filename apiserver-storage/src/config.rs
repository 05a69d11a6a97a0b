//! `Store` configuration (spec §3, "Store configuration").
use crate::decorated_watcher::Decorator;
use apiserver_types::{ApiError, ListOptions, Predicate, Resource};
use std::sync::Arc;
use std::time::Duration;

/// Computes the TTL (seconds) for an object about to be written. `None`
/// defaults to 0 (no TTL); negative values are coerced to 1 by the store.
pub type TtlFunc<K> = Arc<dyn Fn(&K, i64) -> i64 + Send + Sync>;

/// Compiles `ListOptions`' label/field selector strings into a [`Predicate`].
pub type PredicateFunc = Arc<dyn Fn(&ListOptions) -> Result<Predicate, ApiError> + Send + Sync>;

/// Builder-style configuration for a single `Store<K, S, B>` instance,
/// mirroring the enumerated options of spec §3.
pub struct StoreConfig<K: Resource> {
    pub enable_garbage_collection: bool,
    pub delete_collection_workers: usize,
    pub return_deleted_object: bool,
    pub ttl_func: Option<TtlFunc<K>>,
    pub predicate_func: PredicateFunc,
    pub count_poll_period: Option<Duration>,
    pub decorator: Option<Decorator<K>>,
    pub resource_name: String,
}

impl<K: Resource> StoreConfig<K> {
    pub fn new(resource_name: impl Into<String>) -> Self {
        Self {
            enable_garbage_collection: true,
            delete_collection_workers: 1,
            return_deleted_object: true,
            ttl_func: None,
            predicate_func: Arc::new(default_predicate_func),
            count_poll_period: None,
            decorator: None,
            resource_name: resource_name.into(),
        }
    }

    #[must_use]
    pub fn delete_collection_workers(mut self, n: usize) -> Self {
        self.delete_collection_workers = n.max(1);
        self
    }

    #[must_use]
    pub fn return_deleted_object(mut self, yes: bool) -> Self {
        self.return_deleted_object = yes;
        self
    }

    #[must_use]
    pub fn ttl_func(mut self, f: TtlFunc<K>) -> Self {
        self.ttl_func = Some(f);
        self
    }

    #[must_use]
    pub fn predicate_func(mut self, f: PredicateFunc) -> Self {
        self.predicate_func = f;
        self
    }

    #[must_use]
    pub fn count_poll_period(mut self, period: Duration) -> Self {
        self.count_poll_period = Some(period);
        self
    }

    #[must_use]
    pub fn decorator(mut self, f: Decorator<K>) -> Self {
        self.decorator = Some(f);
        self
    }
}

fn default_predicate_func(opts: &ListOptions) -> Result<Predicate, ApiError> {
    let labels = opts
        .label_selector
        .as_deref()
        .map(Predicate::parse)
        .transpose()?
        .unwrap_or_default();
    let fields = opts
        .field_selector
        .as_deref()
        .map(Predicate::parse_fields)
        .transpose()?
        .unwrap_or_default();
    Ok(labels.and(fields))
}
