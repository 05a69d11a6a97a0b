//! Generic REST semantics over an opaque resource kind (spec §4.5, C5).
use crate::config::StoreConfig;
use crate::decorated_watcher::decorate;
use crate::dryrun::DryRunnableStorage;
use crate::finalizer::resolve_finalizers;
use crate::kv::{BackendError, KvGetOptions, KvListOptions, KvWatchOptions, RawKv};
use crate::metrics::Metrics;
use crate::strategy::{FinishHook, GarbageCollectionPolicy, Strategy};
use apiserver_types::{
    ApiError, CreateOptions, DeleteOptions, Event, ListOptions, Preconditions, Resource, Status, StatusCause,
    StatusDetails, UpdateOptions,
};
use async_stream::stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Either a decorated object or a bare success status, matching
/// `returnDeletedObject` (spec §3).
pub enum DeleteResult<K> {
    Object(K),
    Status(Status),
}

/// A finish hook is invoked exactly once with the operation's success flag
/// on every exit path (spec §9, "finish-hook pattern"). Drop is the natural
/// Rust realization of "guaranteed-release scope".
pub(crate) struct FinishGuard {
    hook: Option<FinishHook>,
    success: bool,
}

impl FinishGuard {
    pub(crate) fn new(hook: Option<FinishHook>) -> Self {
        Self { hook, success: false }
    }

    fn mark_success(&mut self) {
        self.success = true;
    }
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.take() {
            hook(self.success);
        }
    }
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

fn new_uid() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdef";
    let mut rng = rand::rng();
    (0..32)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

fn compute_ttl<K>(ttl_func: &Option<crate::config::TtlFunc<K>>, obj: &K, base: i64) -> Option<u64> {
    let ttl = ttl_func.as_ref().map(|f| f(obj, base)).unwrap_or(0);
    if ttl < 0 {
        Some(1)
    } else if ttl == 0 {
        None
    } else {
        Some(ttl as u64)
    }
}

fn invalid(resource: &str, name: &str, causes: Vec<StatusCause>) -> ApiError {
    ApiError::Invalid {
        resource: resource.to_string(),
        name: name.to_string(),
        causes,
    }
}

/// Sentinel used internally to signal the `shouldDeleteDuringUpdate`
/// shortcut of spec §4.5.3 from inside a synchronous `tryUpdate` closure.
const EMPTIED_FINALIZERS_SENTINEL: &str = "__store_emptied_finalizers__";

fn should_delete_during_update<K: Resource>(existing: &K, new: &K) -> bool {
    new.meta().finalizers.is_empty()
        && existing.meta().deletion_timestamp.is_some()
        && matches!(existing.meta().deletion_grace_period_seconds, None | Some(0))
}

/// Generic CRUD+Watch engine: `Store::new` binds one resource kind to a
/// strategy and a backend. Thread-safe; holds no mutable state beyond the
/// backend handle (spec §5).
pub struct Store<K, S, B> {
    prefix: String,
    namespaced: bool,
    resource_name: String,
    strategy: Arc<S>,
    storage: Arc<DryRunnableStorage<B>>,
    config: StoreConfig<K>,
    metrics: Metrics,
    count_poller: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    destroyed: Arc<AtomicBool>,
}

impl<K, S, B> Store<K, S, B>
where
    K: Resource + Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    S: Strategy<K> + 'static,
    B: RawKv,
{
    /// `prefix` must begin with `/` and must not equal `/` (spec §6).
    pub fn new(
        prefix: impl Into<String>,
        strategy: Arc<S>,
        storage: Arc<DryRunnableStorage<B>>,
        config: StoreConfig<K>,
    ) -> Result<Self, ApiError> {
        let prefix = prefix.into();
        if !prefix.starts_with('/') || prefix == "/" {
            return Err(ApiError::BadRequest(format!("invalid resource prefix {prefix:?}")));
        }
        let namespaced = strategy.namespace_scoped();
        let resource_name = config.resource_name.clone();
        let store = Self {
            prefix,
            namespaced,
            resource_name,
            strategy,
            storage,
            config,
            metrics: Metrics::default(),
            count_poller: std::sync::Mutex::new(None),
            destroyed: Arc::new(AtomicBool::new(false)),
        };
        if let Some(period) = store.config.count_poll_period {
            store.spawn_count_poller(period);
        }
        Ok(store)
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics.clone()
    }

    fn key_for(&self, namespace: Option<&str>, name: &str) -> Result<String, ApiError> {
        apiserver_types::validation::validate_path_segment(name)?;
        if self.namespaced {
            let ns = namespace.ok_or_else(|| ApiError::BadRequest("namespace is required".into()))?;
            apiserver_types::validation::validate_path_segment(ns)?;
            Ok(format!("{}/{ns}/{name}", self.prefix))
        } else {
            Ok(format!("{}/{name}", self.prefix))
        }
    }

    fn collection_prefix(&self, namespace: Option<&str>) -> String {
        match (self.namespaced, namespace) {
            (true, Some(ns)) => format!("{}/{ns}/", self.prefix),
            _ => format!("{}/", self.prefix),
        }
    }

    fn not_found(&self, name: &str) -> ApiError {
        ApiError::NotFound {
            resource: self.resource_name.clone(),
            name: name.to_string(),
        }
    }

    /// Idempotent; tears down the resource-count poller. Safe to call more
    /// than once (spec §5, `destroyFunc` once-guard).
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.count_poller.lock().unwrap().take() {
            handle.abort();
        }
    }

    fn spawn_count_poller(&self, period: std::time::Duration) {
        let storage = Arc::clone(&self.storage);
        let metrics = self.metrics.clone();
        let prefix = format!("{}/", self.prefix);
        let destroyed = Arc::clone(&self.destroyed);
        let handle = tokio::spawn(async move {
            let mut rng = rand::rng();
            loop {
                // 1.2x jitter factor per spec §5.
                let jitter = 1.0 + rng.random_range(0.0..0.2);
                let sleep_for = period.mul_f64(jitter);
                tokio::time::sleep(sleep_for).await;
                if destroyed.load(Ordering::SeqCst) {
                    return;
                }
                if let Ok(count) = storage.count(&prefix).await {
                    metrics.set_object_count(count);
                }
            }
        });
        *self.count_poller.lock().unwrap() = Some(handle);
    }

    fn decorate_one(&self, mut obj: K) -> K {
        if let Some(decorator) = &self.config.decorator {
            decorator(&mut obj);
        }
        obj
    }

    // ---- Create (spec §4.5.2) ----------------------------------------

    #[tracing::instrument(skip(self, obj, admission), fields(resource = %self.resource_name, name = obj.name()))]
    pub async fn create(
        &self,
        namespace: Option<&str>,
        mut obj: K,
        options: &CreateOptions,
        admission: Option<Arc<dyn Fn(&K) -> Result<(), ApiError> + Send + Sync>>,
    ) -> Result<K, ApiError> {
        let meta = obj.meta_mut();
        meta.uid = new_uid();
        meta.resource_version = String::new();
        meta.creation_timestamp = Some(now_unix());
        meta.deletion_timestamp = None;
        meta.deletion_grace_period_seconds = None;
        meta.generation = 1;

        let used_generate_name = meta.name.is_empty() && !meta.generate_name.is_empty();
        if used_generate_name {
            let base = meta.generate_name.clone();
            meta.name = self.strategy.generate_name(&base);
        }

        if !apiserver_types::validation::is_dns_label_like(obj.name()) {
            return Err(invalid(
                &self.resource_name,
                obj.name(),
                vec![StatusCause {
                    reason: "FieldValueInvalid".into(),
                    message: "name must be a DNS-label-like value (lowercase alphanumeric or '-', max 253 chars)".into(),
                    field: "metadata.name".into(),
                }],
            ));
        }

        let mut guard = FinishGuard::new(self.strategy.begin_create(&obj));

        self.strategy.prepare_for_create(&mut obj);
        let causes = self.strategy.validate_create(&obj);
        if !causes.is_empty() {
            return Err(invalid(&self.resource_name, obj.name(), causes));
        }
        if let Some(adm) = &admission {
            adm(&obj)?;
        }

        let ttl = compute_ttl(&self.config.ttl_func, &obj, 0);
        let key = self.key_for(namespace, obj.name())?;

        let result = self.storage.create(&key, &obj, ttl, options.dry_run).await;
        let decoded = match result {
            Ok(decoded) => decoded,
            Err(BackendError::AlreadyExists) => {
                let existing = self.storage.get::<K>(&key, &KvGetOptions::default()).await.ok();
                let mut msg = format!("{} \"{}\" already exists", self.resource_name, obj.name());
                if let Some(existing) = &existing {
                    if existing.object.meta().is_being_deleted() {
                        msg.push_str(": object is being deleted");
                    }
                }
                if used_generate_name {
                    return Err(ApiError::ServerTimeout(msg));
                }
                return Err(ApiError::AlreadyExists {
                    resource: self.resource_name.clone(),
                    name: obj.name().to_string(),
                });
            }
            Err(e) => return Err(interpret_backend_error(&self.resource_name, obj.name(), e)),
        };

        guard.mark_success();
        let mut stored = decoded.object;
        stored.meta_mut().resource_version = decoded.resource_version;
        self.strategy.after_create(&stored);
        self.metrics.record_create();
        tracing::debug!(resource_version = %stored.meta().resource_version, "created");
        Ok(self.decorate_one(stored))
    }

    // ---- Update (spec §4.5.3) -----------------------------------------

    /// `updated_object_info` receives the existing object (`None` if it does
    /// not exist) and returns the caller's intended new object.
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(skip_all, fields(resource = %self.resource_name, name))]
    pub async fn update(
        &self,
        namespace: Option<&str>,
        name: &str,
        updated_object_info: Arc<dyn Fn(Option<&K>) -> Result<K, ApiError> + Send + Sync>,
        options: &UpdateOptions,
        preconditions: Option<Preconditions>,
        force_allow_create: bool,
        admission: Option<Arc<dyn Fn(&K, Option<&K>) -> Result<(), ApiError> + Send + Sync>>,
    ) -> Result<(K, bool), ApiError> {
        let key = self.key_for(namespace, name)?;
        let strategy = Arc::clone(&self.strategy);
        let ttl_func = self.config.ttl_func.clone();
        let allow_unconditional = strategy.allow_unconditional_update();
        let allow_create_on_update = strategy.allow_create_on_update() || force_allow_create;
        let preconditions = preconditions.unwrap_or_default();
        let preconditions_for_delete = preconditions.clone();
        let resource_name = self.resource_name.clone();
        let name_owned = name.to_string();

        let try_update = move |existing: Option<&K>, existing_rv: Option<&str>| -> Result<(K, Option<u64>), ApiError> {
            match existing {
                None => {
                    if !allow_create_on_update {
                        return Err(ApiError::NotFound {
                            resource: resource_name.clone(),
                            name: name_owned.clone(),
                        });
                    }
                    let mut new = updated_object_info(None)?;
                    {
                        let meta = new.meta_mut();
                        meta.uid = new_uid();
                        meta.resource_version = String::new();
                        meta.creation_timestamp = Some(now_unix());
                        meta.deletion_timestamp = None;
                        meta.deletion_grace_period_seconds = None;
                        meta.generation = 1;
                        meta.name = name_owned.clone();
                    }
                    let mut guard = FinishGuard::new(strategy.begin_create(&new));
                    strategy.prepare_for_create(&mut new);
                    let causes = strategy.validate_create(&new);
                    if !causes.is_empty() {
                        return Err(invalid(&resource_name, &name_owned, causes));
                    }
                    if let Some(adm) = &admission {
                        adm(&new, None)?;
                    }
                    let ttl = compute_ttl(&ttl_func, &new, 0);
                    guard.mark_success();
                    Ok((new, ttl))
                }
                Some(existing_obj) => {
                    let mut new = updated_object_info(Some(existing_obj))?;
                    let existing_rv = existing_rv.unwrap_or("");
                    let requested_rv = new.meta().resource_version.clone();
                    if requested_rv.is_empty() {
                        if allow_unconditional {
                            new.meta_mut().resource_version = existing_rv.to_string();
                        } else {
                            return Err(invalid(
                                &resource_name,
                                &name_owned,
                                vec![StatusCause {
                                    reason: "FieldValueRequired".into(),
                                    message: "must be specified for an update".into(),
                                    field: "metadata.resourceVersion".into(),
                                }],
                            ));
                        }
                    } else if requested_rv != existing_rv {
                        return Err(ApiError::conflict());
                    }
                    if !preconditions.check(&existing_obj.meta().uid, existing_rv) {
                        return Err(ApiError::conflict());
                    }

                    let mut guard = FinishGuard::new(strategy.begin_update(&new, existing_obj));
                    strategy.prepare_for_update(&mut new, existing_obj);
                    let causes = strategy.validate_update(&new, existing_obj);
                    if !causes.is_empty() {
                        return Err(invalid(&resource_name, &name_owned, causes));
                    }
                    if let Some(adm) = &admission {
                        adm(&new, Some(existing_obj))?;
                    }

                    if should_delete_during_update(existing_obj, &new)
                        && strategy.allow_delete_during_update(existing_obj, &new)
                    {
                        guard.mark_success();
                        return Err(ApiError::Internal(EMPTIED_FINALIZERS_SENTINEL.into()));
                    }

                    let ttl = compute_ttl(&ttl_func, &new, 0);
                    guard.mark_success();
                    Ok((new, ttl))
                }
            }
        };

        let result = self
            .storage
            .guaranteed_update(&key, allow_create_on_update, &Preconditions::default(), try_update, options.dry_run)
            .await;

        match result {
            Ok((decoded, created)) => {
                let mut stored = decoded.object;
                stored.meta_mut().resource_version = decoded.resource_version;
                if created {
                    self.strategy.after_create(&stored);
                    self.metrics.record_create();
                } else {
                    self.strategy.after_update(&stored);
                    self.metrics.record_update();
                }
                Ok((self.decorate_one(stored), created))
            }
            Err(BackendError::Aborted(ApiError::Internal(msg))) if msg == EMPTIED_FINALIZERS_SENTINEL => {
                let delete_options = DeleteOptions {
                    preconditions: Some(preconditions_for_delete),
                    dry_run: options.dry_run,
                    ..Default::default()
                };
                let deleted = self.delete_physical(&key, name, &delete_options).await?;
                Ok((deleted, false))
            }
            Err(BackendError::PreconditionFailed) => {
                self.metrics.record_conflict();
                tracing::warn!("update lost the optimistic-concurrency race");
                Err(ApiError::conflict())
            }
            Err(e) => Err(interpret_backend_error(&self.resource_name, name, e)),
        }
    }

    // ---- Delete & graceful deletion state machine (spec §4.5.4) --------

    #[tracing::instrument(skip(self, options), fields(resource = %self.resource_name, name, grace = ?options.grace_period_seconds))]
    pub async fn delete(
        &self,
        namespace: Option<&str>,
        name: &str,
        mut options: DeleteOptions,
    ) -> Result<DeleteResult<K>, ApiError> {
        let key = self.key_for(namespace, name)?;
        let existing = self
            .storage
            .get::<K>(&key, &KvGetOptions::default())
            .await
            .map_err(|e| interpret_backend_error(&self.resource_name, name, e))?;
        let obj = existing.object;

        if options.grace_period_seconds.is_none() {
            options.grace_period_seconds = Some(0);
        }

        let decision = self.strategy.check_graceful_delete(&obj, &mut options);
        if decision.pending_graceful {
            tracing::debug!("delete already pending graceful termination");
            return Ok(DeleteResult::Object(self.decorate_one(obj)));
        }

        let gc_policy = self.strategy.default_garbage_collection_policy();
        let gc_policy = if self.config.enable_garbage_collection {
            gc_policy
        } else {
            GarbageCollectionPolicy::Unsupported
        };
        let new_finalizers = resolve_finalizers(
            &obj.meta().finalizers,
            options.propagation_policy,
            options.orphan_dependents,
            gc_policy,
        );

        let grace = options.grace_period_seconds.unwrap_or(0);
        let wants_graceful = decision.graceful || grace > 0;
        let finalizers_changed = new_finalizers != obj.meta().finalizers;

        if wants_graceful || !new_finalizers.is_empty() || finalizers_changed {
            let name_owned = name.to_string();
            let grace_i64 = grace;
            let new_finalizers_for_closure = new_finalizers.clone();
            let try_update = move |existing: Option<&K>, _rv: Option<&str>| -> Result<(K, Option<u64>), ApiError> {
                let existing = existing.ok_or_else(|| ApiError::NotFound {
                    resource: String::new(),
                    name: name_owned.clone(),
                })?;
                let mut updated = existing.clone();
                let meta = updated.meta_mut();
                meta.deletion_timestamp = Some(now_unix() + grace_i64);
                meta.deletion_grace_period_seconds = Some(grace_i64);
                meta.finalizers = new_finalizers_for_closure.clone();
                Ok((updated, None))
            };
            let updated = self
                .storage
                .guaranteed_update(&key, false, &Preconditions::default(), try_update, options.dry_run)
                .await
                .map_err(|e| interpret_backend_error(&self.resource_name, name, e))?;

            if !updated.0.object.meta().finalizers.is_empty() || grace > 0 {
                let mut stored = updated.0.object;
                stored.meta_mut().resource_version = updated.0.resource_version;
                self.strategy.after_update(&stored);
                tracing::debug!(finalizers = ?stored.meta().finalizers, "stamped deletionTimestamp, awaiting finalizers");
                return Ok(DeleteResult::Object(self.decorate_one(stored)));
            }
        }

        let deleted = self.delete_physical(&key, name, &options).await?;
        self.strategy.after_delete(&deleted);
        self.metrics.record_delete();
        tracing::info!("physically deleted");
        if self.config.return_deleted_object {
            Ok(DeleteResult::Object(deleted))
        } else {
            Ok(DeleteResult::Status(Status::success(StatusDetails {
                name: name.to_string(),
                resource: self.resource_name.clone(),
                uid: deleted.meta().uid.clone(),
                ..Default::default()
            })))
        }
    }

    async fn delete_physical(&self, key: &str, name: &str, options: &DeleteOptions) -> Result<K, ApiError> {
        let preconditions = options.preconditions.clone().unwrap_or_default();
        let result = self
            .storage
            .delete::<K, _>(key, &preconditions, |_obj: &K| Ok(()), options.dry_run)
            .await;
        match result {
            Ok(decoded) => {
                let mut stored = decoded.object;
                stored.meta_mut().resource_version = decoded.resource_version;
                Ok(self.decorate_one(stored))
            }
            Err(BackendError::NotFound) => {
                // Tolerated: we raced with another deleter. Return the last
                // known state rather than erroring (spec §4.5.4 step 6).
                let last_known = self.storage.get::<K>(key, &KvGetOptions::default()).await;
                match last_known {
                    Ok(decoded) => Ok(self.decorate_one(decoded.object)),
                    Err(_) => Err(self.not_found(name)),
                }
            }
            Err(e) => Err(interpret_backend_error(&self.resource_name, name, e)),
        }
    }

    // ---- DeleteCollection (spec §4.5.6) ---------------------------------

    #[tracing::instrument(skip_all, fields(resource = %self.resource_name))]
    pub async fn delete_collection(
        &self,
        namespace: Option<&str>,
        list_options: &ListOptions,
        delete_options: DeleteOptions,
    ) -> Result<Vec<K>, ApiError> {
        let (items, _) = self.list(namespace, list_options).await?;
        if items.is_empty() {
            return Ok(items);
        }

        let workers = self.config.delete_collection_workers.min(items.len()).max(1);
        tracing::info!(count = items.len(), workers, "deleting collection");
        let namespace_owned = namespace.map(str::to_string);
        let first_error: std::sync::Mutex<Option<ApiError>> = std::sync::Mutex::new(None);

        futures::stream::iter(items.iter())
            .for_each_concurrent(workers, |item| {
                let namespace_owned = namespace_owned.clone();
                let per_item_options = delete_options.clone();
                let first_error = &first_error;
                async move {
                    let result = self.delete(namespace_owned.as_deref(), item.name(), per_item_options).await;
                    match result {
                        Ok(_) => {}
                        Err(e) if e.is_not_found() => {}
                        Err(e) => {
                            let mut guard = first_error.lock().unwrap();
                            if guard.is_none() {
                                *guard = Some(e);
                            }
                        }
                    }
                }
            })
            .await;

        if let Some(e) = first_error.into_inner().unwrap() {
            return Err(e);
        }

        Ok(items)
    }

    // ---- List, Watch (spec §4.5.7) --------------------------------------

    #[tracing::instrument(level = "debug", skip_all, fields(resource = %self.resource_name))]
    pub async fn list(&self, namespace: Option<&str>, options: &ListOptions) -> Result<(Vec<K>, String), ApiError> {
        let predicate = (self.config.predicate_func)(options)?;
        let prefix = self.collection_prefix(namespace);

        let (effective_prefix, recursive) = match predicate.single_name() {
            Some(name) => (format!("{prefix}{name}"), false),
            None => (prefix, true),
        };

        let kv_opts = KvListOptions {
            resource_version: options.resource_version.clone(),
            resource_version_match: options.resource_version_match,
            limit: options.limit,
            continue_token: options.continue_token.clone(),
            recursive,
        };
        let (decoded, page) = self
            .storage
            .get_list::<K>(&effective_prefix, &kv_opts)
            .await
            .map_err(|e| interpret_backend_error(&self.resource_name, "", e))?;

        let items: Vec<K> = decoded
            .into_iter()
            .map(|d| {
                let mut obj = d.object;
                obj.meta_mut().resource_version = d.resource_version;
                obj
            })
            .filter(|obj| matches_predicate(&predicate, obj))
            .map(|obj| self.decorate_one(obj))
            .collect();

        Ok((items, page.resource_version))
    }

    #[tracing::instrument(skip_all, fields(resource = %self.resource_name))]
    pub async fn watch(
        &self,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> Result<BoxStream<'static, Result<Event<K>, ApiError>>, ApiError> {
        let predicate = (self.config.predicate_func)(options)?;
        let prefix = self.collection_prefix(namespace);
        let (effective_prefix, recursive) = match predicate.single_name() {
            Some(name) => (format!("{prefix}{name}"), false),
            None => (prefix, true),
        };

        let kv_opts = KvWatchOptions {
            resource_version: options.resource_version.clone(),
            recursive,
            allow_bookmarks: options.allow_watch_bookmarks,
        };
        let raw = self
            .storage
            .watch::<K>(&effective_prefix, &kv_opts)
            .await
            .map_err(|e| interpret_backend_error(&self.resource_name, "", e))?;

        let filtered = raw
            .filter(move |item| {
                let keep = match item {
                    Ok(Event::Bookmark { .. }) | Err(_) => true,
                    Ok(event) => event.object().is_none_or(|obj| matches_predicate(&predicate, obj)),
                };
                futures::future::ready(keep)
            })
            .boxed();

        let bookmark_period = options.allow_watch_bookmarks.then_some(options.bookmark_every).flatten();
        let ticked = with_bookmark_ticks(filtered, bookmark_period, options.resource_version.clone().unwrap_or_default());

        let metrics = self.metrics.clone();
        let counted = ticked
            .inspect(move |item| {
                if item.is_ok() {
                    metrics.record_watch_event();
                }
            })
            .boxed();

        Ok(decorate(counted, self.config.decorator.clone()))
    }

    #[tracing::instrument(level = "debug", skip(self), fields(resource = %self.resource_name))]
    pub async fn get(&self, namespace: Option<&str>, name: &str, resource_version: Option<String>) -> Result<K, ApiError> {
        let key = self.key_for(namespace, name)?;
        let opts = KvGetOptions { resource_version };
        let decoded = self
            .storage
            .get::<K>(&key, &opts)
            .await
            .map_err(|e| interpret_backend_error(&self.resource_name, name, e))?;
        let mut obj = decoded.object;
        obj.meta_mut().resource_version = decoded.resource_version;
        Ok(self.decorate_one(obj))
    }
}

/// Wraps a watch stream so that, when `period` is `Some`, a synthetic
/// `Bookmark` carrying the last-seen resourceVersion is yielded whenever the
/// stream has been otherwise idle for `period` (spec's supplemented
/// "Bookmark emission cadence" feature). `period` is `None` whenever
/// `allow_watch_bookmarks` is unset or the caller didn't opt into ticking.
fn with_bookmark_ticks<K: Resource + Send + 'static>(
    mut inner: BoxStream<'static, Result<Event<K>, ApiError>>,
    period: Option<std::time::Duration>,
    initial_resource_version: String,
) -> BoxStream<'static, Result<Event<K>, ApiError>> {
    let Some(period) = period else { return inner };
    stream! {
        let mut last_resource_version = initial_resource_version;
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // first tick is immediate; consume it before the loop
        loop {
            tokio::select! {
                biased;
                next = inner.next() => {
                    match next {
                        Some(Ok(event)) => {
                            if let Some(obj) = event.object() {
                                last_resource_version = obj.meta().resource_version.clone();
                            } else if let Event::Bookmark { resource_version } = &event {
                                last_resource_version = resource_version.clone();
                            }
                            yield Ok(event);
                        }
                        Some(Err(e)) => yield Err(e),
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    yield Ok(Event::Bookmark { resource_version: last_resource_version.clone() });
                }
            }
        }
    }
    .boxed()
}

fn matches_predicate<K: Resource>(predicate: &apiserver_types::Predicate, obj: &K) -> bool {
    if predicate.is_empty() {
        return true;
    }
    let meta = obj.meta();
    let mut fields = std::collections::BTreeMap::new();
    fields.insert("metadata.name".to_string(), meta.name.clone());
    if let Some(namespace) = &meta.namespace {
        fields.insert("metadata.namespace".to_string(), namespace.clone());
    }
    predicate.matches(&meta.labels, &fields)
}

fn interpret_backend_error(resource: &str, name: &str, err: BackendError) -> ApiError {
    match err {
        BackendError::NotFound => ApiError::NotFound {
            resource: resource.to_string(),
            name: name.to_string(),
        },
        BackendError::AlreadyExists => ApiError::AlreadyExists {
            resource: resource.to_string(),
            name: name.to_string(),
        },
        BackendError::PreconditionFailed => ApiError::conflict(),
        BackendError::Transient(msg) => ApiError::Internal(msg),
        BackendError::Aborted(e) => e,
    }
}
