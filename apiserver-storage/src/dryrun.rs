//! Wraps `RawKv` + the transformer chain; gates mutating calls on `dry_run`
//! while preserving the full output contract (spec §4.3).
use crate::kv::{
    BackendError, KvGetOptions, KvListOptions, KvPage, KvRecord, KvWatchOptions, NumericVersioner, RawKv,
    TryUpdateOutcome, Versioner,
};
use crate::transformer::{TransformContext, TransformerChain};
use apiserver_types::{ApiError, Preconditions};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// A decoded record plus whether the transformer chain served it from
/// anything other than its first (current) entry.
pub struct Decoded<K> {
    pub object: K,
    pub resource_version: String,
    pub stale: bool,
}

/// Typed, transform-aware, dry-run-capable storage. Every write this type
/// performs goes through `RawKv`; it never bypasses it.
pub struct DryRunnableStorage<B> {
    backend: Arc<B>,
    transformer: Arc<TransformerChain>,
    versioner: Arc<dyn Versioner>,
}

impl<B: RawKv> DryRunnableStorage<B> {
    pub fn new(backend: Arc<B>, transformer: Arc<TransformerChain>) -> Self {
        Self {
            backend,
            transformer,
            versioner: Arc::new(NumericVersioner),
        }
    }

    pub fn with_versioner(mut self, versioner: Arc<dyn Versioner>) -> Self {
        self.versioner = versioner;
        self
    }

    async fn decode<K: DeserializeOwned>(&self, key: &str, record: &KvRecord) -> Result<Decoded<K>, BackendError> {
        let ctx = TransformContext::from_key(key);
        let decoded = self
            .transformer
            .from_storage(&ctx, &record.value)
            .await
            .map_err(|e| BackendError::Transient(e.0))?;
        let object: K = serde_json::from_slice(&decoded.data)
            .map_err(|e| BackendError::Transient(format!("decode error: {e}")))?;
        Ok(Decoded {
            object,
            resource_version: record.resource_version.clone(),
            stale: decoded.stale,
        })
    }

    async fn encode<K: Serialize>(&self, key: &str, object: &K) -> Result<Vec<u8>, BackendError> {
        let plain =
            serde_json::to_vec(object).map_err(|e| BackendError::Transient(format!("encode error: {e}")))?;
        let ctx = TransformContext::from_key(key);
        self.transformer
            .to_storage(&ctx, &plain)
            .await
            .map_err(|e| BackendError::Transient(e.0))
    }

    pub async fn get<K: DeserializeOwned>(&self, key: &str, opts: &KvGetOptions) -> Result<Decoded<K>, BackendError> {
        let record = self.backend.get(key, opts).await?;
        self.decode(key, &record).await
    }

    pub async fn get_list<K: DeserializeOwned>(
        &self,
        key_prefix: &str,
        opts: &KvListOptions,
    ) -> Result<(Vec<Decoded<K>>, KvPage), BackendError> {
        let page = self.backend.get_list(key_prefix, opts).await?;
        let mut out = Vec::with_capacity(page.items.len());
        for record in &page.items {
            out.push(self.decode(&record.key, record).await?);
        }
        Ok((
            out,
            KvPage {
                items: Vec::new(),
                continue_token: page.continue_token.clone(),
                remaining_item_count: page.remaining_item_count,
                resource_version: page.resource_version.clone(),
            },
        ))
    }

    /// Real backend commit unless `dry_run`, in which case the write is
    /// simulated: the object is returned as it would look post-commit
    /// (populated `resourceVersion`) without touching the backend.
    pub async fn create<K: Serialize + DeserializeOwned + Clone>(
        &self,
        key: &str,
        object: &K,
        ttl_seconds: Option<u64>,
        dry_run: bool,
    ) -> Result<Decoded<K>, BackendError> {
        if dry_run {
            // A create never conflicts with itself; simulate the first
            // revision a real commit would assign.
            return Ok(Decoded {
                object: object.clone(),
                resource_version: self.versioner.format(1),
                stale: false,
            });
        }
        let bytes = self.encode(key, object).await?;
        let record = self.backend.create(key, bytes, ttl_seconds).await?;
        self.decode(key, &record).await
    }

    pub async fn delete<K, V>(
        &self,
        key: &str,
        preconditions: &Preconditions,
        validate: V,
        dry_run: bool,
    ) -> Result<Decoded<K>, BackendError>
    where
        K: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        V: FnOnce(&K) -> Result<(), ApiError> + Send + 'static,
    {
        if dry_run {
            let existing = self.get::<K>(key, &KvGetOptions::default()).await?;
            validate(&existing.object).map_err(BackendError::Aborted)?;
            return Ok(existing);
        }
        let transformer = Arc::clone(&self.transformer);
        let key_owned = key.to_string();
        let record = self
            .backend
            .delete(
                key,
                preconditions,
                Box::new(move |record: &KvRecord| {
                    let record = record.clone();
                    let transformer = Arc::clone(&transformer);
                    Box::pin(async move {
                        let ctx = TransformContext::from_key(&key_owned);
                        let decoded = transformer
                            .from_storage(&ctx, &record.value)
                            .await
                            .map_err(|e| BackendError::Transient(e.0))?;
                        let object: K = serde_json::from_slice(&decoded.data)
                            .map_err(|e| BackendError::Transient(format!("decode error: {e}")))?;
                        validate(&object).map_err(BackendError::Aborted)
                    })
                }),
            )
            .await?;
        self.decode(key, &record).await
    }

    /// Optimistic-concurrency update. `try_update` sees the decoded existing
    /// object (`None` if the key is absent) and returns the intended new
    /// object plus an optional TTL override. Under `dry_run`, this runs
    /// `try_update` exactly once against the real current state and never
    /// commits (spec §4.3's ephemeral-snapshot strategy).
    pub async fn guaranteed_update<K, F>(
        &self,
        key: &str,
        ignore_not_found: bool,
        preconditions: &Preconditions,
        mut try_update: F,
        dry_run: bool,
    ) -> Result<(Decoded<K>, bool), BackendError>
    where
        K: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnMut(Option<&K>, Option<&str>) -> Result<(K, Option<u64>), ApiError> + Send + 'static,
    {
        if dry_run {
            let existing = match self.backend.get(key, &KvGetOptions::default()).await {
                Ok(record) => Some(self.decode::<K>(key, &record).await?),
                Err(BackendError::NotFound) if ignore_not_found => None,
                Err(e) => return Err(e),
            };
            let existing_obj = existing.as_ref().map(|d| &d.object);
            let existing_rv = existing.as_ref().map(|d| d.resource_version.as_str());
            let (new_obj, _ttl) = try_update(existing_obj, existing_rv)
                .map_err(BackendError::Aborted)?;
            let next_rv = existing
                .as_ref()
                .and_then(|d| self.versioner.parse(&d.resource_version).ok())
                .unwrap_or(0)
                + 1;
            return Ok((
                Decoded {
                    object: new_obj,
                    resource_version: self.versioner.format(next_rv),
                    stale: false,
                },
                existing.is_none(),
            ));
        }

        let created = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let created_flag = Arc::clone(&created);
        let transformer = Arc::clone(&self.transformer);
        let key_owned = key.to_string();
        let record = self
            .backend
            .guaranteed_update(
                key,
                ignore_not_found,
                preconditions,
                Box::new(move |existing: Option<&KvRecord>| {
                    let existing = existing.cloned();
                    let transformer = Arc::clone(&transformer);
                    let key_owned = key_owned.clone();
                    let created_flag = Arc::clone(&created_flag);
                    let mut try_update = &mut try_update;
                    Box::pin(async move {
                        let decoded_existing = match &existing {
                            Some(record) => {
                                let ctx = TransformContext::from_key(&key_owned);
                                let decoded = transformer
                                    .from_storage(&ctx, &record.value)
                                    .await
                                    .map_err(|e| BackendError::Transient(e.0))?;
                                let object: K = serde_json::from_slice(&decoded.data)
                                    .map_err(|e| BackendError::Transient(format!("decode error: {e}")))?;
                                Some((object, record.resource_version.clone()))
                            }
                            None => {
                                created_flag.store(true, std::sync::atomic::Ordering::Relaxed);
                                None
                            }
                        };
                        let (obj_ref, rv_ref) = match &decoded_existing {
                            Some((obj, rv)) => (Some(obj), Some(rv.as_str())),
                            None => (None, None),
                        };
                        let (new_obj, ttl) = try_update(obj_ref, rv_ref).map_err(BackendError::Aborted)?;
                        let ctx = TransformContext::from_key(&key_owned);
                        let plain = serde_json::to_vec(&new_obj)
                            .map_err(|e| BackendError::Transient(format!("encode error: {e}")))?;
                        let new_value = transformer
                            .to_storage(&ctx, &plain)
                            .await
                            .map_err(|e| BackendError::Transient(e.0))?;
                        Ok(TryUpdateOutcome {
                            new_value,
                            ttl_seconds: ttl,
                        })
                    })
                }),
            )
            .await?;
        let decoded = self.decode(key, &record).await?;
        Ok((decoded, created.load(std::sync::atomic::Ordering::Relaxed)))
    }

    pub async fn watch<K: DeserializeOwned + Send + 'static>(
        &self,
        key: &str,
        opts: &KvWatchOptions,
    ) -> Result<BoxStream<'static, Result<apiserver_types::Event<K>, ApiError>>, BackendError> {
        let raw = self.backend.watch(key, opts).await?;
        let transformer = Arc::clone(&self.transformer);
        let key_owned = key.to_string();
        let decoded = raw.then(move |event| {
            let transformer = Arc::clone(&transformer);
            let key_owned = key_owned.clone();
            async move { decode_kv_event::<K>(&transformer, &key_owned, event).await }
        });
        Ok(Box::pin(decoded))
    }

    pub async fn count(&self, key_prefix: &str) -> Result<u64, BackendError> {
        self.backend.count(key_prefix).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvPage, KvWatchOptions};
    use crate::transformer::IdentityTransformer;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Clone, Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
    struct Payload {
        value: String,
    }

    struct FakeKv {
        state: parking_lot::Mutex<BTreeMap<String, KvRecord>>,
        next_rv: AtomicU64,
    }

    impl FakeKv {
        fn new() -> Self {
            Self {
                state: parking_lot::Mutex::new(BTreeMap::new()),
                next_rv: AtomicU64::new(0),
            }
        }

        fn bump(&self) -> String {
            (self.next_rv.fetch_add(1, Ordering::SeqCst) + 1).to_string()
        }
    }

    #[async_trait::async_trait]
    impl RawKv for FakeKv {
        async fn get(&self, key: &str, _opts: &KvGetOptions) -> Result<KvRecord, BackendError> {
            self.state.lock().get(key).cloned().ok_or(BackendError::NotFound)
        }

        async fn get_list(&self, key_prefix: &str, _opts: &KvListOptions) -> Result<KvPage, BackendError> {
            let items = self
                .state
                .lock()
                .iter()
                .filter(|(k, _)| k.starts_with(key_prefix))
                .map(|(_, v)| v.clone())
                .collect();
            Ok(KvPage {
                items,
                continue_token: None,
                remaining_item_count: None,
                resource_version: self.next_rv.load(Ordering::SeqCst).to_string(),
            })
        }

        async fn create(&self, key: &str, value: Vec<u8>, ttl_seconds: Option<u64>) -> Result<KvRecord, BackendError> {
            let mut guard = self.state.lock();
            if guard.contains_key(key) {
                return Err(BackendError::AlreadyExists);
            }
            let record = KvRecord {
                key: key.to_string(),
                value,
                resource_version: self.bump(),
                ttl_seconds,
            };
            guard.insert(key.to_string(), record.clone());
            Ok(record)
        }

        async fn delete(
            &self,
            key: &str,
            _preconditions: &Preconditions,
            validate: crate::kv::DeleteValidateFn<'_>,
        ) -> Result<KvRecord, BackendError> {
            let existing = self.state.lock().get(key).cloned().ok_or(BackendError::NotFound)?;
            validate(&existing).await?;
            self.state.lock().remove(key).ok_or(BackendError::NotFound)
        }

        async fn guaranteed_update(
            &self,
            key: &str,
            ignore_not_found: bool,
            _preconditions: &Preconditions,
            mut try_update: crate::kv::TryUpdateFn<'_>,
        ) -> Result<KvRecord, BackendError> {
            let existing = self.state.lock().get(key).cloned();
            if existing.is_none() && !ignore_not_found {
                return Err(BackendError::NotFound);
            }
            let outcome = try_update(existing.as_ref()).await?;
            let record = KvRecord {
                key: key.to_string(),
                value: outcome.new_value,
                resource_version: self.bump(),
                ttl_seconds: outcome.ttl_seconds,
            };
            self.state.lock().insert(key.to_string(), record.clone());
            Ok(record)
        }

        async fn watch(&self, _key: &str, _opts: &KvWatchOptions) -> Result<BoxStream<'static, crate::kv::KvEvent>, BackendError> {
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn count(&self, key_prefix: &str) -> Result<u64, BackendError> {
            Ok(self.state.lock().keys().filter(|k| k.starts_with(key_prefix)).count() as u64)
        }
    }

    fn storage() -> DryRunnableStorage<FakeKv> {
        let transformer = Arc::new(TransformerChain::new().push(Vec::new(), "identity", Arc::new(IdentityTransformer)));
        DryRunnableStorage::new(Arc::new(FakeKv::new()), transformer)
    }

    #[tokio::test]
    async fn dry_run_create_reports_rv_one_without_writing() {
        let storage = storage();
        let obj = Payload { value: "hello".into() };
        let decoded = storage.create("/x", &obj, None, true).await.unwrap();
        assert_eq!(decoded.resource_version, "1");
        assert_eq!(decoded.object, obj);

        let err = storage.get::<Payload>("/x", &KvGetOptions::default()).await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound));
    }

    #[tokio::test]
    async fn real_create_then_dry_run_update_does_not_mutate_backend() {
        let storage = storage();
        let obj = Payload { value: "v1".into() };
        storage.create("/x", &obj, None, false).await.unwrap();

        let (decoded, created) = storage
            .guaranteed_update::<Payload, _>(
                "/x",
                false,
                &Preconditions::default(),
                |existing, _rv| {
                    let mut obj = existing.unwrap().clone();
                    obj.value = "v2".into();
                    Ok((obj, None))
                },
                true,
            )
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(decoded.object.value, "v2");

        // The dry-run update must not be visible to a real read.
        let real = storage.get::<Payload>("/x", &KvGetOptions::default()).await.unwrap();
        assert_eq!(real.object.value, "v1");
    }

    #[tokio::test]
    async fn dry_run_delete_returns_existing_object_without_removing_it() {
        let storage = storage();
        let obj = Payload { value: "v1".into() };
        storage.create("/x", &obj, None, false).await.unwrap();

        let decoded = storage
            .delete::<Payload, _>("/x", &Preconditions::default(), |_obj: &Payload| Ok(()), true)
            .await
            .unwrap();
        assert_eq!(decoded.object, obj);

        let still_there = storage.get::<Payload>("/x", &KvGetOptions::default()).await.unwrap();
        assert_eq!(still_there.object, obj);
    }

    #[tokio::test]
    async fn encode_then_decode_round_trips_through_the_chain() {
        let storage = storage();
        let created = storage.create("/x", &Payload { value: "abc".into() }, None, false).await.unwrap();
        assert_eq!(created.resource_version, "1");
        assert!(!created.stale);

        let fetched = storage.get::<Payload>("/x", &KvGetOptions::default()).await.unwrap();
        assert_eq!(fetched.object.value, "abc");
    }
}

async fn decode_kv_event<K: DeserializeOwned>(
    transformer: &TransformerChain,
    key: &str,
    event: crate::kv::KvEvent,
) -> Result<apiserver_types::Event<K>, ApiError> {
    use crate::kv::KvEvent;
    let decode_one = |record: &KvRecord| async move {
        let ctx = TransformContext::from_key(key);
        let decoded = transformer
            .from_storage(&ctx, &record.value)
            .await
            .map_err(|e| ApiError::Internal(e.0))?;
        serde_json::from_slice::<K>(&decoded.data).map_err(|e| ApiError::Internal(format!("decode error: {e}")))
    };
    match event {
        KvEvent::Added(r) => Ok(apiserver_types::Event::Added(decode_one(&r).await?)),
        KvEvent::Modified(r) => Ok(apiserver_types::Event::Modified(decode_one(&r).await?)),
        KvEvent::Deleted(r) => Ok(apiserver_types::Event::Deleted(decode_one(&r).await?)),
        KvEvent::Bookmark { resource_version } => Ok(apiserver_types::Event::Bookmark { resource_version }),
    }
}

