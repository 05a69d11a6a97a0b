//! An in-memory, single-process [`RawKv`] reference backend.
//!
//! This is the "etcd, in-memory, etc." collaborator named but deliberately
//! left unspecified by the store's design (the physical backend is out of
//! scope): it exists so `Store` can be driven end-to-end in tests and
//! examples without standing up a real cluster store. It dogfoods
//! `apiserver-broadcast` for its own watch fan-out, the same way a real
//! backend's watch implementation would sit in front of a broadcaster.
use apiserver_broadcast::{Broadcaster, FullChannelPolicy};
use apiserver_storage::{
    BackendError, DeleteValidateFn, KvGetOptions, KvListOptions, KvPage, KvRecord, KvWatchOptions, NumericVersioner,
    RawKv, TryUpdateFn, TryUpdateOutcome, Versioner,
};
use apiserver_types::{Event, Preconditions};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// What kind of mutation produced a given record, for the purpose of
/// deciding whether a watch should see it as `Added`, `Modified`, or
/// `Deleted`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Added,
    Modified,
    Deleted,
}

/// A [`KvRecord`] tagged with the mutation that produced it, so the
/// broadcaster payload carries enough information to reconstruct the
/// `RawKv::watch` event taxonomy after fan-out.
#[derive(Clone, Debug)]
struct Tagged {
    kind: Kind,
    record: KvRecord,
}

const DEFAULT_WATCH_QUEUE: usize = 100;

/// A process-local, versioned, prefix-watchable key/value store.
///
/// Keys are plain strings; versions are a global monotonically increasing
/// counter (real backends typically scope this per-key-range, but a single
/// global counter satisfies every invariant the store requires and keeps
/// this reference implementation simple).
pub struct MemKv {
    state: parking_lot::RwLock<BTreeMap<String, KvRecord>>,
    /// Absolute deadlines for records created/updated with a TTL. Checked
    /// lazily on read rather than by a background sweep: this reference
    /// backend purges an expired key the next time anything touches it,
    /// which is enough to exercise the store's TTL plumbing without the
    /// complexity of a self-referential reaper task.
    expires_at: parking_lot::RwLock<BTreeMap<String, Instant>>,
    next_rv: AtomicU64,
    versioner: NumericVersioner,
    bus: Broadcaster<Tagged>,
}

impl Default for MemKv {
    fn default() -> Self {
        Self::new()
    }
}

impl MemKv {
    pub fn new() -> Self {
        Self {
            state: parking_lot::RwLock::new(BTreeMap::new()),
            expires_at: parking_lot::RwLock::new(BTreeMap::new()),
            next_rv: AtomicU64::new(0),
            versioner: NumericVersioner,
            bus: Broadcaster::new(DEFAULT_WATCH_QUEUE, FullChannelPolicy::WaitIfFull),
        }
    }

    fn bump_rv(&self) -> u64 {
        self.next_rv.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn matches(prefix: &str, recursive: bool, key: &str) -> bool {
        if recursive {
            key.starts_with(prefix)
        } else {
            key == prefix
        }
    }

    fn note_ttl(&self, key: &str, ttl_seconds: Option<u64>) {
        let mut deadlines = self.expires_at.write();
        match ttl_seconds {
            Some(secs) => {
                deadlines.insert(key.to_string(), Instant::now() + Duration::from_secs(secs));
            }
            None => {
                deadlines.remove(key);
            }
        }
    }

    /// Purges `key` from `state` if its TTL has elapsed. Called before every
    /// read/write so an expired record is never observed.
    fn reap_if_expired(&self, key: &str) {
        let expired = self
            .expires_at
            .read()
            .get(key)
            .is_some_and(|deadline| Instant::now() >= *deadline);
        if expired {
            self.state.write().remove(key);
            self.expires_at.write().remove(key);
        }
    }

    fn reap_prefix(&self, prefix: &str, recursive: bool) {
        let keys: Vec<String> = self
            .expires_at
            .read()
            .keys()
            .filter(|k| Self::matches(prefix, recursive, k))
            .cloned()
            .collect();
        for key in keys {
            self.reap_if_expired(&key);
        }
    }
}

#[async_trait]
impl RawKv for MemKv {
    async fn get(&self, key: &str, _opts: &KvGetOptions) -> Result<KvRecord, BackendError> {
        self.reap_if_expired(key);
        self.state.read().get(key).cloned().ok_or(BackendError::NotFound)
    }

    async fn get_list(&self, key_prefix: &str, opts: &KvListOptions) -> Result<KvPage, BackendError> {
        self.reap_prefix(key_prefix, opts.recursive);
        let guard = self.state.read();
        let mut items: Vec<KvRecord> = guard
            .iter()
            .filter(|(k, _)| Self::matches(key_prefix, opts.recursive, k))
            .map(|(_, v)| v.clone())
            .collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));

        let mut continue_token = None;
        if let Some(limit) = opts.limit {
            let limit = limit as usize;
            if items.len() > limit {
                continue_token = Some(items[limit].key.clone());
                items.truncate(limit);
            }
        }

        let resource_version = self.versioner.format(self.next_rv.load(Ordering::SeqCst));
        Ok(KvPage {
            items,
            continue_token,
            remaining_item_count: None,
            resource_version,
        })
    }

    async fn create(&self, key: &str, value: Vec<u8>, ttl_seconds: Option<u64>) -> Result<KvRecord, BackendError> {
        self.reap_if_expired(key);
        let mut guard = self.state.write();
        if guard.contains_key(key) {
            return Err(BackendError::AlreadyExists);
        }
        let rv = self.bump_rv();
        let record = KvRecord {
            key: key.to_string(),
            value,
            resource_version: self.versioner.format(rv),
            ttl_seconds,
        };
        guard.insert(key.to_string(), record.clone());
        drop(guard);
        self.note_ttl(key, ttl_seconds);
        self.bus
            .action(Event::Added(Tagged {
                kind: Kind::Added,
                record: record.clone(),
            }))
            .await
            .ok();
        Ok(record)
    }

    async fn delete(
        &self,
        key: &str,
        preconditions: &Preconditions,
        validate: DeleteValidateFn<'_>,
    ) -> Result<KvRecord, BackendError> {
        self.reap_if_expired(key);
        let existing = self.state.read().get(key).cloned().ok_or(BackendError::NotFound)?;
        if let Some(want) = &preconditions.resource_version {
            if *want != existing.resource_version {
                return Err(BackendError::PreconditionFailed);
            }
        }
        validate(&existing).await?;
        let removed = self.state.write().remove(key);
        self.expires_at.write().remove(key);
        let record = removed.ok_or(BackendError::NotFound)?;
        self.bus
            .action(Event::Added(Tagged {
                kind: Kind::Deleted,
                record: record.clone(),
            }))
            .await
            .ok();
        Ok(record)
    }

    async fn guaranteed_update(
        &self,
        key: &str,
        ignore_not_found: bool,
        preconditions: &Preconditions,
        mut try_update: TryUpdateFn<'_>,
    ) -> Result<KvRecord, BackendError> {
        self.reap_if_expired(key);
        let existing = self.state.read().get(key).cloned();
        if existing.is_none() && !ignore_not_found {
            return Err(BackendError::NotFound);
        }
        if let (Some(existing), Some(want)) = (&existing, &preconditions.resource_version) {
            if *want != existing.resource_version {
                return Err(BackendError::PreconditionFailed);
            }
        }
        let TryUpdateOutcome { new_value, ttl_seconds } = try_update(existing.as_ref()).await?;
        let rv = self.bump_rv();
        let record = KvRecord {
            key: key.to_string(),
            value: new_value,
            resource_version: self.versioner.format(rv),
            ttl_seconds,
        };
        self.state.write().insert(key.to_string(), record.clone());
        self.note_ttl(key, ttl_seconds);
        let kind = if existing.is_some() { Kind::Modified } else { Kind::Added };
        self.bus
            .action(Event::Added(Tagged {
                kind,
                record: record.clone(),
            }))
            .await
            .ok();
        Ok(record)
    }

    async fn watch(&self, key: &str, opts: &KvWatchOptions) -> Result<BoxStream<'static, apiserver_storage::KvEvent>, BackendError> {
        let prefix = key.to_string();
        let recursive = opts.recursive;

        let seed: Vec<Event<Tagged>> = if let Some(rv) = &opts.resource_version {
            let since = self.versioner.parse(rv)?;
            let guard = self.state.read();
            guard
                .iter()
                .filter(|(k, r)| {
                    Self::matches(&prefix, recursive, k)
                        && self.versioner.parse(&r.resource_version).unwrap_or(0) > since
                })
                .map(|(_, r)| {
                    Event::Added(Tagged {
                        kind: Kind::Added,
                        record: r.clone(),
                    })
                })
                .collect()
        } else {
            Vec::new()
        };

        let watcher = self
            .bus
            .watch_with_prefix(seed)
            .await
            .map_err(|_| BackendError::Transient("watch bus is shut down".into()))?;

        let prefix_for_filter = prefix.clone();
        let stream = watcher.filter_map(move |ev| {
            let keep = ev.object().is_some_and(|tagged| Self::matches(&prefix_for_filter, recursive, &tagged.record.key));
            let mapped = keep.then(|| {
                let tagged = ev.object().expect("checked above").clone();
                match tagged.kind {
                    Kind::Added => apiserver_storage::KvEvent::Added(tagged.record),
                    Kind::Modified => apiserver_storage::KvEvent::Modified(tagged.record),
                    Kind::Deleted => apiserver_storage::KvEvent::Deleted(tagged.record),
                }
            });
            futures::future::ready(mapped)
        });
        Ok(Box::pin(stream))
    }

    async fn count(&self, key_prefix: &str) -> Result<u64, BackendError> {
        self.reap_prefix(key_prefix, true);
        Ok(self
            .state
            .read()
            .keys()
            .filter(|k| Self::matches(key_prefix, true, k))
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let kv = MemKv::new();
        let created = kv.create("/widgets/a/x", b"hello".to_vec(), None).await.unwrap();
        assert_eq!(created.resource_version, "1");

        let got = kv.get("/widgets/a/x", &KvGetOptions::default()).await.unwrap();
        assert_eq!(got.value, b"hello");
    }

    #[tokio::test]
    async fn create_twice_is_already_exists() {
        let kv = MemKv::new();
        kv.create("/widgets/a/x", b"one".to_vec(), None).await.unwrap();
        let err = kv.create("/widgets/a/x", b"two".to_vec(), None).await.unwrap_err();
        assert!(matches!(err, BackendError::AlreadyExists));
    }

    #[tokio::test]
    async fn guaranteed_update_bumps_resource_version() {
        let kv = MemKv::new();
        kv.create("/widgets/a/x", b"v1".to_vec(), None).await.unwrap();
        let updated = kv
            .guaranteed_update(
                "/widgets/a/x",
                false,
                &Preconditions::default(),
                Box::new(|_existing| {
                    Box::pin(async move {
                        Ok(TryUpdateOutcome {
                            new_value: b"v2".to_vec(),
                            ttl_seconds: None,
                        })
                    })
                }),
            )
            .await
            .unwrap();
        assert_eq!(updated.resource_version, "2");
        assert_eq!(updated.value, b"v2");
    }

    #[tokio::test]
    async fn precondition_mismatch_on_delete_is_rejected() {
        let kv = MemKv::new();
        kv.create("/widgets/a/x", b"v1".to_vec(), None).await.unwrap();
        let preconditions = Preconditions {
            uid: None,
            resource_version: Some("999".to_string()),
        };
        let err = kv
            .delete("/widgets/a/x", &preconditions, Box::new(|_| Box::pin(async { Ok(()) })))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::PreconditionFailed));
    }

    #[tokio::test]
    async fn get_list_narrows_to_prefix() {
        let kv = MemKv::new();
        kv.create("/widgets/a/x", b"1".to_vec(), None).await.unwrap();
        kv.create("/widgets/a/y", b"2".to_vec(), None).await.unwrap();
        kv.create("/widgets/b/z", b"3".to_vec(), None).await.unwrap();

        let page = kv
            .get_list(
                "/widgets/a/",
                &KvListOptions {
                    recursive: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
    }

    #[tokio::test]
    async fn late_watcher_never_sees_events_before_it_subscribed() {
        let kv = MemKv::new();
        kv.create("/widgets/a/x", b"1".to_vec(), None).await.unwrap();

        let mut stream = kv
            .watch(
                "/widgets/",
                &KvWatchOptions {
                    recursive: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        kv.create("/widgets/a/y", b"2".to_vec(), None).await.unwrap();

        match stream.next().await.unwrap() {
            apiserver_storage::KvEvent::Added(record) => assert_eq!(record.key, "/widgets/a/y"),
            other => panic!("expected Added, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ttl_expires_records_on_next_read() {
        tokio::time::pause();
        let kv = MemKv::new();
        kv.create("/widgets/a/x", b"1".to_vec(), Some(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        let err = kv.get("/widgets/a/x", &KvGetOptions::default()).await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound));
    }
}
