//! `RawKV`, the versioned backend the store consumes (spec §4.1).
//!
//! This crate never implements a physical backend -- only the trait and the
//! shapes that cross it. `apiserver`'s `memkv` module supplies an in-memory
//! reference implementation for tests and local use.
use apiserver_types::{Preconditions, ResourceVersionMatch};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

/// A single versioned record as it exists at rest, before any transformer
/// has decoded it.
#[derive(Clone, Debug)]
pub struct KvRecord {
    pub key: String,
    pub value: Vec<u8>,
    pub resource_version: String,
    pub ttl_seconds: Option<u64>,
}

/// Errors a backend raises; the store interprets these into [`apiserver_types::ApiError`]
/// with resource-qualifying context (spec §7, "InterpretGetError" family).
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("key not found")]
    NotFound,
    #[error("key already exists")]
    AlreadyExists,
    #[error("precondition failed")]
    PreconditionFailed,
    #[error("transient backend error: {0}")]
    Transient(String),
    /// A validator or `tryUpdate` closure rejected the operation; propagated
    /// verbatim rather than reinterpreted.
    #[error(transparent)]
    Aborted(#[from] apiserver_types::ApiError),
}

#[derive(Clone, Debug, Default)]
pub struct KvGetOptions {
    pub resource_version: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct KvListOptions {
    pub resource_version: Option<String>,
    pub resource_version_match: ResourceVersionMatch,
    pub limit: Option<u32>,
    pub continue_token: Option<String>,
    pub recursive: bool,
}

#[derive(Clone, Debug, Default)]
pub struct KvWatchOptions {
    pub resource_version: Option<String>,
    pub recursive: bool,
    pub allow_bookmarks: bool,
}

pub struct KvPage {
    pub items: Vec<KvRecord>,
    pub continue_token: Option<String>,
    pub remaining_item_count: Option<i64>,
    pub resource_version: String,
}

#[derive(Clone, Debug)]
pub enum KvEvent {
    Added(KvRecord),
    Modified(KvRecord),
    Deleted(KvRecord),
    Bookmark { resource_version: String },
}

/// Outcome of a `tryUpdate` closure passed to [`RawKv::guaranteed_update`].
pub struct TryUpdateOutcome {
    pub new_value: Vec<u8>,
    pub ttl_seconds: Option<u64>,
}

pub type TryUpdateFn<'a> =
    Box<dyn FnMut(Option<&KvRecord>) -> BoxFuture<'a, Result<TryUpdateOutcome, BackendError>> + Send + 'a>;

pub type DeleteValidateFn<'a> =
    Box<dyn FnOnce(&KvRecord) -> BoxFuture<'a, Result<(), BackendError>> + Send + 'a>;

/// Reads/writes `resourceVersion` on a record as an opaque, monotonically
/// increasing integer (spec §4.1, "Versioner"). The store never interprets
/// the version itself -- only this capability does (spec §9).
pub trait Versioner: Send + Sync {
    fn parse(&self, resource_version: &str) -> Result<u64, BackendError>;
    fn format(&self, resource_version: u64) -> String;
}

/// Decimal-string encoding of a `u64` counter; what the in-memory reference
/// backend and most real backends (etcd's mod-revision) use in practice.
pub struct NumericVersioner;

impl Versioner for NumericVersioner {
    fn parse(&self, resource_version: &str) -> Result<u64, BackendError> {
        resource_version
            .parse()
            .map_err(|_| BackendError::Transient(format!("malformed resourceVersion {resource_version:?}")))
    }

    fn format(&self, resource_version: u64) -> String {
        resource_version.to_string()
    }
}

/// Atomic, versioned, prefix-watchable key/value backend (spec §4.1).
///
/// The store never bypasses this trait to mutate state.
#[async_trait]
pub trait RawKv: Send + Sync + 'static {
    async fn get(&self, key: &str, opts: &KvGetOptions) -> Result<KvRecord, BackendError>;

    async fn get_list(&self, key_prefix: &str, opts: &KvListOptions) -> Result<KvPage, BackendError>;

    async fn create(&self, key: &str, value: Vec<u8>, ttl_seconds: Option<u64>) -> Result<KvRecord, BackendError>;

    /// Atomic; `validate` runs against the loaded record before the delete commits.
    async fn delete(
        &self,
        key: &str,
        preconditions: &Preconditions,
        validate: DeleteValidateFn<'_>,
    ) -> Result<KvRecord, BackendError>;

    /// Optimistic-concurrency loop: reload on CAS conflict, reapply `try_update`,
    /// commit when the compare-and-swap on `resource_version` succeeds.
    async fn guaranteed_update(
        &self,
        key: &str,
        ignore_not_found: bool,
        preconditions: &Preconditions,
        try_update: TryUpdateFn<'_>,
    ) -> Result<KvRecord, BackendError>;

    /// Delivers events strictly after `opts.resource_version`.
    async fn watch(&self, key: &str, opts: &KvWatchOptions) -> Result<BoxStream<'static, KvEvent>, BackendError>;

    async fn count(&self, key_prefix: &str) -> Result<u64, BackendError>;
}
