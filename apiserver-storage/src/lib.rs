//! Generic resource store: a polymorphic CRUD+Watch engine over an opaque
//! `RawKv` backend (spec §4), with optimistic concurrency, graceful
//! deletion/finalizers, dry-run, and at-rest transformation.
//!
//! Nothing in this crate knows about HTTP or a wire encoding; `apiserver`
//! supplies a concrete `RawKv` and wires a `Store` to a transport.

pub mod config;
pub mod decorated_watcher;
pub mod dryrun;
pub mod finalizer;
pub mod kv;
pub mod metrics;
pub mod store;
pub mod strategy;
pub mod transformer;

pub use config::StoreConfig;
pub use decorated_watcher::Decorator;
pub use dryrun::{Decoded, DryRunnableStorage};
pub use finalizer::{resolve_finalizers, DELETE_DEPENDENTS_TOKEN, ORPHAN_TOKEN};
pub use kv::{
    BackendError, DeleteValidateFn, KvEvent, KvGetOptions, KvListOptions, KvPage, KvRecord, KvWatchOptions,
    NumericVersioner, RawKv, TryUpdateFn, TryUpdateOutcome, Versioner,
};
pub use metrics::{Metrics, StoreMetrics};
pub use store::{DeleteResult, Store};
pub use strategy::{GarbageCollectionPolicy, GracefulDeleteDecision, Strategy};
pub use transformer::{
    DecodedRecord, Direction, IdentityTransformer, NoopTransformerMetrics, TransformContext, TransformError,
    Transformer, TransformerChain, TransformerMetrics,
};
