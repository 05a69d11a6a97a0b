//! A generic, declarative resource API server, boiled down to its two
//! hard-engineering subsystems: a polymorphic CRUD+Watch [`Store`] over an
//! opaque [`RawKv`] backend, and an in-process [`Broadcaster`] fan-out bus.
//!
//! This crate is the facade: it re-exports `apiserver-types`,
//! `apiserver-storage`, and `apiserver-broadcast`, and supplies [`memkv`], an
//! in-memory `RawKv` reference implementation. Real deployments plug in a
//! real backend (etcd, a SQL table, whatever); `memkv` exists so the store
//! can be exercised end-to-end without one -- the physical backend itself is
//! explicitly out of scope (see the crate's accompanying design notes).
//!
//! ```
//! use apiserver::memkv::MemKv;
//! use apiserver_storage::RawKv as _;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let _kv = MemKv::new();
//! # }
//! ```

pub mod memkv;

pub use apiserver_broadcast::{Broadcaster, FullChannelPolicy, Stopped, Watcher};
pub use apiserver_storage::{
    BackendError, Decoded, DryRunnableStorage, KvEvent, KvGetOptions, KvListOptions, KvPage, KvRecord,
    KvWatchOptions, RawKv, Store, StoreConfig, Strategy, TransformerChain, Versioner,
};
pub use apiserver_types::{
    ApiError, CreateOptions, DeleteOptions, Event, ListOptions, ObjectMeta, Resource, ResourceObject, Status,
    UpdateOptions,
};
