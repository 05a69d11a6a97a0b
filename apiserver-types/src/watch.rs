//! Watch stream event types.
use std::fmt::Debug;

/// A single totally-ordered event emitted by a [`crate::Resource`] watch,
/// or fanned out by a broadcaster.
#[derive(Clone)]
pub enum Event<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    /// Carries only a resource version, letting a consumer advance its
    /// bookmark without receiving a full object.
    Bookmark { resource_version: String },
    /// A non-fatal error surfaced mid-stream; the stream may still progress.
    Error(crate::error::ApiError),
}

impl<K> Debug for Event<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Added(_) => write!(f, "Added(..)"),
            Event::Modified(_) => write!(f, "Modified(..)"),
            Event::Deleted(_) => write!(f, "Deleted(..)"),
            Event::Bookmark { resource_version } => {
                write!(f, "Bookmark(resource_version={resource_version})")
            }
            Event::Error(e) => write!(f, "Error({e:?})"),
        }
    }
}

impl<K> Event<K> {
    /// The object carried by `Added`/`Modified`/`Deleted`, if any.
    pub fn object(&self) -> Option<&K> {
        match self {
            Event::Added(k) | Event::Modified(k) | Event::Deleted(k) => Some(k),
            Event::Bookmark { .. } | Event::Error(_) => None,
        }
    }

    pub fn map<L>(self, f: impl FnOnce(K) -> L) -> Event<L> {
        match self {
            Event::Added(k) => Event::Added(f(k)),
            Event::Modified(k) => Event::Modified(f(k)),
            Event::Deleted(k) => Event::Deleted(f(k)),
            Event::Bookmark { resource_version } => Event::Bookmark { resource_version },
            Event::Error(e) => Event::Error(e),
        }
    }
}
