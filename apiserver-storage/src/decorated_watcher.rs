//! Post-processes events emerging from a `RawKv` watch (spec §4.6, C6).
use apiserver_types::{ApiError, Event};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;

/// Applied to every object emerging from a watch or list before it reaches
/// the caller (e.g. stripping server-internal annotations).
pub type Decorator<K> = Arc<dyn Fn(&mut K) + Send + Sync>;

/// Wraps a raw decoded event stream, applying the store's decorator to the
/// object carried by `Added`/`Modified`/`Deleted` events. Respects upstream
/// closure: it ends exactly when the underlying stream ends.
pub fn decorate<K: Send + 'static>(
    stream: BoxStream<'static, Result<Event<K>, ApiError>>,
    decorator: Option<Decorator<K>>,
) -> BoxStream<'static, Result<Event<K>, ApiError>> {
    match decorator {
        None => stream,
        Some(decorator) => stream
            .map(move |item| {
                item.map(|event| {
                    event.map(|mut object| {
                        decorator(&mut object);
                        object
                    })
                })
            })
            .boxed(),
    }
}
