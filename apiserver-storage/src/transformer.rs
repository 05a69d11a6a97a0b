//! Prefix-tagged at-rest encoding, rotation-aware (spec §4.2).
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;

/// Bytes uniquely identifying a record at rest (typically its key); bound
/// into authenticated-encryption transformers so ciphertext can't be moved.
#[derive(Clone, Debug)]
pub struct TransformContext(pub Vec<u8>);

impl TransformContext {
    pub fn from_key(key: &str) -> Self {
        Self(key.as_bytes().to_vec())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("transform failed: {0}")]
pub struct TransformError(pub String);

/// A byte-level codec between objects in memory and bytes at rest.
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn to_storage(&self, ctx: &TransformContext, data: &[u8]) -> Result<Vec<u8>, TransformError>;
    async fn from_storage(&self, ctx: &TransformContext, data: &[u8]) -> Result<Vec<u8>, TransformError>;
}

/// The no-op transformer. Per spec §6 its prefix must be `b""` and it must
/// be registered last in a chain, so it never shadows a real prefix.
pub struct IdentityTransformer;

#[async_trait]
impl Transformer for IdentityTransformer {
    async fn to_storage(&self, _ctx: &TransformContext, data: &[u8]) -> Result<Vec<u8>, TransformError> {
        Ok(data.to_vec())
    }

    async fn from_storage(&self, _ctx: &TransformContext, data: &[u8]) -> Result<Vec<u8>, TransformError> {
        Ok(data.to_vec())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    ToStorage,
    FromStorage,
}

/// Observability hook for the chain: one observation per call.
pub trait TransformerMetrics: Send + Sync {
    fn observe(&self, direction: Direction, prefix_label: &str, latency: std::time::Duration, error: bool);
}

pub struct NoopTransformerMetrics;

impl TransformerMetrics for NoopTransformerMetrics {
    fn observe(&self, _direction: Direction, _prefix_label: &str, _latency: std::time::Duration, _error: bool) {}
}

struct Entry {
    prefix: Vec<u8>,
    label: String,
    transformer: Arc<dyn Transformer>,
}

/// An ordered list of `(prefix, transformer)` pairs. Reads dispatch on
/// matching prefix with rotation-aware fallback; writes always use the
/// first entry.
pub struct TransformerChain {
    entries: Vec<Entry>,
    metrics: Arc<dyn TransformerMetrics>,
}

/// Result of a read-side decode: the plaintext plus whether it was served
/// by anything other than the first (current) entry.
pub struct DecodedRecord {
    pub data: Vec<u8>,
    pub stale: bool,
}

impl TransformerChain {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            metrics: Arc::new(NoopTransformerMetrics),
        }
    }

    pub fn with_metrics(metrics: Arc<dyn TransformerMetrics>) -> Self {
        Self {
            entries: Vec::new(),
            metrics,
        }
    }

    /// Registers a `(prefix, transformer)` pair. Order matters: the first
    /// registered entry is used for every write and is tried first on read.
    #[must_use]
    pub fn push(mut self, prefix: impl Into<Vec<u8>>, label: impl Into<String>, transformer: Arc<dyn Transformer>) -> Self {
        self.entries.push(Entry {
            prefix: prefix.into(),
            label: label.into(),
            transformer,
        });
        self
    }

    /// Always uses the first entry; its prefix is prepended to the output.
    pub async fn to_storage(&self, ctx: &TransformContext, data: &[u8]) -> Result<Vec<u8>, TransformError> {
        let entry = self
            .entries
            .first()
            .ok_or_else(|| TransformError("transformer chain is empty".into()))?;
        let start = Instant::now();
        let result = entry.transformer.to_storage(ctx, data).await;
        self.metrics
            .observe(Direction::ToStorage, &entry.label, start.elapsed(), result.is_err());
        let mut out = entry.prefix.clone();
        out.extend(result?);
        Ok(out)
    }

    /// Dispatches on prefix match, with rotation-aware fallback across
    /// overlapping prefixes. `stale` is true iff the serving entry is not
    /// the first in the chain (signals the store to rewrite on next mutation).
    pub async fn from_storage(&self, ctx: &TransformContext, raw: &[u8]) -> Result<DecodedRecord, TransformError> {
        let mut collected_errors = Vec::new();
        for (idx, entry) in self.entries.iter().enumerate() {
            if !raw.starts_with(&entry.prefix) {
                continue;
            }
            let stripped = &raw[entry.prefix.len()..];
            let start = Instant::now();
            let result = entry.transformer.from_storage(ctx, stripped).await;
            self.metrics
                .observe(Direction::FromStorage, &entry.label, start.elapsed(), result.is_err());
            match result {
                Ok(data) => {
                    if idx != 0 {
                        tracing::debug!(served_by = %entry.label, "read served by a non-primary transformer, flagging stale");
                    }
                    return Ok(DecodedRecord { data, stale: idx != 0 });
                }
                Err(e) => collected_errors.push(format!("{}: {e}", entry.label)),
            }
        }
        Err(TransformError(format!(
            "no transformer could decode payload (tried: {})",
            collected_errors.join("; ")
        )))
    }
}

impl Default for TransformerChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rot13;

    #[async_trait]
    impl Transformer for Rot13 {
        async fn to_storage(&self, _ctx: &TransformContext, data: &[u8]) -> Result<Vec<u8>, TransformError> {
            Ok(data.iter().map(|b| b.wrapping_add(1)).collect())
        }

        async fn from_storage(&self, _ctx: &TransformContext, data: &[u8]) -> Result<Vec<u8>, TransformError> {
            Ok(data.iter().map(|b| b.wrapping_sub(1)).collect())
        }
    }

    #[tokio::test]
    async fn round_trips_through_first_entry() {
        let chain = TransformerChain::new()
            .push(b"v1:".to_vec(), "v1", Arc::new(Rot13))
            .push(Vec::new(), "identity", Arc::new(IdentityTransformer));
        let ctx = TransformContext::from_key("/widgets/a/x");

        let encoded = chain.to_storage(&ctx, b"hello").await.unwrap();
        assert!(encoded.starts_with(b"v1:"));

        let decoded = chain.from_storage(&ctx, &encoded).await.unwrap();
        assert_eq!(decoded.data, b"hello");
        assert!(!decoded.stale);
    }

    #[tokio::test]
    async fn legacy_identity_payload_is_flagged_stale() {
        let chain = TransformerChain::new()
            .push(b"v1:".to_vec(), "v1", Arc::new(Rot13))
            .push(Vec::new(), "identity", Arc::new(IdentityTransformer));
        let ctx = TransformContext::from_key("/widgets/a/x");

        let decoded = chain.from_storage(&ctx, b"plain-legacy-value").await.unwrap();
        assert_eq!(decoded.data, b"plain-legacy-value");
        assert!(decoded.stale);
    }

    #[tokio::test]
    async fn no_matching_entry_is_an_error() {
        let chain = TransformerChain::new().push(b"v1:".to_vec(), "v1", Arc::new(Rot13));
        let ctx = TransformContext::from_key("/widgets/a/x");
        assert!(chain.from_storage(&ctx, b"no-prefix-here").await.is_err());
    }
}
