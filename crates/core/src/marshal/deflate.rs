use std::io::{Read, Write};

use cachette_domain::CacheError;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::ports::Marshaller;

/// Default ceiling on a decompressed payload.
const DEFAULT_MAX_DECODED_LEN: usize = 64 * 1024 * 1024;

/// Compresses the output of another marshaller with raw deflate.
///
/// Decompression stops at `max_decoded_len` bytes so a hostile entry
/// cannot inflate without bound.
#[derive(Debug, Clone)]
pub struct DeflateMarshaller<M> {
    inner: M,
    level: Compression,
    max_decoded_len: usize,
}

impl<M> DeflateMarshaller<M> {
    /// Wrap `inner` with the default compression level and size limit.
    pub fn new(inner: M) -> Self {
        Self { inner, level: Compression::default(), max_decoded_len: DEFAULT_MAX_DECODED_LEN }
    }

    /// Set the compression level (0-9).
    #[must_use]
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = Compression::new(level.min(9));
        self
    }

    /// Set the largest decompressed payload accepted.
    #[must_use]
    pub const fn with_max_decoded_len(mut self, max: usize) -> Self {
        self.max_decoded_len = max;
        self
    }
}

impl<V, M> Marshaller<V> for DeflateMarshaller<M>
where
    M: Marshaller<V>,
{
    fn marshall(&self, value: &V) -> Result<Vec<u8>, CacheError> {
        let raw = self.inner.marshall(value)?;
        let mut encoder = DeflateEncoder::new(Vec::with_capacity(raw.len() / 2), self.level);
        encoder.write_all(&raw).map_err(|e| CacheError::Serialization(format!("deflate: {e}")))?;
        encoder.finish().map_err(|e| CacheError::Serialization(format!("deflate: {e}")))
    }

    fn unmarshall(&self, bytes: &[u8]) -> Result<V, CacheError> {
        let limit = u64::try_from(self.max_decoded_len).unwrap_or(u64::MAX).saturating_add(1);
        let mut raw = Vec::new();
        DeflateDecoder::new(bytes)
            .take(limit)
            .read_to_end(&mut raw)
            .map_err(|e| CacheError::Serialization(format!("inflate: {e}")))?;
        if raw.len() > self.max_decoded_len {
            return Err(CacheError::Serialization(format!(
                "inflated payload exceeds {} bytes",
                self.max_decoded_len
            )));
        }
        self.inner.unmarshall(&raw)
    }
}
