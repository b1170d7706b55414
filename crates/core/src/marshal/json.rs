use cachette_domain::CacheError;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::lossless;
use crate::ports::Marshaller;

/// Serializes values as JSON.
///
/// Decoding is driven by the target type, so a payload can only ever
/// produce a `V`; anything else is rejected as a serialization error.
/// Values JSON cannot reproduce (non-finite floats, `Some(None)`) are
/// refused on encode instead of being stored in a changed form.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaller;

impl<V> Marshaller<V> for JsonMarshaller
where
    V: Serialize + DeserializeOwned,
{
    fn marshall(&self, value: &V) -> Result<Vec<u8>, CacheError> {
        lossless::check(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn unmarshall(&self, bytes: &[u8]) -> Result<V, CacheError> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Serialization(e.to_string()))
    }
}
