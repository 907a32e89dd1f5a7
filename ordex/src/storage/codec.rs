//! Persisted value encoding.
//!
//! Every structured value the engine stores (segment directories, tree
//! nodes, bitmap and list buffers, control records) is written as JSON text
//! so the backing store stays readable with ordinary tools.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::storage::io::{BackingStore, StoreError};

/// Errors from encoding or decoding a stored value.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The value could not be encoded or the stored text is malformed.
    #[error("malformed stored value: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode `value` for storage.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode a stored value.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Read and decode the value under `key`, if any.
pub fn read<S, T, E>(store: &S, key: &[u8]) -> Result<Option<T>, E>
where
    S: BackingStore + ?Sized,
    T: DeserializeOwned,
    E: From<StoreError> + From<CodecError>,
{
    match store.get(key)? {
        Some(bytes) => Ok(Some(decode(&bytes)?)),
        None => Ok(None),
    }
}

/// Encode `value` and write it under `key`.
pub fn write<S, T, E>(store: &mut S, key: &[u8], value: &T) -> Result<(), E>
where
    S: BackingStore + ?Sized,
    T: Serialize + ?Sized,
    E: From<StoreError> + From<CodecError>,
{
    store.set(key, &encode(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::storage::MemoryStore;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error(transparent)]
        Store(#[from] StoreError),
        #[error(transparent)]
        Codec(#[from] CodecError),
    }

    #[test]
    fn test_encoding_is_readable_text() {
        let mut map = BTreeMap::new();
        map.insert(3u64, vec![1u8, 2]);
        let bytes = encode(&map).expect("encode");
        assert_eq!(std::str::from_utf8(&bytes).expect("utf8"), r#"{"3":[1,2]}"#);
        let back: BTreeMap<u64, Vec<u8>> = decode(&bytes).expect("decode");
        assert_eq!(back, map);
    }

    #[test]
    fn test_read_write_through_store() {
        let mut store = MemoryStore::new();
        write::<_, _, TestError>(&mut store, b"k", &vec![5u64, 7]).expect("write");
        let value: Option<Vec<u64>> = read::<_, _, TestError>(&store, b"k").expect("read");
        assert_eq!(value, Some(vec![5, 7]));
        let missing: Option<Vec<u64>> = read::<_, _, TestError>(&store, b"x").expect("read");
        assert_eq!(missing, None);
    }

    #[test]
    fn test_malformed_value_is_an_error() {
        let mut store = MemoryStore::new();
        store.set(b"k", b"{not json").expect("set");
        let result: Result<Option<Vec<u64>>, TestError> = read(&store, b"k");
        assert!(matches!(result, Err(TestError::Codec(_))));
    }
}
