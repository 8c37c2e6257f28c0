//! Entity to property-map and byte-payload conversion.

use crate::CodecError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::any::type_name;

/// Native property representation handed to a Store.
pub type Properties = Map<String, Value>;

/// Converts entities to store properties and cache payloads.
pub trait EntityCodec<T>: Send + Sync {
    fn to_properties(&self, entity: &T) -> Result<Properties, CodecError>;

    fn from_properties(&self, properties: Properties) -> Result<T, CodecError>;

    fn encode(&self, entity: &T) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, payload: &[u8]) -> Result<T, CodecError>;
}

/// serde_json codec for any serializable entity.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

fn short_type_name<T>() -> String {
    let full = type_name::<T>();
    full.rsplit("::").next().unwrap_or(full).to_string()
}

impl<T> EntityCodec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn to_properties(&self, entity: &T) -> Result<Properties, CodecError> {
        match serde_json::to_value(entity) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(CodecError::NotAnObject {
                kind: short_type_name::<T>(),
            }),
            Err(e) => Err(CodecError::Encode {
                kind: short_type_name::<T>(),
                reason: e.to_string(),
            }),
        }
    }

    fn from_properties(&self, properties: Properties) -> Result<T, CodecError> {
        serde_json::from_value(Value::Object(properties)).map_err(|e| CodecError::Decode {
            kind: short_type_name::<T>(),
            reason: e.to_string(),
        })
    }

    fn encode(&self, entity: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(entity).map_err(|e| CodecError::Encode {
            kind: short_type_name::<T>(),
            reason: e.to_string(),
        })
    }

    fn decode(&self, payload: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(payload).map_err(|e| CodecError::Decode {
            kind: short_type_name::<T>(),
            reason: e.to_string(),
        })
    }
}
