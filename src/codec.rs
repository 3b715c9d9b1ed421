//! Payload encodings for the gRPC surface.
//!
//! Flow requests and responses travel as opaque bytes; the codec turns them
//! into JSON values and back.

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("msgpack encode failed: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
    #[error("msgpack decode failed: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

pub trait PayloadCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError>;
}

/// MessagePack with named fields, the wire format of `FlowRunner/Run`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl PayloadCodec for MsgPackCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        Ok(rmp_serde::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn msgpack_keeps_integers_and_floats_apart() {
        let value = json!({
            "riskScore": 72,
            "analysis": [{"condition": "Pneumonia", "probability": 0.82}],
            "rationale": "stub"
        });
        let bytes = MsgPackCodec.encode(&value).unwrap();
        let back: Value = MsgPackCodec.decode(&bytes).unwrap();
        assert_eq!(back, value);
        assert!(back["riskScore"].is_u64());
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = MsgPackCodec.decode::<Value>(&[0xc1]).unwrap_err();
        assert!(matches!(err, CodecError::MsgPackDecode(_)));
    }
}
