//! Wire format for values stored in the backing store.
//!
//! ```text
//! ┌────────┬──────────────────────────────────────┐
//! │ marker │ payload                              │
//! ├────────┼──────────────────────────────────────┤
//! │  'R'   │ canonical JSON text                  │
//! │  'Z'   │ zlib-compressed canonical JSON text  │
//! └────────┴──────────────────────────────────────┘
//! ```
//!
//! Canonical means `serde_json` with sorted object keys, so equal values
//! always encode to equal bytes.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde_json::Value;

use crate::error::CodecError;

pub const RAW_MARKER: u8 = b'R';
pub const COMPRESSED_MARKER: u8 = b'Z';

/// How a payload was stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    Compressed,
}

/// An encoded payload ready for the backing store.
#[derive(Debug, Clone)]
pub struct EncodedValue {
    pub bytes: Vec<u8>,
    pub encoding: Encoding,
}

#[derive(Debug, Clone)]
pub struct ValueCodec {
    compression_threshold: usize,
}

impl ValueCodec {
    pub fn new(compression_threshold: usize) -> Self {
        Self {
            compression_threshold,
        }
    }

    pub fn encode(&self, value: &Value) -> Result<EncodedValue, CodecError> {
        let json = serde_json::to_vec(value)?;

        if json.len() <= self.compression_threshold {
            let mut bytes = Vec::with_capacity(json.len() + 1);
            bytes.push(RAW_MARKER);
            bytes.extend_from_slice(&json);
            return Ok(EncodedValue {
                bytes,
                encoding: Encoding::Raw,
            });
        }

        let mut encoder = ZlibEncoder::new(vec![COMPRESSED_MARKER], Compression::fast());
        encoder.write_all(&json).map_err(CodecError::Compress)?;
        let bytes = encoder.finish().map_err(CodecError::Compress)?;
        Ok(EncodedValue {
            bytes,
            encoding: Encoding::Compressed,
        })
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        match bytes.split_first() {
            None => Err(CodecError::Empty),
            Some((&RAW_MARKER, json)) => Ok(serde_json::from_slice(json)?),
            Some((&COMPRESSED_MARKER, compressed)) => {
                let mut json = Vec::with_capacity(compressed.len() * 4);
                ZlibDecoder::new(compressed)
                    .read_to_end(&mut json)
                    .map_err(CodecError::Decompress)?;
                Ok(serde_json::from_slice(&json)?)
            }
            Some((&marker, _)) => Err(CodecError::UnknownMarker(marker)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codec() -> ValueCodec {
        ValueCodec::new(1024)
    }

    #[test]
    fn test_small_value_stays_raw() {
        let value = json!({"items": [1, 2]});
        let encoded = codec().encode(&value).unwrap();
        assert_eq!(encoded.encoding, Encoding::Raw);
        assert_eq!(encoded.bytes[0], RAW_MARKER);
        assert_eq!(&encoded.bytes[1..], br#"{"items":[1,2]}"#);
        assert_eq!(codec().decode(&encoded.bytes).unwrap(), value);
    }

    #[test]
    fn test_large_value_is_compressed() {
        let value = json!({"blob": "x".repeat(4096)});
        let encoded = codec().encode(&value).unwrap();
        assert_eq!(encoded.encoding, Encoding::Compressed);
        assert_eq!(encoded.bytes[0], COMPRESSED_MARKER);
        assert!(encoded.bytes.len() < 4096);
        assert_eq!(codec().decode(&encoded.bytes).unwrap(), value);
    }

    #[test]
    fn test_threshold_boundary() {
        // `"..."` adds two bytes of quoting around the string body.
        let at_threshold = Value::String("a".repeat(1022));
        let over_threshold = Value::String("a".repeat(1023));
        assert_eq!(
            codec().encode(&at_threshold).unwrap().encoding,
            Encoding::Raw
        );
        assert_eq!(
            codec().encode(&over_threshold).unwrap().encoding,
            Encoding::Compressed
        );
    }

    #[test]
    fn test_canonical_key_order() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":2,"b":1}"#).unwrap();
        assert_eq!(
            codec().encode(&a).unwrap().bytes,
            codec().encode(&b).unwrap().bytes
        );
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(codec().decode(b""), Err(CodecError::Empty)));
        assert!(matches!(
            codec().decode(b"Q{}"),
            Err(CodecError::UnknownMarker(b'Q'))
        ));
        assert!(matches!(
            codec().decode(b"Znot zlib at all"),
            Err(CodecError::Decompress(_))
        ));
        assert!(matches!(
            codec().decode(b"R{truncated"),
            Err(CodecError::Json(_))
        ));
    }
}
