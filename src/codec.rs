//! Wire framing of the messages exchanged with the game server.
//!
//! Every frame, in both directions, is a JSON document compressed with gzip and carried in a
//! binary WebSocket message.

use std::io::{self, Read, Write};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde_json::Value;
use thiserror::Error;

/// Failure to turn a value into a frame, or a frame back into a value.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("could not compress frame")]
    /// Writing to the gzip encoder failed.
    Compress(#[source] io::Error),
    #[error("frame is not valid gzip data")]
    /// The frame could not be decompressed.
    Decompress(#[source] io::Error),
    #[error("frame does not hold a JSON document")]
    /// The JSON document could not be written or parsed.
    Json(#[from] serde_json::Error),
}

/// Serializes `value` to JSON and gzip-compresses the result.
pub fn encode_frame(value: &Value) -> Result<Vec<u8>, FrameError> {
    let json = serde_json::to_vec(value)?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 2), Compression::default());
    encoder.write_all(&json).map_err(FrameError::Compress)?;
    encoder.finish().map_err(FrameError::Compress)
}

/// Decompresses a gzip frame and parses the JSON document it holds.
pub fn decode_frame(frame: &[u8]) -> Result<Value, FrameError> {
    let mut json = Vec::with_capacity(frame.len() * 4);
    GzDecoder::new(frame)
        .read_to_end(&mut json)
        .map_err(FrameError::Decompress)?;
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn frames_are_gzip() {
        let frame = encode_frame(&json!({"not_move": 0})).unwrap();
        assert_eq!(&frame[..2], &[0x1f, 0x8b]);
    }

    #[test]
    fn decodes_what_it_encodes() {
        let state = json!({
            "p": {"x": 10.5, "y": -3, "r": 4},
            "f": [[1, 2], [3, 4]],
            "d": false,
        });
        assert_eq!(decode_frame(&encode_frame(&state).unwrap()).unwrap(), state);
    }

    #[test]
    fn rejects_plain_json() {
        let error = decode_frame(br#"{"d": true}"#).unwrap_err();
        assert!(matches!(error, FrameError::Decompress(_)));
    }

    #[test]
    fn rejects_compressed_garbage() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"not json").unwrap();
        let frame = encoder.finish().unwrap();
        assert!(matches!(decode_frame(&frame), Err(FrameError::Json(_))));
    }
}
