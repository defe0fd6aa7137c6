//! Text-safe snapshot encoding
//!
//! Snapshots are persisted as data URLs so the store only ever holds text:
//!
//! ```text
//! data:application/octet-stream;length=<n>;base64,<payload>
//! ```
//!
//! The `length` parameter lets [`BlobCodec::decode`] detect a payload that was
//! truncated on a 4-character boundary, which base64 alone cannot.

use crate::error::{CoreError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

const SCHEME: &str = "data:";
const MEDIA_TYPE: &str = "application/octet-stream";
const BASE64_MARKER: &str = "base64";
const LENGTH_PARAM: &str = "length=";

/// Binary <-> text codec for snapshot payloads
pub struct BlobCodec;

impl BlobCodec {
    /// Encode arbitrary bytes as a data URL
    pub fn encode(bytes: &[u8]) -> String {
        format!(
            "{SCHEME}{MEDIA_TYPE};{LENGTH_PARAM}{};{BASE64_MARKER},{}",
            bytes.len(),
            STANDARD.encode(bytes)
        )
    }

    /// Decode a data URL produced by [`BlobCodec::encode`]
    ///
    /// Plain `data:<type>;base64,<payload>` URLs without a length parameter
    /// are accepted too.
    pub fn decode(text: &str) -> Result<Vec<u8>> {
        let rest = text
            .strip_prefix(SCHEME)
            .ok_or_else(|| malformed("missing data: prefix"))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| malformed("missing payload separator"))?;

        let mut params = header.split(';');
        // Media type is informational; any type is accepted.
        let _media_type = params.next();

        let mut declared_len = None;
        let mut is_base64 = false;
        for param in params {
            if param == BASE64_MARKER {
                is_base64 = true;
            } else if let Some(value) = param.strip_prefix(LENGTH_PARAM) {
                let len = value
                    .parse::<usize>()
                    .map_err(|_| malformed(format!("invalid length parameter {value:?}")))?;
                declared_len = Some(len);
            }
        }
        if !is_base64 {
            return Err(malformed("payload is not base64"));
        }

        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| malformed(e.to_string()))?;

        if let Some(expected) = declared_len {
            if bytes.len() != expected {
                return Err(malformed(format!(
                    "declared {expected} bytes, decoded {}",
                    bytes.len()
                )));
            }
        }

        Ok(bytes)
    }
}

fn malformed(reason: impl Into<String>) -> CoreError {
    CoreError::MalformedEncoding(reason.into())
}
