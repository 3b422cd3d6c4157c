//! Gzip at best compression, used for request and response bodies.

use crate::error::InflateError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Content types the server is willing to compress.
pub const COMPRESSIBLE_TYPES: [&str; 3] = ["application/json", "text/html", "html/text"];

pub fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

pub fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len().saturating_mul(2));
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Like [`decompress`], but stops reading once the output would exceed
/// `limit` bytes.
pub fn decompress_limited(data: &[u8], limit: usize) -> Result<Vec<u8>, InflateError> {
    let mut decoder = GzDecoder::new(data).take(limit as u64 + 1);
    let mut out = Vec::with_capacity(data.len().saturating_mul(2).min(limit));
    decoder.read_to_end(&mut out)?;
    if out.len() > limit {
        return Err(InflateError::TooLarge { limit });
    }
    Ok(out)
}

/// True if a header value such as `Accept-Encoding: br, gzip` names gzip.
pub fn accepts_gzip(header_value: &str) -> bool {
    header_value.contains("gzip")
}

pub fn is_compressible(content_type: &str) -> bool {
    COMPRESSIBLE_TYPES.iter().any(|t| content_type.contains(t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_then_decompress() {
        let payload = br#"[{"id":"PollCount","type":"counter","delta":5}]"#.repeat(20);
        let packed = compress(&payload).unwrap();
        assert!(packed.len() < payload.len());
        assert_eq!(decompress(&packed).unwrap(), payload);
    }

    #[test]
    fn inflated_size_is_bounded() {
        let packed = compress(&vec![0u8; 4096]).unwrap();
        assert_eq!(decompress_limited(&packed, 4096).unwrap().len(), 4096);
        assert!(matches!(
            decompress_limited(&packed, 4095),
            Err(InflateError::TooLarge { limit: 4095 })
        ));
        assert!(matches!(
            decompress_limited(b"definitely not gzip", 4096),
            Err(InflateError::Io(_))
        ));
    }

    #[test]
    fn malformed_input_is_an_error() {
        assert!(decompress(b"definitely not gzip").is_err());
    }

    #[test]
    fn content_type_checks() {
        assert!(is_compressible("application/json"));
        assert!(is_compressible("text/html; charset=utf-8"));
        assert!(!is_compressible("text/plain; charset=utf-8"));
        assert!(accepts_gzip("deflate, gzip;q=1.0"));
        assert!(!accepts_gzip("identity"));
    }
}
