//! Qwen credential encoding.
//!
//! The chat API wants `gzip-then-base64(raw_token | cookie_value)` with a
//! literal `|` separator. The compression happens here at send time; the
//! cached bundle keeps both raw pieces so it stays decompressible.

use std::io::{Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

pub const SEPARATOR: char = '|';

pub fn compress_credential(raw_token: &str, cookie_value: &str) -> std::io::Result<String> {
    let joined = format!("{raw_token}{SEPARATOR}{cookie_value}");
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(joined.as_bytes())?;
    let compressed = encoder.finish()?;
    Ok(B64.encode(compressed))
}

/// Inverse of [`compress_credential`], used by tests and session debugging.
pub fn decompress_credential(encoded: &str) -> std::io::Result<(String, String)> {
    let compressed = B64
        .decode(encoded)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut joined = String::new();
    decoder.read_to_string(&mut joined)?;
    let (token, cookie) = joined.split_once(SEPARATOR).ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "missing separator")
    })?;
    Ok((token.to_string(), cookie.to_string()))
}
