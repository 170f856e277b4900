use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

pub const GZIP: &str = "gzip";

pub fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Decodes at most `limit` bytes of a gzip stream. Enough to preview a
/// body without inflating all of it.
pub fn gunzip_prefix(data: &[u8], limit: usize) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take(limit as u64)
        .read_to_end(&mut out)?;
    Ok(out)
}

/// Whether a `Content-Encoding` or `Accept-Encoding` value lists gzip.
///
/// ```
/// use metrika_common::codec::lists_gzip;
///
/// assert!(lists_gzip("deflate, gzip;q=0.8"));
/// assert!(lists_gzip("GZIP"));
/// assert!(!lists_gzip("br"));
/// ```
pub fn lists_gzip(header: &str) -> bool {
    header.split(',').any(|part| {
        part.split(';')
            .next()
            .map(|coding| coding.trim().eq_ignore_ascii_case(GZIP))
            .unwrap_or(false)
    })
}
