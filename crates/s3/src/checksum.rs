//! MD5 over descriptor ranges
//!
//! Used for `Content-MD5` (base64) and for the expected ETag of an uploaded
//! part (hex), which the provider computes the same way.

use std::fs::File;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::{Digest, Md5};

use bfs_core::Result;

use crate::body::{CHUNK_SIZE, read_exact_at};

/// Raw MD5 digest of `[start, start + len)` of `file`
pub fn md5_range(file: &File, start: u64, len: u64) -> Result<[u8; 16]> {
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut offset = start;
    let mut remaining = len;
    while remaining > 0 {
        let n = (CHUNK_SIZE as u64).min(remaining) as usize;
        read_exact_at(file, &mut buf[..n], offset)?;
        hasher.update(&buf[..n]);
        offset += n as u64;
        remaining -= n as u64;
    }
    let mut digest = [0u8; 16];
    digest.copy_from_slice(&hasher.finalize());
    Ok(digest)
}

/// Lower-case hex MD5 of a descriptor range, as the provider reports it in an ETag
pub fn md5_hex(file: &File, start: u64, len: u64) -> Result<String> {
    md5_range(file, start, len).map(hex::encode)
}

/// Base64 MD5 of a descriptor range, for the `Content-MD5` header
pub fn md5_base64(file: &File, start: u64, len: u64) -> Result<String> {
    md5_range(file, start, len).map(|d| encode_base64(&d))
}

/// `Content-MD5` rendering of a raw digest
pub fn encode_base64(digest: &[u8; 16]) -> String {
    BASE64.encode(digest)
}

/// Base64 MD5 of an in-memory body
pub fn content_md5(data: &[u8]) -> String {
    BASE64.encode(Md5::digest(data))
}

/// ETag the provider reports for an object assembled from parts with these
/// hex ETags: the MD5 of the concatenated part digests, then `-<part count>`.
///
/// `None` when a part ETag is not a plain MD5, as with encrypted parts.
pub fn multipart_etag(part_etags: &[String]) -> Option<String> {
    let mut hasher = Md5::new();
    for etag in part_etags {
        let digest = hex::decode(etag.trim_matches('"')).ok()?;
        if digest.len() != 16 {
            return None;
        }
        hasher.update(&digest);
    }
    Some(format!("{}-{}", hex::encode(hasher.finalize()), part_etags.len()))
}
