//! Content hashing for file identity.
//!
//! The hex SHA-256 digest of a file's bytes is its identity throughout the
//! pipeline: it is the `job_id` the dedup gate checks and the `metadata_key`
//! the tag store is addressed by.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Hash chunk size. Source audio files can be large, so the file is streamed
/// through the hasher in fixed-size chunks rather than read whole.
const CHUNK_SIZE: usize = 4096;

/// Compute the hex SHA-256 digest of a file's contents.
pub fn content_hash(path: impl AsRef<Path>) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    hash_reader(&mut file)
}

/// Compute the hex SHA-256 digest of any readable source.
pub fn hash_reader<R: Read>(reader: &mut R) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
