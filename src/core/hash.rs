use crate::error::{CropMatchError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

const CHUNK_SIZE: usize = 8192;

/// Hex-encoded BLAKE3 digest of a file's raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Streams a file through BLAKE3 in fixed-size chunks so memory stays flat
/// regardless of file size.
pub fn content_hash(path: &Path) -> Result<ContentHash> {
    let file = File::open(path).map_err(|e| CropMatchError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; CHUNK_SIZE];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| CropMatchError::io(path, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(ContentHash(hasher.finalize().to_hex().to_string()))
}

/// Hash many files in parallel. Output order matches input order.
pub fn content_hashes(paths: &[PathBuf]) -> Vec<(PathBuf, Result<ContentHash>)> {
    paths
        .par_iter()
        .map(|path| (path.clone(), content_hash(path)))
        .collect()
}
