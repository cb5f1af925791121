use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

const BUFFER_SIZE: usize = 1024 * 1024; // 1MB buffer

/// SHA-256 of a staged evidence file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    pub sha256: String,
    pub size: u64,
}

/// Hash a file, streaming it through a fixed buffer.
///
/// Returns `None` when the file is larger than `max_size_mb` or is not a
/// regular file.
pub fn sha256_file(path: &Path, max_size_mb: u64) -> io::Result<Option<FileDigest>> {
    let metadata = std::fs::metadata(path)?;
    if !metadata.is_file() || metadata.len() > max_size_mb.saturating_mul(1024 * 1024) {
        return Ok(None);
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut size = 0u64;

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        size += bytes_read as u64;
    }

    Ok(Some(FileDigest {
        sha256: format!("{:x}", hasher.finalize()),
        size,
    }))
}
