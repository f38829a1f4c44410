/// Partial content fingerprints. Hashing whole audio files is too slow for a
/// scan hot path; size plus the first and last 64 KiB is enough to recognize
/// that a moved or renamed file is the same content.
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::errors::Result;

const CHUNK: u64 = 64 * 1024;

/// Hex digest of `sha1(size || head || tail)` with 64 KiB head and tail.
/// Files smaller than head+tail are read in a single pass.
pub fn partial_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();

    let mut hasher = Sha1::new();
    hasher.update(size.to_string().as_bytes());

    if size <= CHUNK * 2 {
        let mut data = Vec::with_capacity(size as usize);
        file.read_to_end(&mut data)?;
        hasher.update(&data);
    } else {
        let mut head = vec![0u8; CHUNK as usize];
        file.read_exact(&mut head)?;
        hasher.update(&head);

        file.seek(SeekFrom::Start(size - CHUNK))?;
        let mut tail = vec![0u8; CHUNK as usize];
        file.read_exact(&mut tail)?;
        hasher.update(&tail);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
