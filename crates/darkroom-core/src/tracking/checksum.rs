use std::fs::File;
use std::io::Read;
use std::path::Path;

use blake3::Hasher;

use crate::error::Result;

/// Hex BLAKE3 digest of a file's contents, read in 64 KiB chunks.
pub fn file_checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}
