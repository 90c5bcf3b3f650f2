//! Content hashing helpers.

use sha2::{Digest, Sha256};
use std::path::Path;

/// Compute the SHA-256 hash of a file's contents, hex encoded.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let contents = std::fs::read(path)?;
    Ok(hash_bytes(&contents))
}

/// Compute the SHA-256 hash of a byte slice, hex encoded.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_and_bytes_hash_agree() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cal.ics");
        std::fs::write(&path, b"BEGIN:VCALENDAR").unwrap();

        assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"BEGIN:VCALENDAR"));
        assert_ne!(hash_bytes(b"a"), hash_bytes(b"b"));
        assert_eq!(hash_bytes(b"").len(), 64);
    }
}
