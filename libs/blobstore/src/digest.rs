//! Content addressing for blob store objects.
//!
//! Manifests and packaged layers are named by the SHA-512 of their bytes.
//! The digest is the sole namespacing mechanism for content-addressed URLs,
//! so it must be identical for identical input across processes and runs.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha512};

/// Hex-encoded SHA-512 of a byte slice.
pub fn sha512_hex(bytes: &[u8]) -> String {
    hex::encode(Sha512::digest(bytes))
}

/// Hex-encoded SHA-512 of a file's contents, computed streaming.
pub fn sha512_hex_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha512::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
