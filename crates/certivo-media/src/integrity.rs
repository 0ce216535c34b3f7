use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("model file not found: {path}")]
    Missing { path: PathBuf },

    #[error("failed to read model file: {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed SHA-256 digest: {0:?}")]
    MalformedDigest(String),

    #[error("model checksum mismatch for {path}\n  expected: {expected}\n  got:      {got}")]
    Mismatch {
        path: PathBuf,
        expected: String,
        got: String,
    },
}

/// Lower-case hex SHA-256 of a file, streamed in 8 KiB blocks.
pub fn sha256_file_hex(path: &Path) -> Result<String, IntegrityError> {
    let read_err = |source| IntegrityError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs::File::open(path).map_err(read_err)?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(read_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Check a model file against an expected hex digest (case-insensitive).
pub fn verify_model(path: &Path, expected_sha256: &str) -> Result<(), IntegrityError> {
    let expected = expected_sha256.trim().to_ascii_lowercase();
    if expected.len() != 64 || !expected.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(IntegrityError::MalformedDigest(expected_sha256.to_string()));
    }
    if !path.exists() {
        return Err(IntegrityError::Missing {
            path: path.to_path_buf(),
        });
    }

    let got = sha256_file_hex(path)?;
    if got != expected {
        return Err(IntegrityError::Mismatch {
            path: path.to_path_buf(),
            expected,
            got,
        });
    }

    tracing::debug!(path = %path.display(), "model checksum ok");
    Ok(())
}
