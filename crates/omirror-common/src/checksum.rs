//! Checksum utilities for published files

use crate::error::{CommonError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// SHA-256 digest together with the number of bytes hashed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sha256Summary {
    pub hex: String,
    pub bytes: u64,
}

impl Sha256Summary {
    /// Hash a file on disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = std::fs::File::open(path)?;
        Self::from_reader(&mut file)
    }

    /// Hash any readable source in 8 KiB blocks
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];
        let mut bytes = 0u64;

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
            bytes += bytes_read as u64;
        }

        Ok(Self {
            hex: hex::encode(hasher.finalize()),
            bytes,
        })
    }

    /// Fail with `ChecksumMismatch` unless `expected` matches
    pub fn verify(&self, expected: &str) -> Result<()> {
        if self.hex.eq_ignore_ascii_case(expected) {
            Ok(())
        } else {
            Err(CommonError::ChecksumMismatch {
                expected: expected.to_string(),
                actual: self.hex.clone(),
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn test_sha256_from_reader() {
        let mut cursor = Cursor::new(b"hello world");
        let summary = Sha256Summary::from_reader(&mut cursor).unwrap();
        assert_eq!(
            summary.hex,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(summary.bytes, 11);
    }

    #[test]
    fn test_sha256_from_file_matches_reader() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        file.flush().unwrap();

        let summary = Sha256Summary::from_file(file.path()).unwrap();
        assert_eq!(summary.bytes, 11);
        assert!(summary
            .verify("B94D27B9934D3E08A52E52D7DA7DABFAC484EFE37A5380EE9088F7ACE2EFCDE9")
            .is_ok());
    }

    #[test]
    fn test_verify_mismatch() {
        let mut cursor = Cursor::new(b"abc");
        let summary = Sha256Summary::from_reader(&mut cursor).unwrap();
        match summary.verify("00") {
            Err(CommonError::ChecksumMismatch { expected, .. }) => assert_eq!(expected, "00"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
