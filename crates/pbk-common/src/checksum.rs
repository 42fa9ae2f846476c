//! SHA-256 helpers for archive members and bundled attachments

use crate::error::{PbkError, Result};
use sha2::{Digest, Sha256};
use std::io::Read;

/// Hex-encoded SHA-256 of an in-memory buffer
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Hex-encoded SHA-256 of any readable source, read in 8 KiB chunks
pub fn sha256_reader<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Incremental SHA-256 for content produced piecewise, such as an archive
/// member written record by record.
#[derive(Debug, Clone, Default)]
pub struct StreamingDigest {
    hasher: Sha256,
    bytes: u64,
}

impl StreamingDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Bytes fed so far.
    pub fn len(&self) -> u64 {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    pub fn finish_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Verify that `data` hashes to `expected`.
///
/// `subject` names the thing being checked (an archive member path, a file
/// path) and ends up in the error message.
pub fn verify_sha256(subject: &str, data: &[u8], expected: &str) -> Result<()> {
    let actual = sha256_hex(data);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(PbkError::ChecksumMismatch {
            subject: subject.to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(sha256_hex(b"hello world"), HELLO_WORLD);
    }

    #[test]
    fn test_reader_matches_buffer() {
        let data = vec![7u8; 20_000];
        let mut cursor = Cursor::new(&data);
        assert_eq!(sha256_reader(&mut cursor).unwrap(), sha256_hex(&data));
    }

    #[test]
    fn test_streaming_digest_matches_one_shot() {
        let mut digest = StreamingDigest::new();
        digest.update(b"hello ");
        digest.update(b"world");
        assert_eq!(digest.len(), 11);
        assert_eq!(digest.finish_hex(), HELLO_WORLD);
    }

    #[test]
    fn test_verify_accepts_uppercase_digest() {
        verify_sha256("files/a.txt", b"hello world", &HELLO_WORLD.to_uppercase()).unwrap();
    }

    #[test]
    fn test_verify_reports_subject_on_mismatch() {
        let err = verify_sha256("files/a.txt", b"tampered", HELLO_WORLD).unwrap_err();
        match err {
            PbkError::ChecksumMismatch { subject, expected, .. } => {
                assert_eq!(subject, "files/a.txt");
                assert_eq!(expected, HELLO_WORLD);
            },
            other => panic!("unexpected error: {other}"),
        }
    }
}
