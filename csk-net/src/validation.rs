// csk-net/src/validation.rs
use std::fs::File;
use std::io;
use std::path::Path;

use csk_common::error::{CskError, Result};
use csk_common::model::{Checksum, ChecksumAlgorithm};
use sha2::{Digest, Sha256, Sha512};
use url::Url;

/// Raw digest of `bytes` under `algorithm`.
pub fn digest_bytes(algorithm: ChecksumAlgorithm, bytes: &[u8]) -> Vec<u8> {
    match algorithm {
        ChecksumAlgorithm::Sha256 => Sha256::digest(bytes).to_vec(),
        ChecksumAlgorithm::Sha512 => Sha512::digest(bytes).to_vec(),
    }
}

fn digest_reader<R: io::Read>(algorithm: ChecksumAlgorithm, reader: &mut R) -> Result<(Vec<u8>, u64)> {
    match algorithm {
        ChecksumAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            let n = io::copy(reader, &mut hasher)?;
            Ok((hasher.finalize().to_vec(), n))
        }
        ChecksumAlgorithm::Sha512 => {
            let mut hasher = Sha512::new();
            let n = io::copy(reader, &mut hasher)?;
            Ok((hasher.finalize().to_vec(), n))
        }
    }
}

/// Bitwise comparison of a computed digest with the expected one.
fn compare(actual: &[u8], expected: &Checksum, subject: &str) -> Result<()> {
    let expected_bytes = hex::decode(expected.digest()).map_err(|e| {
        CskError::ValidationError(format!("Expected digest is not valid hex: {e}"))
    })?;
    if actual == expected_bytes.as_slice() {
        Ok(())
    } else {
        Err(CskError::ChecksumMismatch(format!(
            "{subject}: expected {}, got {}:{}",
            expected,
            expected.algorithm(),
            hex::encode(actual)
        )))
    }
}

/// Verifies in-memory artifact bytes against the declared checksum.
pub fn verify(bytes: &[u8], expected: &Checksum) -> Result<()> {
    let actual = digest_bytes(expected.algorithm(), bytes);
    tracing::debug!(
        "Calculated {}: {} ({} bytes)",
        expected.algorithm(),
        hex::encode(&actual),
        bytes.len()
    );
    tracing::debug!("Expected {}", expected);
    compare(&actual, expected, "artifact")
}

/// Streams a file through the same check as [`verify`].
pub fn verify_file(path: &Path, expected: &Checksum) -> Result<()> {
    tracing::debug!("Verifying checksum for: {}", path.display());
    let mut file = File::open(path)?;
    let (actual, bytes_read) = digest_reader(expected.algorithm(), &mut file)?;
    tracing::debug!(
        "Calculated {}: {} ({} bytes read)",
        expected.algorithm(),
        hex::encode(&actual),
        bytes_read
    );
    compare(&actual, expected, &path.display().to_string())
}

/// Validates a URL, ensuring it uses the HTTPS scheme.
pub fn validate_url(url_str: &str) -> Result<()> {
    let url = Url::parse(url_str)
        .map_err(|e| CskError::ValidationError(format!("Failed to parse URL '{url_str}': {e}")))?;
    if url.scheme() == "https" {
        Ok(())
    } else {
        Err(CskError::ValidationError(format!(
            "Invalid URL scheme for '{}': Must be https, but got '{}'",
            url_str,
            url.scheme()
        )))
    }
}
