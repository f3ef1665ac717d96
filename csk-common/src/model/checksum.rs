// csk-common/src/model/checksum.rs
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CskError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }

    /// Length of the hex-encoded digest.
    pub fn hex_len(self) -> usize {
        match self {
            ChecksumAlgorithm::Sha256 => 64,
            ChecksumAlgorithm::Sha512 => 128,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "sha256" => Some(ChecksumAlgorithm::Sha256),
            "sha512" => Some(ChecksumAlgorithm::Sha512),
            _ => None,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Expected digest of a downloadable artifact.
///
/// Written as `"<algorithm>:<hex>"`; a bare 64 character hex string is read
/// as sha256. The digest is normalised to lower-case hex once, here, so that
/// verification can compare exact bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    digest: String,
}

impl Checksum {
    pub fn new(algorithm: ChecksumAlgorithm, digest: &str) -> Result<Self> {
        let digest = digest.trim();
        if digest.len() != algorithm.hex_len() {
            return Err(CskError::parse(
                "checksum",
                format!(
                    "{algorithm} digest must be {} hex characters, got {}",
                    algorithm.hex_len(),
                    digest.len()
                ),
            ));
        }
        if !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CskError::parse(
                "checksum",
                format!("{algorithm} digest '{digest}' is not hexadecimal"),
            ));
        }
        Ok(Self {
            algorithm,
            digest: digest.to_ascii_lowercase(),
        })
    }

    pub fn sha256(digest: &str) -> Result<Self> {
        Self::new(ChecksumAlgorithm::Sha256, digest)
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Canonical lower-case hex digest.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl FromStr for Checksum {
    type Err = CskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((algo, digest)) => {
                let algorithm = ChecksumAlgorithm::from_name(&algo.trim().to_ascii_lowercase())
                    .ok_or_else(|| {
                        CskError::parse("checksum", format!("unsupported algorithm '{algo}'"))
                    })?;
                Checksum::new(algorithm, digest)
            }
            None => Checksum::sha256(s),
        }
    }
}

impl TryFrom<String> for Checksum {
    type Error = CskError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Checksum> for String {
    fn from(value: Checksum) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.digest)
    }
}
