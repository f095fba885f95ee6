//! Content digests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The only digest algorithm this crate produces or accepts.
pub const SHA256_ALGORITHM: &str = "sha256";

const SHA256_HEX_LEN: usize = 64;

/// Errors from parsing a digest string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DigestError {
    /// Missing `algorithm:` prefix.
    #[error("digest {0:?} has no algorithm prefix")]
    MissingAlgorithm(String),
    /// Algorithm other than sha256.
    #[error("unsupported digest algorithm {0:?}")]
    UnsupportedAlgorithm(String),
    /// Encoded part is not 64 lowercase hex characters.
    #[error("malformed sha256 digest {0:?}")]
    Malformed(String),
}

/// A content digest of the form `sha256:<64 lowercase hex>`.
///
/// Implements `Ord` so digest-keyed maps iterate deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Build a digest from an already computed lowercase hex SHA-256.
    pub(crate) fn from_sha256_hex(hex: String) -> Self {
        Self(format!("{SHA256_ALGORITHM}:{hex}"))
    }

    /// Digest of the given bytes.
    pub fn of(bytes: &[u8]) -> Self {
        crate::canonical::sha256_digest(bytes)
    }

    /// Parse and validate a digest string.
    pub fn parse(s: &str) -> Result<Self, DigestError> {
        let (algorithm, encoded) = s
            .split_once(':')
            .ok_or_else(|| DigestError::MissingAlgorithm(s.to_string()))?;
        if algorithm != SHA256_ALGORITHM {
            return Err(DigestError::UnsupportedAlgorithm(algorithm.to_string()));
        }
        let well_formed = encoded.len() == SHA256_HEX_LEN
            && encoded
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
            return Err(DigestError::Malformed(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Full `algorithm:hex` form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex part without the algorithm prefix.
    pub fn encoded(&self) -> &str {
        &self.0[SHA256_ALGORITHM.len() + 1..]
    }

    /// First `n` hex characters, for labels and log lines.
    pub fn short(&self, n: usize) -> &str {
        let encoded = self.encoded();
        &encoded[..n.min(encoded.len())]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = DigestError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        let d = Digest::of(b"hello");
        let parsed: Digest = d.as_str().parse().unwrap();
        assert_eq!(d, parsed);
        assert_eq!(d.encoded().len(), 64);
    }

    #[test]
    fn test_rejects_bad_digests() {
        assert!(matches!(Digest::parse("abc"), Err(DigestError::MissingAlgorithm(_))));
        assert!(matches!(
            Digest::parse("md5:abc"),
            Err(DigestError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(Digest::parse("sha256:ABC"), Err(DigestError::Malformed(_))));
    }

    #[test]
    fn test_serde_as_plain_string() {
        let d = Digest::of(b"x");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"{d}\""));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
        assert!(serde_json::from_str::<Digest>("\"sha256:zz\"").is_err());
    }
}
