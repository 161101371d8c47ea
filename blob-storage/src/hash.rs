use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::error::{StorageError, StorageResult};

const MIN_DIGEST_LEN: usize = 32;
const MAX_DIGEST_LEN: usize = 128;

/// Hex digest identifying a blob's bytes.
///
/// Digests are produced by whoever stores the blob; this crate only
/// validates their shape. The value is kept lowercase so that two
/// spellings of the same digest compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    pub fn parse(raw: &str) -> StorageResult<Self> {
        let trimmed = raw.trim();
        let valid_len = (MIN_DIGEST_LEN..=MAX_DIGEST_LEN).contains(&trimmed.len());
        if !valid_len || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidHash(raw.to_string()));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ContentHash {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}
