use serde::{Deserialize, Serialize};

/// Lifecycle of a blob inside one backend. A hash with no record is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobState {
    Uploading,
    Confirmed,
}

/// Metadata kept per hash, per backend. The bytes live next to it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlobRecord {
    pub size: u64,
    pub confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl BlobRecord {
    /// A whole blob written in one step. `size` is the source's real length.
    pub fn confirmed(size: u64) -> Self {
        Self { size, confirmed: true, name: None, mime_type: None }
    }

    /// A fresh upload session. The declared size is not trusted, so it starts at zero.
    pub fn uploading(name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            size: 0,
            confirmed: false,
            name: Some(name.into()),
            mime_type: Some(mime_type.into()),
        }
    }

    pub fn state(&self) -> BlobState {
        if self.confirmed {
            BlobState::Confirmed
        } else {
            BlobState::Uploading
        }
    }

    /// Confirmation filter used by reads: the flag must match exactly.
    pub fn matches(&self, confirmed: bool) -> bool {
        self.confirmed == confirmed
    }

    /// Accounts for an appended chunk. Refused once the blob is confirmed.
    pub fn append(&mut self, chunk_len: u64) -> bool {
        if self.state() != BlobState::Uploading {
            return false;
        }
        self.size += chunk_len;
        true
    }

    /// Closes the upload. The authoritative size is what was actually stored.
    pub fn finalize(&mut self, actual_len: u64) -> bool {
        if self.state() != BlobState::Uploading {
            return false;
        }
        self.confirmed = true;
        self.size = actual_len;
        true
    }
}
