//! Message identity and the records kept about stored messages

use std::fmt;

use serde::{Deserialize, Serialize};

use super::FolderName;
use crate::storage::BlobKey;

/// A message's own identifier, taken verbatim from its `Message-ID` header
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of the message index: where a message physically lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    pub message_id: MessageId,
    /// Dated partition, derived from the message's own `Date` header
    pub folder: FolderName,
    /// Locator of the raw bytes inside `folder`
    pub blob_key: BlobKey,
}

/// An entry waiting in the pending queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    /// Assigned at push time; strictly increasing, never reused
    pub sequence: i64,
    pub message_id: MessageId,
}
