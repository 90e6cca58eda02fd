//! Mailin - durable inbound mail store and hand-off queue
//!
//! This crate provides:
//! - A date-partitioned message store over Maildir, indexed by Message-ID in SQLite
//! - Inbox draining that admits externally delivered messages one at a time
//! - A durable FIFO of message identifiers with atomic batched pop
//!
//! Blob storage and header parsing sit behind traits so tests and embedders
//! can swap them out.

pub mod config;
pub mod error;
pub mod models;
pub mod parser;
pub mod queue;
pub mod storage;
pub mod store;

pub use config::MailinConfig;
pub use error::{MailinError, Result};
pub use models::{FolderName, IndexRecord, MessageId, QueueEntry};
pub use parser::{HeaderParser, MessageParser, ParsedHeaders};
pub use queue::{MessageSink, PendingQueue};
pub use storage::{
    BlobKey, BlobStore, Folder, InMemoryBlobStore, MaildirBlobStore, MessageIndex,
};
pub use store::{AuditReport, Drain, DrainOptions, MessageStore};
