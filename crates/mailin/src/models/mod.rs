//! Domain models for stored messages and queue entries

mod folder;
mod message;

pub use folder::FolderName;
pub use message::{IndexRecord, MessageId, QueueEntry};
