//! Storage traits and implementations
//!
//! Raw message bytes live in a [`BlobStore`] split into an inbox and dated
//! partitions; the [`MessageIndex`] maps message identifiers onto those
//! partitions. Both the index and the pending queue sit on a [`Database`].

mod blob;
mod index;
mod maildir;
mod memory;
mod sqlite;

pub use blob::{BlobKey, BlobStore, Folder};
pub use index::MessageIndex;
pub use maildir::MaildirBlobStore;
pub use memory::InMemoryBlobStore;
pub use sqlite::{Database, PAGE_SIZE, Paged};
