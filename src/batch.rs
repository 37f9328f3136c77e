//! The stored-batch collaborator used by batch sends.
//!
//! A batch store (typically an SD card) accumulates one wire-encoded document per record
//! until it holds a full batch. The transport only reads from it: it asks whether the
//! batch is ready and, if so, takes the records and relays them one by one.
//!
//! Records are produced with [`SampleDocument::to_record`](crate::document::SampleDocument::to_record);
//! how they are framed on the medium (newline-delimited lines, length prefixes, ...) is the
//! store's business.

use alloc::vec::Vec;

/// Read access to a store of batched documents.
pub trait BatchStore {
    /// Error reported while reading the batch.
    type Error: core::fmt::Debug;

    /// Whether the current batch is complete and should be published.
    fn should_publish(&self) -> bool;

    /// Number of records that make up a complete batch.
    fn batch_size(&self) -> usize;

    /// Number of records currently stored.
    fn current_batch(&self) -> usize;

    /// The stored records, oldest first.
    fn records(&mut self) -> Result<Vec<Vec<u8>>, Self::Error>;
}
