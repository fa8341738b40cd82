//! Document store abstraction and the in-process backend.

pub mod memory;
pub mod traits;

pub use memory::InMemoryStore;
pub use traits::{DocumentPatch, DocumentStore, StorageError, WriteOp, WriteResult};
