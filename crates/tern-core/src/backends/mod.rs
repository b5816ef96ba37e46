//! Source and target implementations

pub mod memory;

pub use memory::{FailurePoint, MemoryBody, MemoryContent, MemoryGuard, MemorySource, MemoryTarget};
