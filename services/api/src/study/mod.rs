//! services/api/src/study/mod.rs
//!
//! The study engine: chunk rotation, batch generation, the prefetch-buffer
//! read path, and the background refill scheduler. All components work
//! against the port traits from the `core` crate, so tests run on in-memory
//! doubles.

pub mod batch;
pub mod chunks;
pub mod refill;
pub mod service;

#[cfg(test)]
pub(crate) mod testkit;

pub use batch::{BatchGenerator, BatchItem, GenerationSettings};
pub use chunks::{split_into_chunks, ChunkRotator};
pub use refill::RefillScheduler;
pub use service::{randomize_options, StudyService, StudySettings};
