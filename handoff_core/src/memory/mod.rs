//! Buffer memory: backends, allocation and shaped views

mod allocator;
#[cfg(feature = "ndarray")]
mod array;
mod backend;
mod buffer;
pub(crate) mod storage;

pub use allocator::Allocator;
pub use backend::{BackendStats, HostBackend, MemoryBackend, TrackingBackend};
pub use buffer::Buffer;
