//! # Handoff Core
//!
//! Zero-copy tensor exchange between runtimes that share a process.
//!
//! A producer allocates a [`Buffer`], wraps it in a [`Capsule`] and hands the
//! capsule to another runtime. That runtime consumes it exactly once and from
//! then on owns the memory under its own rules. A capsule nobody consumes
//! frees its buffer when dropped. Capsules speak DLPack, so the other side can
//! be any framework that understands `__dlpack__`.
//!
//! - **Memory**: backends, allocation limits and strided views ([`Buffer`])
//! - **Capsules**: one-shot ownership transfer with DLPack export and import
//! - **Exchange**: the producer/consumer contract with device checks
//! - **Registry**: named capsules for bulk export
//!
//! With the `ndarray` feature, owned arrays convert into buffers without
//! copying (`Buffer::from_array`) and host buffers read as array views.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use handoff_core::{Accept, Buffer, Capsule, DType, Device, HandoffResult};
//!
//! fn main() -> HandoffResult<()> {
//!     let buffer = Buffer::from_vec((0..10i64).collect());
//!     let capsule = Capsule::wrap(buffer);
//!
//!     // on the consumer side
//!     let buffer = capsule.consume_as(Accept::HostAccessible)?;
//!     assert_eq!(buffer.dtype(), DType::I64);
//!     assert_eq!(buffer.device(), Device::CPU);
//!
//!     // the capsule is spent
//!     assert!(capsule.consume().is_err());
//!     Ok(())
//! }
//! ```

pub mod capsule;
pub mod config;
pub mod dlpack;
pub mod error;
pub mod exchange;
pub mod memory;
pub mod registry;

pub use capsule::{Capsule, CapsuleInfo, CapsuleState, ExportOptions};
pub use config::{CapsuleFormat, HandoffConfig};
pub use dlpack::RawTensor;
pub use error::{HandoffError, HandoffResult};
pub use exchange::{consume_capsule, negotiate_format, produce_capsule, Accept};
pub use memory::{Allocator, BackendStats, Buffer, HostBackend, MemoryBackend, TrackingBackend};
pub use registry::CapsuleRegistry;

pub use handoff_types::{DType, Device, DeviceKind, Element, Layout, LayoutError, MemoryOrder};
