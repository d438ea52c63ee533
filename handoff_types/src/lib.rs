//! # handoff types
//!
//! Leaf crate with the vocabulary shared by every handoff crate:
//! - [`DType`] - element types and their DLPack codes
//! - [`Device`] - memory domain tags (host or accelerator index)
//! - [`Layout`] - shape, element strides and byte offset of a view
//! - [`Element`] - Rust scalars that can back a buffer

pub mod device;
pub mod dtype;
pub mod element;
pub mod layout;

pub use device::{Device, DeviceKind};
pub use dtype::{dlpack_codes, DType};
pub use element::Element;
pub use layout::{checked_numel, contiguous_strides, Layout, LayoutError, MemoryOrder};
