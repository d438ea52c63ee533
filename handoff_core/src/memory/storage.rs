//! Raw memory behind one or more buffer views
//!
//! A [`Storage`] is released exactly once, when the last view drops it, through
//! whichever owner produced the memory.

use super::backend::MemoryBackend;
use crate::dlpack::ForeignTensor;
use handoff_types::Device;
use std::any::Any;
use std::ptr::NonNull;
use std::sync::Arc;

/// Who frees the memory
pub(crate) enum StorageOwner {
    /// Allocated by a backend, returned to it on drop
    Backend(Arc<dyn MemoryBackend>),
    /// An adopted Rust container (`Vec<T>`, `Box<[T]>`), freed by dropping it
    Adopted(Box<dyn Any + Send + Sync>),
    /// Imported from another runtime, released through its DLPack deleter
    Foreign(ForeignTensor),
    /// Zero bytes, nothing to release
    Empty,
}

pub(crate) struct Storage {
    ptr: NonNull<u8>,
    len: usize,
    alignment: usize,
    device: Device,
    read_only: bool,
    owner: StorageOwner,
}

// SAFETY: `ptr` is exclusively owned by this storage (adopted containers and
// foreign tensors are moved in and never touched elsewhere) and shared access
// only reads through it.
unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

impl Storage {
    pub(crate) fn new(
        ptr: NonNull<u8>,
        len: usize,
        alignment: usize,
        device: Device,
        owner: StorageOwner,
    ) -> Self {
        Self {
            ptr,
            len,
            alignment,
            device,
            read_only: false,
            owner,
        }
    }

    pub(crate) fn empty(alignment: usize, device: Device) -> Self {
        Self::new(NonNull::dangling(), 0, alignment, device, StorageOwner::Empty)
    }

    pub(crate) fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    #[inline]
    pub(crate) fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn alignment(&self) -> usize {
        self.alignment
    }

    #[inline]
    pub(crate) fn device(&self) -> Device {
        self.device
    }

    #[inline]
    pub(crate) fn read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn owner_kind(&self) -> &'static str {
        match self.owner {
            StorageOwner::Backend(ref backend) => backend.name(),
            StorageOwner::Adopted(_) => "adopted",
            StorageOwner::Foreign(_) => "foreign",
            StorageOwner::Empty => "empty",
        }
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        log::trace!(
            "releasing {} bytes on {} ({})",
            self.len,
            self.device,
            self.owner_kind()
        );
        if let StorageOwner::Backend(ref backend) = self.owner {
            // SAFETY: ptr/len/alignment/device are exactly what the backend
            // returned, and Drop runs once.
            unsafe { backend.deallocate(self.ptr, self.len, self.alignment, self.device) };
        }
        // Adopted containers and foreign tensors release themselves when the
        // owner field drops.
    }
}
