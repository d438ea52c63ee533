//! Memory backends
//!
//! A backend hands out raw, zero-filled allocations for the devices it
//! supports. [`HostBackend`] serves CPU memory through the global allocator;
//! [`TrackingBackend`] wraps any backend and counts what passes through it.

use crate::error::{HandoffError, HandoffResult};
use handoff_types::Device;
use std::alloc::{self, Layout as AllocLayout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Source of raw buffer memory
///
/// Zero-byte requests never reach a backend.
pub trait MemoryBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Whether this backend can allocate on `device`
    fn supports(&self, device: Device) -> bool;

    /// Allocate `size` zero-filled bytes aligned to `align` on `device`
    fn allocate(&self, size: usize, align: usize, device: Device) -> HandoffResult<NonNull<u8>>;

    /// Release an allocation
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this backend with the same `size`,
    /// `align` and `device`, and must not have been released already.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize, device: Device);
}

impl fmt::Debug for dyn MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryBackend({})", self.name())
    }
}

/// CPU memory from the global allocator
#[derive(Clone, Copy, Debug, Default)]
pub struct HostBackend;

impl MemoryBackend for HostBackend {
    fn name(&self) -> &'static str {
        "host"
    }

    fn supports(&self, device: Device) -> bool {
        device.is_cpu()
    }

    fn allocate(&self, size: usize, align: usize, device: Device) -> HandoffResult<NonNull<u8>> {
        if !self.supports(device) {
            return Err(HandoffError::allocation(format!(
                "host backend cannot allocate on {}",
                device
            )));
        }
        let layout = AllocLayout::from_size_align(size, align).map_err(|e| {
            HandoffError::allocation(format!("{} bytes aligned to {}: {}", size, align, e))
        })?;
        // SAFETY: size is non-zero (backends never see empty requests).
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        NonNull::new(ptr)
            .ok_or_else(|| HandoffError::allocation(format!("out of memory allocating {} bytes", size)))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize, _device: Device) {
        // SAFETY: the same layout was accepted by `allocate`.
        let layout = AllocLayout::from_size_align_unchecked(size, align);
        alloc::dealloc(ptr.as_ptr(), layout);
    }
}

/// Counters kept by [`TrackingBackend`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub allocations: u64,
    pub deallocations: u64,
    pub live_bytes: usize,
    pub peak_bytes: usize,
}

impl BackendStats {
    /// Allocations not yet released
    pub fn live_allocations(&self) -> u64 {
        self.allocations - self.deallocations
    }
}

/// Wraps a backend and counts allocations, releases and live bytes
pub struct TrackingBackend {
    inner: Arc<dyn MemoryBackend>,
    allocations: AtomicU64,
    deallocations: AtomicU64,
    live_bytes: AtomicUsize,
    peak_bytes: AtomicUsize,
}

impl TrackingBackend {
    pub fn new(inner: Arc<dyn MemoryBackend>) -> Self {
        Self {
            inner,
            allocations: AtomicU64::new(0),
            deallocations: AtomicU64::new(0),
            live_bytes: AtomicUsize::new(0),
            peak_bytes: AtomicUsize::new(0),
        }
    }

    /// Tracking over [`HostBackend`]
    pub fn host() -> Self {
        Self::new(Arc::new(HostBackend))
    }

    pub fn stats(&self) -> BackendStats {
        BackendStats {
            allocations: self.allocations.load(Ordering::Acquire),
            deallocations: self.deallocations.load(Ordering::Acquire),
            live_bytes: self.live_bytes.load(Ordering::Acquire),
            peak_bytes: self.peak_bytes.load(Ordering::Acquire),
        }
    }
}

impl MemoryBackend for TrackingBackend {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn supports(&self, device: Device) -> bool {
        self.inner.supports(device)
    }

    fn allocate(&self, size: usize, align: usize, device: Device) -> HandoffResult<NonNull<u8>> {
        let ptr = self.inner.allocate(size, align, device)?;
        self.allocations.fetch_add(1, Ordering::AcqRel);
        let live = self.live_bytes.fetch_add(size, Ordering::AcqRel) + size;
        self.peak_bytes.fetch_max(live, Ordering::AcqRel);
        Ok(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize, device: Device) {
        self.inner.deallocate(ptr, size, align, device);
        self.deallocations.fetch_add(1, Ordering::AcqRel);
        self.live_bytes.fetch_sub(size, Ordering::AcqRel);
    }
}
