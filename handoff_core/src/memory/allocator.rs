//! Buffer allocation policy
//!
//! An [`Allocator`] pairs a [`MemoryBackend`] with the size and alignment
//! limits from [`HandoffConfig`].

use super::backend::{HostBackend, MemoryBackend};
use super::buffer::Buffer;
use super::storage::{Storage, StorageOwner};
use crate::config::HandoffConfig;
use crate::error::{HandoffError, HandoffResult};
use handoff_types::{DType, Device, Layout};
use std::sync::{Arc, OnceLock};

static GLOBAL: OnceLock<Allocator> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct Allocator {
    backend: Arc<dyn MemoryBackend>,
    alignment: usize,
    max_allocation_bytes: usize,
}

impl Allocator {
    pub fn new(backend: Arc<dyn MemoryBackend>, config: &HandoffConfig) -> Self {
        Self {
            backend,
            alignment: config.alignment,
            max_allocation_bytes: config.max_allocation_bytes,
        }
    }

    /// Host memory with the given limits
    pub fn host(config: &HandoffConfig) -> Self {
        Self::new(Arc::new(HostBackend), config)
    }

    /// Process-wide host allocator, configured from `HANDOFF_*` variables
    pub fn global() -> &'static Allocator {
        GLOBAL.get_or_init(|| {
            let config = HandoffConfig::from_env().unwrap_or_else(|e| {
                log::warn!("ignoring invalid handoff environment config: {}", e);
                HandoffConfig::default()
            });
            Allocator::host(&config)
        })
    }

    #[inline]
    pub fn backend(&self) -> &Arc<dyn MemoryBackend> {
        &self.backend
    }

    #[inline]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Allocate a zero-filled, row-major buffer
    pub fn allocate(&self, dtype: DType, shape: &[usize], device: Device) -> HandoffResult<Buffer> {
        if !self.backend.supports(device) {
            return Err(HandoffError::allocation(format!(
                "{} backend cannot allocate on {}",
                self.backend.name(),
                device
            )));
        }

        let layout = Layout::contiguous(shape)?;
        let nbytes = layout.nbytes(dtype.element_size()).ok_or_else(|| {
            HandoffError::allocation(format!(
                "{:?} x {} overflows the addressable size",
                shape, dtype
            ))
        })?;
        if nbytes > self.max_allocation_bytes {
            return Err(HandoffError::allocation(format!(
                "{} bytes exceeds the {} byte allocation limit",
                nbytes, self.max_allocation_bytes
            )));
        }

        let alignment = self.alignment.max(dtype.element_size());
        let storage = if nbytes == 0 {
            Storage::empty(alignment, device)
        } else {
            let ptr = self.backend.allocate(nbytes, alignment, device)?;
            Storage::new(
                ptr,
                nbytes,
                alignment,
                device,
                StorageOwner::Backend(Arc::clone(&self.backend)),
            )
        };

        log::debug!(
            "allocated {} bytes for {:?} {} on {} ({})",
            nbytes,
            shape,
            dtype,
            device,
            self.backend.name()
        );
        Ok(Buffer::from_parts(Arc::new(storage), layout, dtype))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::TrackingBackend;

    #[test]
    fn test_allocate_matches_request() {
        let allocator = Allocator::host(&HandoffConfig::default());
        let buffer = allocator.allocate(DType::I64, &[10], Device::CPU).unwrap();
        assert_eq!(buffer.shape(), &[10]);
        assert_eq!(buffer.dtype(), DType::I64);
        assert_eq!(buffer.nbytes(), Some(80));
        assert_eq!(buffer.alignment(), 64);
        assert_eq!(buffer.data_ptr() as usize % 64, 0);
    }

    #[test]
    fn test_limit_is_allocation_error() {
        let config = HandoffConfig {
            max_allocation_bytes: 1024,
            ..HandoffConfig::default()
        };
        let allocator = Allocator::host(&config);
        let err = allocator.allocate(DType::F32, &[257], Device::CPU).unwrap_err();
        assert!(matches!(err, HandoffError::Allocation(_)));
    }

    #[test]
    fn test_overflowing_shape_is_allocation_error() {
        let allocator = Allocator::host(&HandoffConfig::default());
        let err = allocator
            .allocate(DType::F64, &[usize::MAX / 4, 4], Device::CPU)
            .unwrap_err();
        assert!(matches!(err, HandoffError::Allocation(_)));
    }

    #[test]
    fn test_unsupported_device() {
        let allocator = Allocator::host(&HandoffConfig::default());
        let err = allocator.allocate(DType::U8, &[4], Device::cuda(0)).unwrap_err();
        assert!(matches!(err, HandoffError::Allocation(_)));
    }

    #[test]
    fn test_empty_buffer_skips_backend() {
        let tracking = Arc::new(TrackingBackend::host());
        let allocator = Allocator::new(tracking.clone(), &HandoffConfig::default());
        let buffer = allocator.allocate(DType::F32, &[3, 0], Device::CPU).unwrap();
        assert_eq!(buffer.nbytes(), Some(0));
        drop(buffer);
        assert_eq!(tracking.stats().allocations, 0);
        assert_eq!(tracking.stats().deallocations, 0);
    }
}
