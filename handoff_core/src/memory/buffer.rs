//! Typed, shaped views over owned memory
//!
//! A [`Buffer`] is never implicitly copied: it does not implement `Clone`.
//! [`Buffer::view`] and [`Buffer::reshape`] share the underlying storage, which
//! is released once the last view is dropped. [`Buffer::copy_to`] is the only
//! operation that duplicates bytes.
//!
//! ```rust,ignore
//! use handoff_core::{Buffer, DType, Device};
//!
//! let mut buffer = Buffer::allocate(DType::F32, &[2, 3], Device::cpu())?;
//! buffer.as_mut_slice::<f32>()?.copy_from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//!
//! // transposed view over the same memory
//! let t = buffer.view(&[3, 2], &[1, 3], 0)?;
//! assert_eq!(t.to_vec::<f32>()?, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
//! ```

use super::allocator::Allocator;
use super::storage::{Storage, StorageOwner};
use crate::error::{HandoffError, HandoffResult};
use handoff_types::{DType, Device, Element, Layout};
use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// Owned tensor memory plus the layout used to read it
pub struct Buffer {
    storage: Arc<Storage>,
    layout: Layout,
    dtype: DType,
    read_only: bool,
}

impl Buffer {
    pub(crate) fn from_parts(storage: Arc<Storage>, layout: Layout, dtype: DType) -> Self {
        let read_only = storage.read_only();
        Self {
            storage,
            layout,
            dtype,
            read_only,
        }
    }

    /// Another view over the same storage
    fn derive(&self, layout: Layout) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            layout,
            dtype: self.dtype,
            read_only: self.read_only,
        }
    }

    /// Refuse writes through this view and every view derived from it
    pub(crate) fn into_read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Allocate a zero-filled buffer through [`Allocator::global`]
    pub fn allocate(dtype: DType, shape: &[usize], device: Device) -> HandoffResult<Self> {
        Allocator::global().allocate(dtype, shape, device)
    }

    /// Allocate through a specific allocator
    pub fn allocate_in(
        allocator: &Allocator,
        dtype: DType,
        shape: &[usize],
        device: Device,
    ) -> HandoffResult<Self> {
        allocator.allocate(dtype, shape, device)
    }

    /// Adopt a vector as a 1-D host buffer without copying
    pub fn from_vec<T: Element>(mut data: Vec<T>) -> Self {
        let layout = Layout::vector(data.len());
        let storage = if data.is_empty() {
            Storage::empty(std::mem::align_of::<T>(), Device::CPU)
        } else {
            let nbytes = std::mem::size_of_val(data.as_slice());
            let ptr = NonNull::from(data.as_mut_slice()).cast::<u8>();
            Storage::new(
                ptr,
                nbytes,
                std::mem::align_of::<T>(),
                Device::CPU,
                StorageOwner::Adopted(Box::new(data)),
            )
        };
        Self::from_parts(Arc::new(storage), layout, T::DTYPE)
    }

    /// Adopt a boxed slice as a 1-D host buffer without copying
    pub fn from_boxed_slice<T: Element>(data: Box<[T]>) -> Self {
        Self::from_vec(data.into_vec())
    }

    /// Re-interpret the same memory with a new shape, strides and byte offset
    ///
    /// Fails with [`HandoffError::Shape`] when any element of the view would
    /// fall outside the underlying allocation, including shapes and strides
    /// whose extent overflows.
    pub fn view(&self, shape: &[usize], strides: &[isize], byte_offset: usize) -> HandoffResult<Self> {
        let layout = Layout::with_strides(shape, strides, byte_offset)
            .and_then(|layout| {
                layout.check_within(self.dtype.element_size(), self.storage.len())?;
                Ok(layout)
            })
            .map_err(|e| HandoffError::shape(e.to_string()))?;
        Ok(self.derive(layout))
    }

    /// Compact view with a different shape and the same element count
    pub fn reshape(&self, shape: &[usize]) -> HandoffResult<Self> {
        if !self.is_contiguous() {
            return Err(HandoffError::shape(format!(
                "cannot reshape non-contiguous view (strides {:?})",
                self.strides()
            )));
        }
        let layout = self
            .layout
            .reshaped(shape)
            .map_err(|e| HandoffError::shape(e.to_string()))?;
        Ok(self.derive(layout))
    }

    #[inline]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[inline]
    pub fn device(&self) -> Device {
        self.storage.device()
    }

    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    #[inline]
    pub fn strides(&self) -> &[isize] {
        self.layout.strides()
    }

    #[inline]
    pub fn byte_offset(&self) -> usize {
        self.layout.byte_offset()
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.layout.ndim()
    }

    #[inline]
    pub fn numel(&self) -> usize {
        self.layout.numel()
    }

    /// Bytes needed to hold the elements of this view compactly
    ///
    /// `None` for broadcast views (zero strides) whose element count exceeds
    /// the address space.
    #[inline]
    pub fn nbytes(&self) -> Option<usize> {
        self.layout.nbytes(self.dtype.element_size())
    }

    /// Alignment of the underlying allocation
    #[inline]
    pub fn alignment(&self) -> usize {
        self.storage.alignment()
    }

    /// Size of the underlying allocation, which views may only partly cover
    #[inline]
    pub fn storage_len(&self) -> usize {
        self.storage.len()
    }

    #[inline]
    pub fn is_contiguous(&self) -> bool {
        self.layout.is_contiguous()
    }

    /// Writes through this buffer are refused
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Base pointer of the allocation (not offset by `byte_offset`)
    #[inline]
    pub fn data_ptr(&self) -> *mut c_void {
        self.storage.ptr().as_ptr() as *mut c_void
    }

    /// Whether two buffers view the same allocation
    pub fn shares_storage_with(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// Raw bytes of a contiguous host-accessible view
    pub fn as_bytes(&self) -> HandoffResult<&[u8]> {
        self.check_host_readable()?;
        if !self.is_contiguous() {
            return Err(HandoffError::shape("byte access needs a contiguous view"));
        }
        let start = self.byte_offset();
        let nbytes = self.materialized_nbytes(self.numel())?;
        Ok(&self.storage_bytes()[start..start + nbytes])
    }

    /// Mutable raw bytes; requires that no other view shares the storage
    pub fn as_bytes_mut(&mut self) -> HandoffResult<&mut [u8]> {
        self.check_host_readable()?;
        if !self.is_contiguous() {
            return Err(HandoffError::shape("byte access needs a contiguous view"));
        }
        if self.read_only {
            return Err(HandoffError::invalid_tensor("buffer is read-only"));
        }
        let start = self.byte_offset();
        let nbytes = self.materialized_nbytes(self.numel())?;
        let storage = Arc::get_mut(&mut self.storage)
            .ok_or_else(|| HandoffError::shape("storage is shared with another view"))?;
        if nbytes == 0 {
            return Ok(&mut []);
        }
        // SAFETY: `start + nbytes <= len` was checked when the layout was
        // built, and `get_mut` proves no other view can observe the bytes.
        unsafe {
            Ok(std::slice::from_raw_parts_mut(
                storage.ptr().as_ptr().add(start),
                nbytes,
            ))
        }
    }

    /// Typed access to a contiguous host-accessible view
    pub fn as_slice<T: Element>(&self) -> HandoffResult<&[T]> {
        self.check_dtype::<T>()?;
        bytemuck::try_cast_slice(self.as_bytes()?)
            .map_err(|e| HandoffError::shape(format!("cannot view bytes as {}: {:?}", T::DTYPE, e)))
    }

    /// Typed mutable access, see [`Buffer::as_bytes_mut`]
    pub fn as_mut_slice<T: Element>(&mut self) -> HandoffResult<&mut [T]> {
        self.check_dtype::<T>()?;
        bytemuck::try_cast_slice_mut(self.as_bytes_mut()?)
            .map_err(|e| HandoffError::shape(format!("cannot view bytes as {}: {:?}", T::DTYPE, e)))
    }

    /// Copy the elements out in row-major order, following any strides
    ///
    /// Fails with [`HandoffError::Allocation`] when the elements cannot be
    /// materialized, as for huge broadcast views.
    pub fn to_vec<T: Element>(&self) -> HandoffResult<Vec<T>> {
        self.head(self.numel())
    }

    /// The first `n` elements in row-major order (fewer if the view is
    /// smaller), following any strides
    pub fn head<T: Element>(&self, n: usize) -> HandoffResult<Vec<T>> {
        self.check_dtype::<T>()?;
        Ok(bytemuck::pod_collect_to_vec(&self.head_bytes(n)?))
    }

    /// Untyped [`Buffer::head`]: the bytes of the first `n` elements
    pub fn head_bytes(&self, n: usize) -> HandoffResult<Vec<u8>> {
        self.check_host_readable()?;
        self.gather_bytes(n.min(self.numel()))
    }

    /// Explicit copy into a fresh compact buffer on `device`
    ///
    /// Both sides must be host-accessible; accelerator transfers belong to the
    /// runtime that owns the accelerator.
    pub fn copy_to(&self, device: Device, allocator: &Allocator) -> HandoffResult<Buffer> {
        for side in [self.device(), device] {
            if !side.is_host_accessible() {
                return Err(HandoffError::UnsupportedDevice(side.kind.code()));
            }
        }
        let bytes = self.gather_bytes(self.numel())?;
        let mut dst = allocator.allocate(self.dtype, self.shape(), device)?;
        dst.as_bytes_mut()?.copy_from_slice(&bytes);
        log::debug!(
            "copied {} bytes {} -> {}",
            bytes.len(),
            self.device(),
            device
        );
        Ok(dst)
    }

    pub(super) fn check_dtype<T: Element>(&self) -> HandoffResult<()> {
        if T::DTYPE != self.dtype {
            return Err(HandoffError::DtypeMismatch {
                actual: self.dtype,
                requested: T::DTYPE,
            });
        }
        Ok(())
    }

    pub(super) fn check_host_readable(&self) -> HandoffResult<()> {
        let device = self.device();
        if !device.is_host_accessible() {
            return Err(HandoffError::DeviceMismatch {
                expected: "host-accessible memory".to_string(),
                actual: device,
            });
        }
        Ok(())
    }

    /// Whole allocation as bytes; callers have checked host accessibility
    fn storage_bytes(&self) -> &[u8] {
        if self.storage.len() == 0 {
            return &[];
        }
        // SAFETY: ptr is valid for `len` bytes for as long as the storage lives,
        // and shared views only read.
        unsafe { std::slice::from_raw_parts(self.storage.ptr().as_ptr(), self.storage.len()) }
    }

    /// Byte size of `count` elements, if that can be held in memory
    fn materialized_nbytes(&self, count: usize) -> HandoffResult<usize> {
        count
            .checked_mul(self.dtype.element_size())
            .filter(|&n| n <= isize::MAX as usize)
            .ok_or_else(|| {
                HandoffError::allocation(format!(
                    "{} elements of {} cannot be materialized",
                    count, self.dtype
                ))
            })
    }

    /// Row-major copy of the bytes of the first `count` elements
    fn gather_bytes(&self, count: usize) -> HandoffResult<Vec<u8>> {
        let elem = self.dtype.element_size();
        if count == 0 {
            return Ok(Vec::new());
        }
        let nbytes = self.materialized_nbytes(count)?;
        let bytes = self.storage_bytes();
        if self.is_contiguous() {
            let start = self.byte_offset();
            return Ok(bytes[start..start + nbytes].to_vec());
        }

        let shape = self.shape();
        let strides = self.strides();
        let mut out = Vec::new();
        out.try_reserve_exact(nbytes).map_err(|e| {
            HandoffError::allocation(format!("gathering {} bytes: {}", nbytes, e))
        })?;
        let mut index = vec![0usize; shape.len()];
        for _ in 0..count {
            let element: isize = index
                .iter()
                .zip(strides)
                .map(|(&i, &s)| i as isize * s)
                .sum();
            // in bounds: check_within covered every index of this layout
            let start = (self.byte_offset() as isize + element * elem as isize) as usize;
            out.extend_from_slice(&bytes[start..start + elem]);

            for d in (0..shape.len()).rev() {
                index[d] += 1;
                if index[d] < shape[d] {
                    break;
                }
                index[d] = 0;
            }
        }
        Ok(out)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("shape", &self.shape())
            .field("strides", &self.strides())
            .field("dtype", &self.dtype)
            .field("device", &self.device())
            .field("byte_offset", &self.byte_offset())
            .field("owner", &self.storage.owner_kind())
            .finish()
    }
}
