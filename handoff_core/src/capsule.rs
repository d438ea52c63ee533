//! Capsules: one-shot ownership transfer of a Buffer
//!
//! A [`Capsule`] owns a DLPack managed tensor until exactly one of the
//! following happens:
//!
//! - [`Capsule::consume`] hands the Buffer to the caller (`Unconsumed -> Consumed`)
//! - [`Capsule::take_raw`] hands the managed tensor to a foreign consumer,
//!   which becomes responsible for its deleter (`Unconsumed -> Consumed`)
//! - the Capsule is dropped and runs the deleter itself (`Unconsumed -> Freed`)
//!
//! The state lives behind a lock, so concurrent consumers are serialized and
//! every loser observes [`HandoffError::AlreadyConsumed`]. Metadata from
//! [`Capsule::inspect`] stays readable in every state; the memory does not.
//!
//! ```rust,ignore
//! use handoff_core::{Buffer, Capsule, DType, Device};
//!
//! let capsule = Capsule::wrap(Buffer::allocate(DType::I64, &[10], Device::CPU)?);
//! assert_eq!(capsule.inspect().shape(), &[10]);
//!
//! let buffer = capsule.consume()?;
//! assert!(capsule.consume().is_err());
//! ```

use crate::config::{CapsuleFormat, HandoffConfig};
use crate::dlpack::{self, ffi::DLManagedTensor, ffi::DLManagedTensorVersioned, RawTensor};
use crate::error::{HandoffError, HandoffResult};
use crate::exchange::Accept;
use crate::memory::Buffer;
use handoff_types::{DType, Device, Element, Layout};
use parking_lot::RwLock;
use std::fmt;
use std::ptr::NonNull;

/// Lifecycle of a capsule; both non-initial states are terminal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CapsuleState {
    Unconsumed,
    Consumed,
    Freed,
}

/// Metadata snapshot, readable before and after consumption
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapsuleInfo {
    pub layout: Layout,
    pub dtype: DType,
    pub device: Device,
    pub format: CapsuleFormat,
    pub read_only: bool,
}

impl CapsuleInfo {
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

    /// Compact byte size; `None` for broadcast views too large to materialize
    #[inline]
    pub fn nbytes(&self) -> Option<usize> {
        self.layout.nbytes(self.dtype.element_size())
    }
}

/// How a Buffer is exported into a capsule
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExportOptions {
    pub format: CapsuleFormat,
    /// Consumers must not write (versioned flag, and enforced on native reclaim)
    pub read_only: bool,
}

impl From<&HandoffConfig> for ExportOptions {
    fn from(config: &HandoffConfig) -> Self {
        Self {
            format: config.capsule_format,
            read_only: config.read_only_exports,
        }
    }
}

/// Who produced the managed tensor
#[derive(Debug)]
enum Origin {
    /// Produced by [`Capsule::wrap`]; consumption reclaims the Buffer directly
    Native,
    /// Adopted from another runtime
    Foreign(dlpack::Described),
}

struct Slot {
    state: CapsuleState,
    managed: Option<RawTensor>,
}

/// Transferable handle owning a Buffer until consumed
pub struct Capsule {
    slot: RwLock<Slot>,
    origin: Origin,
    info: CapsuleInfo,
    /// Allocation base the layout in `info` is relative to
    base: NonNull<u8>,
}

// SAFETY: the managed tensor is only reached under `slot`'s lock and is
// handed out at most once; DLPack deleters may run on any thread.
unsafe impl Send for Capsule {}
unsafe impl Sync for Capsule {}

impl Capsule {
    /// Take ownership of `buffer` using the default export options
    pub fn wrap(buffer: Buffer) -> Self {
        Self::wrap_with(buffer, ExportOptions::default())
    }

    /// Take ownership of `buffer`
    pub fn wrap_with(buffer: Buffer, options: ExportOptions) -> Self {
        let info = CapsuleInfo {
            layout: buffer.layout().clone(),
            dtype: buffer.dtype(),
            device: buffer.device(),
            format: options.format,
            read_only: options.read_only,
        };
        let base = NonNull::new(buffer.data_ptr() as *mut u8).unwrap_or(NonNull::dangling());
        log::debug!(
            "wrapping {:?} {} on {} as {:?} capsule",
            info.shape(),
            info.dtype,
            info.device,
            info.format
        );
        let raw = dlpack::export(buffer, options.format, options.read_only);
        Self::from_parts(raw, Origin::Native, info, base)
    }

    /// Wrap after checking the buffer against the declared metadata
    ///
    /// A differing `shape` with the same element count is applied as a
    /// reshape of a contiguous buffer. Dtype and device are never coerced.
    pub fn wrap_as(
        buffer: Buffer,
        shape: &[usize],
        dtype: DType,
        device: Device,
    ) -> HandoffResult<Self> {
        if buffer.dtype() != dtype {
            return Err(HandoffError::DtypeMismatch {
                actual: buffer.dtype(),
                requested: dtype,
            });
        }
        if buffer.device() != device {
            return Err(HandoffError::DeviceMismatch {
                expected: device.to_string(),
                actual: buffer.device(),
            });
        }
        let buffer = if buffer.shape() == shape {
            buffer
        } else {
            buffer.reshape(shape)?
        };
        Ok(Self::wrap(buffer))
    }

    /// Adopt a legacy managed tensor produced by another runtime
    ///
    /// On success the capsule owns the tensor and will call its deleter
    /// exactly once. On error nothing is called and the caller still owns it.
    ///
    /// # Safety
    ///
    /// `managed` must point to a live managed tensor that the caller owns,
    /// with `ndim` valid entries behind its shape (and non-null strides)
    /// pointers.
    pub unsafe fn from_raw_legacy(managed: *mut DLManagedTensor) -> HandoffResult<Self> {
        Self::from_raw(RawTensor::Legacy(dlpack::non_null(managed)?))
    }

    /// Adopt a versioned managed tensor produced by another runtime
    ///
    /// Tensors with a major version other than 1 are rejected with
    /// [`HandoffError::UnsupportedVersion`], without calling the deleter.
    ///
    /// # Safety
    ///
    /// As for [`Capsule::from_raw_legacy`].
    pub unsafe fn from_raw_versioned(managed: *mut DLManagedTensorVersioned) -> HandoffResult<Self> {
        Self::from_raw(RawTensor::Versioned(dlpack::non_null(managed)?))
    }

    pub(crate) unsafe fn from_raw(raw: RawTensor) -> HandoffResult<Self> {
        let described = dlpack::describe(&raw)?;
        let info = CapsuleInfo {
            layout: described.layout.clone(),
            dtype: described.dtype,
            device: described.device,
            format: raw.format(),
            read_only: described.read_only,
        };
        log::debug!(
            "imported foreign {:?} {} on {} ({:?})",
            info.shape(),
            info.dtype,
            info.device,
            info.format
        );
        let base = described.base;
        Ok(Self::from_parts(raw, Origin::Foreign(described), info, base))
    }

    fn from_parts(raw: RawTensor, origin: Origin, info: CapsuleInfo, base: NonNull<u8>) -> Self {
        Self {
            slot: RwLock::new(Slot {
                state: CapsuleState::Unconsumed,
                managed: Some(raw),
            }),
            origin,
            info,
            base,
        }
    }

    /// Metadata, legal in every state
    #[inline]
    pub fn inspect(&self) -> &CapsuleInfo {
        &self.info
    }

    pub fn state(&self) -> CapsuleState {
        self.slot.read().state
    }

    pub fn is_consumed(&self) -> bool {
        self.state() != CapsuleState::Unconsumed
    }

    /// Whether this capsule was produced by [`Capsule::wrap`]
    pub fn is_native(&self) -> bool {
        matches!(self.origin, Origin::Native)
    }

    /// `(device_type, device_id)` as returned by `__dlpack_device__`
    pub fn device_for_exchange(&self) -> (i32, i32) {
        self.info.device.to_dlpack()
    }

    /// Take the Buffer, accepting any device
    pub fn consume(&self) -> HandoffResult<Buffer> {
        self.consume_as(Accept::Any)
    }

    /// Take the Buffer if it lives where the consumer can use it
    ///
    /// A device mismatch leaves the capsule unconsumed.
    pub fn consume_as(&self, accept: Accept) -> HandoffResult<Buffer> {
        let raw = self.take(|| accept.check(self.info.device))?;
        let buffer = match &self.origin {
            // SAFETY: native capsules only ever hold managed tensors from
            // `dlpack::export`, and `take` hands each out once.
            Origin::Native => unsafe { dlpack::reclaim(raw) },
            // SAFETY: `described` was read from this tensor at import.
            Origin::Foreign(described) => unsafe { dlpack::adopt(raw, described) },
        };
        log::debug!(
            "consumed {:?} {} capsule on {}",
            self.info.shape(),
            self.info.dtype,
            self.info.device
        );
        Ok(if self.info.read_only {
            buffer.into_read_only()
        } else {
            buffer
        })
    }

    /// Hand the managed tensor to a foreign consumer
    ///
    /// Counts as consumption: the receiver must call the deleter exactly once.
    pub fn take_raw(&self) -> HandoffResult<RawTensor> {
        let raw = self.take(|| Ok(()))?;
        log::debug!("exported {:?} capsule at {:p}", raw.format(), raw.as_ptr());
        Ok(raw)
    }

    /// Owned form of [`Capsule::take_raw`]
    pub fn into_raw(self) -> HandoffResult<RawTensor> {
        self.take_raw()
    }

    /// The single `Unconsumed -> Consumed` transition
    fn take<F>(&self, check: F) -> HandoffResult<RawTensor>
    where
        F: FnOnce() -> HandoffResult<()>,
    {
        let mut slot = self.slot.write();
        if slot.state != CapsuleState::Unconsumed {
            return Err(HandoffError::AlreadyConsumed);
        }
        check()?;
        let raw = slot.managed.take().ok_or(HandoffError::AlreadyConsumed)?;
        slot.state = CapsuleState::Consumed;
        Ok(raw)
    }

    /// Borrow the bytes of a contiguous host-accessible tensor
    ///
    /// The capsule stays unconsumed; after consumption this fails with
    /// [`HandoffError::AlreadyConsumed`].
    pub fn with_bytes<R, F>(&self, f: F) -> HandoffResult<R>
    where
        F: FnOnce(&[u8]) -> R,
    {
        let slot = self.slot.read();
        if slot.state != CapsuleState::Unconsumed {
            return Err(HandoffError::AlreadyConsumed);
        }
        if !self.info.device.is_host_accessible() {
            return Err(HandoffError::DeviceMismatch {
                expected: Accept::HostAccessible.to_string(),
                actual: self.info.device,
            });
        }
        if !self.info.layout.is_contiguous() {
            return Err(HandoffError::shape("byte access needs a contiguous tensor"));
        }
        // contiguous layouts lie inside their allocation, so this fits
        let nbytes = self.info.nbytes().unwrap_or(0);
        if nbytes == 0 {
            return Ok(f(&[]));
        }
        // SAFETY: the lock keeps the tensor owned by this capsule, and the
        // layout was checked against the allocation when it was wrapped or
        // imported.
        let bytes = unsafe {
            std::slice::from_raw_parts(self.base.as_ptr().add(self.info.byte_offset()), nbytes)
        };
        Ok(f(bytes))
    }

    /// Typed variant of [`Capsule::with_bytes`]
    pub fn with_slice<T, R, F>(&self, f: F) -> HandoffResult<R>
    where
        T: Element,
        F: FnOnce(&[T]) -> R,
    {
        if T::DTYPE != self.info.dtype {
            return Err(HandoffError::DtypeMismatch {
                actual: self.info.dtype,
                requested: T::DTYPE,
            });
        }
        self.with_bytes(|bytes| {
            if bytes.is_empty() {
                return Ok(f(&[]));
            }
            bytemuck::try_cast_slice(bytes).map(f)
        })?
            .map_err(|e| HandoffError::shape(format!("cannot view bytes as {}: {:?}", T::DTYPE, e)))
    }
}

impl Drop for Capsule {
    fn drop(&mut self) {
        let slot = self.slot.get_mut();
        if let Some(raw) = slot.managed.take() {
            slot.state = CapsuleState::Freed;
            log::debug!(
                "freeing unconsumed {:?} {} capsule",
                self.info.shape(),
                self.info.dtype
            );
            // SAFETY: the capsule still owned the tensor, and it is released
            // once here.
            unsafe { raw.delete() };
        }
    }
}

impl fmt::Debug for Capsule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capsule")
            .field("shape", &self.info.shape())
            .field("dtype", &self.info.dtype)
            .field("device", &self.info.device)
            .field("format", &self.info.format)
            .field("state", &self.state())
            .field("native", &self.is_native())
            .finish()
    }
}
