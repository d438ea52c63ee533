//! DLPack import - adopt tensors produced by other frameworks
//!
//! Import is split in two: [`describe`] validates a managed tensor and reads
//! its metadata without taking ownership, and [`adopt`] later turns it into a
//! [`Buffer`] whose storage runs the foreign deleter when the last view drops.

use super::ffi::{DLPACK_FLAG_BITMASK_READ_ONLY, DLPACK_MAJOR_VERSION};
use super::RawTensor;
use crate::error::{HandoffError, HandoffResult};
use crate::memory::storage::{Storage, StorageOwner};
use crate::memory::Buffer;
use handoff_types::{contiguous_strides, DType, Device, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

/// Largest alignment reported for foreign memory
const MAX_REPORTED_ALIGNMENT: usize = 4096;

/// Validated metadata of a foreign managed tensor
///
/// `base`/`len` cover exactly the bytes the tensor can reach, and `layout`
/// is relative to `base`, so its byte offset is never negative even for
/// reversed views.
#[derive(Debug, Clone)]
pub(crate) struct Described {
    pub layout: Layout,
    pub dtype: DType,
    pub device: Device,
    pub base: NonNull<u8>,
    pub len: usize,
    pub alignment: usize,
    pub read_only: bool,
}

/// A foreign managed tensor, deleted exactly once on drop
pub(crate) struct ForeignTensor(RawTensor);

// SAFETY: DLPack deleters may be called from any thread, and the tensor is
// only reached through this handle once adopted.
unsafe impl Send for ForeignTensor {}
unsafe impl Sync for ForeignTensor {}

impl Drop for ForeignTensor {
    fn drop(&mut self) {
        log::trace!("running foreign DLPack deleter for {:p}", self.0.as_ptr());
        let raw = match self.0 {
            RawTensor::Legacy(p) => RawTensor::Legacy(p),
            RawTensor::Versioned(p) => RawTensor::Versioned(p),
        };
        // SAFETY: the handle was adopted exclusively and Drop runs once.
        unsafe { raw.delete() };
    }
}

/// Validate a managed tensor and read its metadata
///
/// # Safety
///
/// `raw` must point to a live managed tensor whose shape and strides arrays
/// hold `ndim` entries.
pub(crate) unsafe fn describe(raw: &RawTensor) -> HandoffResult<Described> {
    let mut read_only = false;
    if let RawTensor::Versioned(p) = raw {
        let managed = &*p.as_ptr();
        if managed.version.major != DLPACK_MAJOR_VERSION {
            return Err(HandoffError::UnsupportedVersion {
                major: managed.version.major,
                minor: managed.version.minor,
            });
        }
        read_only = managed.flags & DLPACK_FLAG_BITMASK_READ_ONLY != 0;
    }

    let tensor = raw.dl_tensor();

    let (code, bits, lanes) = (tensor.dtype.code, tensor.dtype.bits, tensor.dtype.lanes);
    let dtype = DType::from_dlpack(code, bits, lanes)
        .ok_or(HandoffError::UnsupportedDtype { code, bits, lanes })?;

    if tensor.device.device_id < 0 {
        return Err(HandoffError::invalid_tensor(format!(
            "negative device id {}",
            tensor.device.device_id
        )));
    }
    let device = Device::from_dlpack(tensor.device.device_type, tensor.device.device_id)
        .ok_or(HandoffError::UnsupportedDevice(tensor.device.device_type))?;

    if tensor.ndim < 0 {
        return Err(HandoffError::invalid_tensor(format!("negative ndim {}", tensor.ndim)));
    }
    let ndim = tensor.ndim as usize;
    if ndim > 0 && tensor.shape.is_null() {
        return Err(HandoffError::invalid_tensor("shape pointer is null"));
    }

    let shape: Vec<usize> = if ndim == 0 {
        Vec::new()
    } else {
        std::slice::from_raw_parts(tensor.shape, ndim)
            .iter()
            .map(|&d| {
                usize::try_from(d)
                    .map_err(|_| HandoffError::invalid_tensor(format!("negative dimension {}", d)))
            })
            .collect::<HandoffResult<_>>()?
    };

    let strides: Vec<isize> = if ndim == 0 || tensor.strides.is_null() {
        // NULL strides mean compact row-major
        contiguous_strides(&shape).map_err(|e| HandoffError::invalid_tensor(e.to_string()))?
    } else {
        std::slice::from_raw_parts(tensor.strides, ndim)
            .iter()
            .map(|&s| {
                isize::try_from(s)
                    .map_err(|_| HandoffError::invalid_tensor(format!("stride {} out of range", s)))
            })
            .collect::<HandoffResult<_>>()?
    };

    let relative = Layout::with_strides(&shape, &strides, 0)
        .map_err(|e| HandoffError::invalid_tensor(e.to_string()))?;
    let elem_size = dtype.element_size();

    let span = relative
        .span(elem_size)
        .map_err(|e| HandoffError::invalid_tensor(e.to_string()))?;
    let Some(span) = span else {
        // empty tensors touch no memory; the data pointer may be anything
        return Ok(Described {
            layout: relative,
            dtype,
            device,
            base: NonNull::dangling(),
            len: 0,
            alignment: elem_size,
            read_only,
        });
    };

    if tensor.data.is_null() {
        return Err(HandoffError::invalid_tensor("data pointer is null"));
    }
    let len = span
        .end
        .checked_sub(span.start)
        .and_then(|len| usize::try_from(len).ok())
        .ok_or_else(|| HandoffError::invalid_tensor("tensor span overflows the address space"))?;
    let byte_offset = isize::try_from(tensor.byte_offset)
        .map_err(|_| HandoffError::invalid_tensor("byte offset out of range"))?;
    let lowest = isize::try_from(span.start)
        .map_err(|_| HandoffError::invalid_tensor("tensor span overflows the address space"))?;

    // Device pointers may not be dereferenceable here; only address arithmetic.
    let first = (tensor.data as *mut u8).wrapping_offset(byte_offset);
    let base = NonNull::new(first.wrapping_offset(lowest))
        .ok_or_else(|| HandoffError::invalid_tensor("tensor base address is null"))?;
    let layout = Layout::with_strides(&shape, &strides, lowest.unsigned_abs())
        .map_err(|e| HandoffError::invalid_tensor(e.to_string()))?;

    Ok(Described {
        layout,
        dtype,
        device,
        base,
        len,
        alignment: address_alignment(base.as_ptr() as usize),
        read_only,
    })
}

/// Take ownership of a described managed tensor
///
/// # Safety
///
/// `described` must come from [`describe`] on `raw`, and the caller must own
/// `raw`. The deleter runs when the last view of the returned Buffer drops.
pub(crate) unsafe fn adopt(raw: RawTensor, described: &Described) -> Buffer {
    log::debug!(
        "adopting foreign {:?} {} tensor on {} ({} bytes)",
        described.layout.shape(),
        described.dtype,
        described.device,
        described.len
    );
    let storage = Storage::new(
        described.base,
        described.len,
        described.alignment,
        described.device,
        StorageOwner::Foreign(ForeignTensor(raw)),
    )
    .with_read_only(described.read_only);
    Buffer::from_parts(Arc::new(storage), described.layout.clone(), described.dtype)
}

fn address_alignment(addr: usize) -> usize {
    if addr == 0 {
        return MAX_REPORTED_ALIGNMENT;
    }
    (1usize << addr.trailing_zeros()).min(MAX_REPORTED_ALIGNMENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlpack::ffi::{
        DLDataType, DLDevice, DLManagedTensor, DLManagedTensorVersioned, DLPackVersion, DLTensor,
    };
    use std::ffi::c_void;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deleter that bumps the counter stored in `manager_ctx`
    unsafe extern "C" fn count_legacy(managed: *mut DLManagedTensor) {
        let managed = Box::from_raw(managed);
        (*(managed.manager_ctx as *const AtomicUsize)).fetch_add(1, Ordering::SeqCst);
    }

    fn legacy(
        data: *mut c_void,
        shape: &mut [i64],
        strides: Option<&mut [i64]>,
        deleted: &AtomicUsize,
    ) -> RawTensor {
        let managed = Box::new(DLManagedTensor {
            dl_tensor: DLTensor {
                data,
                device: DLDevice {
                    device_type: 1,
                    device_id: 0,
                },
                ndim: shape.len() as i32,
                dtype: DLDataType::new(0, 32, 1),
                shape: shape.as_mut_ptr(),
                strides: strides.map_or(std::ptr::null_mut(), |s| s.as_mut_ptr()),
                byte_offset: 0,
            },
            manager_ctx: deleted as *const AtomicUsize as *mut c_void,
            deleter: Some(count_legacy),
        });
        RawTensor::Legacy(NonNull::new(Box::into_raw(managed)).unwrap())
    }

    #[test]
    fn test_null_strides_are_compact() {
        let mut data = vec![0i32; 6];
        let mut shape = [2i64, 3];
        let deleted = AtomicUsize::new(0);
        let raw = legacy(data.as_mut_ptr() as *mut c_void, &mut shape, None, &deleted);
        let described = unsafe { describe(&raw) }.unwrap();
        assert_eq!(described.layout.strides(), &[3, 1]);
        assert_eq!(described.len, 24);
        assert_eq!(described.dtype, DType::I32);
        assert_eq!(described.base.as_ptr() as *mut i32, data.as_mut_ptr());

        let buffer = unsafe { adopt(raw, &described) };
        let view = buffer.view(&[3], &[1], 12).unwrap();
        drop(buffer);
        assert_eq!(deleted.load(Ordering::SeqCst), 0);
        drop(view);
        assert_eq!(deleted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reversed_strides_rebase() {
        let mut data = vec![0i32, 1, 2, 3];
        let mut shape = [4i64];
        let mut strides = [-1i64];
        let deleted = AtomicUsize::new(0);
        let raw = legacy(
            data.as_mut_ptr().wrapping_add(3) as *mut c_void,
            &mut shape,
            Some(&mut strides),
            &deleted,
        );
        let described = unsafe { describe(&raw) }.unwrap();
        assert_eq!(described.base.as_ptr() as *mut i32, data.as_mut_ptr());
        assert_eq!(described.layout.byte_offset(), 12);
        assert_eq!(described.len, 16);

        let buffer = unsafe { adopt(raw, &described) };
        assert_eq!(buffer.to_vec::<i32>().unwrap(), vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_rejects_negative_dimension() {
        let mut data = vec![0i32; 4];
        let mut shape = [-4i64];
        let deleted = AtomicUsize::new(0);
        let raw = legacy(data.as_mut_ptr() as *mut c_void, &mut shape, None, &deleted);
        let err = unsafe { describe(&raw) }.unwrap_err();
        assert!(matches!(err, HandoffError::InvalidTensor(_)));
        assert_eq!(deleted.load(Ordering::SeqCst), 0);
        unsafe { raw.delete() };
        assert_eq!(deleted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rejects_unaddressable_strides() {
        let mut data = vec![0i32; 1];
        let deleted = AtomicUsize::new(0);
        for (dim, stride) in [(1i64 << 62, i64::MAX), ((1i64 << 62) + 1, i64::MIN)] {
            let mut shape = [dim];
            let mut strides = [stride];
            let raw = legacy(
                data.as_mut_ptr() as *mut c_void,
                &mut shape,
                Some(&mut strides),
                &deleted,
            );
            let err = unsafe { describe(&raw) }.unwrap_err();
            assert!(matches!(err, HandoffError::InvalidTensor(_)));
            unsafe { raw.delete() };
        }
        assert_eq!(deleted.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rejects_null_data() {
        let mut shape = [4i64];
        let deleted = AtomicUsize::new(0);
        let raw = legacy(std::ptr::null_mut(), &mut shape, None, &deleted);
        let err = unsafe { describe(&raw) }.unwrap_err();
        assert!(matches!(err, HandoffError::InvalidTensor(_)));
        unsafe { raw.delete() };
    }

    #[test]
    fn test_rejects_future_major_version() {
        let mut managed = DLManagedTensorVersioned {
            version: DLPackVersion { major: 2, minor: 0 },
            ..Default::default()
        };
        let raw = RawTensor::Versioned(NonNull::from(&mut managed));
        let err = unsafe { describe(&raw) }.unwrap_err();
        assert!(matches!(
            err,
            HandoffError::UnsupportedVersion { major: 2, minor: 0 }
        ));
    }

    #[test]
    fn test_rejects_unknown_dtype() {
        let mut data = vec![0u8; 8];
        let mut shape = [2i64];
        let mut managed = DLManagedTensorVersioned::default();
        managed.dl_tensor = DLTensor {
            data: data.as_mut_ptr() as *mut c_void,
            device: DLDevice {
                device_type: 1,
                device_id: 0,
            },
            ndim: 1,
            // complex64
            dtype: DLDataType::new(5, 64, 1),
            shape: shape.as_mut_ptr(),
            strides: std::ptr::null_mut(),
            byte_offset: 0,
        };
        let raw = RawTensor::Versioned(NonNull::from(&mut managed));
        let err = unsafe { describe(&raw) }.unwrap_err();
        assert!(matches!(
            err,
            HandoffError::UnsupportedDtype {
                code: 5,
                bits: 64,
                lanes: 1
            }
        ));
    }

    #[test]
    fn test_read_only_flag() {
        let mut data = vec![0u8; 2];
        let mut shape = [2i64];
        let mut managed = DLManagedTensorVersioned {
            flags: DLPACK_FLAG_BITMASK_READ_ONLY,
            ..Default::default()
        };
        managed.dl_tensor.data = data.as_mut_ptr() as *mut c_void;
        managed.dl_tensor.device = DLDevice {
            device_type: 1,
            device_id: 0,
        };
        managed.dl_tensor.ndim = 1;
        managed.dl_tensor.dtype = DLDataType::new(1, 8, 1);
        managed.dl_tensor.shape = shape.as_mut_ptr();
        let raw = RawTensor::Versioned(NonNull::from(&mut managed));
        let described = unsafe { describe(&raw) }.unwrap();
        assert!(described.read_only);
        assert_eq!(described.dtype, DType::U8);
    }

    #[test]
    fn test_address_alignment() {
        assert_eq!(address_alignment(0x1000), 4096);
        assert_eq!(address_alignment(0x1008), 8);
        assert_eq!(address_alignment(0x100000), 4096);
    }
}
