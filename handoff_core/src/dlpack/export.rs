//! DLPack export - hand a Buffer to another runtime
//!
//! The managed tensor's `manager_ctx` owns the Buffer together with the
//! shape and stride arrays the `DLTensor` points into. Whoever ends up holding
//! the managed tensor either calls its deleter, which drops all of that, or
//! (when it is this library) reclaims the Buffer with [`reclaim`].

use std::ffi::c_void;

use super::ffi::{
    DLDataType, DLDevice, DLManagedTensor, DLManagedTensorVersioned, DLPackVersion, DLTensor,
    DLPACK_FLAG_BITMASK_READ_ONLY,
};
use super::RawTensor;
use crate::config::CapsuleFormat;
use crate::memory::Buffer;
use std::ptr::NonNull;

/// Context stored in `manager_ctx`
struct ExportContext {
    buffer: Buffer,
    /// Shape array referenced by `DLTensor::shape`
    shape: Vec<i64>,
    /// Strides array referenced by `DLTensor::strides`
    strides: Vec<i64>,
}

impl ExportContext {
    fn new(buffer: Buffer) -> Box<Self> {
        let shape = buffer.layout().shape_i64();
        let strides = buffer.layout().strides_i64();
        Box::new(Self {
            buffer,
            shape,
            strides,
        })
    }

    /// Tensor description pointing into this context
    fn dl_tensor(&mut self) -> DLTensor {
        let (code, bits, lanes) = self.buffer.dtype().to_dlpack();
        let (device_type, device_id) = self.buffer.device().to_dlpack();
        DLTensor {
            data: self.buffer.data_ptr(),
            device: DLDevice {
                device_type,
                device_id,
            },
            ndim: self.shape.len() as i32,
            dtype: DLDataType::new(code, bits, lanes),
            shape: self.shape.as_mut_ptr(),
            // always explicit, even for compact buffers
            strides: self.strides.as_mut_ptr(),
            byte_offset: self.buffer.byte_offset() as u64,
        }
    }
}

/// Deleter installed on legacy exports
unsafe extern "C" fn delete_legacy(managed: *mut DLManagedTensor) {
    if managed.is_null() {
        return;
    }
    // SAFETY: `managed` was created by `Box::into_raw` in `export` and the
    // consumer calls the deleter once.
    let managed = Box::from_raw(managed);
    drop_context(managed.manager_ctx);
}

/// Deleter installed on versioned exports
unsafe extern "C" fn delete_versioned(managed: *mut DLManagedTensorVersioned) {
    if managed.is_null() {
        return;
    }
    // SAFETY: as in `delete_legacy`.
    let managed = Box::from_raw(managed);
    drop_context(managed.manager_ctx);
}

unsafe fn drop_context(ctx: *mut c_void) {
    if ctx.is_null() {
        return;
    }
    // SAFETY: ctx was created by `Box::into_raw` on an ExportContext.
    let ctx = Box::from_raw(ctx as *mut ExportContext);
    log::trace!(
        "DLPack deleter releasing {:?} {}",
        ctx.buffer.shape(),
        ctx.buffer.dtype()
    );
}

/// Move `buffer` into a freshly allocated managed tensor
pub(crate) fn export(buffer: Buffer, format: CapsuleFormat, read_only: bool) -> RawTensor {
    let mut ctx = ExportContext::new(buffer);
    let dl_tensor = ctx.dl_tensor();
    let manager_ctx = Box::into_raw(ctx) as *mut c_void;

    match format {
        CapsuleFormat::Legacy => {
            let managed = Box::new(DLManagedTensor {
                dl_tensor,
                manager_ctx,
                deleter: Some(delete_legacy),
            });
            // SAFETY: Box::into_raw never returns null
            RawTensor::Legacy(unsafe { NonNull::new_unchecked(Box::into_raw(managed)) })
        }
        CapsuleFormat::Versioned => {
            let flags = if read_only {
                DLPACK_FLAG_BITMASK_READ_ONLY
            } else {
                0
            };
            let managed = Box::new(DLManagedTensorVersioned {
                version: DLPackVersion::default(),
                manager_ctx,
                deleter: Some(delete_versioned),
                flags,
                dl_tensor,
            });
            // SAFETY: Box::into_raw never returns null
            RawTensor::Versioned(unsafe { NonNull::new_unchecked(Box::into_raw(managed)) })
        }
    }
}

/// Take the Buffer back out of a managed tensor produced by [`export`]
///
/// Frees the managed tensor and context without running the deleter.
///
/// # Safety
///
/// `raw` must come from [`export`] and must not have been deleted.
pub(crate) unsafe fn reclaim(raw: RawTensor) -> Buffer {
    let ctx = match raw {
        RawTensor::Legacy(p) => Box::from_raw(p.as_ptr()).manager_ctx,
        RawTensor::Versioned(p) => Box::from_raw(p.as_ptr()).manager_ctx,
    };
    let ctx = Box::from_raw(ctx as *mut ExportContext);
    ctx.buffer
}
