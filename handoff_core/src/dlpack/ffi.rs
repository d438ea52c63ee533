//! DLPack FFI definitions
//!
//! These structs match the DLPack C header for ABI compatibility.
//! See: <https://github.com/dmlc/dlpack/blob/main/include/dlpack/dlpack.h>

use std::ffi::c_void;
use std::os::raw::c_int;

/// Major version written into versioned managed tensors
pub const DLPACK_MAJOR_VERSION: u32 = 1;
/// Minor version written into versioned managed tensors
pub const DLPACK_MINOR_VERSION: u32 = 1;

/// `DLPACK_FLAG_BITMASK_READ_ONLY`: consumer must not write through the tensor
pub const DLPACK_FLAG_BITMASK_READ_ONLY: u64 = 1 << 0;
/// `DLPACK_FLAG_BITMASK_IS_COPIED`: producer made a copy for this export
pub const DLPACK_FLAG_BITMASK_IS_COPIED: u64 = 1 << 1;
/// `DLPACK_FLAG_BITMASK_IS_SUBBYTE_TYPE_PADDED`
pub const DLPACK_FLAG_BITMASK_IS_SUBBYTE_TYPE_PADDED: u64 = 1 << 2;

/// DLPack device descriptor
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DLDevice {
    /// Device type (kDLCPU=1, kDLCUDA=2, ...)
    pub device_type: i32,
    /// Device index
    pub device_id: i32,
}

/// DLPack data type descriptor
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DLDataType {
    /// Type category, see `handoff_types::dlpack_codes`
    pub code: u8,
    /// Number of bits per element
    pub bits: u8,
    /// Number of lanes, 1 for scalar types
    pub lanes: u16,
}

impl DLDataType {
    #[inline]
    pub const fn new(code: u8, bits: u8, lanes: u16) -> Self {
        Self { code, bits, lanes }
    }
}

/// DLPack tensor structure
///
/// Plain tensor metadata, no ownership semantics.
#[repr(C)]
#[derive(Debug)]
pub struct DLTensor {
    /// Opaque data pointer; a device pointer for accelerator tensors
    pub data: *mut c_void,
    pub device: DLDevice,
    pub ndim: c_int,
    pub dtype: DLDataType,
    /// `ndim` dimension sizes
    pub shape: *mut i64,
    /// `ndim` strides in elements, NULL for compact row-major
    pub strides: *mut i64,
    /// Offset in bytes from `data` to the first element
    pub byte_offset: u64,
}

impl Default for DLTensor {
    fn default() -> Self {
        Self {
            data: std::ptr::null_mut(),
            device: DLDevice::default(),
            ndim: 0,
            dtype: DLDataType::default(),
            shape: std::ptr::null_mut(),
            strides: std::ptr::null_mut(),
            byte_offset: 0,
        }
    }
}

/// Deleter function type for DLManagedTensor
pub type DLManagedTensorDeleter = unsafe extern "C" fn(*mut DLManagedTensor);

/// Legacy (pre-1.0) managed tensor
///
/// The consumer calls `deleter` exactly once when done with the tensor.
#[repr(C)]
pub struct DLManagedTensor {
    pub dl_tensor: DLTensor,
    /// Producer-side context needed for cleanup
    pub manager_ctx: *mut c_void,
    /// Frees `manager_ctx` and this struct. May be NULL.
    pub deleter: Option<DLManagedTensorDeleter>,
}

impl Default for DLManagedTensor {
    fn default() -> Self {
        Self {
            dl_tensor: DLTensor::default(),
            manager_ctx: std::ptr::null_mut(),
            deleter: None,
        }
    }
}

/// `DLPackVersion`
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DLPackVersion {
    pub major: u32,
    pub minor: u32,
}

impl Default for DLPackVersion {
    fn default() -> Self {
        Self {
            major: DLPACK_MAJOR_VERSION,
            minor: DLPACK_MINOR_VERSION,
        }
    }
}

/// Deleter function type for DLManagedTensorVersioned
pub type DLManagedTensorVersionedDeleter = unsafe extern "C" fn(*mut DLManagedTensorVersioned);

/// Versioned managed tensor (DLPack >= 1.0)
///
/// Everything up to and including `flags` is ABI-stable across versions, so
/// a consumer may always read `version` and call `deleter`.
#[repr(C)]
pub struct DLManagedTensorVersioned {
    pub version: DLPackVersion,
    pub manager_ctx: *mut c_void,
    pub deleter: Option<DLManagedTensorVersionedDeleter>,
    /// `DLPACK_FLAG_BITMASK_*` bits
    pub flags: u64,
    pub dl_tensor: DLTensor,
}

impl Default for DLManagedTensorVersioned {
    fn default() -> Self {
        Self {
            version: DLPackVersion::default(),
            manager_ctx: std::ptr::null_mut(),
            deleter: None,
            flags: 0,
            dl_tensor: DLTensor::default(),
        }
    }
}
