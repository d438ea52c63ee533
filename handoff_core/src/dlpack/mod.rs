//! DLPack interop
//!
//! [`ffi`] mirrors the C ABI. Export places a [`Buffer`](crate::Buffer) inside a
//! managed tensor whose deleter drops it; import validates a foreign managed
//! tensor and wraps it so that its deleter runs exactly once.
//!
//! [`RawTensor`] is the unowned hand-off form of either managed tensor
//! flavour, used at the boundary with Python capsules or other C consumers.

pub mod ffi;

mod export;
mod import;

pub(crate) use export::{export, reclaim};
pub(crate) use import::{adopt, describe, Described, ForeignTensor};

use crate::capsule::Capsule;
use crate::config::CapsuleFormat;
use crate::error::{HandoffError, HandoffResult};
use ffi::{DLManagedTensor, DLManagedTensorVersioned, DLTensor};
use std::ffi::c_void;
use std::ptr::NonNull;

/// Pointer to a managed tensor in flight between two owners
///
/// A `RawTensor` does not free anything when dropped: whoever holds it is
/// responsible for either calling [`RawTensor::delete`], turning it back into
/// a [`Capsule`], or passing it to a consumer that will call the deleter.
#[must_use = "dropping a RawTensor leaks the tensor"]
#[derive(Debug, PartialEq, Eq)]
pub enum RawTensor {
    /// Pre-1.0 `DLManagedTensor`
    Legacy(NonNull<DLManagedTensor>),
    /// `DLManagedTensorVersioned`
    Versioned(NonNull<DLManagedTensorVersioned>),
}

impl RawTensor {
    pub fn format(&self) -> CapsuleFormat {
        match self {
            RawTensor::Legacy(_) => CapsuleFormat::Legacy,
            RawTensor::Versioned(_) => CapsuleFormat::Versioned,
        }
    }

    /// Untyped pointer, as stored in a Python capsule
    pub fn as_ptr(&self) -> *mut c_void {
        match self {
            RawTensor::Legacy(p) => p.as_ptr() as *mut c_void,
            RawTensor::Versioned(p) => p.as_ptr() as *mut c_void,
        }
    }

    /// Rebuild from an untyped capsule pointer
    ///
    /// Returns `None` for a null pointer.
    pub fn from_ptr(ptr: *mut c_void, format: CapsuleFormat) -> Option<Self> {
        match format {
            CapsuleFormat::Legacy => NonNull::new(ptr as *mut DLManagedTensor).map(RawTensor::Legacy),
            CapsuleFormat::Versioned => {
                NonNull::new(ptr as *mut DLManagedTensorVersioned).map(RawTensor::Versioned)
            }
        }
    }

    /// # Safety
    ///
    /// The managed tensor must still be alive.
    pub(crate) unsafe fn dl_tensor<'a>(&self) -> &'a DLTensor {
        match self {
            RawTensor::Legacy(p) => &(*p.as_ptr()).dl_tensor,
            RawTensor::Versioned(p) => &(*p.as_ptr()).dl_tensor,
        }
    }

    /// # Safety
    ///
    /// The managed tensor must still be alive.
    pub(crate) unsafe fn manager_ctx(&self) -> *mut c_void {
        match self {
            RawTensor::Legacy(p) => (*p.as_ptr()).manager_ctx,
            RawTensor::Versioned(p) => (*p.as_ptr()).manager_ctx,
        }
    }

    /// Run the producer's deleter
    ///
    /// # Safety
    ///
    /// The managed tensor must be alive and owned by the caller; it is invalid
    /// afterwards.
    pub unsafe fn delete(self) {
        match self {
            RawTensor::Legacy(p) => match (*p.as_ptr()).deleter {
                Some(deleter) => deleter(p.as_ptr()),
                None => log::warn!("legacy DLPack tensor {:p} has no deleter, leaking it", p),
            },
            RawTensor::Versioned(p) => match (*p.as_ptr()).deleter {
                Some(deleter) => deleter(p.as_ptr()),
                None => log::warn!("versioned DLPack tensor {:p} has no deleter, leaking it", p),
            },
        }
    }

    /// Adopt the managed tensor as a foreign [`Capsule`]
    ///
    /// On error the tensor is left untouched and ownership stays with the
    /// caller.
    ///
    /// # Safety
    ///
    /// See [`Capsule::from_raw_legacy`].
    pub unsafe fn into_capsule(self) -> HandoffResult<Capsule> {
        Capsule::from_raw(self)
    }
}

/// Null check shared by the raw-pointer entry points
pub(crate) fn non_null<T>(ptr: *mut T) -> HandoffResult<NonNull<T>> {
    NonNull::new(ptr).ok_or_else(|| HandoffError::invalid_tensor("managed tensor pointer is null"))
}
