//! Shared DLPack, dtype and error utilities for the Python bindings.
//!
//! Python carries managed tensors in `PyCapsule` objects. A consumer that
//! takes ownership renames the capsule to `used_dltensor` (or
//! `used_dltensor_versioned`); the capsule destructor only deletes tensors
//! that still carry the unclaimed name.

use std::ffi::CStr;

use handoff_core::{CapsuleFormat, DType, Device, HandoffError, RawTensor};
use pyo3::exceptions::{PyKeyError, PyMemoryError, PyRuntimeError, PyTypeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

pub const LEGACY_NAME: &CStr = c"dltensor";
pub const USED_LEGACY_NAME: &CStr = c"used_dltensor";
pub const VERSIONED_NAME: &CStr = c"dltensor_versioned";
pub const USED_VERSIONED_NAME: &CStr = c"used_dltensor_versioned";

// === Conversions ===

/// Map a handoff error onto the closest Python exception.
pub fn to_py_err(err: HandoffError) -> PyErr {
    let msg = err.to_string();
    match err {
        HandoffError::Allocation(_) => PyMemoryError::new_err(msg),
        HandoffError::NotFound(_) => PyKeyError::new_err(msg),
        HandoffError::AlreadyConsumed | HandoffError::Io(_) => PyRuntimeError::new_err(msg),
        _ => PyValueError::new_err(msg),
    }
}

/// Parse a user-facing dtype string ("float32", "f32", "int64", ...).
pub fn parse_dtype(s: &str) -> PyResult<DType> {
    DType::parse(s).ok_or_else(|| PyValueError::new_err(format!("Unknown dtype: {}", s)))
}

/// Parse a device string ("cpu", "cuda:0") into `Device`.
pub fn parse_device(s: &str) -> PyResult<Device> {
    Device::parse(s).ok_or_else(|| PyValueError::new_err(format!("Unknown device: {}", s)))
}

fn capsule_names(format: CapsuleFormat) -> (&'static CStr, &'static CStr) {
    match format {
        CapsuleFormat::Legacy => (LEGACY_NAME, USED_LEGACY_NAME),
        CapsuleFormat::Versioned => (VERSIONED_NAME, USED_VERSIONED_NAME),
    }
}

// === Export ===

/// Wrap a managed tensor in a PyCapsule.
///
/// The capsule owns the tensor until a consumer renames it. If the capsule
/// cannot be created the tensor is deleted here.
pub fn make_dlpack_capsule(py: Python<'_>, raw: RawTensor) -> PyResult<Py<PyAny>> {
    let (name, _) = capsule_names(raw.format());
    let destructor = match raw.format() {
        CapsuleFormat::Legacy => legacy_capsule_destructor as pyo3::ffi::PyCapsule_Destructor,
        CapsuleFormat::Versioned => versioned_capsule_destructor,
    };
    // SAFETY: `name` is 'static, and the destructor matches the pointer type.
    unsafe {
        let capsule = pyo3::ffi::PyCapsule_New(raw.as_ptr(), name.as_ptr(), Some(destructor));
        if capsule.is_null() {
            raw.delete();
            return Err(PyErr::fetch(py));
        }
        Ok(Py::from_owned_ptr(py, capsule))
    }
}

unsafe extern "C" fn legacy_capsule_destructor(capsule: *mut pyo3::ffi::PyObject) {
    release_unclaimed(capsule, CapsuleFormat::Legacy);
}

unsafe extern "C" fn versioned_capsule_destructor(capsule: *mut pyo3::ffi::PyObject) {
    release_unclaimed(capsule, CapsuleFormat::Versioned);
}

/// Delete the tensor of a capsule nobody claimed.
unsafe fn release_unclaimed(capsule: *mut pyo3::ffi::PyObject, format: CapsuleFormat) {
    let (name, _) = capsule_names(format);
    // A renamed capsule belongs to its consumer; IsValid is false for it.
    if pyo3::ffi::PyCapsule_IsValid(capsule, name.as_ptr()) != 1 {
        return;
    }
    let ptr = pyo3::ffi::PyCapsule_GetPointer(capsule, name.as_ptr());
    if let Some(raw) = RawTensor::from_ptr(ptr, format) {
        log::debug!("deleting unclaimed {:?} DLPack capsule", format);
        raw.delete();
    }
}

// === Import ===

/// Claim the managed tensor inside a DLPack PyCapsule.
///
/// On success the capsule is renamed to its `used_*` name and the returned
/// [`handoff_core::Capsule`] owns the tensor.
pub fn claim_dlpack_capsule(capsule: &Bound<'_, PyAny>) -> PyResult<handoff_core::Capsule> {
    let py = capsule.py();
    let ptr = capsule.as_ptr();
    // SAFETY: `ptr` is a live object borrowed for the duration of this call.
    if unsafe { pyo3::ffi::PyCapsule_CheckExact(ptr) } == 0 {
        return Err(PyTypeError::new_err("expected a DLPack PyCapsule"));
    }

    for format in [CapsuleFormat::Versioned, CapsuleFormat::Legacy] {
        let (name, used) = capsule_names(format);
        // SAFETY: ptr is a capsule (checked above) and the names are 'static.
        unsafe {
            if pyo3::ffi::PyCapsule_IsValid(ptr, used.as_ptr()) == 1 {
                return Err(to_py_err(HandoffError::AlreadyConsumed));
            }
            if pyo3::ffi::PyCapsule_IsValid(ptr, name.as_ptr()) != 1 {
                continue;
            }
            let managed = pyo3::ffi::PyCapsule_GetPointer(ptr, name.as_ptr());
            let raw = RawTensor::from_ptr(managed, format)
                .ok_or_else(|| PyValueError::new_err("DLPack capsule holds a null pointer"))?;
            let claimed = raw.into_capsule().map_err(to_py_err)?;
            if pyo3::ffi::PyCapsule_SetName(ptr, used.as_ptr()) != 0 {
                // hand the tensor back to the PyCapsule, which still owns it
                let _ = claimed.take_raw().map_err(to_py_err)?;
                return Err(PyErr::fetch(py));
            }
            return Ok(claimed);
        }
    }
    Err(PyValueError::new_err(
        "expected a PyCapsule named 'dltensor' or 'dltensor_versioned'",
    ))
}

/// Import any DLPack producer: a bare capsule or an object with `__dlpack__`.
///
/// Producers are asked for a versioned capsule first and fall back to the
/// legacy protocol when they do not understand `max_version`.
pub fn import_dlpack(obj: &Bound<'_, PyAny>) -> PyResult<handoff_core::Capsule> {
    let py = obj.py();
    // SAFETY: obj is a live object.
    if unsafe { pyo3::ffi::PyCapsule_CheckExact(obj.as_ptr()) } != 0 {
        return claim_dlpack_capsule(obj);
    }
    if !obj.hasattr("__dlpack__")? {
        return Err(PyTypeError::new_err(
            "object does not support the DLPack protocol (no __dlpack__)",
        ));
    }

    let kwargs = PyDict::new(py);
    kwargs.set_item("max_version", (1u32, 1u32))?;
    let capsule = match obj.call_method("__dlpack__", (), Some(&kwargs)) {
        Ok(capsule) => capsule,
        Err(e) if e.is_instance_of::<PyTypeError>(py) => obj.call_method0("__dlpack__")?,
        Err(e) => return Err(e),
    };
    claim_dlpack_capsule(&capsule)
}
