// PyO3 methods MUST return PyResult<T> for Python bindings.
// Clippy incorrectly flags this as "useless_conversion" but it's required by PyO3.
// See: https://github.com/PyO3/pyo3/issues/2092
#![allow(clippy::useless_conversion)]

use handoff_core::HandoffConfig;
use pyo3::prelude::*;
use std::sync::OnceLock;

mod demo;
mod dlpack_utils;
mod tensor;

use tensor::PyTensor;

static CONFIG: OnceLock<HandoffConfig> = OnceLock::new();

/// Export settings, read once from `HANDOFF_*` environment variables
pub(crate) fn config() -> &'static HandoffConfig {
    CONFIG.get_or_init(|| {
        HandoffConfig::from_env().unwrap_or_else(|e| {
            log::warn!("ignoring invalid handoff environment config: {}", e);
            HandoffConfig::default()
        })
    })
}

/// Import any DLPack producer as a `Tensor`
///
/// Accepts a bare `dltensor`/`dltensor_versioned` capsule or any object with
/// `__dlpack__`. The producer's memory is adopted, not copied.
#[pyfunction]
fn from_dlpack(obj: &Bound<'_, PyAny>) -> PyResult<PyTensor> {
    Ok(PyTensor::from_capsule(dlpack_utils::import_dlpack(obj)?))
}

/// Handoff Python Bindings
///
/// Zero-copy tensor exchange with numpy, torch and any other DLPack runtime.
#[pymodule]
fn handoff(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Tensor and DLPack entry points
    tensor::register_tensor_classes(m)?;
    m.add_function(wrap_pyfunction!(from_dlpack, m)?)?;

    // Protocol demos
    m.add_function(wrap_pyfunction!(demo::add, m)?)?;
    m.add_function(wrap_pyfunction!(demo::arange, m)?)?;
    m.add_function(wrap_pyfunction!(demo::tensordict, m)?)?;
    m.add_function(wrap_pyfunction!(demo::print_tensor, m)?)?;

    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}
