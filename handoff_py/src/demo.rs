//! Small functions showing the capsule protocol from Python
//!
//! ```python
//! import numpy as np, handoff
//! x = np.from_dlpack(handoff.arange(10))      # zero-copy
//! d = {k: np.from_dlpack(v) for k, v in handoff.tensordict().items()}
//! handoff.print_tensor(np.arange(4.0, dtype=np.float32))
//! ```

use crate::dlpack_utils::{import_dlpack, make_dlpack_capsule, to_py_err};
use handoff_core::{
    Buffer, Capsule, CapsuleFormat, CapsuleRegistry, DType, Element, ExportOptions, HandoffResult,
};
use pyo3::prelude::*;
use pyo3::types::PyDict;

/// Bare capsules go to consumers that call `from_dlpack(capsule)` directly,
/// which only understand the legacy name.
const BARE_CAPSULE: ExportOptions = ExportOptions {
    format: CapsuleFormat::Legacy,
    read_only: false,
};

/// Values shown by `print_tensor`
const PREVIEW_LEN: usize = 8;

#[pyfunction]
pub fn add(left: usize, right: usize) -> usize {
    left + right
}

/// `[0.0, 1.0, ..., n - 1]` as a float32 DLPack capsule
#[pyfunction]
pub fn arange(py: Python<'_>, n: usize) -> PyResult<Py<PyAny>> {
    let values: Vec<f32> = (0..n).map(|x| x as f32).collect();
    let raw = Capsule::wrap_with(Buffer::from_vec(values), BARE_CAPSULE)
        .into_raw()
        .map_err(to_py_err)?;
    make_dlpack_capsule(py, raw)
}

/// Named capsules: `v1` (ten float32 ones) and `v2` (ten uint8 twos)
///
/// Each entry is a separate allocation, consumed independently.
#[pyfunction]
pub fn tensordict(py: Python<'_>) -> PyResult<Bound<'_, PyDict>> {
    let registry = CapsuleRegistry::new();
    registry
        .register("v1", Capsule::wrap_with(Buffer::from_vec(vec![1.0f32; 10]), BARE_CAPSULE))
        .map_err(to_py_err)?;
    registry
        .register("v2", Capsule::wrap_with(Buffer::from_vec(vec![2u8; 10]), BARE_CAPSULE))
        .map_err(to_py_err)?;

    let dict = PyDict::new(py);
    for (name, capsule) in registry.drain() {
        let raw = capsule.into_raw().map_err(to_py_err)?;
        dict.set_item(name, make_dlpack_capsule(py, raw)?)?;
    }
    Ok(dict)
}

/// Import any DLPack producer and print its layout and leading values
#[pyfunction]
pub fn print_tensor(py: Python<'_>, tensor: &Bound<'_, PyAny>) -> PyResult<()> {
    let capsule = import_dlpack(tensor)?;
    let buffer = capsule.consume().map_err(to_py_err)?;
    let mut summary = format!(
        "shape={:?} strides={:?} dtype={} device={}",
        buffer.shape(),
        buffer.strides(),
        buffer.dtype(),
        buffer.device()
    );
    if buffer.device().is_host_accessible() {
        summary.push_str(&format!(" values={}", preview(&buffer).map_err(to_py_err)?));
    }
    py.import("builtins")?.call_method1("print", (summary,))?;
    Ok(())
}

fn preview(buffer: &Buffer) -> HandoffResult<String> {
    fn head<T: Element + std::fmt::Debug>(buffer: &Buffer) -> HandoffResult<String> {
        Ok(truncated(&buffer.head::<T>(PREVIEW_LEN)?, buffer.numel()))
    }

    match buffer.dtype() {
        DType::I8 => head::<i8>(buffer),
        DType::I16 => head::<i16>(buffer),
        DType::I32 => head::<i32>(buffer),
        DType::I64 => head::<i64>(buffer),
        DType::U8 => head::<u8>(buffer),
        DType::U16 => head::<u16>(buffer),
        DType::U32 => head::<u32>(buffer),
        DType::U64 => head::<u64>(buffer),
        DType::F16 => head::<half::f16>(buffer),
        DType::BF16 => head::<half::bf16>(buffer),
        DType::F32 => head::<f32>(buffer),
        DType::F64 => head::<f64>(buffer),
        // one byte per element, no Element impl
        DType::Bool => {
            let values: Vec<bool> = buffer
                .head_bytes(PREVIEW_LEN)?
                .iter()
                .map(|&b| b != 0)
                .collect();
            Ok(truncated(&values, buffer.numel()))
        }
    }
}

fn truncated<T: std::fmt::Debug>(shown: &[T], total: usize) -> String {
    if total > shown.len() {
        format!("{:?} ... ({} total)", shown, total)
    } else {
        format!("{:?}", shown)
    }
}
