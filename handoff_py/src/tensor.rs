//! Python `Tensor`: a capsule that speaks `__dlpack__`
//!
//! Passing a `Tensor` to `numpy.from_dlpack` or `torch.from_dlpack` hands its
//! memory over without copying. A tensor can be exported once; afterwards
//! its metadata stays readable but the data is gone.

use crate::config;
use crate::dlpack_utils::{import_dlpack, make_dlpack_capsule, parse_device, parse_dtype, to_py_err};
use handoff_core::{negotiate_format, produce_capsule, Buffer, Capsule, ExportOptions};
use pyo3::exceptions::{PyBufferError, PyOverflowError};
use pyo3::prelude::*;

#[pyclass(name = "Tensor", module = "handoff")]
pub struct PyTensor {
    capsule: Capsule,
}

impl PyTensor {
    pub fn from_capsule(capsule: Capsule) -> Self {
        Self { capsule }
    }

    pub fn from_buffer(buffer: Buffer) -> Self {
        Self::from_capsule(produce_capsule(buffer, config()))
    }
}

#[pymethods]
impl PyTensor {
    /// Allocate a zero-filled tensor
    ///
    /// Args:
    ///     shape: Dimension sizes
    ///     dtype: Element type name (default: "float32")
    ///     device: Device string (default: "cpu")
    #[new]
    #[pyo3(signature = (shape, dtype="float32", device="cpu"))]
    fn new(shape: Vec<usize>, dtype: &str, device: &str) -> PyResult<Self> {
        let buffer = Buffer::allocate(parse_dtype(dtype)?, &shape, parse_device(device)?)
            .map_err(to_py_err)?;
        Ok(Self::from_buffer(buffer))
    }

    /// Import any DLPack producer (capsule or object with `__dlpack__`)
    #[staticmethod]
    fn from_dlpack(obj: &Bound<'_, PyAny>) -> PyResult<Self> {
        Ok(Self::from_capsule(import_dlpack(obj)?))
    }

    /// Export as a DLPack capsule, transferring ownership to the consumer
    ///
    /// `stream` is accepted for protocol compatibility; host memory needs no
    /// synchronization. Consumers announcing `max_version >= (1, 0)` receive
    /// a versioned capsule.
    #[pyo3(signature = (*, stream=None, max_version=None, dl_device=None, copy=None))]
    fn __dlpack__(
        &self,
        py: Python<'_>,
        stream: Option<Bound<'_, PyAny>>,
        max_version: Option<(u32, u32)>,
        dl_device: Option<(i32, i32)>,
        copy: Option<bool>,
    ) -> PyResult<Py<PyAny>> {
        let _ = stream;
        if let Some(requested) = dl_device {
            if requested != self.capsule.device_for_exchange() {
                return Err(PyBufferError::new_err(format!(
                    "tensor lives on {}, cross-device export needs an explicit copy",
                    self.capsule.inspect().device
                )));
            }
        }
        if copy == Some(true) {
            return Err(PyBufferError::new_err(
                "copying export is not supported, tensors are handed off in place",
            ));
        }

        let wanted = negotiate_format(max_version, config());
        let info = self.capsule.inspect();
        let raw = if info.format == wanted {
            self.capsule.take_raw().map_err(to_py_err)?
        } else {
            // re-export the same buffer in the format the consumer understands
            let buffer = self.capsule.consume().map_err(to_py_err)?;
            let options = ExportOptions {
                format: wanted,
                read_only: info.read_only,
            };
            Capsule::wrap_with(buffer, options)
                .into_raw()
                .map_err(to_py_err)?
        };
        make_dlpack_capsule(py, raw)
    }

    /// `(device_type, device_id)` in DLPack codes
    fn __dlpack_device__(&self) -> (i32, i32) {
        self.capsule.device_for_exchange()
    }

    #[getter]
    fn shape(&self) -> Vec<usize> {
        self.capsule.inspect().shape().to_vec()
    }

    #[getter]
    fn strides(&self) -> Vec<isize> {
        self.capsule.inspect().strides().to_vec()
    }

    #[getter]
    fn dtype(&self) -> &'static str {
        self.capsule.inspect().dtype.name()
    }

    #[getter]
    fn device(&self) -> String {
        self.capsule.inspect().device.to_string()
    }

    #[getter]
    fn ndim(&self) -> usize {
        self.capsule.inspect().ndim()
    }

    /// Bytes the elements would occupy compactly
    #[getter]
    fn nbytes(&self) -> PyResult<usize> {
        self.capsule.inspect().nbytes().ok_or_else(|| {
            PyOverflowError::new_err("broadcast tensor is larger than the address space")
        })
    }

    /// True once the data has been handed to a consumer
    #[getter]
    fn consumed(&self) -> bool {
        self.capsule.is_consumed()
    }

    fn __len__(&self) -> usize {
        self.capsule.inspect().shape().first().copied().unwrap_or(0)
    }

    fn __repr__(&self) -> String {
        let info = self.capsule.inspect();
        format!(
            "Tensor(shape={:?}, dtype={}, device={}{})",
            info.shape(),
            info.dtype,
            info.device,
            if self.capsule.is_consumed() {
                ", consumed"
            } else {
                ""
            }
        )
    }

    fn __str__(&self) -> String {
        self.__repr__()
    }
}

/// Register tensor classes with the Python module
pub fn register_tensor_classes(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyTensor>()?;
    Ok(())
}
