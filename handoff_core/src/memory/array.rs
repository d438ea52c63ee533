//! `ndarray` interop
//!
//! Owned arrays are adopted without copying and keep their strides, so a
//! Fortran-order or reversed array stays one after it crosses a capsule.
//! Host buffers can be read in place as [`ArrayViewD`].

use super::buffer::Buffer;
use crate::error::{HandoffError, HandoffResult};
use handoff_types::Element;
use ndarray::{Array, ArrayD, ArrayViewD, Axis, Dimension, IxDyn, ShapeBuilder};
use std::ptr::NonNull;

impl Buffer {
    /// Adopt an owned array, keeping its shape, strides and offset
    pub fn from_array<A: Element, D: Dimension>(array: Array<A, D>) -> HandoffResult<Self> {
        let shape = array.shape().to_vec();
        let strides = array.strides().to_vec();
        let (data, offset) = array.into_raw_vec_and_offset();
        let byte_offset = offset.unwrap_or(0) * std::mem::size_of::<A>();
        Buffer::from_vec(data).view(&shape, &strides, byte_offset)
    }

    /// Borrow a host buffer as a dynamic-rank array view
    ///
    /// Negative and zero strides carry over; nothing is copied.
    pub fn as_array_view<A: Element>(&self) -> HandoffResult<ArrayViewD<'_, A>> {
        self.check_dtype::<A>()?;
        self.check_host_readable()?;

        let shape = self.shape();
        if self.numel() == 0 {
            // SAFETY: an empty view never dereferences its pointer.
            return Ok(unsafe {
                ArrayViewD::from_shape_ptr(IxDyn(shape), NonNull::<A>::dangling().as_ptr())
            });
        }

        let elem = std::mem::size_of::<A>() as isize;
        // Start from the lowest address with absolute strides, then flip the
        // negative axes back.
        let mut lowest = self.byte_offset() as isize;
        let mut magnitudes = Vec::with_capacity(shape.len());
        for (&dim, &stride) in shape.iter().zip(self.strides()) {
            if stride < 0 {
                lowest += (dim as isize - 1) * stride * elem;
            }
            magnitudes.push(stride.unsigned_abs());
        }
        // in bounds: the layout was checked against the allocation
        let ptr = (self.data_ptr() as *const u8).wrapping_offset(lowest) as *const A;
        if (ptr as usize) % std::mem::align_of::<A>() != 0 {
            return Err(HandoffError::shape(format!(
                "data at {:p} is not aligned for {}",
                ptr,
                A::DTYPE
            )));
        }

        // SAFETY: every element reachable from `ptr` with these strides lies
        // inside the storage, which outlives the returned view; shared views
        // only read.
        let mut view =
            unsafe { ArrayViewD::from_shape_ptr(IxDyn(shape).strides(IxDyn(&magnitudes)), ptr) };
        for (axis, &stride) in self.strides().iter().enumerate() {
            if stride < 0 {
                view.invert_axis(Axis(axis));
            }
        }
        Ok(view)
    }

    /// Row-major owned copy as an array
    pub fn to_array<A: Element>(&self) -> HandoffResult<ArrayD<A>> {
        let values = self.to_vec::<A>()?;
        Array::from_shape_vec(IxDyn(self.shape()), values)
            .map_err(|e| HandoffError::shape(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::Capsule;
    use handoff_types::{DType, MemoryOrder};
    use ndarray::{arr2, s, Array1};

    #[test]
    fn test_fortran_array_crosses_capsule_in_place() {
        let array = Array::from_shape_vec((2, 3).f(), vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let ptr = array.as_ptr();
        let buffer = Buffer::from_array(array).unwrap();
        assert_eq!(buffer.strides(), &[1, 2]);
        assert_eq!(buffer.layout().memory_order(), MemoryOrder::ColumnMajor);
        assert_eq!(buffer.data_ptr() as *const f32, ptr);

        let buffer = Capsule::wrap(buffer).consume().unwrap();
        let view = buffer.as_array_view::<f32>().unwrap();
        assert_eq!(view.shape(), &[2, 3]);
        assert_eq!(view[[1, 0]], 2.0);
        assert_eq!(view[[0, 1]], 3.0);
        assert_eq!(
            buffer.to_array::<f32>().unwrap(),
            arr2(&[[1.0f32, 3.0, 5.0], [2.0, 4.0, 6.0]]).into_dyn()
        );
    }

    #[test]
    fn test_reversed_array_keeps_offset() {
        let reversed = Array1::from_vec(vec![0i32, 1, 2, 3]).slice_move(s![..;-1]);
        let buffer = Buffer::from_array(reversed).unwrap();
        assert_eq!(buffer.strides(), &[-1]);
        assert_eq!(buffer.byte_offset(), 12);
        assert_eq!(buffer.to_vec::<i32>().unwrap(), vec![3, 2, 1, 0]);

        let view = buffer.as_array_view::<i32>().unwrap();
        assert_eq!(view.iter().copied().collect::<Vec<_>>(), vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_transposed_buffer_as_view() {
        let buffer = Buffer::from_vec((0..6).collect::<Vec<i64>>()).reshape(&[2, 3]).unwrap();
        let transposed = buffer.view(&[3, 2], &[1, 3], 0).unwrap();
        let view = transposed.as_array_view::<i64>().unwrap();
        let expected = arr2(&[[0i64, 1, 2], [3, 4, 5]]);
        assert_eq!(view, expected.t().into_dyn());
    }

    #[test]
    fn test_broadcast_view_reads_one_element() {
        let buffer = Buffer::from_vec(vec![9u8]).view(&[2, 4], &[0, 0], 0).unwrap();
        let view = buffer.as_array_view::<u8>().unwrap();
        assert!(view.iter().all(|&v| v == 9));
        assert_eq!(view.len(), 8);
    }

    #[test]
    fn test_view_checks_dtype() {
        let buffer = Buffer::from_vec(vec![1u16, 2]);
        assert!(matches!(
            buffer.as_array_view::<i16>(),
            Err(HandoffError::DtypeMismatch {
                actual: DType::U16,
                requested: DType::I16
            })
        ));
    }

    #[test]
    fn test_empty_array() {
        let buffer = Buffer::from_array(Array::<f64, _>::zeros((0, 3))).unwrap();
        assert_eq!(buffer.numel(), 0);
        assert_eq!(buffer.as_array_view::<f64>().unwrap().shape(), &[0, 3]);
    }
}
