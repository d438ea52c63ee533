//! Shape and stride descriptors
//!
//! Strides are counted in elements and may be negative (reversed views).
//! All size arithmetic is checked; a layout that cannot be addressed is an
//! error rather than a wrapped value.

use std::fmt;
use std::ops::Range;
use thiserror::Error;

/// Errors produced while building or checking a [`Layout`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("shape has {shape} dimensions but strides have {strides}")]
    RankMismatch { shape: usize, strides: usize },

    #[error("shape {0:?} overflows the addressable size")]
    Overflow(Vec<usize>),

    #[error("view reaches bytes {start}..{end} outside an allocation of {len} bytes")]
    OutOfBounds { start: i128, end: i128, len: usize },

    #[error("reshape from {from} to {to} elements")]
    ElementCountMismatch { from: usize, to: usize },
}

/// How the elements of a layout are arranged in memory
///
/// Layouts that are both (vectors, scalars, empty tensors) report `RowMajor`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryOrder {
    RowMajor,
    ColumnMajor,
    Strided,
}

impl fmt::Display for MemoryOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MemoryOrder::RowMajor => "row-major",
            MemoryOrder::ColumnMajor => "column-major",
            MemoryOrder::Strided => "strided",
        })
    }
}

/// Shape, element strides and starting byte offset of a tensor view
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct Layout {
    shape: Vec<usize>,
    strides: Vec<isize>,
    byte_offset: usize,
}

impl Layout {
    /// Row-major compact layout for `shape`
    pub fn contiguous(shape: &[usize]) -> Result<Self, LayoutError> {
        let strides = contiguous_strides(shape)?;
        Ok(Self {
            shape: shape.to_vec(),
            strides,
            byte_offset: 0,
        })
    }

    /// One-dimensional compact layout over an existing slice of `len` elements
    pub fn vector(len: usize) -> Self {
        Self {
            shape: vec![len],
            strides: vec![1],
            byte_offset: 0,
        }
    }

    /// Layout with explicit strides and byte offset
    pub fn with_strides(
        shape: &[usize],
        strides: &[isize],
        byte_offset: usize,
    ) -> Result<Self, LayoutError> {
        if shape.len() != strides.len() {
            return Err(LayoutError::RankMismatch {
                shape: shape.len(),
                strides: strides.len(),
            });
        }
        match checked_numel(shape) {
            Some(n) if n <= isize::MAX as usize => {}
            _ => return Err(LayoutError::Overflow(shape.to_vec())),
        }
        Ok(Self {
            shape: shape.to_vec(),
            strides: strides.to_vec(),
            byte_offset,
        })
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    #[inline]
    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements (validated at construction, cannot overflow)
    #[inline]
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Row-major compact, ignoring strides of size-1 dimensions
    pub fn is_contiguous(&self) -> bool {
        self.numel() == 0 || compact_in(self.shape.iter().zip(&self.strides).rev())
    }

    /// Column-major (Fortran order) compact, ignoring strides of size-1
    /// dimensions
    pub fn is_column_major(&self) -> bool {
        self.numel() == 0 || compact_in(self.shape.iter().zip(&self.strides))
    }

    pub fn memory_order(&self) -> MemoryOrder {
        if self.is_contiguous() {
            MemoryOrder::RowMajor
        } else if self.is_column_major() {
            MemoryOrder::ColumnMajor
        } else {
            MemoryOrder::Strided
        }
    }

    /// Byte range touched by this layout, relative to the allocation base
    ///
    /// `Ok(None)` for empty tensors, which touch no memory. Fails with
    /// [`LayoutError::Overflow`] when the extent is not representable.
    pub fn span(&self, elem_size: usize) -> Result<Option<Range<i128>>, LayoutError> {
        if self.numel() == 0 {
            return Ok(None);
        }
        let overflow = || LayoutError::Overflow(self.shape.clone());
        let elem = elem_size as i128;
        let mut low: i128 = 0;
        let mut high: i128 = 0;
        for (&dim, &stride) in self.shape.iter().zip(&self.strides) {
            let reach = (dim as i128 - 1)
                .checked_mul(stride as i128)
                .and_then(|r| r.checked_mul(elem))
                .ok_or_else(overflow)?;
            if reach < 0 {
                low = low.checked_add(reach).ok_or_else(overflow)?;
            } else {
                high = high.checked_add(reach).ok_or_else(overflow)?;
            }
        }
        let base = self.byte_offset as i128;
        let start = base.checked_add(low).ok_or_else(overflow)?;
        let end = base
            .checked_add(high)
            .and_then(|e| e.checked_add(elem))
            .ok_or_else(overflow)?;
        Ok(Some(start..end))
    }

    /// Check that every element lies inside an allocation of `len` bytes
    pub fn check_within(&self, elem_size: usize, len: usize) -> Result<(), LayoutError> {
        match self.span(elem_size)? {
            None => Ok(()),
            Some(range) if range.start >= 0 && range.end <= len as i128 => Ok(()),
            Some(range) => Err(LayoutError::OutOfBounds {
                start: range.start,
                end: range.end,
                len,
            }),
        }
    }

    /// Bytes needed to hold every element compactly, `None` if that exceeds
    /// the address space (broadcast views can)
    pub fn nbytes(&self, elem_size: usize) -> Option<usize> {
        self.numel()
            .checked_mul(elem_size)
            .filter(|&n| n <= isize::MAX as usize)
    }

    /// Same offset, new compact shape with the same element count
    pub fn reshaped(&self, shape: &[usize]) -> Result<Self, LayoutError> {
        let to = checked_numel(shape).ok_or_else(|| LayoutError::Overflow(shape.to_vec()))?;
        if to != self.numel() {
            return Err(LayoutError::ElementCountMismatch {
                from: self.numel(),
                to,
            });
        }
        let mut layout = Self::contiguous(shape)?;
        layout.byte_offset = self.byte_offset;
        Ok(layout)
    }

    /// Shape as DLPack `int64_t` values
    pub fn shape_i64(&self) -> Vec<i64> {
        self.shape.iter().map(|&d| d as i64).collect()
    }

    /// Strides as DLPack `int64_t` values
    pub fn strides_i64(&self) -> Vec<i64> {
        self.strides.iter().map(|&s| s as i64).collect()
    }
}

/// Whether `(dim, stride)` pairs, innermost first, step through memory
/// without gaps
fn compact_in<'a>(dims: impl Iterator<Item = (&'a usize, &'a isize)>) -> bool {
    let mut expected: isize = 1;
    for (&dim, &stride) in dims {
        if dim != 1 && stride != expected {
            return false;
        }
        // bounded by numel, which fits in isize
        expected = expected.saturating_mul(dim as isize);
    }
    true
}

/// Element count of `shape`, `None` on overflow
pub fn checked_numel(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

/// Row-major strides in elements
pub fn contiguous_strides(shape: &[usize]) -> Result<Vec<isize>, LayoutError> {
    let numel = checked_numel(shape).ok_or_else(|| LayoutError::Overflow(shape.to_vec()))?;
    if numel > isize::MAX as usize {
        return Err(LayoutError::Overflow(shape.to_vec()));
    }
    let mut strides = vec![0isize; shape.len()];
    let mut acc: isize = 1;
    for i in (0..shape.len()).rev() {
        strides[i] = acc;
        // bounded by numel, or zero for empty shapes
        acc = acc.saturating_mul(shape[i].max(1) as isize);
    }
    Ok(strides)
}
