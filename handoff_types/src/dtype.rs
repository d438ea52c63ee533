//! Element types with DLPack mapping
//!
//! The canonical enumeration of tensor element types understood by the
//! exchange layer, with conversions to and from DLPack type codes, numpy type
//! strings and user-facing names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// DLPack type codes (`DLDataTypeCode` in dlpack.h)
pub mod dlpack_codes {
    /// Signed integer
    pub const DLPACK_INT: u8 = 0;
    /// Unsigned integer
    pub const DLPACK_UINT: u8 = 1;
    /// IEEE floating point
    pub const DLPACK_FLOAT: u8 = 2;
    /// Opaque handle
    pub const DLPACK_OPAQUE_HANDLE: u8 = 3;
    /// Brain floating point
    pub const DLPACK_BFLOAT: u8 = 4;
    /// Complex number
    pub const DLPACK_COMPLEX: u8 = 5;
    /// Boolean
    pub const DLPACK_BOOL: u8 = 6;
}

/// Element type of a buffer
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F16,
    BF16,
    #[default]
    F32,
    F64,
    /// One byte per element, 0 or 1
    Bool,
}

impl DType {
    /// Every supported element type
    pub const ALL: [DType; 13] = [
        DType::I8,
        DType::I16,
        DType::I32,
        DType::I64,
        DType::U8,
        DType::U16,
        DType::U32,
        DType::U64,
        DType::F16,
        DType::BF16,
        DType::F32,
        DType::F64,
        DType::Bool,
    ];

    /// Size in bytes of a single element
    #[inline]
    pub const fn element_size(&self) -> usize {
        match self {
            DType::I8 | DType::U8 | DType::Bool => 1,
            DType::I16 | DType::U16 | DType::F16 | DType::BF16 => 2,
            DType::I32 | DType::U32 | DType::F32 => 4,
            DType::I64 | DType::U64 | DType::F64 => 8,
        }
    }

    /// Size in bits of a single element
    #[inline]
    pub const fn bits(&self) -> u8 {
        (self.element_size() * 8) as u8
    }

    #[inline]
    pub const fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16 | DType::F32 | DType::F64)
    }

    #[inline]
    pub const fn is_signed_int(&self) -> bool {
        matches!(self, DType::I8 | DType::I16 | DType::I32 | DType::I64)
    }

    /// numpy `__array_interface__` type string
    pub const fn numpy_typestr(&self) -> &'static str {
        match self {
            DType::I8 => "|i1",
            DType::I16 => "<i2",
            DType::I32 => "<i4",
            DType::I64 => "<i8",
            DType::U8 => "|u1",
            DType::U16 => "<u2",
            DType::U32 => "<u4",
            DType::U64 => "<u8",
            DType::F16 => "<f2",
            DType::BF16 => "<V2", // numpy has no bfloat16
            DType::F32 => "<f4",
            DType::F64 => "<f8",
            DType::Bool => "|b1",
        }
    }

    /// Convert to a DLPack `(code, bits, lanes)` triple
    pub const fn to_dlpack(&self) -> (u8, u8, u16) {
        use dlpack_codes::*;
        let code = match self {
            DType::I8 | DType::I16 | DType::I32 | DType::I64 => DLPACK_INT,
            DType::U8 | DType::U16 | DType::U32 | DType::U64 => DLPACK_UINT,
            DType::F16 | DType::F32 | DType::F64 => DLPACK_FLOAT,
            DType::BF16 => DLPACK_BFLOAT,
            DType::Bool => DLPACK_BOOL,
        };
        (code, self.bits(), 1)
    }

    /// Create from a DLPack `(code, bits, lanes)` triple
    ///
    /// Vectorized types (`lanes != 1`) are not supported.
    pub const fn from_dlpack(code: u8, bits: u8, lanes: u16) -> Option<Self> {
        use dlpack_codes::*;

        if lanes != 1 {
            return None;
        }

        match (code, bits) {
            (DLPACK_INT, 8) => Some(DType::I8),
            (DLPACK_INT, 16) => Some(DType::I16),
            (DLPACK_INT, 32) => Some(DType::I32),
            (DLPACK_INT, 64) => Some(DType::I64),
            (DLPACK_UINT, 8) => Some(DType::U8),
            (DLPACK_UINT, 16) => Some(DType::U16),
            (DLPACK_UINT, 32) => Some(DType::U32),
            (DLPACK_UINT, 64) => Some(DType::U64),
            (DLPACK_FLOAT, 16) => Some(DType::F16),
            (DLPACK_FLOAT, 32) => Some(DType::F32),
            (DLPACK_FLOAT, 64) => Some(DType::F64),
            (DLPACK_BFLOAT, 16) => Some(DType::BF16),
            (DLPACK_BOOL, 8) => Some(DType::Bool),
            _ => None,
        }
    }

    /// Parse from a user-facing name ("float32", "f32", "uint8", "long", ...)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "int8" | "i8" => Some(DType::I8),
            "int16" | "i16" | "short" => Some(DType::I16),
            "int32" | "i32" | "int" => Some(DType::I32),
            "int64" | "i64" | "long" => Some(DType::I64),
            "uint8" | "u8" | "byte" => Some(DType::U8),
            "uint16" | "u16" => Some(DType::U16),
            "uint32" | "u32" => Some(DType::U32),
            "uint64" | "u64" => Some(DType::U64),
            "float16" | "f16" | "half" => Some(DType::F16),
            "bfloat16" | "bf16" => Some(DType::BF16),
            "float32" | "f32" | "float" => Some(DType::F32),
            "float64" | "f64" | "double" => Some(DType::F64),
            "bool" | "boolean" => Some(DType::Bool),
            _ => None,
        }
    }

    /// Canonical name, as printed by numpy and torch
    pub const fn name(&self) -> &'static str {
        match self {
            DType::I8 => "int8",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::U8 => "uint8",
            DType::U16 => "uint16",
            DType::U32 => "uint32",
            DType::U64 => "uint64",
            DType::F16 => "float16",
            DType::BF16 => "bfloat16",
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::Bool => "bool",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
