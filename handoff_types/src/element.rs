//! Rust scalar types that can back a buffer

use crate::dtype::DType;
use bytemuck::Pod;

/// A plain-old-data scalar with a fixed [`DType`]
///
/// `Pod` guarantees any byte pattern is a valid value, which is what makes
/// typed views over foreign memory sound.
pub trait Element: Pod + Send + Sync + 'static {
    const DTYPE: DType;
}

macro_rules! impl_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const DTYPE: DType = DType::$dtype;
            }
        )*
    };
}

impl_element! {
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    half::f16 => F16,
    half::bf16 => BF16,
    f32 => F32,
    f64 => F64,
}
