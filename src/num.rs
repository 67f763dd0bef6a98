use bytemuck::{Pod, Zeroable};
use derive_more::Display;
use half::f16;

/// Element types a [`Buffer`](crate::buffer::Buffer) can be zero-filled with and viewed as bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataType {
    F32,
    F64,
    F16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

impl DataType {
    /// Size of one element in bytes.
    pub const fn size(self) -> usize {
        match self {
            DataType::F32 => 4,
            DataType::F64 => 8,
            DataType::F16 => 2,
            DataType::I32 => 4,
            DataType::I64 => 8,
            DataType::U8 => 1,
            DataType::U16 => 2,
            DataType::U32 => 4,
            DataType::U64 => 8,
        }
    }
}

pub trait Zero {
    fn zero() -> Self;
}

pub trait One {
    fn one() -> Self;
}

macro_rules! impl_zero_one {
    ($ty:ty, $zero:expr, $one:expr) => {
        impl Zero for $ty {
            #[inline]
            fn zero() -> Self {
                $zero
            }
        }

        impl One for $ty {
            #[inline]
            fn one() -> Self {
                $one
            }
        }
    };
}

impl_zero_one!(f32, 0.0, 1.0);
impl_zero_one!(f64, 0.0, 1.0);
impl_zero_one!(f16, f16::ZERO, f16::ONE);
impl_zero_one!(i32, 0, 1);
impl_zero_one!(i64, 0, 1);
impl_zero_one!(u8, 0, 1);
impl_zero_one!(u16, 0, 1);
impl_zero_one!(u32, 0, 1);
impl_zero_one!(u64, 0, 1);

pub trait Scalar: Sized + Zeroable + Pod + Zero + One + Send + Sync {
    const DATA_TYPE: DataType;
}

macro_rules! impl_scalar {
    ($ty:ty, $data_type:ident) => {
        impl Scalar for $ty {
            const DATA_TYPE: DataType = DataType::$data_type;
        }
    };
}

impl_scalar!(f32, F32);
impl_scalar!(f64, F64);
impl_scalar!(f16, F16);
impl_scalar!(i32, I32);
impl_scalar!(i64, I64);
impl_scalar!(u8, U8);
impl_scalar!(u16, U16);
impl_scalar!(u32, U32);
impl_scalar!(u64, U64);
