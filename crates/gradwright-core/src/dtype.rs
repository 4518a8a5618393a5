use std::fmt;

// DType — Element types a tensor can hold
//
// Only floating-point dtypes are differentiable. An integer or byte tensor
// can still flow through a custom function (as an index output, a mask, ...)
// but it never receives a creator edge and never gets a gradient.

/// Enum of all supported element data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F16,
    BF16,
    F32,
    F64,
    U8,
    U32,
    I64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::U8 => 1,
            DType::F16 | DType::BF16 => 2,
            DType::F32 | DType::U32 => 4,
            DType::F64 | DType::I64 => 8,
        }
    }

    /// Whether this dtype is a floating-point type.
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16 | DType::F32 | DType::F64)
    }

    /// Whether tensors of this dtype can carry gradients.
    pub fn is_differentiable(&self) -> bool {
        self.is_float()
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::U8 => "u8",
            DType::U32 => "u32",
            DType::I64 => "i64",
        };
        write!(f, "{}", s)
    }
}

/// Trait implemented by Rust types that can be stored in a tensor.
///
/// Maps the concrete Rust type to its [`DType`] and converts through f64,
/// which is the interchange format between backends and user code.
pub trait WithDType: Copy + Send + Sync + 'static + num_traits::NumCast + fmt::Debug {
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    /// Convert this value to f64.
    fn to_f64(self) -> f64;

    /// Create a value of this type from f64.
    fn from_f64(v: f64) -> Self;
}

macro_rules! with_dtype_cast {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl WithDType for $ty {
                const DTYPE: DType = DType::$dtype;
                fn to_f64(self) -> f64 {
                    self as f64
                }
                fn from_f64(v: f64) -> Self {
                    v as $ty
                }
            }
        )*
    };
}

with_dtype_cast!(f32 => F32, f64 => F64, u8 => U8, u32 => U32, i64 => I64);

impl WithDType for half::f16 {
    const DTYPE: DType = DType::F16;
    fn to_f64(self) -> f64 {
        self.to_f64()
    }
    fn from_f64(v: f64) -> Self {
        half::f16::from_f64(v)
    }
}

impl WithDType for half::bf16 {
    const DTYPE: DType = DType::BF16;
    fn to_f64(self) -> f64 {
        self.to_f64()
    }
    fn from_f64(v: f64) -> Self {
        half::bf16::from_f64(v)
    }
}
