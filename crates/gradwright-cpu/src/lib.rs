//! # gradwright-cpu
//!
//! CPU backend for gradwright. Storage is a plain `Vec` per dtype; the
//! element-wise kernels run on rayon's thread pool.

use gradwright_core::backend::{Backend, BackendDevice, BackendStorage, BinaryOp};
use gradwright_core::dtype::{DType, WithDType};
use gradwright_core::error::{Error, Result};
use gradwright_core::shape::Shape;
use gradwright_core::tensor::Tensor;
use half::{bf16, f16};
use rayon::prelude::*;

/// The (only) CPU device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuDevice;

impl BackendDevice for CpuDevice {
    fn name(&self) -> String {
        "cpu".to_string()
    }
}

/// Host memory, one variant per dtype.
#[derive(Debug, Clone)]
pub enum CpuStorage {
    F16(Vec<f16>),
    BF16(Vec<bf16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
    U8(Vec<u8>),
    U32(Vec<u32>),
    I64(Vec<i64>),
}

// Run `$body` with `$v` bound to the inner Vec, whatever the dtype.
macro_rules! with_vec {
    ($storage:expr, $v:ident => $body:expr) => {
        match $storage {
            CpuStorage::F16($v) => $body,
            CpuStorage::BF16($v) => $body,
            CpuStorage::F32($v) => $body,
            CpuStorage::F64($v) => $body,
            CpuStorage::U8($v) => $body,
            CpuStorage::U32($v) => $body,
            CpuStorage::I64($v) => $body,
        }
    };
}

impl BackendStorage for CpuStorage {
    fn dtype(&self) -> DType {
        match self {
            CpuStorage::F16(_) => DType::F16,
            CpuStorage::BF16(_) => DType::BF16,
            CpuStorage::F32(_) => DType::F32,
            CpuStorage::F64(_) => DType::F64,
            CpuStorage::U8(_) => DType::U8,
            CpuStorage::U32(_) => DType::U32,
            CpuStorage::I64(_) => DType::I64,
        }
    }

    fn len(&self) -> usize {
        with_vec!(self, v => v.len())
    }
}

fn convert<T: WithDType>(data: &[f64]) -> Vec<T> {
    data.par_iter().map(|&x| T::from_f64(x)).collect()
}

impl CpuStorage {
    fn from_f64_vec(data: &[f64], dtype: DType) -> Self {
        match dtype {
            DType::F16 => CpuStorage::F16(convert(data)),
            DType::BF16 => CpuStorage::BF16(convert(data)),
            DType::F32 => CpuStorage::F32(convert(data)),
            DType::F64 => CpuStorage::F64(data.to_vec()),
            DType::U8 => CpuStorage::U8(convert(data)),
            DType::U32 => CpuStorage::U32(convert(data)),
            DType::I64 => CpuStorage::I64(convert(data)),
        }
    }

    fn to_f64_vec(&self) -> Vec<f64> {
        with_vec!(self, v => v.par_iter().map(|&x| WithDType::to_f64(x)).collect())
    }
}

/// Marker type for the CPU backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

impl Backend for CpuBackend {
    const NAME: &'static str = "cpu";

    type Device = CpuDevice;
    type Storage = CpuStorage;

    fn full(shape: &Shape, val: f64, dtype: DType, _device: &CpuDevice) -> Result<CpuStorage> {
        Ok(CpuStorage::from_f64_vec(
            &vec![val; shape.elem_count()],
            dtype,
        ))
    }

    fn from_f64_slice(data: &[f64], dtype: DType, _device: &CpuDevice) -> Result<CpuStorage> {
        Ok(CpuStorage::from_f64_vec(data, dtype))
    }

    fn to_f64_vec(storage: &CpuStorage) -> Result<Vec<f64>> {
        Ok(storage.to_f64_vec())
    }

    // Kernels compute in f64 and convert back; good enough for a reference
    // backend.
    fn binary_op(op: BinaryOp, lhs: &CpuStorage, rhs: &CpuStorage) -> Result<CpuStorage> {
        if lhs.dtype() != rhs.dtype() {
            return Err(Error::DTypeMismatch {
                expected: lhs.dtype(),
                got: rhs.dtype(),
            });
        }
        if lhs.len() != rhs.len() {
            return Err(Error::msg(format!(
                "binary_op: storage lengths differ ({} vs {})",
                lhs.len(),
                rhs.len()
            )));
        }
        let l = lhs.to_f64_vec();
        let r = rhs.to_f64_vec();
        let f: fn(f64, f64) -> f64 = match op {
            BinaryOp::Add => |a: f64, b: f64| a + b,
            BinaryOp::Sub => |a: f64, b: f64| a - b,
            BinaryOp::Mul => |a: f64, b: f64| a * b,
            BinaryOp::Div => |a: f64, b: f64| a / b,
        };
        let out: Vec<f64> = l.par_iter().zip(r.par_iter()).map(|(&a, &b)| f(a, b)).collect();
        Ok(CpuStorage::from_f64_vec(&out, lhs.dtype()))
    }

    fn affine(input: &CpuStorage, mul: f64, add: f64) -> Result<CpuStorage> {
        let out: Vec<f64> = input
            .to_f64_vec()
            .into_par_iter()
            .map(|x| x * mul + add)
            .collect();
        Ok(CpuStorage::from_f64_vec(&out, input.dtype()))
    }
}

/// Convenience alias.
pub type CpuTensor = Tensor<CpuBackend>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros_keep_dtype() {
        let s = CpuBackend::zeros(&Shape::from((2, 3)), DType::BF16, &CpuDevice).unwrap();
        assert_eq!(s.dtype(), DType::BF16);
        assert_eq!(s.len(), 6);
        assert!(s.to_f64_vec().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_binary_ops() {
        let a = CpuBackend::from_f64_slice(&[1.0, 2.0, 3.0], DType::F64, &CpuDevice).unwrap();
        let b = CpuBackend::from_f64_slice(&[4.0, 5.0, 6.0], DType::F64, &CpuDevice).unwrap();
        let c = CpuBackend::binary_op(BinaryOp::Mul, &a, &b).unwrap();
        assert_eq!(c.to_f64_vec(), vec![4.0, 10.0, 18.0]);
        let d = CpuBackend::binary_op(BinaryOp::Sub, &a, &b).unwrap();
        assert_eq!(d.to_f64_vec(), vec![-3.0, -3.0, -3.0]);
    }

    #[test]
    fn test_binary_dtype_mismatch() {
        let a = CpuBackend::from_f64_slice(&[1.0], DType::F32, &CpuDevice).unwrap();
        let b = CpuBackend::from_f64_slice(&[1.0], DType::F64, &CpuDevice).unwrap();
        assert!(CpuBackend::binary_op(BinaryOp::Add, &a, &b).is_err());
    }

    #[test]
    fn test_affine_on_ints_truncates() {
        let a = CpuBackend::from_f64_slice(&[1.0, 2.0], DType::I64, &CpuDevice).unwrap();
        let b = CpuBackend::affine(&a, 1.5, 0.0).unwrap();
        assert_eq!(b.dtype(), DType::I64);
        assert_eq!(b.to_f64_vec(), vec![1.0, 3.0]);
    }
}
