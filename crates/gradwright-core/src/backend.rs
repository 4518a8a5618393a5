use crate::dtype::DType;
use crate::error::Result;
use crate::shape::Shape;
use std::fmt;

// Backend — The tensor library seen from the autograd core
//
// The custom-function machinery never looks inside tensor data. It only
// needs to (1) allocate zeros with a given shape/dtype/device when a
// gradient is missing, and (2) let user forward/backward bodies do some
// arithmetic. Everything else about storage belongs to the backend crate.
//
// A backend is a zero-sized marker type with associated Device and Storage
// types; Tensor<B> is generic over it.

/// Identifies a compute device (e.g., "cpu", "cuda:0").
pub trait BackendDevice: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// A human-readable name for this device.
    fn name(&self) -> String;
}

/// A storage buffer that holds tensor data on a specific device.
pub trait BackendStorage: Clone + Send + Sync + 'static {
    /// The data type of the elements in this storage.
    fn dtype(&self) -> DType;

    /// Total number of elements in this storage.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Element-wise binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// The interface every backend implements.
///
/// Binary kernels operate on two storages of identical length; shape
/// checking happens in `Tensor` before dispatch.
pub trait Backend: Clone + Send + Sync + fmt::Debug + 'static {
    /// Placement kind recorded in variable descriptors (e.g. "cpu").
    const NAME: &'static str;

    /// The device type for this backend.
    type Device: BackendDevice;
    /// The storage type for this backend.
    type Storage: BackendStorage;

    /// Allocate storage filled with a constant value.
    fn full(shape: &Shape, val: f64, dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    /// Allocate storage filled with zeros.
    fn zeros(shape: &Shape, dtype: DType, device: &Self::Device) -> Result<Self::Storage> {
        Self::full(shape, 0.0, dtype, device)
    }

    /// Create storage from a flat f64 slice, converting to the target dtype.
    fn from_f64_slice(data: &[f64], dtype: DType, device: &Self::Device) -> Result<Self::Storage>;

    /// Copy storage out as f64 values.
    fn to_f64_vec(storage: &Self::Storage) -> Result<Vec<f64>>;

    /// result[i] = op(lhs[i], rhs[i])
    fn binary_op(op: BinaryOp, lhs: &Self::Storage, rhs: &Self::Storage) -> Result<Self::Storage>;

    /// result[i] = input[i] * mul + add
    fn affine(input: &Self::Storage, mul: f64, add: f64) -> Result<Self::Storage>;
}
