use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::backend::{Backend, BinaryOp};
use crate::dtype::{DType, WithDType};
use crate::error::{Error, Result};
use crate::graph::{Edge, Node, TensorId};
use crate::shape::Shape;

// Tensor — Handle to a value the differentiation system tracks
//
// MEMORY MODEL:
//
//   A Tensor is an Arc around TensorInner, so cloning is a refcount bump and
//   clones share the same identity (TensorId). Aliases made by `detach()`
//   get a fresh identity but share storage AND the version counter, so an
//   in-place write through any alias is visible to every saved snapshot.
//
// AUTOGRAD METADATA:
//
//   requires_grad   leaf flag set by the user
//   history         creator node + output index, attached by custom
//                   functions when their outputs are wrapped
//   version         bumped on every in-place write
//
// Arithmetic on tensors does NOT record history; only custom functions
// attach creators.

/// The creator of a non-leaf tensor.
struct History<B: Backend> {
    grad_fn: Arc<dyn Node<B>>,
    output_nr: usize,
}

impl<B: Backend> Clone for History<B> {
    fn clone(&self) -> Self {
        History {
            grad_fn: Arc::clone(&self.grad_fn),
            output_nr: self.output_nr,
        }
    }
}

struct TensorInner<B: Backend> {
    id: TensorId,
    storage: Arc<RwLock<B::Storage>>,
    version: Arc<AtomicU64>,
    shape: Shape,
    dtype: DType,
    device: B::Device,
    requires_grad: bool,
    history: RwLock<Option<History<B>>>,
}

/// An n-dimensional array on backend `B`.
///
/// # Example
/// ```ignore
/// use gradwright_core::{DType, Tensor};
/// use gradwright_cpu::{CpuBackend, CpuDevice};
///
/// let x = Tensor::<CpuBackend>::from_f64_slice(&[1.0, 2.0], 2, DType::F32, &CpuDevice)?
///     .requires_grad_(true)?;
/// ```
pub struct Tensor<B: Backend> {
    inner: Arc<TensorInner<B>>,
}

impl<B: Backend> Clone for Tensor<B> {
    fn clone(&self) -> Self {
        Tensor {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> std::fmt::Debug for Tensor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tensor(id={:?}, shape={}, dtype={}, device={:?}, requires_grad={})",
            self.inner.id,
            self.inner.shape,
            self.inner.dtype,
            self.inner.device,
            self.requires_grad(),
        )
    }
}

impl<B: Backend> Tensor<B> {
    // Internal constructors

    pub(crate) fn from_storage(
        storage: B::Storage,
        shape: Shape,
        dtype: DType,
        device: B::Device,
    ) -> Self {
        Tensor {
            inner: Arc::new(TensorInner {
                id: TensorId::new(),
                storage: Arc::new(RwLock::new(storage)),
                version: Arc::new(AtomicU64::new(0)),
                shape,
                dtype,
                device,
                requires_grad: false,
                history: RwLock::new(None),
            }),
        }
    }

    /// A handle sharing storage and version counter, with the given identity
    /// and autograd metadata.
    fn share(&self, id: TensorId, requires_grad: bool, history: Option<History<B>>) -> Self {
        Tensor {
            inner: Arc::new(TensorInner {
                id,
                storage: Arc::clone(&self.inner.storage),
                version: Arc::clone(&self.inner.version),
                shape: self.inner.shape.clone(),
                dtype: self.inner.dtype,
                device: self.inner.device.clone(),
                requires_grad,
                history: RwLock::new(history),
            }),
        }
    }

    // Creation methods

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: impl Into<Shape>, dtype: DType, device: &B::Device) -> Result<Self> {
        let shape = shape.into();
        let storage = B::zeros(&shape, dtype, device)?;
        Ok(Self::from_storage(storage, shape, dtype, device.clone()))
    }

    /// Create a tensor filled with ones.
    pub fn ones(shape: impl Into<Shape>, dtype: DType, device: &B::Device) -> Result<Self> {
        Self::full(shape, 1.0, dtype, device)
    }

    /// Create a tensor filled with a constant value.
    pub fn full(
        shape: impl Into<Shape>,
        val: f64,
        dtype: DType,
        device: &B::Device,
    ) -> Result<Self> {
        let shape = shape.into();
        let storage = B::full(&shape, val, dtype, device)?;
        Ok(Self::from_storage(storage, shape, dtype, device.clone()))
    }

    /// Create a tensor from a flat slice of f64 values converted to `dtype`.
    pub fn from_f64_slice(
        data: &[f64],
        shape: impl Into<Shape>,
        dtype: DType,
        device: &B::Device,
    ) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                shape: shape.clone(),
                expected: shape.elem_count(),
                got: data.len(),
            });
        }
        let storage = B::from_f64_slice(data, dtype, device)?;
        Ok(Self::from_storage(storage, shape, dtype, device.clone()))
    }

    /// Create a tensor from typed data; the dtype follows `T`.
    pub fn from_slice<T: WithDType>(
        data: &[T],
        shape: impl Into<Shape>,
        device: &B::Device,
    ) -> Result<Self> {
        let data: Vec<f64> = data.iter().map(|&v| WithDType::to_f64(v)).collect();
        Self::from_f64_slice(&data, shape, T::DTYPE, device)
    }

    // Accessors

    /// Unique tensor ID.
    pub fn id(&self) -> TensorId {
        self.inner.id
    }

    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.inner.shape.dims()
    }

    pub fn elem_count(&self) -> usize {
        self.inner.shape.elem_count()
    }

    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    pub fn device(&self) -> &B::Device {
        &self.inner.device
    }

    /// Number of in-place writes made to this tensor's storage so far.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Relaxed)
    }

    /// Whether gradients flow to or through this tensor: either a leaf the
    /// user marked, or the output of a function node.
    pub fn requires_grad(&self) -> bool {
        self.inner.requires_grad || self.grad_fn().is_some()
    }

    /// A leaf has no creator node.
    pub fn is_leaf(&self) -> bool {
        self.grad_fn().is_none()
    }

    /// The node that produced this tensor, if any.
    pub fn grad_fn(&self) -> Option<Arc<dyn Node<B>>> {
        self.read_history()
            .as_ref()
            .map(|h| Arc::clone(&h.grad_fn))
    }

    /// Which output of `grad_fn()` this tensor is (0 for leaves).
    pub fn output_nr(&self) -> usize {
        self.read_history().as_ref().map_or(0, |h| h.output_nr)
    }

    /// The edge a consumer of this tensor should attach to.
    pub fn gradient_edge(&self) -> Edge<B> {
        match self.read_history().as_ref() {
            Some(h) => Edge::Function {
                node: Arc::clone(&h.grad_fn),
                input_nr: h.output_nr,
            },
            None if self.inner.requires_grad => Edge::Leaf(self.id()),
            None => Edge::Detached,
        }
    }

    fn read_history(&self) -> std::sync::RwLockReadGuard<'_, Option<History<B>>> {
        self.inner
            .history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn read_storage(&self) -> Result<std::sync::RwLockReadGuard<'_, B::Storage>> {
        self.inner
            .storage
            .read()
            .map_err(|_| Error::msg("storage lock poisoned"))
    }

    fn write_storage(&self) -> Result<std::sync::RwLockWriteGuard<'_, B::Storage>> {
        self.inner
            .storage
            .write()
            .map_err(|_| Error::msg("storage lock poisoned"))
    }

    // Autograd metadata

    /// Mark (or unmark) this leaf as requiring gradients. Keeps the same id.
    pub fn requires_grad_(self, requires_grad: bool) -> Result<Self> {
        if requires_grad && !self.dtype().is_differentiable() {
            return Err(Error::msg(format!(
                "only tensors of floating point dtype can require gradients, got {}",
                self.dtype()
            )));
        }
        if !self.is_leaf() {
            return Err(Error::msg(
                "requires_grad can only be changed on leaf tensors; use detach() first",
            ));
        }
        Ok(self.share(self.id(), requires_grad, None))
    }

    /// A new leaf alias of this tensor's data: fresh id, no creator, does not
    /// require grad. Shares storage and version counter.
    pub fn detach(&self) -> Self {
        self.share(TensorId::new(), false, None)
    }

    /// An alias (fresh id, shared data) whose creator is `grad_fn`.
    pub(crate) fn with_history(&self, grad_fn: Arc<dyn Node<B>>, output_nr: usize) -> Self {
        self.share(
            TensorId::new(),
            false,
            Some(History {
                grad_fn,
                output_nr,
            }),
        )
    }

    /// Attach `grad_fn` as the creator of this tensor.
    pub(crate) fn set_history(&self, grad_fn: Arc<dyn Node<B>>, output_nr: usize) {
        let mut history = self
            .inner
            .history
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *history = Some(History { grad_fn, output_nr });
    }

    /// Record an in-place write.
    pub(crate) fn bump_version(&self) {
        self.inner.version.fetch_add(1, Ordering::Relaxed);
    }

    // Data access

    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        let storage = self.read_storage()?;
        B::to_f64_vec(&storage)
    }

    /// Extract a scalar value (tensor must have exactly 1 element).
    pub fn to_scalar_f64(&self) -> Result<f64> {
        if self.elem_count() != 1 {
            return Err(Error::NotAScalar {
                shape: self.shape().clone(),
            });
        }
        Ok(self.to_f64_vec()?[0])
    }

    // Element-wise arithmetic (not recorded in the graph)

    fn binary_op(&self, rhs: &Self, op: BinaryOp) -> Result<Self> {
        if self.dtype() != rhs.dtype() {
            return Err(Error::DTypeMismatch {
                expected: self.dtype(),
                got: rhs.dtype(),
            });
        }
        if self.shape() != rhs.shape() {
            return Err(Error::ShapeMismatch {
                expected: self.shape().clone(),
                got: rhs.shape().clone(),
            });
        }
        let result = {
            let lhs = self.read_storage()?;
            let rhs = rhs.read_storage()?;
            B::binary_op(op, &lhs, &rhs)?
        };
        Ok(Self::from_storage(
            result,
            self.shape().clone(),
            self.dtype(),
            self.device().clone(),
        ))
    }

    pub fn add(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, BinaryOp::Add)
    }

    pub fn sub(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, BinaryOp::Sub)
    }

    pub fn mul(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, BinaryOp::Mul)
    }

    pub fn div(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, BinaryOp::Div)
    }

    /// result = self * mul + add
    pub fn affine(&self, mul: f64, add: f64) -> Result<Self> {
        let result = {
            let storage = self.read_storage()?;
            B::affine(&storage, mul, add)?
        };
        Ok(Self::from_storage(
            result,
            self.shape().clone(),
            self.dtype(),
            self.device().clone(),
        ))
    }

    pub fn neg(&self) -> Result<Self> {
        self.affine(-1.0, 0.0)
    }

    // In-place mutation

    /// self = self * mul + add, written into the shared storage.
    pub fn affine_(&self, mul: f64, add: f64) -> Result<()> {
        let mut guard = self.write_storage()?;
        let updated = B::affine(&guard, mul, add)?;
        *guard = updated;
        self.bump_version();
        Ok(())
    }

    /// Overwrite the shared storage with `new_data` (same element count).
    pub fn update_data_inplace(&self, new_data: &[f64]) -> Result<()> {
        let expected = self.elem_count();
        if new_data.len() != expected {
            return Err(Error::ElementCountMismatch {
                shape: self.shape().clone(),
                expected,
                got: new_data.len(),
            });
        }
        let new_storage = B::from_f64_slice(new_data, self.dtype(), self.device())?;
        let mut guard = self.write_storage()?;
        *guard = new_storage;
        self.bump_version();
        Ok(())
    }
}
