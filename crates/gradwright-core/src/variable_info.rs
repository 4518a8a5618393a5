use crate::backend::Backend;
use crate::dtype::DType;
use crate::error::Result;
use crate::shape::Shape;
use crate::tensor::Tensor;

/// Static snapshot of a tensor's metadata, taken when a function node sees
/// it as an input or output.
///
/// Backward uses it to stand in for missing gradients: `zeros()` yields a
/// tensor indistinguishable in shape, dtype and placement from the one the
/// descriptor was built from.
#[derive(Debug, Clone)]
pub struct VariableInfo<B: Backend> {
    pub backend: &'static str,
    pub device: B::Device,
    pub dtype: DType,
    pub shape: Shape,
    pub requires_grad: bool,
}

impl<B: Backend> VariableInfo<B> {
    pub fn new(var: &Tensor<B>) -> Self {
        VariableInfo {
            backend: B::NAME,
            device: var.device().clone(),
            dtype: var.dtype(),
            shape: var.shape().clone(),
            requires_grad: var.requires_grad(),
        }
    }

    /// A zero-filled tensor matching this descriptor.
    pub fn zeros(&self) -> Result<Tensor<B>> {
        Tensor::zeros(self.shape.clone(), self.dtype, &self.device)
    }
}
