//! # Gradwright
//!
//! User-defined differentiable operations for a reverse-mode autograd graph,
//! plus the registry of distributed autograd contexts shared by cooperating
//! workers.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust
//! use gradwright::prelude::*;
//!
//! struct MulConstant;
//!
//! impl<B: Backend> Function<B> for MulConstant {
//!     fn forward(ctx: &mut FunctionCtx<B>, args: &[Value<B>]) -> Result<Vec<Tensor<B>>> {
//!         let n = arg_float(args, 1)?;
//!         ctx.saved_data.insert("n".into(), n.into());
//!         Ok(vec![arg_tensor(args, 0)?.affine(n, 0.0)?])
//!     }
//!
//!     fn backward(
//!         ctx: &mut FunctionCtx<B>,
//!         grads: Vec<Tensor<B>>,
//!     ) -> Result<Vec<Option<Tensor<B>>>> {
//!         let n = ctx.saved_data["n"].as_float().unwrap_or(1.0);
//!         Ok(vec![Some(grads[0].affine(n, 0.0)?), None])
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! let x = CpuTensor::from_f64_slice(&[1.0, 2.0], 2, DType::F32, &CpuDevice)?
//!     .requires_grad_(true)?;
//! let y = MulConstant::apply(values![&x, 3.0])?;
//! assert_eq!(y[0].to_f64_vec()?, vec![3.0, 6.0]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `gradwright-core` | Function trait, execution context, graph node, Tensor, Backend trait |
//! | `gradwright-cpu` | CPU backend with rayon parallelism |
//!
//! ## Modules
//!
//! - [`distributed`] — context registry, context ids, worker configuration

/// Re-export core types.
pub use gradwright_core::{
    apply, arg_float, arg_int, arg_tensor, bail, is_grad_enabled, no_grad, set_grad_enabled,
    values, Backend, BackendDevice, BackendStorage, BinaryOp, DType, Edge, Error, Function,
    FunctionCtx, FunctionNode, GradModeGuard, Node, NodeId, Result, Shape, Tensor, TensorId,
    Value, VariableInfo, WithDType,
};

/// Re-export CPU backend.
pub use gradwright_cpu::{CpuBackend, CpuDevice, CpuStorage, CpuTensor};

/// Distributed autograd — context registry and id encoding.
pub mod distributed;

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::distributed::{DistAutogradConfig, DistAutogradContainer, DistAutogradContext};
    pub use crate::{
        arg_float, arg_int, arg_tensor, no_grad, values, Backend, CpuBackend, CpuDevice,
        CpuTensor, DType, Error, Function, FunctionCtx, GradModeGuard, Node, Result, Shape,
        Tensor, Value,
    };
}
