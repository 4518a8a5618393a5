use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::graph::{Edge, Node, NodeId};
use crate::tensor::Tensor;
use crate::variable_info::VariableInfo;

use super::context::FunctionCtx;
use super::Function;

/// The graph node recorded for one call of a custom [`Function`].
///
/// It owns the call's [`FunctionCtx`], remembers which forward arguments
/// were tensors, and keeps descriptors of the differentiable inputs and of
/// the outputs so backward can fill in missing gradients with zeros of the
/// right shape, dtype and device.
pub struct FunctionNode<F, B: Backend> {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) ctx: Mutex<FunctionCtx<B>>,
    /// One flag per raw forward argument.
    pub(crate) is_differentiable_input: Vec<bool>,
    /// One descriptor per differentiable argument.
    pub(crate) input_info: Vec<VariableInfo<B>>,
    /// One descriptor per output; only set when the call was recorded for
    /// differentiation.
    pub(crate) output_info: OnceLock<Vec<VariableInfo<B>>>,
    pub(crate) num_outputs: OnceLock<usize>,
    pub(crate) next_edges: Vec<Edge<B>>,
    pub(crate) _function: PhantomData<fn() -> F>,
}

impl<F: Function<B>, B: Backend> FunctionNode<F, B> {
    pub(crate) fn lock_ctx(&self) -> MutexGuard<'_, FunctionCtx<B>> {
        self.ctx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Match the gradients returned by the user's backward against the
    /// forward argument list: drop trailing undefined extras, reject counts
    /// that do not line up, reject gradients for non-tensor arguments, and
    /// keep one entry per differentiable input.
    fn reconcile(&self, mut outputs: Vec<Option<Tensor<B>>>) -> Result<Vec<Option<Tensor<B>>>> {
        let num_forward_inputs = self.is_differentiable_input.len();

        // Extra results are fine as long as they are all undefined.
        if outputs.len() > num_forward_inputs
            && outputs[num_forward_inputs..].iter().all(Option::is_none)
        {
            outputs.truncate(num_forward_inputs);
        }

        if outputs.len() != num_forward_inputs {
            return Err(Error::GradientCountMismatch {
                op: self.name.clone(),
                expected: num_forward_inputs,
                got: outputs.len(),
            });
        }

        let mut results = Vec::with_capacity(self.input_info.len());
        for (i, (grad, &is_differentiable)) in outputs
            .into_iter()
            .zip(&self.is_differentiable_input)
            .enumerate()
        {
            if !is_differentiable {
                if grad.is_some() {
                    return Err(Error::GradientForNonDifferentiable {
                        op: self.name.clone(),
                        position: i + 1,
                    });
                }
                continue;
            }
            let grad = match grad {
                Some(grad) => Some(grad),
                None => {
                    let info = &self.input_info[results.len()];
                    if info.requires_grad {
                        Some(info.zeros()?)
                    } else {
                        None
                    }
                }
            };
            results.push(grad);
        }
        Ok(results)
    }
}

impl<F: Function<B>, B: Backend> Node<B> for FunctionNode<F, B> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn num_outputs(&self) -> usize {
        self.num_outputs.get().copied().unwrap_or(0)
    }

    fn next_edges(&self) -> &[Edge<B>] {
        &self.next_edges
    }

    fn is_differentiable_input(&self) -> &[bool] {
        &self.is_differentiable_input
    }

    fn input_info(&self) -> &[VariableInfo<B>] {
        &self.input_info
    }

    fn output_info(&self) -> &[VariableInfo<B>] {
        self.output_info.get().map(Vec::as_slice).unwrap_or(&[])
    }

    fn apply(&self, grad_outputs: Vec<Option<Tensor<B>>>) -> Result<Vec<Option<Tensor<B>>>> {
        let output_info = self.output_info.get().ok_or_else(|| {
            Error::protocol(
                &self.name,
                "backward called on a node that was not recorded for differentiation",
            )
        })?;
        if grad_outputs.len() != output_info.len() {
            return Err(Error::protocol(
                &self.name,
                format!(
                    "expected {} output gradients, got {}",
                    output_info.len(),
                    grad_outputs.len()
                ),
            ));
        }

        let backward_inputs = grad_outputs
            .into_iter()
            .zip(output_info)
            .map(|(grad, info)| match grad {
                Some(grad) => Ok(grad),
                None => info.zeros(),
            })
            .collect::<Result<Vec<_>>>()?;

        log::trace!("Backwarding {} ({:?})", self.name, self.id);
        let outputs = {
            let mut ctx = self.lock_ctx();
            F::backward(&mut ctx, backward_inputs)?
        };
        self.reconcile(outputs)
    }

    fn release_variables(&self) {
        self.lock_ctx().release_variables();
    }
}
