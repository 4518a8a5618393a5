// Function — User-defined differentiable operations
//
// A custom operation is a type implementing `Function<B>` with two
// associated procedures:
//
//   forward(ctx, args)          args: the raw call arguments, tensors and
//                               plain values mixed, in call order
//   backward(ctx, grad_outputs) one gradient per forward output in, one
//                               gradient (or None) per forward ARGUMENT out
//
// `F::apply(args)` runs forward and links the outputs into the graph:
//
//   1. classify args: every Value::Tensor is a differentiable input
//   2. executable = grad mode on && some input requires grad
//   3. one edge per differentiable input (its creator, a leaf, or detached)
//   4. build the FunctionNode, snapshot input descriptors
//   5. run forward with grad mode off
//   6. wrap outputs (attach creator / keep dirty inputs / detach the
//      non-differentiable ones)
//   7. if executable, snapshot output descriptors; snapshot saved tensors
//
// EXAMPLE:
//
//   struct MulConstant;
//
//   impl<B: Backend> Function<B> for MulConstant {
//       fn forward(ctx: &mut FunctionCtx<B>, args: &[Value<B>]) -> Result<Vec<Tensor<B>>> {
//           let x = arg_tensor(args, 0)?;
//           let n = arg_float(args, 1)?;
//           ctx.saved_data.insert("n".into(), n.into());
//           Ok(vec![x.affine(n, 0.0)?])
//       }
//       fn backward(ctx: &mut FunctionCtx<B>, grads: Vec<Tensor<B>>)
//           -> Result<Vec<Option<Tensor<B>>>> {
//           let n = ctx.saved_data["n"].as_float().unwrap_or(1.0);
//           Ok(vec![Some(grads[0].affine(n, 0.0)?), None])
//       }
//   }
//
//   let y = MulConstant::apply(values![&x, 6.0])?;

mod context;
mod node;

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::grad_mode::{is_grad_enabled, GradModeGuard};
use crate::graph::{collect_next_edges, Node, NodeId, TensorId};
use crate::tensor::Tensor;
use crate::value::Value;
use crate::variable_info::VariableInfo;

pub use context::FunctionCtx;
pub use node::FunctionNode;

/// A custom differentiable operation.
pub trait Function<B: Backend>: 'static {
    /// Compute the outputs. Runs with grad mode disabled.
    fn forward(ctx: &mut FunctionCtx<B>, args: &[Value<B>]) -> Result<Vec<Tensor<B>>>;

    /// Compute one gradient per forward argument from one gradient per
    /// forward output. Non-tensor arguments must get `None`.
    fn backward(
        ctx: &mut FunctionCtx<B>,
        grad_outputs: Vec<Tensor<B>>,
    ) -> Result<Vec<Option<Tensor<B>>>>;

    /// Name used in error messages. Defaults to the type name.
    fn name() -> String {
        let full = std::any::type_name::<Self>();
        let base = full.split('<').next().unwrap_or(full);
        base.rsplit("::").next().unwrap_or(base).to_string()
    }

    /// Run forward and record the call in the graph.
    fn apply(args: Vec<Value<B>>) -> Result<Vec<Tensor<B>>>
    where
        Self: Sized,
    {
        apply::<Self, B>(args)
    }
}

/// Run `F::forward` on `args` and link the outputs into the graph.
pub fn apply<F: Function<B>, B: Backend>(args: Vec<Value<B>>) -> Result<Vec<Tensor<B>>> {
    let mut is_differentiable_input = Vec::with_capacity(args.len());
    let mut input_vars = Vec::new();
    for arg in &args {
        match arg {
            Value::Tensor(t) => {
                is_differentiable_input.push(true);
                input_vars.push(t.clone());
            }
            _ => is_differentiable_input.push(false),
        }
    }

    let is_executable = is_grad_enabled() && input_vars.iter().any(Tensor::requires_grad);
    let next_edges = collect_next_edges(&input_vars);
    let input_info: Vec<VariableInfo<B>> = input_vars.iter().map(VariableInfo::new).collect();
    let needs_input_grad: Vec<bool> = args
        .iter()
        .map(|arg| arg.as_tensor().is_some_and(Tensor::requires_grad))
        .collect();

    let name = F::name();
    let id = NodeId::new();
    let node: Arc<FunctionNode<F, B>> = Arc::new_cyclic(|weak: &Weak<FunctionNode<F, B>>| {
        let grad_fn: Weak<dyn Node<B>> = weak.clone();
        FunctionNode {
            id,
            name: name.clone(),
            ctx: Mutex::new(FunctionCtx::new(name.clone(), id, grad_fn, needs_input_grad)),
            is_differentiable_input,
            input_info,
            output_info: OnceLock::new(),
            num_outputs: OnceLock::new(),
            next_edges,
            _function: PhantomData,
        }
    });

    let raw_outputs = {
        let _no_grad = GradModeGuard::new(false);
        let mut ctx = node.lock_ctx();
        F::forward(&mut ctx, &args)?
    };

    let grad_fn: Option<Arc<dyn Node<B>>> = if is_executable {
        Some(node.clone())
    } else {
        None
    };
    let outputs = {
        let ctx = node.lock_ctx();
        wrap_outputs(
            &name,
            &input_vars,
            ctx.get_non_differentiable(),
            ctx.get_dirty(),
            &raw_outputs,
            grad_fn,
        )?
    };

    let num_outputs_set = node.num_outputs.set(outputs.len()).is_ok();
    debug_assert!(num_outputs_set, "num_outputs set twice for {name}");
    if is_executable {
        let output_info_set = node
            .output_info
            .set(outputs.iter().map(VariableInfo::new).collect())
            .is_ok();
        debug_assert!(output_info_set, "output_info set twice for {name}");
    }
    node.lock_ctx().save_variables();

    log::trace!(
        "{} ({:?}): {} inputs, {} outputs, executable={}",
        name,
        id,
        input_vars.len(),
        outputs.len(),
        is_executable
    );
    Ok(outputs)
}

/// Package forward's raw outputs.
///
/// - non-differentiable (marked, or not a float dtype): returned without a
///   creator
/// - dirty input: version bumped, creator left as it was
/// - otherwise, when `grad_fn` is set: creator = `grad_fn`, output_nr = the
///   position. An input returned unmodified is aliased first so the
///   caller's handle keeps its own history.
fn wrap_outputs<B: Backend>(
    name: &str,
    input_vars: &[Tensor<B>],
    non_differentiable: &HashSet<TensorId>,
    dirty_inputs: &HashSet<TensorId>,
    raw_outputs: &[Tensor<B>],
    grad_fn: Option<Arc<dyn Node<B>>>,
) -> Result<Vec<Tensor<B>>> {
    let input_ids: HashSet<TensorId> = input_vars.iter().map(Tensor::id).collect();
    let output_ids: HashSet<TensorId> = raw_outputs.iter().map(Tensor::id).collect();

    if !dirty_inputs.is_subset(&input_ids) {
        return Err(Error::protocol(
            name,
            "mark_dirty was given a tensor that is not a forward input",
        ));
    }
    if !non_differentiable.is_subset(&output_ids) {
        return Err(Error::protocol(
            name,
            "mark_non_differentiable was given a tensor that is not a forward output",
        ));
    }

    let mut outputs = Vec::with_capacity(raw_outputs.len());
    for (output_nr, out) in raw_outputs.iter().enumerate() {
        let id = out.id();
        let is_input = input_ids.contains(&id);
        let is_modified = dirty_inputs.contains(&id);
        let is_differentiable =
            out.dtype().is_differentiable() && !non_differentiable.contains(&id);

        let wrapped = if !is_differentiable {
            if out.requires_grad() {
                out.detach()
            } else {
                out.clone()
            }
        } else if is_modified {
            out.bump_version();
            out.clone()
        } else if let Some(grad_fn) = &grad_fn {
            let out = if is_input || out.requires_grad() {
                out.detach()
            } else {
                out.clone()
            };
            out.set_history(Arc::clone(grad_fn), output_nr);
            out
        } else {
            out.clone()
        };
        outputs.push(wrapped);
    }
    Ok(outputs)
}

// Argument helpers for forward bodies

/// The tensor at `args[index]`.
pub fn arg_tensor<B: Backend>(args: &[Value<B>], index: usize) -> Result<&Tensor<B>> {
    match args.get(index) {
        Some(Value::Tensor(t)) => Ok(t),
        Some(other) => Err(Error::msg(format!(
            "argument {index}: expected a tensor, got {}",
            other.kind()
        ))),
        None => Err(Error::msg(format!(
            "argument {index} missing ({} given)",
            args.len()
        ))),
    }
}

/// The number at `args[index]` (ints widen to floats).
pub fn arg_float<B: Backend>(args: &[Value<B>], index: usize) -> Result<f64> {
    let arg = args
        .get(index)
        .ok_or_else(|| Error::msg(format!("argument {index} missing ({} given)", args.len())))?;
    arg.as_float().ok_or_else(|| {
        Error::msg(format!(
            "argument {index}: expected a number, got {}",
            arg.kind()
        ))
    })
}

/// The integer at `args[index]`.
pub fn arg_int<B: Backend>(args: &[Value<B>], index: usize) -> Result<i64> {
    let arg = args
        .get(index)
        .ok_or_else(|| Error::msg(format!("argument {index} missing ({} given)", args.len())))?;
    arg.as_int().ok_or_else(|| {
        Error::msg(format!(
            "argument {index}: expected an int, got {}",
            arg.kind()
        ))
    })
}
