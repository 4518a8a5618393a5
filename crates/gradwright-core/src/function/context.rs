use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::graph::{Node, NodeId, TensorId};
use crate::tensor::Tensor;
use crate::value::Value;

/// A tensor stashed by `save_for_backward`, with the version it had when
/// the snapshot was taken.
///
/// Outputs of the owning node are stored detached (without their creator)
/// so the node never owns a tensor that owns the node. `output_nr` records
/// where to re-attach the creator on unpack.
struct SavedTensor<B: Backend> {
    data: Tensor<B>,
    saved_version: u64,
    output_nr: Option<usize>,
}

impl<B: Backend> SavedTensor<B> {
    fn new(var: &Tensor<B>, owner: NodeId) -> Self {
        let output_nr = match var.grad_fn() {
            Some(node) if node.id() == owner => Some(var.output_nr()),
            _ => None,
        };
        let data = match output_nr {
            Some(_) => var.detach(),
            None => var.clone(),
        };
        SavedTensor {
            saved_version: var.version(),
            data,
            output_nr,
        }
    }

    fn unpack(&self, op: &str, grad_fn: &Weak<dyn Node<B>>) -> Result<Tensor<B>> {
        let current_version = self.data.version();
        if current_version != self.saved_version {
            return Err(Error::ModifiedInPlace {
                op: op.to_string(),
                saved_version: self.saved_version,
                current_version,
            });
        }
        Ok(match (self.output_nr, grad_fn.upgrade()) {
            (Some(output_nr), Some(node)) => self.data.with_history(node, output_nr),
            _ => self.data.clone(),
        })
    }
}

/// Per-invocation state shared between a custom function's forward and
/// backward.
///
/// Forward stores tensors with [`save_for_backward`](Self::save_for_backward)
/// and anything else in [`saved_data`](Self::saved_data); it declares
/// in-place modified inputs with [`mark_dirty`](Self::mark_dirty) and
/// gradient-free outputs with
/// [`mark_non_differentiable`](Self::mark_non_differentiable). Each of the
/// three calls is allowed at most once.
pub struct FunctionCtx<B: Backend> {
    /// Free-form data for backward.
    pub saved_data: HashMap<String, Value<B>>,

    name: String,
    node_id: NodeId,
    grad_fn: Weak<dyn Node<B>>,
    needs_input_grad: Vec<bool>,

    to_save: Option<Vec<Tensor<B>>>,
    save_called: bool,
    saved_variables: Vec<SavedTensor<B>>,
    has_freed_buffers: bool,

    non_differentiable: HashSet<TensorId>,
    non_differentiable_marked: bool,
    dirty_inputs: HashSet<TensorId>,
    dirty_marked: bool,
}

impl<B: Backend> FunctionCtx<B> {
    pub(crate) fn new(
        name: String,
        node_id: NodeId,
        grad_fn: Weak<dyn Node<B>>,
        needs_input_grad: Vec<bool>,
    ) -> Self {
        FunctionCtx {
            saved_data: HashMap::new(),
            name,
            node_id,
            grad_fn,
            needs_input_grad,
            to_save: None,
            save_called: false,
            saved_variables: Vec::new(),
            has_freed_buffers: false,
            non_differentiable: HashSet::new(),
            non_differentiable_marked: false,
            dirty_inputs: HashSet::new(),
            dirty_marked: false,
        }
    }

    /// Save tensors for a later call to backward. Call at most once, from
    /// forward.
    pub fn save_for_backward(&mut self, to_save: &[Tensor<B>]) -> Result<()> {
        if self.save_called {
            return Err(Error::protocol(
                &self.name,
                "save_for_backward can only be called once per invocation",
            ));
        }
        self.save_called = true;
        self.to_save = Some(to_save.to_vec());
        Ok(())
    }

    /// Declare inputs that forward modified in place. Call at most once;
    /// every tensor must be a forward input.
    pub fn mark_dirty(&mut self, inputs: &[Tensor<B>]) -> Result<()> {
        if self.dirty_marked {
            return Err(Error::protocol(
                &self.name,
                "mark_dirty can only be called once per invocation",
            ));
        }
        self.dirty_marked = true;
        self.dirty_inputs = inputs.iter().map(Tensor::id).collect();
        Ok(())
    }

    /// Declare outputs that must not propagate gradients. Call at most once;
    /// every tensor must be a forward output.
    pub fn mark_non_differentiable(&mut self, outputs: &[Tensor<B>]) -> Result<()> {
        if self.non_differentiable_marked {
            return Err(Error::protocol(
                &self.name,
                "mark_non_differentiable can only be called once per invocation",
            ));
        }
        self.non_differentiable_marked = true;
        self.non_differentiable = outputs.iter().map(Tensor::id).collect();
        Ok(())
    }

    /// The tensors saved in forward, in the order they were given.
    ///
    /// Fails once the node has released its buffers, or if any saved tensor
    /// was modified in place after it was saved.
    pub fn get_saved_variables(&self) -> Result<Vec<Tensor<B>>> {
        if self.has_freed_buffers {
            return Err(Error::BuffersFreed {
                op: self.name.clone(),
            });
        }
        self.saved_variables
            .iter()
            .map(|saved| saved.unpack(&self.name, &self.grad_fn))
            .collect()
    }

    pub fn get_dirty(&self) -> &HashSet<TensorId> {
        &self.dirty_inputs
    }

    pub fn get_non_differentiable(&self) -> &HashSet<TensorId> {
        &self.non_differentiable
    }

    /// Whether forward argument `index` is a tensor that required grad.
    pub fn needs_input_grad(&self, index: usize) -> bool {
        self.needs_input_grad.get(index).copied().unwrap_or(false)
    }

    /// The node this context belongs to, while it is alive.
    pub fn grad_fn(&self) -> Option<Arc<dyn Node<B>>> {
        self.grad_fn.upgrade()
    }

    pub fn has_freed_buffers(&self) -> bool {
        self.has_freed_buffers
    }

    /// Snapshot the pending `save_for_backward` tensors. Runs after outputs
    /// are wrapped, so versions bumped for dirty inputs are the baseline.
    pub(crate) fn save_variables(&mut self) {
        if let Some(to_save) = self.to_save.take() {
            self.saved_variables = to_save
                .iter()
                .map(|var| SavedTensor::new(var, self.node_id))
                .collect();
        }
    }

    pub(crate) fn release_variables(&mut self) {
        self.saved_variables.clear();
        self.has_freed_buffers = true;
    }
}
