// Graph — Nodes and edges of the reverse-mode graph
//
// A value produced by a custom function records its creator: a shared
// `Arc<dyn Node<B>>` plus the index of the output it is. The creator in turn
// stores one `Edge` per differentiable input, pointing at that input's own
// creator (or marking it as a leaf). The traversal engine that walks these
// edges in topological order lives outside this crate; it only needs the
// `Node` contract below.
//
//   x (leaf) ──Edge::Leaf──┐
//                          ├──> FunctionNode ──creator of──> y
//   w = g(..) ─Edge::Function┘
//
// Ownership is strictly downward (output -> node -> edge -> older node), so
// plain reference counting never sees a cycle. The only back-reference,
// from an execution context to its node, is a `Weak`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend::Backend;
use crate::error::Result;
use crate::tensor::Tensor;
use crate::variable_info::VariableInfo;

/// Unique identifier for a tensor handle. Identity sets (dirty,
/// non-differentiable) are keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub(crate) u64);

impl Default for TensorId {
    fn default() -> Self {
        Self::new()
    }
}

impl TensorId {
    /// Generate a new unique tensor ID (uses a global atomic counter).
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        TensorId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Stable identity of a graph node, usable as a map key by a traversal
/// engine (e.g. for dependency counting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        NodeId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A backward-graph node as seen by the traversal engine.
///
/// `apply` receives one (possibly undefined) gradient per output of the
/// node and returns one (possibly undefined) gradient per entry of
/// `next_edges`.
pub trait Node<B: Backend>: Send + Sync {
    fn id(&self) -> NodeId;

    /// Human-readable name, used in error messages.
    fn name(&self) -> String;

    /// Number of outputs this node produced in forward.
    fn num_outputs(&self) -> usize;

    /// Edges to the creators of this node's differentiable inputs, in input order.
    fn next_edges(&self) -> &[Edge<B>];

    /// One flag per raw forward argument: whether it was a tensor.
    fn is_differentiable_input(&self) -> &[bool] {
        &[]
    }

    /// Descriptors of the differentiable inputs, in order.
    fn input_info(&self) -> &[VariableInfo<B>] {
        &[]
    }

    /// Descriptors of the outputs. Empty when the call was not recorded for
    /// differentiation.
    fn output_info(&self) -> &[VariableInfo<B>] {
        &[]
    }

    /// Run backward.
    fn apply(&self, grad_outputs: Vec<Option<Tensor<B>>>) -> Result<Vec<Option<Tensor<B>>>>;

    /// Free saved state once backward no longer needs it.
    fn release_variables(&self) {}
}

/// Where the gradient of one input flows next.
pub enum Edge<B: Backend> {
    /// The input was produced by `node` as its `input_nr`-th output.
    Function {
        node: Arc<dyn Node<B>>,
        input_nr: usize,
    },
    /// The input is a graph leaf that requires grad.
    Leaf(TensorId),
    /// The input does not participate in differentiation.
    Detached,
}

impl<B: Backend> Edge<B> {
    /// Whether gradient should be sent along this edge at all.
    pub fn is_valid(&self) -> bool {
        !matches!(self, Edge::Detached)
    }

    /// The target node, if the edge points at one.
    pub fn node(&self) -> Option<&Arc<dyn Node<B>>> {
        match self {
            Edge::Function { node, .. } => Some(node),
            _ => None,
        }
    }
}

impl<B: Backend> Clone for Edge<B> {
    fn clone(&self) -> Self {
        match self {
            Edge::Function { node, input_nr } => Edge::Function {
                node: Arc::clone(node),
                input_nr: *input_nr,
            },
            Edge::Leaf(id) => Edge::Leaf(*id),
            Edge::Detached => Edge::Detached,
        }
    }
}

impl<B: Backend> fmt::Debug for Edge<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edge::Function { node, input_nr } => f
                .debug_struct("Function")
                .field("node", &node.name())
                .field("id", &node.id())
                .field("input_nr", input_nr)
                .finish(),
            Edge::Leaf(id) => f.debug_tuple("Leaf").field(id).finish(),
            Edge::Detached => f.write_str("Detached"),
        }
    }
}

/// One edge per tensor, in order.
pub fn collect_next_edges<B: Backend>(inputs: &[Tensor<B>]) -> Vec<Edge<B>> {
    inputs.iter().map(Tensor::gradient_edge).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = TensorId::new();
        let b = TensorId::new();
        assert_ne!(a, b);
        assert_ne!(NodeId::new(), NodeId::new());
    }
}
