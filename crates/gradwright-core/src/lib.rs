//! # gradwright-core
//!
//! Custom differentiable functions for a reverse-mode autograd graph.
//!
//! This crate provides:
//! - [`Function`] — trait for user-defined forward/backward pairs
//! - [`FunctionCtx`] — per-call state shared by forward and backward
//! - [`FunctionNode`] / [`Node`] / [`Edge`] — the recorded graph
//! - [`VariableInfo`] — tensor metadata used to synthesize zero gradients
//! - [`Tensor`] / [`Backend`] — the minimal tensor surface the graph needs
//! - [`Value`] — tagged argument list entries and saved data
//! - grad mode ([`no_grad`], [`GradModeGuard`])

pub mod backend;
pub mod dtype;
pub mod error;
pub mod function;
pub mod grad_mode;
pub mod graph;
pub mod shape;
pub mod tensor;
pub mod value;
pub mod variable_info;

pub use backend::{Backend, BackendDevice, BackendStorage, BinaryOp};
pub use dtype::{DType, WithDType};
pub use error::{Error, Result};
pub use function::{apply, arg_float, arg_int, arg_tensor, Function, FunctionCtx, FunctionNode};
pub use grad_mode::{is_grad_enabled, no_grad, set_grad_enabled, GradModeGuard};
pub use graph::{collect_next_edges, Edge, Node, NodeId, TensorId};
pub use shape::Shape;
pub use tensor::Tensor;
pub use value::Value;
pub use variable_info::VariableInfo;
