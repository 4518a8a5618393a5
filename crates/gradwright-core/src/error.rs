use crate::shape::Shape;

/// All errors that can occur within gradwright.
///
/// Tensor misuse, custom-function protocol violations, backward count
/// mismatches and distributed-context registry misuse all surface through
/// this one enum. None of them is retried internally.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Shape mismatch between two tensors in an element-wise operation.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// DType mismatch between tensors in a binary operation.
    #[error("dtype mismatch: expected {expected:?}, got {got:?}")]
    DTypeMismatch {
        expected: crate::DType,
        got: crate::DType,
    },

    /// Element count mismatch when creating from a slice.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Tried to access a scalar from a non-scalar tensor.
    #[error("not a scalar: tensor has shape {shape}")]
    NotAScalar { shape: Shape },

    // Custom functions
    /// Misuse of the forward/backward protocol of a custom function
    /// (double `save_for_backward`, dirty tensor that is not an input, ...).
    #[error("protocol violation in {op}: {reason}")]
    ProtocolViolation { op: String, reason: String },

    /// Saved tensors were accessed after the node released its buffers.
    #[error(
        "trying to access saved tensors of {op} after they have already been freed; \
         backward was probably run through this part of the graph a second time"
    )]
    BuffersFreed { op: String },

    /// A saved tensor was modified in place after it was saved.
    #[error(
        "a tensor needed for gradient computation in {op} has been modified by an in-place \
         operation: saved at version {saved_version}, now at version {current_version}"
    )]
    ModifiedInPlace {
        op: String,
        saved_version: u64,
        current_version: u64,
    },

    /// Backward returned the wrong number of gradients.
    #[error("function {op} returned an incorrect number of gradients (expected {expected}, got {got})")]
    GradientCountMismatch {
        op: String,
        expected: usize,
        got: usize,
    },

    /// Backward returned a defined gradient for a non-tensor forward argument.
    #[error(
        "function {op} returned a gradient that is defined at position {position}, \
         but the corresponding forward input was not a tensor"
    )]
    GradientForNonDifferentiable { op: String, position: usize },

    // Distributed autograd contexts
    /// The context registry was used before `init`.
    #[error("distributed autograd is not initialized; call DistAutogradContainer::init first")]
    NotInitialized,

    /// `init` was given a worker id outside `[0, 65535]`.
    #[error("worker_id needs to be in the range [0, 65535], got {0}")]
    WorkerIdOutOfRange(i64),

    /// The 48-bit sequence space of this worker is used up.
    #[error("ran out of autograd context ids for worker {worker_id}")]
    ContextIdsExhausted { worker_id: i64 },

    /// Lookup or release of an id that is not in the registry.
    #[error("could not find autograd context with id: {0}")]
    UnknownContext(i64),

    /// The calling thread has no current context.
    #[error("current thread doesn't have a valid autograd context")]
    NoCurrentContext,

    /// The thread's current id points at a context that is no longer stored.
    #[error("couldn't find autograd context data for current autograd context id {0}")]
    MissingContextData(i64),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// Create a protocol violation for the named function.
    pub fn protocol(op: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ProtocolViolation {
            op: op.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience Result type used throughout gradwright.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
