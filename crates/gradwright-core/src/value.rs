// Value — Tagged argument / saved-data cell
//
// Custom functions take a heterogeneous argument list: some tensors, some
// plain numbers or strings. Each argument is a `Value`, and the argument
// list is a `Vec<Value<B>>` built at the call site (the `values!` macro
// converts each expression with `Value::from`). Classification for
// autograd is purely by tag: `Value::Tensor` is differentiable, every other
// variant is opaque.
//
// The same type backs `FunctionCtx::saved_data`, the free-form map a
// forward body uses to hand non-tensor state to backward.

use crate::backend::Backend;
use crate::tensor::Tensor;

/// A dynamically tagged value.
pub enum Value<B: Backend> {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tensor(Tensor<B>),
    List(Vec<Value<B>>),
}

impl<B: Backend> Value<B> {
    /// Whether autograd treats this argument as a differentiable input.
    pub fn is_tensor(&self) -> bool {
        matches!(self, Value::Tensor(_))
    }

    pub fn as_tensor(&self) -> Option<&Tensor<B>> {
        match self {
            Value::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Ints widen to floats.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value<B>]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Tensor(_) => "tensor",
            Value::List(_) => "list",
        }
    }
}

impl<B: Backend> Clone for Value<B> {
    fn clone(&self) -> Self {
        match self {
            Value::None => Value::None,
            Value::Bool(b) => Value::Bool(*b),
            Value::Int(i) => Value::Int(*i),
            Value::Float(f) => Value::Float(*f),
            Value::Str(s) => Value::Str(s.clone()),
            Value::Tensor(t) => Value::Tensor(t.clone()),
            Value::List(l) => Value::List(l.clone()),
        }
    }
}

impl<B: Backend> std::fmt::Debug for Value<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Tensor(t) => write!(f, "{t:?}"),
            Value::List(l) => f.debug_list().entries(l).finish(),
        }
    }
}

impl<B: Backend> From<Tensor<B>> for Value<B> {
    fn from(t: Tensor<B>) -> Self {
        Value::Tensor(t)
    }
}

impl<B: Backend> From<&Tensor<B>> for Value<B> {
    fn from(t: &Tensor<B>) -> Self {
        Value::Tensor(t.clone())
    }
}

impl<B: Backend> From<bool> for Value<B> {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<B: Backend> From<i64> for Value<B> {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl<B: Backend> From<i32> for Value<B> {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl<B: Backend> From<usize> for Value<B> {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl<B: Backend> From<f64> for Value<B> {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl<B: Backend> From<&str> for Value<B> {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl<B: Backend> From<String> for Value<B> {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl<B: Backend, T: Into<Value<B>>> From<Option<T>> for Value<B> {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::None, Into::into)
    }
}

impl<B: Backend> From<Vec<Value<B>>> for Value<B> {
    fn from(l: Vec<Value<B>>) -> Self {
        Value::List(l)
    }
}

/// Build a `Vec<Value<_>>` argument list, converting each element with
/// `Value::from`.
///
/// ```ignore
/// let y = MulConstant::apply(values![&x, 6.0])?;
/// ```
#[macro_export]
macro_rules! values {
    () => { ::std::vec::Vec::new() };
    ($($arg:expr),+ $(,)?) => {
        vec![$($crate::value::Value::from($arg)),+]
    };
}
