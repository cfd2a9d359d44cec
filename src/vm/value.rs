//! Runtime values.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::chunk::{Compilation, Constant};
use super::natives::NativeFunction;
use super::object::RuntimeObject;
use super::upvalue::Closure;

/// Shared handle to an object instance.
pub type ObjectRef = Rc<RefCell<RuntimeObject>>;

/// A runtime value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(ObjectRef),
    Closure(Rc<Closure>),
    Native(Rc<NativeFunction>),
    /// An object program that has been compiled but not run yet.
    Compilation(Rc<Compilation>),
}

/// The things a call site can invoke.
#[derive(Debug, Clone)]
pub enum Callable {
    Closure(Rc<Closure>),
    Native(Rc<NativeFunction>),
    Pending(Rc<Compilation>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(_) => "object",
            Value::Closure(_) => "function",
            Value::Native(_) => "native function",
            Value::Compilation(_) => "program",
        }
    }

    /// Only `nil` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn callable(&self) -> Option<Callable> {
        match self {
            Value::Closure(closure) => Some(Callable::Closure(closure.clone())),
            Value::Native(native) => Some(Callable::Native(native.clone())),
            Value::Compilation(pending) => Some(Callable::Pending(pending.clone())),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn string(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<&Constant> for Value {
    fn from(constant: &Constant) -> Self {
        match constant {
            Constant::Number(n) => Value::Number(*n),
            Constant::String(s) => Value::String(s.clone()),
            Constant::Compilation(c) => Value::Compilation(c.clone()),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::Compilation(a), Value::Compilation(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => format_number(*n, f),
            Value::String(s) => write!(f, "{}", s),
            Value::Object(obj) => write!(f, "<object {}>", obj.borrow().name),
            Value::Closure(closure) if closure.compilation.name.is_empty() => write!(f, "<fn>"),
            Value::Closure(closure) => write!(f, "<fn {}>", closure.compilation.name),
            Value::Native(native) => write!(f, "<native fn {}>", native.name),
            Value::Compilation(c) => write!(f, "<program {}>", c.name),
        }
    }
}

/// Whole numbers print without a fractional part.
fn format_number(n: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::chunk::CompilationKind;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Number(0.0).is_truthy());
        assert!(Value::string("").is_truthy());
    }

    #[test]
    fn test_number_display() {
        assert_eq!(Value::Number(7.0).to_string(), "7");
        assert_eq!(Value::Number(-2.0).to_string(), "-2");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
    }

    #[test]
    fn test_equality() {
        assert_eq!(Value::string("a"), Value::string("a"));
        assert_ne!(Value::Number(1.0), Value::string("1"));
        assert_ne!(Value::Nil, Value::Bool(false));
        let a = Rc::new(RefCell::new(RuntimeObject::new("/a")));
        assert_eq!(Value::Object(a.clone()), Value::Object(a));
        let b = Rc::new(RefCell::new(RuntimeObject::new("/a")));
        let c = Rc::new(RefCell::new(RuntimeObject::new("/a")));
        assert_ne!(Value::Object(b), Value::Object(c));
    }

    #[test]
    fn test_pending_compilation_is_callable() {
        let pending = Rc::new(Compilation::new(CompilationKind::Object, "/std/base"));
        assert!(matches!(
            Value::Compilation(pending).callable(),
            Some(Callable::Pending(_))
        ));
        assert!(Value::Number(1.0).callable().is_none());
    }
}
