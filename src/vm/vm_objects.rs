//! Object operations for the VM: construction, inheritance, properties and method dispatch.

use std::rc::Rc;

use tracing::debug;

use crate::error::RuntimeError;

use super::chunk::CompilationKind;
use super::object::{assign_field, lookup_method, lookup_property};
use super::value::{ObjectRef, Value};
use super::vm::Vm;

impl Vm {
    /// The object under construction: the value on top of the stack.
    fn constructing(&self) -> Result<ObjectRef, RuntimeError> {
        self.peek(0).as_object().cloned().ok_or_else(|| {
            RuntimeError::type_error(format!(
                "Members can only be added to an object, not {}.",
                self.peek(0).type_name()
            ))
        })
    }

    /// Link `parent` as the super object of the object under construction.
    pub(super) fn inherit(&mut self, parent: Value) -> Result<(), RuntimeError> {
        let Value::Object(parent) = parent else {
            return Err(RuntimeError::InheritNonObject(parent.type_name()));
        };
        let child = self.constructing()?;
        debug!(
            object = %child.borrow().name,
            parent = %parent.borrow().name,
            "inherit"
        );
        let linked = child.borrow_mut().inherit(parent);
        linked
    }

    pub(super) fn define_field(&mut self, name: Rc<str>, value: Value) -> Result<(), RuntimeError> {
        let object = self.constructing()?;
        object.borrow_mut().define_field(name, value);
        Ok(())
    }

    pub(super) fn define_method(&mut self, name: Rc<str>, value: Value) -> Result<(), RuntimeError> {
        let Value::Closure(method) = value else {
            return Err(RuntimeError::type_error(format!(
                "Method '{}' must be a function, not {}.",
                name,
                value.type_name()
            )));
        };
        let object = self.constructing()?;
        object.borrow_mut().define_method(name, method);
        Ok(())
    }

    /// `receiver->name`: own members first, then up the parent chain.
    pub(super) fn get_property(&self, receiver: &Value, name: &str) -> Result<Value, RuntimeError> {
        let object = expect_object(receiver, name)?;
        lookup_property(object, name)
            .ok_or_else(|| RuntimeError::undefined_property(&*object.borrow().name, name))
    }

    /// `receiver->name = value`; only fields some object in the chain declared can be assigned.
    pub(super) fn set_property(&self, receiver: &Value, name: &str, value: Value) -> Result<(), RuntimeError> {
        let object = expect_object(receiver, name)?;
        if assign_field(object, name, value) {
            Ok(())
        } else {
            Err(RuntimeError::undefined_property(&*object.borrow().name, name))
        }
    }

    /// `receiver->name(args)`. Methods run with the receiver in slot 0;
    /// a field holding a function is called like any other value.
    pub(super) fn invoke(&mut self, name: &str, argc: usize) -> Result<(), RuntimeError> {
        let receiver = self.peek(argc).clone();
        let member = self.get_property(&receiver, name)?;
        match member {
            Value::Closure(method) if method.compilation.kind == CompilationKind::Method => {
                self.call_closure(method, argc)
            }
            other => {
                let slot = self.stack.len() - 1 - argc;
                self.stack[slot] = other;
                self.call_value(argc)
            }
        }
    }

    /// `::name(args)`: the super object on top of the stack supplies the method,
    /// the original receiver stays in the callee slot.
    pub(super) fn super_invoke(&mut self, name: &str, argc: usize) -> Result<(), RuntimeError> {
        let parent = self.pop();
        let parent = expect_object(&parent, name)?;
        let method = lookup_method(parent, name)
            .ok_or_else(|| RuntimeError::undefined_property(&*parent.borrow().name, name))?;
        self.call_closure(method, argc)
    }
}

fn expect_object<'a>(value: &'a Value, property: &str) -> Result<&'a ObjectRef, RuntimeError> {
    value
        .as_object()
        .ok_or_else(|| RuntimeError::not_an_object(property, value.type_name()))
}
