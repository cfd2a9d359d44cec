//! The runtime object model: named objects with fields, methods and an optional parent.
//!
//! Members are only added by an object's own construction program. Lookups
//! check the object itself first, then walk up the parent chain.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::RuntimeError;

use super::upvalue::Closure;
use super::value::{ObjectRef, Value};

/// Name-keyed member table with insertion order preserved.
pub type Members<V> = IndexMap<Rc<str>, V, ahash::RandomState>;

/// An object instance.
pub struct RuntimeObject {
    /// The path of the object program that built this instance.
    pub name: Rc<str>,
    pub fields: Members<Value>,
    pub methods: Members<Rc<Closure>>,
    pub super_object: Option<ObjectRef>,
}

impl RuntimeObject {
    pub fn new(name: impl Into<Rc<str>>) -> Self {
        Self {
            name: name.into(),
            fields: Members::default(),
            methods: Members::default(),
            super_object: None,
        }
    }

    pub fn define_field(&mut self, name: Rc<str>, value: Value) {
        self.fields.insert(name, value);
    }

    pub fn define_method(&mut self, name: Rc<str>, method: Rc<Closure>) {
        self.methods.insert(name, method);
    }

    /// Link `parent` as this object's super object. An object inherits at most once.
    pub fn inherit(&mut self, parent: ObjectRef) -> Result<(), RuntimeError> {
        if let Some(existing) = &self.super_object {
            return Err(RuntimeError::AlreadyInherits {
                object: self.name.to_string(),
                parent: existing.borrow().name.to_string(),
            });
        }
        self.super_object = Some(parent);
        Ok(())
    }

    /// A field, or failing that a method, declared on this object itself.
    pub fn own_property(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.fields.get(name) {
            return Some(value.clone());
        }
        self.methods
            .get(name)
            .map(|method| Value::Closure(method.clone()))
    }
}

/// Look up a property on `object` or its ancestors.
pub fn lookup_property(object: &ObjectRef, name: &str) -> Option<Value> {
    let mut current = Some(object.clone());
    while let Some(obj) = current {
        let borrowed = obj.borrow();
        if let Some(value) = borrowed.own_property(name) {
            return Some(value);
        }
        current = borrowed.super_object.clone();
    }
    None
}

/// Look up a method on `object` or its ancestors.
pub fn lookup_method(object: &ObjectRef, name: &str) -> Option<Rc<Closure>> {
    let mut current = Some(object.clone());
    while let Some(obj) = current {
        let borrowed = obj.borrow();
        if let Some(method) = borrowed.methods.get(name) {
            return Some(method.clone());
        }
        current = borrowed.super_object.clone();
    }
    None
}

/// Assign to an already declared field on `object` or its ancestors.
/// Returns false when no object in the chain declares the field.
pub fn assign_field(object: &ObjectRef, name: &str, value: Value) -> bool {
    let mut current = Some(object.clone());
    while let Some(obj) = current {
        let mut borrowed = obj.borrow_mut();
        if let Some(slot) = borrowed.fields.get_mut(name) {
            *slot = value;
            return true;
        }
        current = borrowed.super_object.clone();
    }
    false
}

/// The nearest object in the chain starting at `object` whose name is `name`.
pub fn find_ancestor(object: &ObjectRef, name: &str) -> Option<ObjectRef> {
    let mut current = Some(object.clone());
    while let Some(obj) = current {
        if &*obj.borrow().name == name {
            return Some(obj);
        }
        current = obj.borrow().super_object.clone();
    }
    None
}

impl fmt::Debug for RuntimeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeObject")
            .field("name", &self.name)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field(
                "super_object",
                &self.super_object.as_ref().map(|s| s.borrow().name.clone()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn object(name: &str) -> ObjectRef {
        Rc::new(RefCell::new(RuntimeObject::new(name)))
    }

    #[test]
    fn test_own_field_shadows_parent() {
        let parent = object("/std/base");
        parent
            .borrow_mut()
            .define_field("hp".into(), Value::Number(1.0));
        let child = object("/obj/orc");
        child
            .borrow_mut()
            .define_field("hp".into(), Value::Number(2.0));
        child.borrow_mut().inherit(parent).unwrap();

        assert_eq!(lookup_property(&child, "hp"), Some(Value::Number(2.0)));
    }

    #[test]
    fn test_lookup_walks_parent_chain() {
        let base = object("/std/base");
        base.borrow_mut()
            .define_field("level".into(), Value::Number(3.0));
        let child = object("/obj/orc");
        child.borrow_mut().inherit(base.clone()).unwrap();

        assert_eq!(lookup_property(&child, "level"), Some(Value::Number(3.0)));
        assert!(lookup_property(&child, "missing").is_none());

        assert!(assign_field(&child, "level", Value::Number(4.0)));
        assert_eq!(
            base.borrow().fields.get("level"),
            Some(&Value::Number(4.0))
        );
        assert!(!assign_field(&child, "missing", Value::Nil));
    }

    #[test]
    fn test_inherit_twice_fails() {
        let child = object("/obj/orc");
        child.borrow_mut().inherit(object("/a")).unwrap();
        let err = child.borrow_mut().inherit(object("/b")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Object '/obj/orc' already inherits from '/a'."
        );
    }

    #[test]
    fn test_find_ancestor() {
        let base = object("/std/base");
        let mid = object("/std/monster");
        mid.borrow_mut().inherit(base).unwrap();
        let child = object("/obj/orc");
        child.borrow_mut().inherit(mid).unwrap();

        let found = find_ancestor(&child, "/std/monster").unwrap();
        assert_eq!(&*found.borrow().name, "/std/monster");
        assert!(find_ancestor(&child, "/nowhere").is_none());
    }
}
