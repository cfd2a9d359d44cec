//! Upvalue and closure types.
//!
//! Captured cells are reference counted and die with the last closure that
//! holds them. The VM tracks only the open ones, sorted by the stack slot
//! they point at, so closing everything at or above a slot only ever
//! touches the tail.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::chunk::Compilation;
use super::value::Value;

/// An upvalue captures a variable from an enclosing scope.
///
/// While the variable is still on the stack the upvalue is "open" and points
/// at that slot. Once the slot dies the upvalue is "closed" and owns the value.
#[derive(Debug, Clone)]
pub enum Upvalue {
    /// Points to a live stack slot.
    Open(usize),
    /// Holds the captured value after the slot went away.
    Closed(Value),
}

/// A captured cell, shared by every closure that captured the same variable.
pub type UpvalueRef = Rc<RefCell<Upvalue>>;

/// Descriptor emitted by the compiler for each upvalue a closure captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueDescriptor {
    /// If true, captures a local of the immediately enclosing function.
    /// If false, re-uses an upvalue of the enclosing function.
    pub is_local: bool,
    /// Either a stack slot (if is_local) or an upvalue index in the enclosing closure.
    pub index: u8,
}

/// A closure: a compilation paired with its captured upvalues.
pub struct Closure {
    pub compilation: Rc<Compilation>,
    pub upvalues: Vec<UpvalueRef>,
}

impl Closure {
    pub fn new(compilation: Rc<Compilation>, upvalues: Vec<UpvalueRef>) -> Self {
        Self {
            compilation,
            upvalues,
        }
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<fn {}>", self.compilation.name)
    }
}

/// Read through a cell: the stack slot while open, the owned value once closed.
pub fn read_upvalue(cell: &UpvalueRef, stack: &[Value]) -> Value {
    match &*cell.borrow() {
        Upvalue::Open(slot) => stack[*slot].clone(),
        Upvalue::Closed(value) => value.clone(),
    }
}

pub fn write_upvalue(cell: &UpvalueRef, stack: &mut [Value], value: Value) {
    match &mut *cell.borrow_mut() {
        Upvalue::Open(slot) => stack[*slot] = value,
        Upvalue::Closed(v) => *v = value,
    }
}

/// The open upvalues of a VM as (stack slot, cell), ascending by slot.
#[derive(Debug, Default)]
pub struct OpenUpvalues {
    open: Vec<(usize, UpvalueRef)>,
}

impl OpenUpvalues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the open cell for `slot`, creating it if no closure captured the slot yet.
    pub fn capture(&mut self, slot: usize) -> UpvalueRef {
        match self.open.binary_search_by_key(&slot, |(s, _)| *s) {
            Ok(pos) => self.open[pos].1.clone(),
            Err(pos) => {
                let cell = Rc::new(RefCell::new(Upvalue::Open(slot)));
                self.open.insert(pos, (slot, cell.clone()));
                cell
            }
        }
    }

    /// Close every open cell pointing at `threshold` or above and stop tracking it.
    pub fn close_from(&mut self, threshold: usize, stack: &[Value]) {
        while let Some((slot, _)) = self.open.last() {
            if *slot < threshold {
                break;
            }
            if let Some((slot, cell)) = self.open.pop() {
                let value = stack.get(slot).cloned().unwrap_or_default();
                *cell.borrow_mut() = Upvalue::Closed(value);
            }
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}
