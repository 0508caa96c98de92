// ABOUTME: Interpreter frame stack: symbol-id-indexed slots with parent-chain lookup

use crate::value::Value;
use std::cell::RefCell;
use std::rc::Rc;

/// One activation record: a dense slot array indexed by symbol id (not a
/// name map), chained to its lexical parent. Directly descended from the
/// teacher's `Rc<Environment>` parent chain, generalized from
/// name-keyed bindings to the scope table's dense symbol ids.
#[derive(Debug)]
pub struct Frame {
    slots: RefCell<Vec<Value>>,
    parent: Option<Rc<Frame>>,
}

impl Frame {
    pub fn root(slot_count: usize) -> Rc<Frame> {
        Rc::new(Frame { slots: RefCell::new(vec![Value::Null; slot_count]), parent: None })
    }

    pub fn child(parent: Rc<Frame>, slot_count: usize) -> Rc<Frame> {
        Rc::new(Frame { slots: RefCell::new(vec![Value::Null; slot_count]), parent: Some(parent) })
    }

    /// Reads this frame's own slot (not the parent chain) — used when the
    /// scope analyzer has already resolved a depth + index pair.
    pub fn get_local(&self, slot: usize) -> Value {
        self.slots.borrow()[slot].clone()
    }

    pub fn set_local(&self, slot: usize, value: Value) {
        self.slots.borrow_mut()[slot] = value;
    }

    /// Walks `depth` parent links, then reads `slot` there. Depth 0 is this
    /// frame itself.
    pub fn get(self: &Rc<Self>, depth: usize, slot: usize) -> Value {
        let mut frame = Rc::clone(self);
        for _ in 0..depth {
            frame = Rc::clone(frame.parent.as_ref().expect("scope analyzer guarantees depth is in range"));
        }
        frame.get_local(slot)
    }

    pub fn set(self: &Rc<Self>, depth: usize, slot: usize, value: Value) {
        let mut frame = Rc::clone(self);
        for _ in 0..depth {
            frame = Rc::clone(frame.parent.as_ref().expect("scope analyzer guarantees depth is in range"));
        }
        frame.set_local(slot, value);
    }

    /// Returns the ancestor frame `depth` links up — used to build a
    /// `(frame, slot)` capture pair for a lambda at creation time.
    pub fn ancestor(self: &Rc<Self>, depth: usize) -> Rc<Frame> {
        let mut frame = Rc::clone(self);
        for _ in 0..depth {
            frame = Rc::clone(frame.parent.as_ref().expect("scope analyzer guarantees depth is in range"));
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_chain_lookup() {
        let root = Frame::root(1);
        root.set_local(0, Value::Int(1));
        let child = Frame::child(Rc::clone(&root), 1);
        child.set_local(0, Value::Int(2));

        assert_eq!(child.get(0, 0), Value::Int(2));
        assert_eq!(child.get(1, 0), Value::Int(1));
    }

    #[test]
    fn capture_writes_through_shared_slot() {
        let root = Frame::root(1);
        root.set_local(0, Value::Int(10));
        let captured = root.ancestor(0);
        captured.set_local(0, Value::Int(20));
        assert_eq!(root.get_local(0), Value::Int(20));
    }
}
