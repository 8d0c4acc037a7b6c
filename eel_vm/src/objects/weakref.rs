// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Weak references.
//!
//! Each target object heads a doubly-linked chain of nodes in the engine's
//! node table; a weakref value carries its node handle so detaching is O(1).
//! Destroying the target unwires every node on the chain but leaves the
//! nodes themselves allocated: the values holding them stay valid, deref
//! just yields nil, and detaching releases the node exactly once.

use core::num::NonZeroU32;

use crate::execution::engine::Engine;
use crate::heap::arena::Obj;
use crate::types::value::Value;

/// Handle to a node in the weak-reference table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WeakNode(NonZeroU32);

impl WeakNode {
    fn from_index(index: usize) -> WeakNode {
        WeakNode(NonZeroU32::new(u32::try_from(index + 1).expect("weak table overflow")).unwrap())
    }

    fn index(self) -> usize {
        self.0.get() as usize - 1
    }
}

/// The payload of a weakref value: the original target plus the node used
/// to find and unlink it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeakRef {
    pub(crate) target: Obj,
    pub(crate) node: WeakNode,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct NodeData {
    /// `None` once the target has been destroyed ("unwired").
    pub(crate) target: Option<Obj>,
    pub(crate) prev: Option<WeakNode>,
    pub(crate) next: Option<WeakNode>,
}

enum NodeSlot {
    Free,
    Live(NodeData),
}

#[derive(Default)]
pub(crate) struct WeakTable {
    slots: Vec<NodeSlot>,
    free: Vec<WeakNode>,
}

impl WeakTable {
    fn alloc(&mut self, data: NodeData) -> WeakNode {
        match self.free.pop() {
            Some(n) => {
                self.slots[n.index()] = NodeSlot::Live(data);
                n
            }
            None => {
                self.slots.push(NodeSlot::Live(data));
                WeakNode::from_index(self.slots.len() - 1)
            }
        }
    }

    fn release(&mut self, n: WeakNode) {
        self.slots[n.index()] = NodeSlot::Free;
        self.free.push(n);
    }

    pub(crate) fn get(&self, n: WeakNode) -> Option<&NodeData> {
        match self.slots.get(n.index()) {
            Some(NodeSlot::Live(d)) => Some(d),
            _ => None,
        }
    }

    fn get_mut(&mut self, n: WeakNode) -> Option<&mut NodeData> {
        match self.slots.get_mut(n.index()) {
            Some(NodeSlot::Live(d)) => Some(d),
            _ => None,
        }
    }
}

impl Engine {
    /// Create a weak reference to `target`. The returned value does not own
    /// the target; dereferencing after the target dies yields nil.
    pub fn make_weakref(&mut self, target: Obj) -> Value {
        self.check_thread();
        let old_head = self.arena.record(target).header.weak_head;
        let node = self.weak.alloc(NodeData {
            target: Some(target),
            prev: None,
            next: old_head,
        });
        if let Some(h) = old_head
            && let Some(d) = self.weak.get_mut(h)
        {
            d.prev = Some(node);
        }
        self.arena.record_mut(target).header.weak_head = Some(node);
        Value::Weak(WeakRef { target, node })
    }

    /// Dereference: an owning objref to the target, or nil once the target
    /// has been destroyed.
    pub fn weak_deref(&mut self, w: WeakRef) -> Value {
        match self.weak.get(w.node).and_then(|d| d.target) {
            Some(o) => {
                self.own(o);
                Value::Object(o)
            }
            None => Value::Nil,
        }
    }

    /// Unlink and release a weakref's node. Each node detaches exactly
    /// once; a second attempt is reported and ignored.
    pub(crate) fn weak_detach(&mut self, w: WeakRef) {
        let Some(data) = self.weak.get(w.node).copied() else {
            log::error!("weakref detached twice");
            debug_assert!(false, "weakref detached twice");
            return;
        };
        if let Some(t) = data.target {
            match data.prev {
                Some(p) => {
                    if let Some(d) = self.weak.get_mut(p) {
                        d.next = data.next;
                    }
                }
                None => self.arena.record_mut(t).header.weak_head = data.next,
            }
            if let Some(n) = data.next
                && let Some(d) = self.weak.get_mut(n)
            {
                d.prev = data.prev;
            }
        }
        self.weak.release(w.node);
    }

    /// Unwire every weakref on `o`'s chain. Runs as part of destruction,
    /// before the class reference is dropped.
    pub(crate) fn kill_weakrefs(&mut self, o: Obj) {
        let mut cursor = self.arena.record_mut(o).header.weak_head.take();
        while let Some(n) = cursor {
            let d = self
                .weak
                .get_mut(n)
                .expect("weak chain held a released node");
            d.target = None;
            cursor = d.next.take();
            d.prev = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::engine::Options;

    fn engine_and_object() -> (Engine, Obj) {
        let mut engine = Engine::open(Options::default());
        let cid = engine.register_class("husk", None, None, None).unwrap();
        let o = engine.alloc(cid, Box::new(())).unwrap();
        (engine, o)
    }

    #[test]
    fn weakref_lifecycle() {
        let (mut engine, o) = engine_and_object();
        let live = engine.live_objects();
        let w = engine.make_weakref(o);
        let Value::Weak(w) = w else { panic!() };
        // Deref while alive: owning reference to the same object.
        let d = engine.weak_deref(w);
        assert_eq!(d, Value::Object(o));
        engine.disown_value(d);
        // Drop the last strong reference; the weakref goes nil.
        engine.disown(o);
        assert_eq!(engine.weak_deref(w), Value::Nil);
        engine.disown_value(Value::Weak(w));
        assert_eq!(engine.live_objects(), live - 1);
    }

    #[test]
    fn several_weakrefs_all_unwire() {
        let (mut engine, o) = engine_and_object();
        let refs: Vec<Value> = (0..3).map(|_| engine.make_weakref(o)).collect();
        engine.disown(o);
        for v in refs {
            let Value::Weak(w) = v else { panic!() };
            assert_eq!(engine.weak_deref(w), Value::Nil);
            engine.disown_value(v);
        }
    }

    #[test]
    fn detach_before_target_dies_unlinks_mid_chain() {
        let (mut engine, o) = engine_and_object();
        let a = engine.make_weakref(o);
        let b = engine.make_weakref(o);
        let c = engine.make_weakref(o);
        // b sits mid-chain.
        engine.disown_value(b);
        let Value::Weak(aw) = a else { panic!() };
        let Value::Weak(cw) = c else { panic!() };
        let d = engine.weak_deref(aw);
        assert_eq!(d, Value::Object(o));
        engine.disown_value(d);
        engine.disown_value(a);
        engine.disown_value(c);
        let _ = cw;
        engine.disown(o);
    }

    #[test]
    fn copying_a_weakref_attaches_a_fresh_node() {
        let (mut engine, o) = engine_and_object();
        let a = engine.make_weakref(o);
        let b = engine.copy_value(&a);
        assert_ne!(a, b, "copies must carry their own node");
        engine.disown_value(a);
        let Value::Weak(bw) = b else { panic!() };
        let d = engine.weak_deref(bw);
        assert_eq!(d, Value::Object(o));
        engine.disown_value(d);
        engine.disown_value(b);
        engine.disown(o);
    }

    #[test]
    fn copying_a_dead_weakref_yields_nil() {
        let (mut engine, o) = engine_and_object();
        let a = engine.make_weakref(o);
        engine.disown(o);
        assert_eq!(engine.copy_value(&a), Value::Nil);
        engine.disown_value(a);
    }

    #[test]
    fn class_objects_take_weakrefs_like_any_object() {
        let mut engine = Engine::open(Options::default());
        let cid = engine.register_class("probe", None, None, None).unwrap();
        let cobj = engine.class_object(cid).unwrap();
        let w = engine.make_weakref(cobj);
        let Value::Weak(w) = w else { panic!() };
        let d = engine.weak_deref(w);
        assert_eq!(d, Value::Object(cobj));
        engine.disown_value(d);
        engine.disown_value(Value::Weak(w));
    }
}
