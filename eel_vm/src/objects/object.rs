// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Object lifetime: reference counting, destruction and limbo.
//!
//! Objects are born with one reference and die when the last is dropped,
//! subject to the destructor's consent. An object whose destructor is
//! running is linked into the engine's limbo list so that re-entrant
//! destruction attempts can be detected and ignored; a destructor that
//! refuses leaves the object in limbo as a zombie, to be retried by the
//! next disown or resurrected by an own.

use core::any::Any;

use crate::execution::engine::Engine;
use crate::execution::exception::{Exception, XResult};
use crate::heap::arena::{Obj, ObjectHeader, ObjectRecord};
use crate::objects::class::{ClassId, Metamethod};
use crate::types::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifetime {
    Alive,
    /// Destructor running; linked in limbo.
    Destructing,
    /// Destructor refused; refcount is zero but the object is retained.
    Zombie,
}

impl Engine {
    /// Allocate an object of `class_id` with the given payload. The caller
    /// receives the single initial reference; the instance owns its class.
    pub fn alloc(&mut self, class_id: ClassId, payload: Box<dyn Any>) -> XResult<Obj> {
        self.check_thread();
        if class_id != ClassId::CLASS {
            // Take the instance's reference on the class up front.
            let class_object = self.class_object(class_id).ok_or(Exception::BADCLASS)?;
            self.own(class_object);
        }
        Ok(self.arena.insert(ObjectRecord {
            header: ObjectHeader::new(class_id),
            payload,
        }))
    }

    /// Run a class's constructor.
    pub fn construct(&mut self, class_id: ClassId, initv: &[Value]) -> XResult<Value> {
        let ctor = self
            .class_descriptor(class_id)?
            .construct
            .ok_or(Exception::NOCONSTRUCTOR)?;
        ctor(self, class_id, initv)
    }

    /// Add a reference. Owning a zombie resurrects it.
    pub fn own(&mut self, o: Obj) {
        self.check_thread();
        let resurrected = {
            let header = &mut self.arena.record_mut(o).header;
            header.refcount += 1;
            let z = header.lifetime == Lifetime::Zombie;
            if z {
                header.lifetime = Lifetime::Alive;
            }
            z
        };
        if resurrected {
            self.limbo_unlink(o);
        }
    }

    /// Drop a reference; destruct at zero. Disowning an object that is
    /// already inside its destructor is a no-op.
    pub fn disown(&mut self, o: Obj) {
        self.check_thread();
        match self.arena.record(o).header.lifetime {
            Lifetime::Destructing => {}
            Lifetime::Zombie => self.destruct(o),
            Lifetime::Alive => {
                let dead = {
                    let header = &mut self.arena.record_mut(o).header;
                    debug_assert!(header.refcount > 0, "disown of an unowned object");
                    header.refcount -= 1;
                    header.refcount == 0
                };
                if dead {
                    self.destruct(o);
                }
            }
        }
    }

    /// The class of an object.
    pub fn class_id_of(&self, o: Obj) -> ClassId {
        self.arena.record(o).header.class_id
    }

    /// Current reference count; zero only for zombies.
    pub fn refcount(&self, o: Obj) -> u32 {
        self.arena.record(o).header.refcount
    }

    /// Typed view of an object's payload.
    pub fn payload<T: 'static>(&self, o: Obj) -> XResult<&T> {
        self.arena
            .get(o)
            .ok_or(Exception::BADTYPE)?
            .payload
            .downcast_ref::<T>()
            .ok_or(Exception::WRONGTYPE)
    }

    /// Typed mutable view of an object's payload.
    pub fn payload_mut<T: 'static>(&mut self, o: Obj) -> XResult<&mut T> {
        self.arena
            .get(o)
            .ok_or(Exception::BADTYPE)?;
        self.arena
            .record_mut(o)
            .payload
            .downcast_mut::<T>()
            .ok_or(Exception::WRONGTYPE)
    }

    /// Number of live objects in the arena, reserved class objects
    /// included.
    pub fn live_objects(&self) -> usize {
        self.arena.live()
    }

    fn destruct(&mut self, o: Obj) {
        let was_alive = {
            let header = &mut self.arena.record_mut(o).header;
            let alive = header.lifetime == Lifetime::Alive;
            header.lifetime = Lifetime::Destructing;
            alive
        };
        if was_alive {
            self.limbo_link(o);
        }
        let class_id = self.arena.record(o).header.class_id;
        let dtor = self
            .class_descriptor(class_id)
            .ok()
            .and_then(|d| d.destruct);
        let verdict = match dtor {
            Some(f) => f(self, o),
            None => Ok(()),
        };
        match verdict {
            Err(Exception::REFUSE) if !self.closing => {
                self.arena.record_mut(o).header.lifetime = Lifetime::Zombie;
                if class_id == ClassId::MODULE {
                    // A module that declines an incremental sweep is kept
                    // by the dead-module holder instead.
                    self.own(o);
                    self.modules.dead.push(o);
                }
                return;
            }
            Err(Exception::REFUSE) => {}
            Err(x) => {
                log::warn!(
                    "destructor of <{}> failed ({:?}); destroying anyway",
                    self.type_name(class_id),
                    x
                );
            }
            Ok(()) => {}
        }
        if self.arena.record(o).header.refcount > 0 {
            // The destructor consented but also took new references; treat
            // it as a resurrection.
            log::warn!(
                "destructor of <{}> consented while re-owning the object",
                self.type_name(class_id)
            );
            self.arena.record_mut(o).header.lifetime = Lifetime::Alive;
            self.limbo_unlink(o);
            return;
        }
        self.kill_weakrefs(o);
        self.limbo_unlink(o);
        let record = self.arena.remove(o);
        drop(record);
        if class_id != ClassId::CLASS
            && let Some(class_object) = self.class_object(class_id)
        {
            self.disown(class_object);
        }
    }

    fn limbo_link(&mut self, o: Obj) {
        let old_head = self.limbo_head;
        {
            let header = &mut self.arena.record_mut(o).header;
            header.limbo_prev = None;
            header.limbo_next = old_head;
        }
        if let Some(h) = old_head {
            self.arena.record_mut(h).header.limbo_prev = Some(o);
        }
        self.limbo_head = Some(o);
    }

    fn limbo_unlink(&mut self, o: Obj) {
        let (prev, next) = {
            let header = &mut self.arena.record_mut(o).header;
            (header.limbo_prev.take(), header.limbo_next.take())
        };
        match prev {
            Some(p) => self.arena.record_mut(p).header.limbo_next = next,
            None => {
                if self.limbo_head == Some(o) {
                    self.limbo_head = next;
                }
            }
        }
        if let Some(n) = next {
            self.arena.record_mut(n).header.limbo_prev = prev;
        }
    }

    /// Force-destroy any zombies left in limbo. Used at engine close, where
    /// refusal is not honored.
    pub(crate) fn flush_limbo(&mut self) {
        while let Some(o) = self.limbo_head {
            self.destruct(o);
        }
    }

    /// Dispatch a metamethod on `o`. `op2` doubles as the result slot; it
    /// is left untouched on the error path, including when the class has no
    /// callback in the slot.
    pub fn metamethod(
        &mut self,
        o: Obj,
        mm: Metamethod,
        op1: &Value,
        op2: &mut Value,
    ) -> XResult<()> {
        self.check_thread();
        let class_id = self.arena.record(o).header.class_id;
        let cb = self.class_descriptor(class_id)?.metamethods[mm.index()];
        match cb {
            Some(f) => f(self, o, op1, op2),
            None => Err(Exception::NOMETAMETHOD),
        }
    }

    /// The length of a container object.
    pub fn length(&mut self, o: Obj) -> XResult<i64> {
        let mut result = Value::Nil;
        self.metamethod(o, Metamethod::Length, &Value::Nil, &mut result)?;
        result.as_integer()
    }

    /// Index by arbitrary key; the result is owned by the caller.
    pub fn get_index(&mut self, o: Obj, key: &Value) -> XResult<Value> {
        let mut result = Value::Nil;
        self.metamethod(o, Metamethod::GetIndex, key, &mut result)?;
        Ok(result)
    }

    /// Index by integer.
    pub fn get_lindex(&mut self, o: Obj, index: i64) -> XResult<Value> {
        self.get_index(o, &Value::Integer(index))
    }

    /// Index by string; the key is interned for the duration of the call.
    pub fn get_sindex(&mut self, o: Obj, key: &str) -> XResult<Value> {
        let key_object = self.intern(key)?;
        let key_value = Value::Object(key_object);
        let result = self.get_index(o, &key_value);
        self.disown_value(key_value);
        result
    }

    pub fn set_index(&mut self, o: Obj, key: &Value, value: &Value) -> XResult<()> {
        let mut slot = *value;
        self.metamethod(o, Metamethod::SetIndex, key, &mut slot)
    }

    pub fn set_lindex(&mut self, o: Obj, index: i64, value: &Value) -> XResult<()> {
        self.set_index(o, &Value::Integer(index), value)
    }

    pub fn set_sindex(&mut self, o: Obj, key: &str, value: &Value) -> XResult<()> {
        let key_object = self.intern(key)?;
        let key_value = Value::Object(key_object);
        let result = self.set_index(o, &key_value, value);
        self.disown_value(key_value);
        result
    }

    pub fn delete(&mut self, o: Obj, key: &Value) -> XResult<()> {
        let mut unused = Value::Nil;
        self.metamethod(o, Metamethod::Delete, key, &mut unused)
    }

    /// Delete `count` items starting at `index`.
    pub fn delete_range(&mut self, o: Obj, index: i64, count: i64) -> XResult<()> {
        let mut count_slot = Value::Integer(count);
        self.metamethod(o, Metamethod::Delete, &Value::Integer(index), &mut count_slot)
    }

    pub fn sdelete(&mut self, o: Obj, key: &str) -> XResult<()> {
        let key_object = self.intern(key)?;
        let key_value = Value::Object(key_object);
        let result = self.delete(o, &key_value);
        self.disown_value(key_value);
        result
    }

    pub fn insert(&mut self, o: Obj, key: &Value, value: &Value) -> XResult<()> {
        let mut slot = *value;
        self.metamethod(o, Metamethod::Insert, key, &mut slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::engine::Options;
    use std::cell::Cell;
    use std::rc::Rc;

    fn engine() -> Engine {
        Engine::open(Options::default())
    }

    #[test]
    fn refcounts_are_conserved() {
        let mut engine = engine();
        let cid = engine.register_class("thing", None, None, None).unwrap();
        let baseline = engine.live_objects();
        let o = engine.alloc(cid, Box::new(0u8)).unwrap();
        assert_eq!(engine.refcount(o), 1);
        engine.own(o);
        engine.own(o);
        assert_eq!(engine.refcount(o), 3);
        engine.disown(o);
        engine.disown(o);
        assert_eq!(engine.refcount(o), 1);
        engine.disown(o);
        assert_eq!(engine.live_objects(), baseline);
    }

    #[test]
    fn class_refcount_tracks_instances() {
        let mut engine = engine();
        let cid = engine.register_class("counted", None, None, None).unwrap();
        let class_object = engine.class_object(cid).unwrap();
        let base = engine.refcount(class_object);
        let a = engine.alloc(cid, Box::new(())).unwrap();
        let b = engine.alloc(cid, Box::new(())).unwrap();
        assert_eq!(engine.refcount(class_object), base + 2);
        engine.disown(a);
        engine.disown(b);
        assert_eq!(engine.refcount(class_object), base);
    }

    fn refusing_destructor(engine: &mut Engine, o: Obj) -> XResult<()> {
        let calls = engine
            .get_classdata(engine.class_id_of(o))
            .expect("test class carries call counter");
        let calls = calls.downcast_ref::<Cell<u32>>().unwrap();
        calls.set(calls.get() + 1);
        if calls.get() == 1 {
            Err(Exception::REFUSE)
        } else {
            Ok(())
        }
    }

    #[test]
    fn resurrection_retries_the_destructor() {
        let mut engine = engine();
        let cid = engine
            .register_class("phoenix", None, None, Some(refusing_destructor))
            .unwrap();
        let calls: Rc<Cell<u32>> = Rc::new(Cell::new(0));
        engine.set_classdata(cid, calls.clone()).unwrap();
        let baseline = engine.live_objects();
        let o = engine.alloc(cid, Box::new(())).unwrap();
        // First disown: destructor refuses, the object zombifies.
        engine.disown(o);
        assert_eq!(calls.get(), 1);
        assert_eq!(engine.live_objects(), baseline + 1);
        assert_eq!(engine.refcount(o), 0);
        // Owning a zombie brings it back.
        engine.own(o);
        assert_eq!(engine.refcount(o), 1);
        // Second disown: destructor consents and the object is freed.
        engine.disown(o);
        assert_eq!(calls.get(), 2);
        assert_eq!(engine.live_objects(), baseline);
    }

    #[test]
    fn zombie_disown_retries_without_resurrection() {
        let mut engine = engine();
        let cid = engine
            .register_class("stubborn", None, None, Some(refusing_destructor))
            .unwrap();
        let calls: Rc<Cell<u32>> = Rc::new(Cell::new(0));
        engine.set_classdata(cid, calls.clone()).unwrap();
        let baseline = engine.live_objects();
        let o = engine.alloc(cid, Box::new(())).unwrap();
        engine.disown(o);
        assert_eq!(calls.get(), 1);
        // Disowning the zombie directly retries the destructor.
        engine.disown(o);
        assert_eq!(calls.get(), 2);
        assert_eq!(engine.live_objects(), baseline);
    }

    fn reentrant_destructor(engine: &mut Engine, o: Obj) -> XResult<()> {
        // A destructor that disowns its own object: must be a no-op.
        engine.disown(o);
        engine.disown(o);
        Ok(())
    }

    #[test]
    fn disown_inside_the_destructor_is_ignored() {
        let mut engine = engine();
        let cid = engine
            .register_class("recursive", None, None, Some(reentrant_destructor))
            .unwrap();
        let baseline = engine.live_objects();
        let o = engine.alloc(cid, Box::new(())).unwrap();
        engine.disown(o);
        assert_eq!(engine.live_objects(), baseline);
    }

    fn record_get(engine: &mut Engine, _o: Obj, op1: &Value, op2: &mut Value) -> XResult<()> {
        let key = op1.as_object()?;
        match engine.string_text(key)? {
            "name" => {
                *op2 = engine.new_string("eel")?;
                Ok(())
            }
            _ => Err(Exception::WRONGINDEX),
        }
    }

    #[test]
    fn string_keys_are_interned_for_the_call() {
        let mut engine = engine();
        let cid = engine.register_class("record", None, None, None).unwrap();
        engine
            .set_metamethod(cid, Metamethod::GetIndex, record_get)
            .unwrap();
        let o = engine.alloc(cid, Box::new(())).unwrap();
        let baseline = engine.live_objects();
        let v = engine.get_sindex(o, "name").unwrap();
        // The key string died with the call; only the result remains.
        assert_eq!(engine.live_objects(), baseline + 1);
        let s = v.as_object().unwrap();
        assert_eq!(engine.string_text(s).unwrap(), "eel");
        engine.disown_value(v);
        assert_eq!(engine.live_objects(), baseline);
        assert_eq!(engine.get_sindex(o, "age"), Err(Exception::WRONGINDEX));
        engine.disown(o);
    }

    #[test]
    fn weakrefs_unwire_before_the_class_reference_drops() {
        let mut engine = engine();
        let cid = engine.register_class("watched", None, None, None).unwrap();
        let o = engine.alloc(cid, Box::new(())).unwrap();
        let w = engine.make_weakref(o);
        engine.disown(o);
        let Value::Weak(w) = w else { panic!() };
        assert_eq!(engine.weak_deref(w), Value::Nil);
        engine.disown_value(Value::Weak(w));
    }
}
