// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Class descriptors and the per-engine class table.
//!
//! A class is a plain record stored as the payload of an object of the
//! reserved class class, so classes are themselves reference counted: every
//! instance owns its class. Generic operations find behaviour by indexing
//! the descriptor's metamethod table with a fixed enum; there are no
//! per-object vtables, which lets hosts extend the type system without
//! linking against it.

use core::any::Any;
use std::rc::Rc;

use crate::execution::engine::Engine;
use crate::execution::exception::{Exception, XResult};
use crate::heap::arena::Obj;
use crate::types::value::Value;

/// Index into the engine's class table. The low ids are reserved: scalar
/// value tags double as classes so that every value has a class, printable
/// and castable like any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub(crate) u16);

impl ClassId {
    pub const NIL: ClassId = ClassId(0);
    pub const REAL: ClassId = ClassId(1);
    pub const INTEGER: ClassId = ClassId(2);
    pub const BOOLEAN: ClassId = ClassId(3);
    pub const TYPEID: ClassId = ClassId(4);
    pub const CLASSID: ClassId = ClassId(5);
    pub const OBJREF: ClassId = ClassId(6);
    pub const WEAKREF: ClassId = ClassId(7);
    /// The class of class objects themselves.
    pub const CLASS: ClassId = ClassId(8);
    pub const STRING: ClassId = ClassId(9);
    pub const MODULE: ClassId = ClassId(10);
    pub const CFUNCTION: ClassId = ClassId(11);

    pub(crate) const RESERVED: u16 = 12;

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Constructor callback: build an instance of `class_id` from the
/// initializer values and return an owning result.
pub type ConstructorFn = fn(&mut Engine, ClassId, &[Value]) -> XResult<Value>;

/// Destructor callback. Returning `Err(Exception::REFUSE)` keeps the object
/// alive (it is zombified and the next disown retries); any other error is
/// logged and treated as consent.
pub type DestructorFn = fn(&mut Engine, Obj) -> XResult<()>;

/// Metamethod callback: `(object, op1, op2)` where `op2` doubles as the
/// result slot. Anything stored into the result slot must be owned for the
/// caller, and nothing may be written to it on the error path.
pub type MetamethodFn = fn(&mut Engine, Obj, &Value, &mut Value) -> XResult<()>;

/// The fixed metamethod table layout. Discriminants are stable; for the
/// arithmetic family the in-place form is always `forward + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Metamethod {
    GetIndex,
    SetIndex,
    Insert,
    Delete,
    Length,
    Compare,
    Eq,
    Cast,
    Add,
    AddAssign,
    Sub,
    SubAssign,
    Mul,
    MulAssign,
    Div,
    DivAssign,
    Mod,
    ModAssign,
    Power,
    PowerAssign,
    RevAdd,
    RevAddAssign,
    RevSub,
    RevSubAssign,
    RevMul,
    RevMulAssign,
    RevDiv,
    RevDivAssign,
    RevMod,
    RevModAssign,
    RevPower,
    RevPowerAssign,
    VecAdd,
    VecAddAssign,
    VecSub,
    VecSubAssign,
    VecMul,
    VecMulAssign,
    VecDiv,
    VecDivAssign,
    VecMod,
    VecModAssign,
    VecPower,
    VecPowerAssign,
    VecRevAdd,
    VecRevAddAssign,
    VecRevSub,
    VecRevSubAssign,
    VecRevMul,
    VecRevMulAssign,
    VecRevDiv,
    VecRevDivAssign,
    VecRevMod,
    VecRevModAssign,
    VecRevPower,
    VecRevPowerAssign,
}

impl Metamethod {
    pub const COUNT: usize = Metamethod::VecRevPowerAssign as usize + 1;

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// The in-place form of an arithmetic metamethod.
    pub(crate) fn assign_form(self) -> Metamethod {
        debug_assert!(self >= Metamethod::Add && (self as u8) % 2 == 0);
        // Safety: every even arithmetic discriminant is followed by its
        // assign form.
        unsafe { core::mem::transmute::<u8, Metamethod>(self as u8 + 1) }
    }
}

/// Everything the engine knows about a class.
pub struct ClassDescriptor {
    pub(crate) id: ClassId,
    pub(crate) name: Box<str>,
    pub(crate) ancestor: Option<ClassId>,
    pub(crate) construct: Option<ConstructorFn>,
    pub(crate) destruct: Option<DestructorFn>,
    pub(crate) reconstruct: Option<ConstructorFn>,
    pub(crate) metamethods: [Option<MetamethodFn>; Metamethod::COUNT],
    pub(crate) class_data: Option<Rc<dyn Any>>,
}

impl ClassDescriptor {
    pub(crate) fn new(
        id: ClassId,
        name: &str,
        ancestor: Option<ClassId>,
        construct: Option<ConstructorFn>,
        destruct: Option<DestructorFn>,
    ) -> ClassDescriptor {
        ClassDescriptor {
            id,
            name: name.into(),
            ancestor,
            construct,
            destruct,
            reconstruct: None,
            metamethods: [None; Metamethod::COUNT],
            class_data: None,
        }
    }

    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ancestor(&self) -> Option<ClassId> {
        self.ancestor
    }
}

impl Engine {
    /// Register a new class and return its id. The descriptor is stored as
    /// a fresh class object owned by the engine until close.
    pub fn register_class(
        &mut self,
        name: &str,
        ancestor: Option<ClassId>,
        construct: Option<ConstructorFn>,
        destruct: Option<DestructorFn>,
    ) -> XResult<ClassId> {
        self.check_thread();
        if let Some(a) = ancestor {
            self.class_descriptor(a)?;
        }
        let cid = ClassId(u16::try_from(self.classes.len()).map_err(|_| Exception::BADCLASS)?);
        let descriptor = ClassDescriptor::new(cid, name, ancestor, construct, destruct);
        let object = self.alloc(ClassId::CLASS, Box::new(descriptor))?;
        self.classes.push(Some(object));
        self.casters.grow(self.classes.len());
        Ok(cid)
    }

    /// The class object backing `cid`, if registered.
    pub fn class_object(&self, cid: ClassId) -> Option<Obj> {
        self.classes.get(cid.index()).copied().flatten()
    }

    /// The class id a class object describes.
    pub fn class_cid(&self, class_object: Obj) -> XResult<ClassId> {
        self.payload::<ClassDescriptor>(class_object).map(|d| d.id)
    }

    pub(crate) fn class_descriptor(&self, cid: ClassId) -> XResult<&ClassDescriptor> {
        let object = self.class_object(cid).ok_or(Exception::BADCLASS)?;
        self.arena
            .record(object)
            .payload
            .downcast_ref::<ClassDescriptor>()
            .ok_or(Exception::INTERNAL)
    }

    pub(crate) fn class_descriptor_mut(&mut self, cid: ClassId) -> XResult<&mut ClassDescriptor> {
        let object = self.class_object(cid).ok_or(Exception::BADCLASS)?;
        self.arena
            .record_mut(object)
            .payload
            .downcast_mut::<ClassDescriptor>()
            .ok_or(Exception::INTERNAL)
    }

    /// The interned name of a class; usable on scalar tags as well.
    pub fn type_name(&self, cid: ClassId) -> &str {
        self.class_descriptor(cid)
            .map(|d| &*d.name)
            .unwrap_or("<unknown class>")
    }

    /// Install a metamethod callback on a class.
    pub fn set_metamethod(
        &mut self,
        cid: ClassId,
        mm: Metamethod,
        cb: MetamethodFn,
    ) -> XResult<()> {
        let descriptor = self
            .class_descriptor_mut(cid)
            .map_err(|_| Exception::CANTSETMETHOD)?;
        descriptor.metamethods[mm.index()] = Some(cb);
        Ok(())
    }

    /// Attach opaque host data to a class. Constructors retrieve it with
    /// [`Engine::get_classdata`]; that is the only supported path.
    pub fn set_classdata(&mut self, cid: ClassId, data: Rc<dyn Any>) -> XResult<()> {
        self.class_descriptor_mut(cid)?.class_data = Some(data);
        Ok(())
    }

    pub fn get_classdata(&self, cid: ClassId) -> Option<Rc<dyn Any>> {
        self.class_descriptor(cid).ok()?.class_data.clone()
    }

    /// Rebuild an instance through the class's reconstructor, the path
    /// deserializers use instead of the ordinary constructor.
    pub fn reconstruct(&mut self, class_id: ClassId, initv: &[Value]) -> XResult<Value> {
        let ctor = self
            .class_descriptor(class_id)?
            .reconstruct
            .ok_or(Exception::NOCONSTRUCTOR)?;
        ctor(self, class_id, initv)
    }

    /// Whether `cid` descends from `ancestor` (or is it).
    pub fn class_is_a(&self, cid: ClassId, ancestor: ClassId) -> bool {
        let mut cursor = Some(cid);
        while let Some(c) = cursor {
            if c == ancestor {
                return true;
            }
            cursor = self.class_descriptor(c).ok().and_then(|d| d.ancestor);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::engine::Options;

    #[test]
    fn registration_grows_the_table() {
        let mut engine = Engine::open(Options::default());
        let a = engine.register_class("alpha", None, None, None).unwrap();
        let b = engine
            .register_class("beta", Some(a), None, None)
            .unwrap();
        assert_eq!(a.index() + 1, b.index());
        assert_eq!(engine.type_name(a), "alpha");
        assert_eq!(engine.type_name(b), "beta");
        assert!(engine.class_is_a(b, a));
        assert!(!engine.class_is_a(a, b));
    }

    #[test]
    fn class_objects_resolve_back_to_their_id() {
        let mut engine = Engine::open(Options::default());
        let cid = engine.register_class("gamma", None, None, None).unwrap();
        let object = engine.class_object(cid).unwrap();
        assert_eq!(engine.class_cid(object).unwrap(), cid);
    }

    #[test]
    fn classdata_round_trips() {
        let mut engine = Engine::open(Options::default());
        let cid = engine.register_class("delta", None, None, None).unwrap();
        engine
            .set_classdata(cid, std::rc::Rc::new(17u32))
            .unwrap();
        let data = engine.get_classdata(cid).unwrap();
        assert_eq!(*data.downcast_ref::<u32>().unwrap(), 17);
    }

    #[test]
    fn assign_forms_pair_up() {
        assert_eq!(Metamethod::Add.assign_form(), Metamethod::AddAssign);
        assert_eq!(Metamethod::VecRevMod.assign_form(), Metamethod::VecRevModAssign);
    }
}
