// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The tagged value.
//!
//! `Value` is a plain `Copy` union of tag and payload. Copying the bits
//! does *not* transfer ownership: a copy of an objref that should own its
//! target must go through [`Engine::copy_value`], and every owning value
//! must eventually pass through [`Engine::disown_value`], on error paths
//! included. Scalar variants carry no ownership at all.

use crate::execution::engine::Engine;
use crate::execution::exception::{Exception, XResult};
use crate::heap::arena::Obj;
use crate::objects::class::ClassId;
use crate::objects::weakref::WeakRef;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[repr(u8)]
pub enum Value {
    #[default]
    Nil,
    Real(f64),
    Integer(i64),
    Boolean(bool),
    /// A class named as a type, e.g. for `typeof`-style queries.
    TypeId(ClassId),
    /// A class referred to by value, distinct from naming it as a type.
    Class(ClassId),
    /// Owning reference.
    Object(Obj),
    /// Non-owning reference; see [`WeakRef`].
    Weak(WeakRef),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Whether the value is an object reference, weak or strong.
    pub fn is_objref(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Weak(_))
    }

    /// Truthiness: nil is false, numbers by comparison with zero, any
    /// object reference is true.
    pub fn is_true(&self) -> bool {
        match self {
            Value::Nil => false,
            Value::Real(r) => *r != 0.0,
            Value::Integer(i) => *i != 0,
            Value::Boolean(b) => *b,
            Value::TypeId(_) | Value::Class(_) | Value::Object(_) | Value::Weak(_) => true,
        }
    }

    /// The class named by the tag itself. Object references report the
    /// reference classes; use [`Engine::class_of`] for the target's class.
    pub fn type_tag(&self) -> ClassId {
        match self {
            Value::Nil => ClassId::NIL,
            Value::Real(_) => ClassId::REAL,
            Value::Integer(_) => ClassId::INTEGER,
            Value::Boolean(_) => ClassId::BOOLEAN,
            Value::TypeId(_) => ClassId::TYPEID,
            Value::Class(_) => ClassId::CLASSID,
            Value::Object(_) => ClassId::OBJREF,
            Value::Weak(_) => ClassId::WEAKREF,
        }
    }

    /// Scalar integer conversion. Reals truncate toward zero; booleans map
    /// to 0/1; type ids convert to their numeric id.
    pub fn as_integer(&self) -> XResult<i64> {
        match self {
            Value::Integer(i) => Ok(*i),
            Value::Real(r) => Ok(*r as i64),
            Value::Boolean(b) => Ok(*b as i64),
            Value::TypeId(c) | Value::Class(c) => Ok(c.0 as i64),
            _ => Err(Exception::NEEDINTEGER),
        }
    }

    /// Scalar real conversion.
    pub fn as_real(&self) -> XResult<f64> {
        match self {
            Value::Real(r) => Ok(*r),
            Value::Integer(i) => Ok(*i as f64),
            Value::Boolean(b) => Ok(*b as i64 as f64),
            _ => Err(Exception::NEEDREAL),
        }
    }

    /// Scalar boolean conversion (truthiness of scalars).
    pub fn as_boolean(&self) -> XResult<bool> {
        match self {
            Value::Object(_) | Value::Weak(_) => Err(Exception::NEEDBOOLEAN),
            v => Ok(v.is_true()),
        }
    }

    /// The strong object handle, if this is an objref.
    pub fn as_object(&self) -> XResult<Obj> {
        match self {
            Value::Object(o) => Ok(*o),
            _ => Err(Exception::NEEDOBJECT),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Boolean(v)
    }
}

impl From<Obj> for Value {
    fn from(o: Obj) -> Value {
        Value::Object(o)
    }
}

impl Engine {
    /// The class of a value: the target's class for strong references, the
    /// named class for class values, the scalar tag class otherwise.
    pub fn class_of(&self, v: &Value) -> ClassId {
        match v {
            Value::Object(o) => self.arena.record(*o).header.class_id,
            Value::Class(c) => *c,
            other => other.type_tag(),
        }
    }

    /// Owning copy: objrefs gain a reference, weakrefs get a fresh node on
    /// the same target (nil if the target is already gone), scalars are
    /// bitwise.
    pub fn copy_value(&mut self, v: &Value) -> Value {
        match v {
            Value::Object(o) => {
                self.own(*o);
                Value::Object(*o)
            }
            Value::Weak(w) => match self.weak.get(w.node).and_then(|d| d.target) {
                Some(t) => self.make_weakref(t),
                None => Value::Nil,
            },
            scalar => *scalar,
        }
    }

    /// Release whatever `v` owns: objrefs drop a reference, weakrefs detach
    /// their node, scalars are no-ops.
    pub fn disown_value(&mut self, v: Value) {
        match v {
            Value::Object(o) => self.disown(o),
            Value::Weak(w) => self.weak_detach(w),
            _ => {}
        }
    }

    /// Integer conversion that falls back to the cast matrix for objects.
    pub fn to_integer(&mut self, v: &Value) -> XResult<i64> {
        match v {
            Value::Object(_) => {
                let cast = self.cast(v, ClassId::INTEGER)?;
                let r = cast.as_integer();
                self.disown_value(cast);
                r
            }
            scalar => scalar.as_integer(),
        }
    }

    /// Real conversion that falls back to the cast matrix for objects.
    pub fn to_real(&mut self, v: &Value) -> XResult<f64> {
        match v {
            Value::Object(_) => {
                let cast = self.cast(v, ClassId::REAL)?;
                let r = cast.as_real();
                self.disown_value(cast);
                r
            }
            scalar => scalar.as_real(),
        }
    }

    /// Render a value for diagnostics. Objects go through the cast matrix
    /// to the string class when possible.
    pub fn stringify(&mut self, v: &Value) -> String {
        match v {
            Value::Nil => "nil".to_string(),
            Value::Real(r) => r.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::TypeId(c) => format!("<typeid {}>", self.type_name(*c)),
            Value::Class(c) => format!("<class {}>", self.type_name(*c)),
            Value::Object(o) => {
                let o = *o;
                match self.cast(v, ClassId::STRING) {
                    Ok(s) => {
                        let text = s
                            .as_object()
                            .ok()
                            .and_then(|so| self.string_text(so).ok().map(str::to_string))
                            .unwrap_or_default();
                        self.disown_value(s);
                        text
                    }
                    Err(_) => {
                        let cid = self.arena.record(o).header.class_id;
                        format!("<{} instance>", self.type_name(cid))
                    }
                }
            }
            Value::Weak(_) => "<weakref>".to_string(),
        }
    }
}
