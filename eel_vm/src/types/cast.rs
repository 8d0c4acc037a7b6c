// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The cast matrix.
//!
//! A square table of conversion callbacks indexed by (from, to) class pair.
//! The matrix grows with the class table; scalar interconversions are
//! seeded at engine open. Classes can install entries for their own pairs
//! with [`Engine::set_cast`], and an object class may instead provide a
//! CAST metamethod, which is consulted when no matrix entry exists.

use crate::execution::engine::Engine;
use crate::execution::exception::{Exception, XResult};
use crate::objects::class::{ClassId, Metamethod};
use crate::types::value::Value;

/// Conversion callback: produce an owned value of the target class from
/// `src` (not consumed).
pub type CastFn = fn(&mut Engine, &Value, ClassId) -> XResult<Value>;

#[derive(Default)]
pub(crate) struct CastMatrix {
    dim: usize,
    cells: Vec<Option<CastFn>>,
}

impl CastMatrix {
    pub(crate) fn grow(&mut self, dim: usize) {
        if dim <= self.dim {
            return;
        }
        let mut cells = vec![None; dim * dim];
        for from in 0..self.dim {
            for to in 0..self.dim {
                cells[from * dim + to] = self.cells[from * self.dim + to];
            }
        }
        self.dim = dim;
        self.cells = cells;
    }

    fn get(&self, from: ClassId, to: ClassId) -> Option<CastFn> {
        if from.index() < self.dim && to.index() < self.dim {
            self.cells[from.index() * self.dim + to.index()]
        } else {
            None
        }
    }

    fn set(&mut self, from: ClassId, to: ClassId, cb: CastFn) -> XResult<()> {
        if from.index() >= self.dim || to.index() >= self.dim {
            return Err(Exception::BADCLASS);
        }
        self.cells[from.index() * self.dim + to.index()] = Some(cb);
        Ok(())
    }
}

impl Engine {
    /// Install a conversion callback for the (from, to) class pair.
    pub fn set_cast(&mut self, from: ClassId, to: ClassId, cb: CastFn) -> XResult<()> {
        self.casters.set(from, to, cb)
    }

    /// Convert `src` to the target class, returning an owned result.
    ///
    /// Lookup order: the matrix entry, the source class's CAST metamethod
    /// (objects only), a plain owning copy when source and target classes
    /// already agree. Anything else fails.
    pub fn cast(&mut self, src: &Value, to: ClassId) -> XResult<Value> {
        self.check_thread();
        let from = self.class_of(src);
        if let Some(cb) = self.casters.get(from, to) {
            return cb(self, src, to);
        }
        if let Value::Object(o) = src {
            let mut result = Value::Nil;
            match self.metamethod(*o, Metamethod::Cast, &Value::TypeId(to), &mut result) {
                Ok(()) => return Ok(result),
                Err(Exception::NOMETAMETHOD) => {}
                Err(x) => return Err(x),
            }
        }
        if from == to {
            return Ok(self.copy_value(src));
        }
        Err(Exception::CASTFAILED)
    }

    /// Clone an object through its own class's conversion path.
    pub fn clone_obj(&mut self, o: crate::heap::arena::Obj) -> XResult<Value> {
        let from = Value::Object(o);
        let to = self.class_of(&from);
        self.cast(&from, to)
    }

    pub(crate) fn seed_scalar_casts(&mut self) {
        let pairs: &[(ClassId, ClassId)] = &[
            (ClassId::REAL, ClassId::INTEGER),
            (ClassId::REAL, ClassId::BOOLEAN),
            (ClassId::INTEGER, ClassId::REAL),
            (ClassId::INTEGER, ClassId::BOOLEAN),
            (ClassId::BOOLEAN, ClassId::INTEGER),
            (ClassId::BOOLEAN, ClassId::REAL),
        ];
        for &(from, to) in pairs {
            self.casters
                .set(from, to, cast_scalar)
                .expect("reserved classes are registered before casts");
        }
    }
}

fn cast_scalar(_engine: &mut Engine, src: &Value, to: ClassId) -> XResult<Value> {
    match to {
        ClassId::INTEGER => src.as_integer().map(Value::Integer),
        ClassId::REAL => src.as_real().map(Value::Real),
        ClassId::BOOLEAN => src.as_boolean().map(Value::Boolean),
        _ => Err(Exception::CASTFAILED),
    }
}
