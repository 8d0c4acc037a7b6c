// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The host↔script call bridge.
//!
//! Values flow through `engine.heap`, a contiguous array of call slots. On
//! entry to a native callback, `argv`/`argc` describe the argument window
//! and `resv` the result slot. Arguments stay owned by the caller for the
//! duration of the call; anything the callback writes into the result slot
//! must be owned for the caller to take.

use crate::execution::engine::Engine;
use crate::execution::exception::{Exception, MessageKind, XResult};
use crate::heap::arena::Obj;
use crate::modules::module::ModuleData;
use crate::objects::class::ClassId;
use crate::types::value::Value;

/// Host-callable function. Reads the argument window, writes the result
/// slot, returns an exception code on failure. Ownership must balance on
/// every path.
pub type NativeFn = fn(&mut Engine) -> XResult<()>;

/// Payload of a cfunction object: the declared signature plus the callback.
/// `required` fixed arguments, then up to `optional` more, then tuples of
/// `tuple` trailing arguments (when `tuple` is non-zero, `optional` is the
/// tuple count cap and is unchecked, matching variadic declarations).
pub(crate) struct CFunctionData {
    pub(crate) name: Box<str>,
    pub(crate) results: u8,
    pub(crate) required: u8,
    pub(crate) optional: u8,
    pub(crate) tuple: u8,
    pub(crate) cb: NativeFn,
}

impl Engine {
    /// The argument window of the current call.
    pub fn args(&self) -> &[Value] {
        &self.heap[self.argv..self.argv + self.argc]
    }

    /// One argument by position; nil beyond `argc`. The value stays owned
    /// by the caller.
    pub fn arg(&self, index: usize) -> Value {
        if index < self.argc {
            self.heap[self.argv + index]
        } else {
            Value::Nil
        }
    }

    pub fn arg_count(&self) -> usize {
        self.argc
    }

    /// Store the call result, taking ownership of `v`.
    pub fn set_result(&mut self, v: Value) {
        let old = core::mem::replace(&mut self.heap[self.resv], v);
        self.disown_value(old);
    }

    /// Call a cfunction object with the given arguments. Arguments are
    /// copied into a fresh frame (the caller keeps its own references); the
    /// returned value is owned by the caller.
    pub fn call_with_args(&mut self, f: Obj, args: &[Value]) -> XResult<Value> {
        self.check_thread();
        let data = self
            .payload::<CFunctionData>(f)
            .map_err(|_| Exception::NEEDCALLABLE)?;
        let (results, required, optional, tuple, cb) = (
            data.results,
            data.required as usize,
            data.optional as usize,
            data.tuple as usize,
            data.cb,
        );
        if args.len() < required {
            return Err(self.arity_error(f, args.len(), Exception::FEWARGS));
        }
        let extra = args.len() - required;
        if tuple > 0 {
            if extra % tuple != 0 {
                return Err(self.arity_error(f, args.len(), Exception::TUPLEARGS));
            }
        } else if extra > optional {
            return Err(self.arity_error(f, args.len(), Exception::MANYARGS));
        }

        let saved = (self.argv, self.argc, self.resv);
        let base = self.heap.len();
        self.heap.push(Value::Nil);
        for a in args {
            let copy = self.copy_value(a);
            self.heap.push(copy);
        }
        self.resv = base;
        self.argv = base + 1;
        self.argc = args.len();

        let outcome = cb(self);

        let result = core::mem::take(&mut self.heap[base]);
        let frame: Vec<Value> = self.heap.drain(base..).collect();
        (self.argv, self.argc, self.resv) = saved;
        for v in frame {
            self.disown_value(v);
        }

        match outcome {
            Ok(()) => {
                if results == 0 {
                    self.disown_value(result);
                    Ok(Value::Nil)
                } else {
                    Ok(result)
                }
            }
            Err(x) => {
                self.disown_value(result);
                Err(x)
            }
        }
    }

    fn arity_error(&mut self, f: Obj, got: usize, x: Exception) -> Exception {
        if let Ok(data) = self.payload::<CFunctionData>(f) {
            let name = data.name.clone();
            self.emit(
                MessageKind::VmError,
                None,
                format_args!("bad argument count ({got}) in call to '{name}'"),
            );
        }
        x
    }

    /// Fetch the named export from a module and call it.
    pub fn call_by_name(&mut self, module: Obj, name: &str, args: &[Value]) -> XResult<Value> {
        let exports = &self
            .payload::<ModuleData>(module)
            .map_err(|_| Exception::NEEDMODULE)?
            .exports;
        let f = match exports.get(name) {
            Some(Value::Object(o)) => *o,
            Some(_) => return Err(Exception::NEEDCALLABLE),
            None => return Err(Exception::NOTFOUND),
        };
        self.call_with_args(f, args)
    }
}
