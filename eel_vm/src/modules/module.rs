// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Module objects.
//!
//! A module is an ordinary object of the reserved module class: a named
//! bundle of exports plus an optional unload callback and opaque host data.
//! Its destructor implements the unload contract: during an incremental
//! sweep the callback may refuse (the module is then kept by the
//! dead-module holder), at engine close it may not.

use core::any::Any;

use ahash::AHashMap;

use crate::execution::call::{CFunctionData, NativeFn};
use crate::execution::engine::Engine;
use crate::execution::exception::{Exception, XResult};
use crate::heap::arena::Obj;
use crate::objects::class::{ClassId, ConstructorFn, DestructorFn};
use crate::types::value::Value;

/// Unload callback. `closing` is false during an incremental sweep, where
/// `Err(Exception::REFUSE)` keeps the module alive in the dead-module
/// holder; it is true at engine close, where refusal is not honored.
pub type UnloadFn = fn(&mut Engine, Obj, bool) -> XResult<()>;

pub(crate) struct ModuleData {
    pub(crate) name: Box<str>,
    pub(crate) id: u32,
    pub(crate) unload: Option<UnloadFn>,
    pub(crate) data: Option<Box<dyn Any>>,
    pub(crate) exports: AHashMap<Box<str>, Value>,
}

impl Engine {
    /// Create a module and register it under its (unique) name. The caller
    /// receives the only strong reference; the registry entry is weak.
    pub fn create_module(
        &mut self,
        name: &str,
        unload: Option<UnloadFn>,
        data: Option<Box<dyn Any>>,
    ) -> XResult<Obj> {
        self.check_thread();
        if self.registered_target(name).is_some() {
            return Err(Exception::MODULEINIT);
        }
        let id = self.modules.id_counter;
        self.modules.id_counter += 1;
        let module = self.alloc(
            ClassId::MODULE,
            Box::new(ModuleData {
                name: name.into(),
                id,
                unload,
                data,
                exports: AHashMap::new(),
            }),
        )?;
        // Drop any stale entry before taking the name over.
        if let Some(stale) = self.modules.byname.remove(name) {
            self.disown_value(stale);
        }
        let weak = self.make_weakref(module);
        self.modules.byname.insert(name.into(), weak);
        Ok(module)
    }

    pub fn module_name(&self, module: Obj) -> XResult<&str> {
        self.payload::<ModuleData>(module).map(|d| &*d.name)
    }

    pub fn module_id(&self, module: Obj) -> XResult<u32> {
        self.payload::<ModuleData>(module).map(|d| d.id)
    }

    /// The opaque host data attached at creation.
    pub fn module_data(&self, module: Obj) -> XResult<Option<&dyn Any>> {
        self.payload::<ModuleData>(module)
            .map(|d| d.data.as_deref())
    }

    pub fn module_data_mut(&mut self, module: Obj) -> XResult<Option<&mut dyn Any>> {
        self.payload_mut::<ModuleData>(module)
            .map(|d| d.data.as_deref_mut())
    }

    /// Store an export, taking ownership of `value`. An existing export of
    /// the same name is released.
    pub fn export(&mut self, module: Obj, name: &str, value: Value) -> XResult<()> {
        let data = self
            .payload_mut::<ModuleData>(module)
            .map_err(|_| Exception::NEEDMODULE)?;
        let old = data.exports.insert(name.into(), value);
        if let Some(old) = old {
            self.disown_value(old);
        }
        Ok(())
    }

    /// Fetch an export as an owned copy.
    pub fn get_export(&mut self, module: Obj, name: &str) -> XResult<Value> {
        let v = *self
            .payload::<ModuleData>(module)
            .map_err(|_| Exception::NEEDMODULE)?
            .exports
            .get(name)
            .ok_or(Exception::WRONGINDEX)?;
        Ok(self.copy_value(&v))
    }

    /// Register a native function and export it under `name`.
    pub fn export_cfunction(
        &mut self,
        module: Obj,
        results: u8,
        name: &str,
        required: u8,
        optional: u8,
        tuple: u8,
        cb: NativeFn,
    ) -> XResult<Obj> {
        let f = self.alloc(
            ClassId::CFUNCTION,
            Box::new(CFunctionData {
                name: name.into(),
                results,
                required,
                optional,
                tuple,
                cb,
            }),
        )?;
        if let Err(x) = self.export(module, name, Value::Object(f)) {
            self.disown(f);
            return Err(x);
        }
        Ok(f)
    }

    /// Register a class and export its class object under `name`.
    #[allow(clippy::too_many_arguments)]
    pub fn export_class(
        &mut self,
        module: Obj,
        name: &str,
        ancestor: Option<ClassId>,
        construct: Option<ConstructorFn>,
        destruct: Option<DestructorFn>,
        reconstruct: Option<ConstructorFn>,
    ) -> XResult<Obj> {
        let cid = self.register_class(name, ancestor, construct, destruct)?;
        self.class_descriptor_mut(cid)?.reconstruct = reconstruct;
        let class_object = self
            .class_object(cid)
            .ok_or(Exception::INTERNAL)?;
        self.own(class_object);
        if let Err(x) = self.export(module, name, Value::Object(class_object)) {
            self.disown(class_object);
            return Err(x);
        }
        Ok(class_object)
    }
}

/// Destructor of the module class. Consults the module lock, runs the
/// unload callback with the closing flag, then releases the exports and
/// the registry entry.
pub(crate) fn module_destructor(engine: &mut Engine, module: Obj) -> XResult<()> {
    let closing = engine.closing;
    if engine.modules.lock > 0 && !closing {
        return Err(Exception::REFUSE);
    }
    let unload = engine.payload::<ModuleData>(module)?.unload;
    if let Some(cb) = unload {
        match cb(engine, module, closing) {
            Err(Exception::REFUSE) if !closing => return Err(Exception::REFUSE),
            Err(Exception::REFUSE) => {}
            Err(x) => log::warn!("module unload callback failed ({x:?})"),
            Ok(()) => {}
        }
    }
    let exports: Vec<Value> = engine
        .payload_mut::<ModuleData>(module)?
        .exports
        .drain()
        .map(|(_, v)| v)
        .collect();
    for v in exports {
        engine.disown_value(v);
    }
    engine.unregister_module(module);
    Ok(())
}
