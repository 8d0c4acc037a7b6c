// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The module registry.
//!
//! The registry maps names to *weak* references, so it never extends a
//! module's lifetime; the circular import set and the dead-module holder
//! sit beside it. Loading drives the host's compile hook under the module
//! lock.

use ahash::{AHashMap, AHashSet};

use crate::execution::engine::Engine;
use crate::execution::exception::{Exception, XResult};
use crate::heap::arena::Obj;
use crate::types::value::Value;

/// Flags for the load paths and [`Engine::get_loaded_module`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadFlags(u32);

impl LoadFlags {
    pub const NONE: LoadFlags = LoadFlags(0);
    /// Loads and lookups may resolve to an already registered module.
    pub const ALLOW_SHARED: LoadFlags = LoadFlags(1);
    /// The loaded module is a private instance, kept out of the registry.
    pub const NO_SHARED: LoadFlags = LoadFlags(2);

    pub fn contains(self, other: LoadFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for LoadFlags {
    type Output = LoadFlags;

    fn bitor(self, rhs: LoadFlags) -> LoadFlags {
        LoadFlags(self.0 | rhs.0)
    }
}

/// Source handed to the compile hook.
pub struct ModuleSource<'a> {
    pub name: &'a str,
    pub text: &'a [u8],
}

/// Compile hook: build a module object from source. Installed through
/// [`Options::compile`](crate::Options); the hook is expected to call
/// [`Engine::create_module`] and populate the exports.
pub type CompileFn = fn(&mut Engine, &ModuleSource<'_>, LoadFlags) -> XResult<Obj>;

pub(crate) struct ModuleRegistry {
    /// name → weak reference.
    pub(crate) byname: AHashMap<Box<str>, Value>,
    /// Strong references to modules that declined an incremental sweep.
    pub(crate) dead: Vec<Obj>,
    /// Names currently being loaded; a repeat is a circular import.
    pub(crate) loading: AHashSet<Box<str>>,
    pub(crate) lock: u32,
    pub(crate) id_counter: u32,
}

impl ModuleRegistry {
    pub(crate) fn new() -> ModuleRegistry {
        ModuleRegistry {
            byname: AHashMap::new(),
            dead: Vec::new(),
            loading: AHashSet::new(),
            lock: 0,
            id_counter: 0,
        }
    }
}

impl Engine {
    /// Compile and load a module from a file.
    pub fn load(&mut self, filename: &str, flags: LoadFlags) -> XResult<Obj> {
        let text = std::fs::read(filename).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                Exception::FILEOPEN
            }
            _ => Exception::FILEREAD,
        })?;
        self.load_source(filename, &text, flags)
    }

    /// Compile and load a module from an in-memory buffer.
    pub fn load_buffer(&mut self, name: &str, text: &[u8], flags: LoadFlags) -> XResult<Obj> {
        self.load_source(name, text, flags)
    }

    fn load_source(&mut self, name: &str, text: &[u8], flags: LoadFlags) -> XResult<Obj> {
        self.check_thread();
        if flags.contains(LoadFlags::ALLOW_SHARED)
            && let Ok(existing) = self.get_loaded_module(name, LoadFlags::ALLOW_SHARED)
        {
            return Ok(existing);
        }
        let compile = self.compile.ok_or(Exception::MODULELOAD)?;
        if !self.modules.loading.insert(name.into()) {
            // Already on the load stack: circular import.
            return Err(Exception::MODULELOAD);
        }
        self.lock_modules();
        let outcome = compile(self, &ModuleSource { name, text }, flags);
        self.modules.loading.remove(name);
        self.unlock_modules();
        let module = outcome?;
        if flags.contains(LoadFlags::NO_SHARED) {
            self.unregister_module(module);
        }
        Ok(module)
    }

    /// Resolve a registered module by name. Fails unless `ALLOW_SHARED` is
    /// set; the returned reference is owned by the caller.
    pub fn get_loaded_module(&mut self, name: &str, flags: LoadFlags) -> XResult<Obj> {
        if !flags.contains(LoadFlags::ALLOW_SHARED) {
            return Err(Exception::WRONGINDEX);
        }
        let Some(&entry) = self.modules.byname.get(name) else {
            return Err(Exception::WRONGINDEX);
        };
        let Value::Weak(w) = entry else {
            return Err(Exception::WRONGINDEX);
        };
        match self.weak_deref(w) {
            Value::Object(module) => Ok(module),
            _ => {
                // The module died; prune the stale entry.
                if let Some(stale) = self.modules.byname.remove(name) {
                    self.disown_value(stale);
                }
                Err(Exception::WRONGINDEX)
            }
        }
    }

    /// Suppress module unloading until the matching unlock.
    pub fn lock_modules(&mut self) {
        self.modules.lock += 1;
    }

    /// Release one module lock; at zero, sweep the dead-module holder.
    pub fn unlock_modules(&mut self) {
        debug_assert!(self.modules.lock > 0, "unbalanced module unlock");
        self.modules.lock = self.modules.lock.saturating_sub(1);
        if self.modules.lock == 0 {
            self.sweep_modules();
        }
    }

    /// Offer every module in the dead-module holder another chance to
    /// unload. Modules that refuse again stay in the holder.
    pub fn sweep_modules(&mut self) {
        if self.modules.lock > 0 {
            return;
        }
        let dead: Vec<Obj> = self.modules.dead.drain(..).collect();
        for module in dead {
            // A refusal re-enters the holder through the destructor path.
            self.disown(module);
        }
    }

    /// Drop the registry entry that points at `module`, if any.
    pub(crate) fn unregister_module(&mut self, module: Obj) {
        let Ok(name) = self.module_name(module).map(Box::<str>::from) else {
            return;
        };
        if self.registered_target(&name) == Some(module)
            && let Some(entry) = self.modules.byname.remove(&*name)
        {
            self.disown_value(entry);
        }
    }

    /// Non-owning peek at the registered module under `name`.
    pub(crate) fn registered_target(&self, name: &str) -> Option<Obj> {
        match self.modules.byname.get(name) {
            Some(Value::Weak(w)) => self.weak.get(w.node).and_then(|d| d.target),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::engine::Options;
    use crate::types::value::Value;

    fn compile_hook(engine: &mut Engine, source: &ModuleSource<'_>, _flags: LoadFlags) -> XResult<Obj> {
        if source.text == b"bad" {
            return Err(Exception::COMPILE);
        }
        if source.text == b"import self" {
            // A circular import re-enters the load path for our own name.
            return engine.load_buffer(source.name, b"import self", LoadFlags::NONE);
        }
        let module = engine.create_module(source.name, None, None)?;
        engine.export(module, "size", Value::Integer(source.text.len() as i64))?;
        Ok(module)
    }

    fn opts() -> Options {
        Options {
            compile: Some(compile_hook),
            ..Default::default()
        }
    }

    #[test]
    fn loaded_modules_register_and_resolve() {
        let mut engine = Engine::open(opts());
        let bar = engine
            .load_buffer("bar", b"export something", LoadFlags::NONE)
            .unwrap();
        let found = engine
            .get_loaded_module("bar", LoadFlags::ALLOW_SHARED)
            .unwrap();
        assert_eq!(found, bar);
        engine.disown(found);
        assert_eq!(
            engine.get_export(bar, "size").unwrap(),
            Value::Integer(16)
        );
        // Without ALLOW_SHARED the lookup must not resolve.
        assert_eq!(
            engine.get_loaded_module("bar", LoadFlags::NONE).unwrap_err(),
            Exception::WRONGINDEX
        );
        engine.disown(bar);
        // The registry held only a weak reference; bar is gone now.
        assert_eq!(
            engine
                .get_loaded_module("bar", LoadFlags::ALLOW_SHARED)
                .unwrap_err(),
            Exception::WRONGINDEX
        );
    }

    #[test]
    fn no_shared_loads_stay_private() {
        let mut engine = Engine::open(opts());
        let foo = engine
            .load_buffer("foo", b"text", LoadFlags::NO_SHARED)
            .unwrap();
        assert_eq!(
            engine
                .get_loaded_module("foo", LoadFlags::ALLOW_SHARED)
                .unwrap_err(),
            Exception::WRONGINDEX
        );
        engine.disown(foo);
    }

    #[test]
    fn shared_loads_reuse_the_registered_module() {
        let mut engine = Engine::open(opts());
        let a = engine
            .load_buffer("shared", b"text", LoadFlags::ALLOW_SHARED)
            .unwrap();
        let b = engine
            .load_buffer("shared", b"different text", LoadFlags::ALLOW_SHARED)
            .unwrap();
        assert_eq!(a, b);
        engine.disown(a);
        engine.disown(b);
    }

    #[test]
    fn circular_imports_are_rejected() {
        let mut engine = Engine::open(opts());
        assert_eq!(
            engine
                .load_buffer("loop", b"import self", LoadFlags::NONE)
                .unwrap_err(),
            Exception::MODULELOAD
        );
    }

    #[test]
    fn compile_failures_clean_up_the_load_stack() {
        let mut engine = Engine::open(opts());
        assert_eq!(
            engine.load_buffer("broken", b"bad", LoadFlags::NONE).unwrap_err(),
            Exception::COMPILE
        );
        // The name is free again.
        let ok = engine.load_buffer("broken", b"fine", LoadFlags::NONE).unwrap();
        engine.disown(ok);
    }

    fn refuse_unload(_engine: &mut Engine, _module: Obj, closing: bool) -> XResult<()> {
        if closing { Ok(()) } else { Err(Exception::REFUSE) }
    }

    #[test]
    fn refusing_modules_move_to_the_dead_holder() {
        let mut engine = Engine::open(opts());
        let m = engine
            .create_module("clingy", Some(refuse_unload), None)
            .unwrap();
        engine.disown(m);
        // The module refused to unload: still resolvable via the registry.
        let again = engine
            .get_loaded_module("clingy", LoadFlags::ALLOW_SHARED)
            .unwrap();
        assert_eq!(again, m);
        engine.disown(again);
        // Sweeping offers it another chance; it refuses again and stays.
        engine.sweep_modules();
        assert!(
            engine
                .get_loaded_module("clingy", LoadFlags::ALLOW_SHARED)
                .is_ok_and(|o| {
                    engine.disown(o);
                    true
                })
        );
        // Close honors no refusal.
        engine.close();
    }

    fn accept_unload(_engine: &mut Engine, _module: Obj, _closing: bool) -> XResult<()> {
        Ok(())
    }

    #[test]
    fn module_lock_suppresses_unloading() {
        let mut engine = Engine::open(opts());
        let m = engine
            .create_module("locked", Some(accept_unload), None)
            .unwrap();
        engine.lock_modules();
        engine.disown(m);
        // Still alive: the lock moved it to the dead holder instead.
        let held = engine
            .get_loaded_module("locked", LoadFlags::ALLOW_SHARED)
            .unwrap();
        assert_eq!(held, m);
        engine.disown(held);
        // Unlocking sweeps, and the module accepts this time.
        engine.unlock_modules();
        assert_eq!(
            engine
                .get_loaded_module("locked", LoadFlags::ALLOW_SHARED)
                .unwrap_err(),
            Exception::WRONGINDEX
        );
    }

    #[test]
    fn duplicate_module_names_are_rejected_while_alive() {
        let mut engine = Engine::open(opts());
        let m = engine.create_module("once", None, None).unwrap();
        assert_eq!(
            engine.create_module("once", None, None).unwrap_err(),
            Exception::MODULEINIT
        );
        engine.disown(m);
        // Dead name can be taken again.
        let again = engine.create_module("once", None, None).unwrap();
        engine.disown(again);
    }

    #[test]
    fn module_ids_are_monotonic() {
        let mut engine = Engine::open(opts());
        let a = engine.create_module("a", None, None).unwrap();
        let b = engine.create_module("b", None, None).unwrap();
        assert!(engine.module_id(a).unwrap() < engine.module_id(b).unwrap());
        engine.disown(a);
        engine.disown(b);
    }
}
