// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The engine: one self-contained runtime instance.
//!
//! An engine owns everything: the object arena, the class table, the cast
//! matrix, the module registry, the string pool, the call-slot heap and the
//! diagnostics machinery. Engines are strictly single-threaded; a host that
//! wants parallelism opens one engine per thread and never shares handles
//! between them. Debug builds assert on cross-thread access.

use ahash::AHashMap;
use std::thread::{self, ThreadId};

use crate::execution::exception::{ClientExceptions, EngineMessage, XResult};
use crate::execution::unwind::ContextCleanup;
use crate::heap::arena::{Arena, Obj};
use crate::heap::sbuffer::SbufferPool;
use crate::heap::string_pool::{StringData, StringPool};
use crate::modules::registry::{CompileFn, ModuleRegistry};
use crate::objects::class::ClassId;
use crate::objects::weakref::WeakTable;
use crate::types::cast::CastMatrix;
use crate::types::value::Value;

/// Host configuration for [`Engine::open`].
#[derive(Debug, Default)]
pub struct Options {
    /// Compile hook invoked by the load paths. Without one, loading fails.
    pub compile: Option<CompileFn>,
    /// Instruction budget; exhausting it surfaces `Exception::COUNTER`.
    pub runlimit: Option<u64>,
    /// Cooperative-yield period; reaching it surfaces `Exception::YIELD`.
    pub yield_interval: Option<u64>,
}

pub struct Engine {
    pub(crate) arena: Arena,
    pub(crate) weak: WeakTable,
    pub(crate) classes: Vec<Option<Obj>>,
    pub(crate) casters: CastMatrix,
    pub(crate) strings: StringPool,
    pub(crate) sbuffers: SbufferPool,
    pub(crate) modules: ModuleRegistry,
    pub(crate) exceptions: ClientExceptions,
    pub(crate) messages: Vec<EngineMessage>,

    environment: AHashMap<Box<str>, Value>,
    root_symbols: AHashMap<Box<str>, Value>,

    // Call bridge state; see execution/call.rs.
    pub(crate) heap: Vec<Value>,
    pub(crate) argv: usize,
    pub(crate) argc: usize,
    pub(crate) resv: usize,

    pub(crate) compile: Option<CompileFn>,
    pub(crate) compile_contexts: Vec<ContextCleanup>,
    pub(crate) try_depth: usize,

    pub(crate) limbo_head: Option<Obj>,
    pub(crate) closing: bool,
    closed: bool,

    runlimit: Option<u64>,
    yield_interval: Option<u64>,
    since_yield: u64,

    thread: ThreadId,
}

impl Engine {
    /// Open a fresh engine: reserved classes registered, scalar casts
    /// seeded, everything else empty.
    pub fn open(options: Options) -> Engine {
        let mut engine = Engine {
            arena: Arena::default(),
            weak: WeakTable::default(),
            classes: Vec::new(),
            casters: CastMatrix::default(),
            strings: StringPool::new(),
            sbuffers: SbufferPool::new(),
            modules: ModuleRegistry::new(),
            exceptions: ClientExceptions::new(),
            messages: Vec::new(),
            environment: AHashMap::new(),
            root_symbols: AHashMap::new(),
            heap: Vec::new(),
            argv: 0,
            argc: 0,
            resv: 0,
            compile: options.compile,
            compile_contexts: Vec::new(),
            try_depth: 0,
            limbo_head: None,
            closing: false,
            closed: false,
            runlimit: options.runlimit,
            yield_interval: options.yield_interval,
            since_yield: 0,
            thread: thread::current().id(),
        };
        engine.register_reserved_classes();
        engine.seed_scalar_casts();
        engine
    }

    /// Close the engine, releasing every module, class and object it still
    /// holds. Module unload callbacks run with the closing flag set and may
    /// not refuse.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn register_reserved_classes(&mut self) {
        use crate::objects::class::{ConstructorFn, DestructorFn};
        // Registration order is the reserved id order; `register_class`
        // hands out ids sequentially from an empty table.
        let reserved: &[(&str, ClassId)] = &[
            ("nil", ClassId::NIL),
            ("real", ClassId::REAL),
            ("integer", ClassId::INTEGER),
            ("boolean", ClassId::BOOLEAN),
            ("typeid", ClassId::TYPEID),
            ("classid", ClassId::CLASSID),
            ("objref", ClassId::OBJREF),
            ("weakref", ClassId::WEAKREF),
            ("class", ClassId::CLASS),
            ("string", ClassId::STRING),
            ("module", ClassId::MODULE),
            ("cfunction", ClassId::CFUNCTION),
        ];
        for &(name, expected) in reserved {
            let (destruct, construct): (Option<DestructorFn>, Option<ConstructorFn>) =
                match expected {
                    ClassId::STRING => (Some(string_destructor), None),
                    ClassId::MODULE => (Some(crate::modules::module::module_destructor), None),
                    _ => (None, None),
                };
            let cid = self
                .register_class(name, None, construct, destruct)
                .expect("reserved class registration cannot fail");
            debug_assert_eq!(cid, expected);
        }
        debug_assert_eq!(self.classes.len(), ClassId::RESERVED as usize);
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closing = true;
        self.compile_contexts.clear();

        // Modules first: drop the registry's weak entries, then the
        // dead-module holder's strong ones. Unload callbacks see closing.
        let weak_entries: Vec<Value> = self.modules.byname.drain().map(|(_, v)| v).collect();
        for v in weak_entries {
            self.disown_value(v);
        }
        let dead: Vec<Obj> = self.modules.dead.drain(..).collect();
        for m in dead {
            self.disown(m);
        }
        self.modules.loading.clear();

        // Host-visible tables.
        let env: Vec<Value> = self.environment.drain().map(|(_, v)| v).collect();
        for v in env {
            self.disown_value(v);
        }
        let roots: Vec<Value> = self.root_symbols.drain().map(|(_, v)| v).collect();
        for v in roots {
            self.disown_value(v);
        }
        let slots: Vec<Value> = self.heap.drain(..).collect();
        for v in slots {
            self.disown_value(v);
        }

        // Anything still refusing to die goes now.
        self.flush_limbo();

        // Classes last, in reverse registration order, so instances of late
        // classes have already released their class references.
        for index in (0..self.classes.len()).rev() {
            if let Some(class_object) = self.classes[index].take() {
                self.disown(class_object);
            }
        }

        let leaked = self.arena.live();
        if leaked > 0 {
            log::warn!(
                "engine closed with {leaked} leaked object(s) ({} created, {} destroyed)",
                self.arena.created,
                self.arena.destroyed
            );
            #[cfg(debug_assertions)]
            for o in self.arena.live_handles().collect::<Vec<_>>() {
                let class_id = self.class_id_of(o);
                log::warn!("  leaked <{}> instance ({:?})", self.type_name(class_id), o);
            }
        }
        self.closed = true;
    }

    /// Read a configuration entry; the returned value is an owned copy.
    pub fn get_env(&mut self, name: &str) -> Option<Value> {
        let v = *self.environment.get(name)?;
        Some(self.copy_value(&v))
    }

    /// Store a configuration entry, taking ownership of `value`.
    pub fn set_env(&mut self, name: &str, value: Value) {
        if let Some(old) = self.environment.insert(name.into(), value) {
            self.disown_value(old);
        }
    }

    /// Look up a root symbol; the returned value is an owned copy.
    pub fn get_root_symbol(&mut self, name: &str) -> Option<Value> {
        let v = *self.root_symbols.get(name)?;
        Some(self.copy_value(&v))
    }

    /// Bind a root symbol, taking ownership of `value`.
    pub fn set_root_symbol(&mut self, name: &str, value: Value) {
        if let Some(old) = self.root_symbols.insert(name.into(), value) {
            self.disown_value(old);
        }
    }

    /// Replace the instruction budget.
    pub fn set_runlimit(&mut self, limit: Option<u64>) {
        self.runlimit = limit;
    }

    /// Account for `n` executed instructions. Returns `Exception::COUNTER`
    /// when the budget runs out and `Exception::YIELD` at each cooperative
    /// yield period; both are signals to the host, not errors in the
    /// script.
    pub fn consume_instructions(&mut self, n: u64) -> XResult<()> {
        use crate::execution::exception::Exception;
        if let Some(limit) = self.runlimit.as_mut() {
            if *limit < n {
                *limit = 0;
                return Err(Exception::COUNTER);
            }
            *limit -= n;
        }
        if let Some(period) = self.yield_interval {
            self.since_yield += n;
            if self.since_yield >= period {
                self.since_yield = 0;
                return Err(Exception::YIELD);
            }
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn check_thread(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.thread,
            "engine accessed from a foreign thread"
        );
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn string_destructor(engine: &mut Engine, o: Obj) -> XResult<()> {
    let hash = engine.payload::<StringData>(o)?.hash;
    engine.strings.remove(hash, o);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::exception::Exception;

    #[test]
    fn open_registers_the_reserved_classes() {
        let engine = Engine::open(Options::default());
        assert_eq!(engine.type_name(ClassId::NIL), "nil");
        assert_eq!(engine.type_name(ClassId::STRING), "string");
        assert_eq!(engine.type_name(ClassId::MODULE), "module");
        // One class object per reserved class.
        assert_eq!(engine.live_objects(), ClassId::RESERVED as usize);
    }

    #[test]
    fn close_releases_everything() {
        let mut engine = Engine::open(Options::default());
        let cid = engine.register_class("tmp", None, None, None).unwrap();
        let o = engine.alloc(cid, Box::new(())).unwrap();
        engine.set_env("keep", Value::Object(o));
        let s = engine.intern("late string").unwrap();
        engine.set_root_symbol("banner", Value::Object(s));
        // Both objects are owned by engine tables now; close drops them.
        engine.close();
    }

    #[test]
    fn environment_owns_its_values() {
        let mut engine = Engine::open(Options::default());
        let cid = engine.register_class("cfg", None, None, None).unwrap();
        let o = engine.alloc(cid, Box::new(())).unwrap();
        let baseline = engine.live_objects();
        engine.set_env("handle", Value::Object(o));
        // The table holds the only reference now.
        assert_eq!(engine.live_objects(), baseline);
        let copy = engine.get_env("handle").unwrap();
        assert_eq!(copy, Value::Object(o));
        assert_eq!(engine.refcount(o), 2);
        engine.disown_value(copy);
        engine.set_env("handle", Value::Nil);
        assert_eq!(engine.live_objects(), baseline - 1);
    }

    #[test]
    fn runlimit_exhaustion_and_yield() {
        let mut engine = Engine::open(Options {
            runlimit: Some(10),
            yield_interval: Some(4),
            ..Default::default()
        });
        assert_eq!(engine.consume_instructions(3), Ok(()));
        assert_eq!(engine.consume_instructions(3), Err(Exception::YIELD));
        assert_eq!(engine.consume_instructions(3), Ok(()));
        // Budget is now 1.
        assert_eq!(engine.consume_instructions(3), Err(Exception::COUNTER));
        assert_eq!(engine.consume_instructions(1), Err(Exception::COUNTER));
    }

    #[test]
    fn root_symbols_resolve() {
        let mut engine = Engine::open(Options::default());
        engine.set_root_symbol("answer", Value::Integer(42));
        assert_eq!(engine.get_root_symbol("answer"), Some(Value::Integer(42)));
        assert_eq!(engine.get_root_symbol("question"), None);
    }
}
