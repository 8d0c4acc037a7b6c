// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! EEL runtime core.
//!
//! This crate implements the engine an embedding application talks to: the
//! tagged value model, the reference-counted object system with weak
//! references, the class and metamethod registries, the exception facility,
//! the module registry and the host↔script call bridge. The compiler and the
//! bytecode interpreter are external collaborators; they produce the module
//! and function objects this core manages and consume its dispatch and
//! calling conventions.
//!
//! An [`Engine`] is strictly single-threaded. Hosts that want parallelism
//! open one engine per thread; debug builds assert on cross-thread access.

pub mod execution;
pub mod heap;
pub mod modules;
pub mod objects;
pub mod types;

pub use execution::{
    CompileFn, Engine, Exception, MessageKind, NativeFn, Options, SourcePos, XResult, Xdef,
};
pub use heap::Obj;
pub use modules::{LoadFlags, ModuleSource, UnloadFn};
pub use objects::{
    BinOp, ClassDescriptor, ClassId, ConstructorFn, DestructorFn, Metamethod, MetamethodFn,
    WeakRef,
};
pub use types::{CastFn, Value};
