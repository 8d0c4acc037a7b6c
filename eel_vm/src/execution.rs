// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The engine itself: lifecycle, the exception facility, the compile-path
//! unwind mechanism and the host↔script call bridge.

pub(crate) mod call;
pub(crate) mod engine;
pub(crate) mod exception;
pub(crate) mod unwind;

pub use crate::modules::registry::CompileFn;
pub use call::NativeFn;
pub use engine::{Engine, Options};
pub use exception::{Exception, MessageKind, SourcePos, XResult, Xdef};
