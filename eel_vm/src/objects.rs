// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The object system: headers and reference counting, class descriptors,
//! metamethod dispatch, weak references and the generic operator layer.

pub(crate) mod class;
pub(crate) mod object;
pub(crate) mod operate;
pub(crate) mod weakref;

pub use class::{ClassDescriptor, ClassId, ConstructorFn, DestructorFn, Metamethod, MetamethodFn};
pub use operate::BinOp;
pub use weakref::WeakRef;
