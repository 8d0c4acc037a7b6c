// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Engine-private storage: the object arena, the interned short-string pool
//! and the scratch-buffer ring.

pub(crate) mod arena;
pub(crate) mod sbuffer;
pub(crate) mod string_pool;

pub use arena::Obj;
