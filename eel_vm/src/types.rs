// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The value model: the tagged [`Value`] union and the cast matrix.

pub(crate) mod cast;
pub(crate) mod value;

pub use cast::CastFn;
pub use value::Value;
