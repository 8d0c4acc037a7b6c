// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The interned short-string pool.
//!
//! Interned strings are ordinary objects of the string class; the pool maps
//! a hash to the bucket of live string objects sharing it. The pool itself
//! holds no references: the string class destructor removes an entry when
//! the last owner lets go.

use ahash::RandomState;
use core::hash::BuildHasher;
use hashbrown::HashMap;

use crate::execution::engine::Engine;
use crate::execution::exception::{Exception, XResult};
use crate::heap::arena::Obj;
use crate::objects::class::ClassId;
use crate::types::value::Value;

/// Payload of a string-class object.
pub(crate) struct StringData {
    pub(crate) text: Box<str>,
    pub(crate) hash: u64,
}

pub(crate) struct StringPool {
    buckets: HashMap<u64, Vec<Obj>, RandomState>,
    hasher: RandomState,
}

impl StringPool {
    pub(crate) fn new() -> StringPool {
        StringPool {
            buckets: HashMap::with_hasher(RandomState::new()),
            hasher: RandomState::new(),
        }
    }

    pub(crate) fn hash(&self, s: &str) -> u64 {
        self.hasher.hash_one(s)
    }

    pub(crate) fn find(&self, hash: u64, mut eq: impl FnMut(Obj) -> bool) -> Option<Obj> {
        self.buckets
            .get(&hash)?
            .iter()
            .copied()
            .find(|&o| eq(o))
    }

    pub(crate) fn insert(&mut self, hash: u64, o: Obj) {
        self.buckets.entry(hash).or_default().push(o);
    }

    pub(crate) fn remove(&mut self, hash: u64, o: Obj) {
        if let Some(bucket) = self.buckets.get_mut(&hash) {
            bucket.retain(|&e| e != o);
            if bucket.is_empty() {
                self.buckets.remove(&hash);
            }
        }
    }
}

impl Engine {
    /// Intern `s`, returning an owning handle to the pooled string object.
    pub fn intern(&mut self, s: &str) -> XResult<Obj> {
        let hash = self.strings.hash(s);
        let arena = &self.arena;
        let found = self.strings.find(hash, |o| {
            arena
                .record(o)
                .payload
                .downcast_ref::<StringData>()
                .is_some_and(|d| &*d.text == s)
        });
        if let Some(o) = found {
            self.own(o);
            return Ok(o);
        }
        let o = self.alloc(
            ClassId::STRING,
            Box::new(StringData {
                text: s.into(),
                hash,
            }),
        )?;
        self.strings.insert(hash, o);
        Ok(o)
    }

    /// Intern `s` and wrap it as an owned value.
    pub fn new_string(&mut self, s: &str) -> XResult<Value> {
        self.intern(s).map(Value::Object)
    }

    /// The text of a string object.
    pub fn string_text(&self, o: Obj) -> XResult<&str> {
        self.payload::<StringData>(o).map(|d| &*d.text)
    }

    /// Raw byte view of a bulk-data object. Strings are the only bulk
    /// class the core itself registers.
    pub fn rawdata(&self, o: Obj) -> XResult<&[u8]> {
        match self.payload::<StringData>(o) {
            Ok(d) => Ok(d.text.as_bytes()),
            Err(_) => Err(Exception::CANTREAD),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::engine::Options;

    #[test]
    fn interning_is_idempotent() {
        let mut engine = Engine::open(Options::default());
        let a = engine.intern("fresnel").unwrap();
        let b = engine.intern("fresnel").unwrap();
        assert_eq!(a, b);
        assert_eq!(engine.string_text(a).unwrap(), "fresnel");
        let c = engine.intern("other").unwrap();
        assert_ne!(a, c);
        engine.disown(a);
        engine.disown(b);
        engine.disown(c);
    }

    #[test]
    fn pool_entry_dies_with_the_string() {
        let mut engine = Engine::open(Options::default());
        let live = engine.live_objects();
        let a = engine.intern("transient").unwrap();
        assert_eq!(engine.live_objects(), live + 1);
        engine.disown(a);
        assert_eq!(engine.live_objects(), live);
        // A fresh intern of the same text builds a new object.
        let b = engine.intern("transient").unwrap();
        assert_eq!(engine.live_objects(), live + 1);
        engine.disown(b);
    }
}
