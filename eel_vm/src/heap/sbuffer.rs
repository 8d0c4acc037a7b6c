// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! "Alloc and forget" scratch text buffers.
//!
//! A fixed ring of small buffers used for formatting diagnostics and name
//! lookups without touching the allocator. The ring is sized so that nested
//! formatting during a single error path never exhausts it; if it does, the
//! least recently claimed buffer is reclaimed anyway.

use core::fmt::{self, Write};

pub(crate) const SBUFFERS: usize = 16;
pub(crate) const SBUF_SIZE: usize = 256;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct SbufferId(usize);

struct Sbuffer {
    data: [u8; SBUF_SIZE],
    len: usize,
    in_use: bool,
    stamp: u64,
}

pub(crate) struct SbufferPool {
    bufs: Vec<Sbuffer>,
    clock: u64,
}

impl SbufferPool {
    pub(crate) fn new() -> SbufferPool {
        let bufs = (0..SBUFFERS)
            .map(|_| Sbuffer {
                data: [0; SBUF_SIZE],
                len: 0,
                in_use: false,
                stamp: 0,
            })
            .collect();
        SbufferPool { bufs, clock: 0 }
    }

    /// Claim a buffer. When every buffer is in use, the oldest claim is
    /// forcibly recycled.
    pub(crate) fn alloc(&mut self) -> SbufferId {
        self.clock += 1;
        let id = match self.bufs.iter().position(|b| !b.in_use) {
            Some(i) => SbufferId(i),
            None => {
                let oldest = self
                    .bufs
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, b)| b.stamp)
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                #[cfg(debug_assertions)]
                log::warn!("sbuffer pool exhausted; recycling buffer {oldest}");
                SbufferId(oldest)
            }
        };
        let b = &mut self.bufs[id.0];
        b.in_use = true;
        b.len = 0;
        b.stamp = self.clock;
        id
    }

    pub(crate) fn free(&mut self, id: SbufferId) {
        let b = &mut self.bufs[id.0];
        debug_assert!(b.in_use, "sbuffer freed twice");
        b.in_use = false;
        b.len = 0;
    }

    /// Format into the buffer. Output beyond the buffer size is truncated.
    pub(crate) fn write(&mut self, id: SbufferId, args: fmt::Arguments) {
        let mut w = SbufWriter {
            buf: &mut self.bufs[id.0],
        };
        let _ = w.write_fmt(args);
    }

    pub(crate) fn as_str(&self, id: SbufferId) -> &str {
        let b = &self.bufs[id.0];
        // Only whole UTF-8 fragments are ever appended.
        core::str::from_utf8(&b.data[..b.len]).unwrap_or("")
    }
}

struct SbufWriter<'a> {
    buf: &'a mut Sbuffer,
}

impl Write for SbufWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = SBUF_SIZE - self.buf.len;
        let mut take = s.len().min(room);
        // Back off to a character boundary when truncating.
        while take > 0 && !s.is_char_boundary(take) {
            take -= 1;
        }
        self.buf.data[self.buf.len..self.buf.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.buf.len += take;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_and_reuse() {
        let mut pool = SbufferPool::new();
        let a = pool.alloc();
        pool.write(a, format_args!("module '{}' line {}", "core", 42));
        assert_eq!(pool.as_str(a), "module 'core' line 42");
        pool.free(a);
        let b = pool.alloc();
        assert_eq!(pool.as_str(b), "");
    }

    #[test]
    fn exhaustion_recycles_the_oldest() {
        let mut pool = SbufferPool::new();
        let first = pool.alloc();
        pool.write(first, format_args!("oldest"));
        for _ in 1..SBUFFERS {
            pool.alloc();
        }
        // All claimed; the next claim steals the first one.
        let stolen = pool.alloc();
        assert_eq!(stolen, first);
        assert_eq!(pool.as_str(stolen), "");
    }

    #[test]
    fn truncation_keeps_utf8_boundaries() {
        let mut pool = SbufferPool::new();
        let id = pool.alloc();
        let long = "é".repeat(SBUF_SIZE);
        pool.write(id, format_args!("{long}"));
        assert!(pool.as_str(id).len() <= SBUF_SIZE);
        assert!(pool.as_str(id).chars().all(|c| c == 'é'));
    }
}
