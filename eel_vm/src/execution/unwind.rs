// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Non-local unwind for the compiler path.
//!
//! The compiler collaborator aborts parsing on catastrophic errors by
//! throwing an exception code through [`Engine::throw_compile`]; the
//! nearest [`Engine::try_compile`] frame catches it, rewinds exactly the
//! compile contexts pushed since entry (running their cleanups), and
//! returns the code. The interpreter never uses this mechanism; per-call
//! numeric returns keep its hot path unwinding-free.

use std::panic::{self, AssertUnwindSafe};

use crate::execution::engine::Engine;
use crate::execution::exception::{Exception, XResult};

/// Cleanup hook of one compile context.
pub(crate) type ContextCleanup = Box<dyn FnOnce(&mut Engine)>;

/// Typed panic payload carrying a compile-path throw.
struct CompileThrow(Exception);

impl Engine {
    /// Run a compile step under an unwind frame. A
    /// [`Engine::throw_compile`] anywhere below lands here as `Err`; other
    /// panics keep unwinding.
    pub fn try_compile<R>(
        &mut self,
        f: impl FnOnce(&mut Engine) -> XResult<R>,
    ) -> XResult<R> {
        let contexts_at_entry = self.compile_contexts.len();
        self.try_depth += 1;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(self)));
        self.try_depth -= 1;
        match outcome {
            Ok(result) => result,
            Err(payload) => match payload.downcast::<CompileThrow>() {
                Ok(thrown) => {
                    self.rewind_contexts(contexts_at_entry);
                    Err(thrown.0)
                }
                Err(other) => panic::resume_unwind(other),
            },
        }
    }

    /// Abort the current compile step with `x`. Must only be called below
    /// an active [`Engine::try_compile`] frame.
    pub fn throw_compile(&self, x: Exception) -> ! {
        if self.try_depth == 0 {
            log::error!("compile throw with no active try frame");
        }
        panic::panic_any(CompileThrow(x))
    }

    /// Open a compile context. Its cleanup runs when the context is popped,
    /// normally or by an unwind.
    pub fn push_compile_context(&mut self, cleanup: impl FnOnce(&mut Engine) + 'static) {
        self.compile_contexts.push(Box::new(cleanup));
    }

    /// Close the most recent compile context, running its cleanup.
    pub fn pop_compile_context(&mut self) {
        if let Some(cleanup) = self.compile_contexts.pop() {
            cleanup(self);
        }
    }

    pub(crate) fn rewind_contexts(&mut self, to: usize) {
        while self.compile_contexts.len() > to {
            self.pop_compile_context();
        }
    }
}
