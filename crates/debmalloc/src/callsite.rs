//! Call-site mode: tracing only the calls a lexical scope opts into.
//!
//! A scope declares its activation with [`priority!`](crate::priority),
//! which defines a `DEBMALLOC_PRIORITY` constant. The call macros
//! ([`malloc!`](crate::malloc), [`free!`](crate::free), ..) read whichever
//! `DEBMALLOC_PRIORITY` is visible where they are written, so an inner block
//! or module can switch tracing off, or on at another priority, for the calls
//! it contains:
//!
//! ```
//! debmalloc::priority!(7);
//!
//! fn traced() {
//!     unsafe {
//!         let p = debmalloc::malloc!(1024);
//!         debmalloc::free!(p);
//!     }
//! }
//!
//! fn quiet() {
//!     debmalloc::priority!(off);
//!
//!     unsafe {
//!         let p = debmalloc::malloc!(1024);
//!         debmalloc::free!(p);
//!     }
//! }
//! # traced();
//! # quiet();
//! ```
//!
//! Traced calls go to the ordinary routines through [`Instrumented`], so no
//! symbol lookup is involved.

use std::ffi::c_char;

use libc::c_void;

use crate::{
    emitter::{Priority, Site},
    interpose::{Instrumented, Libc, RealAlloc},
};

static CALL_SITE: Instrumented<Libc> = Instrumented::new(Libc);

/// Whether the calls of a scope are traced, and at which priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Off,
    On(Priority),
}

impl Activation {
    /// The effective priority. Always `None` without the `enabled` feature.
    pub const fn priority(self) -> Option<Priority> {
        match self {
            Activation::On(priority) if cfg!(feature = "enabled") => Some(priority),
            _ => None,
        }
    }

    pub unsafe fn malloc(self, size: usize, site: Site<'_>) -> *mut c_void {
        match self.priority() {
            Some(priority) => CALL_SITE.malloc(size, priority, &site),
            None => Libc.malloc(size),
        }
    }

    pub unsafe fn calloc(self, count: usize, size: usize, site: Site<'_>) -> *mut c_void {
        match self.priority() {
            Some(priority) => CALL_SITE.calloc(count, size, priority, &site),
            None => Libc.calloc(count, size),
        }
    }

    pub unsafe fn realloc(self, ptr: *mut c_void, size: usize, site: Site<'_>) -> *mut c_void {
        match self.priority() {
            Some(priority) => CALL_SITE.realloc(ptr, size, priority, &site),
            None => Libc.realloc(ptr, size),
        }
    }

    pub unsafe fn free(self, ptr: *mut c_void, site: Site<'_>) {
        match self.priority() {
            Some(priority) => CALL_SITE.free(ptr, priority, &site),
            None => Libc.free(ptr),
        }
    }

    pub unsafe fn strdup(self, s: *const c_char, site: Site<'_>) -> *mut c_char {
        match self.priority() {
            Some(priority) => CALL_SITE.strdup(s, priority, &site),
            None => Libc.strdup(s),
        }
    }

    pub unsafe fn strndup(self, s: *const c_char, n: usize, site: Site<'_>) -> *mut c_char {
        match self.priority() {
            Some(priority) => CALL_SITE.strndup(s, n, priority, &site),
            None => Libc.strndup(s, n),
        }
    }
}
