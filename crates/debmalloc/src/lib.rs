//! Tracing wrappers for the `malloc` family, to find leaks and misuse.
//!
//! Every traced call emits two records: one before delegating to the real
//! routine, with the arguments, and one after, with the result. Records carry
//! a priority and the location of the call, and go to a replaceable
//! [`Sink`]. The default sink prints one line per record on standard error:
//!
//! ```text
//! src/main.rs:12:use_debmalloc():7:malloc(8192)
//! src/main.rs:12:use_debmalloc():7:malloc(8192) = 0x5581f0c2a2a0
//! ```
//!
//! Calls are traced in one of two ways.
//!
//! In call-site mode, a scope opts in with [`priority!`] and writes its calls
//! with the [`malloc!`], [`calloc!`], [`realloc!`], [`free!`], [`strdup!`]
//! and [`strndup!`] macros. Only those calls are traced, and a nested scope
//! can turn tracing off or change the priority.
//!
//! ```
//! use std::ffi::CStr;
//!
//! debmalloc::priority!(7);
//!
//! unsafe {
//!     let copy = debmalloc::strndup!(c"Hello, World!".as_ptr(), 3);
//!     assert_eq!(CStr::from_ptr(copy), c"Hel");
//!     debmalloc::free!(copy);
//! }
//! ```
//!
//! In transparent mode, the `debmalloc-preload` library is loaded with
//! `LD_PRELOAD` and replaces `malloc`, `calloc`, `realloc` and `free` for the
//! whole process, reaching the real routines through the table kept by
//! [`bind`].
//!
//! For a Rust binary, [`DebAlloc`] does the same for the global allocator:
//!
//! ```no_run
//! use debmalloc::DebAlloc;
//!
//! #[global_allocator]
//! static ALLOC: DebAlloc = DebAlloc(5);
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
mod macros;

mod helper;

mod binder;
pub use binder::*;

mod emitter;
pub use emitter::*;

mod interpose;
pub use interpose::*;

mod callsite;
pub use callsite::*;

mod global;
pub use global::*;

pub mod capture;
pub mod config;
pub mod ffi;

pub use libc::c_void;
