//! Transparent mode: a shared library that replaces `malloc`, `calloc`,
//! `realloc` and `free` for every caller in the process.
//!
//! ```text
//! LD_PRELOAD=target/release/libdebmalloc_preload.so DEBMALLOC_PRIORITY=6 ./app
//! ```
//!
//! The replacements reach the real routines through the table bound by the
//! load-time constructor below. The library also exports the call-site
//! entry points declared in `include/debmalloc.h`, for C code that only wants
//! some of its calls traced.
//!
//! Nothing on these paths may allocate through Rust's global allocator:
//! records are rendered by the allocation-free default sink.

#![allow(clippy::missing_safety_doc)]

use std::{
    ffi::{c_char, c_int, c_long},
    sync::atomic::{AtomicU8, Ordering},
};

use debmalloc::{
    ffi::{priority_from_c, site_from_c},
    Bound, Instrumented, Priority, DEFAULT_PRIORITY,
};
use libc::{c_void, size_t};

static TRANSPARENT: Instrumented<Bound> = Instrumented::new(Bound);

/// Priority of the records emitted by the replaced routines.
static PRIORITY: AtomicU8 = AtomicU8::new(DEFAULT_PRIORITY);

#[inline]
fn priority() -> Priority {
    PRIORITY.load(Ordering::Relaxed)
}

unsafe extern "C" fn init_debmalloc() {
    if let Some(priority) = debmalloc::config::priority_from_env() {
        PRIORITY.store(priority, Ordering::Relaxed);
    }

    if let Err(err) = debmalloc::bind() {
        debmalloc::fatal(err);
    }
}

#[cfg(target_os = "linux")]
#[link_section = ".init_array"]
#[used]
static INIT_DEBMALLOC: unsafe extern "C" fn() = init_debmalloc;

#[cfg(target_os = "macos")]
#[link_section = "__DATA,__mod_init_func"]
#[used]
static INIT_DEBMALLOC: unsafe extern "C" fn() = init_debmalloc;

#[no_mangle]
pub unsafe extern "C" fn malloc(size: size_t) -> *mut c_void {
    TRANSPARENT.malloc(size, priority(), &debmalloc::site!())
}

#[no_mangle]
pub unsafe extern "C" fn calloc(nmemb: size_t, size: size_t) -> *mut c_void {
    TRANSPARENT.calloc(nmemb, size, priority(), &debmalloc::site!())
}

#[no_mangle]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: size_t) -> *mut c_void {
    TRANSPARENT.realloc(ptr, size, priority(), &debmalloc::site!())
}

#[no_mangle]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    TRANSPARENT.free(ptr, priority(), &debmalloc::site!())
}

#[no_mangle]
pub unsafe extern "C" fn debmalloc_malloc(
    size: size_t,
    priority: c_int,
    file: *const c_char,
    line: c_long,
    func: *const c_char,
) -> *mut c_void {
    TRANSPARENT.malloc(size, priority_from_c(priority), &site_from_c(file, line, func))
}

#[no_mangle]
pub unsafe extern "C" fn debmalloc_calloc(
    nmemb: size_t,
    size: size_t,
    priority: c_int,
    file: *const c_char,
    line: c_long,
    func: *const c_char,
) -> *mut c_void {
    TRANSPARENT.calloc(nmemb, size, priority_from_c(priority), &site_from_c(file, line, func))
}

#[no_mangle]
pub unsafe extern "C" fn debmalloc_realloc(
    ptr: *mut c_void,
    size: size_t,
    priority: c_int,
    file: *const c_char,
    line: c_long,
    func: *const c_char,
) -> *mut c_void {
    TRANSPARENT.realloc(ptr, size, priority_from_c(priority), &site_from_c(file, line, func))
}

#[no_mangle]
pub unsafe extern "C" fn debmalloc_free(
    ptr: *mut c_void,
    priority: c_int,
    file: *const c_char,
    line: c_long,
    func: *const c_char,
) {
    TRANSPARENT.free(ptr, priority_from_c(priority), &site_from_c(file, line, func))
}

#[no_mangle]
pub unsafe extern "C" fn debmalloc_strdup(
    s: *const c_char,
    priority: c_int,
    file: *const c_char,
    line: c_long,
    func: *const c_char,
) -> *mut c_char {
    TRANSPARENT.strdup(s, priority_from_c(priority), &site_from_c(file, line, func))
}

#[no_mangle]
pub unsafe extern "C" fn debmalloc_strndup(
    s: *const c_char,
    n: size_t,
    priority: c_int,
    file: *const c_char,
    line: c_long,
    func: *const c_char,
) -> *mut c_char {
    TRANSPARENT.strndup(s, n, priority_from_c(priority), &site_from_c(file, line, func))
}
