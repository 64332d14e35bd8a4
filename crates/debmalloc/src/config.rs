//! Runtime settings for the preloaded library, read from the environment.
//!
//! Lookups use `getenv(3)` and parse in place: they run from a load-time
//! constructor, before anything may allocate.

use std::ffi::{c_char, CStr};

use crate::emitter::Priority;

/// Overrides the priority of the records emitted by the preloaded
/// `malloc` family.
pub const PRIORITY_ENV: &CStr = c"DEBMALLOC_PRIORITY";

/// The priority named by [`PRIORITY_ENV`], if set and valid.
pub fn priority_from_env() -> Option<Priority> {
    let raw = unsafe { libc::getenv(PRIORITY_ENV.as_ptr()) };

    unsafe { parse_priority(raw) }
}

unsafe fn parse_priority(raw: *const c_char) -> Option<Priority> {
    if raw.is_null() {
        return None;
    }

    CStr::from_ptr(raw).to_str().ok()?.trim().parse().ok()
}
