//! Conversions for the arguments C callers pass to the traced entry points.

use std::ffi::{c_char, c_int, c_long, CStr};

use crate::emitter::{Priority, Site};

/// Clamps a C `int` priority into [`Priority`].
pub fn priority_from_c(priority: c_int) -> Priority {
    Priority::try_from(priority.max(0)).unwrap_or(Priority::MAX)
}

/// Location arguments as passed by `__FILE__`, `__LINE__` and `__func__`.
///
/// Null or non-UTF-8 names show as `?`, out-of-range lines as 0.
///
/// # Safety
///
/// `file` and `func` must be null or point to NUL-terminated strings that
/// outlive `'a`.
pub unsafe fn site_from_c<'a>(file: *const c_char, line: c_long, func: *const c_char) -> Site<'a> {
    Site::new(c_str(file), u32::try_from(line).unwrap_or(0), c_str(func))
}

unsafe fn c_str<'a>(s: *const c_char) -> &'a str {
    if s.is_null() {
        return "?";
    }

    CStr::from_ptr(s).to_str().unwrap_or("?")
}

#[cfg(test)]
mod tests {
    use std::ptr;

    use super::*;

    #[test]
    fn priorities_are_clamped() {
        assert_eq!(priority_from_c(-1), 0);
        assert_eq!(priority_from_c(0), 0);
        assert_eq!(priority_from_c(7), 7);
        assert_eq!(priority_from_c(255), 255);
        assert_eq!(priority_from_c(300), 255);
        assert_eq!(priority_from_c(c_int::MIN), 0);
    }

    #[test]
    fn sites_from_c_strings() {
        let site = unsafe { site_from_c(c"main.c".as_ptr(), 12, c"use_debmalloc".as_ptr()) };
        assert_eq!(site, Site::new("main.c", 12, "use_debmalloc"));

        let site = unsafe { site_from_c(ptr::null(), -4, c"\xff".as_ptr()) };
        assert_eq!(site, Site::new("?", 0, "?"));
    }
}
