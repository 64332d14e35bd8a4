use std::{ffi::c_char, fmt, ptr, slice};

use libc::c_void;

use crate::{
    emitter::{emit, Priority, Site},
    helper::Reentrancy,
};

/// A real implementation of the malloc family.
///
/// The interposition layer never allocates by itself: it is handed one of
/// these and delegates every call to it. [`Libc`] calls the routines by
/// name, [`Bound`](crate::Bound) goes through the `dlsym` table.
pub trait RealAlloc {
    unsafe fn malloc(&self, size: usize) -> *mut c_void;

    unsafe fn calloc(&self, count: usize, size: usize) -> *mut c_void;

    unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void;

    unsafe fn free(&self, ptr: *mut c_void);

    /// Copies `s` into a block from [`malloc`](RealAlloc::malloc).
    unsafe fn strdup(&self, s: *const c_char) -> *mut c_char {
        dup_bytes(self, s, libc::strlen(s))
    }

    /// Copies at most `n` bytes of `s` into a NUL-terminated block.
    unsafe fn strndup(&self, s: *const c_char, n: usize) -> *mut c_char {
        dup_bytes(self, s, libc::strnlen(s, n))
    }
}

unsafe fn dup_bytes<A>(real: &A, s: *const c_char, len: usize) -> *mut c_char
where
    A: RealAlloc + ?Sized,
{
    let copy = real.malloc(len + 1) as *mut c_char;

    if !copy.is_null() {
        ptr::copy_nonoverlapping(s, copy, len);
        copy.add(len).write(0);
    }

    copy
}

/// The malloc family as linked by name.
#[derive(Clone, Copy, Debug, Default)]
pub struct Libc;

impl RealAlloc for Libc {
    #[inline]
    unsafe fn malloc(&self, size: usize) -> *mut c_void {
        libc::malloc(size)
    }

    #[inline]
    unsafe fn calloc(&self, count: usize, size: usize) -> *mut c_void {
        libc::calloc(count, size)
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        libc::realloc(ptr, size)
    }

    #[inline]
    unsafe fn free(&self, ptr: *mut c_void) {
        libc::free(ptr)
    }

    #[inline]
    unsafe fn strdup(&self, s: *const c_char) -> *mut c_char {
        libc::strdup(s)
    }

    #[inline]
    unsafe fn strndup(&self, s: *const c_char, n: usize) -> *mut c_char {
        libc::strndup(s, n)
    }
}

/// Wraps a [`RealAlloc`] so that every call emits a record before and after
/// delegating, and returns exactly what the real routine returned.
///
/// Calls made on a thread that is already inside a traced call (an
/// allocating sink, `dlsym` during binding) are delegated without records.
#[derive(Debug, Default)]
pub struct Instrumented<A> {
    real: A,
}

impl<A> Instrumented<A> {
    pub const fn new(real: A) -> Self {
        Self { real }
    }
}

impl<A: RealAlloc> Instrumented<A> {
    pub unsafe fn malloc(&self, size: usize, priority: Priority, site: &Site<'_>) -> *mut c_void {
        let guard = Reentrancy::new();

        if !guard.is_ok() {
            return self.real.malloc(size);
        }

        trace(priority, site, format_args!("malloc({})", size));
        let ptr = self.real.malloc(size);
        trace(priority, site, format_args!("malloc({}) = {:p}", size, ptr));

        ptr
    }

    pub unsafe fn calloc(
        &self,
        count: usize,
        size: usize,
        priority: Priority,
        site: &Site<'_>,
    ) -> *mut c_void {
        let guard = Reentrancy::new();

        if !guard.is_ok() {
            return self.real.calloc(count, size);
        }

        trace(priority, site, format_args!("calloc({}, {})", count, size));
        let ptr = self.real.calloc(count, size);
        trace(
            priority,
            site,
            format_args!("calloc({}, {}) = {:p}", count, size, ptr),
        );

        ptr
    }

    pub unsafe fn realloc(
        &self,
        ptr: *mut c_void,
        size: usize,
        priority: Priority,
        site: &Site<'_>,
    ) -> *mut c_void {
        let guard = Reentrancy::new();

        if !guard.is_ok() {
            return self.real.realloc(ptr, size);
        }

        trace(priority, site, format_args!("realloc({:p}, {})", ptr, size));
        let moved = self.real.realloc(ptr, size);
        trace(
            priority,
            site,
            format_args!("realloc({:p}, {}) = {:p}", ptr, size, moved),
        );

        moved
    }

    pub unsafe fn free(&self, ptr: *mut c_void, priority: Priority, site: &Site<'_>) {
        let guard = Reentrancy::new();

        if !guard.is_ok() {
            return self.real.free(ptr);
        }

        trace(priority, site, format_args!("free({:p})", ptr));
        self.real.free(ptr);
        trace(priority, site, format_args!("free({:p}) = void", ptr));
    }

    pub unsafe fn strdup(
        &self,
        s: *const c_char,
        priority: Priority,
        site: &Site<'_>,
    ) -> *mut c_char {
        let guard = Reentrancy::new();

        if !guard.is_ok() {
            return self.real.strdup(s);
        }

        let text = Text::new(s, None);

        trace(priority, site, format_args!("strdup({})", text));
        let copy = self.real.strdup(s);
        trace(priority, site, format_args!("strdup({}) = {:p}", text, copy));

        copy
    }

    pub unsafe fn strndup(
        &self,
        s: *const c_char,
        n: usize,
        priority: Priority,
        site: &Site<'_>,
    ) -> *mut c_char {
        let guard = Reentrancy::new();

        if !guard.is_ok() {
            return self.real.strndup(s, n);
        }

        let text = Text::new(s, Some(n));

        trace(priority, site, format_args!("strndup({}, {})", text, n));
        let copy = self.real.strndup(s, n);
        trace(
            priority,
            site,
            format_args!("strndup({}, {}) = {:p}", text, n, copy),
        );

        copy
    }
}

#[inline]
fn trace(priority: Priority, site: &Site<'_>, args: fmt::Arguments<'_>) {
    emit(priority, site.file, site.line, site.func, args);
}

/// A C string argument, quoted and escaped for a record.
///
/// With a bound, only the bytes the bounded routine would read are shown.
struct Text<'a>(Option<&'a [u8]>);

impl Text<'_> {
    unsafe fn new(s: *const c_char, bound: Option<usize>) -> Self {
        if s.is_null() {
            return Self(None);
        }

        let len = match bound {
            Some(n) => libc::strnlen(s, n),
            None => libc::strlen(s),
        };

        Self(Some(slice::from_raw_parts(s as *const u8, len)))
    }
}

impl fmt::Display for Text<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(bytes) => write!(f, "\"{}\"", bytes.escape_ascii()),
            None => f.write_str("NULL"),
        }
    }
}

/// A [`RealAlloc`] whose every allocation fails.
#[cfg(test)]
pub(crate) struct Exhausted;

#[cfg(test)]
impl RealAlloc for Exhausted {
    unsafe fn malloc(&self, _size: usize) -> *mut c_void {
        ptr::null_mut()
    }

    unsafe fn calloc(&self, _count: usize, _size: usize) -> *mut c_void {
        ptr::null_mut()
    }

    unsafe fn realloc(&self, _ptr: *mut c_void, _size: usize) -> *mut c_void {
        ptr::null_mut()
    }

    unsafe fn free(&self, _ptr: *mut c_void) {}
}
