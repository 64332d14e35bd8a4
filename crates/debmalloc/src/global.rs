use std::{
    alloc::{GlobalAlloc, Layout, System},
    cmp, mem, ptr,
};

use libc::c_void;

use crate::{
    emitter::{emit, Priority},
    helper::Reentrancy,
    interpose::{Instrumented, Libc},
};

static GLOBAL: Instrumented<Libc> = Instrumented::new(Libc);

/// Alignment `malloc` guarantees on the supported targets.
const MIN_ALIGN: usize = 2 * mem::size_of::<usize>();

/// An implementation of [`GlobalAlloc`] that traces every Rust allocation
/// through the malloc family at the given priority.
///
/// ```no_run
/// use debmalloc::DebAlloc;
///
/// #[global_allocator]
/// static ALLOC: DebAlloc = DebAlloc(5);
/// ```
pub struct DebAlloc(pub Priority);

impl DebAlloc {
    #[inline]
    fn fits_malloc(align: usize, size: usize) -> bool {
        align <= MIN_ALIGN && align <= size
    }

    /// Over-aligned blocks come from `System` (`posix_memalign`), and are
    /// still released with `free`.
    unsafe fn aligned_alloc(&self, layout: Layout, zeroed: bool) -> *mut u8 {
        let site = crate::site!();
        let guard = Reentrancy::new();

        if guard.is_ok() {
            emit(
                self.0,
                site.file,
                site.line,
                site.func,
                format_args!("aligned_alloc({}, {})", layout.align(), layout.size()),
            );
        }

        let ptr = if zeroed {
            System.alloc_zeroed(layout)
        } else {
            System.alloc(layout)
        };

        if guard.is_ok() {
            emit(
                self.0,
                site.file,
                site.line,
                site.func,
                format_args!(
                    "aligned_alloc({}, {}) = {:p}",
                    layout.align(),
                    layout.size(),
                    ptr
                ),
            );
        }

        ptr
    }
}

unsafe impl GlobalAlloc for DebAlloc {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if Self::fits_malloc(layout.align(), layout.size()) {
            GLOBAL.malloc(layout.size(), self.0, &crate::site!()) as *mut u8
        } else {
            self.aligned_alloc(layout, false)
        }
    }

    #[inline]
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if Self::fits_malloc(layout.align(), layout.size()) {
            GLOBAL.calloc(layout.size(), 1, self.0, &crate::site!()) as *mut u8
        } else {
            self.aligned_alloc(layout, true)
        }
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        GLOBAL.free(ptr as *mut c_void, self.0, &crate::site!());
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if Self::fits_malloc(layout.align(), new_size) {
            let site = crate::site!();
            return GLOBAL.realloc(ptr as *mut c_void, new_size, self.0, &site) as *mut u8;
        }

        let new_layout = Layout::from_size_align_unchecked(new_size, layout.align());
        let moved = self.alloc(new_layout);

        if !moved.is_null() {
            ptr::copy_nonoverlapping(ptr, moved, cmp::min(layout.size(), new_size));
            self.dealloc(ptr, layout);
        }

        moved
    }
}
