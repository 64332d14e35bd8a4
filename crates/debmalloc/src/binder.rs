//! The bound-symbol table: the real `malloc`, `free`, `calloc` and `realloc`
//! that sit behind an interposed definition of the same name.
//!
//! A library that exports `malloc` itself cannot call `malloc` by name, so the
//! real routines are looked up once with `dlsym(RTLD_NEXT, ..)` and cached for
//! the life of the process. The preloaded library triggers [`bind`] from its
//! load-time constructor; [`Bound`] binds lazily if a call arrives first.

use std::{
    cell::UnsafeCell,
    cmp,
    ffi::CStr,
    fmt::Write,
    hint,
    mem::{self, MaybeUninit},
    ptr::{self, null_mut},
    sync::atomic::{AtomicUsize, Ordering},
};

use libc::c_void;
use thiserror::Error;

use crate::{emitter::FdWriter, interpose::RealAlloc};

pub type MallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
pub type FreeFn = unsafe extern "C" fn(*mut c_void);
pub type CallocFn = unsafe extern "C" fn(usize, usize) -> *mut c_void;
pub type ReallocFn = unsafe extern "C" fn(*mut c_void, usize) -> *mut c_void;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BindError {
    #[error("no next definition of `{symbol}`")]
    Unresolved { symbol: &'static str },

    #[error("an earlier attempt to bind the malloc family failed")]
    Failed,

    #[error("the malloc family is already bound")]
    AlreadyBound,
}

/// References to one implementation of the malloc family.
#[derive(Clone, Copy, Debug)]
pub struct Reals {
    pub malloc: MallocFn,
    pub free: FreeFn,
    pub calloc: CallocFn,
    pub realloc: ReallocFn,
}

impl Reals {
    /// Look up the next definition of each routine after the object that
    /// contains this code.
    pub fn resolve() -> Result<Self, BindError> {
        // Safety: each symbol is a libc routine with the matching signature.
        unsafe {
            Ok(Self {
                malloc: mem::transmute::<*mut c_void, MallocFn>(next(c"malloc")?),
                free: mem::transmute::<*mut c_void, FreeFn>(next(c"free")?),
                calloc: mem::transmute::<*mut c_void, CallocFn>(next(c"calloc")?),
                realloc: mem::transmute::<*mut c_void, ReallocFn>(next(c"realloc")?),
            })
        }
    }

    /// The routines this crate links against by name.
    pub fn libc() -> Self {
        Self {
            malloc: libc::malloc,
            free: libc::free,
            calloc: libc::calloc,
            realloc: libc::realloc,
        }
    }
}

fn next(symbol: &'static CStr) -> Result<*mut c_void, BindError> {
    let found = unsafe { libc::dlsym(libc::RTLD_NEXT, symbol.as_ptr()) };

    if found.is_null() {
        Err(BindError::Unresolved {
            symbol: symbol.to_str().unwrap_or("?"),
        })
    } else {
        Ok(found)
    }
}

impl RealAlloc for Reals {
    #[inline]
    unsafe fn malloc(&self, size: usize) -> *mut c_void {
        (self.malloc)(size)
    }

    #[inline]
    unsafe fn calloc(&self, count: usize, size: usize) -> *mut c_void {
        (self.calloc)(count, size)
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        (self.realloc)(ptr, size)
    }

    #[inline]
    unsafe fn free(&self, ptr: *mut c_void) {
        (self.free)(ptr)
    }
}

const UNBOUND: usize = 0;
const BINDING: usize = 1;
const BOUND: usize = 2;
const FAILED: usize = 3;

struct SymbolTable {
    state: AtomicUsize,
    /// `pthread_self` of the thread running the resolution.
    binder: AtomicUsize,
    reals: UnsafeCell<MaybeUninit<Reals>>,
}

impl SymbolTable {
    const fn new() -> Self {
        SymbolTable {
            state: AtomicUsize::new(UNBOUND),
            binder: AtomicUsize::new(0),
            reals: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    fn get(&self) -> Option<&Reals> {
        if self.state.load(Ordering::Acquire) == BOUND {
            Some(unsafe { (*self.reals.get()).assume_init_ref() })
        } else {
            None
        }
    }

    /// True while the calling thread is the one resolving the table.
    fn is_binding_here(&self) -> bool {
        self.state.load(Ordering::Acquire) == BINDING
            && self.binder.load(Ordering::Acquire) == current_thread()
    }

    /// Runs `resolve` if nobody has bound the table yet, otherwise waits for
    /// whoever is binding it.
    fn bind_with<F>(&self, resolve: F) -> Result<&Reals, BindError>
    where
        F: FnOnce() -> Result<Reals, BindError>,
    {
        if self
            .state
            .compare_exchange(UNBOUND, BINDING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.binder.store(current_thread(), Ordering::Release);
            return self.publish(resolve());
        }

        self.wait()
    }

    fn install(&self, reals: Reals) -> Result<&Reals, BindError> {
        if self
            .state
            .compare_exchange(UNBOUND, BINDING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BindError::AlreadyBound);
        }

        self.publish(Ok(reals))
    }

    fn publish(&self, resolved: Result<Reals, BindError>) -> Result<&Reals, BindError> {
        match resolved {
            Ok(reals) => {
                let reals = unsafe { (*self.reals.get()).write(reals) };
                self.state.store(BOUND, Ordering::Release);
                Ok(reals)
            }
            Err(err) => {
                self.state.store(FAILED, Ordering::Release);
                Err(err)
            }
        }
    }

    fn wait(&self) -> Result<&Reals, BindError> {
        loop {
            match self.state.load(Ordering::Acquire) {
                BOUND => return Ok(unsafe { (*self.reals.get()).assume_init_ref() }),
                FAILED => return Err(BindError::Failed),
                _ => hint::spin_loop(),
            }
        }
    }
}

fn current_thread() -> usize {
    unsafe { libc::pthread_self() as usize }
}

unsafe impl Sync for SymbolTable {}
unsafe impl Send for SymbolTable {}

static TABLE: SymbolTable = SymbolTable::new();

/// Resolve the real malloc family, once per process.
///
/// Every call after the first returns the same table, or
/// [`BindError::Failed`] if the first resolution failed.
pub fn bind() -> Result<&'static Reals, BindError> {
    TABLE.bind_with(Reals::resolve)
}

/// Bind the table to `reals` instead of resolving it.
pub fn install(reals: Reals) -> Result<&'static Reals, BindError> {
    TABLE.install(reals)
}

/// The bound table, if binding has completed.
pub fn bound() -> Option<&'static Reals> {
    TABLE.get()
}

/// Report a binding failure on standard error and abort the process.
///
/// Interposed routines have no allocator to fall back to.
pub fn fatal(err: BindError) -> ! {
    let mut buf = [0u8; 256];
    let mut writer = FdWriter::new(libc::STDERR_FILENO, &mut buf);

    _ = writeln!(writer, "debmalloc: cannot bind the malloc family: {}", err);
    writer.flush();

    unsafe { libc::abort() }
}

/// The real malloc family, reached through the process-wide table.
///
/// Binds on first use. Calls the binding thread makes while resolving the
/// table (`dlsym` may allocate) are served from a small static arena. Other
/// threads wait for the table.
#[derive(Clone, Copy, Debug, Default)]
pub struct Bound;

impl Bound {
    fn reals() -> Option<&'static Reals> {
        if let Some(reals) = bound() {
            return Some(reals);
        }

        if TABLE.is_binding_here() {
            return None;
        }

        match bind() {
            Ok(reals) => Some(reals),
            Err(err) => fatal(err),
        }
    }
}

impl RealAlloc for Bound {
    unsafe fn malloc(&self, size: usize) -> *mut c_void {
        match Self::reals() {
            Some(reals) => (reals.malloc)(size),
            None => bootstrap::alloc(size),
        }
    }

    unsafe fn calloc(&self, count: usize, size: usize) -> *mut c_void {
        match Self::reals() {
            Some(reals) => (reals.calloc)(count, size),
            // The arena is never reused, so its bytes are still zero.
            None => match count.checked_mul(size) {
                Some(total) => bootstrap::alloc(total),
                None => null_mut(),
            },
        }
    }

    unsafe fn realloc(&self, ptr: *mut c_void, size: usize) -> *mut c_void {
        if bootstrap::owns(ptr) {
            let moved = self.malloc(size);

            if !moved.is_null() {
                let len = cmp::min(bootstrap::size_of(ptr), size);
                ptr::copy_nonoverlapping(ptr as *const u8, moved as *mut u8, len);
            }

            return moved;
        }

        match Self::reals() {
            Some(reals) => (reals.realloc)(ptr, size),
            None => null_mut(),
        }
    }

    unsafe fn free(&self, ptr: *mut c_void) {
        if bootstrap::owns(ptr) {
            return;
        }

        if let Some(reals) = Self::reals() {
            (reals.free)(ptr)
        }
    }
}

/// Bump allocator for the calls made by `dlsym` while the table is binding.
mod bootstrap {
    use std::{
        cell::UnsafeCell,
        ptr::null_mut,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use libc::c_void;

    const ARENA_SIZE: usize = 64 * 1024;

    /// Block alignment, also the size of the header holding the block size.
    const ALIGN: usize = 16;

    #[repr(C, align(16))]
    struct Arena(UnsafeCell<[u8; ARENA_SIZE]>);

    unsafe impl Sync for Arena {}

    static ARENA: Arena = Arena(UnsafeCell::new([0; ARENA_SIZE]));
    static NEXT: AtomicUsize = AtomicUsize::new(0);

    pub(super) fn alloc(size: usize) -> *mut c_void {
        let total = match size.checked_add(2 * ALIGN - 1) {
            Some(n) if n <= ARENA_SIZE => n & !(ALIGN - 1),
            _ => return null_mut(),
        };

        let offset = NEXT.fetch_add(total, Ordering::Relaxed);

        if offset > ARENA_SIZE - total {
            return null_mut();
        }

        unsafe {
            let header = (ARENA.0.get() as *mut u8).add(offset);
            (header as *mut usize).write(size);
            header.add(ALIGN) as *mut c_void
        }
    }

    pub(super) fn owns(ptr: *mut c_void) -> bool {
        let base = ARENA.0.get() as usize;

        (base..base + ARENA_SIZE).contains(&(ptr as usize))
    }

    /// Requested size of a block returned by [`alloc`].
    pub(super) unsafe fn size_of(ptr: *mut c_void) -> usize {
        ((ptr as *const u8).sub(ALIGN) as *const usize).read()
    }

}
