//! Collecting the records of the current thread instead of printing them.
//!
//! ```
//! use debmalloc::capture::capture;
//!
//! debmalloc::priority!(7);
//!
//! let (_, records) = capture(|| unsafe {
//!     let p = debmalloc::malloc!(16);
//!     debmalloc::free!(p);
//! });
//!
//! assert_eq!(records.len(), 4);
//! ```

use std::{
    cell::Cell,
    ptr,
    sync::{Mutex, PoisonError},
};

use crate::emitter::{set_sink, sink, Record, Sink, SinkCell, TraceRecord};

thread_local! {
    static CAPTURED: Cell<*mut Vec<TraceRecord>> = const { Cell::new(ptr::null_mut()) };
}

/// Number of captures running in the process.
static ACTIVE: Mutex<usize> = Mutex::new(0);

/// The sink that was installed when the outermost capture began.
static FORWARD: SinkCell = SinkCell::new();

/// Appends the record to the current thread's capture, or hands it to the
/// sink that was installed before capturing began.
pub fn capture_sink(record: &Record<'_>) {
    let target = CAPTURED.try_with(Cell::get).unwrap_or(ptr::null_mut());

    if target.is_null() {
        (FORWARD.load())(record);
    } else {
        // Safety: `capture` keeps the vector alive and unaliased while the
        // pointer is published.
        unsafe { (*target).push(record.into()) }
    }
}

fn is_capture_sink(sink: Sink) -> bool {
    sink as usize == capture_sink as Sink as usize
}

fn enter() {
    let mut active = ACTIVE.lock().unwrap_or_else(PoisonError::into_inner);

    if *active == 0 {
        let previous = sink();

        if !is_capture_sink(previous) {
            FORWARD.store(previous);
        }

        set_sink(capture_sink);
    }

    *active += 1;
}

fn leave() {
    let mut active = ACTIVE.lock().unwrap_or_else(PoisonError::into_inner);

    *active -= 1;

    // A sink installed while capturing stays installed.
    if *active == 0 && is_capture_sink(sink()) {
        set_sink(FORWARD.load());
    }
}

/// Runs `f` with [`capture_sink`] installed and returns the records emitted
/// on this thread meanwhile.
///
/// Records from other threads keep reaching the sink that was installed
/// before, which is put back once the last capture returns.
pub fn capture<R, F>(f: F) -> (R, Vec<TraceRecord>)
where
    F: FnOnce() -> R,
{
    struct Restore(*mut Vec<TraceRecord>);

    impl Drop for Restore {
        fn drop(&mut self) {
            CAPTURED.set(self.0);
            leave();
        }
    }

    let mut records = Vec::new();

    enter();

    let restore = Restore(CAPTURED.replace(&mut records as *mut _));
    let result = f();
    drop(restore);

    (result, records)
}
