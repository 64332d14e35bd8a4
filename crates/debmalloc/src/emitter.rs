//! Trace records and the process-wide sink they are dispatched to.
//!
//! Every traced call produces [`Record`]s through [`emit`]. The emitter does
//! not filter, buffer or reorder: the record is handed synchronously to the
//! current [`Sink`], which decides what to do with the priority.
//!
//! The default sink, [`default_sink`], runs inside `malloc` when the
//! preloaded library is active, so it formats into a stack buffer and writes
//! with `write(2)` directly.

use std::{
    ffi::c_int,
    fmt::{self, Write},
    io, mem, ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

use serde::{Deserialize, Serialize};

/// Severity ordinal attached to every record. Only sinks interpret it.
pub type Priority = u8;

/// The priority used when a call site does not choose one.
pub const DEFAULT_PRIORITY: Priority = 5;

/// Source location of an instrumented call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Site<'a> {
    pub file: &'a str,
    pub line: u32,
    pub func: &'a str,
}

impl<'a> Site<'a> {
    pub const fn new(file: &'a str, line: u32, func: &'a str) -> Self {
        Self { file, line, func }
    }
}

/// A single trace event, borrowed for the duration of one sink call.
#[derive(Clone, Copy, Debug)]
pub struct Record<'a> {
    priority: Priority,
    site: Site<'a>,
    args: fmt::Arguments<'a>,
}

impl<'a> Record<'a> {
    pub fn new(priority: Priority, site: Site<'a>, args: fmt::Arguments<'a>) -> Self {
        Self {
            priority,
            site,
            args,
        }
    }

    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    #[inline]
    pub fn site(&self) -> Site<'a> {
        self.site
    }

    #[inline]
    pub fn file(&self) -> &'a str {
        self.site.file
    }

    #[inline]
    pub fn line(&self) -> u32 {
        self.site.line
    }

    #[inline]
    pub fn func(&self) -> &'a str {
        self.site.func
    }

    /// The formatted message, not yet rendered.
    #[inline]
    pub fn args(&self) -> &fmt::Arguments<'a> {
        &self.args
    }
}

/// Renders `file:line:func():priority:message`, without the newline.
impl fmt::Display for Record<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}():{}:{}",
            self.site.file, self.site.line, self.site.func, self.priority, self.args
        )
    }
}

/// An owned snapshot of a [`Record`], for sinks that keep or serialize records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub priority: Priority,
    pub file: String,
    pub line: u32,
    pub func: String,
    pub message: String,
}

impl From<&Record<'_>> for TraceRecord {
    fn from(record: &Record<'_>) -> Self {
        let site = record.site();

        Self {
            priority: record.priority(),
            file: site.file.to_string(),
            line: site.line,
            func: site.func.to_string(),
            message: record.args().to_string(),
        }
    }
}

impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}():{}:{}",
            self.file, self.line, self.func, self.priority, self.message
        )
    }
}

/// The function every record is dispatched to.
pub type Sink = fn(&Record<'_>);

/// An atomically replaceable [`Sink`]. Empty means [`default_sink`].
pub(crate) struct SinkCell(AtomicPtr<()>);

impl SinkCell {
    pub(crate) const fn new() -> Self {
        Self(AtomicPtr::new(ptr::null_mut()))
    }

    pub(crate) fn store(&self, sink: Sink) {
        self.0.store(sink as *mut (), Ordering::Release);
    }

    pub(crate) fn load(&self) -> Sink {
        let raw = self.0.load(Ordering::Acquire);

        if raw.is_null() {
            default_sink
        } else {
            // Safety: only `store` writes the cell, always with a `Sink`.
            unsafe { mem::transmute::<*mut (), Sink>(raw) }
        }
    }
}

static SINK: SinkCell = SinkCell::new();

/// Replace the process-wide sink. Applies to every record emitted afterwards,
/// from every call site.
pub fn set_sink(sink: Sink) {
    SINK.store(sink);
}

/// Returns the sink currently installed.
pub fn sink() -> Sink {
    SINK.load()
}

/// Build a record and hand it to the current sink.
pub fn emit(priority: Priority, file: &str, line: u32, func: &str, args: fmt::Arguments<'_>) {
    let record = Record::new(priority, Site::new(file, line, func), args);

    (sink())(&record);
}

/// Writes each record as one line on standard error.
pub fn default_sink(record: &Record<'_>) {
    let mut buf = [0u8; 512];
    let mut writer = FdWriter::new(libc::STDERR_FILENO, &mut buf);

    _ = writeln!(writer, "{}", record);

    writer.flush();
}

/// Forwards records to the [`log`] facade under the `debmalloc` target.
///
/// Rendering through a logger allocates; use this sink for call-site tracing
/// or with [`DebAlloc`](crate::DebAlloc), not inside a preloaded `malloc`.
pub fn log_sink(record: &Record<'_>) {
    let metadata = log::Metadata::builder()
        .level(level_of(record.priority()))
        .target("debmalloc")
        .build();

    let logger = log::logger();

    if !logger.enabled(&metadata) {
        return;
    }

    logger.log(
        &log::Record::builder()
            .metadata(metadata)
            .args(format_args!("{}(): {}", record.func(), record.args()))
            .file(Some(record.file()))
            .line(Some(record.line()))
            .build(),
    );
}

/// Syslog-style mapping of a priority onto a [`log::Level`].
pub fn level_of(priority: Priority) -> log::Level {
    match priority {
        0..=3 => log::Level::Error,
        4 => log::Level::Warn,
        5 | 6 => log::Level::Info,
        7 => log::Level::Debug,
        _ => log::Level::Trace,
    }
}

/// [`fmt::Write`] over a caller-provided buffer, drained to a raw file
/// descriptor whenever it fills up.
pub(crate) struct FdWriter<'a> {
    fd: c_int,
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> FdWriter<'a> {
    pub(crate) fn new(fd: c_int, buf: &'a mut [u8]) -> Self {
        Self { fd, buf, pos: 0 }
    }

    /// Write out everything buffered so far.
    pub(crate) fn flush(&mut self) {
        let mut offset = 0;

        while offset < self.pos {
            let rest = &self.buf[offset..self.pos];

            let written =
                unsafe { libc::write(self.fd, rest.as_ptr() as *const libc::c_void, rest.len()) };

            if written < 0 {
                if io::Error::last_os_error().kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                // Nowhere left to report the failure; drop the line.
                break;
            }

            offset += written as usize;
        }

        self.pos = 0;
    }
}

impl Write for FdWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let mut bytes = s.as_bytes();

        while !bytes.is_empty() {
            if self.pos == self.buf.len() {
                self.flush();
            }

            let n = bytes.len().min(self.buf.len() - self.pos);

            self.buf[self.pos..self.pos + n].copy_from_slice(&bytes[..n]);
            self.pos += n;
            bytes = &bytes[n..];
        }

        Ok(())
    }
}
