//! Structured kernel log service.
//!
//! A fixed-size, heap-free circular buffer of structured log entries —
//! timestamp, severity, subsystem tag, message — backed by a
//! [`spin::Mutex`] so interrupt handlers can log without risking a heap
//! allocation. `init()` also installs a [`log::Log`] implementor so the
//! rest of the kernel can use the ordinary `log::info!`/`warn!`/`error!`
//! macros; every record they produce is funneled into the same buffer
//! `log_drain` reads, so there is exactly one log sink in the kernel.

use spin::Mutex;

const LOG_BUFFER_CAPACITY: usize = 256;
const LOG_MESSAGE_MAX_LEN: usize = 128;
const LOG_SUBSYSTEM_MAX_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => LogLevel::Error,
            log::Level::Warn => LogLevel::Warn,
            log::Level::Info => LogLevel::Info,
            log::Level::Debug => LogLevel::Debug,
            log::Level::Trace => LogLevel::Trace,
        }
    }
}

#[derive(Clone)]
pub struct LogEntry {
    pub timestamp_ms: u64,
    pub level: LogLevel,
    subsystem_buf: [u8; LOG_SUBSYSTEM_MAX_LEN],
    subsystem_len: u8,
    message_buf: [u8; LOG_MESSAGE_MAX_LEN],
    message_len: u8,
}

impl LogEntry {
    const fn empty() -> Self {
        Self {
            timestamp_ms: 0,
            level: LogLevel::Trace,
            subsystem_buf: [0u8; LOG_SUBSYSTEM_MAX_LEN],
            subsystem_len: 0,
            message_buf: [0u8; LOG_MESSAGE_MAX_LEN],
            message_len: 0,
        }
    }

    pub fn subsystem(&self) -> &str {
        let len = self.subsystem_len as usize;
        core::str::from_utf8(&self.subsystem_buf[..len]).unwrap_or("")
    }

    pub fn message(&self) -> &str {
        let len = self.message_len as usize;
        core::str::from_utf8(&self.message_buf[..len]).unwrap_or("")
    }
}

struct LogBuffer {
    entries: [LogEntry; LOG_BUFFER_CAPACITY],
    head: usize,
    count: usize,
}

impl LogBuffer {
    const fn new() -> Self {
        const EMPTY: LogEntry = LogEntry::empty();
        Self { entries: [EMPTY; LOG_BUFFER_CAPACITY], head: 0, count: 0 }
    }

    fn push(&mut self, entry: LogEntry) {
        self.entries[self.head] = entry;
        self.head = (self.head + 1) % LOG_BUFFER_CAPACITY;
        if self.count < LOG_BUFFER_CAPACITY {
            self.count += 1;
        }
    }

    fn len(&self) -> usize {
        self.count
    }

    fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
    }

    fn tail(&self) -> usize {
        if self.count < LOG_BUFFER_CAPACITY { 0 } else { self.head }
    }

    fn get(&self, i: usize) -> Option<&LogEntry> {
        if i >= self.count {
            return None;
        }
        Some(&self.entries[(self.tail() + i) % LOG_BUFFER_CAPACITY])
    }
}

struct LogService {
    buffer: LogBuffer,
}

impl LogService {
    const fn new() -> Self {
        Self { buffer: LogBuffer::new() }
    }

    fn log(&mut self, level: LogLevel, subsystem: &str, message: &str) {
        let timestamp_ms = crate::timer::ticks();

        let mut subsystem_buf = [0u8; LOG_SUBSYSTEM_MAX_LEN];
        let sub_len = subsystem.len().min(LOG_SUBSYSTEM_MAX_LEN);
        subsystem_buf[..sub_len].copy_from_slice(&subsystem.as_bytes()[..sub_len]);

        let mut message_buf = [0u8; LOG_MESSAGE_MAX_LEN];
        let msg_len = message.len().min(LOG_MESSAGE_MAX_LEN);
        message_buf[..msg_len].copy_from_slice(&message.as_bytes()[..msg_len]);

        self.buffer.push(LogEntry {
            timestamp_ms,
            level,
            subsystem_buf,
            subsystem_len: sub_len as u8,
            message_buf,
            message_len: msg_len as u8,
        });
    }
}

static LOG_SERVICE: Mutex<LogService> = Mutex::new(LogService::new());

/// Record a structured log entry directly, bypassing the `log` facade.
/// Used by callers that already have a short subsystem tag to hand and
/// don't want the overhead of formatting through `log::Record`.
pub fn klog(level: LogLevel, subsystem: &str, message: &str) {
    LOG_SERVICE.lock().log(level, subsystem, message);
}

pub fn log_drain<F: FnMut(&LogEntry)>(mut f: F) -> usize {
    let service = LOG_SERVICE.lock();
    let n = service.buffer.len();
    for i in 0..n {
        if let Some(entry) = service.buffer.get(i) {
            f(entry);
        }
    }
    n
}

pub fn log_count() -> usize {
    LOG_SERVICE.lock().buffer.len()
}

pub fn log_clear() {
    LOG_SERVICE.lock().buffer.clear();
}

/// Bridges the `log` crate's facade into the structured buffer above, so
/// `log::info!`/`warn!`/`error!` calls throughout the kernel all land in
/// one place. The subsystem tag is taken from `Record::target()`, which
/// defaults to the calling module path (e.g. `"aos_kernel::modvm"`).
struct KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let mut message_buf = [0u8; LOG_MESSAGE_MAX_LEN];
        let mut cursor = NoAllocWrite { buf: &mut message_buf, len: 0 };
        let _ = core::fmt::write(&mut cursor, *record.args());
        let message = core::str::from_utf8(&message_buf[..cursor.len]).unwrap_or("<invalid utf8>");
        klog(record.level().into(), record.target(), message);
    }

    fn flush(&self) {}
}

/// A `core::fmt::Write` sink over a fixed buffer, so formatting a
/// `log::Record`'s arguments never allocates. Truncates rather than
/// erroring once the buffer is full.
struct NoAllocWrite<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl core::fmt::Write for NoAllocWrite<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let remaining = self.buf.len() - self.len;
        let n = s.len().min(remaining);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

static LOGGER: KernelLogger = KernelLogger;

pub fn init() {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(log::LevelFilter::Trace);
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    // Single test: LOG_SERVICE is a process-wide static, so two tests
    // mutating it concurrently (the default `cargo test` behavior) would
    // race each other.
    #[test]
    fn klog_drains_in_order_then_wraps_at_capacity() {
        log_clear();
        klog(LogLevel::Info, "test", "first");
        klog(LogLevel::Warn, "test", "second");
        let mut seen = alloc::vec::Vec::new();
        log_drain(|e| seen.push(alloc::string::String::from(e.message())));
        assert_eq!(seen, alloc::vec::Vec::from(["first", "second"]));

        log_clear();
        for _ in 0..LOG_BUFFER_CAPACITY + 10 {
            klog(LogLevel::Debug, "test", "x");
        }
        assert_eq!(log_count(), LOG_BUFFER_CAPACITY);
    }
}
