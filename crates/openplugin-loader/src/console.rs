//! Level-filtered diagnostics console with a swappable sink.
//!
//! The loader reports everything it does through this console. Exactly one
//! sink is active at a time; installing a new one stashes the previous sink
//! so it can be restored later. The default sink forwards messages into the
//! `tracing` ecosystem, so a host that already has a subscriber configured
//! sees loader diagnostics without any extra wiring.
//!
//! Sink calls are serialised by a console-level lock. That lock is a leaf:
//! no sink implementation may call back into the loader.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;

/// Message severities, in increasing order.
///
/// `None` is not a message severity; setting it as the level silences the
/// console entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Verbose internal tracing of loader decisions.
    Debug = 0,
    /// Notable but expected events.
    Info = 1,
    /// Something is off; the loader keeps going.
    Warn = 2,
    /// An operation failed.
    Error = 3,
    /// Emit nothing.
    None = 4,
}

impl LogLevel {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Debug,
            1 => Self::Info,
            2 => Self::Warn,
            3 => Self::Error,
            _ => Self::None,
        }
    }
}

/// A destination for console messages.
///
/// Sinks are presumed to perform I/O; every call happens under the console
/// lock, so implementations need no internal synchronisation.
pub trait LogSink: Send {
    /// Write one message at `level`.
    fn log(&mut self, level: LogLevel, message: &str);
}

/// Default sink: forwards each message as a `tracing` event.
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&mut self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "openplugin", "{message}"),
            LogLevel::Info => tracing::info!(target: "openplugin", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "openplugin", "{message}"),
            LogLevel::Error => tracing::error!(target: "openplugin", "{message}"),
            LogLevel::None => {}
        }
    }
}

/// Sink that appends formatted lines to a file.
pub struct FileSink {
    file: File,
}

impl FileSink {
    /// Open (or create) `path` for appending.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl LogSink for FileSink {
    fn log(&mut self, level: LogLevel, message: &str) {
        // A failing diagnostics file must not take the loader down with it.
        let _ = writeln!(self.file, "[{level:?}] {message}");
    }
}

struct ConsoleState {
    sink: Option<Box<dyn LogSink>>,
    previous: Option<Option<Box<dyn LogSink>>>,
}

fn state() -> &'static Mutex<ConsoleState> {
    static STATE: OnceLock<Mutex<ConsoleState>> = OnceLock::new();
    STATE.get_or_init(|| {
        Mutex::new(ConsoleState {
            sink: Some(Box::new(TracingSink)),
            previous: None,
        })
    })
}

static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);

/// Install `sink` as the active sink, stashing the previous one.
pub fn install_sink(sink: Box<dyn LogSink>) {
    let mut state = state().lock();
    let old = state.sink.take();
    state.previous = Some(old);
    state.sink = Some(sink);
}

/// Drop all messages until another sink is installed or restored.
pub fn suppress_sink() {
    let mut state = state().lock();
    let old = state.sink.take();
    state.previous = Some(old);
}

/// Restore the sink that was active before the last
/// [`install_sink`]/[`suppress_sink`] call. Does nothing when there is no
/// stashed sink.
pub fn restore_previous_sink() {
    let mut state = state().lock();
    if let Some(previous) = state.previous.take() {
        state.sink = previous;
    }
}

/// Set the minimum severity that reaches the sink.
pub fn set_log_level(level: LogLevel) {
    LEVEL.store(level as u8, Ordering::Relaxed);
}

/// The current minimum severity.
pub fn log_level() -> LogLevel {
    LogLevel::from_u8(LEVEL.load(Ordering::Relaxed))
}

/// Whether a message at `level` would currently be emitted.
pub fn enabled(level: LogLevel) -> bool {
    level != LogLevel::None && level >= log_level()
}

/// Hand `message` to the active sink if `level` passes the gate.
pub fn log(level: LogLevel, message: &str) {
    if !enabled(level) {
        return;
    }
    let mut state = state().lock();
    if let Some(sink) = state.sink.as_mut() {
        sink.log(level, message);
    }
}

macro_rules! log_debug {
    ($($arg:tt)*) => {
        if $crate::console::enabled($crate::console::LogLevel::Debug) {
            $crate::console::log($crate::console::LogLevel::Debug, &::std::format!($($arg)*));
        }
    };
}

macro_rules! log_warn {
    ($($arg:tt)*) => {
        if $crate::console::enabled($crate::console::LogLevel::Warn) {
            $crate::console::log($crate::console::LogLevel::Warn, &::std::format!($($arg)*));
        }
    };
}

macro_rules! log_error {
    ($($arg:tt)*) => {
        if $crate::console::enabled($crate::console::LogLevel::Error) {
            $crate::console::log($crate::console::LogLevel::Error, &::std::format!($($arg)*));
        }
    };
}

pub(crate) use {log_debug, log_error, log_warn};
