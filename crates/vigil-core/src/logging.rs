//! Structured, context-carrying pipeline logger.
//!
//! One [`StructuredLogger`] is constructed per process and handed to every
//! component by reference (or as a cheap clone sharing the same sink).
//! Records are written as newline-delimited JSON:
//!
//! ```text
//! {"timestamp":"...","level":"WARN","component":"recovery","message":"retrying","context":{}}
//! ```
//!
//! Records never propagate to the global `tracing` subscriber. The logger's
//! own faults (writes after close, failed flushes) are reported once through
//! `tracing` diagnostics and never surface to the caller.

use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::Level;

use crate::config::LoggingConfig;
use crate::domain::{Result, VigilError};

/// Transient write errors retried before a record is given up on.
const MAX_TRANSIENT_RETRIES: usize = 16;

type Sink = BufWriter<Box<dyn Write + Send>>;

/// One structured log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub component: String,
    pub message: String,
    #[serde(default)]
    pub context: Map<String, Value>,
}

struct LoggerInner {
    sink: Mutex<Option<Sink>>,
    min_level: Level,
    closed_warned: AtomicBool,
}

impl LoggerInner {
    fn lock(&self) -> MutexGuard<'_, Option<Sink>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for LoggerInner {
    fn drop(&mut self) {
        let slot = self.sink.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut sink) = slot.take() {
            if let Err(e) = flush_with_retry(&mut sink) {
                tracing::warn!(error = %e, "structured logger failed final flush on drop");
            }
        }
    }
}

/// Process-wide structured log sink. Clones share the underlying handle.
#[derive(Clone)]
pub struct StructuredLogger {
    inner: Arc<LoggerInner>,
}

impl std::fmt::Debug for StructuredLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredLogger")
            .field("min_level", &self.inner.min_level)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl StructuredLogger {
    /// Open the sink described by `config`: an append-mode file when `path`
    /// is set, stderr otherwise.
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let level = parse_level(&config.level)?;
        let writer: Box<dyn Write + Send> = match &config.path {
            Some(path) => Box::new(OpenOptions::new().create(true).append(true).open(path)?),
            None => Box::new(io::stderr()),
        };
        Ok(Self::from_boxed(writer, level))
    }

    /// Wrap an arbitrary writer.
    pub fn with_writer(writer: impl Write + Send + 'static, min_level: Level) -> Self {
        Self::from_boxed(Box::new(writer), min_level)
    }

    fn from_boxed(writer: Box<dyn Write + Send>, min_level: Level) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                sink: Mutex::new(Some(BufWriter::new(writer))),
                min_level,
                closed_warned: AtomicBool::new(false),
            }),
        }
    }

    /// A named handle sharing this logger's sink.
    pub fn component(&self, name: impl Into<String>) -> ComponentLogger {
        ComponentLogger {
            component: Arc::from(name.into()),
            logger: self.clone(),
        }
    }

    pub fn min_level(&self) -> Level {
        self.inner.min_level
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.inner.min_level
    }

    /// Write one record. Never fails; problems are reported as diagnostics.
    pub fn log(&self, level: Level, component: &str, message: &str, context: Map<String, Value>) {
        if !self.enabled(level) {
            return;
        }

        let record = LogRecord {
            timestamp: Utc::now(),
            level: level.to_string(),
            component: component.to_string(),
            message: message.to_string(),
            context,
        };
        let mut line = match serde_json::to_vec(&record) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize log record");
                return;
            }
        };
        line.push(b'\n');

        let mut guard = self.inner.lock();
        let Some(sink) = guard.as_mut() else {
            drop(guard);
            if !self.inner.closed_warned.swap(true, Ordering::SeqCst) {
                tracing::warn!("structured logger is closed; dropping further records");
            }
            return;
        };

        if let Err(e) = write_with_retry(sink, &line) {
            tracing::warn!(error = %e, "failed to write log record");
            return;
        }
        // Warnings and errors are pushed through immediately.
        if level <= Level::WARN {
            if let Err(e) = flush_with_retry(sink) {
                tracing::warn!(error = %e, "failed to flush log sink");
            }
        }
    }

    /// Flush buffered records without closing.
    pub fn flush(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        match guard.as_mut() {
            Some(sink) => flush_with_retry(sink).map_err(VigilError::from),
            None => Ok(()),
        }
    }

    /// Final flush and release of the output handle.
    ///
    /// The handle is released even when the flush fails; the flush error is
    /// returned. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let taken = self.inner.lock().take();
        match taken {
            Some(mut sink) => {
                let flushed = flush_with_retry(&mut sink);
                drop(sink);
                flushed.map_err(VigilError::from)
            }
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_none()
    }
}

/// Logger handle stamped with a component name.
#[derive(Debug, Clone)]
pub struct ComponentLogger {
    component: Arc<str>,
    logger: StructuredLogger,
}

impl ComponentLogger {
    pub fn name(&self) -> &str {
        &self.component
    }

    /// Derive a handle for a sub-component, e.g. `agent.forecast`.
    pub fn child(&self, name: &str) -> ComponentLogger {
        self.logger.component(format!("{}.{name}", self.component))
    }

    /// Log with a JSON context. Non-object contexts are stored under `value`.
    pub fn log(&self, level: Level, message: &str, context: Value) {
        let context = match context {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        self.logger.log(level, &self.component, message, context);
    }

    pub fn debug(&self, message: &str, context: Value) {
        self.log(Level::DEBUG, message, context);
    }

    pub fn info(&self, message: &str, context: Value) {
        self.log(Level::INFO, message, context);
    }

    pub fn warn(&self, message: &str, context: Value) {
        self.log(Level::WARN, message, context);
    }

    pub fn error(&self, message: &str, context: Value) {
        self.log(Level::ERROR, message, context);
    }
}

/// Cloneable in-memory sink.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Parse every complete line back into a [`LogRecord`].
    pub fn records(&self) -> Vec<LogRecord> {
        self.contents()
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

impl Write for MemorySink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) fn parse_level(level: &str) -> Result<Level> {
    Level::from_str(level.trim())
        .map_err(|_| VigilError::InvalidConfig(format!("unknown log level '{level}'")))
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn write_with_retry(sink: &mut Sink, line: &[u8]) -> io::Result<()> {
    let mut last = None;
    for _ in 0..MAX_TRANSIENT_RETRIES {
        match sink.write_all(line) {
            Ok(()) => return Ok(()),
            Err(e) if is_transient(&e) => {
                last = Some(e);
                std::thread::yield_now();
            }
            Err(e) => return Err(e),
        }
    }
    Err(last.unwrap_or_else(|| io::Error::from(io::ErrorKind::WouldBlock)))
}

fn flush_with_retry(sink: &mut Sink) -> io::Result<()> {
    let mut last = None;
    for _ in 0..MAX_TRANSIENT_RETRIES {
        match sink.flush() {
            Ok(()) => return Ok(()),
            Err(e) if is_transient(&e) => {
                last = Some(e);
                std::thread::yield_now();
            }
            Err(e) => return Err(e),
        }
    }
    Err(last.unwrap_or_else(|| io::Error::from(io::ErrorKind::WouldBlock)))
}
