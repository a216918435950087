//! Run-scoped logging.
//!
//! Steps never log through a process-wide instance. Each `RunContext` carries a
//! [`RunLog`] built over whatever [`LogSink`] the engine was given; the default
//! sink is a bounded [`LogJournal`] that also mirrors every record to `tracing`
//! and broadcasts it to subscribers (the control surface and the WebSocket feed).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Log severity, including the `success` level the UI renders separately
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Success,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(label)
    }
}

/// Optional structured fields attached to a log call
#[derive(Debug, Clone, Default)]
pub struct LogFields {
    pub module: Option<String>,
    pub context_id: Option<String>,
    pub meta: Option<serde_json::Value>,
}

impl LogFields {
    pub fn module(module: impl Into<String>) -> Self {
        Self {
            module: Some(module.into()),
            ..Self::default()
        }
    }
}

/// A single journal record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// What subscribers receive
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LogEvent {
    NewLog { log: LogEntry },
    LogsCleared,
}

/// Logging capability injected into every run
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, fields: LogFields);
}

/// Bounded in-memory journal with broadcast subscribers
pub struct LogJournal {
    entries: Mutex<VecDeque<LogEntry>>,
    next_id: AtomicU64,
    max_entries: usize,
    mirror_to_tracing: bool,
    events: broadcast::Sender<LogEvent>,
}

impl LogJournal {
    pub fn new(max_entries: usize, mirror_to_tracing: bool) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(max_entries.min(1024))),
            next_id: AtomicU64::new(1),
            max_entries: max_entries.max(1),
            mirror_to_tracing,
            events,
        }
    }

    /// Snapshot of the retained entries, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        lock(&self.entries).iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
        let _ = self.events.send(LogEvent::LogsCleared);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.events.subscribe()
    }

    fn mirror(entry: &LogEntry) {
        let module = entry.module.as_deref().unwrap_or("-");
        let context = entry.context_id.as_deref().unwrap_or("-");
        match entry.level {
            LogLevel::Debug => debug!(module, context, "{}", entry.message),
            LogLevel::Info | LogLevel::Success => info!(module, context, "{}", entry.message),
            LogLevel::Warn => warn!(module, context, "{}", entry.message),
            LogLevel::Error => error!(module, context, "{}", entry.message),
        }
    }
}

impl Default for LogJournal {
    fn default() -> Self {
        Self::new(1000, true)
    }
}

impl LogSink for LogJournal {
    fn log(&self, level: LogLevel, message: &str, fields: LogFields) {
        let entry = LogEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            timestamp: Utc::now(),
            level,
            message: message.to_string(),
            module: fields.module,
            context_id: fields.context_id,
            meta: fields.meta,
        };

        if self.mirror_to_tracing {
            Self::mirror(&entry);
        }

        {
            let mut entries = lock(&self.entries);
            while entries.len() >= self.max_entries {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        // No receivers is fine
        let _ = self.events.send(LogEvent::NewLog { log: entry });
    }
}

/// Log handle scoped to one run instance
#[derive(Clone)]
pub struct RunLog {
    sink: Arc<dyn LogSink>,
    context_id: String,
}

impl RunLog {
    pub fn new(sink: Arc<dyn LogSink>, context_id: impl Into<String>) -> Self {
        Self {
            sink,
            context_id: context_id.into(),
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn log(&self, level: LogLevel, module: &str, message: impl AsRef<str>) {
        self.log_with(level, message, LogFields::module(module));
    }

    /// Log with explicit fields; the run's context id is always filled in.
    pub fn log_with(&self, level: LogLevel, message: impl AsRef<str>, mut fields: LogFields) {
        fields.context_id = Some(self.context_id.clone());
        self.sink.log(level, message.as_ref(), fields);
    }

    pub fn debug(&self, module: &str, message: impl AsRef<str>) {
        self.log(LogLevel::Debug, module, message);
    }

    pub fn info(&self, module: &str, message: impl AsRef<str>) {
        self.log(LogLevel::Info, module, message);
    }

    pub fn success(&self, module: &str, message: impl AsRef<str>) {
        self.log(LogLevel::Success, module, message);
    }

    pub fn warn(&self, module: &str, message: impl AsRef<str>) {
        self.log(LogLevel::Warn, module, message);
    }

    pub fn error(&self, module: &str, message: impl AsRef<str>) {
        self.log(LogLevel::Error, module, message);
    }
}

/// Initialize the global tracing subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    // A second init (tests, embedding) is not an error worth surfacing
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
