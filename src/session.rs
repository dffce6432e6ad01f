//! Per-operation log sessions.
//!
//! A [`LogSession`] collects leveled entries for one logical operation
//! (one request, one job run). The first `ERROR` entry that gets past the
//! credential check, the session's one-shot latch and the site throttle
//! schedules a detached analysis of the whole session.
//!
//! Nothing here returns an error to the caller: logging must never be the
//! reason a request fails.

use crate::callback::{self, AnalysisCallback};
use crate::service::AnalysisService;
use crate::throttle::Admission;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    /// Result of a remote analysis; only written by the dispatcher
    Analysis,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Analysis => "ANALYSIS",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level '{0}'")]
pub struct ParseLevelError(pub String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "analysis" => Ok(Self::Analysis),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub message: String,
}

/// The code site a session was opened at. Used as the throttle key, so it
/// names the site and not the particular invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub function: String,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            function: function.into(),
        }
    }

    /// Hex SHA-256 of `file` and `function`, stable across processes
    pub fn throttle_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.file.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.function.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.function, self.file)
    }
}

#[doc(hidden)]
pub fn __function_path(type_name: &'static str) -> &'static str {
    let mut name = type_name.strip_suffix("::__here").unwrap_or(type_name);
    while let Some(stripped) = name.strip_suffix("::{{closure}}") {
        name = stripped;
    }
    name
}

/// Capture the current file and enclosing function as a [`SourceLocation`].
///
/// ```
/// fn handler() -> log_sage::SourceLocation {
///     log_sage::source_location!()
/// }
///
/// assert!(handler().function.ends_with("handler"));
/// ```
#[macro_export]
macro_rules! source_location {
    () => {{
        fn __here() {}
        fn __type_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        $crate::session::SourceLocation::new(
            file!(),
            $crate::session::__function_path(__type_name_of(__here)),
        )
    }};
}

/// Point-in-time copy of what the prompt builder needs
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub source: SourceLocation,
    pub tags: HashMap<String, String>,
    pub last_error: Option<String>,
    pub summary: String,
}

#[derive(Default)]
struct SessionState {
    tags: HashMap<String, String>,
    entries: Vec<LogEntry>,
    last_error: Option<String>,
}

struct SessionInner {
    id: Uuid,
    source: SourceLocation,
    throttle_key: String,
    started_at: DateTime<Utc>,
    started: Instant,
    state: Mutex<SessionState>,
    dispatched: AtomicBool,
    callback: Option<AnalysisCallback>,
    read_source: bool,
    service: AnalysisService,
}

/// Log buffer for one logical operation.
///
/// Cloning is cheap and clones share state, so a handler can hand the
/// session to tasks it spawns.
#[derive(Clone)]
pub struct LogSession {
    inner: Arc<SessionInner>,
}

impl LogSession {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn source(&self) -> &SourceLocation {
        &self.inner.source
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Whether this session has consumed its single analysis attempt
    pub fn is_dispatched(&self) -> bool {
        self.inner.dispatched.load(Ordering::Acquire)
    }

    pub fn reads_source(&self) -> bool {
        self.inner.read_source
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().entries.clone()
    }

    pub fn tags(&self) -> HashMap<String, String> {
        self.lock().tags.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub fn has_errors(&self) -> bool {
        self.lock().last_error.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.started.elapsed()
    }

    pub fn debug(&self, message: impl fmt::Display) {
        self.append(Level::Debug, message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.append(Level::Info, message);
    }

    pub fn warn(&self, message: impl fmt::Display) {
        self.append(Level::Warn, message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.append(Level::Error, message);
    }

    /// Append an entry. Whitespace-only messages are dropped.
    ///
    /// `ERROR` entries may schedule an analysis; the network call always
    /// happens on a detached task.
    pub fn append(&self, level: Level, message: impl fmt::Display) {
        let message = message.to_string();
        if message.trim().is_empty() {
            return;
        }

        {
            let mut state = self.lock();
            if level == Level::Error {
                state.last_error = Some(message.clone());
            }
            state.entries.push(LogEntry {
                timestamp: Utc::now(),
                level,
                message,
            });
        }

        if level == Level::Error {
            self.request_analysis();
        }
    }

    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().tags.insert(key.into(), value.into());
    }

    pub fn set_tags<I, K, V>(&self, tags: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut state = self.lock();
        for (key, value) in tags {
            state.tags.insert(key.into(), value.into());
        }
    }

    /// Markdown rendering of the session. The duration line comes last.
    pub fn summary(&self) -> String {
        let state = self.lock();
        self.render(&state, true)
    }

    /// Emit the summary through `tracing`
    pub fn print(&self) {
        let summary = self.summary();
        if self.has_errors() {
            tracing::warn!(session_id = %self.id(), source = %self.source(), "\n{}", summary);
        } else {
            tracing::info!(session_id = %self.id(), source = %self.source(), "\n{}", summary);
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        SessionSnapshot {
            id: self.inner.id,
            source: self.inner.source.clone(),
            tags: state.tags.clone(),
            last_error: state.last_error.clone(),
            // Tags travel separately as prompt markers
            summary: self.render(&state, false),
        }
    }

    /// Record a finished analysis, re-emit the summary and hand the text to
    /// the callback, if any.
    pub(crate) fn complete_analysis(&self, analysis: &str) {
        self.append(Level::Analysis, analysis);
        self.print();

        if let Some(cb) = &self.inner.callback {
            callback::invoke(cb, self.id(), analysis);
        }
    }

    fn request_analysis(&self) {
        let service = &self.inner.service;

        if !service.has_credential() {
            crate::metrics::record_admission("no_credential");
            tracing::debug!(
                session_id = %self.id(),
                "No provider credential configured, skipping analysis"
            );
            return;
        }

        if self
            .inner
            .dispatched
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            crate::metrics::record_admission("already_dispatched");
            return;
        }

        let window = service.config().throttle.window();
        if service.registry().admit(&self.inner.throttle_key, window) == Admission::Throttled {
            // Throttled sessions keep their attempt
            self.inner.dispatched.store(false, Ordering::Release);
            crate::metrics::record_admission("throttled");
            tracing::debug!(
                session_id = %self.id(),
                source = %self.source(),
                window_secs = window.as_secs(),
                "Failure site analysed recently, skipping analysis"
            );
            return;
        }

        crate::metrics::record_admission("admitted");
        tracing::debug!(
            session_id = %self.id(),
            source = %self.source(),
            "Scheduling failure analysis"
        );
        service.spawn_analysis(self.clone());
    }

    fn render(&self, state: &SessionState, with_tags: bool) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "## Log session {}", self.inner.id);
        let _ = writeln!(
            out,
            "**Source:** `{}` / `{}`",
            self.inner.source.file, self.inner.source.function
        );
        if with_tags && !state.tags.is_empty() {
            let mut tags: Vec<_> = state.tags.iter().collect();
            tags.sort();
            let rendered: Vec<String> = tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            let _ = writeln!(out, "**Tags:** {}", rendered.join(", "));
        }
        let _ = writeln!(out, "**Started:** {}", self.inner.started_at.to_rfc3339());
        out.push('\n');

        for entry in &state.entries {
            let _ = write!(
                out,
                "- `{}` **{}** ",
                entry.timestamp.format("%H:%M:%S%.3f"),
                entry.level
            );
            let mut lines = entry.message.lines();
            if let Some(first) = lines.next() {
                out.push_str(first);
            }
            for line in lines {
                out.push_str("\n  ");
                out.push_str(line);
            }
            out.push('\n');
        }

        out.push('\n');
        let _ = write!(out, "**Duration:** {} ms", self.inner.started.elapsed().as_millis());
        out
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for LogSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSession")
            .field("id", &self.inner.id)
            .field("source", &self.inner.source)
            .field("dispatched", &self.is_dispatched())
            .finish()
    }
}

/// Configures a [`LogSession`] before it is opened
pub struct SessionBuilder {
    service: AnalysisService,
    id: Option<Uuid>,
    source: SourceLocation,
    tags: HashMap<String, String>,
    callback: Option<AnalysisCallback>,
    read_source: bool,
}

impl SessionBuilder {
    pub(crate) fn new(service: AnalysisService, source: SourceLocation) -> Self {
        Self {
            service,
            id: None,
            source,
            tags: HashMap::new(),
            callback: None,
            read_source: true,
        }
    }

    /// Use a caller-supplied correlation id instead of a fresh one
    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn tags<I, K, V>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.tags
            .extend(tags.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Run `callback` with the analysis text once it arrives
    pub fn on_analysis<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str) -> Result<(), callback::BoxError> + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Never read the session's source file into the prompt
    pub fn without_source_excerpt(mut self) -> Self {
        self.read_source = false;
        self
    }

    pub fn build(self) -> LogSession {
        let throttle_key = self.source.throttle_key();
        LogSession {
            inner: Arc::new(SessionInner {
                id: self.id.unwrap_or_else(Uuid::new_v4),
                source: self.source,
                throttle_key,
                started_at: Utc::now(),
                started: Instant::now(),
                state: Mutex::new(SessionState {
                    tags: self.tags,
                    ..SessionState::default()
                }),
                dispatched: AtomicBool::new(false),
                callback: self.callback,
                read_source: self.read_source,
                service: self.service,
            }),
        }
    }
}
