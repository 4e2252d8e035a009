//! Build progress reporting.
//!
//! The tree indexer emits one [`IndexEvent`] per indexed, removed or failed
//! document plus a terminal [`IndexEvent::Done`]. Reporters decide where the
//! events go: stderr (human or JSON lines), a channel feeding a streamed HTTP
//! response, or an in-memory log.

use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

/// A single progress event of a build.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IndexEvent {
    Indexed {
        section: String,
        path: String,
    },
    Removed {
        section: String,
        path: String,
    },
    /// The document could not be read or extracted and was skipped.
    Failed {
        section: String,
        path: String,
        error: String,
    },
    Done {
        indexed: u64,
        removed: u64,
        failed: u64,
    },
}

impl fmt::Display for IndexEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexEvent::Indexed { section, path } => write!(f, "Indexing {} [{}]", path, section),
            IndexEvent::Removed { section, path } => write!(f, "Removing {} [{}]", path, section),
            IndexEvent::Failed {
                section,
                path,
                error,
            } => write!(f, "Failed {} [{}]: {}", path, section, error),
            IndexEvent::Done {
                indexed,
                removed,
                failed,
            } => write!(
                f,
                "Done: {} indexed, {} removed, {} failed",
                format_number(*indexed),
                format_number(*removed),
                format_number(*failed)
            ),
        }
    }
}

/// Receives build progress. Called from the indexing pipeline.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &IndexEvent);
}

/// Human-friendly progress on stderr, one line per event.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &IndexEvent) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", event);
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &IndexEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &IndexEvent) {}
}

/// Forwards each event as a text line into a channel. A closed receiver
/// (client went away) is ignored; the build runs to completion.
pub struct ChannelProgress {
    tx: UnboundedSender<String>,
}

impl ChannelProgress {
    pub fn new(tx: UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

impl ProgressReporter for ChannelProgress {
    fn report(&self, event: &IndexEvent) {
        let _ = self.tx.send(format!("{}\n", event));
    }
}

/// Keeps every event in memory.
#[derive(Default)]
pub struct CollectProgress {
    events: Mutex<Vec<IndexEvent>>,
}

impl CollectProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<IndexEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl ProgressReporter for CollectProgress {
    fn report(&self, event: &IndexEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
