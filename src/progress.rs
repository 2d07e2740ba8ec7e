//! Ingestion progress reporting for the CLI.
//!
//! Renders [`DocumentEvent`]s while `kb add` waits for a document to finish.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use kb_harness_core::models::DocumentStatus;

use crate::registry::DocumentEvent;

/// Reports document progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &DocumentEvent);
}

/// Human-friendly progress on stderr: "add manual.pdf  INDEXING  50%".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &DocumentEvent) {
        let line = match event {
            DocumentEvent::Changed {
                file_name,
                status,
                progress,
                error,
            } => match (status, error) {
                (DocumentStatus::Error, Some(msg)) => {
                    format!("add {}  {}  {}\n", file_name, status, msg)
                }
                _ => format!("add {}  {}  {}\n", file_name, status, format_progress(*progress)),
            },
            DocumentEvent::Removed { file_name } => format!("add {}  removed\n", file_name),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &DocumentEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &DocumentEvent) {}
}

fn format_progress(progress: Option<f32>) -> String {
    match progress {
        Some(p) => format!("{:>3}%", (p.clamp(0.0, 1.0) * 100.0).round() as u32),
        None => "...".to_string(),
    }
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
