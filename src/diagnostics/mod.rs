// Module: Diagnostics
// Snapshots of the page taken when a step fails.

use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

use crate::driver::{Driver, DriverError};

/// What the page looked like at the moment of a failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagnosticSnapshot {
    /// `<workflow>_<step_id>`.
    pub name: String,
    pub dom: Option<String>,
    /// PNG bytes, when the driver supports screenshots.
    pub screenshot: Option<Vec<u8>>,
}

/// Destination for failure snapshots.
///
/// Capture is fire-and-forget: the orchestrator logs an `Err` and moves on.
/// On success the sink returns identifiers of what it stored (file paths for
/// `FileSink`), which end up in the workflow report.
pub trait DiagnosticSink: Send + Sync {
    fn capture(&self, snapshot: &DiagnosticSnapshot) -> io::Result<Vec<String>>;
}

/// Takes the DOM dump and screenshot from the driver.
///
/// Each part is best-effort; whatever the driver cannot provide stays `None`.
pub async fn capture_from_driver(driver: &dyn Driver, name: &str) -> DiagnosticSnapshot {
    let dom = match driver.dump_tree().await {
        Ok(dom) => Some(dom),
        Err(e) => {
            warn!(name = %name, error = %e, "Falha ao capturar DOM");
            None
        }
    };

    let screenshot = match driver.screenshot().await {
        Ok(png) => Some(png),
        Err(DriverError::Unsupported(_)) => None,
        Err(e) => {
            warn!(name = %name, error = %e, "Falha ao capturar screenshot");
            None
        }
    };

    DiagnosticSnapshot {
        name: name.to_string(),
        dom,
        screenshot,
    }
}

/// Replaces anything that is not safe in a file name.
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Writes `<name>_<timestamp>.dom.txt` and `<name>_<timestamp>.png` into a directory.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DiagnosticSink for FileSink {
    fn capture(&self, snapshot: &DiagnosticSnapshot) -> io::Result<Vec<String>> {
        fs::create_dir_all(&self.dir)?;
        let mut written = Vec::new();
        let base = format!(
            "{}_{}",
            file_stem(&snapshot.name),
            Utc::now().format("%Y%m%dT%H%M%S%.3f")
        );

        if let Some(dom) = &snapshot.dom {
            let path = self.dir.join(format!("{}.dom.txt", base));
            fs::write(&path, dom)?;
            info!(path = %path.display(), "📄 DOM salvo");
            written.push(path.display().to_string());
        }
        if let Some(png) = &snapshot.screenshot {
            let path = self.dir.join(format!("{}.png", base));
            fs::write(&path, png)?;
            info!(path = %path.display(), "📸 Screenshot salvo");
            written.push(path.display().to_string());
        }
        Ok(written)
    }
}

/// Keeps snapshots in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    snapshots: Mutex<Vec<DiagnosticSnapshot>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> Vec<DiagnosticSnapshot> {
        self.snapshots
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl DiagnosticSink for MemorySink {
    fn capture(&self, snapshot: &DiagnosticSnapshot) -> io::Result<Vec<String>> {
        self.snapshots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(snapshot.clone());
        Ok(vec![snapshot.name.clone()])
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn capture(&self, _snapshot: &DiagnosticSnapshot) -> io::Result<Vec<String>> {
        Ok(Vec::new())
    }
}
