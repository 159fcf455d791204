//! # Progress Reporting Module
//!
//! Barra di avanzamento `indicatif` alimentata dagli eventi di un'esecuzione.
//!
//! ## Responsabilità:
//! - `ProgressManager`: barra principale e spinner per operazioni indeterminate
//! - `follow()`: consuma i `RunEvent` e aggiorna la barra fino a `Finished`
//!
//! ## Visual feedback:
//! ```text
//! ⠋ [00:02:15] [========================>---------------] 90/150 (60%) ✅ 2024/img_001.jpg: 45.2% saved
//! ```

use crate::file_manager::FileManager;
use crate::json_output::RunEvent;
use crate::model::MediaStatus;
use crate::orchestrator::run_stats::RunSummary;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}";

/// Manages the terminal progress bar of a run
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    pub fn new(total_files: u64) -> Self {
        let bar = ProgressBar::new(total_files);
        if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// Hidden bar, for non-interactive output
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Advance by one file with a message
    pub fn update(&self, message: &str) {
        self.bar.inc(1);
        self.bar.set_message(message.to_string());
    }

    pub fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Spinner for indeterminate work such as scanning
    pub fn spinner(message: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }

    /// Drive the bar from run events until the run finishes
    pub async fn follow(&self, mut events: broadcast::Receiver<RunEvent>) -> Option<RunSummary> {
        loop {
            match events.recv().await {
                Ok(RunEvent::Finished(summary)) => {
                    self.finish(&summary.format_summary());
                    return Some(summary);
                }
                Ok(event) => self.apply(&event),
                Err(RecvError::Lagged(missed)) => debug!("Progress bar skipped {} events", missed),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    fn apply(&self, event: &RunEvent) {
        match event {
            RunEvent::Started { total_files, .. } => self.bar.set_length(*total_files as u64),
            RunEvent::FileStarted { path, .. } => {
                self.set_message(&format!("🔄 {}", path.display()));
            }
            RunEvent::FileFinished {
                path,
                status,
                original_size,
                actual_size,
                ..
            } => self.update(&file_message(path, *status, *original_size, *actual_size)),
            RunEvent::Paused { .. } => self.set_message("⏸️ paused (type `resume` to continue)"),
            RunEvent::Resumed { .. } => self.set_message("▶️ resumed"),
            RunEvent::Stopping => self.set_message("⏹️ stopping after in-flight files"),
            RunEvent::Error { message } => self.set_message(&format!("❌ {}", message)),
            RunEvent::Progress(_) | RunEvent::Finished(_) => {}
        }
    }
}

fn file_message(path: &std::path::Path, status: MediaStatus, original: u64, actual: u64) -> String {
    match status {
        MediaStatus::Completed => format!(
            "✅ {}: {:.1}% saved",
            path.display(),
            FileManager::calculate_reduction(original, actual)
        ),
        MediaStatus::CopiedFallback => format!("📋 {}: kept original", path.display()),
        MediaStatus::Failed => format!("❌ {}: failed", path.display()),
        MediaStatus::Skipped => format!("⏭️ {}: already done", path.display()),
        other => format!("{}: {}", path.display(), other.label()),
    }
}
