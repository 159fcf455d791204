//! # Run Statistics Module
//!
//! Tempo attivo, avanzamento e riepilogo finale di un'esecuzione.
//!
//! ## Responsabilità:
//! - `RunClock`: tempo trascorso al netto delle pause, ETA
//! - `ProgressSnapshot`: vista istantanea per il reporting (può essere leggermente vecchia)
//! - `RunSummary`: aggregazione finale, solo su `Completed` e `CopiedFallback`

use crate::file_manager::FileManager;
use crate::model::MediaStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Wall-clock bookkeeping of a run, excluding pauses
#[derive(Debug, Clone)]
pub struct RunClock {
    start: DateTime<Utc>,
    paused_total: Duration,
    paused_at: Option<DateTime<Utc>>,
}

impl RunClock {
    pub fn start() -> Self {
        Self {
            start: Utc::now(),
            paused_total: Duration::ZERO,
            paused_at: None,
        }
    }

    /// Continue a run saved earlier. The time the process was down counts as paused.
    pub fn restore(start: DateTime<Utc>, paused: Duration, saved_at: DateTime<Utc>) -> Self {
        let downtime = since(saved_at, Utc::now());
        Self {
            start,
            paused_total: paused + downtime,
            paused_at: None,
        }
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Record the pause instant. Returns `false` if already paused.
    pub fn pause(&mut self) -> bool {
        if self.paused_at.is_some() {
            return false;
        }
        self.paused_at = Some(Utc::now());
        true
    }

    /// Fold the elapsed pause into the total. Returns the length of this pause.
    pub fn resume(&mut self) -> Option<Duration> {
        let paused_at = self.paused_at.take()?;
        let pause = since(paused_at, Utc::now());
        self.paused_total += pause;
        Some(pause)
    }

    /// Total paused time, including a pause still in progress
    pub fn paused_total(&self) -> Duration {
        let current = self
            .paused_at
            .map(|at| since(at, Utc::now()))
            .unwrap_or_default();
        self.paused_total + current
    }

    pub fn active_elapsed(&self) -> Duration {
        since(self.start, Utc::now()).saturating_sub(self.paused_total())
    }

    /// Remaining time extrapolated from the average so far
    pub fn eta(&self, done: usize, total: usize) -> Option<Duration> {
        if done == 0 || done > total {
            return None;
        }
        let per_file = self.active_elapsed().as_secs_f64() / done as f64;
        Duration::try_from_secs_f64(per_file * (total - done) as f64).ok()
    }
}

fn since(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or_default()
}

/// Progress of a run at one instant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// Files in a terminal state
    pub done: usize,
    pub total: usize,
    pub fraction: f64,
    pub paused: bool,
    pub elapsed_seconds: f64,
    pub eta_seconds: Option<f64>,
    /// Original bytes of the files counted in `compressed_bytes`
    pub original_bytes: u64,
    pub compressed_bytes: u64,
}

impl ProgressSnapshot {
    pub fn new(done: usize, total: usize, clock: &RunClock, original_bytes: u64, compressed_bytes: u64) -> Self {
        let fraction = if total > 0 {
            done as f64 / total as f64
        } else {
            1.0
        };
        Self {
            done,
            total,
            fraction,
            paused: clock.is_paused(),
            elapsed_seconds: clock.active_elapsed().as_secs_f64(),
            eta_seconds: clock.eta(done, total).map(|eta| eta.as_secs_f64()),
            original_bytes,
            compressed_bytes,
        }
    }
}

/// Final statistics of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub copied_fallback: usize,
    pub failed: usize,
    pub stopped_files: usize,
    pub skipped: usize,
    /// Original bytes over `Completed` and `CopiedFallback` files
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    /// compressed / original
    pub ratio: f64,
    pub saved_percent: f64,
    pub elapsed_seconds: f64,
    /// The run was stopped before every file was processed
    pub stopped: bool,
}

impl RunSummary {
    /// Aggregate `(status, original_size, actual_size)` triples
    pub fn from_outcomes<I>(outcomes: I, elapsed: Duration, stopped: bool) -> Self
    where
        I: IntoIterator<Item = (MediaStatus, u64, u64)>,
    {
        let mut summary = Self {
            elapsed_seconds: elapsed.as_secs_f64(),
            stopped,
            ..Default::default()
        };

        for (status, original, actual) in outcomes {
            summary.total += 1;
            match status {
                MediaStatus::Completed => summary.completed += 1,
                MediaStatus::CopiedFallback => summary.copied_fallback += 1,
                MediaStatus::Failed => summary.failed += 1,
                MediaStatus::Stopped => summary.stopped_files += 1,
                MediaStatus::Skipped => summary.skipped += 1,
                MediaStatus::Waiting | MediaStatus::Running => {}
            }
            if status.counts_towards_totals() {
                summary.original_bytes += original;
                summary.compressed_bytes += actual;
            }
        }

        if summary.original_bytes > 0 {
            summary.ratio = summary.compressed_bytes as f64 / summary.original_bytes as f64;
            summary.saved_percent =
                FileManager::calculate_reduction(summary.original_bytes, summary.compressed_bytes);
        }
        summary
    }

    pub fn bytes_saved(&self) -> u64 {
        self.original_bytes.saturating_sub(self.compressed_bytes)
    }

    pub fn format_summary(&self) -> String {
        format!(
            "Processed: {} files | Compressed: {} | Copied: {} | Failed: {} | Skipped: {} | Stopped: {} | Saved: {} ({:.1}%)",
            self.total,
            self.completed,
            self.copied_fallback,
            self.failed,
            self.skipped,
            self.stopped_files,
            FileManager::format_size(self.bytes_saved()),
            self.saved_percent
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_only_finished_outputs() {
        let summary = RunSummary::from_outcomes(
            vec![
                (MediaStatus::Completed, 1000, 400),
                (MediaStatus::CopiedFallback, 500, 500),
                (MediaStatus::Failed, 800, 0),
                (MediaStatus::Skipped, 300, 120),
                (MediaStatus::Stopped, 200, 0),
            ],
            Duration::from_secs(10),
            true,
        );

        assert_eq!(summary.total, 5);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.copied_fallback, 1);
        assert_eq!(summary.original_bytes, 1500);
        assert_eq!(summary.compressed_bytes, 900);
        assert!((summary.ratio - 0.6).abs() < 1e-9);
        assert!((summary.saved_percent - 40.0).abs() < 1e-9);
        assert_eq!(summary.bytes_saved(), 600);
        assert!(summary.stopped);
    }

    #[test]
    fn test_empty_summary_has_zero_ratio() {
        let summary = RunSummary::from_outcomes(Vec::new(), Duration::ZERO, false);
        assert_eq!(summary.ratio, 0.0);
        assert!(summary.format_summary().starts_with("Processed: 0 files"));
    }

    #[test]
    fn test_clock_excludes_pauses() {
        let mut clock = RunClock::restore(
            Utc::now() - chrono::Duration::seconds(100),
            Duration::from_secs(30),
            Utc::now(),
        );
        let elapsed = clock.active_elapsed().as_secs_f64();
        assert!((69.0..=71.0).contains(&elapsed), "elapsed {}", elapsed);

        assert!(clock.pause());
        assert!(!clock.pause());
        assert!(clock.is_paused());
        assert!(clock.resume().is_some());
        assert!(clock.resume().is_none());
        assert!(clock.paused_total() >= Duration::from_secs(30));
    }

    #[test]
    fn test_restore_counts_downtime_as_paused() {
        let clock = RunClock::restore(
            Utc::now() - chrono::Duration::seconds(100),
            Duration::ZERO,
            Utc::now() - chrono::Duration::seconds(60),
        );
        let elapsed = clock.active_elapsed().as_secs_f64();
        assert!((39.0..=41.0).contains(&elapsed), "elapsed {}", elapsed);
    }

    #[test]
    fn test_eta() {
        let clock = RunClock::restore(Utc::now() - chrono::Duration::seconds(20), Duration::ZERO, Utc::now());
        assert_eq!(clock.eta(0, 10), None);
        let eta = clock.eta(4, 10).unwrap().as_secs_f64();
        assert!((29.0..=31.0).contains(&eta), "eta {}", eta);
        assert_eq!(clock.eta(10, 10), Some(Duration::ZERO));

        let snapshot = ProgressSnapshot::new(4, 10, &clock, 100, 50);
        assert!((snapshot.fraction - 0.4).abs() < 1e-9);
        assert!(!snapshot.paused);
    }
}
