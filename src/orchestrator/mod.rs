//! # Compression Orchestrator Module
//!
//! Scheduler di alto livello: possiede il pool di worker, la macchina a stati
//! dei task, pausa/ripresa/stop e l'aggregazione dell'avanzamento.
//!
//! ## Responsabilità:
//! - Precondizioni di batch (radice di destinazione, encoder, spazio su disco)
//! - Coda non ordinata di task consumata da `max(1, cpu/2)` worker
//! - Comandi (`pause`, `resume`, `stop`) accodati e applicati dal loop dello scheduler
//! - Eventi di stato pubblicati su un canale broadcast
//! - Checkpoint su pausa e stop, rimosso a fine esecuzione completa
//!
//! ## Flusso:
//! ```text
//! start(selection) → precondizioni → spawn scheduler
//!   scheduler: spawn worker ─┬─ comandi → flag pausa/stop → checkpoint
//!                            └─ join worker → riepilogo → Finished
//! ```
//!
//! Gli errori per singolo file non interrompono mai il batch.

pub mod control;
pub mod path_resolver;
pub mod run_stats;
pub mod worker;

use crate::catalog::FileCatalog;
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::Config;
use crate::encoders::EncoderCatalog;
use crate::error::CompressError;
use crate::file_manager::FileManager;
use crate::json_output::RunEvent;
use crate::model::{MediaKind, MediaStatus};
use crate::platform::EngineTools;
use crate::transcoder::TranscodeContext;
use control::{Command, RunControl};
use parking_lot::Mutex;
use run_stats::{ProgressSnapshot, RunClock, RunSummary};
use std::collections::VecDeque;
use path_resolver::PathResolver;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use worker::FileResult;

/// Free space required on the target volume, relative to the estimate
const SPACE_MARGIN: f64 = 1.1;
const EVENT_CAPACITY: usize = 1024;

/// Shared state of one run, read by the reporting path and written by workers
pub(crate) struct RunState {
    catalog: Arc<FileCatalog>,
    context: Arc<TranscodeContext>,
    queue: Mutex<VecDeque<usize>>,
    /// Output path of every catalog file, unique per file
    targets: Vec<PathBuf>,
    total: usize,
    done: AtomicUsize,
    original_bytes: AtomicU64,
    compressed_bytes: AtomicU64,
    clock: Mutex<RunClock>,
    events: broadcast::Sender<RunEvent>,
    /// Keeps progress events in the order of the `done` counter
    report: Mutex<()>,
}

impl RunState {
    fn next_task(&self) -> Option<usize> {
        self.queue.lock().pop_front()
    }

    fn target_of(&self, index: usize) -> Option<&Path> {
        self.targets.get(index).map(PathBuf::as_path)
    }

    fn emit(&self, event: RunEvent) {
        let _ = self.events.send(event);
    }

    fn snapshot(&self) -> ProgressSnapshot {
        let clock = self.clock.lock().clone();
        ProgressSnapshot::new(
            self.done.load(Ordering::Acquire),
            self.total,
            &clock,
            self.original_bytes.load(Ordering::Relaxed),
            self.compressed_bytes.load(Ordering::Relaxed),
        )
    }

    fn count_done(&self) {
        let _order = self.report.lock();
        self.done.fetch_add(1, Ordering::AcqRel);
        self.emit(RunEvent::Progress(self.snapshot()));
    }

    /// Record a file's terminal state. Called once per file, by its worker.
    fn finish(&self, index: usize, result: FileResult) {
        let (path, original_size) = match self.catalog.file(index) {
            Ok(file) => (file.relative_path(), file.original_size),
            Err(_) => (PathBuf::new(), 0),
        };

        if self.catalog.mark_terminal(index, result.status, result.actual_size)
            && result.status.counts_towards_totals()
        {
            self.original_bytes.fetch_add(original_size, Ordering::Relaxed);
            self.compressed_bytes.fetch_add(result.actual_size, Ordering::Relaxed);
        }

        match result.status {
            MediaStatus::Completed => debug!(
                "✅ {}: {} → {} ({:.1}% saved)",
                path.display(),
                FileManager::format_size(original_size),
                FileManager::format_size(result.actual_size),
                FileManager::calculate_reduction(original_size, result.actual_size)
            ),
            MediaStatus::CopiedFallback => warn!(
                "📋 {}: kept original ({})",
                path.display(),
                result.error.as_deref().unwrap_or("compression failed")
            ),
            MediaStatus::Failed => error!(
                "❌ {}: {}",
                path.display(),
                result.error.as_deref().unwrap_or("failed")
            ),
            _ => {}
        }

        self.emit(RunEvent::FileFinished {
            index,
            path,
            status: result.status,
            original_size,
            actual_size: result.actual_size,
            encoder: result.encoder.map(str::to_string),
            error: result.error,
        });
        self.count_done();
    }
}

/// Clears the running flag when the run (or a failed start) ends
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cloneable sender of run commands
#[derive(Debug, Clone)]
pub struct RunController {
    commands: mpsc::UnboundedSender<Command>,
}

impl RunController {
    /// Post a command. Returns `false` once the run has ended.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn pause(&self) -> bool {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> bool {
        self.send(Command::Resume)
    }

    pub fn stop(&self) -> bool {
        self.send(Command::Stop)
    }
}

/// Handle on a started run
pub struct RunHandle {
    controller: RunController,
    state: Arc<RunState>,
    join: JoinHandle<RunSummary>,
}

impl RunHandle {
    pub fn controller(&self) -> RunController {
        self.controller.clone()
    }

    pub fn pause(&self) -> bool {
        self.controller.pause()
    }

    pub fn resume(&self) -> bool {
        self.controller.resume()
    }

    pub fn stop(&self) -> bool {
        self.controller.stop()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.state.events.subscribe()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.snapshot()
    }

    /// Wait for the run to end
    pub async fn wait(self) -> Result<RunSummary, CompressError> {
        self.join
            .await
            .map_err(|e| CompressError::TaskFailed(e.to_string()))
    }
}

/// Top-level scheduler over a scanned catalog
pub struct CompressionOrchestrator {
    config: Config,
    catalog: Arc<FileCatalog>,
    target_root: PathBuf,
    tools: EngineTools,
    encoders: Arc<EncoderCatalog>,
    store: Option<CheckpointStore>,
    restored_clock: Mutex<Option<RunClock>>,
    running: Arc<AtomicBool>,
    events: broadcast::Sender<RunEvent>,
}

impl CompressionOrchestrator {
    pub fn new(config: Config, catalog: Arc<FileCatalog>, target_root: impl Into<PathBuf>) -> Result<Self, CompressError> {
        config
            .validate()
            .map_err(|e| CompressError::Config(e.to_string()))?;
        let tools = EngineTools::locate(&config);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            config,
            catalog,
            target_root: target_root.into(),
            tools,
            encoders: Arc::new(EncoderCatalog::new()),
            store: None,
            restored_clock: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            events,
        })
    }

    /// Rebuild an orchestrator from a checkpoint. Returns the saved selection too.
    pub fn restore(config: Config, checkpoint: &Checkpoint) -> Result<(Self, Vec<usize>), CompressError> {
        let catalog = Arc::new(FileCatalog::from_checkpoint(checkpoint)?);
        let orchestrator = Self::new(config, catalog, checkpoint.target_dir.clone())?;
        *orchestrator.restored_clock.lock() = Some(RunClock::restore(
            checkpoint.start_time,
            checkpoint.paused_duration(),
            checkpoint.saved_at,
        ));
        info!(
            "♻️ Restored run from {} ({} files, saved at {})",
            checkpoint.source_dir.display(),
            checkpoint.catalog_snapshot.len(),
            checkpoint.saved_at
        );
        Ok((orchestrator, checkpoint.selected_indices.clone()))
    }

    pub fn with_checkpoint_store(mut self, store: CheckpointStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_tools(mut self, tools: EngineTools) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_encoders(mut self, encoders: Arc<EncoderCatalog>) -> Self {
        self.encoders = encoders;
        self
    }

    pub fn catalog(&self) -> &Arc<FileCatalog> {
        &self.catalog
    }

    pub fn target_root(&self) -> &Path {
        &self.target_root
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Events of every run started by this orchestrator, including ones not started yet
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Start compressing `selection` (every included file when `None`).
    ///
    /// Files that already ended `Completed` or `CopiedFallback` in this catalog
    /// are not queued again.
    pub async fn start(&self, selection: Option<&[usize]>) -> Result<RunHandle, CompressError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(CompressError::AlreadyRunning);
        }
        let guard = RunningGuard(self.running.clone());

        let selection = self.catalog.resolve_selection(selection)?;
        let tasks: Vec<usize> = selection
            .iter()
            .copied()
            .filter(|&index| {
                !self
                    .catalog
                    .status(index)
                    .map(|status| status.counts_towards_totals())
                    .unwrap_or(false)
            })
            .collect();
        if tasks.is_empty() {
            return Err(CompressError::EmptySelection);
        }

        tokio::fs::create_dir_all(&self.target_root)
            .await
            .map_err(|source| CompressError::TargetRoot {
                path: self.target_root.clone(),
                source,
            })?;

        let has_videos = tasks.iter().any(|&index| {
            self.catalog
                .file(index)
                .map(|file| file.kind == MediaKind::Video)
                .unwrap_or(false)
        });
        if has_videos && self.encoders.probe_available(&self.tools.ffmpeg).await.is_empty() {
            return Err(CompressError::NoEncoders);
        }

        self.check_disk_space(&tasks)?;

        self.catalog.prepare_run(&tasks);
        let clock = self.restored_clock.lock().take().unwrap_or_else(RunClock::start);
        let workers = self.config.worker_count().min(tasks.len()).max(1);

        let context = Arc::new(TranscodeContext {
            config: self.config.clone(),
            tools: self.tools.clone(),
            encoders: self.encoders.clone(),
            source_root: self.catalog.source_root().to_path_buf(),
            target_root: self.target_root.clone(),
        });
        let state = Arc::new(RunState {
            catalog: self.catalog.clone(),
            context,
            queue: Mutex::new(tasks.iter().copied().collect()),
            targets: PathResolver::plan_targets(&self.catalog.snapshot(), &self.target_root, &self.config),
            total: tasks.len(),
            done: AtomicUsize::new(0),
            original_bytes: AtomicU64::new(0),
            compressed_bytes: AtomicU64::new(0),
            clock: Mutex::new(clock),
            events: self.events.clone(),
            report: Mutex::new(()),
        });

        info!(
            "🚀 Compressing {} files into {} with {} workers",
            tasks.len(),
            self.target_root.display(),
            workers
        );
        state.emit(RunEvent::Started {
            source_dir: self.catalog.source_root().to_path_buf(),
            target_dir: self.target_root.clone(),
            total_files: tasks.len(),
            workers,
        });

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler {
            state: state.clone(),
            control: RunControl::new(),
            commands: commands_rx,
            store: self.store.clone(),
            selection,
            tasks,
            workers,
            _guard: guard,
        };
        let join = tokio::spawn(scheduler.run());

        Ok(RunHandle {
            controller: RunController {
                commands: commands_tx,
            },
            state,
            join,
        })
    }

    fn check_disk_space(&self, tasks: &[usize]) -> Result<(), CompressError> {
        let needed = (self.catalog.estimated_size_of(tasks) as f64 * SPACE_MARGIN) as u64;
        match FileManager::available_space(&self.target_root) {
            Some(available) if needed > available => {
                Err(CompressError::InsufficientSpace { needed, available })
            }
            Some(available) => {
                debug!(
                    "Disk space ok: need ~{}, {} free",
                    FileManager::format_size(needed),
                    FileManager::format_size(available)
                );
                Ok(())
            }
            None => {
                debug!("Free space of {} unknown, skipping check", self.target_root.display());
                Ok(())
            }
        }
    }
}

/// Owns the worker pool and applies commands between file boundaries
struct Scheduler {
    state: Arc<RunState>,
    control: RunControl,
    commands: mpsc::UnboundedReceiver<Command>,
    store: Option<CheckpointStore>,
    /// Full selection, as saved in checkpoints
    selection: Vec<usize>,
    /// Files queued by this run
    tasks: Vec<usize>,
    workers: usize,
    _guard: RunningGuard,
}

impl Scheduler {
    async fn run(mut self) -> RunSummary {
        let handles: Vec<_> = (0..self.workers)
            .map(|id| tokio::spawn(worker::run_worker(id, self.state.clone(), self.control.gate())))
            .collect();
        let all_workers = futures::future::join_all(handles);
        tokio::pin!(all_workers);

        let mut commands_open = true;
        loop {
            tokio::select! {
                results = &mut all_workers => {
                    for result in results {
                        if let Err(e) = result {
                            error!("Worker task failed: {}", e);
                        }
                    }
                    break;
                }
                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => self.apply(command).await,
                    None => commands_open = false,
                },
            }
        }

        let stopped = self.control.is_stopped();
        if stopped {
            self.save_checkpoint().await;
        } else if let Some(ref store) = self.store {
            if let Err(e) = store.clear().await {
                warn!("Could not remove checkpoint: {}", e);
            }
        }

        let elapsed = self.state.clock.lock().active_elapsed();
        let summary = RunSummary::from_outcomes(
            self.tasks.iter().filter_map(|&index| {
                let (status, actual) = self.state.catalog.outcome(index)?;
                let original = self.state.catalog.file(index).ok()?.original_size;
                Some((status, original, actual))
            }),
            elapsed,
            stopped,
        );

        info!("🏁 {}", summary.format_summary());
        self.state.emit(RunEvent::Finished(summary.clone()));
        summary
    }

    async fn apply(&mut self, command: Command) {
        match command {
            Command::Pause => {
                if !self.control.pause() {
                    return;
                }
                self.state.clock.lock().pause();
                info!("⏸️ Pausing after in-flight files finish");
                let checkpoint = self.save_checkpoint().await;
                self.state.emit(RunEvent::Paused { checkpoint });
            }
            Command::Resume => {
                if !self.control.resume() {
                    return;
                }
                let pause = self.state.clock.lock().resume().unwrap_or_default();
                info!("▶️ Resumed after {:.1}s", pause.as_secs_f64());
                self.state.emit(RunEvent::Resumed {
                    paused_seconds: pause.as_secs_f64(),
                });
            }
            Command::Stop => {
                if self.control.is_stopped() {
                    return;
                }
                self.control.stop();
                self.state.clock.lock().resume();
                info!("⏹️ Stopping: in-flight files finish, queued files are marked stopped");
                self.state.emit(RunEvent::Stopping);
            }
        }
    }

    async fn save_checkpoint(&self) -> Option<PathBuf> {
        let store = self.store.as_ref()?;
        let (start, paused) = {
            let clock = self.state.clock.lock();
            (clock.start_time(), clock.paused_total())
        };
        let checkpoint = Checkpoint::capture(
            &self.state.catalog,
            &self.state.context.target_root,
            &self.selection,
            start,
            paused,
        );

        match store.save(&checkpoint).await {
            Ok(()) => Some(store.path().to_path_buf()),
            Err(e) => {
                warn!("Could not save checkpoint: {}", e);
                None
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::{FakeEngine, InstalledEngine};
    use serial_test::serial;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        src: PathBuf,
        dst: PathBuf,
    }

    impl Fixture {
        fn new(files: &[&str]) -> Self {
            let dir = TempDir::new().unwrap();
            let src = dir.path().join("src");
            let dst = dir.path().join("dst");
            for name in files {
                let path = src.join(name);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(&path, format!("source bytes of {}", name)).unwrap();
            }
            Self { dir, src, dst }
        }

        fn store(&self) -> CheckpointStore {
            CheckpointStore::new(self.dir.path().join("state/checkpoint.json"))
        }

        async fn orchestrator(&self, engine: &InstalledEngine, config: Config) -> CompressionOrchestrator {
            let config = engine.config(Config {
                auto_exclude_non_media: false,
                estimate_sizes: false,
                ..config
            });
            let catalog = Arc::new(FileCatalog::scan(&self.src, &config, None).await.unwrap());
            CompressionOrchestrator::new(config, catalog, &self.dst)
                .unwrap()
                .with_tools(engine.tools())
                .with_checkpoint_store(self.store())
        }
    }

    fn single_worker() -> Config {
        Config {
            workers: Some(1),
            ..Default::default()
        }
    }

    fn index_of(catalog: &FileCatalog, name: &str) -> usize {
        (0..catalog.len())
            .find(|&i| catalog.file(i).unwrap().file_name == name)
            .unwrap()
    }

    async fn wait_for_first_finished(events: &mut broadcast::Receiver<RunEvent>) {
        loop {
            if let RunEvent::FileFinished { .. } = events.recv().await.unwrap() {
                return;
            }
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_mixed_batch_reaches_terminal_states() {
        let fx = Fixture::new(&["a.png", "b.jpg", "clip.mp4", "old.wmv", "notes.txt", "done.png"]);
        std::fs::create_dir_all(&fx.dst).unwrap();
        std::fs::write(fx.dst.join("done.png"), b"earlier output").unwrap();
        std::fs::create_dir_all(fx.store().path().parent().unwrap()).unwrap();
        std::fs::write(fx.store().path(), b"stale").unwrap();

        let engine = FakeEngine::new(fx.dir.path()).install();
        let orchestrator = fx.orchestrator(&engine, Config::default()).await;
        let mut events = orchestrator.subscribe();

        let summary = orchestrator.start(None).await.unwrap().wait().await.unwrap();
        let catalog = orchestrator.catalog();

        let status = |name: &str| catalog.status(index_of(catalog, name)).unwrap();
        assert_eq!(status("a.png"), MediaStatus::Completed);
        assert_eq!(status("b.jpg"), MediaStatus::Completed);
        assert_eq!(status("clip.mp4"), MediaStatus::Completed);
        assert_eq!(status("notes.txt"), MediaStatus::Completed);
        assert_eq!(status("old.wmv"), MediaStatus::Completed);
        assert_eq!(status("done.png"), MediaStatus::Skipped);

        assert_eq!(summary.total, 6);
        assert_eq!(summary.completed, 5);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.skipped, 1);
        assert!(!summary.stopped);
        assert_eq!(summary.compressed_bytes, 4 * FakeEngine::OUTPUT.len() as u64 + "source bytes of notes.txt".len() as u64);

        assert_eq!(std::fs::read(fx.dst.join("done.png")).unwrap(), b"earlier output");
        assert_eq!(std::fs::read(fx.dst.join("notes.txt")).unwrap(), b"source bytes of notes.txt");
        // no container descriptor for .wmv: encoded into the fallback container
        assert_eq!(std::fs::read(fx.dst.join("old.mp4")).unwrap(), FakeEngine::OUTPUT);
        assert!(!fx.dst.join("old.wmv").exists());
        assert!(!fx.store().path().exists());
        assert!(!orchestrator.is_running());

        let mut last_done = 0;
        let mut finished = false;
        while let Ok(event) = events.try_recv() {
            match event {
                RunEvent::Progress(snapshot) => {
                    assert!(snapshot.done >= last_done);
                    last_done = snapshot.done;
                }
                RunEvent::Finished(s) => {
                    assert_eq!(s, summary);
                    finished = true;
                }
                _ => {}
            }
        }
        assert_eq!(last_done, 6);
        assert!(finished);
    }

    #[tokio::test]
    #[serial]
    async fn test_container_override_keeps_sources_apart() {
        for workers in [1, 2] {
            let fx = Fixture::new(&["a.mov", "a.mp4", "b.mov"]);
            let engine = FakeEngine::new(fx.dir.path()).install();
            let to_mkv = || Config {
                video_container: Some(".mkv".to_string()),
                workers: Some(workers),
                ..Default::default()
            };
            let orchestrator = fx.orchestrator(&engine, to_mkv()).await;

            let summary = orchestrator.start(None).await.unwrap().wait().await.unwrap();
            assert_eq!(summary.completed, 3, "workers={}", workers);
            assert_eq!(summary.skipped, 0, "workers={}", workers);
            assert_eq!(engine.transcode_invocations().len(), 3);
            for name in ["a.mkv", "a.mp4.mkv", "b.mkv"] {
                assert_eq!(std::fs::read(fx.dst.join(name)).unwrap(), FakeEngine::OUTPUT, "{}", name);
            }

            // a later run finds each file's own output
            let rerun = fx.orchestrator(&engine, to_mkv()).await;
            let second = rerun.start(None).await.unwrap().wait().await.unwrap();
            assert_eq!(second.skipped, 3);
            assert_eq!(engine.transcode_invocations().len(), 3);
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_stop_mid_run_then_rerun_skips_existing() {
        let fx = Fixture::new(&["1.png", "2.png", "3.png", "4.png"]);
        let engine = FakeEngine::new(fx.dir.path()).sleep_secs(1).install();
        let orchestrator = fx.orchestrator(&engine, single_worker()).await;

        let handle = orchestrator.start(None).await.unwrap();
        let mut events = handle.subscribe();
        wait_for_first_finished(&mut events).await;
        assert!(handle.stop());
        let summary = handle.wait().await.unwrap();

        assert!(summary.stopped);
        assert!(summary.completed >= 1);
        assert!(summary.stopped_files >= 1);
        assert_eq!(summary.completed + summary.stopped_files, 4);
        let catalog = orchestrator.catalog();
        assert_eq!(catalog.status(0), Some(MediaStatus::Completed));
        assert_eq!(catalog.status(3), Some(MediaStatus::Stopped));
        assert!(!fx.dst.join("4.png").exists());
        assert!(fx.store().path().exists());

        // a fresh scan against the same target skips what the first run wrote
        let fast = FakeEngine::new(fx.dir.path()).install();
        let rerun = fx.orchestrator(&fast, Config::default()).await;
        let second = rerun.start(None).await.unwrap().wait().await.unwrap();
        assert_eq!(second.skipped, summary.completed);
        assert_eq!(second.completed, summary.stopped_files);
        assert!(!fx.store().path().exists());
    }

    #[tokio::test]
    #[serial]
    async fn test_pause_resume_keeps_totals() {
        let fx = Fixture::new(&["1.png", "2.png", "3.png"]);
        let engine = FakeEngine::new(fx.dir.path()).sleep_secs(1).install();
        let orchestrator = fx.orchestrator(&engine, single_worker()).await;

        let handle = orchestrator.start(None).await.unwrap();
        let mut events = handle.subscribe();
        wait_for_first_finished(&mut events).await;
        assert!(handle.pause());

        // let the in-flight file finish, then nothing should move
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let before = handle.snapshot();
        assert!(before.paused);
        assert!(fx.store().path().exists());
        tokio::time::sleep(Duration::from_millis(500)).await;
        let after = handle.snapshot();
        assert_eq!(before.done, after.done);
        assert_eq!(before.original_bytes, after.original_bytes);
        assert_eq!(before.compressed_bytes, after.compressed_bytes);
        assert!(after.done < 3);

        let saved = fx.store().load().await.unwrap();
        assert_eq!(saved.selected_indices, vec![0, 1, 2]);

        assert!(handle.resume());
        let summary = handle.wait().await.unwrap();
        assert_eq!(summary.completed, 3);
        assert!(!summary.stopped);
        assert!(summary.elapsed_seconds < 5.0);
        assert!(!fx.store().path().exists());
    }

    #[tokio::test]
    #[serial]
    async fn test_restore_continues_stopped_run() {
        let fx = Fixture::new(&["1.png", "2.png", "3.png"]);
        let engine = FakeEngine::new(fx.dir.path()).sleep_secs(1).install();
        let orchestrator = fx.orchestrator(&engine, single_worker()).await;

        let handle = orchestrator.start(None).await.unwrap();
        let mut events = handle.subscribe();
        wait_for_first_finished(&mut events).await;
        handle.stop();
        let first = handle.wait().await.unwrap();

        let checkpoint = fx.store().load().await.unwrap();
        let fast = FakeEngine::new(fx.dir.path()).install();
        let (restored, selection) = CompressionOrchestrator::restore(fast.config(Config::default()), &checkpoint).unwrap();
        let restored = restored.with_tools(fast.tools()).with_checkpoint_store(fx.store());
        assert_eq!(restored.target_root(), fx.dst.as_path());

        let second = restored.start(Some(&selection)).await.unwrap().wait().await.unwrap();
        // files completed before the stop are not queued again
        assert_eq!(second.total, first.stopped_files);
        assert_eq!(second.completed, first.stopped_files);
        for i in 0..3 {
            assert_eq!(restored.catalog().status(i), Some(MediaStatus::Completed));
        }
        assert!(!fx.store().path().exists());
    }

    #[tokio::test]
    #[serial]
    async fn test_start_preconditions() {
        let fx = Fixture::new(&["a.png", "b.mp4"]);
        let engine = FakeEngine::new(fx.dir.path()).sleep_secs(1).install();

        let orchestrator = fx.orchestrator(&engine, single_worker()).await;
        assert!(matches!(
            orchestrator.start(Some(&[5])).await,
            Err(CompressError::InvalidIndex { index: 5, len: 2 })
        ));
        orchestrator.catalog().exclude(0).unwrap();
        orchestrator.catalog().exclude(1).unwrap();
        assert!(matches!(orchestrator.start(None).await, Err(CompressError::EmptySelection)));
        orchestrator.catalog().include(0).unwrap();

        let handle = orchestrator.start(None).await.unwrap();
        assert!(matches!(orchestrator.start(None).await, Err(CompressError::AlreadyRunning)));
        handle.stop();
        handle.wait().await.unwrap();
        assert!(!orchestrator.is_running());

        // target root blocked by a regular file
        std::fs::write(fx.dir.path().join("blocked"), b"").unwrap();
        let config = engine.config(Config::default());
        let catalog = Arc::new(FileCatalog::scan(&fx.src, &config, None).await.unwrap());
        let blocked = CompressionOrchestrator::new(config, catalog, fx.dir.path().join("blocked/out")).unwrap();
        assert!(matches!(blocked.start(None).await, Err(CompressError::TargetRoot { .. })));
    }

    #[tokio::test]
    #[serial]
    async fn test_videos_need_encoders() {
        let fx = Fixture::new(&["a.png", "b.mp4"]);
        let config = Config {
            auto_exclude_non_media: false,
            ..Default::default()
        };
        let catalog = Arc::new(FileCatalog::scan(&fx.src, &config, None).await.unwrap());
        let missing = EngineTools {
            ffmpeg: fx.dir.path().join("no-such-ffmpeg"),
            ffprobe: fx.dir.path().join("no-such-ffprobe"),
        };
        let orchestrator = CompressionOrchestrator::new(config, catalog, &fx.dst)
            .unwrap()
            .with_tools(missing);

        assert!(matches!(orchestrator.start(None).await, Err(CompressError::NoEncoders)));
        assert!(!orchestrator.is_running());
    }

    #[tokio::test]
    #[serial]
    async fn test_insufficient_space_aborts() {
        let root = Path::new("/media");
        let mut huge = crate::model::MediaFile::new(root, &root.join("huge.mov"), u64::MAX / 4);
        huge.estimated_size = u64::MAX / 4;
        let mut small = crate::model::MediaFile::new(root, &root.join("small.jpg"), 10);
        small.estimated_size = 5;
        let checkpoint = Checkpoint {
            source_dir: root.to_path_buf(),
            target_dir: PathBuf::new(),
            catalog_snapshot: vec![huge, small],
            excluded_indices: vec![],
            selected_indices: vec![0, 1],
            start_time: chrono::Utc::now(),
            paused_duration_seconds: 0.0,
            saved_at: chrono::Utc::now(),
        };

        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(FileCatalog::from_checkpoint(&checkpoint).unwrap());
        let orchestrator = CompressionOrchestrator::new(Config::default(), catalog, dir.path().join("out"))
            .unwrap()
            .with_encoders(Arc::new(EncoderCatalog::with_available(["libx264"])));

        assert!(matches!(
            orchestrator.start(Some(&[0])).await,
            Err(CompressError::InsufficientSpace { .. })
        ));
    }
}
