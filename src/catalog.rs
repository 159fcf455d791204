//! # File Catalog Module
//!
//! Collezione in memoria dei file scansionati, con esclusioni e totali aggregati.
//!
//! ## Responsabilità:
//! - Scansione ricorsiva e classificazione (immagine, video, altro)
//! - Esclusione automatica dei file non-media (se abilitata)
//! - Totali `original`/`estimated` sui soli file inclusi, mantenuti in O(1)
//!   da `exclude`/`include`
//! - Stato per file (`Waiting → Running → terminale`) con transizioni validate
//! - Totale compresso aggiornato solo dal worker che chiude il file
//!
//! ## Concorrenza:
//! I contatori aggregati sono atomici: chi legge per il reporting può vedere
//! valori leggermente vecchi ma mai inconsistenti per singolo contatore.
//! Ogni entry ha un proprio lock, mai tenuto attraverso un `.await`.
//!
//! Gli indici sono validi solo per la generazione di scansione che li ha emessi.

use crate::checkpoint::Checkpoint;
use crate::config::Config;
use crate::error::CompressError;
use crate::estimator::SizeEstimator;
use crate::file_manager::FileManager;
use crate::model::{MediaFile, MediaKind, MediaStatus};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, info};

const ESTIMATE_CONCURRENCY: usize = 8;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct Entry {
    file: MediaFile,
    /// Current status and actual output size
    live: Mutex<(MediaStatus, u64)>,
    excluded: AtomicBool,
}

impl Entry {
    fn new(file: MediaFile, excluded: bool) -> Self {
        let live = Mutex::new((file.status, file.actual_size));
        Self {
            file,
            live,
            excluded: AtomicBool::new(excluded),
        }
    }
}

/// Point-in-time view of the aggregate counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogTotals {
    pub files: usize,
    pub excluded_files: usize,
    pub included_original: u64,
    pub included_estimated: u64,
    pub excluded_original: u64,
    pub excluded_estimated: u64,
    /// Output bytes of files that ended `Completed` or `CopiedFallback`
    pub compressed: u64,
}

#[derive(Debug)]
pub struct FileCatalog {
    source_root: PathBuf,
    generation: u64,
    entries: Vec<Entry>,
    included_original: AtomicU64,
    included_estimated: AtomicU64,
    excluded_original: AtomicU64,
    excluded_estimated: AtomicU64,
    excluded_files: AtomicUsize,
    compressed: AtomicU64,
}

impl FileCatalog {
    /// Scan `root` recursively and estimate every file.
    ///
    /// Files whose size cannot be read are recorded with size 0.
    pub async fn scan(
        root: &Path,
        config: &Config,
        estimator: Option<&SizeEstimator>,
    ) -> Result<Self, CompressError> {
        let metadata = tokio::fs::metadata(root).await?;
        if !metadata.is_dir() {
            return Err(CompressError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            )));
        }

        info!("🔍 Scanning {}", root.display());
        let walk_root = root.to_path_buf();
        let discovered = tokio::task::spawn_blocking(move || FileManager::discover(&walk_root))
            .await
            .map_err(|e| CompressError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        let mut files: Vec<MediaFile> = discovered
            .into_iter()
            .map(|found| MediaFile::new(root, &found.path, found.size.unwrap_or(0)))
            .collect();

        if let (Some(estimator), true) = (estimator, config.estimate_sizes) {
            let estimates: Vec<u64> = stream::iter(files.iter())
                .map(|file| estimator.estimate(file, config))
                .buffered(ESTIMATE_CONCURRENCY)
                .collect()
                .await;
            for (file, estimate) in files.iter_mut().zip(estimates) {
                file.estimated_size = estimate;
            }
        }

        let excluded: BTreeSet<usize> = if config.auto_exclude_non_media {
            files
                .iter()
                .enumerate()
                .filter(|(_, f)| f.kind == MediaKind::Other)
                .map(|(i, _)| i)
                .collect()
        } else {
            BTreeSet::new()
        };

        let catalog = Self::build(root.to_path_buf(), files, &excluded);
        let totals = catalog.totals();
        info!(
            "📁 Found {} files ({} excluded), {} → ~{}",
            totals.files,
            totals.excluded_files,
            FileManager::format_size(totals.included_original),
            FileManager::format_size(totals.included_estimated)
        );
        Ok(catalog)
    }

    /// Rebuild a catalog from a saved checkpoint. Files caught mid-run go back to `Waiting`.
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Result<Self, CompressError> {
        let len = checkpoint.catalog_snapshot.len();
        let excluded: BTreeSet<usize> = checkpoint.excluded_indices.iter().copied().collect();
        if let Some(&index) = excluded.iter().find(|&&i| i >= len) {
            return Err(CompressError::Checkpoint(format!(
                "excluded index {} out of range for {} files",
                index, len
            )));
        }

        let files = checkpoint
            .catalog_snapshot
            .iter()
            .cloned()
            .map(|mut file| {
                if file.status == MediaStatus::Running {
                    file.status = MediaStatus::Waiting;
                    file.actual_size = 0;
                }
                file
            })
            .collect();

        Ok(Self::build(checkpoint.source_dir.clone(), files, &excluded))
    }

    fn build(source_root: PathBuf, files: Vec<MediaFile>, excluded: &BTreeSet<usize>) -> Self {
        let mut catalog = Self {
            source_root,
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            entries: Vec::with_capacity(files.len()),
            included_original: AtomicU64::new(0),
            included_estimated: AtomicU64::new(0),
            excluded_original: AtomicU64::new(0),
            excluded_estimated: AtomicU64::new(0),
            excluded_files: AtomicUsize::new(0),
            compressed: AtomicU64::new(0),
        };

        for (index, file) in files.into_iter().enumerate() {
            let is_excluded = excluded.contains(&index);
            let (original, estimated) = (file.original_size, file.estimated_size);
            if is_excluded {
                catalog.excluded_original.fetch_add(original, Ordering::Relaxed);
                catalog.excluded_estimated.fetch_add(estimated, Ordering::Relaxed);
                catalog.excluded_files.fetch_add(1, Ordering::Relaxed);
            } else {
                catalog.included_original.fetch_add(original, Ordering::Relaxed);
                catalog.included_estimated.fetch_add(estimated, Ordering::Relaxed);
            }
            if file.status.counts_towards_totals() {
                catalog.compressed.fetch_add(file.actual_size, Ordering::Relaxed);
            }
            catalog.entries.push(Entry::new(file, is_excluded));
        }
        catalog
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Scan generation that issued the current indices
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, index: usize) -> Result<&Entry, CompressError> {
        self.entries.get(index).ok_or(CompressError::InvalidIndex {
            index,
            len: self.entries.len(),
        })
    }

    /// Identity and sizes of one file, as scanned
    pub fn file(&self, index: usize) -> Result<&MediaFile, CompressError> {
        Ok(&self.entry(index)?.file)
    }

    /// Exclude a file from totals and runs. Returns `false` if it already was.
    pub fn exclude(&self, index: usize) -> Result<bool, CompressError> {
        let entry = self.entry(index)?;
        if entry.excluded.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        self.included_original.fetch_sub(entry.file.original_size, Ordering::Relaxed);
        self.included_estimated.fetch_sub(entry.file.estimated_size, Ordering::Relaxed);
        self.excluded_original.fetch_add(entry.file.original_size, Ordering::Relaxed);
        self.excluded_estimated.fetch_add(entry.file.estimated_size, Ordering::Relaxed);
        self.excluded_files.fetch_add(1, Ordering::Relaxed);
        debug!("Excluded #{} {}", index, entry.file.relative_path().display());
        Ok(true)
    }

    /// Include a previously excluded file. Returns `false` if it already was included.
    pub fn include(&self, index: usize) -> Result<bool, CompressError> {
        let entry = self.entry(index)?;
        if !entry.excluded.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        self.excluded_original.fetch_sub(entry.file.original_size, Ordering::Relaxed);
        self.excluded_estimated.fetch_sub(entry.file.estimated_size, Ordering::Relaxed);
        self.excluded_files.fetch_sub(1, Ordering::Relaxed);
        self.included_original.fetch_add(entry.file.original_size, Ordering::Relaxed);
        self.included_estimated.fetch_add(entry.file.estimated_size, Ordering::Relaxed);
        debug!("Included #{} {}", index, entry.file.relative_path().display());
        Ok(true)
    }

    pub fn is_excluded(&self, index: usize) -> bool {
        self.entries
            .get(index)
            .map(|e| e.excluded.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn excluded_indices(&self) -> BTreeSet<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.excluded.load(Ordering::Acquire))
            .map(|(i, _)| i)
            .collect()
    }

    /// Validate a selection and drop excluded files. `None` selects every included file.
    pub fn resolve_selection(&self, selection: Option<&[usize]>) -> Result<Vec<usize>, CompressError> {
        let candidates: BTreeSet<usize> = match selection {
            Some(indices) => {
                for &index in indices {
                    self.entry(index)?;
                }
                indices.iter().copied().collect()
            }
            None => (0..self.entries.len()).collect(),
        };

        Ok(candidates
            .into_iter()
            .filter(|&index| !self.is_excluded(index))
            .collect())
    }

    pub fn status(&self, index: usize) -> Option<MediaStatus> {
        self.entries.get(index).map(|e| e.live.lock().0)
    }

    /// Current status and actual output size
    pub fn outcome(&self, index: usize) -> Option<(MediaStatus, u64)> {
        self.entries.get(index).map(|e| *e.live.lock())
    }

    /// Put selected files back to `Waiting` for a new run, dropping earlier results
    pub fn prepare_run(&self, indices: &[usize]) {
        for &index in indices {
            if let Some(entry) = self.entries.get(index) {
                let mut live = entry.live.lock();
                if live.0.counts_towards_totals() {
                    self.compressed.fetch_sub(live.1, Ordering::Relaxed);
                }
                *live = (MediaStatus::Waiting, 0);
            }
        }
    }

    /// `Waiting → Running`. Returns `false` if the file was not waiting.
    pub fn mark_running(&self, index: usize) -> bool {
        let Some(entry) = self.entries.get(index) else {
            return false;
        };
        let mut live = entry.live.lock();
        if !live.0.can_transition_to(MediaStatus::Running) {
            return false;
        }
        live.0 = MediaStatus::Running;
        true
    }

    /// Close a file with a terminal status. Only the owning worker calls this.
    pub fn mark_terminal(&self, index: usize, status: MediaStatus, actual_size: u64) -> bool {
        let Some(entry) = self.entries.get(index) else {
            return false;
        };
        let mut live = entry.live.lock();
        if !status.is_terminal() || !live.0.can_transition_to(status) {
            debug!(
                "Ignoring transition {} -> {} for #{}",
                live.0.label(),
                status.label(),
                index
            );
            return false;
        }
        *live = (status, actual_size);
        if status.counts_towards_totals() {
            self.compressed.fetch_add(actual_size, Ordering::Relaxed);
        }
        true
    }

    pub fn totals(&self) -> CatalogTotals {
        CatalogTotals {
            files: self.entries.len(),
            excluded_files: self.excluded_files.load(Ordering::Relaxed),
            included_original: self.included_original.load(Ordering::Relaxed),
            included_estimated: self.included_estimated.load(Ordering::Relaxed),
            excluded_original: self.excluded_original.load(Ordering::Relaxed),
            excluded_estimated: self.excluded_estimated.load(Ordering::Relaxed),
            compressed: self.compressed.load(Ordering::Relaxed),
        }
    }

    /// Estimated bytes of a set of files
    pub fn estimated_size_of(&self, indices: &[usize]) -> u64 {
        indices
            .iter()
            .filter_map(|&i| self.entries.get(i))
            .map(|e| e.file.estimated_size)
            .sum()
    }

    /// Copy of every file with its live status and actual size
    pub fn snapshot(&self) -> Vec<MediaFile> {
        self.entries
            .iter()
            .map(|entry| {
                let (status, actual_size) = *entry.live.lock();
                MediaFile {
                    status,
                    actual_size,
                    ..entry.file.clone()
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    fn sample_files(root: &Path) -> Vec<MediaFile> {
        [("a.jpg", 100), ("b.mp4", 1000), ("notes.txt", 10), ("x/c.png", 300), ("x/d.mkv", 5000)]
            .iter()
            .map(|(name, size)| {
                let mut file = MediaFile::new(root, &root.join(name), *size);
                file.estimated_size = size / 2;
                file
            })
            .collect()
    }

    fn catalog() -> FileCatalog {
        let root = PathBuf::from("/media");
        FileCatalog::build(root.clone(), sample_files(&root), &BTreeSet::new())
    }

    fn assert_consistent(catalog: &FileCatalog) {
        let totals = catalog.totals();
        let all_original: u64 = catalog.entries.iter().map(|e| e.file.original_size).sum();
        let all_estimated: u64 = catalog.entries.iter().map(|e| e.file.estimated_size).sum();
        assert_eq!(totals.included_original + totals.excluded_original, all_original);
        assert_eq!(totals.included_estimated + totals.excluded_estimated, all_estimated);

        let included: u64 = (0..catalog.len())
            .filter(|&i| !catalog.is_excluded(i))
            .map(|i| catalog.file(i).unwrap().original_size)
            .sum();
        assert_eq!(totals.included_original, included);
    }

    #[test]
    fn test_exclude_include_keeps_totals() {
        let catalog = catalog();
        assert_eq!(catalog.totals().included_original, 6410);

        let sequence = [(0, true), (3, true), (0, true), (3, false), (4, true), (0, false), (2, true)];
        for (index, exclude) in sequence {
            if exclude {
                assert_ok!(catalog.exclude(index));
            } else {
                assert_ok!(catalog.include(index));
            }
            assert_consistent(&catalog);
        }

        assert_eq!(catalog.excluded_indices(), BTreeSet::from([2, 4]));
        assert_eq!(catalog.totals().excluded_files, 2);
        assert_eq!(catalog.totals().included_original, 100 + 1000 + 300);
    }

    #[test]
    fn test_double_exclude_is_idempotent() {
        let catalog = catalog();
        assert!(catalog.exclude(1).unwrap());
        assert!(!catalog.exclude(1).unwrap());
        assert!(!catalog.include(2).unwrap());
        assert_eq!(catalog.totals().excluded_original, 1000);
        assert_err!(catalog.exclude(99));
    }

    #[test]
    fn test_resolve_selection() {
        let catalog = catalog();
        catalog.exclude(2).unwrap();

        assert_eq!(catalog.resolve_selection(None).unwrap(), vec![0, 1, 3, 4]);
        assert_eq!(catalog.resolve_selection(Some(&[4, 2, 0, 4])).unwrap(), vec![0, 4]);
        assert!(matches!(
            catalog.resolve_selection(Some(&[7])),
            Err(CompressError::InvalidIndex { index: 7, len: 5 })
        ));
    }

    #[test]
    fn test_state_machine_and_compressed_total() {
        let catalog = catalog();
        assert!(!catalog.mark_terminal(0, MediaStatus::Completed, 40));
        assert!(catalog.mark_running(0));
        assert!(!catalog.mark_running(0));
        assert!(catalog.mark_terminal(0, MediaStatus::Completed, 40));
        assert!(!catalog.mark_terminal(0, MediaStatus::Failed, 0));

        assert!(catalog.mark_running(1));
        assert!(catalog.mark_terminal(1, MediaStatus::Failed, 0));
        assert!(catalog.mark_terminal(2, MediaStatus::Stopped, 0));
        assert!(!catalog.mark_terminal(3, MediaStatus::Waiting, 0));

        assert_eq!(catalog.totals().compressed, 40);
        assert_eq!(catalog.status(0), Some(MediaStatus::Completed));
        assert_eq!(catalog.status(2), Some(MediaStatus::Stopped));

        catalog.prepare_run(&[0, 2]);
        assert_eq!(catalog.status(0), Some(MediaStatus::Waiting));
        assert_eq!(catalog.status(2), Some(MediaStatus::Waiting));
        assert_eq!(catalog.totals().compressed, 0);
    }

    #[test]
    fn test_from_checkpoint_restores_state() {
        let root = PathBuf::from("/media");
        let mut files = sample_files(&root);
        files[0].status = MediaStatus::Completed;
        files[0].actual_size = 30;
        files[1].status = MediaStatus::Running;

        let checkpoint = Checkpoint {
            source_dir: root.clone(),
            target_dir: PathBuf::from("/out"),
            catalog_snapshot: files,
            excluded_indices: vec![2, 4],
            selected_indices: vec![0, 1, 3],
            start_time: Utc::now(),
            paused_duration_seconds: 0.0,
            saved_at: Utc::now(),
        };

        let catalog = FileCatalog::from_checkpoint(&checkpoint).unwrap();
        assert_eq!(catalog.excluded_indices(), BTreeSet::from([2, 4]));
        assert_eq!(catalog.status(1), Some(MediaStatus::Waiting));
        assert_eq!(catalog.status(0), Some(MediaStatus::Completed));
        assert_eq!(catalog.totals().compressed, 30);
        assert_consistent(&catalog);

        let broken = Checkpoint {
            excluded_indices: vec![9],
            ..checkpoint
        };
        assert!(matches!(
            FileCatalog::from_checkpoint(&broken),
            Err(CompressError::Checkpoint(_))
        ));
    }

    #[tokio::test]
    async fn test_scan_classifies_and_auto_excludes() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.JPG"), vec![0u8; 50]).unwrap();
        std::fs::write(dir.path().join("sub/b.mov"), vec![0u8; 70]).unwrap();
        std::fs::write(dir.path().join("readme.md"), vec![0u8; 5]).unwrap();
        std::fs::write(dir.path().join("sub/.c.partial.mp4"), b"half").unwrap();

        let catalog = FileCatalog::scan(dir.path(), &Config::default(), None).await.unwrap();
        assert_eq!(catalog.len(), 3);

        let kinds: Vec<MediaKind> = (0..3).map(|i| catalog.file(i).unwrap().kind).collect();
        assert_eq!(kinds, vec![MediaKind::Image, MediaKind::Other, MediaKind::Video]);
        assert_eq!(catalog.excluded_indices(), BTreeSet::from([1]));
        assert_eq!(catalog.totals().included_original, 120);
        assert_eq!(catalog.file(2).unwrap().relative_dir, PathBuf::from("sub"));

        let keep_all = Config {
            auto_exclude_non_media: false,
            ..Default::default()
        };
        let catalog = FileCatalog::scan(dir.path(), &keep_all, None).await.unwrap();
        assert!(catalog.excluded_indices().is_empty());
    }

    #[tokio::test]
    async fn test_rescan_issues_new_generation() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.png"), b"x").unwrap();
        let first = FileCatalog::scan(dir.path(), &Config::default(), None).await.unwrap();
        let second = FileCatalog::scan(dir.path(), &Config::default(), None).await.unwrap();
        assert_ne!(first.generation(), second.generation());
        assert!(FileCatalog::scan(&dir.path().join("a.png"), &Config::default(), None)
            .await
            .is_err());
    }
}
