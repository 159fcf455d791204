//! # Checkpoint Module
//!
//! Persistenza dello stato di un'esecuzione per riprenderla dopo pausa,
//! stop o crash.
//!
//! ## Responsabilità:
//! - Serializza catalogo, esclusioni, selezione e tempi in un unico documento JSON
//! - Sovrascrittura atomica (file temporaneo nella stessa directory + rename)
//! - Un checkpoint assente o corrotto equivale a "nessun checkpoint"
//!
//! ## Strategia di persistence:
//! - Salvataggio solo su `pause()` e `stop()`, mai per singolo file
//! - Posizione predefinita: `~/.media-compressor/checkpoint.json`
//! - Rimosso al termine di un'esecuzione completa
//!
//! ## Esempio struttura checkpoint:
//! ```json
//! {
//!   "sourceDir": "/photos",
//!   "targetDir": "/photos-small",
//!   "catalogSnapshot": [ { "file_name": "a.jpg", "status": "completed", ... } ],
//!   "excludedIndices": [2, 4],
//!   "selectedIndices": [0, 1, 3],
//!   "startTime": "2024-05-01T10:00:00Z",
//!   "pausedDurationSeconds": 12.5,
//!   "savedAt": "2024-05-01T10:20:00Z"
//! }
//! ```

use crate::catalog::FileCatalog;
use crate::error::CompressError;
use crate::model::MediaFile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

/// Saved state of an interrupted run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    pub catalog_snapshot: Vec<MediaFile>,
    pub excluded_indices: Vec<usize>,
    pub selected_indices: Vec<usize>,
    pub start_time: DateTime<Utc>,
    pub paused_duration_seconds: f64,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Capture the current state of a catalog and its run
    pub fn capture(
        catalog: &FileCatalog,
        target_dir: &Path,
        selected: &[usize],
        start_time: DateTime<Utc>,
        paused: Duration,
    ) -> Self {
        Self {
            source_dir: catalog.source_root().to_path_buf(),
            target_dir: target_dir.to_path_buf(),
            catalog_snapshot: catalog.snapshot(),
            excluded_indices: catalog.excluded_indices().into_iter().collect(),
            selected_indices: selected.to_vec(),
            start_time,
            paused_duration_seconds: paused.as_secs_f64(),
            saved_at: Utc::now(),
        }
    }

    pub fn paused_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.paused_duration_seconds).unwrap_or_default()
    }
}

/// Reads and writes the single checkpoint record
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.media-compressor/checkpoint.json`, or the working directory without a home
    pub fn default_location() -> Self {
        let dir = dirs::home_dir()
            .map(|home| home.join(".media-compressor"))
            .unwrap_or_else(|| PathBuf::from(".media-compressor"));
        Self::new(dir.join("checkpoint.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the record atomically
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CompressError> {
        let json = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| CompressError::Checkpoint(e.to_string()))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).await?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
            temp.write_all(&json)?;
            temp.as_file().sync_all()?;
            temp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| CompressError::Checkpoint(e.to_string()))??;

        info!(
            "💾 Checkpoint saved ({} files, {} selected) to {}",
            checkpoint.catalog_snapshot.len(),
            checkpoint.selected_indices.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Previous checkpoint, or `None` when absent or unreadable
    pub async fn load(&self) -> Option<Checkpoint> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Ignoring unreadable checkpoint {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<Checkpoint>(&content) {
            Ok(checkpoint) => {
                debug!("Loaded checkpoint saved at {}", checkpoint.saved_at);
                Some(checkpoint)
            }
            Err(e) => {
                warn!("Ignoring corrupt checkpoint {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub async fn clear(&self) -> Result<(), CompressError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("Checkpoint cleared: {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::MediaStatus;
    use tempfile::TempDir;

    async fn five_file_catalog(dir: &Path) -> FileCatalog {
        let source = dir.join("src");
        std::fs::create_dir_all(&source).unwrap();
        for (i, name) in ["a.jpg", "b.png", "c.mp4", "d.mov", "e.webp"].iter().enumerate() {
            std::fs::write(source.join(name), vec![0u8; (i + 1) * 10]).unwrap();
        }
        FileCatalog::scan(&source, &Config::default(), None).await.unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_preserves_exclusions() {
        let dir = TempDir::new().unwrap();
        let catalog = five_file_catalog(dir.path()).await;
        catalog.exclude(1).unwrap();
        catalog.exclude(3).unwrap();
        catalog.mark_running(0);
        catalog.mark_terminal(0, MediaStatus::Completed, 4);

        let store = CheckpointStore::new(dir.path().join("state/checkpoint.json"));
        let checkpoint = Checkpoint::capture(
            &catalog,
            &dir.path().join("out"),
            &[0, 2, 4],
            Utc::now(),
            Duration::from_millis(2500),
        );
        store.save(&checkpoint).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, checkpoint);
        assert_eq!(loaded.excluded_indices, vec![1, 3]);
        assert_eq!(loaded.selected_indices, vec![0, 2, 4]);
        assert_eq!(loaded.paused_duration(), Duration::from_millis(2500));

        let restored = FileCatalog::from_checkpoint(&loaded).unwrap();
        assert_eq!(restored.excluded_indices(), catalog.excluded_indices());
        assert_eq!(restored.status(0), Some(MediaStatus::Completed));
        assert_eq!(restored.totals(), catalog.totals());
    }

    #[tokio::test]
    async fn test_save_overwrites_previous_record() {
        let dir = TempDir::new().unwrap();
        let catalog = five_file_catalog(dir.path()).await;
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));

        let first = Checkpoint::capture(&catalog, dir.path(), &[0], Utc::now(), Duration::ZERO);
        store.save(&first).await.unwrap();
        catalog.exclude(4).unwrap();
        let second = Checkpoint::capture(&catalog, dir.path(), &[0, 1], Utc::now(), Duration::ZERO);
        store.save(&second).await.unwrap();

        assert_eq!(store.load().await.unwrap().excluded_indices, vec![4]);
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 2, "only src/ and the checkpoint should remain");
    }

    #[tokio::test]
    async fn test_corrupt_or_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        assert!(store.load().await.is_none());

        std::fs::write(store.path(), b"{ not json").unwrap();
        assert!(store.load().await.is_none());

        std::fs::write(store.path(), br#"{"sourceDir": "/x"}"#).unwrap();
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = TempDir::new().unwrap();
        let catalog = five_file_catalog(dir.path()).await;
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        let checkpoint = Checkpoint::capture(&catalog, dir.path(), &[], Utc::now(), Duration::ZERO);

        store.save(&checkpoint).await.unwrap();
        assert!(store.path().exists());
        store.clear().await.unwrap();
        assert!(!store.path().exists());
        // clearing twice is fine
        store.clear().await.unwrap();
    }
}
