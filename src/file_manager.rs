//! # File Management Module
//!
//! Questo modulo gestisce le operazioni sui file usate da catalogo e transcoder.
//!
//! ## Responsabilità:
//! - Discovery ricorsiva di tutti i file di una directory sorgente
//! - Scrittura "staged": ogni output passa da un file nascosto `.nome.partial.ext`
//!   e viene rinominato sul target solo a lavoro finito
//! - Copia verbatim (fallback) con la stessa strategia di staging
//! - Controllo spazio libero sul volume di destinazione
//! - Formattazione human-readable delle dimensioni e calcolo riduzione
//!
//! ## Esempio:
//! ```rust,ignore
//! for entry in FileManager::discover(&root) {
//!     println!("{} ({:?})", entry.path.display(), entry.size);
//! }
//! ```

use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// One file found during discovery
#[derive(Debug)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// `None` when the size could not be read
    pub size: Option<u64>,
}

/// Manages file operations and discovery
pub struct FileManager;

const PARTIAL_MARK: &str = ".partial";

impl FileManager {
    /// Recursively list every regular file under `root`, sorted by path.
    ///
    /// Unreadable directory entries are logged and skipped. Unreadable sizes
    /// are reported as `None` so the caller can record 0 and continue.
    pub fn discover(root: &Path) -> Vec<DiscoveredFile> {
        let mut files = Vec::new();

        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry during scan: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if Self::is_staging_file(entry.path()) {
                debug!("Skipping staging leftover {}", entry.path().display());
                continue;
            }

            let size = match entry.metadata() {
                Ok(metadata) => Some(metadata.len()),
                Err(e) => {
                    warn!("Cannot read size of {}: {}", entry.path().display(), e);
                    None
                }
            };

            files.push(DiscoveredFile {
                path: entry.into_path(),
                size,
            });
        }

        files
    }

    /// Hidden sibling used while a target is being written
    pub fn staging_path(target: &Path) -> PathBuf {
        let stem = target
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let name = match target.extension() {
            Some(ext) => format!(".{}{}.{}", stem, PARTIAL_MARK, ext.to_string_lossy()),
            None => format!(".{}{}", stem, PARTIAL_MARK),
        };
        target.with_file_name(name)
    }

    /// Whether `path` has the exact `.{stem}.partial[.{ext}]` shape of `staging_path`
    pub fn is_staging_file(path: &Path) -> bool {
        let Some(name) = path.file_name().map(|name| name.to_string_lossy()) else {
            return false;
        };
        let Some(rest) = name.strip_prefix('.') else {
            return false;
        };
        let head = match rest.rsplit_once('.') {
            Some((head, ext)) if head.ends_with(PARTIAL_MARK) && !ext.is_empty() => head,
            _ => rest,
        };
        head.strip_suffix(PARTIAL_MARK)
            .map(|stem| !stem.is_empty())
            .unwrap_or(false)
    }

    /// Move a finished staging file onto its target
    pub async fn promote(staging: &Path, target: &Path) -> Result<u64> {
        fs::rename(staging, target).await.map_err(|e| {
            anyhow::anyhow!("Failed to move {} into place: {}", target.display(), e)
        })?;
        Ok(fs::metadata(target).await?.len())
    }

    /// Byte-for-byte copy of `source` onto `target`, staged
    pub async fn copy_verbatim(source: &Path, target: &Path) -> Result<u64> {
        Self::ensure_parent_dirs(target).await?;
        let staging = Self::staging_path(target);

        if let Err(e) = fs::copy(source, &staging).await {
            let _ = fs::remove_file(&staging).await;
            return Err(anyhow::anyhow!(
                "Failed to copy {} to {}: {}",
                source.display(),
                target.display(),
                e
            ));
        }

        let size = Self::promote(&staging, target).await?;
        debug!("Copied {} verbatim ({} bytes)", source.display(), size);
        Ok(size)
    }

    /// Create parent directories if needed
    pub async fn ensure_parent_dirs(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                anyhow::anyhow!("Failed to create parent directories for {}: {}", path.display(), e)
            })?;
        }
        Ok(())
    }

    /// Free bytes on the volume holding `path`, when the platform can tell
    #[cfg(unix)]
    pub fn available_space(path: &Path) -> Option<u64> {
        match nix::sys::statvfs::statvfs(path) {
            Ok(stat) => Some((stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64)),
            Err(e) => {
                debug!("statvfs failed for {}: {}", path.display(), e);
                None
            }
        }
    }

    #[cfg(not(unix))]
    pub fn available_space(_path: &Path) -> Option<u64> {
        None
    }

    /// Get human-readable file size
    pub fn format_size(size: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = size as f64;
        let mut unit_index = 0;

        while size >= 1024.0 && unit_index < UNITS.len() - 1 {
            size /= 1024.0;
            unit_index += 1;
        }

        if unit_index == 0 {
            format!("{} {}", size as u64, UNITS[unit_index])
        } else {
            format!("{:.2} {}", size, UNITS[unit_index])
        }
    }

    /// Calculate percentage reduction
    pub fn calculate_reduction(original_size: u64, new_size: u64) -> f64 {
        if original_size == 0 {
            0.0
        } else {
            ((original_size as f64 - new_size as f64) / original_size as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_discover_walks_recursively() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("top.jpg"), b"12345").unwrap();
        std::fs::write(dir.path().join("a/b/clip.mp4"), b"123").unwrap();
        std::fs::write(dir.path().join("a/.clip.partial.mp4"), b"1").unwrap();

        let found = FileManager::discover(dir.path());
        let names: Vec<_> = found
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["clip.mp4", "top.jpg"]);
        assert_eq!(found[1].size, Some(5));
    }

    #[test]
    fn test_staging_path() {
        let staging = FileManager::staging_path(Path::new("/out/x/photo.jpg"));
        assert_eq!(staging, PathBuf::from("/out/x/.photo.partial.jpg"));
        assert!(FileManager::is_staging_file(&staging));
        assert!(!FileManager::is_staging_file(Path::new("/out/.hidden")));

        let bare = FileManager::staging_path(Path::new("/out/README"));
        assert_eq!(bare, PathBuf::from("/out/.README.partial"));
        assert!(FileManager::is_staging_file(&bare));
        assert!(FileManager::is_staging_file(&FileManager::staging_path(Path::new("/out/a.mp4.mkv"))));
    }

    #[test]
    fn test_dotfiles_mentioning_partial_are_not_staging() {
        for name in [".notes.partial-backup.txt", ".partial.mkv", ".config.partialx", ".a.partial.", "a.partial.jpg"] {
            assert!(!FileManager::is_staging_file(Path::new(name)), "{}", name);
        }
    }

    #[test]
    fn test_discover_keeps_dotfiles_with_partial_in_name() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".draft.partial-notes.txt"), b"keep").unwrap();
        std::fs::write(dir.path().join(".clip.partial.mp4"), b"half").unwrap();

        let names: Vec<String> = FileManager::discover(dir.path())
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![".draft.partial-notes.txt"]);
    }

    #[tokio::test]
    async fn test_copy_verbatim_creates_parents() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("in.bin");
        std::fs::write(&source, b"payload").unwrap();
        let target = dir.path().join("deep/nested/out.bin");

        let size = FileManager::copy_verbatim(&source, &target).await.unwrap();
        assert_eq!(size, 7);
        assert_eq!(std::fs::read(&target).unwrap(), b"payload");
        assert!(!FileManager::staging_path(&target).exists());
    }

    #[tokio::test]
    async fn test_copy_verbatim_missing_source() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.bin");
        let result = FileManager::copy_verbatim(&dir.path().join("absent"), &target).await;
        assert!(result.is_err());
        assert!(!target.exists());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(FileManager::format_size(512), "512 B");
        assert_eq!(FileManager::format_size(1536), "1.50 KB");
        assert_eq!(FileManager::format_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_calculate_reduction() {
        assert_eq!(FileManager::calculate_reduction(0, 10), 0.0);
        assert_eq!(FileManager::calculate_reduction(200, 50), 75.0);
    }
}
