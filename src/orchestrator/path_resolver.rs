//! # Path Resolution Module
//!
//! Centralizza il calcolo dei path di output e il confinamento dei path
//! dentro le radici attese (sorgente e destinazione).
//!
//! Due sorgenti non condividono mai lo stesso target: se `a.mov` e `a.mp4`
//! finirebbero entrambi in `a.mkv`, il secondo (in ordine di catalogo)
//! diventa `a.mp4.mkv`.

use crate::config::Config;
use crate::encoders;
use crate::model::{MediaFile, MediaKind};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Utility per calcolare e verificare i path in modo centralizzato
pub struct PathResolver;

impl PathResolver {
    /// Where `file` is written under `target_root`, mirroring its relative directory.
    ///
    /// Videos take the container they are encoded into: the configured override,
    /// else their own, else `.mp4` for extensions with no container descriptor.
    pub fn target_path(file: &MediaFile, target_root: &Path, config: &Config) -> PathBuf {
        let mut target = target_root.join(&file.relative_dir).join(&file.file_name);

        if file.kind == MediaKind::Video {
            let container = encoders::output_container(&file.extension, config).trim_start_matches('.');
            if !container.eq_ignore_ascii_case(&file.extension) {
                target.set_extension(container);
            }
        }

        target
    }

    /// Target of every catalog file, in catalog order, with no two files sharing one.
    ///
    /// The plan covers the whole catalog, so a file keeps the same target
    /// whatever subset is selected. Names are compared case-insensitively.
    pub fn plan_targets(files: &[MediaFile], target_root: &Path, config: &Config) -> Vec<PathBuf> {
        let mut claimed: HashSet<String> = HashSet::with_capacity(files.len());

        files
            .iter()
            .map(|file| {
                let planned = Self::target_path(file, target_root, config);
                let mut target = planned.clone();
                let mut attempt = 0;
                while !claimed.insert(collision_key(&target)) {
                    attempt += 1;
                    target = disambiguate(&planned, file, attempt);
                }
                if attempt > 0 {
                    info!(
                        "🔀 {} would overwrite another file's output, writing {}",
                        file.relative_path().display(),
                        target.display()
                    );
                }
                target
            })
            .collect()
    }

    /// Lexically resolve `.` and `..` without touching the filesystem
    pub fn normalize(path: &Path) -> PathBuf {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        };

        let mut normalized = PathBuf::new();
        for component in absolute.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    normalized.pop();
                }
                other => normalized.push(other.as_os_str()),
            }
        }
        normalized
    }

    /// Normalize `path` and reject it if it lands outside `root`
    pub fn confine(root: &Path, path: &Path) -> Result<PathBuf, String> {
        if is_unc(path) && !is_unc(root) {
            return Err(format!("network path not allowed: {}", path.display()));
        }

        // Existing paths are compared after symlink resolution so a link cannot escape the root
        let (root, candidate) = match (root.canonicalize(), path.canonicalize()) {
            (Ok(root), Ok(candidate)) => (root, candidate),
            _ => (Self::normalize(root), Self::normalize(path)),
        };

        if candidate.starts_with(&root) && candidate != root {
            Ok(candidate)
        } else {
            debug!("Rejected {} (outside {})", candidate.display(), root.display());
            Err(format!(
                "{} resolves outside {}",
                path.display(),
                root.display()
            ))
        }
    }
}

fn collision_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

/// `a.mkv` → `a.mp4.mkv`, then `a.mp4.2.mkv`, ...
fn disambiguate(planned: &Path, file: &MediaFile, attempt: usize) -> PathBuf {
    let stem = planned
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut name = if file.extension.is_empty() {
        stem
    } else {
        format!("{}.{}", stem, file.extension)
    };
    if attempt > 1 {
        name.push_str(&format!(".{}", attempt));
    }
    if let Some(ext) = planned.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    planned.with_file_name(name)
}

fn is_unc(path: &Path) -> bool {
    let text = path.to_string_lossy();
    text.starts_with("\\\\") || text.starts_with("//")
}
