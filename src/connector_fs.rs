//! Filesystem document source.
//!
//! Walks `[connectors.filesystem].root` (or explicit paths given on the
//! command line) and turns matching files into [`DocumentInput`]s. The
//! source type follows the file extension.
//!
//! Document ids are paths relative to the connector root whenever the file
//! lies under it, however the file was reached, so re-ingesting a file by
//! explicit path replaces the copy found by a directory scan.
//!
//! A file that cannot be read does not stop the scan: it is reported in
//! [`Scan::failures`] and the remaining files are still returned. Only a
//! missing or unreadable root is fatal.

use ainsights_core::models::SourceType;
use ainsights_core::Error as CoreError;
use anyhow::{anyhow, bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::{Config, FilesystemConnectorConfig};
use crate::ingest::{DocumentInput, IngestFailure};

/// Documents read from disk, plus the files that could not be read.
#[derive(Debug, Default)]
pub struct Scan {
    pub inputs: Vec<DocumentInput>,
    pub failures: Vec<IngestFailure>,
}

impl Scan {
    pub fn extend(&mut self, other: Scan) {
        self.inputs.extend(other.inputs);
        self.failures.extend(other.failures);
    }

    /// Files seen, readable or not.
    pub fn len(&self) -> usize {
        self.inputs.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&mut self, path: &Path, id: String) {
        match read_file(path, &id) {
            Ok(input) => self.inputs.push(input),
            Err(error) => {
                warn!(document = %id, %error, "skipping unreadable file");
                self.failures.push(IngestFailure { id, error });
            }
        }
    }

    fn sort(&mut self) {
        self.inputs.sort_by(|a, b| a.id.cmp(&b.id));
        self.failures.sort_by(|a, b| a.id.cmp(&b.id));
    }
}

/// Scan the configured filesystem connector.
pub fn scan_filesystem(config: &Config) -> Result<Scan> {
    let fs_config = config
        .connectors
        .filesystem
        .as_ref()
        .ok_or_else(|| anyhow!("Filesystem connector not configured"))?;
    scan_dir(fs_config)
}

/// Scan the connector root with its include/exclude globs, sorted by id.
pub fn scan_dir(fs_config: &FilesystemConnectorConfig) -> Result<Scan> {
    scan_subdir(fs_config, &fs_config.root)
}

/// Scan `dir` with the connector's globs, matched relative to `dir`.
///
/// Ids are relative to the connector root when `dir` lies under it and
/// relative to `dir` otherwise.
pub fn scan_subdir(fs_config: &FilesystemConnectorConfig, dir: &Path) -> Result<Scan> {
    if !dir.is_dir() {
        bail!("Filesystem connector root does not exist: {}", dir.display());
    }

    let include_set = build_globset(&fs_config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(fs_config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let id_base = if is_under(dir, &fs_config.root) {
        fs_config.root.as_path()
    } else {
        dir
    };
    let matches = |path: &Path| {
        let rel = relative_str(path, dir);
        !exclude_set.is_match(&rel) && include_set.is_match(&rel)
    };

    let mut scan = Scan::default();

    let walker = WalkDir::new(dir).follow_links(fs_config.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                bail!("Cannot read filesystem connector root {}: {}", dir.display(), e)
            }
            Err(e) => {
                // Dangling symlinks and unreadable directories.
                match e.path() {
                    Some(path) if matches(path) => {
                        let id = document_id(path, Some(id_base));
                        warn!(document = %id, error = %e, "skipping unreadable file");
                        scan.failures.push(IngestFailure {
                            error: CoreError::chunking(&id, format!("unreadable: {}", e)),
                            id,
                        });
                    }
                    _ => warn!(error = %e, "skipping unreadable entry"),
                }
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !matches(path) {
            continue;
        }
        scan.push(path, document_id(path, Some(id_base)));
    }

    scan.sort();
    tracing::debug!(
        root = %dir.display(),
        files = scan.inputs.len(),
        failed = scan.failures.len(),
        "scanned filesystem"
    );
    Ok(scan)
}

/// Read explicit files. Ids are relative to `root` for files under it and
/// the path as given otherwise. Unreadable files become failures.
pub fn read_paths(paths: &[impl AsRef<Path>], root: Option<&Path>) -> Scan {
    let mut scan = Scan::default();
    for p in paths {
        let path = p.as_ref();
        scan.push(path, document_id(path, root));
    }
    scan
}

/// The document id for `path`: relative to `root` when under it, with `/`
/// separators.
pub fn document_id(path: &Path, root: Option<&Path>) -> String {
    if let Some(root) = root {
        if let Ok(rel) = path.strip_prefix(root) {
            return slash_path(rel);
        }
        if let (Ok(path), Ok(root)) = (path.canonicalize(), root.canonicalize()) {
            if let Ok(rel) = path.strip_prefix(&root) {
                return slash_path(rel);
            }
        }
    }
    slash_path(path)
}

fn is_under(path: &Path, root: &Path) -> bool {
    if path.starts_with(root) {
        return true;
    }
    match (path.canonicalize(), root.canonicalize()) {
        (Ok(path), Ok(root)) => path.starts_with(root),
        _ => false,
    }
}

fn relative_str(path: &Path, base: &Path) -> String {
    slash_path(path.strip_prefix(base).unwrap_or(path))
}

fn slash_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Content is read as bytes; decoding is left to the chunker so that
/// undecodable files surface as per-document failures too.
fn read_file(path: &Path, id: &str) -> std::result::Result<DocumentInput, CoreError> {
    let bytes = std::fs::read(path)
        .map_err(|e| CoreError::chunking(id, format!("unreadable: {}", e)))?;
    let source_type = path
        .extension()
        .map(|e| SourceType::from_extension(&e.to_string_lossy()))
        .unwrap_or(SourceType::Text);
    Ok(DocumentInput::bytes(id, source_type, bytes))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
