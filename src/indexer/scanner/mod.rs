// Change detection for the notes directory


use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::database::sqlite::Database;
use crate::database::sqlite::models::FileRecord;
use crate::indexer::queue::IndexOperation;
use crate::{NotesError, Result};

/// A document found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskFile {
    pub filename: String,
    pub path: PathBuf,
    /// Modification time in milliseconds since the Unix epoch
    pub mtime: i64,
}

/// How a file on disk compares with its stored record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    New,
    Unchanged,
    /// Timestamp moved but the content hash did not
    Touched { file_id: i64 },
    Modified,
    VersionChanged,
}

impl ChangeKind {
    #[inline]
    pub const fn needs_index(&self) -> bool {
        matches!(self, Self::New | Self::Modified | Self::VersionChanged)
    }
}

/// Outcome of one pass over the notes directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub operations: Vec<IndexOperation>,
    pub unchanged: usize,
    pub touched: usize,
    pub errors: usize,
}

impl ScanReport {
    #[inline]
    pub fn queued(&self) -> usize {
        self.operations.len()
    }
}

/// Result of listing the notes directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryListing {
    pub files: Vec<DiskFile>,
    /// Matching entries whose metadata could not be read
    pub unreadable: Vec<String>,
    /// False when the listing stopped early, so absent files may still exist on disk
    pub complete: bool,
}

impl DirectoryListing {
    #[inline]
    pub fn errors(&self) -> usize {
        self.unreadable
            .len()
            .saturating_add(usize::from(!self.complete))
    }

    /// Stored filenames that are gone from disk, sorted.
    ///
    /// Names in `kept` (listed or unreadable) are never removed, and an incomplete listing
    /// removes nothing.
    #[inline]
    pub fn removed<'a>(
        &self,
        stored: impl IntoIterator<Item = &'a str>,
        kept: &HashSet<&str>,
    ) -> Vec<String> {
        if !self.complete {
            return Vec::new();
        }

        let mut removed: Vec<String> = stored
            .into_iter()
            .filter(|name| !kept.contains(name))
            .map(str::to_string)
            .collect();
        removed.sort();
        removed
    }
}

/// Hex SHA-256 of a document's bytes
#[inline]
pub fn hash_content(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Hash identifying a chunk's content for reuse across re-indexing
#[inline]
pub fn chunk_content_hash(heading_context: Option<&str>, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(heading_context.unwrap_or_default().as_bytes());
    hasher.update(b"\n");
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Modification time of `metadata` in milliseconds since the Unix epoch
#[inline]
pub fn mtime_millis(metadata: &Metadata) -> std::io::Result<i64> {
    let modified = metadata.modified()?;
    let since_epoch = modified
        .duration_since(UNIX_EPOCH)
        .map_err(std::io::Error::other)?;
    Ok(i64::try_from(since_epoch.as_millis()).unwrap_or(i64::MAX))
}

/// Decide what to do with a file given its stored record.
///
/// `content_hash` is only called when the timestamps differ, so unchanged files are never read.
#[inline]
pub fn classify<F>(
    stored: Option<&FileRecord>,
    mtime: i64,
    version: i64,
    content_hash: F,
) -> Result<ChangeKind>
where
    F: FnOnce() -> Result<String>,
{
    let Some(stored) = stored else {
        return Ok(ChangeKind::New);
    };

    if stored.embedding_version != version {
        return Ok(ChangeKind::VersionChanged);
    }

    if stored.mtime == mtime {
        return Ok(ChangeKind::Unchanged);
    }

    if content_hash()? == stored.content_hash {
        Ok(ChangeKind::Touched { file_id: stored.id })
    } else {
        Ok(ChangeKind::Modified)
    }
}

pub(crate) fn scan_error(path: &Path, error: impl std::fmt::Display) -> NotesError {
    NotesError::Scan {
        path: path.display().to_string(),
        message: error.to_string(),
    }
}

/// Compares the notes directory against the index for one (model, version) pair
#[derive(Debug, Clone)]
pub struct Scanner {
    notes_dir: PathBuf,
    extension: String,
    model: String,
    version: i64,
}

impl Scanner {
    #[inline]
    pub fn new(
        notes_dir: impl Into<PathBuf>,
        extension: &str,
        model: impl Into<String>,
        version: i64,
    ) -> Self {
        Self {
            notes_dir: notes_dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
            model: model.into(),
            version,
        }
    }

    #[inline]
    pub fn notes_dir(&self) -> &Path {
        &self.notes_dir
    }

    fn has_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension))
    }

    /// Documents directly inside the notes directory. Entries that cannot be read are logged
    /// and reported in the listing instead of failing the whole scan.
    #[inline]
    pub async fn list_documents(&self) -> Result<DirectoryListing> {
        let mut entries = tokio::fs::read_dir(&self.notes_dir)
            .await
            .map_err(|e| scan_error(&self.notes_dir, e))?;

        let mut listing = DirectoryListing {
            complete: true,
            ..DirectoryListing::default()
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Stopping directory listing: {}", scan_error(&self.notes_dir, e));
                    listing.complete = false;
                    break;
                }
            };

            let path = entry.path();
            if !self.has_extension(&path) {
                continue;
            }

            match self.read_disk_file(&path).await {
                Ok(Some(file)) => listing.files.push(file),
                Ok(None) => {}
                Err(e) => {
                    warn!("Skipping file: {}", e);
                    listing
                        .unreadable
                        .push(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }

        listing.files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(listing)
    }

    async fn read_disk_file(&self, path: &Path) -> Result<Option<DiskFile>> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| scan_error(path, e))?;
        if !metadata.is_file() {
            return Ok(None);
        }

        let filename = path
            .file_name()
            .and_then(OsStr::to_str)
            .ok_or_else(|| scan_error(path, "file name is not valid UTF-8"))?
            .to_string();
        let mtime = mtime_millis(&metadata).map_err(|e| scan_error(path, e))?;

        Ok(Some(DiskFile {
            filename,
            path: path.to_path_buf(),
            mtime,
        }))
    }

    /// Compare disk against the stored records and return the operations to queue.
    ///
    /// Touched files get their stored timestamp updated; nothing else in the index is written.
    #[inline]
    pub async fn scan(&self, database: &Database) -> Result<ScanReport> {
        debug!("Scanning {}", self.notes_dir.display());

        let listing = self.list_documents().await?;
        let stored: HashMap<String, FileRecord> = database
            .list_files(&self.model, self.version)
            .await
            .map_err(|e| NotesError::Store(format!("{e:#}")))?
            .into_iter()
            .map(|record| (record.filename.clone(), record))
            .collect();

        let mut report = ScanReport {
            errors: listing.errors(),
            ..ScanReport::default()
        };
        let removed = {
            let mut kept: HashSet<&str> = listing.unreadable.iter().map(String::as_str).collect();
            kept.extend(listing.files.iter().map(|file| file.filename.as_str()));
            listing.removed(stored.keys().map(String::as_str), &kept)
        };

        for file in &listing.files {
            let record = stored.get(&file.filename);

            let change = match classify(record, file.mtime, self.version, || {
                let bytes = std::fs::read(&file.path).map_err(|e| scan_error(&file.path, e))?;
                Ok(hash_content(&bytes))
            }) {
                Ok(change) => change,
                Err(e) => {
                    warn!("Skipping file: {}", e);
                    report.errors = report.errors.saturating_add(1);
                    continue;
                }
            };

            match change {
                ChangeKind::Unchanged => {
                    report.unchanged = report.unchanged.saturating_add(1);
                }
                ChangeKind::Touched { file_id } => {
                    database
                        .update_file_mtime(file_id, file.mtime)
                        .await
                        .map_err(|e| NotesError::Store(format!("{e:#}")))?;
                    report.touched = report.touched.saturating_add(1);
                }
                ChangeKind::New | ChangeKind::Modified | ChangeKind::VersionChanged => {
                    debug!("{} needs indexing ({:?})", file.filename, change);
                    report
                        .operations
                        .push(IndexOperation::index(file.filename.as_str()));
                }
            }
        }

        for filename in removed {
            debug!("{} was removed", filename);
            report.operations.push(IndexOperation::delete(filename));
        }

        if !report.operations.is_empty() || report.touched > 0 {
            info!(
                "Scan found {} changes ({} unchanged, {} touched, {} errors)",
                report.queued(),
                report.unchanged,
                report.touched,
                report.errors
            );
        }

        Ok(report)
    }
}
