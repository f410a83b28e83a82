//! File enumeration for PeerDrop.
//!
//! This module turns what the user picked (files and folders, optionally
//! with display names) into a flat, ordered list of [`TransferItem`]s:
//!
//! - Files resolve to exactly one item
//! - Folders are walked recursively, one item per leaf file, each tagged
//!   with its path relative to the folder's parent (`Photos/2020`)
//! - References that cannot be resolved are skipped
//!
//! Cancelling the token while enumerating discards everything: the result
//! is an empty list, never a partial one.

use std::io;
use std::path::{Path, PathBuf};

use crate::cancel::CancellationToken;
use crate::error::Error;
use crate::observer::{Progress, ShareObserver};

/// A file ready to be offered to a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferItem {
    /// Where the content lives
    pub source_reference: PathBuf,
    /// Name shown to the peer
    pub friendly_name: String,
    /// MIME type
    pub mime_type: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Path inside the shared folder, `/`-separated
    pub relative_directory: Option<String>,
}

/// One user selection: a path and an optional display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    /// File or directory
    pub path: PathBuf,
    /// Display name override; folders always keep their own name
    pub name: Option<String>,
}

impl SourceRef {
    /// A reference without a name override.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            name: None,
        }
    }

    /// A reference shown under a different name.
    pub fn named(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: Some(name.into()),
        }
    }
}

/// Outcome of resolving a reference that did not yield an item.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The reference is a directory and must be walked instead
    #[error("'{0}' is a directory")]
    IsDirectory(PathBuf),

    /// Nothing exists at the reference
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    /// The reference exists but may not be read
    #[error("cannot read '{0}': permission denied")]
    PermissionDenied(PathBuf),

    /// The reference exists but its metadata cannot be inspected
    #[error("'{path}' is unreadable: {reason}")]
    Corrupted {
        /// Offending path
        path: PathBuf,
        /// What went wrong
        reason: String,
    },
}

impl ResolveError {
    fn from_io(path: &Path, err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Corrupted {
                path: path.to_path_buf(),
                reason: err.to_string(),
            },
        }
    }
}

impl From<ResolveError> for Error {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(p) => Self::FileNotFound(p.display().to_string()),
            ResolveError::PermissionDenied(p) => Self::PermissionDenied(p.display().to_string()),
            ResolveError::Corrupted { path, .. } => Self::Corrupted(path.display().to_string()),
            ResolveError::IsDirectory(p) => {
                Self::InvalidInput(format!("'{}' is a directory", p.display()))
            }
        }
    }
}

/// Turns a reference into file metadata.
pub trait ContentResolver: Send + Sync {
    /// Resolve a single reference.
    ///
    /// Returns [`ResolveError::IsDirectory`] for directories so the caller
    /// can walk them.
    fn resolve(
        &self,
        reference: &Path,
        name: Option<&str>,
        relative_directory: Option<&str>,
    ) -> std::result::Result<TransferItem, ResolveError>;
}

/// [`ContentResolver`] backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsResolver;

impl ContentResolver for FsResolver {
    fn resolve(
        &self,
        reference: &Path,
        name: Option<&str>,
        relative_directory: Option<&str>,
    ) -> std::result::Result<TransferItem, ResolveError> {
        let metadata =
            std::fs::metadata(reference).map_err(|e| ResolveError::from_io(reference, &e))?;

        if metadata.is_dir() {
            return Err(ResolveError::IsDirectory(reference.to_path_buf()));
        }

        if !metadata.is_file() {
            return Err(ResolveError::Corrupted {
                path: reference.to_path_buf(),
                reason: "not a regular file".to_string(),
            });
        }

        // Opening proves the content is readable, not just listed.
        std::fs::File::open(reference).map_err(|e| ResolveError::from_io(reference, &e))?;

        let friendly_name = match name {
            Some(name) => name.to_string(),
            None => display_name(reference),
        };

        Ok(TransferItem {
            source_reference: reference.to_path_buf(),
            mime_type: mime_guess::from_path(Path::new(&friendly_name))
                .first_or_octet_stream()
                .to_string(),
            friendly_name,
            size_bytes: metadata.len(),
            relative_directory: relative_directory.map(str::to_string),
        })
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or_else(|| path.display().to_string(), str::to_string)
}

/// The folder's own name, even when it was selected as `.` or `a/..`.
fn folder_name(dir: &Path) -> String {
    std::fs::canonicalize(dir)
        .or_else(|_| std::path::absolute(dir))
        .map_or_else(|_| display_name(dir), |resolved| display_name(&resolved))
}

/// Expands user selections into [`TransferItem`]s.
#[derive(Debug, Clone, Default)]
pub struct FileEnumerator<R = FsResolver> {
    resolver: R,
}

impl FileEnumerator<FsResolver> {
    /// Enumerator over the local filesystem.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            resolver: FsResolver,
        }
    }
}

impl<R: ContentResolver> FileEnumerator<R> {
    /// Enumerator using a custom resolver.
    pub const fn with_resolver(resolver: R) -> Self {
        Self { resolver }
    }

    /// Enumerate `sources` in order.
    ///
    /// Progress is reported after every top-level reference and after every
    /// leaf discovered inside a folder; each discovered leaf also grows the
    /// expected total by one. Returns an empty list if `token` is cancelled
    /// before enumeration finishes.
    pub fn enumerate(
        &self,
        sources: &[SourceRef],
        token: &CancellationToken,
        observer: &dyn ShareObserver,
    ) -> Vec<TransferItem> {
        let mut items = Vec::new();
        let mut progress = Progress::new(0, sources.len() as u64);

        for source in sources {
            if token.is_cancelled() {
                return cancelled(items.len());
            }

            match self
                .resolver
                .resolve(&source.path, source.name.as_deref(), None)
            {
                Ok(item) => items.push(item),
                Err(ResolveError::IsDirectory(dir)) => {
                    let folder = folder_name(&dir);
                    if !self.walk(&dir, &folder, &mut items, &mut progress, token, observer) {
                        return cancelled(items.len());
                    }
                }
                Err(e) => tracing::warn!("Skipping {}: {}", source.path.display(), e),
            }

            progress.current += 1;
            observer.on_progress(progress);
        }

        tracing::debug!(
            "Enumerated {} items from {} references",
            items.len(),
            sources.len()
        );
        items
    }

    /// Walk a folder. Returns `false` if cancelled mid-walk.
    fn walk(
        &self,
        dir: &Path,
        folder: &str,
        items: &mut Vec<TransferItem>,
        progress: &mut Progress,
        token: &CancellationToken,
        observer: &dyn ShareObserver,
    ) -> bool {
        let walker = walkdir::WalkDir::new(dir)
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name();

        for entry in walker {
            if token.is_cancelled() {
                return false;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                continue;
            }

            progress.max += 1;
            progress.current += 1;

            let relative = relative_directory(folder, dir, entry.path());
            match self.resolver.resolve(entry.path(), None, Some(&relative)) {
                Ok(item) => items.push(item),
                Err(e) => tracing::warn!("Skipping {}: {}", entry.path().display(), e),
            }

            observer.on_progress(*progress);
        }

        true
    }
}

fn cancelled(discarded: usize) -> Vec<TransferItem> {
    tracing::debug!("Enumeration cancelled, discarding {} items", discarded);
    Vec::new()
}

/// `folder` joined with the subdirectories between `root` and `leaf`.
fn relative_directory(folder: &str, root: &Path, leaf: &Path) -> String {
    let mut relative = folder.to_string();

    let parent = leaf
        .parent()
        .and_then(|p| p.strip_prefix(root).ok())
        .unwrap_or_else(|| Path::new(""));

    for component in parent.components() {
        relative.push('/');
        relative.push_str(&component.as_os_str().to_string_lossy());
    }

    relative
}

/// Format a file size for display.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tempfile::TempDir;

    use super::*;

    #[derive(Default)]
    struct RecordingObserver {
        progress: Mutex<Vec<Progress>>,
    }

    impl ShareObserver for RecordingObserver {
        fn on_progress(&self, progress: Progress) {
            self.progress.lock().unwrap().push(progress);
        }
    }

    /// Cancels the token once a given number of progress reports arrived.
    struct CancelAfter {
        token: CancellationToken,
        after: usize,
        seen: Mutex<usize>,
    }

    impl ShareObserver for CancelAfter {
        fn on_progress(&self, _progress: Progress) {
            let mut seen = self.seen.lock().unwrap();
            *seen += 1;
            if *seen >= self.after {
                self.token.request_cancel();
            }
        }
    }

    fn create_tree(root: &Path) -> PathBuf {
        let dir = root.join("Photos");
        std::fs::create_dir_all(dir.join("2020/summer")).unwrap();
        std::fs::write(dir.join("a.jpg"), b"aaaa").unwrap();
        std::fs::write(dir.join("2020/b.png"), b"bb").unwrap();
        std::fs::write(dir.join("2020/summer/c.txt"), b"c").unwrap();
        dir
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.0 GB");
    }

    #[test]
    fn test_resolve_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();

        let item = FsResolver.resolve(&path, None, None).unwrap();
        assert_eq!(item.friendly_name, "notes.txt");
        assert_eq!(item.mime_type, "text/plain");
        assert_eq!(item.size_bytes, 5);
        assert_eq!(item.relative_directory, None);
    }

    #[test]
    fn test_resolve_uses_name_override_for_mime() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("blob");
        std::fs::write(&path, b"x").unwrap();

        let item = FsResolver.resolve(&path, Some("photo.png"), None).unwrap();
        assert_eq!(item.friendly_name, "photo.png");
        assert_eq!(item.mime_type, "image/png");
    }

    #[test]
    fn test_resolve_directory_marker() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            FsResolver.resolve(tmp.path(), None, None),
            Err(ResolveError::IsDirectory(_))
        ));
    }

    #[test]
    fn test_resolve_missing() {
        let tmp = TempDir::new().unwrap();
        let err = FsResolver
            .resolve(&tmp.path().join("nope"), None, None)
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
        assert!(Error::from(err).is_resolution());
    }

    #[test]
    fn test_enumerate_directory_leaves() {
        let tmp = TempDir::new().unwrap();
        let dir = create_tree(tmp.path());

        let items = FileEnumerator::new().enumerate(
            &[SourceRef::new(&dir)],
            &CancellationToken::new(),
            &(),
        );

        let mut found: Vec<_> = items
            .iter()
            .map(|i| (i.friendly_name.as_str(), i.relative_directory.as_deref()))
            .collect();
        found.sort_unstable();
        assert_eq!(
            found,
            vec![
                ("a.jpg", Some("Photos")),
                ("b.png", Some("Photos/2020")),
                ("c.txt", Some("Photos/2020/summer")),
            ]
        );
    }

    #[test]
    fn test_enumerate_skips_missing() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.txt");
        let b = tmp.path().join("b.txt");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();

        let items = FileEnumerator::new().enumerate(
            &[
                SourceRef::new(&a),
                SourceRef::new(tmp.path().join("missing.txt")),
                SourceRef::new(&b),
            ],
            &CancellationToken::new(),
            &(),
        );

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].friendly_name, "a.txt");
        assert_eq!(items[1].friendly_name, "b.txt");
    }

    #[test]
    fn test_enumerate_progress_grows_with_leaves() {
        let tmp = TempDir::new().unwrap();
        let dir = create_tree(tmp.path());
        let file = tmp.path().join("single.txt");
        std::fs::write(&file, b"s").unwrap();

        let observer = RecordingObserver::default();
        FileEnumerator::new().enumerate(
            &[SourceRef::new(&file), SourceRef::new(&dir)],
            &CancellationToken::new(),
            &observer,
        );

        let progress = observer.progress.lock().unwrap();
        // one per top-level reference plus one per leaf
        assert_eq!(progress.len(), 5);
        assert_eq!(progress[0], Progress::new(1, 2));
        assert_eq!(*progress.last().unwrap(), Progress::new(5, 5));
    }

    #[test]
    fn test_enumerate_cancelled_returns_nothing() {
        let tmp = TempDir::new().unwrap();
        let dir = create_tree(tmp.path());
        let token = CancellationToken::new();
        let observer = CancelAfter {
            token: token.clone(),
            after: 1,
            seen: Mutex::new(0),
        };

        let items = FileEnumerator::new().enumerate(&[SourceRef::new(&dir)], &token, &observer);
        assert!(items.is_empty());
    }

    #[test]
    fn test_enumerate_precancelled() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("a.txt");
        std::fs::write(&file, b"a").unwrap();

        let token = CancellationToken::new();
        token.request_cancel();

        let items = FileEnumerator::new().enumerate(&[SourceRef::new(&file)], &token, &());
        assert!(items.is_empty());
    }

    #[test]
    fn test_relative_directory() {
        let root = Path::new("/data/Photos");
        assert_eq!(
            relative_directory("Photos", root, Path::new("/data/Photos/x.jpg")),
            "Photos"
        );
        assert_eq!(
            relative_directory("Photos", root, Path::new("/data/Photos/a/b/x.jpg")),
            "Photos/a/b"
        );
    }

    #[test]
    fn test_folder_keeps_its_own_name() {
        let tmp = TempDir::new().unwrap();
        let dir = create_tree(tmp.path());
        std::fs::create_dir(dir.join("empty")).unwrap();

        let items = FileEnumerator::new().enumerate(
            &[
                SourceRef::new(dir.join("empty").join("..")),
                SourceRef::named(&dir, "Holiday"),
            ],
            &CancellationToken::new(),
            &(),
        );

        assert_eq!(items.len(), 6);
        assert!(items
            .iter()
            .all(|i| i.relative_directory.as_deref().unwrap().starts_with("Photos")));
    }
}
