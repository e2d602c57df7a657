//! Tracked-path records.
//!
//! An [`Entry`] describes one filesystem path across scans: when it was first
//! seen, what it looked like the last time state was saved, and lazily
//! computed content digests and directory sizes. Metadata fetches that fail
//! (a path vanishing mid-check, a parent directory disappearing) degrade to
//! "no info" rather than erroring; callers treat missing info as "does not
//! exist".

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::ScanOptions;
use crate::scanner::RunState;
use crate::utils::{datetime_from_unix, hash};

/// What kind of filesystem object a path resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Dir,
    /// Symbolic link (never followed)
    Symlink,
    /// Anything else (fifo, socket, device)
    Other,
}

impl EntryKind {
    fn from_metadata(meta: &Metadata) -> Self {
        let kind = meta.file_type();
        if kind.is_file() {
            Self::File
        } else if kind.is_dir() {
            Self::Dir
        } else if kind.is_symlink() {
            Self::Symlink
        } else {
            Self::Other
        }
    }
}

/// Raw metadata captured when state is saved, compared against the live
/// filesystem on the next run to detect drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatSnapshot {
    /// Object kind at capture time
    pub kind: EntryKind,
    /// Size in bytes at capture time
    pub size: u64,
    /// Modification time (Unix seconds) at capture time
    pub modified: i64,
}

/// One tracked filesystem path.
///
/// Entries are created by the scanner the first time a path is observed and
/// carry no reference back to it; the persisted form is plain data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Absolute path; the identity of this entry across runs.
    pub path: PathBuf,
    /// First-seen instant, when the age anchor is not atime/mtime.
    stamp: Option<DateTime<Utc>>,
    /// Effective timestamp recorded at the last save.
    prev_stamp: Option<DateTime<Utc>>,
    /// Metadata recorded at the last save.
    prev_info: Option<StatSnapshot>,
    /// Cached content digest (regular files only).
    checksum: Option<String>,
    /// When the digest was last computed, jittered into the check window.
    last_check: Option<DateTime<Utc>>,
    /// Cached aggregate size for directories.
    dir_size: Option<u64>,
    /// Per-run metadata cache. Never persisted.
    #[serde(skip)]
    info: Option<Metadata>,
}

impl Entry {
    /// Begins tracking `path`. Nothing is read from disk yet.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            stamp: None,
            prev_stamp: None,
            prev_info: None,
            checksum: None,
            last_check: None,
            dir_size: None,
            info: None,
        }
    }

    /// True iff the path currently resolves on disk. A dangling symlink
    /// still exists: the terminal link is not followed.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.symlink_metadata().is_ok()
    }

    /// Drops every per-run cache so the next access re-reads the disk.
    pub fn invalidate(&mut self) {
        self.info = None;
        self.dir_size = None;
    }

    fn metadata(&mut self) -> Option<&Metadata> {
        if self.info.is_none() {
            // Fails when the parent directory no longer exists; treated as
            // the path being gone.
            self.info = self.path.symlink_metadata().ok();
        }
        self.info.as_ref()
    }

    /// Classifies the path, returning `None` when it is inaccessible.
    pub fn kind(&mut self) -> Option<EntryKind> {
        self.metadata().map(EntryKind::from_metadata)
    }

    /// Whether the path is a regular file. Inaccessible paths are neither.
    pub fn is_regular_file(&mut self) -> bool {
        self.kind() == Some(EntryKind::File)
    }

    /// Whether the path is a directory. Inaccessible paths are neither.
    pub fn is_directory(&mut self) -> bool {
        self.kind() == Some(EntryKind::Dir)
    }

    fn last_access_time(&mut self, opts: &ScanOptions) -> Option<DateTime<Utc>> {
        if !opts.cache_attrs {
            self.info = None;
        }
        self.metadata().map(|meta| datetime_from_unix(meta.atime()))
    }

    fn last_mod_time(&mut self, opts: &ScanOptions) -> Option<DateTime<Utc>> {
        if !opts.cache_attrs {
            self.info = None;
        }
        self.metadata().map(|meta| datetime_from_unix(meta.mtime()))
    }

    /// Byte size: file length for regular files, recursive sum of contained
    /// regular files for directories, 0 for everything else. The directory
    /// sum is expensive and cached unless attribute caching is disabled.
    pub fn size(&mut self, opts: &ScanOptions) -> u64 {
        if !opts.cache_attrs {
            self.info = None;
            self.dir_size = None;
        }

        if self.is_regular_file() {
            self.metadata().map_or(0, Metadata::len)
        } else if self.is_directory() {
            if self.dir_size.is_none() {
                let sum = WalkDir::new(&self.path)
                    .follow_links(false)
                    .into_iter()
                    .filter_map(std::result::Result::ok)
                    .filter(|entry| entry.file_type().is_file())
                    .filter_map(|entry| entry.metadata().ok())
                    .map(|meta| meta.len())
                    .sum();
                self.dir_size = Some(sum);
            }
            self.dir_size.unwrap_or(0)
        } else {
            0
        }
    }

    /// Lazily computed content digest; regular files only.
    ///
    /// Computing a digest feeds the run's byte counter (which drives the
    /// periodic mid-scan checkpoint), marks state dirty so the digest is
    /// persisted, and when a check window is configured picks a randomized
    /// last-verified instant inside the window so that re-verification of a
    /// large population does not all come due on the same day.
    pub fn checksum(&mut self, opts: &ScanOptions, run: &mut RunState) -> Option<String> {
        if !opts.cache_attrs {
            self.checksum = None;
        }
        if !self.is_regular_file() {
            return None;
        }
        if self.checksum.is_none() {
            debug!("Computing digest for: {}", self.path.display());
            run.bytes_scanned += self.size(opts);
            match hash::hash_file(&self.path) {
                Ok(digest) => {
                    self.checksum = Some(digest);
                    if let Some(window) = opts.check_window
                        && window > 0
                    {
                        let days_back = rand::rng().random_range(0..window);
                        self.last_check = Some(run.now - Duration::days(days_back));
                    } else {
                        self.last_check = Some(run.now);
                    }
                    // Make sure this digest is written out.
                    run.dirty = true;
                }
                Err(err) => {
                    warn!("Could not digest '{}': {err}", self.path.display());
                    return None;
                }
            }
        }
        self.checksum.clone()
    }

    /// Whether the content changed since the last save, per the configured
    /// strictness.
    ///
    /// A modify-time difference alone is a change unless digest confirmation
    /// is on, in which case the fresh digest is compared against the cached
    /// one. With `use_checksum_always`, an unchanged modify time still
    /// triggers a digest comparison, but only once the check window (if any)
    /// has elapsed since the last verification.
    pub fn contents_have_changed(&mut self, opts: &ScanOptions, run: &mut RunState) -> bool {
        let Some(prev) = self.prev_info.clone() else {
            return false;
        };
        self.info = None;

        let Some(modified) = self.metadata().map(|meta| meta.mtime()) else {
            // Vanished; the removal path reports it.
            return false;
        };

        if modified != prev.modified {
            if opts.use_checksum {
                match self.checksum.take() {
                    Some(cached) => {
                        return self.checksum(opts, run).as_deref() != Some(cached.as_str());
                    }
                    None => {
                        // Nothing to compare against; prime the cache and
                        // trust the modify time.
                        let _ = self.checksum(opts, run);
                    }
                }
            }
            return true;
        }

        if opts.use_checksum_always {
            let mut due = true;
            if let Some(window) = opts.check_window {
                if let Some(last) = self.last_check {
                    due = (run.now - last).num_days() >= window;
                } else if self.checksum.is_none() {
                    // First sighting under a window: prime the digest, which
                    // also picks the jittered due date.
                    let _ = self.checksum(opts, run);
                    return false;
                }
                // A cached digest with no recorded verification gets
                // verified now.
            }
            if due {
                match self.checksum.take() {
                    Some(cached) => {
                        return self.checksum(opts, run).as_deref() != Some(cached.as_str());
                    }
                    None => {
                        let _ = self.checksum(opts, run);
                    }
                }
            }
        }

        false
    }

    /// The age anchor: last-access or last-modify time when so configured,
    /// otherwise the first-seen instant (initialized to the run's clock on
    /// first use).
    pub fn effective_timestamp(
        &mut self,
        opts: &ScanOptions,
        run: &RunState,
    ) -> Option<DateTime<Utc>> {
        if opts.use_atime {
            return self.last_access_time(opts);
        }
        if opts.use_mtime {
            return self.last_mod_time(opts);
        }
        Some(*self.stamp.get_or_insert(run.now))
    }

    /// Whether the effective timestamp drifted from the value recorded at
    /// the last save. Only meaningful when the anchor is read from disk.
    pub fn timestamp_has_changed(&mut self, opts: &ScanOptions, run: &RunState) -> bool {
        let Some(prev) = self.prev_stamp else {
            return false;
        };
        self.effective_timestamp(opts, run)
            .is_some_and(|stamp| stamp != prev)
    }

    /// Resets the first-seen instant; done when an add or change event is
    /// accepted.
    pub fn set_stamp(&mut self, stamp: DateTime<Utc>) {
        self.stamp = Some(stamp);
    }

    /// Cached digest, if one has been computed or loaded.
    #[must_use]
    pub fn cached_checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    /// When the digest was last verified.
    #[must_use]
    pub fn last_verified_at(&self) -> Option<DateTime<Utc>> {
        self.last_check
    }

    /// Captures the save-time view of this entry: the effective timestamp
    /// always, the raw metadata only when change detection is on.
    pub(crate) fn capture_snapshot(&mut self, opts: &ScanOptions, run: &RunState) {
        if let Some(stamp) = self.effective_timestamp(opts, run) {
            self.prev_stamp = Some(stamp);
        }
        if opts.check {
            self.info = None;
            self.prev_info = self.metadata().map(|meta| StatSnapshot {
                kind: EntryKind::from_metadata(meta),
                size: meta.len(),
                modified: meta.mtime(),
            });
        }
    }
}
