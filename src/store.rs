//! State snapshot persistence.
//!
//! The tracked-entry mapping is serialized with bincode into a single state
//! file, by default colocated in the scanned directory. A shared advisory
//! lock is held while loading and an exclusive one while saving, so a
//! concurrent reader never observes a half-written snapshot. Two whole
//! scanners racing over the same directory remain the operator's problem.
//!
//! Old deployments persisted only a path → first-seen-timestamp mapping;
//! such files are upgraded transparently on load.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::config::ScanOptions;
use crate::entry::Entry;
use crate::events::run_command;
use crate::scanner::RunState;
use crate::utils::{datetime_from_system, datetime_from_unix, serialization};

/// Current snapshot layout version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Owned snapshot, as read from disk.
#[derive(Debug, Deserialize)]
struct Snapshot {
    version: u32,
    entries: HashMap<PathBuf, Entry>,
}

/// Borrowed snapshot, as written to disk. Field-for-field compatible with
/// [`Snapshot`].
#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    entries: &'a HashMap<PathBuf, Entry>,
}

/// The legacy on-disk form: path → Unix-seconds first-seen stamp.
type LegacyState = HashMap<PathBuf, i64>;

/// Loads and saves the tracked-entry mapping for one state file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// A store backed by `path`. Nothing is touched until load or save.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Location of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the tracked mapping and the state file's modification time.
    ///
    /// A missing or unreadable state file yields an empty mapping; the scan
    /// proceeds and rebuilds it. A *corrupt* file is an error, since silently
    /// starting over would re-fire every add event.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be locked, read, or
    /// decoded.
    pub fn load(&self) -> Result<(HashMap<PathBuf, Entry>, Option<DateTime<Utc>>)> {
        if !self.path.is_file() {
            debug!("State file '{}' does not exist yet", self.path.display());
            return Ok((HashMap::new(), None));
        }

        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) => {
                error!(
                    "No read access to state data in '{}': {err}",
                    self.path.display()
                );
                return Ok((HashMap::new(), None));
            }
        };

        debug!("Acquiring shared lock on '{}'", self.path.display());
        file.lock_shared()
            .with_context(|| format!("Failed to lock state file: {}", self.path.display()))?;
        let mut data = Vec::new();
        let read_result = file.read_to_end(&mut data);
        let _ = file.unlock();
        read_result
            .with_context(|| format!("Failed to read state file: {}", self.path.display()))?;

        let entries = decode_entries(&data)
            .with_context(|| format!("Failed to decode state file: {}", self.path.display()))?;
        info!(
            "Loaded state data from '{}' ({} entries)",
            self.path.display(),
            entries.len()
        );

        let mtime = fs::metadata(&self.path)
            .ok()
            .and_then(|meta| meta.modified().ok())
            .map(datetime_from_system);
        Ok((entries, mtime))
    }

    /// Saves the tracked mapping, first capturing each entry's save-time
    /// snapshot (effective timestamp, and raw metadata when change detection
    /// is on). With `staging` set the snapshot is written there instead, to
    /// be promoted later; that supports scanning volumes whose own state
    /// file location is not writable mid-scan.
    ///
    /// Returns the written file's modification time.
    ///
    /// # Errors
    ///
    /// Returns an error when the snapshot cannot be written; the partial
    /// file is deleted first, since a corrupt snapshot is worse than a
    /// missing one.
    pub fn save(
        &self,
        entries: &mut HashMap<PathBuf, Entry>,
        opts: &ScanOptions,
        run: &mut RunState,
        staging: Option<&Path>,
    ) -> Result<Option<DateTime<Utc>>> {
        let target = match staging {
            Some(dir) => dir.join(
                self.path
                    .file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new(crate::STATE_FILE)),
            ),
            None => self.path.clone(),
        };

        if let Some(parent) = target.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            info!("Creating state directory '{}'", parent.display());
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create state directory: {}", parent.display())
            })?;
        }

        for entry in entries.values_mut() {
            entry.capture_snapshot(opts, run);
        }

        let data = serialization::serialize(&SnapshotRef {
            version: SNAPSHOT_VERSION,
            entries: &*entries,
        })
        .context("Failed to serialize state snapshot")?;

        debug!("Writing updated state data to '{}'", target.display());
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&target)
            .with_context(|| format!("Failed to open state file: {}", target.display()))?;

        debug!("Acquiring exclusive lock on '{}'", target.display());
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock state file: {}", target.display()))?;
        let outcome = write_all(&file, &data);
        let _ = file.unlock();

        if let Err(err) = outcome {
            let _ = fs::remove_file(&target);
            return Err(err)
                .with_context(|| format!("Failed to write state file: {}", target.display()));
        }

        run.dirty = false;

        let mtime = fs::metadata(&target)
            .ok()
            .and_then(|meta| meta.modified().ok())
            .map(datetime_from_system);
        Ok(mtime)
    }

    /// Copies a staged checkpoint into the real state file location and
    /// deletes the staged copy, escalating to `sudo cp` when the plain copy
    /// is not permitted.
    pub fn promote_staged(&self, staging: &Path, sudo: bool, dry_run: bool) {
        let Some(name) = self.path.file_name() else {
            return;
        };
        let staged = staging.join(name);
        if !staged.is_file() {
            return;
        }

        debug!(
            "Promoting staged state '{}' -> '{}'",
            staged.display(),
            self.path.display()
        );
        if dry_run {
            return;
        }

        match fs::copy(&staged, &self.path) {
            Ok(_) => {
                let _ = fs::remove_file(&staged);
            }
            Err(err) => {
                if sudo {
                    let template = format!(
                        "sudo /bin/cp -p {{}} {}",
                        shell_words::quote(&self.path.to_string_lossy())
                    );
                    if run_command(&template, &staged, dry_run).unwrap_or(false) {
                        let _ = fs::remove_file(&staged);
                    }
                } else {
                    error!("Could not promote staged state file: {err}");
                }
            }
        }
    }
}

fn write_all(mut file: &File, data: &[u8]) -> std::io::Result<()> {
    file.write_all(data)?;
    file.flush()
}

fn decode_entries(data: &[u8]) -> Result<HashMap<PathBuf, Entry>> {
    match serialization::deserialize::<Snapshot>(data) {
        Ok(snapshot) if (1..=SNAPSHOT_VERSION).contains(&snapshot.version) => {
            Ok(snapshot.entries)
        }
        other => {
            if let Ok(legacy) = serialization::deserialize::<LegacyState>(data) {
                debug!("Upgrading legacy state ({} records)", legacy.len());
                return Ok(legacy
                    .into_iter()
                    .map(|(path, secs)| {
                        let mut entry = Entry::new(path.clone());
                        entry.set_stamp(datetime_from_unix(secs));
                        (path, entry)
                    })
                    .collect());
            }
            match other {
                Ok(snapshot) => bail!("Unsupported snapshot version {}", snapshot.version),
                Err(err) => Err(err),
            }
        }
    }
}
