//! The reconciliation engine.
//!
//! A [`Scanner`] walks a directory tree depth-first in post-order, diffs what
//! it finds against the tracked-entry mapping loaded from the state store,
//! fires lifecycle events, and applies the age and size eviction policies.
//! Children are fully processed before their parent's own reconciliation, so
//! directories that empty out during a run can be pruned on the way back up
//! in a single pass.
//!
//! Deletions are detected by elimination: before the walk, the tracked
//! mapping is copied into a *shadow* set, every reconciled existing path is
//! struck from it, and whatever remains afterwards was not encountered at
//! all: deleted, moved away, or (in minimal-scan mode) simply not
//! re-verified.
//!
//! Errors while handling one entry never abort the run; the scan continues
//! with the next entry. Only configuration and snapshot-write errors are
//! fatal.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::actions::{self, RemoveOptions};
use crate::config::ScanOptions;
use crate::entry::Entry;
use crate::events::{Event, EventHandlers};
use crate::policy::{self, SizeRecord};
use crate::store::StateStore;
use crate::utils::{datetime_from_system, format_size};

/// Cumulative digested bytes that trigger a mid-scan state checkpoint.
/// Bounds how much progress a very large scan can lose to an interruption.
const CHECKPOINT_BYTES: u64 = 10_000_000_000;

/// Mutable state threaded through one `run()`: the run's clock, the byte
/// counter driving checkpoints, the dirty flag, and the oldest age seen.
#[derive(Debug)]
pub struct RunState {
    /// The instant this run considers "now"; one value for the whole run.
    pub now: DateTime<Utc>,
    /// Bytes digested since the last checkpoint.
    pub bytes_scanned: u64,
    /// Whether any mutating event was accepted since the last save.
    pub dirty: bool,
    /// Oldest age (days) observed among still-existing entries.
    pub oldest: f64,
}

impl RunState {
    /// Fresh per-run state anchored at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            bytes_scanned: 0,
            dirty: false,
            oldest: 0.0,
        }
    }
}

/// Stateful directory reconciler. Create one per swept directory and call
/// [`run`](Self::run) on every schedule tick.
pub struct Scanner {
    opts: ScanOptions,
    handlers: EventHandlers,
    store: StateStore,
    entries: HashMap<PathBuf, Entry>,
    loaded: bool,
    db_mtime: Option<DateTime<Utc>>,
}

impl Scanner {
    /// Builds a scanner from validated options and handler slots.
    #[must_use]
    pub fn new(opts: ScanOptions, handlers: EventHandlers) -> Self {
        let store = StateStore::new(opts.database.clone());
        Self {
            opts,
            handlers,
            store,
            entries: HashMap::new(),
            loaded: false,
            db_mtime: None,
        }
    }

    /// The tracked mapping as of the last run (or load).
    #[must_use]
    pub fn entries(&self) -> &HashMap<PathBuf, Entry> {
        &self.entries
    }

    /// The options this scanner runs with.
    #[must_use]
    pub fn options(&self) -> &ScanOptions {
        &self.opts
    }

    /// One full reconciliation pass: load state (first call only), walk or
    /// skip-scan, resolve shadow removals, apply eviction policies, persist
    /// state if dirty. Safe to invoke repeatedly; a run over an unchanged
    /// tree fires no events.
    ///
    /// # Errors
    ///
    /// Returns an error for unusable state data or a failed snapshot write.
    /// Per-entry filesystem trouble is absorbed and logged instead.
    pub fn run(&mut self) -> Result<()> {
        if !self.loaded {
            let (entries, mtime) = self.store.load()?;
            self.entries = entries;
            self.db_mtime = mtime;
            self.loaded = true;
        }

        let mut run = RunState::new(Utc::now());
        let mut shadow: HashMap<PathBuf, Entry> = self.entries.clone();

        if self.skip_scan_applies() {
            // The tree is unchanged at the top level: re-verify what is
            // already tracked without touching the disk layout. Additions
            // cannot be observed in this mode.
            let mut paths: Vec<PathBuf> = self.entries.keys().cloned().collect();
            if self.opts.sort {
                paths.sort();
            }
            for path in paths {
                if let Some(entry) = self.entries.remove(&path) {
                    self.reconcile(entry, true, &mut shadow, &mut run);
                }
            }
        } else {
            let root = self.opts.directory.clone();
            self.walk(&root, 0, &mut shadow, &mut run)?;
            if let Some(staging) = self.opts.staging_dir.clone() {
                self.store
                    .promote_staged(&staging, self.opts.sudo, self.opts.dry_run);
            }
        }

        self.resolve_shadow(shadow, &mut run);

        if self.opts.days >= 0.0 && run.oldest < self.opts.days {
            info!(
                "No entries were beyond the age limit (oldest {:.1}d < {:.1}d)",
                run.oldest, self.opts.days
            );
        }

        self.apply_size_policy(&mut run);

        if run.dirty && !self.opts.dry_run {
            self.db_mtime = self.store.save(&mut self.entries, &self.opts, &mut run, None)?;
        }

        Ok(())
    }

    /// Whether the minimal-scan short-circuit applies: the state file exists
    /// and is at least as new as the swept directory itself.
    fn skip_scan_applies(&self) -> bool {
        if !self.opts.minimal_scan {
            return false;
        }
        let Some(db_mtime) = self.db_mtime else {
            return false;
        };
        let Ok(meta) = fs::metadata(&self.opts.directory) else {
            return false;
        };
        let Ok(modified) = meta.modified() else {
            return false;
        };
        let dir_mtime = datetime_from_system(modified);
        let skip = db_mtime >= dir_mtime;
        info!(
            "State mtime {db_mtime} {} directory mtime {dir_mtime}, {} scan",
            if skip { ">=" } else { "<" },
            if skip { "will not" } else { "will" }
        );
        skip
    }

    /// Recursive post-order walk. Ignored names are dropped from tracking
    /// and skipped; everything else is reconciled after any descent into it.
    fn walk(
        &mut self,
        dir: &Path,
        depth: i32,
        shadow: &mut HashMap<PathBuf, Entry>,
        run: &mut RunState,
    ) -> Result<()> {
        let reader = match fs::read_dir(dir) {
            Ok(reader) => reader,
            Err(err) => {
                warn!("Could not read directory '{}': {err}", dir.display());
                return Ok(());
            }
        };

        let mut paths: Vec<PathBuf> = reader
            .filter_map(std::result::Result::ok)
            .map(|dirent| dirent.path())
            .collect();
        if self.opts.sort {
            paths.sort();
        }

        for path in paths {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if self.opts.is_ignored(&name) {
                self.drop_ignored(&path, run);
                continue;
            }

            let (mut entry, tracked) = match self.entries.remove(&path) {
                Some(entry) => (entry, true),
                None => {
                    debug!("Created entry '{}'", path.display());
                    (Entry::new(path.clone()), false)
                }
            };

            // Children first, so empty directories cascade upward.
            if entry.exists()
                && entry.is_directory()
                && (self.opts.depth < 0 || depth < self.opts.depth)
            {
                self.walk(&path, depth + 1, shadow, run)?;
            }

            self.reconcile(entry, tracked, shadow, run);

            if run.bytes_scanned > CHECKPOINT_BYTES {
                self.checkpoint(run)?;
                run.bytes_scanned = 0;
            }
        }

        Ok(())
    }

    /// Drops an ignored path, and every tracked path nested under it, from
    /// the mapping.
    fn drop_ignored(&mut self, path: &Path, run: &mut RunState) {
        if self.entries.remove(path).is_some() {
            debug!("Entry '{}' removed due to being ignored", path.display());
            run.dirty = true;
        }
        let nested: Vec<PathBuf> = self
            .entries
            .keys()
            .filter(|key| key.starts_with(path))
            .cloned()
            .collect();
        for key in nested {
            debug!("Entry '{}' removed due to being ignored", key.display());
            self.entries.remove(&key);
            run.dirty = true;
        }
    }

    /// The per-entry state machine, run after any descent into the entry.
    fn reconcile(
        &mut self,
        mut entry: Entry,
        was_tracked: bool,
        shadow: &mut HashMap<PathBuf, Entry>,
        run: &mut RunState,
    ) {
        let mut keep = was_tracked;

        if !was_tracked {
            debug!(
                "Entry '{}' is being seen for the first time",
                entry.path.display()
            );
            if self.handlers.fire(&Event::Added(&entry), &self.opts) {
                entry.set_stamp(run.now);
                keep = true;
                run.dirty = true;
            }
        } else if entry.exists() {
            let changed = self.opts.check && entry.contents_have_changed(&self.opts, run);
            if changed || entry.timestamp_has_changed(&self.opts, run) {
                debug!(
                    "Entry '{}' {} seems to have changed",
                    entry.path.display(),
                    if changed { "content" } else { "timestamp" }
                );
                if self.handlers.fire(&Event::Changed(&entry, changed), &self.opts) {
                    entry.set_stamp(run.now);
                    run.dirty = true;
                }
            }

            // Dealt with; whatever is left in the shadow set at the end was
            // never encountered and triggers a removal.
            shadow.remove(&entry.path);

            if self.opts.days >= 0.0
                && let Some(stamp) = entry.effective_timestamp(&self.opts, run)
            {
                let age = policy::age_in_days(run.now, stamp);

                if self.opts.ages_only {
                    println!("{age:8.1} {}", entry.path.display());
                    self.entries.insert(entry.path.clone(), entry);
                    return;
                }

                if age > run.oldest {
                    run.oldest = age;
                }

                if policy::past_limit(age, self.opts.days) {
                    debug!("Entry '{}' is beyond the age limit", entry.path.display());
                    self.handlers
                        .fire(&Event::PastLimit(&entry, age), &self.opts);
                }
            }

            if self.opts.prune_dirs && entry.is_directory() && directory_is_empty(&entry.path)
            {
                info!("Pruning directory '{}'", entry.path.display());
                let _ = actions::remove(&entry.path, &RemoveOptions::from_scan(&self.opts));
            }
        }

        // Anything above (a past-limit handler, directory pruning, or plain
        // concurrent deletion) may have taken the path off disk; report it
        // right away rather than waiting a run. Reported here means the
        // shadow pass must not report it again.
        if !entry.exists() {
            shadow.remove(&entry.path);
            debug!(
                "Entry '{}' was removed or found missing",
                entry.path.display()
            );
            if self.handlers.fire(&Event::Removed(&entry), &self.opts) {
                run.dirty = true;
                return;
            }
        }

        if keep {
            self.entries.insert(entry.path.clone(), entry);
        }
    }

    /// Fires removals for every tracked path the walk never encountered.
    fn resolve_shadow(&mut self, shadow: HashMap<PathBuf, Entry>, run: &mut RunState) {
        let mut leftovers: Vec<(PathBuf, Entry)> = shadow.into_iter().collect();
        if self.opts.sort {
            leftovers.sort_by(|a, b| a.0.cmp(&b.0));
        }
        for (path, entry) in leftovers {
            if self.handlers.fire(&Event::Removed(&entry), &self.opts) {
                if self.entries.remove(&path).is_some() {
                    debug!("Removing missing entry at '{}'", path.display());
                } else {
                    warn!("Missing entry '{}' not in tracked mapping", path.display());
                }
                run.dirty = true;
            }
        }
    }

    /// Mid-scan durability point: persist state so a crash costs at most one
    /// checkpoint's worth of digesting.
    fn checkpoint(&mut self, run: &mut RunState) -> Result<()> {
        if !run.dirty || self.opts.dry_run {
            return Ok(());
        }
        let staging = self.opts.staging_dir.clone();
        self.store
            .save(&mut self.entries, &self.opts, run, staging.as_deref())?;
        if let Some(dir) = staging {
            self.store
                .promote_staged(&dir, self.opts.sudo, self.opts.dry_run);
        }
        self.db_mtime = fs::metadata(self.store.path())
            .ok()
            .and_then(|meta| meta.modified().ok())
            .map(datetime_from_system);
        Ok(())
    }

    /// Shrinks the tracked tree to the configured size budget. Evaluated
    /// once per run, only when state changed. Physical eviction leaves the
    /// mapping alone; the next run's shadow pass delivers the removals.
    fn apply_size_policy(&mut self, run: &mut RunState) {
        let Some(max_size) = self.opts.max_size else {
            return;
        };
        if !run.dirty {
            return;
        }

        let mut records = Vec::with_capacity(self.entries.len());
        for entry in self.entries.values_mut() {
            let size = entry.size(&self.opts);
            let Some(stamp) = entry.effective_timestamp(&self.opts, run) else {
                continue;
            };
            records.push(SizeRecord {
                path: entry.path.clone(),
                size,
                stamp,
            });
        }

        let total: u64 = records.iter().map(|record| record.size).sum();
        if total <= max_size {
            info!(
                "Directory is within size limits ({} <= {})",
                format_size(total),
                format_size(max_size)
            );
            return;
        }
        info!(
            "Directory exceeds the maximum size ({} > {})",
            format_size(total),
            format_size(max_size)
        );

        let remove_opts = RemoveOptions::from_scan(&self.opts);
        for record in policy::plan_evictions(&records, max_size) {
            if record.size == 0 {
                info!("Purging empty entry {}", record.path.display());
            } else {
                info!(
                    "Purging entry {} to reduce size (frees {})",
                    record.path.display(),
                    format_size(record.size)
                );
            }
            let _ = actions::remove(&record.path, &remove_opts);
            run.dirty = true;
        }
    }
}

fn directory_is_empty(path: &Path) -> bool {
    fs::read_dir(path).map(|mut entries| entries.next().is_none()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn scanner_for(dir: &Path) -> Scanner {
        let mut opts = ScanOptions::new(dir);
        opts.database = dir.join("state.dat");
        opts.sort = true;
        opts.validate().unwrap();
        Scanner::new(opts, EventHandlers::default())
    }

    #[test]
    fn test_run_tracks_new_files() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("hello"), b"Hello, world!\n")?;

        let mut scanner = scanner_for(dir.path());
        scanner.run()?;

        assert_eq!(scanner.entries().len(), 1);
        assert!(scanner.entries().contains_key(&dir.path().join("hello")));
        assert!(dir.path().join("state.dat").is_file());
        Ok(())
    }

    #[test]
    fn test_drop_ignored_untracks_nested_paths() -> Result<()> {
        let dir = tempdir()?;
        let sub = dir.path().join("cache");
        fs::create_dir(&sub)?;
        fs::write(sub.join("blob"), b"x")?;

        let mut scanner = scanner_for(dir.path());
        scanner.run()?;
        assert_eq!(scanner.entries().len(), 2);

        let mut run = RunState::new(Utc::now());
        scanner.drop_ignored(&sub, &mut run);

        assert!(scanner.entries().is_empty());
        assert!(run.dirty);
        Ok(())
    }

    #[test]
    fn test_depth_zero_does_not_descend() -> Result<()> {
        let dir = tempdir()?;
        let sub = dir.path().join("sub");
        fs::create_dir(&sub)?;
        fs::write(sub.join("deep"), b"x")?;

        let mut scanner = scanner_for(dir.path());
        scanner.opts.depth = 0;
        scanner.run()?;

        assert_eq!(scanner.entries().len(), 1);
        assert!(scanner.entries().contains_key(&sub));
        Ok(())
    }

    #[test]
    fn test_unreadable_directory_is_skipped() -> Result<()> {
        let dir = tempdir()?;
        let mut scanner = scanner_for(dir.path());
        let mut shadow = HashMap::new();
        let mut run = RunState::new(Utc::now());

        // Walking a nonexistent subdirectory warns and continues.
        scanner.walk(&dir.path().join("vanished"), 0, &mut shadow, &mut run)?;
        assert!(scanner.entries().is_empty());
        Ok(())
    }
}
