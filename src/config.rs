//! Scan configuration and validation.
//!
//! Everything the engine can be told to do is collected in [`ScanOptions`].
//! Validation runs once, before any scanning starts; anything that fails here
//! is a configuration error and aborts the run (transient filesystem trouble
//! during the scan itself is handled locally by the scanner instead).

use anyhow::{Context, Result, bail};
use glob::Pattern;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::utils::expand_tilde;

/// Options controlling a [`Scanner`](crate::scanner::Scanner) run.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Root of the swept tree.
    pub directory: PathBuf,
    /// Location of the state snapshot. A bare file name is resolved inside
    /// `directory`, which keeps the snapshot next to what it describes.
    pub database: PathBuf,
    /// Recursion ceiling: 0 scans only the directory's own entries, negative
    /// values remove the ceiling.
    pub depth: i32,
    /// Age ceiling in days (fractional allowed). Negative disables the age
    /// policy entirely.
    pub days: f64,
    /// Report ages only; suppresses the deletion chain but still persists
    /// state updates.
    pub ages_only: bool,
    /// Age entries by their last-accessed time.
    pub use_atime: bool,
    /// Age entries by their last-modified time.
    pub use_mtime: bool,
    /// Keep metadata, size, and digest caches for the whole run instead of
    /// re-reading them at each access.
    pub cache_attrs: bool,
    /// Detect content/timestamp changes against the previous snapshot.
    pub check: bool,
    /// Confirm modification-time drift with a content digest before reporting
    /// a change.
    pub use_checksum: bool,
    /// Digest content on every scan even when modification times agree.
    pub use_checksum_always: bool,
    /// Re-verify digests only every this many days (spreads re-hashing out).
    pub check_window: Option<i64>,
    /// Aggregate size budget for the tracked tree, in bytes.
    pub max_size: Option<u64>,
    /// Skip the tree walk when the snapshot is newer than the directory.
    /// Cannot observe additions while skipping; this is a documented
    /// limitation of the mode, not a defect.
    pub minimal_scan: bool,
    /// Remove directories as they empty out.
    pub prune_dirs: bool,
    /// Securely wipe files instead of deleting them.
    pub secure: bool,
    /// Read directory entries in sorted order, for reproducible runs.
    pub sort: bool,
    /// Retry failed removals and commands under sudo.
    pub sudo: bool,
    /// Stage mid-scan checkpoints here before copying them into place.
    pub staging_dir: Option<PathBuf>,
    /// Entry names matching any of these are skipped and actively untracked.
    pub ignore: Vec<Pattern>,
    /// Make no filesystem changes; still exercises the full diff and event
    /// dispatch so policy changes can be validated safely.
    pub dry_run: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            directory: PathBuf::new(),
            database: PathBuf::from(crate::STATE_FILE),
            depth: -1,
            days: -1.0,
            ages_only: false,
            use_atime: false,
            use_mtime: false,
            cache_attrs: false,
            check: false,
            use_checksum: false,
            use_checksum_always: false,
            check_window: None,
            max_size: None,
            minimal_scan: false,
            prune_dirs: false,
            secure: false,
            sort: false,
            sudo: false,
            staging_dir: None,
            ignore: default_ignore_patterns(),
            dry_run: false,
        }
    }
}

impl ScanOptions {
    /// Creates options for sweeping `directory` with everything else at its
    /// default. Call [`validate`](Self::validate) before handing the result
    /// to a scanner.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    /// Normalizes and checks the options.
    ///
    /// Expands `~`, resolves a bare database name into the swept directory,
    /// and folds `use_checksum_always` into `use_checksum`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory does not exist, is not a directory,
    /// or cannot be read.
    pub fn validate(&mut self) -> Result<()> {
        let raw = self.directory.to_string_lossy().into_owned();
        self.directory = expand_tilde(&raw)?;

        if !self.directory.is_dir() {
            bail!("'{}' is not a valid directory", self.directory.display());
        }
        std::fs::read_dir(&self.directory).with_context(|| {
            format!(
                "Directory '{}' is not readable or not searchable",
                self.directory.display()
            )
        })?;

        if self.database.components().count() == 1 {
            self.database = self.directory.join(&self.database);
        }

        // The snapshot must never sweep itself up.
        if self.database.parent() == Some(self.directory.as_path())
            && let Some(name) = self.database.file_name()
            && let Ok(pattern) = Pattern::new(&name.to_string_lossy())
            && !self.ignore.contains(&pattern)
        {
            self.ignore.push(pattern);
        }

        self.use_checksum = self.use_checksum || self.use_checksum_always;

        if self.minimal_scan && self.depth != 0 {
            warn!("minimal_scan with depth != 0 may miss changes in subdirectories");
        }

        Ok(())
    }

    /// Whether an entry name matches any configured ignore pattern.
    #[must_use]
    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignore.iter().any(|pattern| pattern.matches(name))
    }
}

/// Patterns every scan skips unless overridden: the default snapshot file and
/// the macOS directory droppings.
#[must_use]
pub fn default_ignore_patterns() -> Vec<Pattern> {
    [crate::STATE_FILE, ".DS_Store", ".localized"]
        .iter()
        .filter_map(|name| Pattern::new(name).ok())
        .collect()
}

/// Compiles user-supplied ignore patterns.
///
/// # Errors
///
/// Returns an error naming the first pattern that fails to compile.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|text| {
            Pattern::new(text).with_context(|| format!("Invalid ignore pattern '{text}'"))
        })
        .collect()
}

/// Parses a size budget: either a byte count, or `N%` of the capacity of the
/// volume holding `directory`.
///
/// # Errors
///
/// Returns an error for malformed input or when the volume cannot be queried.
pub fn parse_max_size(text: &str, directory: &Path) -> Result<u64> {
    let text = text.trim();
    if let Ok(bytes) = text.parse::<u64>() {
        return Ok(bytes);
    }

    if let Some(percent) = text.strip_suffix('%') {
        let percent: u64 = percent
            .parse()
            .with_context(|| format!("Invalid max-size percentage '{text}'"))?;
        if percent > 100 {
            bail!("max-size percentage '{text}' exceeds 100%");
        }
        let capacity = volume_capacity(directory)?;
        return Ok(capacity / 100 * percent);
    }

    bail!("Invalid max-size '{text}': expected bytes or a percentage")
}

/// Total capacity in bytes of the volume holding `path`.
#[cfg(unix)]
fn volume_capacity(path: &Path) -> Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .context("Path contains an interior NUL byte")?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &raw mut stat) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("statvfs failed for '{}'", path.display()));
    }
    #[allow(clippy::unnecessary_cast)]
    Ok(stat.f_frsize as u64 * stat.f_blocks as u64)
}
