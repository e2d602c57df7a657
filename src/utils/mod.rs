//! Utility functions and helpers.
//!
//! - Path manipulation (tilde expansion)
//! - File size formatting
//! - Timestamp conversions
//!
//! # Submodules
//!
//! - [`hash`]: Content digest computation
//! - [`serialization`]: Binary serialization

/// Content digest computation (xxHash3)
pub mod hash;
/// Binary serialization utilities
pub mod serialization;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::SystemTime;

/// Expands a path starting with `~` to the user's home directory.
///
/// # Errors
///
/// Returns an error if the path is empty.
pub fn expand_tilde(path: &str) -> Result<PathBuf> {
    if path.is_empty() {
        anyhow::bail!("Path cannot be empty");
    }
    if path == "~"
        && let Some(home) = dirs::home_dir()
    {
        return Ok(home);
    }
    if path.starts_with("~/")
        && let Some(home) = dirs::home_dir()
    {
        return Ok(home.join(&path[2..]));
    }
    Ok(PathBuf::from(path))
}

/// Formats a file size in bytes into a human-readable string with appropriate units.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn format_size(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size.round() as u64, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

/// Converts a Unix timestamp in seconds into a UTC instant.
///
/// Out-of-range values clamp to the epoch rather than failing, since they can
/// only come from a damaged state file.
#[must_use]
pub fn datetime_from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(|| DateTime::from_timestamp(0, 0).unwrap())
}

/// Converts a [`SystemTime`] (e.g. from file metadata) into a UTC instant.
#[must_use]
pub fn datetime_from_system(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde_home() -> Result<()> {
        let expanded = expand_tilde("~/some/file")?;
        assert!(expanded.is_absolute());
        assert!(expanded.ends_with("some/file"));
        Ok(())
    }

    #[test]
    fn test_expand_tilde_plain_path() -> Result<()> {
        assert_eq!(expand_tilde("/tmp/x")?, PathBuf::from("/tmp/x"));
        Ok(())
    }

    #[test]
    fn test_expand_tilde_empty_errors() {
        assert!(expand_tilde("").is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1_048_576), "1.00 MB");
    }

    #[test]
    fn test_datetime_from_unix_roundtrip() {
        let dt = datetime_from_unix(1_234_567_890);
        assert_eq!(dt.timestamp(), 1_234_567_890);
    }
}
