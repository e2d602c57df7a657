//! Filesystem mutation collaborators: delete, secure wipe, move to trash.
//!
//! These are the hands of the engine. They expose a plain pass/fail
//! contract, retry once under sudo when enabled, and do nothing at all in
//! dry-run mode (while still reporting success, so the surrounding decision
//! logic can be exercised end to end). A failed mutation is logged and the
//! entry stays tracked, so it is retried on the next run.

use std::fs;
use std::path::Path;
use tracing::{debug, error, warn};

use crate::config::ScanOptions;
use crate::events::run_command;

/// The subset of options mutation needs; cheap to hand to handlers.
#[derive(Debug, Clone, Copy)]
pub struct RemoveOptions {
    /// Perform no mutation, report success.
    pub dry_run: bool,
    /// Retry failed mutations under sudo.
    pub sudo: bool,
    /// Wipe file content via `srm` instead of unlinking.
    pub secure: bool,
}

impl RemoveOptions {
    /// Extracts the mutation-relevant flags from scan options.
    #[must_use]
    pub fn from_scan(opts: &ScanOptions) -> Self {
        Self {
            dry_run: opts.dry_run,
            sudo: opts.sudo,
            secure: opts.secure,
        }
    }
}

/// Removes a file, symlink, or directory tree.
///
/// Files and symlinks are unlinked (or securely wiped when configured);
/// directories go recursively. Returns whether the path is gone afterwards
/// (always true under dry-run). A path that never existed reports `false`:
/// there was nothing this call removed.
#[must_use]
pub fn remove(path: &Path, opts: &RemoveOptions) -> bool {
    let Ok(meta) = path.symlink_metadata() else {
        return false;
    };
    let file_type = meta.file_type();

    if file_type.is_file() || file_type.is_symlink() {
        remove_file(path, opts)
    } else {
        remove_tree(path, opts)
    }
}

fn remove_file(path: &Path, opts: &RemoveOptions) -> bool {
    if opts.secure {
        if !secure_wipe(path, opts.dry_run) {
            warn!("Could not securely remove '{}'", path.display());
            if opts.sudo {
                let _ = run_command("sudo srm -f {}", path, opts.dry_run);
            }
        }
    } else {
        debug!("Removing file '{}'", path.display());
        if !opts.dry_run
            && let Err(err) = fs::remove_file(path)
        {
            if opts.sudo {
                let _ = run_command("sudo /bin/rm -f {}", path, opts.dry_run);
            } else {
                error!("Could not remove file '{}': {err}", path.display());
            }
        }
    }

    let gone = opts.dry_run || path.symlink_metadata().is_err();
    if !gone {
        error!("Could not remove file: {}", path.display());
    }
    gone
}

fn remove_tree(path: &Path, opts: &RemoveOptions) -> bool {
    debug!("Removing directory tree '{}'", path.display());
    if !opts.dry_run
        && let Err(err) = fs::remove_dir_all(path)
    {
        if opts.sudo {
            let _ = run_command("sudo /bin/rm -fr {}", path, opts.dry_run);
        } else {
            error!("Could not remove directory '{}': {err}", path.display());
        }
    }

    let gone = opts.dry_run || path.symlink_metadata().is_err();
    if !gone {
        error!("Could not remove dir: {}", path.display());
    }
    gone
}

fn secure_wipe(path: &Path, dry_run: bool) -> bool {
    let Ok(srm) = which::which("srm") else {
        error!("Secure removal requested but no 'srm' in PATH");
        return false;
    };
    debug!("Wiping '{}' via {}", path.display(), srm.display());
    if dry_run {
        return true;
    }
    std::process::Command::new(srm)
        .arg("-f")
        .arg(path)
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Relocates a path into the user's trash directory, renaming `name` to
/// `name-1`, `name-2`, … until the target is free. Symlinks are deleted
/// outright rather than preserved. Returns whether the path left its
/// original location (always true under dry-run).
#[must_use]
pub fn trash(path: &Path, opts: &RemoveOptions) -> bool {
    let Ok(meta) = path.symlink_metadata() else {
        return false;
    };
    if meta.file_type().is_symlink() {
        return remove(path, opts);
    }

    let Some(home) = dirs::home_dir() else {
        error!("Could not locate a home directory for the trash");
        return false;
    };
    let trash_dir = home.join(".Trash");

    let base = path
        .file_name()
        .map_or_else(|| "trashed".to_string(), |n| n.to_string_lossy().into_owned());
    let mut target = trash_dir.join(&base);
    let mut index = 1;
    while target.symlink_metadata().is_ok() {
        target = trash_dir.join(format!("{base}-{index}"));
        index += 1;
    }

    debug!("Renaming '{}' -> '{}'", path.display(), target.display());
    if !opts.dry_run
        && let Err(err) = fs::rename(path, &target)
    {
        if opts.sudo {
            let template = format!(
                "sudo /bin/mv {{}} {}",
                shell_words::quote(&target.to_string_lossy())
            );
            let _ = run_command(&template, path, opts.dry_run);
        } else {
            error!("Could not trash '{}': {err}", path.display());
        }
    }

    let gone = opts.dry_run || path.symlink_metadata().is_err();
    if !gone {
        error!("Could not trash file: {}", path.display());
    }
    gone
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const LIVE: RemoveOptions = RemoveOptions {
        dry_run: false,
        sudo: false,
        secure: false,
    };

    const DRY: RemoveOptions = RemoveOptions {
        dry_run: true,
        sudo: false,
        secure: false,
    };

    #[test]
    fn test_remove_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("victim");
        fs::write(&file, b"bytes").unwrap();

        assert!(remove(&file, &LIVE));
        assert!(!file.exists());
    }

    #[test]
    fn test_remove_directory_tree() {
        let dir = tempdir().unwrap();
        let tree = dir.path().join("tree");
        fs::create_dir_all(tree.join("nested")).unwrap();
        fs::write(tree.join("nested/file"), b"bytes").unwrap();

        assert!(remove(&tree, &LIVE));
        assert!(!tree.exists());
    }

    #[test]
    fn test_remove_symlink_not_its_target() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target");
        let link = dir.path().join("link");
        fs::write(&target, b"bytes").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        assert!(remove(&link, &LIVE));
        assert!(!link.symlink_metadata().is_ok());
        assert!(target.exists());
    }

    #[test]
    fn test_dry_run_removes_nothing() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("survivor");
        fs::write(&file, b"bytes").unwrap();

        assert!(remove(&file, &DRY));
        assert!(file.exists());
    }

    #[test]
    fn test_remove_nonexistent_reports_false() {
        assert!(!remove(Path::new("/nonexistent/path"), &LIVE));
    }

    #[test]
    fn test_trash_deletes_symlinks_outright() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target");
        let link = dir.path().join("link");
        fs::write(&target, b"bytes").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        assert!(trash(&link, &LIVE));
        assert!(link.symlink_metadata().is_err());
        assert!(target.exists());
    }

    #[test]
    fn test_trash_dry_run_moves_nothing() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("kept");
        fs::write(&file, b"bytes").unwrap();

        assert!(trash(&file, &DRY));
        assert!(file.exists());
    }
}
