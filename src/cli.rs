//! Command-line interface definitions.

use clap::Parser;
use clap_complete::Shell;

/// Sweep a directory: track its entries across runs, report additions,
/// changes and removals, and evict what has aged past a limit or pushed the
/// tree over a size budget.
#[derive(Parser, Debug)]
#[command(
    name = "dirsweep",
    version = crate::VERSION,
    about = "Stateful directory sweeper",
    long_about = "Reconciles a directory tree against its last-seen state, fires \
                  added/changed/removed events, and ages entries out once they pass \
                  a day limit or push the tree past a size budget. By default entries \
                  past the limit are deleted; wire --onpastlimit to do something else."
)]
pub struct Cli {
    /// Directory to sweep
    #[arg(short = 'd', long, default_value = "~/.Trash")]
    pub directory: String,

    /// Levels to descend: 0 = the directory's own entries only, -1 = unbounded
    #[arg(short = 'D', long, default_value_t = 0, allow_hyphen_values = true)]
    pub depth: i32,

    /// State file location; a bare name is kept inside the swept directory
    #[arg(short = 'b', long, default_value = crate::STATE_FILE, env = "DIRSWEEP_STATE")]
    pub database: String,

    /// Read directory entries in sorted order, for reproducible runs
    #[arg(short = 'o', long)]
    pub sort: bool,

    /// Show each event line as it happens
    #[arg(short = 'u', long)]
    pub status: bool,

    /// Days an entry may age before the past-limit event fires
    /// (fractional allowed; negative disables)
    #[arg(short = 'w', long, default_value_t = 7.0, allow_hyphen_values = true)]
    pub days: f64,

    /// Retry failed removals and commands under sudo
    #[arg(short = 's', long)]
    pub sudo: bool,

    /// Securely wipe files (srm) instead of deleting them
    #[arg(short = 'S', long)]
    pub secure: bool,

    /// Remove directories as they empty out
    #[arg(short = 'p', long = "prune-dirs")]
    pub prune_dirs: bool,

    /// List entry ages and delete nothing
    #[arg(short = 'A', long)]
    pub ages: bool,

    /// Make no changes to the directory or its state
    #[arg(short = 'n', long)]
    pub dryrun: bool,

    /// Show what is being done (debug logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Keep the directory's total size beneath this (bytes, or N% of the volume)
    #[arg(short = 'M', long = "max-size", value_name = "SIZE")]
    pub max_size: Option<String>,

    /// Skip the walk when the state file is newer than the directory.
    /// Cannot see additions; does not consider subdirectories
    #[arg(short = 'z', long = "minimal-scan")]
    pub minimal_scan: bool,

    /// Age entries by their last-modified time
    #[arg(short = 'm', long)]
    pub mtime: bool,

    /// Age entries by their last-accessed time
    #[arg(short = 'a', long)]
    pub atime: bool,

    /// Reset an entry's age when its modification time changes
    /// (only needed when neither -m nor -a is used)
    #[arg(short = 'R', long)]
    pub check: bool,

    /// Confirm modification-time changes with a content digest
    #[arg(long)]
    pub checksum: bool,

    /// Digest content on every scan regardless of modification times
    #[arg(long = "checksum-always")]
    pub checksum_always: bool,

    /// Re-verify content digests only every N days
    #[arg(long = "check-window", value_name = "DAYS")]
    pub check_window: Option<i64>,

    /// Cache metadata lookups for the duration of a run
    #[arg(short = 'C', long = "cache-attrs")]
    pub cache_attrs: bool,

    /// Glob patterns (matched against entry names) to skip and untrack
    #[arg(short = 'i', long = "ignore", value_name = "PATTERN")]
    pub ignore: Vec<String>,

    /// Stage mid-scan state checkpoints here before copying them into place
    #[arg(short = 'T', long = "temp-dir", value_name = "DIR")]
    pub temp_dir: Option<String>,

    /// Command run when an entry is first seen ({} expands to the path)
    #[arg(long = "onadded", value_name = "CMD")]
    pub on_added: Option<String>,

    /// Command run when an entry changes
    #[arg(long = "onchanged", value_name = "CMD")]
    pub on_changed: Option<String>,

    /// Command run when an entry is past the age limit
    /// (default: delete the entry)
    #[arg(short = 'F', long = "onpastlimit", value_name = "CMD")]
    pub on_past_limit: Option<String>,

    /// Command run after an entry disappears
    #[arg(long = "onremoved", value_name = "CMD")]
    pub on_removed: Option<String>,

    /// Generate shell completions and exit
    #[arg(long, value_enum, value_name = "SHELL")]
    pub completions: Option<Shell>,
}
