//! Lifecycle events and the handlers that consume them.
//!
//! The scanner reports four things: a path was added, changed, removed, or
//! aged past the configured limit. Each report goes through a [`Handler`],
//! which is either an inline callback or an external command template. The
//! handler's boolean is the *acceptance* of the event: a rejected add leaves
//! the path untracked (it will be offered again next run), a rejected
//! removal keeps the path tracked until some later run accepts it. The
//! past-limit event is the exception: its result is never consulted, and the
//! engine deletes nothing on its own unless the handler does.

use anyhow::{Context, Result, bail};
use std::path::Path;
use std::process::Command;
use tracing::{debug, error, info};

use crate::config::ScanOptions;
use crate::entry::Entry;

/// A lifecycle event, carrying the entry it concerns.
pub enum Event<'a> {
    /// Path observed for the first time.
    Added(&'a Entry),
    /// Tracked path changed; the flag is true when the *content* changed
    /// (as opposed to only the timestamp anchor).
    Changed(&'a Entry, bool),
    /// Tracked path no longer exists on disk.
    Removed(&'a Entry),
    /// Tracked path aged past the ceiling; carries the age in days.
    PastLimit(&'a Entry, f64),
}

impl Event<'_> {
    /// The entry this event concerns.
    #[must_use]
    pub fn entry(&self) -> &Entry {
        match self {
            Self::Added(entry)
            | Self::Changed(entry, _)
            | Self::Removed(entry)
            | Self::PastLimit(entry, _) => entry,
        }
    }

    /// The path this event concerns.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.entry().path
    }

    fn log(&self) {
        match self {
            Self::Added(entry) => info!("A {}", entry.path.display()),
            Self::Changed(entry, contents) => {
                info!("{} {}", if *contents { "M" } else { "T" }, entry.path.display());
            }
            Self::Removed(entry) => info!("R {}", entry.path.display()),
            Self::PastLimit(entry, age) => {
                info!("O {} ({age:.1} days old)", entry.path.display());
            }
        }
    }
}

/// Inline event callback. Returns whether the event is accepted.
pub type Callback = Box<dyn FnMut(&Event<'_>) -> bool + Send>;

/// How a single event slot reacts.
pub enum Handler {
    /// A callback run in-process.
    Inline(Callback),
    /// An external command. `{}` in the template expands to the path; with
    /// no placeholder the path is appended as the final argument. Acceptance
    /// is the command's exit status, with one privilege-escalated retry when
    /// sudo is enabled.
    Command(String),
}

impl Handler {
    fn dispatch(&mut self, event: &Event<'_>, opts: &ScanOptions) -> bool {
        match self {
            Self::Inline(callback) => callback(event),
            Self::Command(template) => safe_run(template, event.path(), opts.sudo, opts.dry_run),
        }
    }
}

/// The four handler slots a scanner dispatches into. Unset slots accept
/// every event.
#[derive(Default)]
pub struct EventHandlers {
    /// Reaction to [`Event::Added`].
    pub added: Option<Handler>,
    /// Reaction to [`Event::Changed`].
    pub changed: Option<Handler>,
    /// Reaction to [`Event::Removed`].
    pub removed: Option<Handler>,
    /// Reaction to [`Event::PastLimit`]. Its result is ignored.
    pub past_limit: Option<Handler>,
}

impl EventHandlers {
    /// Logs and dispatches `event`, returning its acceptance.
    pub fn fire(&mut self, event: &Event<'_>, opts: &ScanOptions) -> bool {
        event.log();
        let slot = match event {
            Event::Added(_) => &mut self.added,
            Event::Changed(..) => &mut self.changed,
            Event::Removed(_) => &mut self.removed,
            Event::PastLimit(..) => &mut self.past_limit,
        };
        let accepted = match slot {
            Some(handler) => handler.dispatch(event, opts),
            None => true,
        };
        // Past-limit acceptance is implicit; the handler's answer is not
        // part of the contract.
        matches!(event, Event::PastLimit(..)) || accepted
    }
}

/// Executes a command template against a path.
///
/// The template is split shell-style; `{}` inside any word is replaced with
/// the path, and a template without a placeholder gets the path appended.
/// No shell is involved, so paths with spaces need no quoting.
///
/// # Errors
///
/// Returns an error if the template cannot be parsed or the command cannot
/// be spawned. A command that runs and fails is `Ok(false)`.
pub(crate) fn run_command(template: &str, path: &Path, dry_run: bool) -> Result<bool> {
    let mut words = shell_words::split(template)
        .with_context(|| format!("Unparseable command template '{template}'"))?;
    if words.is_empty() {
        bail!("Empty command template");
    }

    let path_text = path.to_string_lossy();
    let mut substituted = false;
    for word in &mut words {
        if word.contains("{}") {
            *word = word.replace("{}", &path_text);
            substituted = true;
        }
    }
    if !substituted {
        words.push(path_text.into_owned());
    }

    debug!("Executing: {}", shell_words::join(&words));

    if dry_run {
        return Ok(true);
    }

    let status = Command::new(&words[0])
        .args(&words[1..])
        .status()
        .with_context(|| format!("Failed to spawn '{}'", words[0]))?;
    Ok(status.success())
}

/// [`run_command`] with failure tolerance: logs failures and, when enabled,
/// retries the same template under sudo. Returns overall success.
pub(crate) fn safe_run(template: &str, path: &Path, sudo: bool, dry_run: bool) -> bool {
    match run_command(template, path, dry_run) {
        Ok(true) => return true,
        Ok(false) => {
            error!("Command failed: '{template}' with '{}'", path.display());
        }
        Err(err) => {
            error!("Command error: '{template}' with '{}': {err}", path.display());
        }
    }

    if sudo {
        let escalated = format!("sudo {template}");
        match run_command(&escalated, path, dry_run) {
            Ok(true) => return true,
            _ => error!("Command failed: '{escalated}' with '{}'", path.display()),
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_run_command_placeholder_substitution() -> Result<()> {
        let path = Path::new("/tmp/some file");
        // `test -n` exits zero for a non-empty argument.
        assert!(run_command("test -n {}", path, false)?);
        Ok(())
    }

    #[test]
    fn test_run_command_appends_path_without_placeholder() -> Result<()> {
        assert!(run_command("test -e", Path::new("/"), false)?);
        Ok(())
    }

    #[test]
    fn test_run_command_failure_is_ok_false() -> Result<()> {
        assert!(!run_command("test -f", Path::new("/nonexistent"), false)?);
        Ok(())
    }

    #[test]
    fn test_run_command_dry_run_succeeds_without_executing() -> Result<()> {
        // A command that would fail reports success under dry-run.
        assert!(run_command("test -f", Path::new("/nonexistent"), true)?);
        Ok(())
    }

    #[test]
    fn test_safe_run_without_sudo_reports_failure() {
        assert!(!safe_run("test -f", Path::new("/nonexistent"), false, false));
    }

    #[test]
    fn test_unset_handler_accepts() {
        let entry = Entry::new(PathBuf::from("/tmp/x"));
        let mut handlers = EventHandlers::default();
        let opts = ScanOptions::default();

        assert!(handlers.fire(&Event::Added(&entry), &opts));
        assert!(handlers.fire(&Event::Removed(&entry), &opts));
    }

    #[test]
    fn test_inline_handler_controls_acceptance() {
        let entry = Entry::new(PathBuf::from("/tmp/x"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);

        let mut handlers = EventHandlers::default();
        handlers.added = Some(Handler::Inline(Box::new(move |event| {
            log.lock().unwrap().push(event.path().to_path_buf());
            false
        })));
        let opts = ScanOptions::default();

        assert!(!handlers.fire(&Event::Added(&entry), &opts));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_past_limit_result_is_ignored() {
        let entry = Entry::new(PathBuf::from("/tmp/x"));
        let mut handlers = EventHandlers::default();
        handlers.past_limit = Some(Handler::Inline(Box::new(|_| false)));
        let opts = ScanOptions::default();

        assert!(handlers.fire(&Event::PastLimit(&entry, 9.0), &opts));
    }
}
