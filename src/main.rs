use clap::{CommandFactory, Parser};
use clap_complete::{Generator, generate};
use dirsweep::actions::{self, RemoveOptions};
use dirsweep::cli::Cli;
use dirsweep::config::{self, ScanOptions};
use dirsweep::events::{Event, EventHandlers, Handler};
use dirsweep::output::print_error;
use dirsweep::scanner::Scanner;
use std::io;
use std::process;

fn main() {
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        print_completions(shell, &mut Cli::command());
        return;
    }

    init_logging(cli.verbose, cli.status);

    if let Err(e) = run(cli) {
        print_error(&format!("{e:#}"));
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let opts = build_options(&cli)?;
    let handlers = build_handlers(&cli, &opts);
    let mut scanner = Scanner::new(opts, handlers);
    scanner.run()
}

fn build_options(cli: &Cli) -> anyhow::Result<ScanOptions> {
    let mut opts = ScanOptions::new(cli.directory.clone());
    opts.database = cli.database.clone().into();
    opts.depth = cli.depth;
    opts.days = cli.days;
    opts.ages_only = cli.ages;
    opts.use_atime = cli.atime;
    opts.use_mtime = cli.mtime;
    opts.cache_attrs = cli.cache_attrs;
    opts.check = cli.check;
    opts.use_checksum = cli.checksum;
    opts.use_checksum_always = cli.checksum_always;
    opts.check_window = cli.check_window;
    opts.minimal_scan = cli.minimal_scan;
    opts.prune_dirs = cli.prune_dirs;
    opts.secure = cli.secure;
    opts.sort = cli.sort;
    opts.sudo = cli.sudo;
    opts.staging_dir = cli.temp_dir.as_deref().map(Into::into);
    opts.dry_run = cli.dryrun;
    if !cli.ignore.is_empty() {
        opts.ignore = config::compile_patterns(&cli.ignore)?;
    }

    opts.validate()?;

    if let Some(size) = &cli.max_size {
        opts.max_size = Some(config::parse_max_size(size, &opts.directory)?);
    }

    Ok(opts)
}

fn build_handlers(cli: &Cli, opts: &ScanOptions) -> EventHandlers {
    let mut handlers = EventHandlers::default();
    handlers.added = cli.on_added.clone().map(Handler::Command);
    handlers.changed = cli.on_changed.clone().map(Handler::Command);
    handlers.removed = cli.on_removed.clone().map(Handler::Command);
    handlers.past_limit = match &cli.on_past_limit {
        Some(template) => Some(Handler::Command(template.clone())),
        // Entries past the limit are deleted unless told otherwise; ages
        // mode reports without touching anything.
        None if !cli.ages => {
            let remove_opts = RemoveOptions::from_scan(opts);
            Some(Handler::Inline(Box::new(move |event| {
                if let Event::PastLimit(entry, _) = event {
                    let _ = actions::remove(&entry.path, &remove_opts);
                }
                true
            })))
        }
        None => None,
    };
    handlers
}

fn init_logging(verbose: bool, status: bool) {
    let default = if verbose {
        "dirsweep=debug"
    } else if status {
        "dirsweep=info"
    } else {
        "dirsweep=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

fn print_completions<G: Generator>(g: G, cmd: &mut clap::Command) {
    generate(g, cmd, cmd.get_name().to_string(), &mut io::stdout());
}
