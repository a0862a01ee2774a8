mod classify;
mod cli;
mod commands;
mod config;
mod copy_engine;
mod errors;
mod fsops;
mod gate;
mod host;
mod locale;
mod path_norm;
mod prompt;
mod report;
mod resolver;
mod restore_engine;
mod trash;

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use once_cell::sync::OnceCell;

use cli::{Cli, Command};
use commands::{run_copy, run_delete, run_restore, CommandContext};
use commands::copy::CopyArgs;
use commands::delete::DeleteArgs;
use commands::restore::RestoreArgs;
use config::Config;
use prompt::{ConsolePrompter, PromptPolicy};
use report::{Report, Verbosity};

const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024; // 10 MiB

struct LocalTimestamp;

impl tracing_subscriber::fmt::time::FormatTime for LocalTimestamp {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        // Local wall-clock time with timezone offset, e.g. 2026-02-15T14:08:12.345678+01:00
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f%:z")
        )
    }
}

struct SizeLimitedWriter {
    file: std::fs::File,
    path: PathBuf,
    max_bytes: u64,
}

impl SizeLimitedWriter {
    fn new(path: PathBuf, max_bytes: u64) -> std::io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            file,
            path,
            max_bytes,
        })
    }

    fn rotate_if_needed(&mut self) {
        if let Ok(meta) = self.file.metadata() {
            if meta.len() < self.max_bytes {
                return;
            }
        }
        let _ = self.file.flush();
        let rotated = self.path.with_extension("log.1");
        let _ = std::fs::remove_file(&rotated);
        let _ = std::fs::rename(&self.path, &rotated);
        if let Ok(new_file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        {
            self.file = new_file;
        }
    }
}

impl std::io::Write for SizeLimitedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.rotate_if_needed();
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

fn init_logging(cfg: &Config) {
    static GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
    let base = dirs_next::data_dir().unwrap_or_else(std::env::temp_dir);
    let log_dir = base.join("delguard").join("logs");
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("failed to create log dir {log_dir:?}: {e}");
        return;
    }
    let writer = match SizeLimitedWriter::new(log_dir.join("delguard.log"), MAX_LOG_BYTES) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("failed to open log file: {e}");
            return;
        }
    };
    let (non_blocking, guard) =
        tracing_appender::non_blocking::NonBlockingBuilder::default().finish(writer);
    let _ = GUARD.set(guard);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cfg.log_level.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_timer(LocalTimestamp)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(non_blocking);
    if let Err(e) = subscriber.try_init() {
        eprintln!("failed to init tracing subscriber: {e}");
    }
}

fn main() {
    let cfg = Config::from_env();
    init_logging(&cfg);
    locale::init(&cfg.lang);
    if let Ok(rendered) = serde_json::to_string(&cfg) {
        tracing::debug!(config = %rendered, "effective configuration");
    }

    // Usage and parse errors exit 2 via clap.
    let cli = Cli::parse_from(cli::argv_with_alias());
    let verbosity = if cli.quiet {
        Verbosity::Quiet
    } else if cli.verbose {
        Verbosity::Verbose
    } else {
        Verbosity::Normal
    };

    let interactive = cfg.interactive.unwrap_or_else(host::stdin_is_tty);
    let policy = match &cli.command {
        // --all is an explicit blanket accept for the selection prompt.
        Command::Restore(args) if args.all => PromptPolicy::AlwaysYes,
        _ if interactive => PromptPolicy::Interactive,
        _ => PromptPolicy::AlwaysNo,
    };
    let mut prompter =
        ConsolePrompter::new(policy, cfg.prompt_timeout, cfg.strong_prompt_timeout);

    let base = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let ctx = CommandContext {
        backend: trash::platform_backend(&cfg),
        cfg,
        base,
        home: dirs_next::home_dir(),
        elevated: host::is_elevated(),
    };
    let mut report = Report::new(verbosity);

    match cli.command {
        Command::Delete(args) => {
            let delete_args = DeleteArgs {
                targets: args.targets,
                recursive: args.recursive,
                force: args.force,
                interactive: args.interactive,
                dry_run: args.dry_run,
                smart_search: args.smart_search,
                similarity: args.similarity,
                max_results: args.max_results,
                search_content: args.search_content,
                search_parent: args.search_parent,
            };
            run_delete(&ctx, &delete_args, &mut prompter, &mut report);
        }
        Command::Copy(args) => {
            let mut paths = args.paths;
            let destination = paths.pop().unwrap_or_default();
            let copy_args = CopyArgs {
                sources: paths,
                destination,
                recursive: args.recursive,
                preserve_attrs: args.preserve,
                no_clobber: args.no_clobber,
                update_only: args.update,
                force: args.force,
                verify: args.verify_integrity.then_some(true),
            };
            run_copy(&ctx, &copy_args, &mut prompter, &mut report);
        }
        Command::Restore(args) => {
            let restore_args = RestoreArgs {
                pattern: args.pattern,
                list_only: args.list,
                all: args.all,
                max: args.max,
                overwrite: args.overwrite.into(),
            };
            if let Err(usage) = run_restore(&ctx, &restore_args, &mut prompter, &mut report) {
                eprintln!("{usage}");
                std::process::exit(2);
            }
        }
    }

    report.print();
    std::process::exit(report.exit_code());
}
