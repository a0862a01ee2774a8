use std::ffi::OsString;
use std::path::Path;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::trash::OverwritePolicy;

/// Safe deletion for the command line: deletes go to the native recycle
/// facility, copies never clobber silently, everything can be restored.
#[derive(Debug, Parser)]
#[command(name = "delguard", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Show inner OS errors with every failure.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print the final summary line.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Move targets into the recycle facility instead of destroying them.
    #[command(visible_alias = "del", visible_alias = "rm")]
    Delete(DeleteCli),

    /// Copy files; an existing destination is recycled first, never lost.
    #[command(visible_alias = "cp")]
    Copy(CopyCli),

    /// List entries in the recycle facility and put them back.
    Restore(RestoreCli),
}

#[derive(Debug, Args)]
pub struct DeleteCli {
    /// Files, directories, or patterns to delete.
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// Delete directories and their contents.
    #[arg(short, long)]
    pub recursive: bool,

    /// Skip ordinary confirmations (critical targets still confirm).
    #[arg(short, long)]
    pub force: bool,

    /// Confirm every target, even safe ones.
    #[arg(short, long)]
    pub interactive: bool,

    /// Show what would happen without touching anything.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Fuzzy-match targets that do not exist.
    #[arg(long)]
    pub smart_search: bool,

    /// Minimum similarity percentage for fuzzy matches.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u8).range(0..=100))]
    pub similarity: Option<u8>,

    /// Cap on fuzzy candidates offered.
    #[arg(long, value_name = "N")]
    pub max_results: Option<usize>,

    /// Also scan file contents when names do not match.
    #[arg(long)]
    pub search_content: bool,

    /// Also look one directory up for candidates.
    #[arg(long)]
    pub search_parent: bool,
}

#[derive(Debug, Args)]
pub struct CopyCli {
    /// One or more sources followed by the destination.
    #[arg(required = true, num_args = 2.., value_name = "PATH")]
    pub paths: Vec<String>,

    /// Copy directory trees.
    #[arg(short, long)]
    pub recursive: bool,

    /// Carry mode bits and timestamps over to the copy.
    #[arg(short, long)]
    pub preserve: bool,

    /// Fail instead of replacing an existing destination.
    #[arg(long)]
    pub no_clobber: bool,

    /// Skip sources older than their destination.
    #[arg(short, long)]
    pub update: bool,

    /// Skip overwrite confirmations.
    #[arg(short, long)]
    pub force: bool,

    /// Re-read the destination after copying and verify it matches.
    #[arg(long)]
    pub verify_integrity: bool,
}

#[derive(Debug, Args)]
pub struct RestoreCli {
    /// Glob matched against the original file names.
    pub pattern: Option<String>,

    /// Print matching entries without restoring.
    #[arg(long)]
    pub list: bool,

    /// Restore every match without prompting.
    #[arg(long)]
    pub all: bool,

    /// Cap the number of entries considered.
    #[arg(long, value_name = "N")]
    pub max: Option<usize>,

    /// What to do when a file already exists at the original path.
    #[arg(long, value_enum, default_value_t = OverwriteArg::Abort)]
    pub overwrite: OverwriteArg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OverwriteArg {
    Abort,
    Rename,
    Replace,
}

impl From<OverwriteArg> for OverwritePolicy {
    fn from(value: OverwriteArg) -> Self {
        match value {
            OverwriteArg::Abort => OverwritePolicy::Abort,
            OverwriteArg::Rename => OverwritePolicy::Rename,
            OverwriteArg::Replace => OverwritePolicy::Overwrite,
        }
    }
}

/// The installer registers `del`, `rm`, and `cp` as aliases of the one
/// binary; the invocation name selects the subcommand so `rm file` behaves
/// like `delguard delete file`.
pub fn argv_with_alias() -> Vec<OsString> {
    let mut argv: Vec<OsString> = std::env::args_os().collect();
    if argv.is_empty() {
        return argv;
    }
    let invoked = Path::new(&argv[0])
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let implied = match invoked.as_str() {
        "del" | "rm" => Some("delete"),
        "cp" => Some("copy"),
        _ => None,
    };
    if let Some(subcommand) = implied {
        argv.insert(1, OsString::from(subcommand));
    }
    argv
}
