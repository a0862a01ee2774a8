use super::CommandContext;
use crate::prompt::Prompter;
use crate::report::Report;
use crate::restore_engine::{restore_by_query, RestoreOptions};
use crate::trash::OverwritePolicy;

#[derive(Debug, Clone)]
pub struct RestoreArgs {
    pub pattern: Option<String>,
    pub list_only: bool,
    pub all: bool,
    pub max: Option<usize>,
    pub overwrite: OverwritePolicy,
}

/// Thin wrapper over the restore engine; a bad pattern bubbles up as a usage
/// error for the dispatcher.
pub fn run_restore(
    ctx: &CommandContext,
    args: &RestoreArgs,
    prompter: &mut dyn Prompter,
    report: &mut Report,
) -> Result<(), String> {
    restore_by_query(
        args.pattern.as_deref(),
        RestoreOptions {
            policy: args.overwrite,
            all: args.all,
            max: args.max,
            list_only: args.list_only,
        },
        &ctx.backend,
        prompter,
        report,
    )
}
