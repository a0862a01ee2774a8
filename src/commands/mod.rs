use std::path::PathBuf;

use crate::config::Config;
use crate::trash::{PlatformTrash, TrashBackend};

pub mod copy;
pub mod delete;
pub mod restore;

pub use copy::run_copy;
pub use delete::run_delete;
pub use restore::run_restore;

/// Everything a command needs, assembled once at startup.
pub struct CommandContext {
    pub cfg: Config,
    pub backend: PlatformTrash,
    /// Working directory all relative targets resolve against.
    pub base: PathBuf,
    pub home: Option<PathBuf>,
    pub elevated: bool,
}

impl CommandContext {
    pub fn facility_roots(&self) -> Vec<PathBuf> {
        self.backend.facility_roots()
    }
}
