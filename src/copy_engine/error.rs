use std::fmt;

use crate::errors::domain::{classify_io_error, DomainError, ErrorCode, IoErrorHint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyErrorCode {
    SourceMissing,
    DestinationExists,
    IsDirectory,
    PermissionDenied,
    VictimRelocationFailed,
    IntegrityFailed,
    Io,
}

impl ErrorCode for CopyErrorCode {
    fn as_code_str(self) -> &'static str {
        match self {
            Self::SourceMissing => "source_missing",
            Self::DestinationExists => "destination_exists",
            Self::IsDirectory => "is_directory",
            Self::PermissionDenied => "permission_denied",
            Self::VictimRelocationFailed => "victim_relocation_failed",
            Self::IntegrityFailed => "integrity_failed",
            Self::Io => "io_error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CopyError {
    code: CopyErrorCode,
    message: String,
}

impl CopyError {
    pub fn new(code: CopyErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn from_io_error(context: &str, error: std::io::Error) -> Self {
        let code = match classify_io_error(&error) {
            IoErrorHint::NotFound => CopyErrorCode::SourceMissing,
            IoErrorHint::PermissionDenied => CopyErrorCode::PermissionDenied,
            IoErrorHint::AlreadyExists => CopyErrorCode::DestinationExists,
            _ => CopyErrorCode::Io,
        };
        Self::new(code, format!("{context}: {error}"))
    }

    pub fn code(&self) -> CopyErrorCode {
        self.code
    }
}

impl fmt::Display for CopyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CopyError {}

impl DomainError for CopyError {
    fn code_str(&self) -> &'static str {
        self.code.as_code_str()
    }

    fn message(&self) -> &str {
        &self.message
    }
}

pub type CopyResult<T> = Result<T, CopyError>;
