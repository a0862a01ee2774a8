use std::fmt;

use crate::errors::domain::{classify_io_error, DomainError, ErrorCode, IoErrorHint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathErrorCode {
    EmbeddedNul,
    TraversalRejected,
    IllegalCharacter,
    ReservedName,
    TooLong,
    NotFound,
    PermissionDenied,
    MetadataReadFailed,
}

impl ErrorCode for PathErrorCode {
    fn as_code_str(self) -> &'static str {
        match self {
            Self::EmbeddedNul => "embedded_nul",
            Self::TraversalRejected => "traversal_rejected",
            Self::IllegalCharacter => "illegal_character",
            Self::ReservedName => "reserved_name",
            Self::TooLong => "too_long",
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::MetadataReadFailed => "metadata_read_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PathError {
    code: PathErrorCode,
    message: String,
}

impl PathError {
    pub fn new(code: PathErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn embedded_nul(raw: &str) -> Self {
        Self::new(
            PathErrorCode::EmbeddedNul,
            format!("path contains an embedded NUL byte: {raw:?}"),
        )
    }

    pub fn traversal(raw: &str) -> Self {
        Self::new(
            PathErrorCode::TraversalRejected,
            format!("path escapes its base directory: {raw}"),
        )
    }

    #[cfg(windows)]
    pub fn illegal_character(ch: char) -> Self {
        Self::new(
            PathErrorCode::IllegalCharacter,
            format!("path contains an illegal character: {ch:?}"),
        )
    }

    #[cfg(windows)]
    pub fn reserved_name(name: &str) -> Self {
        Self::new(
            PathErrorCode::ReservedName,
            format!("path uses a reserved device name: {name}"),
        )
    }

    pub fn too_long(len: usize, max: usize) -> Self {
        Self::new(
            PathErrorCode::TooLong,
            format!("path length {len} exceeds the platform maximum of {max}"),
        )
    }

    pub fn from_io_error(context: &str, error: std::io::Error) -> Self {
        let code = match classify_io_error(&error) {
            IoErrorHint::NotFound => PathErrorCode::NotFound,
            IoErrorHint::PermissionDenied => PathErrorCode::PermissionDenied,
            _ => PathErrorCode::MetadataReadFailed,
        };
        Self::new(code, format!("{context}: {error}"))
    }

    pub fn code(&self) -> PathErrorCode {
        self.code
    }
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for PathError {}

impl DomainError for PathError {
    fn code_str(&self) -> &'static str {
        self.code.as_code_str()
    }

    fn message(&self) -> &str {
        &self.message
    }
}

pub type PathResult<T> = Result<T, PathError>;
