use std::fmt;

use crate::errors::domain::{classify_io_error, DomainError, ErrorCode, IoErrorHint};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrashErrorCode {
    SourceMissing,
    PermissionDenied,
    CrossDeviceFallbackFailed,
    MetadataWriteFailed,
    FacilityUnavailable,
    EntryOrphaned,
    TargetExists,
    OriginalParentMissing,
    InsideFacility,
    Cancelled,
    InUse,
    Io,
}

impl ErrorCode for TrashErrorCode {
    fn as_code_str(self) -> &'static str {
        match self {
            Self::SourceMissing => "source_missing",
            Self::PermissionDenied => "permission_denied",
            Self::CrossDeviceFallbackFailed => "cross_device_fallback_failed",
            Self::MetadataWriteFailed => "metadata_write_failed",
            Self::FacilityUnavailable => "facility_unavailable",
            Self::EntryOrphaned => "entry_orphaned",
            Self::TargetExists => "target_exists",
            Self::OriginalParentMissing => "original_parent_missing",
            Self::InsideFacility => "inside_facility",
            Self::Cancelled => "cancelled",
            Self::InUse => "in_use",
            Self::Io => "io_error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrashError {
    code: TrashErrorCode,
    message: String,
    /// For metadata-write failures: whether the data move was rolled back so
    /// the original target is untouched.
    rolled_back: bool,
}

impl TrashError {
    pub fn new(code: TrashErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            rolled_back: false,
        }
    }

    pub fn metadata_write_failed(inner: impl fmt::Display, rolled_back: bool) -> Self {
        Self {
            code: TrashErrorCode::MetadataWriteFailed,
            message: format!("failed to write trash metadata: {inner}"),
            rolled_back,
        }
    }

    pub fn cross_device_failed(inner: impl fmt::Display) -> Self {
        Self::new(
            TrashErrorCode::CrossDeviceFallbackFailed,
            format!("cross-volume fallback failed: {inner}"),
        )
    }

    pub fn facility_unavailable(reason: impl fmt::Display) -> Self {
        Self::new(
            TrashErrorCode::FacilityUnavailable,
            format!("recycle facility is unavailable: {reason}"),
        )
    }

    pub fn from_io_error(context: &str, error: std::io::Error) -> Self {
        let code = match classify_io_error(&error) {
            IoErrorHint::NotFound => TrashErrorCode::SourceMissing,
            IoErrorHint::PermissionDenied => TrashErrorCode::PermissionDenied,
            IoErrorHint::CrossDevice => TrashErrorCode::CrossDeviceFallbackFailed,
            IoErrorHint::ResourceBusy => TrashErrorCode::InUse,
            _ => TrashErrorCode::Io,
        };
        Self::new(code, format!("{context}: {error}"))
    }

    pub fn code(&self) -> TrashErrorCode {
        self.code
    }

    pub fn rolled_back(&self) -> bool {
        self.rolled_back
    }
}

impl fmt::Display for TrashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TrashError {}

impl DomainError for TrashError {
    fn code_str(&self) -> &'static str {
        self.code.as_code_str()
    }

    fn message(&self) -> &str {
        &self.message
    }
}

pub type TrashResult<T> = Result<T, TrashError>;
