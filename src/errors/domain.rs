use std::io::ErrorKind;

pub trait ErrorCode {
    #[allow(clippy::wrong_self_convention)]
    fn as_code_str(self) -> &'static str;
}

pub trait DomainError: std::error::Error {
    fn code_str(&self) -> &'static str;
    fn message(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoErrorHint {
    NotFound,
    PermissionDenied,
    AlreadyExists,
    InvalidInput,
    ReadOnlyFilesystem,
    CrossDevice,
    ResourceBusy,
    Other,
}

pub fn classify_io_error(error: &std::io::Error) -> IoErrorHint {
    let from_kind = match error.kind() {
        ErrorKind::NotFound => IoErrorHint::NotFound,
        ErrorKind::PermissionDenied => IoErrorHint::PermissionDenied,
        ErrorKind::AlreadyExists => IoErrorHint::AlreadyExists,
        ErrorKind::InvalidInput => IoErrorHint::InvalidInput,
        _ => IoErrorHint::Other,
    };
    if from_kind != IoErrorHint::Other {
        return from_kind;
    }
    error
        .raw_os_error()
        .map(classify_raw_os_error)
        .unwrap_or(IoErrorHint::Other)
}

pub fn classify_raw_os_error(raw: i32) -> IoErrorHint {
    #[cfg(windows)]
    {
        return match raw {
            5 => IoErrorHint::PermissionDenied,     // ERROR_ACCESS_DENIED
            2 | 3 => IoErrorHint::NotFound,         // ERROR_FILE_NOT_FOUND | ERROR_PATH_NOT_FOUND
            80 | 183 => IoErrorHint::AlreadyExists, // ERROR_FILE_EXISTS | ERROR_ALREADY_EXISTS
            17 => IoErrorHint::CrossDevice,         // ERROR_NOT_SAME_DEVICE
            19 => IoErrorHint::ReadOnlyFilesystem,  // ERROR_WRITE_PROTECT
            32 | 33 => IoErrorHint::ResourceBusy,   // ERROR_SHARING_VIOLATION | ERROR_LOCK_VIOLATION
            87 => IoErrorHint::InvalidInput,        // ERROR_INVALID_PARAMETER
            _ => IoErrorHint::Other,
        };
    }

    #[cfg(unix)]
    {
        return match raw {
            1 | 13 => IoErrorHint::PermissionDenied, // EPERM | EACCES
            2 => IoErrorHint::NotFound,              // ENOENT
            16 | 26 => IoErrorHint::ResourceBusy,    // EBUSY | ETXTBSY
            17 => IoErrorHint::AlreadyExists,        // EEXIST
            18 => IoErrorHint::CrossDevice,          // EXDEV
            22 => IoErrorHint::InvalidInput,         // EINVAL
            30 => IoErrorHint::ReadOnlyFilesystem,   // EROFS
            _ => IoErrorHint::Other,
        };
    }

    #[allow(unreachable_code)]
    IoErrorHint::Other
}

pub fn is_cross_device(error: &std::io::Error) -> bool {
    classify_io_error(error) == IoErrorHint::CrossDevice
}
