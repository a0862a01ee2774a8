pub mod domain;

pub use domain::{classify_io_error, is_cross_device, DomainError, ErrorCode, IoErrorHint};
