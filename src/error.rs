//! Crate-wide error taxonomy.
//!
//! Mirrors the single negative-integer, domain-prefixed convention of the
//! original driver (`UTIL_ERR_*`, `NIX_ERR_*`, `NPA_ERR_*`, ...) as a typed
//! enum instead of raw `int`s.

use thiserror::Error;

pub type RocResult<T> = Result<T, RocError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RocError {
    #[error("mailbox: no space for request (msg {msg_id})")]
    MboxNoSpace { msg_id: u16 },

    #[error("mailbox: invalid response for request {msg_id}")]
    MboxIo { msg_id: u16 },

    #[error("bad argument: {0}")]
    Param(&'static str),

    #[error("feature not supported on this silicon revision: {0}")]
    NotSupported(&'static str),

    #[error("resource exhausted: {0}")]
    NoSpace(&'static str),

    #[error("out of memory")]
    NoMem,

    #[error("operation timed out: {0}")]
    TimedOut(&'static str),

    #[error("index {idx} out of range (max {max})")]
    IndexTooLarge { idx: u32, max: u32 },

    #[error("word offset {word_off} out of range (max {max})")]
    WordOffTooLarge { word_off: u32, max: u32 },

    #[error("field {field:?} unsupported at version {version}")]
    UnsupportedField { field: &'static str, version: u32 },

    #[error("admin function reported error code {0}")]
    AdminFunction(i32),

    #[error("device/model not found or unsupported")]
    DeviceNotFound,

    #[error("{0}")]
    Other(&'static str),
}

impl RocError {
    /// Admin-function error codes that are safe to retry (e.g. TIM LF start
    /// sync races). Mirrors `spec.md` §6's retry policy for
    /// `LF_START_SYNC_FAIL`.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RocError::AdminFunction(code) if *code == ADMIN_ERR_LF_START_SYNC_FAIL)
    }
}

/// Admin-function diagnostic code for a timer-LF start/sync race; retried up
/// to [`crate::mailbox::LF_START_SYNC_RETRIES`] times per `spec.md` §6.
pub const ADMIN_ERR_LF_START_SYNC_FAIL: i32 = -512;
