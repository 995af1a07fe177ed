use thiserror::Error;

/// Errors raised by the [`crate::AecMobile`] handle API.
///
/// One variant per row of `spec.md` §7's taxonomy. `code` returns the
/// matching WebRTC-era `12xxx` constant from spec §6, kept around for
/// callers that need wire/FFI-style compatibility even though the typed
/// enum, not the integer, is the source of truth here.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("AecMobile must be initialized with `init` before use")]
    Uninitialized,
    #[error("a required buffer argument was absent")]
    NullPointer,
    #[error("bad parameter: {reason}")]
    BadParameter { reason: String },
    #[error("operation unsupported")]
    Unsupported,
    #[error("unspecified internal error: {reason}")]
    Unspecified { reason: String },
}

impl Error {
    /// The WebRTC-era integer error code this variant corresponds to.
    pub fn code(&self) -> i32 {
        match self {
            Error::Unspecified { .. } => 12000,
            Error::Unsupported => 12001,
            Error::Uninitialized => 12002,
            Error::NullPointer => 12003,
            Error::BadParameter { .. } => 12004,
        }
    }
}

/// A successful [`crate::AecMobile::process`] call either ran cleanly or
/// had to clamp the caller's reported sound-card latency into range
/// (`AECM_BAD_PARAMETER_WARNING`); either way processing completed and
/// `output` is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Ok,
    ClampedLatency,
}

/// The WebRTC-era warning code for a clamped latency hint.
pub const BAD_PARAMETER_WARNING: i32 = 12100;
