use crate::Error;

/// Input sample rate: narrowband (8 kHz, 80-sample/10 ms frames) or
/// wideband (16 kHz, 160-sample/10 ms frames, `mult = 2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRate {
    Narrowband8k,
    Wideband16k,
}

impl SampleRate {
    pub(crate) fn hz(self) -> u32 {
        match self {
            SampleRate::Narrowband8k => 8000,
            SampleRate::Wideband16k => 16000,
        }
    }

    /// Partitions per 10 ms frame: 1 at 8 kHz, 2 at 16 kHz.
    pub(crate) fn mult(self) -> i32 {
        match self {
            SampleRate::Narrowband8k => 1,
            SampleRate::Wideband16k => 2,
        }
    }
}

impl TryFrom<u32> for SampleRate {
    type Error = Error;

    /// Fallible conversion for callers that only have a raw rate (e.g.
    /// from a config file or FFI boundary); `init` itself takes the typed
    /// enum directly so the `BAD_PARAMETER_ERROR` path for unsupported
    /// rates is enforced by the type system wherever possible.
    fn try_from(hz: u32) -> Result<Self, Error> {
        match hz {
            8000 => Ok(SampleRate::Narrowband8k),
            16000 => Ok(SampleRate::Wideband16k),
            other => Err(Error::BadParameter { reason: format!("unsupported sample rate {other}") }),
        }
    }
}

pub use aecm_core::EchoMode;

/// Runtime-tunable settings, applied with [`crate::AecMobile::set_config`].
///
/// Defaults match `WebRtcAecm_Init`'s documented defaults: comfort noise
/// on, `echoMode = 3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub cng_mode: bool,
    pub echo_mode: EchoMode,
}

impl Default for Config {
    fn default() -> Self {
        Self { cng_mode: true, echo_mode: EchoMode::MidHigh }
    }
}
