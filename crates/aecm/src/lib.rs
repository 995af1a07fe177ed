#![doc = include_str!("../README.md")]

mod config;
mod error;
mod mobile;

pub use aecm_core::{MAX_DELAY, PART_LEN, PART_LEN1};
pub use config::{Config, EchoMode, SampleRate};
pub use error::{BAD_PARAMETER_WARNING, Error, ProcessOutcome};
pub use mobile::{AecMobile, FRAME_LEN};
