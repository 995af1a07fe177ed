#![doc = include_str!("../README.md")]

mod binary;
mod far_end;
mod spectrum;

pub use binary::BinaryDelayEstimator;
pub use far_end::BinaryFarend;

use thiserror::Error;

/// Errors raised by the spectrum-thresholding wrapper layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("spectrum size {spectrum_size} is too small to cover bin {}..={}", spectrum::BAND_FIRST, spectrum::BAND_LAST)]
    SpectrumTooSmall { spectrum_size: usize },
    #[error("spectrum length did not match the size this estimator was built for")]
    SpectrumSizeMismatch,
    #[error("q_domain must be less than 16")]
    QDomainTooLarge,
    #[error("lookahead out of range for the buffered near-end history")]
    LookaheadOutOfRange,
    #[error("allowed_offset must be non-negative")]
    NegativeAllowedOffset,
}

/// Far-end side of the spectrum-thresholding wrapper: turns a magnitude
/// spectrum into a binary fingerprint and feeds it to a [`BinaryFarend`].
///
/// Grounded on `DelayEstimatorFarend` and `WebRtc_*DelayEstimatorFarend` /
/// `WebRtc_AddFarSpectrumFix`.
#[derive(Debug, Clone)]
pub struct DelayEstimatorFarend {
    spectrum_size: usize,
    mean_far_spectrum: Vec<i32>,
    far_spectrum_initialized: bool,
    binary: BinaryFarend,
}

impl DelayEstimatorFarend {
    /// `spectrum_size` must be large enough to cover the fixed thresholding
    /// band (bins 12 through 43); `history_size` is the number of delay
    /// hypotheses to track and must exceed 1.
    pub fn new(spectrum_size: usize, history_size: usize) -> Result<Self, Error> {
        if spectrum_size < spectrum::BAND_LAST {
            return Err(Error::SpectrumTooSmall { spectrum_size });
        }
        Ok(Self {
            spectrum_size,
            mean_far_spectrum: vec![0; spectrum_size],
            far_spectrum_initialized: false,
            binary: BinaryFarend::new(history_size),
        })
    }

    pub fn init(&mut self) {
        self.binary.init();
        self.mean_far_spectrum.fill(0);
        self.far_spectrum_initialized = false;
    }

    pub fn soft_reset(&mut self, delay_shift: i32) {
        self.binary.soft_reset(delay_shift);
    }

    pub(crate) fn binary(&self) -> &BinaryFarend {
        &self.binary
    }

    /// Thresholds `far_spectrum` (in Q`far_q`) into a binary fingerprint and
    /// appends it to the history.
    pub fn add_far_spectrum(&mut self, far_spectrum: &[u16], far_q: u32) -> Result<(), Error> {
        if far_spectrum.len() != self.spectrum_size {
            return Err(Error::SpectrumSizeMismatch);
        }
        if far_q > 15 {
            return Err(Error::QDomainTooLarge);
        }
        let binary_spectrum = spectrum::binary_spectrum(
            far_spectrum,
            &mut self.mean_far_spectrum,
            far_q,
            &mut self.far_spectrum_initialized,
        );
        self.binary.add_binary_spectrum(binary_spectrum);
        Ok(())
    }
}

/// Near-end side of the spectrum-thresholding wrapper, pairing a
/// [`BinaryDelayEstimator`] with its own running threshold.
///
/// Grounded on `DelayEstimator` and `WebRtc_*DelayEstimator*` /
/// `WebRtc_DelayEstimatorProcessFix`.
#[derive(Debug, Clone)]
pub struct DelayEstimator {
    spectrum_size: usize,
    mean_near_spectrum: Vec<i32>,
    near_spectrum_initialized: bool,
    binary: BinaryDelayEstimator,
}

impl DelayEstimator {
    /// Builds an estimator matched to `farend`'s spectrum size and history.
    pub fn new(farend: &DelayEstimatorFarend, max_lookahead: usize) -> Self {
        Self {
            spectrum_size: farend.spectrum_size,
            mean_near_spectrum: vec![0; farend.spectrum_size],
            near_spectrum_initialized: false,
            binary: BinaryDelayEstimator::new(farend.binary().history_size(), max_lookahead),
        }
    }

    pub fn init(&mut self) {
        self.binary.init();
        self.mean_near_spectrum.fill(0);
        self.near_spectrum_initialized = false;
    }

    pub fn soft_reset(&mut self, delay_shift: i32) -> i32 {
        self.binary.soft_reset(delay_shift)
    }

    pub fn history_size(&self) -> usize {
        self.binary.history_size()
    }

    pub fn lookahead(&self) -> i32 {
        self.binary.lookahead()
    }

    pub fn set_lookahead(&mut self, lookahead: i32) -> Result<(), Error> {
        self.binary
            .set_lookahead(lookahead)
            .map_err(|()| Error::LookaheadOutOfRange)
    }

    pub fn allowed_offset(&self) -> i32 {
        self.binary.allowed_offset()
    }

    pub fn set_allowed_offset(&mut self, allowed_offset: i32) -> Result<(), Error> {
        self.binary
            .set_allowed_offset(allowed_offset)
            .map_err(|()| Error::NegativeAllowedOffset)
    }

    pub fn enable_robust_validation(&mut self, enable: bool) {
        self.binary.enable_robust_validation(enable);
    }

    pub fn is_robust_validation_enabled(&self) -> bool {
        self.binary.robust_validation_enabled()
    }

    pub fn last_delay(&self) -> i32 {
        self.binary.last_delay()
    }

    pub fn last_delay_quality(&self) -> f32 {
        self.binary.last_delay_quality()
    }

    /// Thresholds `near_spectrum` (in Q`near_q`) and compares it against
    /// `farend`'s history, returning the updated delay estimate.
    pub fn process(
        &mut self,
        farend: &DelayEstimatorFarend,
        near_spectrum: &[u16],
        near_q: u32,
    ) -> Result<i32, Error> {
        if near_spectrum.len() != self.spectrum_size {
            return Err(Error::SpectrumSizeMismatch);
        }
        if near_q > 15 {
            return Err(Error::QDomainTooLarge);
        }
        let binary_spectrum = spectrum::binary_spectrum(
            near_spectrum,
            &mut self.mean_near_spectrum,
            near_q,
            &mut self.near_spectrum_initialized,
        );
        Ok(self.binary.process(farend.binary(), binary_spectrum))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum_at(size: usize, bin: usize, value: u16) -> Vec<u16> {
        let mut spectrum = vec![0u16; size];
        spectrum[bin] = value;
        spectrum
    }

    #[test]
    fn rejects_undersized_spectra() {
        assert!(matches!(
            DelayEstimatorFarend::new(10, 20),
            Err(Error::SpectrumTooSmall { spectrum_size: 10 })
        ));
    }

    #[test]
    fn wrapper_reports_no_delay_before_warm_up() {
        let mut farend = DelayEstimatorFarend::new(64, 20).unwrap();
        let mut near = DelayEstimator::new(&farend, 0);

        let spectrum = spectrum_at(64, 20, 500);
        farend.add_far_spectrum(&spectrum, 0).unwrap();
        let delay = near.process(&farend, &spectrum, 0).unwrap();
        assert_eq!(delay, -2);
    }

    #[test]
    fn rejects_mismatched_spectrum_sizes() {
        let farend = DelayEstimatorFarend::new(64, 20).unwrap();
        let mut near = DelayEstimator::new(&farend, 0);
        let wrong = vec![0u16; 10];
        assert_eq!(near.process(&farend, &wrong, 0), Err(Error::SpectrumSizeMismatch));
    }

    #[test]
    fn quality_starts_at_zero_without_robust_validation() {
        let farend = DelayEstimatorFarend::new(64, 20).unwrap();
        let near = DelayEstimator::new(&farend, 0);
        assert_eq!(near.last_delay_quality(), 0.0);
    }
}
