//! Hamming-distance delay search over a [`BinaryFarend`] history, ported
//! from `BinaryDelayEstimator` and `WebRtc_*BinaryDelayEstimator*`.

use crate::far_end::BinaryFarend;
use crate::spectrum::mean_estimator_fix;

// Number of right shifts for the mean-bit-count smoothing is linearly
// dependent on the number of bits set in the far-end binary spectrum: a
// near-silent far end gets a slow (large-shift) update since its spectrum
// carries little information.
const SHIFTS_AT_ZERO: i32 = 13;
const SHIFTS_LINEAR_SLOPE: i32 = 3;

const PROBABILITY_OFFSET: i32 = 1024; // 2 in Q9.
const PROBABILITY_LOWER_LIMIT: i32 = 8704; // 17 in Q9.
const PROBABILITY_MIN_SPREAD: i32 = 2816; // 5.5 in Q9.
const MAX_BIT_COUNTS_Q9: i32 = 32 << 9;

// Robust validation settings.
const HISTOGRAM_MAX: f32 = 3000.0;
const LAST_HISTOGRAM_MAX: f32 = 250.0;
const MIN_HISTOGRAM_THRESHOLD: f32 = 1.5;
const MIN_REQUIRED_HITS: i32 = 10;
const MAX_HITS_WHEN_POSSIBLY_NON_CAUSAL: i32 = 10;
const MAX_HITS_WHEN_POSSIBLY_CAUSAL: i32 = 1000;
const Q14_SCALING: f32 = 1.0 / 16384.0; // 2^14, to get Q0.
const FRACTION_SLOPE: f32 = 0.05;
const MIN_FRACTION_WHEN_POSSIBLY_CAUSAL: f32 = 0.5;
const MIN_FRACTION_WHEN_POSSIBLY_NON_CAUSAL: f32 = 0.25;

/// Finds the delay, in frames, between a near-end binary fingerprint and a
/// [`BinaryFarend`] history by minimizing a smoothed Hamming distance.
///
/// Returns `-2` before any estimate has been formed, `-1` on a size
/// mismatch against the far-end history, and the delay index otherwise.
#[derive(Debug, Clone)]
pub struct BinaryDelayEstimator {
    near_history_size: usize,
    history_size: usize,
    robust_validation_enabled: bool,
    allowed_offset: i32,
    lookahead: i32,

    mean_bit_counts: Vec<i32>,
    bit_counts: Vec<i32>,
    binary_near_history: Vec<u32>,
    histogram: Vec<f32>,

    minimum_probability: i32,
    last_delay_probability: i32,
    last_delay: i32,
    last_candidate_delay: i32,
    compare_delay: i32,
    candidate_hits: i32,
    last_delay_histogram: f32,
}

impl BinaryDelayEstimator {
    /// `history_size` must match the [`BinaryFarend`] this estimator will be
    /// compared against. `max_lookahead` is the number of near-end frames of
    /// lookahead buffered before a fingerprint is compared, trading latency
    /// for estimate stability.
    pub fn new(history_size: usize, max_lookahead: usize) -> Self {
        let near_history_size = max_lookahead + 1;
        let mut estimator = Self {
            near_history_size,
            history_size,
            robust_validation_enabled: false,
            allowed_offset: 0,
            lookahead: max_lookahead as i32,
            mean_bit_counts: vec![0; history_size + 1],
            bit_counts: vec![0; history_size],
            binary_near_history: vec![0; near_history_size],
            histogram: vec![0.0; history_size + 1],
            minimum_probability: MAX_BIT_COUNTS_Q9,
            last_delay_probability: MAX_BIT_COUNTS_Q9,
            last_delay: -2,
            last_candidate_delay: -2,
            compare_delay: history_size as i32,
            candidate_hits: 0,
            last_delay_histogram: 0.0,
        };
        estimator.init();
        estimator
    }

    pub fn init(&mut self) {
        self.bit_counts.fill(0);
        self.binary_near_history.fill(0);
        for i in 0..=self.history_size {
            self.mean_bit_counts[i] = 20 << 9; // 20 in Q9.
            self.histogram[i] = 0.0;
        }
        self.minimum_probability = MAX_BIT_COUNTS_Q9;
        self.last_delay_probability = MAX_BIT_COUNTS_Q9;
        self.last_delay = -2;
        self.last_candidate_delay = -2;
        self.compare_delay = self.history_size as i32;
        self.candidate_hits = 0;
        self.last_delay_histogram = 0.0;
    }

    pub fn history_size(&self) -> usize {
        self.history_size
    }

    /// Shifts `lookahead` by `-delay_shift`, clamped to the buffered near
    /// history, and returns the actual change applied.
    pub fn soft_reset(&mut self, delay_shift: i32) -> i32 {
        let lookahead = self.lookahead;
        self.lookahead = (self.lookahead - delay_shift)
            .max(0)
            .min(self.near_history_size as i32 - 1);
        lookahead - self.lookahead
    }

    pub fn lookahead(&self) -> i32 {
        self.lookahead
    }

    pub fn set_lookahead(&mut self, lookahead: i32) -> Result<(), ()> {
        if lookahead < 0 || lookahead > self.near_history_size as i32 - 1 {
            return Err(());
        }
        self.lookahead = lookahead;
        Ok(())
    }

    pub fn allowed_offset(&self) -> i32 {
        self.allowed_offset
    }

    pub fn set_allowed_offset(&mut self, allowed_offset: i32) -> Result<(), ()> {
        if allowed_offset < 0 {
            return Err(());
        }
        self.allowed_offset = allowed_offset;
        Ok(())
    }

    pub fn robust_validation_enabled(&self) -> bool {
        self.robust_validation_enabled
    }

    pub fn enable_robust_validation(&mut self, enable: bool) {
        self.robust_validation_enabled = enable;
    }

    pub fn last_delay(&self) -> i32 {
        self.last_delay
    }

    /// A linear quality measure in `[0, 1]`: the histogram height at the
    /// current estimate when robust validation is on, otherwise how deep the
    /// cost-function minimum was at the last update.
    pub fn last_delay_quality(&self) -> f32 {
        if self.robust_validation_enabled {
            self.histogram[self.compare_delay as usize] / HISTOGRAM_MAX
        } else {
            ((MAX_BIT_COUNTS_Q9 - self.last_delay_probability) as f32 / MAX_BIT_COUNTS_Q9 as f32)
                .max(0.0)
        }
    }

    /// Compares `binary_near_spectrum` against `farend`'s history and
    /// updates the delay estimate. Returns `-1` if the histories have
    /// mismatched sizes, otherwise the current delay estimate (`-2` if none
    /// has ever been found).
    pub fn process(&mut self, farend: &BinaryFarend, binary_near_spectrum: u32) -> i32 {
        if farend.history_size() != self.history_size {
            return -1;
        }

        let mut near_spectrum = binary_near_spectrum;
        if self.near_history_size > 1 {
            self.binary_near_history.rotate_right(1);
            self.binary_near_history[0] = binary_near_spectrum;
            near_spectrum = self.binary_near_history[self.lookahead as usize];
        }

        for (i, &far_spectrum) in farend.history().iter().enumerate() {
            self.bit_counts[i] = (near_spectrum ^ far_spectrum).count_ones() as i32;
        }

        for i in 0..self.history_size {
            let bit_count = self.bit_counts[i] << 9; // Q9.
            let far_bit_count = farend.bit_counts()[i];
            if far_bit_count > 0 {
                let shifts = SHIFTS_AT_ZERO - ((SHIFTS_LINEAR_SLOPE * far_bit_count) >> 4);
                mean_estimator_fix(bit_count, shifts, &mut self.mean_bit_counts[i]);
            }
        }

        let mut candidate_delay = -1i32;
        let mut value_best_candidate = MAX_BIT_COUNTS_Q9;
        let mut value_worst_candidate = 0i32;
        for i in 0..self.history_size {
            let value = self.mean_bit_counts[i];
            if value < value_best_candidate {
                value_best_candidate = value;
                candidate_delay = i as i32;
            }
            if value > value_worst_candidate {
                value_worst_candidate = value;
            }
        }
        let valley_depth = value_worst_candidate - value_best_candidate;

        // Update the adaptive "hard" threshold: it can only tighten, and
        // only when the valley is distinct enough to trust.
        if self.minimum_probability > PROBABILITY_LOWER_LIMIT
            && valley_depth > PROBABILITY_MIN_SPREAD
        {
            let threshold = (value_best_candidate + PROBABILITY_OFFSET).max(PROBABILITY_LOWER_LIMIT);
            if self.minimum_probability > threshold {
                self.minimum_probability = threshold;
            }
        }

        // A Markov-style slowly increasing level over time: the longer we
        // go without a more confident candidate, the easier it gets to
        // accept one.
        self.last_delay_probability += 1;
        let mut valid_candidate = valley_depth > PROBABILITY_OFFSET
            && (value_best_candidate < self.minimum_probability
                || value_best_candidate < self.last_delay_probability);

        let non_stationary_farend = farend.bit_counts().iter().any(|&count| count > 0);

        if non_stationary_farend {
            self.update_robust_validation_statistics(candidate_delay, valley_depth, value_best_candidate);
        }

        if self.robust_validation_enabled {
            let is_histogram_valid = self.histogram_based_validation(candidate_delay);
            valid_candidate = self.robust_validation(candidate_delay, valid_candidate, is_histogram_valid);
        }

        if non_stationary_farend && valid_candidate {
            if candidate_delay != self.last_delay {
                let candidate_histogram = self.histogram[candidate_delay as usize];
                self.last_delay_histogram = candidate_histogram.min(LAST_HISTOGRAM_MAX);
                if candidate_histogram < self.histogram[self.compare_delay as usize] {
                    self.histogram[self.compare_delay as usize] = candidate_histogram;
                }
            }
            self.last_delay = candidate_delay;
            if value_best_candidate < self.last_delay_probability {
                self.last_delay_probability = value_best_candidate;
            }
            self.compare_delay = self.last_delay;
            tracing::debug!(delay = self.last_delay, "delay estimate updated");
        }

        self.last_delay
    }

    fn update_robust_validation_statistics(
        &mut self,
        candidate_delay: i32,
        valley_depth_q14: i32,
        valley_level_q14: i32,
    ) {
        let valley_depth = valley_depth_q14 as f32 * Q14_SCALING;
        let mut decrease_in_last_set = valley_depth;
        let max_hits_for_slow_change = if candidate_delay < self.last_delay {
            MAX_HITS_WHEN_POSSIBLY_NON_CAUSAL
        } else {
            MAX_HITS_WHEN_POSSIBLY_CAUSAL
        };

        if candidate_delay != self.last_candidate_delay {
            self.candidate_hits = 0;
            self.last_candidate_delay = candidate_delay;
        }
        self.candidate_hits += 1;

        let candidate_idx = candidate_delay as usize;
        self.histogram[candidate_idx] = (self.histogram[candidate_idx] + valley_depth).min(HISTOGRAM_MAX);

        if self.candidate_hits < max_hits_for_slow_change {
            decrease_in_last_set =
                (self.mean_bit_counts[self.compare_delay as usize] - valley_level_q14) as f32 * Q14_SCALING;
        }

        for i in 0..self.history_size as i32 {
            let is_in_last_set =
                i >= self.last_delay - 2 && i <= self.last_delay + 1 && i != candidate_delay;
            let is_in_candidate_set = i >= candidate_delay - 2 && i <= candidate_delay + 1;
            let mut decrease = 0.0;
            if is_in_last_set {
                decrease += decrease_in_last_set;
            } else if !is_in_candidate_set {
                decrease += valley_depth;
            }
            let idx = i as usize;
            self.histogram[idx] = (self.histogram[idx] - decrease).max(0.0);
        }
    }

    fn histogram_based_validation(&self, candidate_delay: i32) -> bool {
        let delay_difference = candidate_delay - self.last_delay;
        let mut fraction = 1.0f32;
        if delay_difference > self.allowed_offset {
            fraction = (1.0 - FRACTION_SLOPE * (delay_difference - self.allowed_offset) as f32)
                .max(MIN_FRACTION_WHEN_POSSIBLY_CAUSAL);
        } else if delay_difference < 0 {
            fraction = (MIN_FRACTION_WHEN_POSSIBLY_NON_CAUSAL - FRACTION_SLOPE * delay_difference as f32)
                .min(1.0);
        }

        let histogram_threshold =
            (self.histogram[self.compare_delay as usize] * fraction).max(MIN_HISTOGRAM_THRESHOLD);

        self.histogram[candidate_delay as usize] >= histogram_threshold
            && self.candidate_hits > MIN_REQUIRED_HITS
    }

    fn robust_validation(
        &self,
        candidate_delay: i32,
        is_instantaneous_valid: bool,
        is_histogram_valid: bool,
    ) -> bool {
        let mut is_robust = self.last_delay < 0 && (is_instantaneous_valid || is_histogram_valid);
        is_robust |= is_instantaneous_valid && is_histogram_valid;
        is_robust |= is_histogram_valid && self.histogram[candidate_delay as usize] > self.last_delay_histogram;
        is_robust
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matching_pair(history_size: usize, spectrum: u32) -> (BinaryFarend, BinaryDelayEstimator) {
        let mut farend = BinaryFarend::new(history_size);
        for _ in 0..history_size {
            farend.add_binary_spectrum(spectrum);
        }
        let near = BinaryDelayEstimator::new(history_size, 0);
        (farend, near)
    }

    #[test]
    fn rejects_mismatched_history_sizes() {
        let farend = BinaryFarend::new(4);
        let mut near = BinaryDelayEstimator::new(5, 0);
        assert_eq!(near.process(&farend, 0xaaaa_aaaa), -1);
    }

    #[test]
    fn reports_no_delay_before_any_nonstationary_farend() {
        let (farend, mut near) = matching_pair(10, 0);
        assert_eq!(near.process(&farend, 0), -2);
    }

    #[test]
    fn converges_on_the_true_delay_with_a_distinct_valley() {
        let mut farend = BinaryFarend::new(10);
        // A 3-frame-old echo: distinct spectra at each delay except a
        // constant run, which would make every comparison zero and defeat
        // the valley-depth check this test is exercising.
        let spectra = [
            0b1010_1010_1010_1010_1010_1010_1010u32,
            0b0101_0101_0101_0101_0101_0101_0101,
            0b1100_1100_1100_1100_1100_1100_1100,
            0b0011_0011_0011_0011_0011_0011_0011,
        ];
        for _ in 0..10 {
            for &s in &spectra {
                farend.add_binary_spectrum(s);
            }
        }

        let mut near = BinaryDelayEstimator::new(10, 0);
        let mut last = -2;
        for _ in 0..6000 {
            last = near.process(&farend, spectra[2]);
        }
        assert_eq!(last, 2);
    }

    #[test]
    fn soft_reset_clamps_lookahead_into_range() {
        let mut estimator = BinaryDelayEstimator::new(10, 2);
        assert_eq!(estimator.lookahead(), 2);
        estimator.soft_reset(5);
        assert_eq!(estimator.lookahead(), 0);
    }
}
