//! Far-end binary spectrum history, ported from `BinaryDelayEstimatorFarend`
//! and its `WebRtc_*BinaryDelayEstimatorFarend` functions.

/// A rolling history of far-end binary spectra and their popcounts, newest
/// first, against which a near-end fingerprint is later compared at every
/// delay hypothesis.
#[derive(Debug, Clone)]
pub struct BinaryFarend {
    history_size: usize,
    far_history: Vec<u32>,
    far_bit_counts: Vec<i32>,
}

impl BinaryFarend {
    /// Creates a history of `history_size` far-end spectra. `history_size`
    /// must be greater than 1: it is also the number of delay hypotheses a
    /// [`super::BinaryDelayEstimator`] built against it can evaluate.
    pub fn new(history_size: usize) -> Self {
        assert!(history_size > 1, "history_size must exceed 1");
        Self {
            history_size,
            far_history: vec![0; history_size],
            far_bit_counts: vec![0; history_size],
        }
    }

    pub fn init(&mut self) {
        self.far_history.fill(0);
        self.far_bit_counts.fill(0);
    }

    pub fn history_size(&self) -> usize {
        self.history_size
    }

    pub(crate) fn history(&self) -> &[u32] {
        &self.far_history
    }

    pub(crate) fn bit_counts(&self) -> &[i32] {
        &self.far_bit_counts
    }

    /// Shifts the history and inserts `binary_far_spectrum` at the front.
    pub fn add_binary_spectrum(&mut self, binary_far_spectrum: u32) {
        self.far_history.rotate_right(1);
        self.far_history[0] = binary_far_spectrum;

        self.far_bit_counts.rotate_right(1);
        self.far_bit_counts[0] = binary_far_spectrum.count_ones() as i32;
    }

    /// Shifts the history by `delay_shift` positions, zero-padding the
    /// vacated entries, to re-align it after an external buffer resync.
    pub fn soft_reset(&mut self, delay_shift: i32) {
        if delay_shift == 0 {
            return;
        }
        let abs_shift = delay_shift.unsigned_abs() as usize;
        let shift_size = self.history_size - abs_shift;
        assert!(shift_size > 0);

        let (dest, src, pad) = if delay_shift > 0 {
            (abs_shift, 0, 0)
        } else {
            (0, abs_shift, shift_size)
        };

        self.far_history.copy_within(src..src + shift_size, dest);
        self.far_history[pad..pad + abs_shift].fill(0);
        self.far_bit_counts.copy_within(src..src + shift_size, dest);
        self.far_bit_counts[pad..pad + abs_shift].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_binary_spectrum_shifts_newest_to_front() {
        let mut farend = BinaryFarend::new(4);
        farend.add_binary_spectrum(0b1);
        farend.add_binary_spectrum(0b11);
        assert_eq!(farend.history(), &[0b11, 0b1, 0, 0]);
        assert_eq!(farend.bit_counts(), &[2, 1, 0, 0]);
    }

    #[test]
    fn init_clears_history() {
        let mut farend = BinaryFarend::new(4);
        farend.add_binary_spectrum(0xffff);
        farend.init();
        assert_eq!(farend.history(), &[0, 0, 0, 0]);
        assert_eq!(farend.bit_counts(), &[0, 0, 0, 0]);
    }

    #[test]
    fn soft_reset_shifts_forward_and_zero_pads_front() {
        let mut farend = BinaryFarend::new(4);
        farend.add_binary_spectrum(1);
        farend.add_binary_spectrum(2);
        farend.add_binary_spectrum(3);
        farend.add_binary_spectrum(4);
        // history is now [4, 3, 2, 1]
        farend.soft_reset(1);
        assert_eq!(farend.history(), &[0, 4, 3, 2]);
    }

    #[test]
    fn soft_reset_shifts_backward_and_zero_pads_tail() {
        let mut farend = BinaryFarend::new(4);
        farend.add_binary_spectrum(1);
        farend.add_binary_spectrum(2);
        farend.add_binary_spectrum(3);
        farend.add_binary_spectrum(4);
        // history is now [4, 3, 2, 1]
        farend.soft_reset(-1);
        assert_eq!(farend.history(), &[3, 2, 1, 0]);
    }
}
