//! Rotating history of far-end magnitude spectra, indexed by delay.
//!
//! Every block's far-end spectrum is stored at the next rotating slot; the
//! binary delay estimate then selects which past slot best aligns with the
//! current near-end block. Grounded on `WebRtcAecm_UpdateFarHistory` and
//! `WebRtcAecm_AlignedFarend`.

use crate::{MAX_DELAY, PART_LEN1};

#[derive(Debug, Clone)]
pub(crate) struct FarHistory {
    spectra: Vec<[u16; PART_LEN1]>,
    q_domains: [i32; MAX_DELAY],
    pos: usize,
}

impl FarHistory {
    pub(crate) fn new() -> Self {
        Self {
            spectra: vec![[0; PART_LEN1]; MAX_DELAY],
            q_domains: [0; MAX_DELAY],
            // The first `update` advances this past the last slot, wrapping
            // to 0, matching `far_history_pos = MAX_DELAY` at init.
            pos: MAX_DELAY,
        }
    }

    pub(crate) fn init(&mut self) {
        for slot in &mut self.spectra {
            slot.fill(0);
        }
        self.q_domains.fill(0);
        self.pos = MAX_DELAY;
    }

    pub(crate) fn update(&mut self, far_spectrum: &[u16; PART_LEN1], far_q: i32) {
        self.pos += 1;
        if self.pos >= MAX_DELAY {
            self.pos = 0;
        }
        self.q_domains[self.pos] = far_q;
        self.spectra[self.pos] = *far_spectrum;
    }

    /// Returns the spectrum and Q-domain stored `delay` slots before the
    /// most recently written one.
    pub(crate) fn aligned(&self, delay: i32) -> (&[u16; PART_LEN1], i32) {
        let mut buffer_position = self.pos as i32 - delay;
        if buffer_position < 0 {
            buffer_position += MAX_DELAY as i32;
        }
        let buffer_position = buffer_position as usize % MAX_DELAY;
        (&self.spectra[buffer_position], self.q_domains[buffer_position])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_update_lands_at_slot_zero() {
        let mut history = FarHistory::new();
        let spectrum = [7u16; PART_LEN1];
        history.update(&spectrum, 3);
        let (aligned, q) = history.aligned(0);
        assert_eq!(*aligned, spectrum);
        assert_eq!(q, 3);
    }

    #[test]
    fn aligned_wraps_backwards_through_history() {
        let mut history = FarHistory::new();
        for i in 0..5 {
            let mut spectrum = [0u16; PART_LEN1];
            spectrum[0] = i;
            history.update(&spectrum, i as i32);
        }
        // Most recent write is i=4 at delay 0; delay 2 should recover i=2.
        let (aligned, q) = history.aligned(2);
        assert_eq!(aligned[0], 2);
        assert_eq!(q, 2);
    }

    #[test]
    fn delay_beyond_history_wraps_around_buffer() {
        let mut history = FarHistory::new();
        for i in 0..3 {
            let mut spectrum = [0u16; PART_LEN1];
            spectrum[0] = i;
            history.update(&spectrum, 0);
        }
        // pos is 2; delay = pos - (MAX_DELAY - 1) wraps to slot 1 + 2 = 3.
        let (_, _) = history.aligned(MAX_DELAY as i32 - 1);
    }
}
