//! Log-energy tracking and internal VAD/MSE-threshold bookkeeping.
//!
//! Grounded on `WebRtcAecm_AsymFilt`, `ExtractFractionPart`,
//! `LogOfEnergyInQ8`, `WebRtcAecm_CalcEnergies` and
//! `WebRtcAecm_CalcStepSize`.

use crate::{
    spl, AecmCore, FAR_ENERGY_DIFF, FAR_ENERGY_MIN, FAR_ENERGY_VAD_REGION, MU_DIFF, MU_MAX,
    MU_MIN, PART_LEN1, PART_LEN_SHIFT,
};

/// Asymmetric one-pole filter: moves towards `in_val` with a different
/// shift depending on whether the new sample is above or below the
/// filtered state. `i16::MAX`/`MIN` are treated as "unset" and snap
/// straight to `in_val`.
fn asym_filt(filt_old: i16, in_val: i16, step_size_pos: i16, step_size_neg: i16) -> i16 {
    if filt_old == i16::MAX || filt_old == i16::MIN {
        return in_val;
    }
    if filt_old > in_val {
        filt_old - ((filt_old - in_val) >> step_size_neg)
    } else {
        filt_old + ((in_val - filt_old) >> step_size_pos)
    }
}

/// Fractional part of `a` (which has `zeros` leading zeros), scaled to Q8.
fn extract_fraction_part(a: u32, zeros: i16) -> i16 {
    (((a << zeros) & 0x7FFF_FFFF) >> 23) as i16
}

/// log2 of `energy` (in Q`q_domain`), in Q8.
fn log_of_energy_in_q8(energy: u32, q_domain: i16) -> i16 {
    let k_log_low_value = PART_LEN_SHIFT << 7;
    if energy == 0 {
        return k_log_low_value;
    }
    let zeros = spl::norm_u32(energy);
    let frac = extract_fraction_part(energy, zeros);
    k_log_low_value + (((31 - zeros) << 8) + frac - (q_domain << 8))
}

impl AecmCore {
    /// Updates the near/far/echo log-energy histories, the farend VAD and
    /// MSE-threshold levels, and rescues a too-aggressive channel init.
    /// Ported from `WebRtcAecm_CalcEnergies`.
    pub(crate) fn calc_energies(
        &mut self,
        far_spectrum: &[u16; PART_LEN1],
        far_q: i16,
        near_energy: u32,
        echo_est: &mut [i32; PART_LEN1],
    ) {
        self.near_log_energy.copy_within(0..self.near_log_energy.len() - 1, 1);
        self.near_log_energy[0] = log_of_energy_in_q8(near_energy, self.dfa_noisy_q_domain);

        let (far_energy, echo_energy_adapt, echo_energy_stored) =
            self.calc_linear_energies(far_spectrum, echo_est);

        self.echo_adapt_log_energy.copy_within(0..self.echo_adapt_log_energy.len() - 1, 1);
        self.echo_stored_log_energy.copy_within(0..self.echo_stored_log_energy.len() - 1, 1);

        self.far_log_energy = log_of_energy_in_q8(far_energy, far_q);
        self.echo_adapt_log_energy[0] =
            log_of_energy_in_q8(echo_energy_adapt, crate::RESOLUTION_CHANNEL16 + far_q);
        self.echo_stored_log_energy[0] =
            log_of_energy_in_q8(echo_energy_stored, crate::RESOLUTION_CHANNEL16 + far_q);

        if self.far_log_energy > FAR_ENERGY_MIN {
            let (increase_max_shifts, decrease_min_shifts, increase_min_shifts) =
                if self.startup_state == 0 { (2, 2, 8) } else { (4, 3, 11) };
            let decrease_max_shifts = 11;

            self.far_energy_min =
                asym_filt(self.far_energy_min, self.far_log_energy, increase_min_shifts, decrease_min_shifts);
            self.far_energy_max =
                asym_filt(self.far_energy_max, self.far_log_energy, increase_max_shifts, decrease_max_shifts);
            self.far_energy_max_min = self.far_energy_max - self.far_energy_min;

            let mut tmp16 = 2560 - self.far_energy_min;
            tmp16 = if tmp16 > 0 { ((i32::from(tmp16) * i32::from(FAR_ENERGY_VAD_REGION)) >> 9) as i16 } else { 0 };
            tmp16 += FAR_ENERGY_VAD_REGION;

            if self.startup_state == 0 || self.vad_update_count > 1024 {
                self.far_energy_vad = self.far_energy_min + tmp16;
            } else if self.far_energy_vad > self.far_log_energy {
                self.far_energy_vad += (self.far_log_energy + tmp16 - self.far_energy_vad) >> 6;
                self.vad_update_count = 0;
            } else {
                self.vad_update_count += 1;
            }
            self.far_energy_mse = self.far_energy_vad + (1 << 8);
        }

        if self.far_log_energy > self.far_energy_vad {
            if self.startup_state == 0 || self.far_energy_max_min > FAR_ENERGY_DIFF {
                self.current_vad_value = true;
            }
        } else {
            self.current_vad_value = false;
        }

        if self.current_vad_value && self.first_vad {
            self.first_vad = false;
            if self.echo_adapt_log_energy[0] > self.near_log_energy[0] {
                for slot in self.channel_adapt_16.iter_mut() {
                    *slot >>= 3;
                }
                self.echo_adapt_log_energy[0] -= 3 << 8;
                self.first_vad = true;
            }
        }
    }

    /// NLMS step size, in `log2()` (number of right-shifts to apply).
    /// Ported from `WebRtcAecm_CalcStepSize`.
    pub(crate) fn calc_step_size(&self) -> i16 {
        if !self.current_vad_value {
            return 0;
        }
        if self.startup_state == 0 {
            return MU_MAX;
        }

        let mut mu = if self.far_energy_min >= self.far_energy_max {
            MU_MIN
        } else {
            let tmp16 = self.far_log_energy - self.far_energy_min;
            let tmp32 = i32::from(tmp16) * i32::from(MU_DIFF);
            let tmp32 = spl::div_w32_w16(tmp32, self.far_energy_max_min);
            MU_MIN - 1 - tmp32 as i16
        };
        if mu < MU_MAX {
            mu = MU_MAX;
        }
        mu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asym_filt_snaps_to_input_from_unset_state() {
        assert_eq!(asym_filt(i16::MAX, 123, 4, 4), 123);
        assert_eq!(asym_filt(i16::MIN, -55, 4, 4), -55);
    }

    #[test]
    fn asym_filt_moves_towards_input() {
        assert_eq!(asym_filt(100, 116, 4, 4), 101);
        assert_eq!(asym_filt(100, 84, 4, 4), 99);
    }

    #[test]
    fn log_of_zero_energy_is_the_floor_value() {
        assert_eq!(log_of_energy_in_q8(0, 0), PART_LEN_SHIFT << 7);
    }

    #[test]
    fn log_of_energy_increases_with_magnitude() {
        assert!(log_of_energy_in_q8(1 << 20, 0) > log_of_energy_in_q8(1 << 10, 0));
    }

    #[test]
    fn step_size_is_zero_without_vad() {
        let core = AecmCore::new(8000).unwrap();
        assert_eq!(core.calc_step_size(), 0);
    }
}
