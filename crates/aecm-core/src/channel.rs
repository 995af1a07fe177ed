//! NLMS channel estimation with dual stored/adaptive arbitration.
//!
//! Grounded on `CalcLinearEnergiesC`, `StoreAdaptiveChannelC`,
//! `ResetAdaptiveChannelC` and `WebRtcAecm_UpdateChannel`.

use crate::{
    spl, AecmCore, CHANNEL_VAD, MIN_MSE_COUNT, MIN_MSE_DIFF, MSE_RESOLUTION, PART_LEN1,
    RESOLUTION_CHANNEL32,
};

impl AecmCore {
    /// Energy of the delayed far-end spectrum and of the estimated echo
    /// under both the stored and adaptive channels. Also fills `echo_est`
    /// with the stored-channel estimate. Ported from `CalcLinearEnergiesC`.
    pub(crate) fn calc_linear_energies(
        &self,
        far_spectrum: &[u16; PART_LEN1],
        echo_est: &mut [i32; PART_LEN1],
    ) -> (u32, u32, u32) {
        let mut far_energy = 0u32;
        let mut echo_energy_adapt = 0u32;
        let mut echo_energy_stored = 0u32;

        for i in 0..PART_LEN1 {
            echo_est[i] = i32::from(self.channel_stored[i]) * i32::from(far_spectrum[i]);
            far_energy += u32::from(far_spectrum[i]);
            echo_energy_adapt += (i32::from(self.channel_adapt_16[i]) * i32::from(far_spectrum[i])) as u32;
            echo_energy_stored += echo_est[i] as u32;
        }

        (far_energy, echo_energy_adapt, echo_energy_stored)
    }

    /// Commits the adaptive channel as the new stored channel and
    /// recomputes `echo_est` from it. Ported from `StoreAdaptiveChannelC`.
    pub(crate) fn store_adaptive_channel(
        &mut self,
        far_spectrum: &[u16; PART_LEN1],
        echo_est: &mut [i32; PART_LEN1],
    ) {
        self.channel_stored.copy_from_slice(&self.channel_adapt_16);
        for i in 0..PART_LEN1 {
            echo_est[i] = i32::from(self.channel_stored[i]) * i32::from(far_spectrum[i]);
        }
    }

    /// Discards the adaptive channel in favor of the stored one. Ported
    /// from `ResetAdaptiveChannelC`.
    pub(crate) fn reset_adaptive_channel(&mut self) {
        self.channel_adapt_16.copy_from_slice(&self.channel_stored);
        for i in 0..PART_LEN1 {
            self.channel_adapt_32[i] = i32::from(self.channel_stored[i]) << 16;
        }
    }

    /// NLMS update of the adaptive channel, followed by the stored-vs-
    /// adaptive MSE arbitration that decides whether to commit or roll
    /// back. Ported from `WebRtcAecm_UpdateChannel`.
    pub(crate) fn update_channel(
        &mut self,
        far_spectrum: &[u16; PART_LEN1],
        far_q: i16,
        dfa: &[u16; PART_LEN1],
        mu: i16,
        echo_est: &mut [i32; PART_LEN1],
    ) {
        if mu != 0 {
            for i in 0..PART_LEN1 {
                let zeros_ch = spl::norm_u32(self.channel_adapt_32[i] as u32);
                let zeros_far = spl::norm_u32(u32::from(far_spectrum[i]));
                let (mut tmp_u32_1, shift_ch_far) = if zeros_ch + zeros_far > 31 {
                    ((self.channel_adapt_32[i] as u32).wrapping_mul(u32::from(far_spectrum[i])), 0i16)
                } else {
                    let shift = 32 - zeros_ch - zeros_far;
                    let shifted = if shift >= 32 { 0 } else { (self.channel_adapt_32[i] as u32) >> shift };
                    (shifted.wrapping_mul(u32::from(far_spectrum[i])), shift)
                };

                let mut zeros_num = spl::norm_u32(tmp_u32_1);
                let zeros_dfa = if dfa[i] != 0 { spl::norm_u32(u32::from(dfa[i])) } else { 32 };
                let tmp16_1 = zeros_dfa - 2 + self.dfa_noisy_q_domain - RESOLUTION_CHANNEL32 - far_q + shift_ch_far;
                let (xfa_q, dfa_q) = if zeros_num > tmp16_1 + 1 {
                    (tmp16_1, zeros_dfa - 2)
                } else {
                    let xfa_q = zeros_num - 2;
                    (xfa_q, RESOLUTION_CHANNEL32 + far_q - self.dfa_noisy_q_domain - shift_ch_far + xfa_q)
                };

                tmp_u32_1 = shift_w32_u(tmp_u32_1, xfa_q);
                let tmp_u32_2 = shift_w32_u(u32::from(dfa[i]), dfa_q);
                let tmp32_1 = tmp_u32_2 as i32 - tmp_u32_1 as i32;
                zeros_num = spl::norm_w32(tmp32_1);

                if tmp32_1 != 0 && far_spectrum[i] > (CHANNEL_VAD << far_q) {
                    let (mut tmp32_2, shift_num) = if zeros_num + zeros_far > 31 {
                        let v = if tmp32_1 > 0 {
                            (tmp32_1 as u32).wrapping_mul(u32::from(far_spectrum[i])) as i32
                        } else {
                            -(((-tmp32_1) as u32).wrapping_mul(u32::from(far_spectrum[i])) as i32)
                        };
                        (v, 0i16)
                    } else {
                        let shift = 32 - (zeros_num + zeros_far);
                        let v = if tmp32_1 > 0 {
                            (tmp32_1 >> shift) * i32::from(far_spectrum[i])
                        } else {
                            -((-tmp32_1 >> shift) * i32::from(far_spectrum[i]))
                        };
                        (v, shift)
                    };

                    tmp32_2 = spl::div_w32_w16(tmp32_2, (i + 1) as i16);
                    let shift2_res_chan = shift_num + shift_ch_far - xfa_q - mu - ((30 - zeros_far) << 1);
                    tmp32_2 = if spl::norm_w32(tmp32_2) < shift2_res_chan {
                        i32::MAX
                    } else {
                        shift_w32(tmp32_2, shift2_res_chan)
                    };

                    self.channel_adapt_32[i] = spl::add_sat_w32(self.channel_adapt_32[i], tmp32_2);
                    if self.channel_adapt_32[i] < 0 {
                        self.channel_adapt_32[i] = 0;
                    }
                    self.channel_adapt_16[i] = (self.channel_adapt_32[i] >> 16) as i16;
                }
            }
        }

        if self.startup_state == 0 && self.current_vad_value {
            self.store_adaptive_channel(far_spectrum, echo_est);
        } else {
            if self.far_log_energy < self.far_energy_mse {
                self.mse_channel_count = 0;
            } else {
                self.mse_channel_count += 1;
            }

            if self.mse_channel_count >= MIN_MSE_COUNT + 10 {
                let mut mse_stored = 0i32;
                let mut mse_adapt = 0i32;
                for i in 0..MIN_MSE_COUNT as usize {
                    mse_stored += (i32::from(self.echo_stored_log_energy[i]) - i32::from(self.near_log_energy[i])).abs();
                    mse_adapt += (i32::from(self.echo_adapt_log_energy[i]) - i32::from(self.near_log_energy[i])).abs();
                }

                if (mse_stored << MSE_RESOLUTION) < MIN_MSE_DIFF * mse_adapt
                    && (self.mse_stored_old << MSE_RESOLUTION) < MIN_MSE_DIFF * self.mse_adapt_old
                {
                    self.reset_adaptive_channel();
                } else if MIN_MSE_DIFF * mse_stored > (mse_adapt << MSE_RESOLUTION)
                    && mse_adapt < self.mse_threshold
                    && self.mse_adapt_old < self.mse_threshold
                {
                    self.store_adaptive_channel(far_spectrum, echo_est);

                    if self.mse_threshold == i32::MAX {
                        self.mse_threshold = mse_adapt + self.mse_adapt_old;
                    } else {
                        let scaled_threshold = self.mse_threshold * 5 / 8;
                        self.mse_threshold += ((mse_adapt - scaled_threshold) * 205) >> 8;
                    }
                }

                self.mse_channel_count = 0;
                self.mse_stored_old = mse_stored;
                self.mse_adapt_old = mse_adapt;
            }
        }
    }

}

fn shift_w32(x: i32, c: i16) -> i32 {
    if c >= 0 { x.wrapping_shl(c as u32) } else { x >> (-c) as u32 }
}

fn shift_w32_u(x: u32, c: i16) -> u32 {
    if c >= 0 { x.wrapping_shl(c as u32) } else { x >> (-c) as u32 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PART_LEN1;

    #[test]
    fn store_adaptive_channel_copies_into_stored() {
        let mut core = AecmCore::new(8000).unwrap();
        core.channel_adapt_16 = [42; PART_LEN1];
        let far = [1u16; PART_LEN1];
        let mut echo_est = [0i32; PART_LEN1];
        core.store_adaptive_channel(&far, &mut echo_est);
        assert_eq!(core.channel_stored, [42; PART_LEN1]);
        assert_eq!(echo_est[0], 42);
    }

    #[test]
    fn reset_adaptive_channel_restores_from_stored() {
        let mut core = AecmCore::new(8000).unwrap();
        core.channel_adapt_16 = [1; PART_LEN1];
        core.reset_adaptive_channel();
        assert_eq!(core.channel_adapt_16, core.channel_stored);
        assert_eq!(core.channel_adapt_32[0], i32::from(core.channel_stored[0]) << 16);
    }

    #[test]
    fn update_channel_is_a_noop_when_mu_is_zero() {
        let mut core = AecmCore::new(8000).unwrap();
        let before = core.channel_adapt_32;
        let far = [100u16; PART_LEN1];
        let dfa = [50u16; PART_LEN1];
        let mut echo_est = [0i32; PART_LEN1];
        core.update_channel(&far, 0, &dfa, 0, &mut echo_est);
        assert_eq!(core.channel_adapt_32, before);
    }
}
