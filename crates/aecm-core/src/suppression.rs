//! Suppression-gain estimation, the Wiener mask, and non-linear processing.
//!
//! Grounded on `WebRtcAecm_CalcSuppressionGain` and the Wiener-mask /
//! wideband post-shaping / NLP-gating section of `WebRtcAecm_ProcessBlock`.

use crate::spl;
use crate::{
    AecmCore, ENERGY_DEV_OFFSET, ENERGY_DEV_TOL, K_MAX_PREF_BAND, K_MIN_PREF_BAND, NLP_COMP_HIGH,
    NLP_COMP_LOW, ONE_Q14, PART_LEN1, RESOLUTION_CHANNEL16, RESOLUTION_SUPGAIN, SUPGAIN_EPC_DT,
};

impl AecmCore {
    /// Suppression gain (Q14) blending far-end VAD and double-talk
    /// detection, smoothed across blocks. Ported from
    /// `WebRtcAecm_CalcSuppressionGain`.
    pub(crate) fn calc_suppression_gain(&mut self) -> i16 {
        let mut sup_gain = if !self.current_vad_value {
            0
        } else {
            let d_e = (self.near_log_energy[0] - self.echo_stored_log_energy[0] - ENERGY_DEV_OFFSET).abs();
            if d_e < ENERGY_DEV_TOL {
                if d_e < SUPGAIN_EPC_DT {
                    let tmp32 = i32::from(self.sup_gain_err_param_diff_ab) * i32::from(d_e)
                        + i32::from(SUPGAIN_EPC_DT >> 1);
                    let tmp16 = spl::div_w32_w16(tmp32, SUPGAIN_EPC_DT) as i16;
                    self.sup_gain_err_param_a - tmp16
                } else {
                    let tmp32 = i32::from(self.sup_gain_err_param_diff_bd) * i32::from(ENERGY_DEV_TOL - d_e)
                        + i32::from((ENERGY_DEV_TOL - SUPGAIN_EPC_DT) >> 1);
                    let tmp16 = spl::div_w32_w16(tmp32, (ENERGY_DEV_TOL - SUPGAIN_EPC_DT) as i16) as i16;
                    self.sup_gain_err_param_d + tmp16
                }
            } else {
                self.sup_gain_err_param_d
            }
        };

        let prev_max = sup_gain.max(self.sup_gain_old);
        self.sup_gain_old = sup_gain;
        self.sup_gain += (prev_max - self.sup_gain) >> 4;
        sup_gain = self.sup_gain;
        sup_gain
    }
}

/// Builds the Wiener mask from the gained echo estimate and the near-end
/// spectrum, applies the wideband upper-band cap and the NLP gate, and
/// multiplies the result into `efw_real`/`efw_imag`. Ported from the
/// second half of `WebRtcAecm_ProcessBlock`.
#[allow(clippy::too_many_arguments, reason = "mirrors the tightly coupled original routine")]
pub(crate) fn wiener_and_nlp(
    core: &mut AecmCore,
    echo_est: &[i32; PART_LEN1],
    sup_gain: i16,
    zeros_x_buf: i16,
    dfw: &[i16],
    dfa_clean: &[u16; PART_LEN1],
    hnl: &mut [i16; PART_LEN1],
    efw_real: &mut [i16; PART_LEN1],
    efw_imag: &mut [i16; PART_LEN1],
) {
    let mut num_pos_coef = 0i16;

    for i in 0..PART_LEN1 {
        let tmp32 = echo_est[i] - core.echo_filt[i];
        core.echo_filt[i] += ((i64::from(tmp32) * 50) >> 8) as i32;

        let zeros32 = spl::norm_w32(core.echo_filt[i]) + 1;
        let zeros16 = spl::norm_w16(sup_gain) + 1;
        let (echo_est_gained, resolution_diff) = if zeros32 + zeros16 > 16 {
            let gained = (core.echo_filt[i] as u32).wrapping_mul(sup_gain as u16 as u32);
            let mut diff = 14 - RESOLUTION_CHANNEL16 - RESOLUTION_SUPGAIN;
            diff += core.dfa_clean_q_domain - zeros_x_buf;
            (gained, diff)
        } else {
            let tmp16 = 17 - zeros32 - zeros16;
            let mut diff = 14 + tmp16 - RESOLUTION_CHANNEL16 - RESOLUTION_SUPGAIN;
            diff += core.dfa_clean_q_domain - zeros_x_buf;
            let gained = if zeros32 > tmp16 {
                (core.echo_filt[i] as u32).wrapping_mul((sup_gain >> tmp16) as u16 as u32)
            } else {
                ((core.echo_filt[i] >> tmp16) * i32::from(sup_gain)) as u32
            };
            (gained, diff)
        };

        let zeros16 = spl::norm_w16(core.near_filt[i]);
        let dfa_clean_q_domain_diff = core.dfa_clean_q_domain - core.dfa_clean_q_domain_old;
        let (mut tmp16_1, q_domain_diff, mut tmp16_2);
        if zeros16 < dfa_clean_q_domain_diff && core.near_filt[i] != 0 {
            tmp16_1 = core.near_filt[i].wrapping_shl(zeros16 as u32);
            q_domain_diff = zeros16 - dfa_clean_q_domain_diff;
            tmp16_2 = (dfa_clean[i] >> (-q_domain_diff) as u32) as i16;
        } else {
            tmp16_1 = if dfa_clean_q_domain_diff < 0 {
                core.near_filt[i] >> (-dfa_clean_q_domain_diff) as u32
            } else {
                core.near_filt[i].wrapping_shl(dfa_clean_q_domain_diff as u32)
            };
            q_domain_diff = 0;
            tmp16_2 = dfa_clean[i] as i16;
        }
        let tmp32_1 = i32::from(tmp16_2) - i32::from(tmp16_1);
        tmp16_2 = (tmp32_1 >> 4) as i16;
        tmp16_2 = tmp16_2.wrapping_add(tmp16_1);
        tmp16_1 = tmp16_2;
        let zeros16 = spl::norm_w16(tmp16_1);
        core.near_filt[i] = if tmp16_1 != 0 && -q_domain_diff > zeros16 {
            32767
        } else if q_domain_diff < 0 {
            tmp16_1.wrapping_shl((-q_domain_diff) as u32)
        } else {
            tmp16_1 >> q_domain_diff
        };

        hnl[i] = if echo_est_gained == 0 {
            ONE_Q14
        } else if core.near_filt[i] == 0 {
            0
        } else {
            let echo_est_gained = echo_est_gained + ((i32::from(core.near_filt[i]) >> 1) as u32);
            let tmp_u32 = spl::div_u32_u16(echo_est_gained, core.near_filt[i] as u16);
            let tmp32 = shift_w32(tmp_u32 as i32, resolution_diff);
            if tmp32 > i32::from(ONE_Q14) {
                0
            } else if tmp32 < 0 {
                ONE_Q14
            } else {
                (ONE_Q14 - tmp32 as i16).max(0)
            }
        };

        if hnl[i] != 0 {
            num_pos_coef += 1;
        }
    }

    if core.mult == 2 {
        for slot in hnl.iter_mut() {
            *slot = (((*slot as i32) * (*slot as i32)) >> 14) as i16;
        }

        let mut avg_hnl32 = 0i32;
        for &v in &hnl[K_MIN_PREF_BAND..=K_MAX_PREF_BAND] {
            avg_hnl32 += i32::from(v);
        }
        avg_hnl32 /= (K_MAX_PREF_BAND - K_MIN_PREF_BAND + 1) as i32;

        for slot in &mut hnl[K_MAX_PREF_BAND..PART_LEN1] {
            if i32::from(*slot) > avg_hnl32 {
                *slot = avg_hnl32 as i16;
            }
        }
    }

    if core.nlp_flag {
        let nlp_gain = if num_pos_coef < 3 { 0 } else { ONE_Q14 };
        for i in 0..PART_LEN1 {
            if hnl[i] > NLP_COMP_HIGH {
                hnl[i] = ONE_Q14;
            } else if hnl[i] < NLP_COMP_LOW {
                hnl[i] = 0;
            }

            if !(hnl[i] == ONE_Q14 && nlp_gain == ONE_Q14) {
                hnl[i] = (((hnl[i] as i32) * (nlp_gain as i32)) >> 14) as i16;
            }

            efw_real[i] = mul16_16_rshift_round(dfw[2 * i], hnl[i], 14);
            efw_imag[i] = mul16_16_rshift_round(dfw[2 * i + 1], hnl[i], 14);
        }
    } else {
        for i in 0..PART_LEN1 {
            efw_real[i] = mul16_16_rshift_round(dfw[2 * i], hnl[i], 14);
            efw_imag[i] = mul16_16_rshift_round(dfw[2 * i + 1], hnl[i], 14);
        }
    }
}

fn mul16_16_rshift_round(a: i16, b: i16, shift: u32) -> i16 {
    let product = i32::from(a) * i32::from(b);
    ((product + (1 << (shift - 1))) >> shift) as i16
}

fn shift_w32(x: i32, c: i16) -> i32 {
    if c >= 0 { x.wrapping_shl(c as u32) } else { x >> (-c) as u32 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppression_gain_is_zero_without_vad() {
        let mut core = AecmCore::new(8000).unwrap();
        assert_eq!(core.calc_suppression_gain(), 0);
    }

    #[test]
    fn wiener_mask_with_zero_echo_passes_signal_through() {
        let mut core = AecmCore::new(8000).unwrap();
        core.near_filt = [1000; PART_LEN1];
        let echo_est = [0i32; PART_LEN1];
        let mut dfw = [0i16; crate::PART_LEN2 + 2];
        for i in 0..=crate::PART_LEN {
            dfw[2 * i] = 500;
        }
        let dfa_clean = [200u16; PART_LEN1];
        let mut hnl = [0i16; PART_LEN1];
        let mut efw_real = [0i16; PART_LEN1];
        let mut efw_imag = [0i16; PART_LEN1];
        wiener_and_nlp(
            &mut core,
            &echo_est,
            256,
            0,
            &dfw,
            &dfa_clean,
            &mut hnl,
            &mut efw_real,
            &mut efw_imag,
        );
        assert!(hnl.iter().all(|&g| g == ONE_Q14));
    }
}
