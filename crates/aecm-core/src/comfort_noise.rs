//! Comfort-noise synthesis for regions the Wiener mask suppresses.
//!
//! Tracks a slowly adapting noise floor per bin and injects pseudo-random
//! phase at that magnitude so suppressed near-end audio doesn't drop to
//! dead silence. Grounded on `ComfortNoise`.

use crate::tables::{KCOS_TABLE, KSIN_TABLE};
use crate::{spl, AecmCore, K_NOISE_EST_INC_COUNT, K_NOISE_EST_Q_DOMAIN, ONE_Q14, PART_LEN, PART_LEN1};

pub(crate) fn comfort_noise(
    core: &mut AecmCore,
    dfa: &[u16; PART_LEN1],
    lambda: &[i16; PART_LEN1],
    out_real: &mut [i16; PART_LEN1],
    out_imag: &mut [i16; PART_LEN1],
) {
    let shift_from_near_to_noise = K_NOISE_EST_Q_DOMAIN - core.dfa_clean_q_domain;
    debug_assert!((0..16).contains(&shift_from_near_to_noise));

    let min_track_shift = if core.noise_est_ctr < 100 {
        core.noise_est_ctr += 1;
        6
    } else {
        9
    };

    for i in 0..PART_LEN1 {
        let out_l_shift32 = i32::from(dfa[i]).wrapping_shl(shift_from_near_to_noise as u32);

        if out_l_shift32 < core.noise_est[i] {
            core.noise_est_too_low_ctr[i] = 0;
            if core.noise_est[i] < (1 << min_track_shift) {
                core.noise_est_too_high_ctr[i] += 1;
                if core.noise_est_too_high_ctr[i] >= K_NOISE_EST_INC_COUNT {
                    core.noise_est[i] -= 1;
                    core.noise_est_too_high_ctr[i] = 0;
                }
            } else {
                core.noise_est[i] -= (core.noise_est[i] - out_l_shift32) >> min_track_shift;
            }
        } else {
            core.noise_est_too_high_ctr[i] = 0;
            if (core.noise_est[i] >> 19) > 0 {
                core.noise_est[i] >>= 11;
                core.noise_est[i] *= 2049;
            } else if (core.noise_est[i] >> 11) > 0 {
                core.noise_est[i] *= 2049;
                core.noise_est[i] >>= 11;
            } else {
                core.noise_est_too_low_ctr[i] += 1;
                if core.noise_est_too_low_ctr[i] >= K_NOISE_EST_INC_COUNT {
                    core.noise_est[i] += (core.noise_est[i] >> 9) + 1;
                    core.noise_est_too_low_ctr[i] = 0;
                }
            }
        }
    }

    let mut noise_r_shift16 = [0i16; PART_LEN1];
    for i in 0..PART_LEN1 {
        let mut tmp32 = core.noise_est[i] >> shift_from_near_to_noise;
        if tmp32 > 32767 {
            tmp32 = 32767;
            core.noise_est[i] = tmp32 << shift_from_near_to_noise;
        }
        let tmp16 = ONE_Q14 - lambda[i];
        noise_r_shift16[i] = ((i32::from(tmp16) * tmp32) >> 14) as i16;
    }

    let mut rand_w16 = [0i16; PART_LEN];
    spl::rand_u_array(&mut rand_w16, &mut core.seed);

    let mut u_real = [0i16; PART_LEN1];
    let mut u_imag = [0i16; PART_LEN1];
    for i in 1..PART_LEN1 {
        let index = ((359 * i32::from(rand_w16[i - 1])) >> 15) as usize;
        u_real[i] = ((i32::from(noise_r_shift16[i]) * i32::from(KCOS_TABLE[index])) >> 13) as i16;
        u_imag[i] = ((i32::from(-noise_r_shift16[i]) * i32::from(KSIN_TABLE[index])) >> 13) as i16;
    }
    u_imag[PART_LEN] = 0;

    for i in 0..PART_LEN1 {
        out_real[i] = spl::add_sat_w16(out_real[i], u_real[i]);
        out_imag[i] = spl::add_sat_w16(out_imag[i], u_imag[i]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comfort_noise_leaves_dc_and_nyquist_phase_free() {
        let mut core = AecmCore::new(8000).unwrap();
        let dfa = [500u16; PART_LEN1];
        let lambda = [0i16; PART_LEN1];
        let mut out_real = [0i16; PART_LEN1];
        let mut out_imag = [0i16; PART_LEN1];
        comfort_noise(&mut core, &dfa, &lambda, &mut out_real, &mut out_imag);
        // Bin 0 (DC) never receives synthesized phase; it stays whatever the
        // caller seeded it with (zero here).
        assert_eq!(out_real[0], 0);
        assert_eq!(out_imag[0], 0);
        // Nyquist bin's imaginary part is always forced back to zero.
        assert_eq!(out_imag[PART_LEN], 0);
    }

    #[test]
    fn noise_floor_ramps_towards_signal_energy() {
        let mut core = AecmCore::new(8000).unwrap();
        let dfa = [2000u16; PART_LEN1];
        let lambda = [ONE_Q14; PART_LEN1];
        let mut out_real = [0i16; PART_LEN1];
        let mut out_imag = [0i16; PART_LEN1];
        for _ in 0..50 {
            comfort_noise(&mut core, &dfa, &lambda, &mut out_real, &mut out_imag);
        }
        assert!(core.noise_est[10] > 0);
    }
}
