//! Time/frequency-domain conversion: windowing, the real FFT, magnitude
//! extraction, and the inverse transform with overlap-add.
//!
//! Grounded on `WebRtcAecm_ProcessBlock`'s `TimeToFrequencyDomain`,
//! `WindowAndFFT` and `InverseFFTAndWindow` helpers.

use aecm_fft::RealFft;

use crate::spl;
use crate::tables::KSQRT_HANNING;
use crate::{PART_LEN, PART_LEN1, PART_LEN2};

fn mul16_16_rshift_round(a: i16, b: i16, shift: u32) -> i16 {
    let product = i32::from(a) * i32::from(b);
    ((product + (1 << (shift - 1))) >> shift) as i16
}

/// `WEBRTC_SPL_SHIFT_W32`: positive `c` left-shifts, negative right-shifts.
fn shift_w32(x: i32, c: i16) -> i32 {
    if c >= 0 { x.wrapping_shl(c as u32) } else { x >> (-c) as u32 }
}

/// Windows `time_signal` by the sqrt-Hanning half-window after applying the
/// dynamic pre-scale, runs the forward real FFT, and negates the imaginary
/// parts of the first `PART_LEN` bins to match the algorithm's sign
/// convention. `spectrum` is the packed `[R0, 0, R1, I1, ..., R_N/2, 0]`
/// layout `aecm-fft` uses (length `PART_LEN2 + 2`).
fn window_and_fft(
    fft: &RealFft,
    time_signal: &[i16; PART_LEN2],
    spectrum: &mut [i16],
    time_signal_scaling: i16,
) {
    let mut windowed = [0i16; PART_LEN2];
    for i in 0..PART_LEN {
        let scaled = (i32::from(time_signal[i]).wrapping_shl(time_signal_scaling as u32)) as i16;
        windowed[i] = ((i32::from(scaled) * i32::from(KSQRT_HANNING[i])) >> 14) as i16;

        let scaled = (i32::from(time_signal[i + PART_LEN]).wrapping_shl(time_signal_scaling as u32)) as i16;
        windowed[PART_LEN + i] = ((i32::from(scaled) * i32::from(KSQRT_HANNING[PART_LEN - i])) >> 14) as i16;
    }

    fft.forward(&windowed, spectrum);
    for i in 0..PART_LEN {
        spectrum[2 * i + 1] = spectrum[2 * i + 1].wrapping_neg();
    }
}

/// Transforms a `PART_LEN2`-sample time-domain block into the frequency
/// domain. Returns `(time_signal_scaling, freq_signal_sum_abs)`: the
/// pre-scale applied (also the Q-domain of `freq_signal_abs`) and the sum
/// of the per-bin magnitudes.
///
/// `spectrum` receives the packed complex spectrum (length
/// `PART_LEN2 + 2`); `freq_signal_abs` receives the per-bin magnitude.
pub(crate) fn time_to_frequency_domain(
    fft: &RealFft,
    time_signal: &[i16; PART_LEN2],
    spectrum: &mut [i16],
    freq_signal_abs: &mut [u16; PART_LEN1],
) -> (i16, u32) {
    let time_signal_scaling = spl::norm_w16(spl::max_abs_value_w16(time_signal));

    window_and_fft(fft, time_signal, spectrum, time_signal_scaling);

    // DC and Nyquist bins are purely real; force their (already near-zero)
    // imaginary parts to exactly zero.
    spectrum[1] = 0;
    spectrum[2 * PART_LEN + 1] = 0;

    freq_signal_abs[0] = spectrum[0].unsigned_abs();
    freq_signal_abs[PART_LEN] = spectrum[2 * PART_LEN].unsigned_abs();
    let mut sum_abs =
        u32::from(freq_signal_abs[0]) + u32::from(freq_signal_abs[PART_LEN]);

    for i in 1..PART_LEN {
        let re = spectrum[2 * i];
        let im = spectrum[2 * i + 1];
        freq_signal_abs[i] = if re == 0 {
            im.unsigned_abs()
        } else if im == 0 {
            re.unsigned_abs()
        } else {
            let re_sq = i32::from(re.unsigned_abs()) * i32::from(re.unsigned_abs());
            let im_sq = i32::from(im.unsigned_abs()) * i32::from(im.unsigned_abs());
            spl::sqrt_floor(spl::add_sat_w32(re_sq, im_sq)) as u16
        };
        sum_abs += u32::from(freq_signal_abs[i]);
    }

    (time_signal_scaling, sum_abs)
}

/// Reconstructs the time-domain block from the edited spectrum, windows it
/// again, overlap-adds with `out_buf`, and advances the half-overlapped
/// history buffers (`x_buf`, `d_buf_noisy`, `d_buf_clean`) for the next
/// block.
#[allow(clippy::too_many_arguments, reason = "mirrors the tightly coupled original routine")]
pub(crate) fn inverse_fft_and_window(
    fft: &RealFft,
    efw_real: &[i16; PART_LEN1],
    efw_imag: &[i16; PART_LEN1],
    out_buf: &mut [i16; PART_LEN],
    output: &mut [i16; PART_LEN],
    x_buf: &mut [i16; PART_LEN2],
    d_buf_noisy: &mut [i16; PART_LEN2],
    d_buf_clean: Option<&mut [i16; PART_LEN2]>,
    dfa_clean_q_domain: i16,
) {
    let mut spectrum = [0i16; PART_LEN2 + 2];
    for i in 0..=PART_LEN {
        spectrum[2 * i] = efw_real[i];
        spectrum[2 * i + 1] = efw_imag[i].wrapping_neg();
    }

    let mut ifft_out = [0i16; PART_LEN2];
    let out_cfft = fft.inverse(&spectrum, &mut ifft_out) as i16;

    for i in 0..PART_LEN {
        let windowed = mul16_16_rshift_round(ifft_out[i], KSQRT_HANNING[i], 14);
        let shifted = shift_w32(i32::from(windowed), out_cfft - dfa_clean_q_domain);
        output[i] = spl::sat_w32_to_w16(shifted + i32::from(out_buf[i]));

        let windowed2 =
            (i32::from(ifft_out[PART_LEN + i]) * i32::from(KSQRT_HANNING[PART_LEN - i])) >> 14;
        let shifted2 = shift_w32(windowed2, out_cfft - dfa_clean_q_domain);
        out_buf[i] = spl::sat_w32_to_w16(shifted2);
    }

    x_buf.copy_within(PART_LEN..PART_LEN2, 0);
    d_buf_noisy.copy_within(PART_LEN..PART_LEN2, 0);
    if let Some(clean) = d_buf_clean {
        clean.copy_within(PART_LEN..PART_LEN2, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dc_block_concentrates_energy_in_bin_zero() {
        let fft = RealFft::new(7).unwrap();
        let time_signal = [8192i16; PART_LEN2];
        let mut spectrum = [0i16; PART_LEN2 + 2];
        let mut abs = [0u16; PART_LEN1];
        let (scaling, sum_abs) =
            time_to_frequency_domain(&fft, &time_signal, &mut spectrum, &mut abs);
        assert!(scaling >= 0);
        assert!(abs[0] as u32 * 2 > sum_abs, "DC bin should dominate for a constant block");
    }

    #[test]
    fn silence_produces_zero_spectrum() {
        let fft = RealFft::new(7).unwrap();
        let time_signal = [0i16; PART_LEN2];
        let mut spectrum = [0i16; PART_LEN2 + 2];
        let mut abs = [0u16; PART_LEN1];
        let (_, sum_abs) = time_to_frequency_domain(&fft, &time_signal, &mut spectrum, &mut abs);
        assert_eq!(sum_abs, 0);
        assert!(abs.iter().all(|&v| v == 0));
    }

    #[test]
    fn inverse_transform_shifts_history_buffers() {
        let fft = RealFft::new(7).unwrap();
        let efw_real = [0i16; PART_LEN1];
        let efw_imag = [0i16; PART_LEN1];
        let mut out_buf = [0i16; PART_LEN];
        let mut output = [0i16; PART_LEN];
        let mut x_buf = [0i16; PART_LEN2];
        for (i, sample) in x_buf.iter_mut().enumerate() {
            *sample = i as i16;
        }
        let mut d_buf_noisy = [0i16; PART_LEN2];
        inverse_fft_and_window(
            &fft,
            &efw_real,
            &efw_imag,
            &mut out_buf,
            &mut output,
            &mut x_buf,
            &mut d_buf_noisy,
            None,
            0,
        );
        // The newer half should have moved into the older half's slot.
        assert_eq!(x_buf[0], PART_LEN as i16);
    }
}
