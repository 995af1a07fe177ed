#![doc = include_str!("../README.md")]

mod channel;
mod comfort_noise;
mod energies;
mod far_history;
mod spl;
mod suppression;
mod tables;
mod transform;

use aecm_delay_estimator::{DelayEstimator, DelayEstimatorFarend};
use aecm_fft::RealFft;
use far_history::FarHistory;
use thiserror::Error;

/// Samples per partition: the engine processes one of these per call to
/// [`AecmCore::process_block`].
pub const PART_LEN: usize = 64;
/// Unique FFT coefficients for a `PART_LEN`-sample real transform.
pub const PART_LEN1: usize = PART_LEN + 1;
/// `PART_LEN * 2`: length of the half-overlapped time buffers.
pub const PART_LEN2: usize = PART_LEN * 2;
const PART_LEN_SHIFT: i16 = 7;

/// Number of delay hypotheses the far-end spectrum history covers.
pub const MAX_DELAY: usize = 100;
/// History length of the per-block energy logs.
const MAX_BUF_LEN: usize = 64;

const CONV_LEN: u32 = 512;
const CONV_LEN2: u32 = CONV_LEN * 2;

const FAR_ENERGY_MIN: i16 = 1025;
const FAR_ENERGY_DIFF: i16 = 929;
const ENERGY_DEV_OFFSET: i16 = 0;
const ENERGY_DEV_TOL: i16 = 400;
const FAR_ENERGY_VAD_REGION: i16 = 230;

const MU_MIN: i16 = 10;
const MU_MAX: i16 = 1;
const MU_DIFF: i16 = 9;

const MIN_MSE_COUNT: i16 = 20;
const MIN_MSE_DIFF: i32 = 29;
const MSE_RESOLUTION: i32 = 5;
const RESOLUTION_CHANNEL16: i16 = 12;
const RESOLUTION_CHANNEL32: i16 = 28;
const CHANNEL_VAD: u16 = 16;

const RESOLUTION_SUPGAIN: i16 = 8;
const SUPGAIN_DEFAULT: i16 = 1 << RESOLUTION_SUPGAIN;
const SUPGAIN_ERROR_PARAM_A: i16 = 3072;
const SUPGAIN_ERROR_PARAM_B: i16 = 1536;
const SUPGAIN_ERROR_PARAM_D: i16 = SUPGAIN_DEFAULT;
const SUPGAIN_EPC_DT: i16 = 200;

const ONE_Q14: i16 = 1 << 14;
const NLP_COMP_LOW: i16 = 3277;
const NLP_COMP_HIGH: i16 = ONE_Q14;

const K_MIN_PREF_BAND: usize = 4;
const K_MAX_PREF_BAND: usize = 24;

const K_NOISE_EST_Q_DOMAIN: i16 = 15;
const K_NOISE_EST_INC_COUNT: i16 = 5;

/// Errors raised while building or driving [`AecmCore`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("sample rate must be 8000 or 16000 Hz, got {0}")]
    UnsupportedSampleRate(u32),
    #[error("delay estimator rejected the far-end spectrum")]
    FarSpectrumRejected,
    #[error("delay estimator failed to process the near-end spectrum")]
    DelayEstimationFailed,
}

/// The per-block preset selected by `echoMode`: right- or left-shifts the
/// suppression-gain parameter set to trade echo suppression strength
/// against near-end speech distortion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoMode {
    Low,
    LowMid,
    Mid,
    MidHigh,
    High,
}

impl EchoMode {
    fn shift(self) -> i16 {
        match self {
            EchoMode::Low => -3,
            EchoMode::LowMid => -2,
            EchoMode::Mid => -1,
            EchoMode::MidHigh => 0,
            EchoMode::High => 1,
        }
    }
}

impl Default for EchoMode {
    fn default() -> Self {
        EchoMode::MidHigh
    }
}

fn shift_w16(value: i16, shift: i16) -> i16 {
    if shift >= 0 { value.wrapping_shl(shift as u32) } else { value >> (-shift) as u32 }
}

/// The per-block acoustic echo cancellation engine.
///
/// Consumes one aligned `PART_LEN`-sample (64-sample) block each of far-end
/// and near-end signal at a time and returns the echo-suppressed near-end
/// block. Ported from `WebRtcAecm_ProcessBlock` and its callees in
/// `modules/audio_processing/aecm/aecm_core.c`.
#[derive(Debug)]
pub struct AecmCore {
    mult: i16,
    fft: RealFft,
    delay_estimator_farend: DelayEstimatorFarend,
    delay_estimator: DelayEstimator,
    far_history: FarHistory,

    channel_stored: [i16; PART_LEN1],
    channel_adapt_16: [i16; PART_LEN1],
    channel_adapt_32: [i32; PART_LEN1],

    x_buf: [i16; PART_LEN2],
    d_buf_noisy: [i16; PART_LEN2],
    d_buf_clean: [i16; PART_LEN2],
    out_buf: [i16; PART_LEN],

    near_log_energy: [i16; MAX_BUF_LEN],
    far_log_energy: i16,
    echo_adapt_log_energy: [i16; MAX_BUF_LEN],
    echo_stored_log_energy: [i16; MAX_BUF_LEN],

    noise_est: [i32; PART_LEN1],
    noise_est_too_low_ctr: [i16; PART_LEN1],
    noise_est_too_high_ctr: [i16; PART_LEN1],
    noise_est_ctr: i16,

    mse_adapt_old: i32,
    mse_stored_old: i32,
    mse_threshold: i32,
    mse_channel_count: i16,

    far_energy_min: i16,
    far_energy_max: i16,
    far_energy_max_min: i16,
    far_energy_vad: i16,
    far_energy_mse: i16,
    vad_update_count: i16,
    current_vad_value: bool,
    first_vad: bool,

    sup_gain: i16,
    sup_gain_old: i16,
    sup_gain_err_param_a: i16,
    sup_gain_err_param_d: i16,
    sup_gain_err_param_diff_ab: i16,
    sup_gain_err_param_diff_bd: i16,

    echo_filt: [i32; PART_LEN1],
    near_filt: [i16; PART_LEN1],

    dfa_noisy_q_domain: i16,
    dfa_noisy_q_domain_old: i16,
    dfa_clean_q_domain: i16,
    dfa_clean_q_domain_old: i16,

    tot_count: u32,
    startup_state: i16,

    seed: u32,

    cng_mode: bool,
    nlp_flag: bool,
    fixed_delay: i32,
}

impl AecmCore {
    /// Builds a new engine for the given sample rate (`8000` or `16000`
    /// Hz). Wideband (`16000`) runs two partitions per 10 ms frame
    /// (`mult = 2`) and additionally caps the upper-band Wiener gain.
    pub fn new(sample_rate_hz: u32) -> Result<Self, Error> {
        let mult = match sample_rate_hz {
            8000 => 1,
            16000 => 2,
            other => return Err(Error::UnsupportedSampleRate(other)),
        };

        let fft = RealFft::new(PART_LEN_SHIFT as u32).expect("PART_LEN_SHIFT is a valid order");
        let delay_estimator_farend = DelayEstimatorFarend::new(PART_LEN1, MAX_DELAY)
            .expect("PART_LEN1 covers the fixed thresholding band");
        let delay_estimator = DelayEstimator::new(&delay_estimator_farend, 0);

        let channel_stored = if mult == 1 {
            tables::KCHANNEL_STORED_8KHZ
        } else {
            tables::KCHANNEL_STORED_16KHZ
        };
        let mut channel_adapt_32 = [0i32; PART_LEN1];
        for (dst, &src) in channel_adapt_32.iter_mut().zip(channel_stored.iter()) {
            *dst = i32::from(src) << 16;
        }

        // Shape the initial noise level to an approximate pink noise.
        let mut noise_est = [0i32; PART_LEN1];
        let mut tmp32 = (PART_LEN1 * PART_LEN1) as i32;
        let mut tmp16 = PART_LEN1 as i16;
        let mut i = 0usize;
        while i < (PART_LEN1 >> 1) - 1 {
            noise_est[i] = tmp32 << 8;
            tmp16 -= 1;
            tmp32 -= i32::from((tmp16 << 1) + 1);
            i += 1;
        }
        while i < PART_LEN1 {
            noise_est[i] = tmp32 << 8;
            i += 1;
        }

        let mut core = Self {
            mult,
            fft,
            delay_estimator_farend,
            delay_estimator,
            far_history: FarHistory::new(),
            channel_stored,
            channel_adapt_16: channel_stored,
            channel_adapt_32,
            x_buf: [0; PART_LEN2],
            d_buf_noisy: [0; PART_LEN2],
            d_buf_clean: [0; PART_LEN2],
            out_buf: [0; PART_LEN],
            near_log_energy: [0; MAX_BUF_LEN],
            far_log_energy: 0,
            echo_adapt_log_energy: [0; MAX_BUF_LEN],
            echo_stored_log_energy: [0; MAX_BUF_LEN],
            noise_est,
            noise_est_too_low_ctr: [0; PART_LEN1],
            noise_est_too_high_ctr: [0; PART_LEN1],
            noise_est_ctr: 0,
            mse_adapt_old: 1000,
            mse_stored_old: 1000,
            mse_threshold: i32::MAX,
            mse_channel_count: 0,
            far_energy_min: 32767,
            far_energy_max: -32768,
            far_energy_max_min: 0,
            far_energy_vad: FAR_ENERGY_MIN,
            far_energy_mse: 0,
            vad_update_count: 0,
            current_vad_value: false,
            first_vad: true,
            sup_gain: SUPGAIN_DEFAULT,
            sup_gain_old: SUPGAIN_DEFAULT,
            sup_gain_err_param_a: SUPGAIN_ERROR_PARAM_A,
            sup_gain_err_param_d: SUPGAIN_ERROR_PARAM_D,
            sup_gain_err_param_diff_ab: SUPGAIN_ERROR_PARAM_A - SUPGAIN_ERROR_PARAM_B,
            sup_gain_err_param_diff_bd: SUPGAIN_ERROR_PARAM_B - SUPGAIN_ERROR_PARAM_D,
            echo_filt: [0; PART_LEN1],
            near_filt: [0; PART_LEN1],
            dfa_noisy_q_domain: 0,
            dfa_noisy_q_domain_old: 0,
            dfa_clean_q_domain: 0,
            dfa_clean_q_domain_old: 0,
            tot_count: 0,
            startup_state: 0,
            seed: 666,
            cng_mode: true,
            nlp_flag: true,
            fixed_delay: -1,
        };
        core.recompute_sup_gain_params(EchoMode::MidHigh);
        tracing::info!(sample_rate_hz, mult, "aecm-core initialized");
        Ok(core)
    }

    /// Overrides the delay estimate used by every subsequent block instead
    /// of the binary-spectrum search; pass `None` to resume auto-estimation.
    /// Also toggles whether non-linear processing is applied on top of the
    /// Wiener mask.
    pub fn control(&mut self, nlp_enabled: bool, fixed_delay: Option<u32>) {
        self.nlp_flag = nlp_enabled;
        self.fixed_delay = fixed_delay.map_or(-1, |d| d as i32);
    }

    /// Replaces the stored echo path with `echo_path` (`PART_LEN1` Q12
    /// samples), resetting the adaptive channel and MSE arbitration state
    /// to match.
    pub fn init_echo_path(&mut self, echo_path: &[i16; PART_LEN1]) {
        self.channel_stored = *echo_path;
        self.channel_adapt_16 = *echo_path;
        for (dst, &src) in self.channel_adapt_32.iter_mut().zip(echo_path.iter()) {
            *dst = i32::from(src) << 16;
        }
        self.mse_adapt_old = 1000;
        self.mse_stored_old = 1000;
        self.mse_threshold = i32::MAX;
        self.mse_channel_count = 0;
        tracing::debug!("echo path reinitialized");
    }

    /// The current stored echo-path channel, `PART_LEN1` Q12 samples.
    pub fn echo_path(&self) -> &[i16; PART_LEN1] {
        &self.channel_stored
    }

    /// Selects one of the five suppression-strength presets.
    pub fn set_echo_mode(&mut self, mode: EchoMode) {
        self.recompute_sup_gain_params(mode);
        tracing::debug!(?mode, "echo mode changed");
    }

    /// Enables or disables comfort-noise injection in suppressed regions.
    pub fn set_cng_mode(&mut self, enabled: bool) {
        self.cng_mode = enabled;
    }

    fn recompute_sup_gain_params(&mut self, mode: EchoMode) {
        let shift = mode.shift();
        self.sup_gain = shift_w16(SUPGAIN_DEFAULT, shift);
        self.sup_gain_old = self.sup_gain;
        self.sup_gain_err_param_a = shift_w16(SUPGAIN_ERROR_PARAM_A, shift);
        self.sup_gain_err_param_d = shift_w16(SUPGAIN_ERROR_PARAM_D, shift);
        let param_b = shift_w16(SUPGAIN_ERROR_PARAM_B, shift);
        self.sup_gain_err_param_diff_ab = self.sup_gain_err_param_a - param_b;
        self.sup_gain_err_param_diff_bd = param_b - self.sup_gain_err_param_d;
    }

    /// Processes one `PART_LEN`-sample block, writing the echo-suppressed
    /// result to `output`. `near_clean` is an optional pre-noise-suppressed
    /// near-end signal used only for the energy tracking that seeds the
    /// Wiener filter's target; when absent, `near_noisy` stands in for it.
    ///
    /// Ported from `WebRtcAecm_ProcessBlock`.
    pub fn process_block(
        &mut self,
        far: &[i16; PART_LEN],
        near_noisy: &[i16; PART_LEN],
        near_clean: Option<&[i16; PART_LEN]>,
        output: &mut [i16; PART_LEN],
    ) -> Result<(), Error> {
        if self.startup_state < 2 {
            self.startup_state =
                i16::from(self.tot_count >= CONV_LEN) + i16::from(self.tot_count >= CONV_LEN2);
        }

        self.x_buf[PART_LEN..].copy_from_slice(far);
        self.d_buf_noisy[PART_LEN..].copy_from_slice(near_noisy);
        if let Some(clean) = near_clean {
            self.d_buf_clean[PART_LEN..].copy_from_slice(clean);
        }

        let mut dfw = [0i16; PART_LEN2 + 2];
        let mut xfa = [0u16; PART_LEN1];
        let (far_q_shift, _xfa_sum) =
            transform::time_to_frequency_domain(&self.fft, &self.x_buf, &mut dfw, &mut xfa);
        let far_q = i32::from(far_q_shift);

        let mut dfa_noisy = [0u16; PART_LEN1];
        let (noisy_q, dfa_noisy_sum) =
            transform::time_to_frequency_domain(&self.fft, &self.d_buf_noisy, &mut dfw, &mut dfa_noisy);
        self.dfa_noisy_q_domain_old = self.dfa_noisy_q_domain;
        self.dfa_noisy_q_domain = noisy_q;

        let mut dfa_clean_buf = [0u16; PART_LEN1];
        let ptr_dfa_clean: &[u16; PART_LEN1];
        if near_clean.is_none() {
            self.dfa_clean_q_domain_old = self.dfa_noisy_q_domain_old;
            self.dfa_clean_q_domain = self.dfa_noisy_q_domain;
            ptr_dfa_clean = &dfa_noisy;
        } else {
            let (clean_q, _clean_sum) =
                transform::time_to_frequency_domain(&self.fft, &self.d_buf_clean, &mut dfw, &mut dfa_clean_buf);
            self.dfa_clean_q_domain_old = self.dfa_clean_q_domain;
            self.dfa_clean_q_domain = clean_q;
            ptr_dfa_clean = &dfa_clean_buf;
        }

        self.far_history.update(&xfa, far_q);
        self.delay_estimator_farend
            .add_far_spectrum(&xfa, far_q as u32)
            .map_err(|_| Error::FarSpectrumRejected)?;
        let mut delay = self
            .delay_estimator
            .process(&self.delay_estimator_farend, &dfa_noisy, noisy_q as u32)
            .map_err(|_| Error::DelayEstimationFailed)?;
        if delay == -2 {
            // Unknown delay: assume zero until lookahead gives a real estimate.
            delay = 0;
        }
        if self.fixed_delay >= 0 {
            delay = self.fixed_delay;
        }

        let (far_spectrum, aligned_far_q) = self.far_history.aligned(delay);
        let far_spectrum = *far_spectrum;
        let zeros_x_buf = aligned_far_q as i16;

        let mut echo_est = [0i32; PART_LEN1];
        self.calc_energies(&far_spectrum, zeros_x_buf, dfa_noisy_sum, &mut echo_est);

        let mu = self.calc_step_size();
        self.tot_count += 1;

        self.update_channel(&far_spectrum, zeros_x_buf, &dfa_noisy, mu, &mut echo_est);
        let sup_gain = self.calc_suppression_gain();

        let mut hnl = [0i16; PART_LEN1];
        let mut efw_real = [0i16; PART_LEN1];
        let mut efw_imag = [0i16; PART_LEN1];
        suppression::wiener_and_nlp(
            self,
            &echo_est,
            sup_gain,
            zeros_x_buf,
            &dfw,
            ptr_dfa_clean,
            &mut hnl,
            &mut efw_real,
            &mut efw_imag,
        );

        if self.cng_mode {
            comfort_noise::comfort_noise(self, ptr_dfa_clean, &hnl, &mut efw_real, &mut efw_imag);
        }

        let dfa_clean_q_domain = self.dfa_clean_q_domain;
        let d_buf_clean_arg = if near_clean.is_some() { Some(&mut self.d_buf_clean) } else { None };
        transform::inverse_fft_and_window(
            &self.fft,
            &efw_real,
            &efw_imag,
            &mut self.out_buf,
            output,
            &mut self.x_buf,
            &mut self.d_buf_noisy,
            d_buf_clean_arg,
            dfa_clean_q_domain,
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_sample_rates() {
        assert_eq!(AecmCore::new(11025), Err(Error::UnsupportedSampleRate(11025)));
    }

    #[test]
    fn narrowband_seeds_the_8khz_echo_path() {
        let core = AecmCore::new(8000).unwrap();
        assert_eq!(core.echo_path(), &tables::KCHANNEL_STORED_8KHZ);
    }

    #[test]
    fn wideband_seeds_the_16khz_echo_path() {
        let core = AecmCore::new(16000).unwrap();
        assert_eq!(core.echo_path(), &tables::KCHANNEL_STORED_16KHZ);
    }

    #[test]
    fn echo_path_round_trips_through_init() {
        let mut core = AecmCore::new(8000).unwrap();
        let mut custom = [0i16; PART_LEN1];
        for (i, slot) in custom.iter_mut().enumerate() {
            *slot = i as i16 * 7;
        }
        core.init_echo_path(&custom);
        assert_eq!(core.echo_path(), &custom);
    }

    #[test]
    fn silence_in_silence_out_after_processing_a_block() {
        let mut core = AecmCore::new(8000).unwrap();
        let far = [0i16; PART_LEN];
        let near = [0i16; PART_LEN];
        let mut output = [0i16; PART_LEN];
        core.process_block(&far, &near, None, &mut output).unwrap();
        assert!(output.iter().all(|&s| s.abs() < 100));
    }
}
