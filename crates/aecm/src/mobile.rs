use aecm_core::{AecmCore, EchoMode, PART_LEN, PART_LEN1};
use aecm_ring_buffer::RingBuffer;

use crate::config::{Config, SampleRate};
use crate::error::{Error, ProcessOutcome};

/// Samples in one 10 ms half-frame at narrowband rate; also the unit the
/// far-end FIFO is read and written in. Ported from `FRAME_LEN`.
pub const FRAME_LEN: usize = 80;
/// Far-end FIFO depth, in 10 ms narrowband frames. Ported from
/// `BUF_SIZE_FRAMES`.
const BUF_SIZE_FRAMES: usize = 50;
/// Samples per millisecond at narrowband rate; scaled by `mult` for
/// wideband. Ported from `kSampMsNb`.
const K_SAMP_MS_NB: i32 = 8;
/// Capacity of the per-frame regrouping FIFOs: one frame plus one spare
/// block, enough to carry the `FRAME_LEN % PART_LEN` remainder across
/// calls. Ported from `WebRtcAecm_CreateCore`'s `farFrameBuf` sizing.
const FRAME_REGROUP_LEN: usize = FRAME_LEN + PART_LEN;

fn clamp_ms_in_sndcard_buf(ms: i16) -> (i16, bool) {
    if ms < 0 {
        (0, true)
    } else if ms > 500 {
        (500, true)
    } else {
        (ms, false)
    }
}

/// The public handle for a single mobile acoustic echo canceller instance.
///
/// Wraps [`AecmCore`]'s per-block engine with 10 ms framing, a far-end
/// FIFO, startup buffer-fill detection, and sound-card delay
/// compensation. Ported from `AecMobile` and
/// `WebRtcAecm_Create`/`Init`/`BufferFarend`/`Process`/`set_config`/
/// `InitEchoPath`/`GetEchoPath`/`EstBufDelay`/`DelayComp`.
#[derive(Debug)]
pub struct AecMobile {
    core: Option<AecmCore>,
    sample_rate: SampleRate,
    config: Config,

    farend_buf: RingBuffer<i16>,
    far_frame_buf: RingBuffer<i16>,
    near_noisy_frame_buf: RingBuffer<i16>,
    near_clean_frame_buf: RingBuffer<i16>,
    out_frame_buf: RingBuffer<i16>,
    farend_old: [[i16; FRAME_LEN]; 2],

    // Startup buffer-fill state.
    ec_startup: bool,
    check_buff_size: bool,
    buf_size_start: i16,
    counter: i16,
    sum: i32,
    first_val: i16,
    check_buf_size_ctr: i16,

    // Delay-tracking state.
    ms_in_sndcard_buf: i16,
    filt_delay: i16,
    known_delay: i32,
    last_delay_diff: i16,
    time_for_delay_change: i32,

    initialized: bool,
}

impl AecMobile {
    /// `create()`: allocates an uninitialized handle. Call [`Self::init`]
    /// before [`Self::buffer_farend`] or [`Self::process`].
    pub fn new() -> Self {
        Self {
            core: None,
            sample_rate: SampleRate::Narrowband8k,
            config: Config::default(),
            farend_buf: RingBuffer::new(BUF_SIZE_FRAMES * FRAME_LEN),
            far_frame_buf: RingBuffer::new(FRAME_REGROUP_LEN),
            near_noisy_frame_buf: RingBuffer::new(FRAME_REGROUP_LEN),
            near_clean_frame_buf: RingBuffer::new(FRAME_REGROUP_LEN),
            out_frame_buf: RingBuffer::new(FRAME_REGROUP_LEN),
            farend_old: [[0; FRAME_LEN]; 2],
            ec_startup: true,
            check_buff_size: true,
            buf_size_start: 0,
            counter: 0,
            sum: 0,
            first_val: 0,
            check_buf_size_ctr: 0,
            ms_in_sndcard_buf: 0,
            filt_delay: 0,
            known_delay: 0,
            last_delay_diff: 0,
            time_for_delay_change: 0,
            initialized: false,
        }
    }

    /// `init(handle, sample_rate)`: (re)initializes the engine for
    /// `sample_rate`, discarding any prior state. Idempotent: calling
    /// `init` twice in a row yields the same state as calling it once.
    pub fn init(&mut self, sample_rate: SampleRate) -> Result<(), Error> {
        self.core = Some(
            AecmCore::new(sample_rate.hz())
                .map_err(|e| Error::Unspecified { reason: e.to_string() })?,
        );
        self.sample_rate = sample_rate;

        self.farend_buf.init();
        self.far_frame_buf.init();
        self.near_noisy_frame_buf.init();
        self.near_clean_frame_buf.init();
        self.out_frame_buf.init();
        self.farend_old = [[0; FRAME_LEN]; 2];

        self.ec_startup = true;
        self.check_buff_size = true;
        self.buf_size_start = 0;
        self.counter = 0;
        self.sum = 0;
        self.first_val = 0;
        self.check_buf_size_ctr = 0;

        self.ms_in_sndcard_buf = 0;
        self.filt_delay = 0;
        self.known_delay = 0;
        self.last_delay_diff = 0;
        self.time_for_delay_change = 0;

        self.initialized = true;
        self.set_config(Config::default())?;
        tracing::info!(sample_rate_hz = sample_rate.hz(), "AecMobile initialized");
        Ok(())
    }

    fn core_mut(&mut self) -> Result<&mut AecmCore, Error> {
        self.core.as_mut().ok_or(Error::Uninitialized)
    }

    fn require_initialized(&self) -> Result<(), Error> {
        if self.initialized { Ok(()) } else { Err(Error::Uninitialized) }
    }

    /// `set_config`: applies `cngMode`/`echoMode`. The only remaining
    /// validity check (the typed [`EchoMode`] enum already rules out
    /// out-of-range values) is that the handle has been initialized.
    pub fn set_config(&mut self, config: Config) -> Result<(), Error> {
        self.require_initialized()?;
        let core = self.core_mut()?;
        core.set_cng_mode(config.cng_mode);
        core.set_echo_mode(config.echo_mode);
        self.config = config;
        Ok(())
    }

    /// `echo_path_size_bytes()`: size in bytes of the persisted echo-path
    /// artifact (`PART_LEN1` little-endian `i16` samples).
    pub const fn echo_path_size_bytes() -> usize {
        PART_LEN1 * core::mem::size_of::<i16>()
    }

    /// `init_echo_path(handle, bytes)`: overwrites the stored echo path
    /// with a previously-saved one (see [`Self::echo_path`]), little-endian
    /// encoded, resetting the adaptive channel and MSE arbitration state.
    pub fn init_echo_path(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.require_initialized()?;
        if bytes.len() != Self::echo_path_size_bytes() {
            return Err(Error::BadParameter {
                reason: format!(
                    "echo path must be {} bytes, got {}",
                    Self::echo_path_size_bytes(),
                    bytes.len()
                ),
            });
        }
        let mut echo_path = [0i16; PART_LEN1];
        for (dst, chunk) in echo_path.iter_mut().zip(bytes.chunks_exact(2)) {
            *dst = i16::from_le_bytes([chunk[0], chunk[1]]);
        }
        self.core_mut()?.init_echo_path(&echo_path);
        Ok(())
    }

    /// `get_echo_path(handle, out)`: writes the current stored echo path,
    /// little-endian encoded, to `out` (must be
    /// [`Self::echo_path_size_bytes`] long).
    pub fn get_echo_path(&mut self, out: &mut [u8]) -> Result<(), Error> {
        self.require_initialized()?;
        if out.len() != Self::echo_path_size_bytes() {
            return Err(Error::BadParameter {
                reason: format!(
                    "echo path output must be {} bytes, got {}",
                    Self::echo_path_size_bytes(),
                    out.len()
                ),
            });
        }
        let echo_path = *self.core_mut()?.echo_path();
        for (dst, &sample) in out.chunks_exact_mut(2).zip(echo_path.iter()) {
            dst.copy_from_slice(&sample.to_le_bytes());
        }
        Ok(())
    }

    /// `buffer_farend(handle, samples)`: appends a far-end frame
    /// (`samples.len() ∈ {80, 160}`) to the FIFO. Once the engine has left
    /// startup, this first runs [`Self::delay_comp`] to stuff the FIFO if
    /// the estimated sound-card delay has drifted too far to compensate
    /// internally.
    pub fn buffer_farend(&mut self, samples: &[i16]) -> Result<(), Error> {
        self.require_initialized()?;
        if samples.len() != 80 && samples.len() != 160 {
            return Err(Error::BadParameter {
                reason: format!("far-end frame must be 80 or 160 samples, got {}", samples.len()),
            });
        }
        if !self.ec_startup {
            self.delay_comp();
        }
        self.farend_buf.write(samples);
        Ok(())
    }

    /// `process(handle, near_noisy, near_clean, out, ms_in_sndcard_buf)`:
    /// runs one 10 ms frame (`near_noisy.len() ∈ {80, 160}`, matching
    /// `out.len()` and, if present, `near_clean.len()`) through the
    /// canceller. `ms_in_sndcard_buf` is the caller's estimate of
    /// audio-hardware playout latency in milliseconds; out-of-range values
    /// are clamped to `[0, 500]` and reported as
    /// [`ProcessOutcome::ClampedLatency`] rather than aborting the call.
    pub fn process(
        &mut self,
        near_noisy: &[i16],
        near_clean: Option<&[i16]>,
        out: &mut [i16],
        ms_in_sndcard_buf: i16,
    ) -> Result<ProcessOutcome, Error> {
        self.require_initialized()?;
        let n = near_noisy.len();
        if n != 80 && n != 160 {
            return Err(Error::BadParameter {
                reason: format!("near-end frame must be 80 or 160 samples, got {n}"),
            });
        }
        if out.len() != n {
            return Err(Error::BadParameter { reason: "output length must match input length".into() });
        }
        if let Some(clean) = near_clean {
            if clean.len() != n {
                return Err(Error::BadParameter {
                    reason: "clean near-end length must match input length".into(),
                });
            }
        }

        let (clamped, warned) = clamp_ms_in_sndcard_buf(ms_in_sndcard_buf);
        if warned {
            tracing::warn!(ms_in_sndcard_buf, "clamped sound-card latency hint to [0, 500] ms");
        }
        self.ms_in_sndcard_buf = clamped + 10;

        let mult = self.sample_rate.mult();
        let n_frames = n / FRAME_LEN;
        let n_blocks_10ms = (n_frames as i32 / mult).max(1);

        if self.ec_startup {
            let source = near_clean.unwrap_or(near_noisy);
            out.copy_from_slice(source);
            self.run_startup(n_blocks_10ms);
        } else {
            for i in 0..n_frames {
                let far_frame = self.take_farend_frame(i);

                if (i == 0 && matches!(self.sample_rate, SampleRate::Narrowband8k))
                    || (i == 1 && matches!(self.sample_rate, SampleRate::Wideband16k))
                {
                    self.est_buf_delay(self.ms_in_sndcard_buf);
                }

                let near_noisy_frame = &near_noisy[i * FRAME_LEN..(i + 1) * FRAME_LEN];
                let near_clean_frame = near_clean.map(|c| &c[i * FRAME_LEN..(i + 1) * FRAME_LEN]);
                let out_frame = &mut out[i * FRAME_LEN..(i + 1) * FRAME_LEN];

                self.process_frame(&far_frame, near_noisy_frame, near_clean_frame, out_frame)?;
            }
        }

        Ok(if warned { ProcessOutcome::ClampedLatency } else { ProcessOutcome::Ok })
    }

    /// Reads one `FRAME_LEN`-sample far-end frame from the FIFO, falling
    /// back to replaying the last good frame at index `slot` when the FIFO
    /// has run dry. Ported from the `farend`/`farendOld` fallback in
    /// `WebRtcAecm_Process`.
    fn take_farend_frame(&mut self, slot: usize) -> [i16; FRAME_LEN] {
        let available_frames = self.farend_buf.available_read() / FRAME_LEN;
        if available_frames > 0 {
            let mut scratch = [0i16; FRAME_LEN];
            let read = self.farend_buf.read(FRAME_LEN, &mut scratch);
            let mut frame = [0i16; FRAME_LEN];
            frame.copy_from_slice(read.as_slice());
            self.farend_old[slot] = frame;
            frame
        } else {
            self.farend_old[slot]
        }
    }

    /// Regroups one `FRAME_LEN`-sample frame into `PART_LEN`-sample
    /// blocks, running each through [`AecmCore::process_block`], then
    /// drains exactly one `FRAME_LEN`-sample output frame (stuffing with
    /// zeros if the output FIFO is short, which only happens on the very
    /// first frame). Ported from `WebRtcAecm_ProcessFrame`.
    fn process_frame(
        &mut self,
        far_frame: &[i16; FRAME_LEN],
        near_noisy_frame: &[i16],
        near_clean_frame: Option<&[i16]>,
        out_frame: &mut [i16],
    ) -> Result<(), Error> {
        self.far_frame_buf.write(far_frame);
        self.near_noisy_frame_buf.write(near_noisy_frame);
        let clean_present = near_clean_frame.is_some();
        if let Some(clean) = near_clean_frame {
            self.near_clean_frame_buf.write(clean);
        }

        while self.far_frame_buf.available_read() >= PART_LEN {
            let mut far_block = [0i16; PART_LEN];
            let mut scratch = [0i16; PART_LEN];
            far_block.copy_from_slice(self.far_frame_buf.read(PART_LEN, &mut scratch).as_slice());

            let mut near_noisy_block = [0i16; PART_LEN];
            near_noisy_block
                .copy_from_slice(self.near_noisy_frame_buf.read(PART_LEN, &mut scratch).as_slice());

            let near_clean_block = if clean_present {
                let mut block = [0i16; PART_LEN];
                block.copy_from_slice(self.near_clean_frame_buf.read(PART_LEN, &mut scratch).as_slice());
                Some(block)
            } else {
                None
            };

            let mut out_block = [0i16; PART_LEN];
            self.core_mut()?
                .process_block(&far_block, &near_noisy_block, near_clean_block.as_ref(), &mut out_block)
                .map_err(|e| Error::Unspecified { reason: e.to_string() })?;
            self.out_frame_buf.write(&out_block);
        }

        let available = self.out_frame_buf.available_read() as isize;
        if available < FRAME_LEN as isize {
            self.out_frame_buf.move_read_ptr(available - FRAME_LEN as isize);
        }
        let mut scratch = [0i16; FRAME_LEN];
        let read = self.out_frame_buf.read(FRAME_LEN, &mut scratch);
        out_frame.copy_from_slice(read.as_slice());
        Ok(())
    }

    /// Mechanism to ensure the reported sound-card buffer is reasonably
    /// stable before enabling the canceller, then waits for the far-end
    /// FIFO to fill to the size that implies. Ported from the
    /// `ECstartup` branch of `WebRtcAecm_Process`.
    fn run_startup(&mut self, n_blocks_10ms: i32) {
        let nmbr_of_filled_buffers = (self.farend_buf.available_read() / FRAME_LEN) as i16;
        let mult = self.sample_rate.mult();

        if self.check_buff_size {
            self.check_buf_size_ctr += 1;

            if self.counter == 0 {
                self.first_val = self.ms_in_sndcard_buf;
                self.sum = 0;
            }

            let tolerance = (0.2 * f64::from(self.ms_in_sndcard_buf)).max(f64::from(K_SAMP_MS_NB));
            if f64::from((self.first_val - self.ms_in_sndcard_buf).abs()) < tolerance {
                self.sum += i32::from(self.ms_in_sndcard_buf);
                self.counter += 1;
            } else {
                self.counter = 0;
            }

            if i32::from(self.counter) * n_blocks_10ms >= 6 {
                self.buf_size_start =
                    ((3 * self.sum * mult) / (i32::from(self.counter) * 40))
                        .min(BUF_SIZE_FRAMES as i32) as i16;
                self.check_buff_size = false;
            }

            if i32::from(self.check_buf_size_ctr) * n_blocks_10ms > 50 {
                self.buf_size_start =
                    ((3 * i32::from(self.ms_in_sndcard_buf) * mult) / 40).min(BUF_SIZE_FRAMES as i32) as i16;
                self.check_buff_size = false;
            }
        }

        if !self.check_buff_size {
            if nmbr_of_filled_buffers == self.buf_size_start {
                self.ec_startup = false;
            } else if nmbr_of_filled_buffers > self.buf_size_start {
                let excess = self.farend_buf.available_read() as isize
                    - self.buf_size_start as isize * FRAME_LEN as isize;
                self.farend_buf.move_read_ptr(excess);
                self.ec_startup = false;
            }
        }

        if !self.ec_startup {
            tracing::info!("AECM startup cleared, entering steady-state cancellation");
        }
    }

    /// Estimates the sound-card delay and, after 25 blocks of consistent
    /// drift, nudges `knownDelay` towards it. Ported from
    /// `WebRtcAecm_EstBufDelay`.
    fn est_buf_delay(&mut self, ms_in_sndcard_buf: i16) {
        let mult = self.sample_rate.mult();
        let n_samp_far = self.farend_buf.available_read() as i32;
        let n_samp_sndcard = i32::from(ms_in_sndcard_buf) * K_SAMP_MS_NB * mult;

        let mut delay_new = n_samp_sndcard - n_samp_far;
        if delay_new < FRAME_LEN as i32 {
            self.farend_buf.move_read_ptr(FRAME_LEN as isize);
            delay_new += FRAME_LEN as i32;
        }

        self.filt_delay = 0.max((8 * i32::from(self.filt_delay) + 2 * delay_new) / 10) as i16;

        let diff = self.filt_delay - self.known_delay as i16;
        if diff > 224 {
            if self.last_delay_diff < 96 {
                self.time_for_delay_change = 0;
            } else {
                self.time_for_delay_change += 1;
            }
        } else if diff < 96 && self.known_delay > 0 {
            if self.last_delay_diff > 224 {
                self.time_for_delay_change = 0;
            } else {
                self.time_for_delay_change += 1;
            }
        } else {
            self.time_for_delay_change = 0;
        }
        self.last_delay_diff = diff;

        if self.time_for_delay_change > 25 {
            self.known_delay = 0.max(i32::from(self.filt_delay) - 160);
            tracing::debug!(known_delay = self.known_delay, "sound-card delay estimate updated");
        }
    }

    /// Stuffs the far-end FIFO with replayed samples when the gap between
    /// the reported sound-card buffer and the FIFO's contents has grown
    /// larger than the delay estimator's reach (`MAX_DELAY` blocks). This
    /// crate has no counterpart to the original's separate internal
    /// `farBuf`/`knownDelay`-shifted fetch (see `DESIGN.md`); the binary
    /// delay estimator inside [`AecmCore`] can only ever resolve a delay
    /// within its `MAX_DELAY`-block history, so that is the threshold used
    /// here in place of the original's now-vestigial internal buffer size.
    /// Ported from `WebRtcAecm_DelayComp`.
    fn delay_comp(&mut self) {
        let mult = self.sample_rate.mult();
        let n_samp_far = self.farend_buf.available_read() as i32;
        let n_samp_sndcard = i32::from(self.ms_in_sndcard_buf) * K_SAMP_MS_NB * mult;
        let delay_new = n_samp_sndcard - n_samp_far;

        let max_stuff_samp = 10 * FRAME_LEN as i32;
        let reach = (aecm_core::MAX_DELAY * PART_LEN) as i32 - FRAME_LEN as i32 * mult;

        if delay_new > reach {
            let n_samp_add =
                ((n_samp_sndcard >> 1) - n_samp_far).max(FRAME_LEN as i32).min(max_stuff_samp);
            self.farend_buf.move_read_ptr(-(n_samp_add as isize));
            tracing::debug!(n_samp_add, "far-end FIFO stuffed for delay compensation");
        }
    }
}

impl Default for AecMobile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_handle_requires_init() {
        let mut aecm = AecMobile::new();
        assert_eq!(aecm.buffer_farend(&[0i16; 80]), Err(Error::Uninitialized));
        let mut out = [0i16; 80];
        assert_eq!(aecm.process(&[0i16; 80], None, &mut out, 40), Err(Error::Uninitialized));
    }

    #[test]
    fn init_is_idempotent() {
        let mut aecm = AecMobile::new();
        aecm.init(SampleRate::Narrowband8k).unwrap();
        aecm.buffer_farend(&[1i16; 80]).unwrap();
        aecm.init(SampleRate::Narrowband8k).unwrap();
        assert_eq!(aecm.farend_buf.available_read(), 0);
        assert!(aecm.ec_startup);
    }

    #[test]
    fn rejects_wrong_frame_lengths() {
        let mut aecm = AecMobile::new();
        aecm.init(SampleRate::Narrowband8k).unwrap();
        assert!(matches!(aecm.buffer_farend(&[0i16; 79]), Err(Error::BadParameter { .. })));
    }

    #[test]
    fn bypass_during_startup_on_silence() {
        let mut aecm = AecMobile::new();
        aecm.init(SampleRate::Narrowband8k).unwrap();
        let near = [0i16; 80];
        let far = [0i16; 80];
        let mut out = [1i16; 80];
        aecm.buffer_farend(&far).unwrap();
        aecm.process(&near, None, &mut out, 40).unwrap();
        assert_eq!(out, near);
    }

    #[test]
    fn echo_path_round_trips_through_bytes() {
        let mut aecm = AecMobile::new();
        aecm.init(SampleRate::Narrowband8k).unwrap();
        let mut saved = vec![0u8; AecMobile::echo_path_size_bytes()];
        aecm.get_echo_path(&mut saved).unwrap();

        let mut custom = vec![0u8; AecMobile::echo_path_size_bytes()];
        for (i, chunk) in custom.chunks_exact_mut(2).enumerate() {
            chunk.copy_from_slice(&((i as i16) * 3).to_le_bytes());
        }
        aecm.init_echo_path(&custom).unwrap();

        let mut read_back = vec![0u8; AecMobile::echo_path_size_bytes()];
        aecm.get_echo_path(&mut read_back).unwrap();
        assert_eq!(custom, read_back);
    }

    #[test]
    fn init_echo_path_rejects_wrong_size() {
        let mut aecm = AecMobile::new();
        aecm.init(SampleRate::Narrowband8k).unwrap();
        assert!(matches!(aecm.init_echo_path(&[0u8; 4]), Err(Error::BadParameter { .. })));
    }

    #[test]
    fn process_clamps_out_of_range_latency() {
        let mut aecm = AecMobile::new();
        aecm.init(SampleRate::Narrowband8k).unwrap();
        let near = [0i16; 80];
        let mut out = [0i16; 80];
        let outcome = aecm.process(&near, None, &mut out, -5).unwrap();
        assert_eq!(outcome, ProcessOutcome::ClampedLatency);
    }
}
