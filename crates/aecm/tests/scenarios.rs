//! End-to-end scenarios against the public [`AecMobile`] handle, using
//! synthetic far/near signals generated in-process rather than checked-in
//! WAV fixtures.

use aecm::{AecMobile, Config, EchoMode, ProcessOutcome, SampleRate};

const FRAME_LEN: usize = aecm::FRAME_LEN;

/// Small deterministic PRNG (LCG) standing in for a noise source; avoids
/// pulling in a `rand` dependency for synthetic test signals.
struct Lcg(u32);

impl Lcg {
    fn new(seed: u32) -> Self {
        Self(seed)
    }

    fn next_sample(&mut self) -> i16 {
        self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        ((self.0 >> 16) as i16) / 8
    }

    fn fill(&mut self, out: &mut [i16]) {
        for sample in out {
            *sample = self.next_sample();
        }
    }
}

fn rms(samples: &[i16]) -> f64 {
    let sum_sq: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum_sq / samples.len() as f64).sqrt()
}

fn half(sample: i16) -> i16 {
    sample / 2
}

#[test]
fn bypass_on_silence() {
    let mut aecm = AecMobile::new();
    aecm.init(SampleRate::Narrowband8k).unwrap();

    let silence = [0i16; FRAME_LEN];
    let mut out = [1i16; FRAME_LEN];
    for _ in 0..20 {
        aecm.buffer_farend(&silence).unwrap();
        let outcome = aecm.process(&silence, None, &mut out, 40).unwrap();
        assert_eq!(outcome, ProcessOutcome::Ok);
        assert_eq!(out, silence);
    }
}

#[test]
fn first_frame_passes_through_during_startup() {
    let mut aecm = AecMobile::new();
    aecm.init(SampleRate::Narrowband8k).unwrap();

    let mut rng = Lcg::new(42);
    let mut far = [0i16; FRAME_LEN];
    let mut near = [0i16; FRAME_LEN];
    rng.fill(&mut far);
    rng.fill(&mut near);

    let mut out = [0i16; FRAME_LEN];
    aecm.buffer_farend(&far).unwrap();
    aecm.process(&near, None, &mut out, 40).unwrap();
    assert_eq!(out, near);
}

#[test]
fn converges_toward_quieter_output_on_stationary_echo() {
    let mut aecm = AecMobile::new();
    aecm.init(SampleRate::Narrowband8k).unwrap();
    aecm.set_config(Config { cng_mode: false, echo_mode: EchoMode::MidHigh }).unwrap();

    let mut rng = Lcg::new(7);
    let mut far_prev = [0i16; FRAME_LEN];
    let mut out = [0i16; FRAME_LEN];

    let mut early_out = Vec::new();
    let mut late_out = Vec::new();
    let mut late_near = Vec::new();

    const FRAMES: usize = 600;
    for frame_idx in 0..FRAMES {
        let mut far = [0i16; FRAME_LEN];
        rng.fill(&mut far);

        // Near end carries a half-amplitude copy of the *previous* far-end
        // frame, a stationary echo path with a one-frame delay.
        let mut near = [0i16; FRAME_LEN];
        for (n, &f) in near.iter_mut().zip(far_prev.iter()) {
            *n = half(f);
        }

        aecm.buffer_farend(&far).unwrap();
        aecm.process(&near, None, &mut out, 40).unwrap();

        if (100..150).contains(&frame_idx) {
            early_out.extend_from_slice(&out);
        }
        if frame_idx >= FRAMES - 50 {
            late_out.extend_from_slice(&out);
            late_near.extend_from_slice(&near);
        }

        far_prev = far;
    }

    let early_rms = rms(&early_out);
    let late_rms = rms(&late_out);
    let late_near_rms = rms(&late_near);

    assert!(
        late_rms < early_rms,
        "output energy should keep decreasing as the echo path adapts: early={early_rms}, late={late_rms}"
    );
    assert!(
        late_rms < late_near_rms,
        "converged output should be quieter than the raw near-end echo: out={late_rms}, near={late_near_rms}"
    );
}

#[test]
fn double_talk_preserves_near_end_speech() {
    let mut aecm = AecMobile::new();
    aecm.init(SampleRate::Narrowband8k).unwrap();

    let mut rng = Lcg::new(99);
    let mut far_prev = [0i16; FRAME_LEN];
    let mut out = [0i16; FRAME_LEN];

    const FRAMES: usize = 300;
    const SPEECH_AMPLITUDE: f64 = 3000.0;
    const SPEECH_FREQ_HZ: f64 = 300.0;
    const SAMPLE_RATE_HZ: f64 = 8000.0;

    let mut speech_samples = Vec::with_capacity(FRAMES * FRAME_LEN);
    let mut late_out = Vec::new();

    for frame_idx in 0..FRAMES {
        let mut far = [0i16; FRAME_LEN];
        rng.fill(&mut far);

        let mut near = [0i16; FRAME_LEN];
        for (i, n) in near.iter_mut().enumerate() {
            let t = (frame_idx * FRAME_LEN + i) as f64;
            let speech =
                (SPEECH_AMPLITUDE * (2.0 * std::f64::consts::PI * SPEECH_FREQ_HZ * t / SAMPLE_RATE_HZ).sin())
                    as i16;
            speech_samples.push(speech);
            *n = half(far_prev[i]).saturating_add(speech);
        }

        aecm.buffer_farend(&far).unwrap();
        aecm.process(&near, None, &mut out, 40).unwrap();

        if frame_idx >= FRAMES - 100 {
            late_out.extend_from_slice(&out);
        }

        far_prev = far;
    }

    let speech_rms = rms(&speech_samples[speech_samples.len() - late_out.len()..]);
    let out_rms = rms(&late_out);

    assert!(
        out_rms > 0.2 * speech_rms,
        "near-end speech should survive suppression, not be erased: out={out_rms}, speech={speech_rms}"
    );
}

#[test]
fn handles_sustained_farend_lead_without_erroring() {
    let mut aecm = AecMobile::new();
    aecm.init(SampleRate::Narrowband8k).unwrap();

    let mut rng = Lcg::new(1234);

    // Buffer 25 frames of far-end before any near-end arrives, then keep a
    // steady lead for the rest of the run: a persistent sound-card delay.
    let mut lead = Vec::new();
    for _ in 0..25 {
        let mut far = [0i16; FRAME_LEN];
        rng.fill(&mut far);
        aecm.buffer_farend(&far).unwrap();
        lead.push(far);
    }

    let mut out = [0i16; FRAME_LEN];
    for _ in 0..600 {
        let mut far = [0i16; FRAME_LEN];
        rng.fill(&mut far);
        aecm.buffer_farend(&far).unwrap();

        let delayed = lead.remove(0);
        lead.push(far);
        let mut near = [0i16; FRAME_LEN];
        for (n, &f) in near.iter_mut().zip(delayed.iter()) {
            *n = half(f);
        }

        aecm.process(&near, None, &mut out, 160).unwrap();
        assert!(
            out.iter().any(|&s| s != i16::MAX && s != i16::MIN),
            "output should not be permanently saturated"
        );
    }
}

#[test]
fn echo_path_round_trip_is_byte_exact() {
    let mut aecm = AecMobile::new();
    aecm.init(SampleRate::Narrowband8k).unwrap();

    let mut custom = vec![0u8; AecMobile::echo_path_size_bytes()];
    for (i, chunk) in custom.chunks_exact_mut(2).enumerate() {
        chunk.copy_from_slice(&((i as i16) * 7 - 500).to_le_bytes());
    }
    aecm.init_echo_path(&custom).unwrap();

    let mut read_back = vec![0u8; AecMobile::echo_path_size_bytes()];
    aecm.get_echo_path(&mut read_back).unwrap();
    assert_eq!(custom, read_back);

    // The restored path should keep driving the same engine, not reset it.
    let far = [1000i16; FRAME_LEN];
    let near = [500i16; FRAME_LEN];
    let mut out = [0i16; FRAME_LEN];
    aecm.buffer_farend(&far).unwrap();
    aecm.process(&near, None, &mut out, 40).unwrap();

    let mut after = vec![0u8; AecMobile::echo_path_size_bytes()];
    aecm.get_echo_path(&mut after).unwrap();
    assert_eq!(custom, after, "startup frames must not touch the stored echo path yet");
}
