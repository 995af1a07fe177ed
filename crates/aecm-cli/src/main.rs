//! Runs a far-end/near-end WAV pair through [`aecm::AecMobile`] and writes
//! the echo-suppressed result to a third WAV file, for manual auditioning
//! of the canceller against real recordings.

use std::path::PathBuf;

use aecm::{AecMobile, Config, EchoMode, SampleRate};
use anyhow::{Context, bail};
use clap::Parser;

/// Feed a far-end (loudspeaker) and near-end (microphone) WAV recording
/// through the mobile echo canceller and write the suppressed output.
#[derive(Debug, Parser)]
struct Args {
    /// WAV file of the signal about to be played through the loudspeaker.
    far: PathBuf,
    /// WAV file of the microphone capture containing that echo.
    near: PathBuf,
    /// Where to write the echo-suppressed near-end signal.
    out: PathBuf,
    /// Suppression-strength preset.
    #[arg(long, value_parser = parse_echo_mode, default_value = "mid-high")]
    echo_mode: EchoMode,
    /// Disable comfort-noise injection in suppressed regions.
    #[arg(long)]
    no_comfort_noise: bool,
    /// Assumed sound-card playout latency, reported to the canceller on
    /// every call.
    #[arg(long, default_value_t = 40)]
    ms_in_sndcard_buf: i16,
}

fn parse_echo_mode(s: &str) -> Result<EchoMode, String> {
    match s {
        "low" => Ok(EchoMode::Low),
        "low-mid" => Ok(EchoMode::LowMid),
        "mid" => Ok(EchoMode::Mid),
        "mid-high" => Ok(EchoMode::MidHigh),
        "high" => Ok(EchoMode::High),
        other => Err(format!("unknown echo mode {other:?} (expected low|low-mid|mid|mid-high|high)")),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let far_reader = hound::WavReader::open(&args.far).context("opening far-end WAV")?;
    let near_reader = hound::WavReader::open(&args.near).context("opening near-end WAV")?;

    let far_spec = far_reader.spec();
    let near_spec = near_reader.spec();
    if far_spec.sample_rate != near_spec.sample_rate {
        bail!(
            "far-end ({} Hz) and near-end ({} Hz) sample rates must match",
            far_spec.sample_rate,
            near_spec.sample_rate
        );
    }
    let sample_rate = SampleRate::try_from(far_spec.sample_rate)
        .with_context(|| format!("unsupported sample rate {}", far_spec.sample_rate))?;
    let frame_len = match sample_rate {
        SampleRate::Narrowband8k => 80,
        SampleRate::Wideband16k => 160,
    };

    let far_samples: Vec<i16> = far_reader.into_samples::<i16>().collect::<Result<_, _>>()?;
    let near_samples: Vec<i16> = near_reader.into_samples::<i16>().collect::<Result<_, _>>()?;
    let n_frames = far_samples.len().min(near_samples.len()) / frame_len;
    tracing::info!(
        n_frames,
        frame_len,
        sample_rate_hz = far_spec.sample_rate,
        "processing recording"
    );

    let mut aecm = AecMobile::new();
    aecm.init(sample_rate)?;
    aecm.set_config(Config { cng_mode: !args.no_comfort_noise, echo_mode: args.echo_mode })?;

    let out_spec = hound::WavSpec {
        channels: 1,
        sample_rate: far_spec.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&args.out, out_spec).context("creating output WAV")?;

    let mut out_frame = vec![0i16; frame_len];
    for frame in 0..n_frames {
        let start = frame * frame_len;
        let far_frame = &far_samples[start..start + frame_len];
        let near_frame = &near_samples[start..start + frame_len];

        aecm.buffer_farend(far_frame)?;
        aecm.process(near_frame, None, &mut out_frame, args.ms_in_sndcard_buf)?;

        for &sample in &out_frame {
            writer.write_sample(sample)?;
        }
    }

    writer.finalize().context("finalizing output WAV")?;
    tracing::info!(path = %args.out.display(), "wrote echo-suppressed output");
    Ok(())
}
