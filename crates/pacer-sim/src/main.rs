//! Pacer simulator - synthetic emulation core driving the audio pipeline
//!
//! Generates a 440Hz tone in frame-sized chunks (about 1/60s of game audio,
//! with jitter) and submits them the way an emulator's audio plugin would.
//! Occupancy, queue length and pacing mode are logged once per second of
//! game time.
//!
//! ## Command line flags
//!
//! - `--null`: Simulated device instead of the default audio output
//! - `--device NAME`: Play on a named output device
//! - `--list-devices`: Print output device names and exit
//! - `--device-speed F`: Simulated device plays at F times the nominal rate
//! - `--seconds N`: Game seconds to produce (default 10)
//! - `--speed P`: Playback speed in percent (default 100)
//! - `--freq HZ`: Game frequency (default from settings)
//! - `--no-stretch`: Fixed-tempo consumer
//! - `--no-limiter`: Do not hold emulation to real time
//! - `--config PATH`: YAML audio settings (default in the user config dir)

use std::f64::consts::TAU;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use rand::Rng;

use pacer_core::config::{default_settings_path, load_settings, MapSettings};
use pacer_core::host::StaticHost;
use pacer_core::sink::{output_device_names, SimulatedSinkFactory};
use pacer_core::timestretch::SignalsmithEngineFactory;
use pacer_core::{AudioPipeline, PipelineBackends, PipelineState};

const TONE_HZ: f64 = 440.0;
const AMPLITUDE: f64 = 0.25;
const VIDEO_RATE: f64 = 60.0;

/// Largest deviation of a chunk from its nominal length, in frames
const JITTER_FRAMES: i64 = 24;

struct Args {
    null_device: bool,
    device: Option<String>,
    list_devices: bool,
    device_speed: f64,
    seconds: f64,
    speed: u32,
    frequency: Option<u32>,
    no_stretch: bool,
    no_limiter: bool,
    config: Option<PathBuf>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            null_device: false,
            device: None,
            list_devices: false,
            device_speed: 1.0,
            seconds: 10.0,
            speed: 100,
            frequency: None,
            no_stretch: false,
            no_limiter: false,
            config: None,
        }
    }
}

fn next_value(iter: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    iter.next()
        .with_context(|| format!("missing value for {}", flag))
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut opts = Args::default();
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--null" => opts.null_device = true,
            "--list-devices" => opts.list_devices = true,
            "--no-stretch" => opts.no_stretch = true,
            "--no-limiter" => opts.no_limiter = true,
            "--device" => opts.device = Some(next_value(&mut iter, &arg)?),
            "--config" => opts.config = Some(PathBuf::from(next_value(&mut iter, &arg)?)),
            "--device-speed" => {
                let raw = next_value(&mut iter, &arg)?;
                opts.device_speed = raw
                    .parse()
                    .with_context(|| format!("invalid --device-speed value `{}`", raw))?;
            }
            "--seconds" => {
                let raw = next_value(&mut iter, &arg)?;
                opts.seconds = raw
                    .parse()
                    .with_context(|| format!("invalid --seconds value `{}`", raw))?;
            }
            "--speed" => {
                let raw = next_value(&mut iter, &arg)?;
                opts.speed = raw
                    .parse()
                    .with_context(|| format!("invalid --speed value `{}`", raw))?;
            }
            "--freq" => {
                let raw = next_value(&mut iter, &arg)?;
                opts.frequency = Some(
                    raw.parse()
                        .with_context(|| format!("invalid --freq value `{}`", raw))?,
                );
            }
            other => bail!("unknown argument `{}`", other),
        }
    }
    Ok(opts)
}

/// Stereo 16-bit tone in the emulated hardware's byte order
struct ToneGenerator {
    phase: f64,
    step: f64,
}

impl ToneGenerator {
    fn new(game_frequency: u32) -> Self {
        Self {
            phase: 0.0,
            step: TAU * TONE_HZ / game_frequency as f64,
        }
    }

    fn fill(&mut self, frames: usize, out: &mut Vec<u8>) {
        out.clear();
        for _ in 0..frames {
            let sample = (self.phase.sin() * AMPLITUDE * i16::MAX as f64) as i16;
            let bytes = sample.to_le_bytes();
            // Right channel first, then left
            out.extend_from_slice(&bytes);
            out.extend_from_slice(&bytes);
            self.phase = (self.phase + self.step) % TAU;
        }
    }
}

fn main() -> Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = parse_args(std::env::args().skip(1))?;

    if args.list_devices {
        for name in output_device_names().context("Failed to enumerate output devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    let config_path = args.config.clone().unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&config_path);
    if args.no_stretch {
        settings.time_stretch_enabled = false;
    }
    let frequency = args.frequency.unwrap_or(settings.default_frequency);

    let backends = if args.null_device {
        log::info!("Using simulated device (speed x{})", args.device_speed);
        PipelineBackends::new(
            Arc::new(SignalsmithEngineFactory::default()),
            Arc::new(SimulatedSinkFactory::new().with_speed(args.device_speed)),
        )
    } else {
        PipelineBackends::signalsmith_cpal(args.device.clone())
    };

    let host = Arc::new(StaticHost::new(!args.no_limiter));
    let mut pipeline = AudioPipeline::new(
        host,
        Arc::new(MapSettings::from_settings(&settings)),
        backends,
    );
    pipeline.notify_speed_change(args.speed);
    pipeline
        .initialize(frequency)
        .with_context(|| format!("Failed to start audio at {}Hz", frequency))?;

    run(&mut pipeline, frequency, args.seconds);

    pipeline.shutdown();
    Ok(())
}

/// Produce `seconds` of game audio through the pipeline
fn run(pipeline: &mut AudioPipeline, frequency: u32, seconds: f64) {
    let mut rng = rand::thread_rng();
    let mut tone = ToneGenerator::new(frequency);
    let mut pcm = Vec::new();

    let nominal = (frequency as f64 / VIDEO_RATE).round() as i64;
    let total_frames = (seconds * frequency as f64) as u64;
    let mut produced: u64 = 0;
    let mut next_report = frequency as u64;
    let started = Instant::now();

    while produced < total_frames && pipeline.state() == PipelineState::Running {
        let frames = (nominal + rng.gen_range(-JITTER_FRAMES..=JITTER_FRAMES)).max(1) as usize;
        tone.fill(frames, &mut pcm);
        pipeline.submit_chunk(&pcm);
        produced += frames as u64;

        if produced >= next_report {
            next_report += frequency as u64;
            if let Some(occupancy) = pipeline.occupancy() {
                log::info!(
                    "t={:.1}s wall={:.1}s level={}/{} processed={} queued={} drops={} errors={} mode={:?}",
                    produced as f64 / frequency as f64,
                    started.elapsed().as_secs_f64(),
                    occupancy.queue_level(),
                    occupancy.capacity,
                    occupancy.total_processed,
                    pipeline.queue_len(),
                    occupancy.overflow_drops,
                    occupancy.enqueue_errors,
                    pipeline.pacing().mode()
                );
            }
        }
    }

    log::info!(
        "Produced {:.1}s of game audio in {:.1}s",
        produced as f64 / frequency as f64,
        started.elapsed().as_secs_f64()
    );
}
