//! Thin demo binary: builds a synthetic source buffer, wires a real engine
//! around it, and drives the cooperative poll loop while logging the event
//! stream. Exercises the same surface a host embedding the engine would use,
//! without any actual audio hardware.

mod host;

use std::f64::consts::PI;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;

use stretch_core::SourceBuffer;
use stretch_engine::{Engine, EngineOptions, Event, Phase};
use stretch_scheduler::ProcessorMailbox;
use stretch_worker::{ConversionProcessor, MainThreadProcessor, WorkerPool};

use host::{LoggingVoiceFactory, ThreadTimerHost, WallClock};

/// Drive the pitch-preserving variable-tempo playback engine against a
/// synthetic sine-wave source.
#[derive(Parser, Debug)]
#[command(name = "stretch-cli", about = "Stretch engine demo driver")]
struct Cli {
    /// Length of the synthetic source, in seconds.
    #[arg(long, default_value_t = 30.0)]
    duration_sec: f64,

    /// Sample rate of the synthetic source.
    #[arg(long, default_value_t = 44100)]
    sample_rate: u32,

    /// Sine tone frequency, in Hz.
    #[arg(long, default_value_t = 440.0)]
    frequency: f64,

    /// Initial playback tempo (1.0 = unchanged speed).
    #[arg(long, default_value_t = 1.0)]
    tempo: f64,

    /// Chunk length fed to the splitter, in seconds.
    #[arg(long, default_value_t = 8.0)]
    chunk_duration_sec: f64,

    /// Overlap window between adjacent chunks, in seconds.
    #[arg(long, default_value_t = 0.2)]
    overlap_sec: f64,

    /// Loop back to the start instead of ending.
    #[arg(long, default_value_t = false)]
    loop_playback: bool,

    /// Number of off-thread conversion workers. 0 uses the synchronous
    /// main-thread fallback processor instead of a real worker pool.
    /// Defaults to the host's available parallelism.
    #[arg(long)]
    workers: Option<usize>,

    /// Seek to this position (seconds) partway through the session.
    #[arg(long)]
    seek_at_sec: Option<f64>,

    /// Target seek position, used together with `--seek-at-sec`.
    #[arg(long, default_value_t = 0.0)]
    seek_to_sec: f64,

    /// How long to keep the session running, in wall-clock seconds. Defaults
    /// to a little more than the source's playback duration at `--tempo`.
    #[arg(long)]
    run_sec: Option<f64>,
}

fn make_sine_source(duration_sec: f64, sample_rate: u32, frequency: f64) -> anyhow::Result<SourceBuffer> {
    let total_samples = (duration_sec * sample_rate as f64).round().max(1.0) as usize;
    let mut left = Vec::with_capacity(total_samples);
    let mut right = Vec::with_capacity(total_samples);
    for n in 0..total_samples {
        let t = n as f64 / sample_rate as f64;
        let sample = (2.0 * PI * frequency * t).sin() * 0.5;
        left.push(sample);
        right.push(sample);
    }
    Ok(SourceBuffer::new(vec![left, right], sample_rate)?)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    log::info!(
        "building {:.1}s source at {}Hz, {:.1}Hz tone",
        cli.duration_sec,
        cli.sample_rate,
        cli.frequency
    );
    let source = make_sine_source(cli.duration_sec, cli.sample_rate, cli.frequency)?;

    let workers = cli.workers.unwrap_or_else(num_cpus::get);

    let mailbox = ProcessorMailbox::new();
    let (on_result, on_error, on_all_dead) = mailbox.callbacks();
    let mut init_failure = None;
    let processor: Arc<dyn ConversionProcessor> = if workers == 0 {
        log::info!("using synchronous main-thread processor");
        MainThreadProcessor::new(on_result)
    } else {
        log::info!("using a {workers}-slot worker pool");
        match WorkerPool::new(workers, 3, on_result, on_error, on_all_dead) {
            Ok(pool) => pool,
            Err(err) => {
                log::error!("failed to spawn worker pool: {err}");
                init_failure = Some(err.to_string());
                let fallback = MainThreadProcessor::new(Box::new(|_| {}));
                fallback.terminate();
                fallback
            }
        }
    };

    let options = EngineOptions::builder()
        .tempo(cli.tempo)
        .loop_playback(cli.loop_playback)
        .chunk_duration_sec(cli.chunk_duration_sec)
        .overlap_sec(cli.overlap_sec)
        .build()?;

    let clock = WallClock::new();
    let voice_factory = Arc::new(LoggingVoiceFactory);
    let timers = ThreadTimerHost::new();

    let mut engine = Engine::new(source, options, processor, mailbox, clock, voice_factory, timers);
    if let Some(reason) = init_failure {
        engine.mark_init_failed(reason);
    }

    engine.on(|event| log_event(event));
    engine.start();

    let run_sec = cli.run_sec.unwrap_or_else(|| cli.duration_sec / cli.tempo + 2.0);
    let tick = Duration::from_millis(20);
    let mut elapsed_sec = 0.0;
    let mut seeked = false;

    while elapsed_sec < run_sec {
        engine.poll();

        if let (Some(seek_at), false) = (cli.seek_at_sec, seeked) {
            if elapsed_sec >= seek_at {
                log::info!("seeking to {:.2}s", cli.seek_to_sec);
                engine.seek(cli.seek_to_sec);
                seeked = true;
            }
        }

        if !cli.loop_playback && engine.get_status().phase == Phase::Ended {
            log::info!("playback ended, stopping demo loop");
            break;
        }

        thread::sleep(tick);
        elapsed_sec += tick.as_secs_f64();
    }

    let status = engine.get_status();
    log::info!(
        "final status: phase={:?} position={:.2}s/{:.2}s converted={}/{}",
        status.phase,
        status.playback.current_position_sec,
        status.playback.duration_sec,
        status.conversion.ready,
        status.conversion.total
    );

    engine.dispose();
    Ok(())
}

fn log_event(event: &Event) {
    match event {
        Event::Error { message, fatal } => log::error!("event: error fatal={fatal} {message}"),
        other => log::info!("event: {other:?}"),
    }
}
