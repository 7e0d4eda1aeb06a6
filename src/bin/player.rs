//! Interactive playback of a recorded radio session
//!
//! Reads a recording, optionally filters it to chosen channels, and
//! plays it through the default audio output. Playback is driven by
//! simple line commands on stdin (pause/resume/seek/quit).

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use radio_replay::audio::{AudioSink, CpalSink, NullSink};
use radio_replay::config::PlayerConfig;
use radio_replay::filter::FrequencyFilter;
use radio_replay::packet::{read_all, FrequencyModulationKey, Modulation};
use radio_replay::playback::{PlaybackEvent, Transport};

#[derive(Parser, Debug)]
#[command(name = "player", about = "Play back a recorded radio session")]
struct Args {
    /// Recording file to play
    recording: PathBuf,

    /// Optional configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Play only this frequency, in MHz (repeatable)
    #[arg(long = "freq")]
    frequencies: Vec<f64>,

    /// Modulation for the --freq selections (0=AM, 1=FM, ...)
    #[arg(long, default_value_t = 0)]
    modulation: u8,

    /// Output device name; default output device when omitted
    #[arg(long)]
    device: Option<String>,

    /// Master volume in [0, 1]
    #[arg(long, default_value_t = 1.0)]
    volume: f32,

    /// Discard audio instead of opening a device
    #[arg(long)]
    no_audio: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => PlayerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PlayerConfig::default(),
    };

    let file = File::open(&args.recording)
        .with_context(|| format!("opening {}", args.recording.display()))?;
    let packets = read_all(BufReader::new(file)).context("reading recording")?;
    println!("Loaded {} packets", packets.len());

    let mut filter = FrequencyFilter::new();
    let modulation = Modulation::from_u8(args.modulation);
    for mhz in &args.frequencies {
        filter.select(FrequencyModulationKey::new(mhz * 1_000_000.0, modulation));
    }

    let sink: Box<dyn AudioSink> = if args.no_audio {
        Box::new(NullSink::new())
    } else {
        match CpalSink::new(args.device.clone(), config.output_sample_rate) {
            Ok(sink) => Box::new(sink),
            Err(e) => {
                eprintln!("No usable audio device ({}), discarding audio", e);
                Box::new(NullSink::new())
            }
        }
    };

    let mut transport = Transport::new(config, sink)?;
    transport.set_volume(args.volume);
    transport.load(packets, &filter)?;
    println!(
        "Session duration: {:.1} s",
        transport.total_duration().as_secs_f64()
    );

    let events = transport.events();
    std::thread::spawn(move || {
        for event in events {
            match event {
                PlaybackEvent::Progress { position, total } => {
                    print!(
                        "\r  {:.1} / {:.1} s",
                        position.as_secs_f64(),
                        total.as_secs_f64()
                    );
                    use std::io::Write;
                    let _ = std::io::stdout().flush();
                }
                PlaybackEvent::Stopped => println!("\nStopped"),
                PlaybackEvent::Error(message) => eprintln!("\nPlayback error: {}", message),
                _ => {}
            }
        }
    });

    transport.play()?;
    println!("Commands: p=pause, r=resume, s <secs>=seek, q=quit");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("p") => {
                if let Err(e) = transport.pause() {
                    eprintln!("{}", e);
                }
            }
            Some("r") => {
                if let Err(e) = transport.resume() {
                    eprintln!("{}", e);
                }
            }
            Some("s") => match parts.next().and_then(|v| v.parse::<f64>().ok()) {
                Some(secs) => {
                    if let Err(e) = transport.seek(Duration::from_secs_f64(secs)) {
                        eprintln!("{}", e);
                    }
                }
                None => eprintln!("usage: s <seconds>"),
            },
            Some("q") => break,
            _ => {}
        }
    }

    transport.stop()?;
    Ok(())
}
