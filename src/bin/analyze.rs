//! Batch analysis and export of recorded radio sessions

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use radio_replay::analysis;
use radio_replay::config::PlayerConfig;
use radio_replay::export;
use radio_replay::filter::FrequencyFilter;
use radio_replay::packet::{read_all_lossy, FrequencyModulationKey, Modulation, PacketRecord};

#[derive(Parser, Debug)]
#[command(name = "analyze", about = "Inspect and export recorded radio sessions")]
struct Args {
    /// Recording file
    recording: PathBuf,

    /// Optional configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Channel roster and session totals
    Summary,
    /// Speech activity segmentation
    Activity,
    /// Mix the session down to a mono WAV file
    Export {
        /// Output WAV path
        output: PathBuf,

        /// Restrict to this frequency, in MHz (repeatable)
        #[arg(long = "freq")]
        frequencies: Vec<f64>,

        /// Modulation for the --freq selections (0=AM, 1=FM, ...)
        #[arg(long, default_value_t = 0)]
        modulation: u8,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => PlayerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PlayerConfig::default(),
    };

    // Batch mode reads lossily: a damaged region should not hide the
    // rest of the recording
    let packets = load_recording(&args.recording)?;

    match args.command {
        Command::Summary => print_summary(&packets, &config),
        Command::Activity => print_activity(&packets, &config),
        Command::Export {
            output,
            frequencies,
            modulation,
        } => {
            let mut filter = FrequencyFilter::new();
            let modulation = Modulation::from_u8(modulation);
            for mhz in &frequencies {
                filter.select(FrequencyModulationKey::new(mhz * 1_000_000.0, modulation));
            }
            let mut selected = filter.apply(&packets);
            selected.sort_by_key(|p| p.ticks);
            export::write_wav(&selected, &config, &output)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Wrote {}", output.display());
        }
    }
    Ok(())
}

fn load_recording(path: &Path) -> Result<Vec<PacketRecord>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let (mut packets, skipped) =
        read_all_lossy(BufReader::new(file)).context("reading recording")?;
    if skipped > 0 {
        eprintln!("Warning: skipped {} corrupt bytes", skipped);
    }
    packets.sort_by_key(|p| p.ticks);
    Ok(packets)
}

fn print_summary(packets: &[PacketRecord], config: &PlayerConfig) {
    let report = analysis::analyze(packets, config);
    let summary = &report.summary;

    println!("Packets:   {}", summary.packet_count);
    println!("Heartbeat: {}", summary.heartbeat_count);
    println!("Audio:     {} bytes", summary.audio_bytes);
    println!("Span:      {:.1} s", summary.total_span.as_secs_f64());
    println!("Activity:  {:.1}%", report.activity_percentage);
    println!();

    for (key, roster) in summary.sorted_channels() {
        println!("{} ({} packets)", key, roster.packet_count);
        let mut speakers: Vec<_> = roster.speakers.values().collect();
        speakers.sort_by(|a, b| b.packet_count.cmp(&a.packet_count));
        for speaker in speakers {
            let unit = if speaker.unit_type.is_empty() {
                String::new()
            } else {
                format!(" [{}]", speaker.unit_type)
            };
            println!(
                "  {}{} coalition {} - {} packets",
                speaker.name, unit, speaker.coalition, speaker.packet_count
            );
        }
    }
}

fn print_activity(packets: &[PacketRecord], config: &PlayerConfig) {
    let report = analysis::analyze(packets, config);

    println!(
        "{} activity periods, {:.1} s total ({:.1}%)",
        report.periods.len(),
        report.activity_time.as_secs_f64(),
        report.activity_percentage
    );
    for period in &report.periods {
        let speakers: Vec<&str> = period.speakers.iter().map(String::as_str).collect();
        println!(
            "  {:8.1}s - {:8.1}s  peak {:.2}  {}",
            period.start.as_secs_f64(),
            period.end.as_secs_f64(),
            period.peak_amplitude,
            speakers.join(", ")
        );
    }
}
