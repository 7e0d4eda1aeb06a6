//! Offline mixdown and WAV export
//!
//! Decodes every packet, places it on a common timeline at its playback
//! offset, sums overlapping transmissions and writes standard mono
//! 16-bit WAV. If the summed peak exceeds full scale, the whole buffer
//! is scaled down by 1/peak; otherwise samples are clamped without
//! scaling.

use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::Path;
use tracing::info;

use crate::audio::{to_pcm16, DecodeStage};
use crate::config::PlayerConfig;
use crate::error::Result;
use crate::packet::PacketRecord;

/// Mix a time-ordered packet list into one normalized mono float buffer
/// at the configured output rate.
pub fn mix_to_pcm(packets: &[PacketRecord], config: &PlayerConfig) -> Vec<f32> {
    let Some(first) = packets.first() else {
        return Vec::new();
    };
    let origin_ticks = first.ticks;
    let rate = config.output_sample_rate as u64;

    let mut stage = DecodeStage::with_master_gain(config.output_sample_rate, config.master_gain);
    let mut mix: Vec<f32> = Vec::new();

    for record in packets {
        let samples = stage.process(record);
        if samples.is_empty() {
            continue;
        }
        let offset = record.offset_since(origin_ticks);
        let start = (offset.as_nanos() as u64 * rate / 1_000_000_000) as usize;
        let end = start + samples.len();
        if mix.len() < end {
            mix.resize(end, 0.0);
        }
        // Overlapping transmissions sum; normalization handles the peak
        for (slot, sample) in mix[start..end].iter_mut().zip(&samples) {
            *slot += sample;
        }
    }

    normalize(&mut mix);
    mix
}

fn normalize(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
    if peak > 1.0 {
        let scale = 1.0 / peak;
        for s in samples.iter_mut() {
            *s *= scale;
        }
    } else {
        for s in samples.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }
    }
}

/// Mix the packet list and write it as a mono 16-bit WAV file.
pub fn write_wav(packets: &[PacketRecord], config: &PlayerConfig, path: &Path) -> Result<()> {
    let mix = mix_to_pcm(packets, config);
    let pcm = to_pcm16(&mix);

    let spec = WavSpec {
        channels: 1,
        sample_rate: config.output_sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)
        .map_err(|e| crate::error::Error::Config(format!("wav create failed: {}", e)))?;
    for sample in &pcm {
        writer
            .write_sample(*sample)
            .map_err(|e| crate::error::Error::Config(format!("wav write failed: {}", e)))?;
    }
    writer
        .finalize()
        .map_err(|e| crate::error::Error::Config(format!("wav finalize failed: {}", e)))?;

    info!(samples = pcm.len(), path = %path.display(), "wav export complete");
    Ok(())
}
