//! Silence/activity segmentation
//!
//! A single pass over a time-ordered packet list decodes each payload
//! and classifies it as active or silent. Consecutive active packets
//! extend one `ActivityPeriod`; a silent or empty packet closes it.
//! Periods shorter than the configured minimum are discarded as noise.

use std::collections::BTreeSet;
use std::time::Duration;
use tracing::debug;

use crate::audio::DecodeStage;
use crate::config::PlayerConfig;
use crate::packet::{FrequencyModulationKey, PacketRecord};

/// A contiguous [start, end) span where decoded audio carried signal
/// rather than silence. Immutable once the scan has finalized it.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityPeriod {
    /// Offset of the first active packet since the session origin
    pub start: Duration,
    /// End of the last active packet's audio
    pub end: Duration,
    /// Speaker names heard during the span
    pub speakers: BTreeSet<String>,
    /// Channels active during the span
    pub frequencies: Vec<FrequencyModulationKey>,
    /// Highest absolute sample value seen, normalized [0, 1]
    pub peak_amplitude: f32,
    /// Mean absolute sample value over the span
    pub average_amplitude: f32,
}

impl ActivityPeriod {
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// In-progress period state owned by the scanning loop
struct OpenPeriod {
    start: Duration,
    end: Duration,
    speakers: BTreeSet<String>,
    frequencies: Vec<FrequencyModulationKey>,
    peak: f32,
    amplitude_sum: f64,
    sample_count: u64,
}

impl OpenPeriod {
    fn finalize(self) -> ActivityPeriod {
        let average = if self.sample_count > 0 {
            (self.amplitude_sum / self.sample_count as f64) as f32
        } else {
            0.0
        };
        ActivityPeriod {
            start: self.start,
            end: self.end,
            speakers: self.speakers,
            frequencies: self.frequencies,
            peak_amplitude: self.peak,
            average_amplitude: average,
        }
    }
}

/// Whether one decoded packet counts as active: peak over the threshold
/// and at least `min_active_fraction` of its samples over it too. A
/// single stray spike does not open a period.
fn is_active(samples: &[f32], threshold: f32, min_fraction: f32) -> bool {
    if samples.is_empty() {
        return false;
    }
    let mut peak = 0.0f32;
    let mut over = 0usize;
    for &s in samples {
        let a = s.abs();
        if a > peak {
            peak = a;
        }
        if a > threshold {
            over += 1;
        }
    }
    peak > threshold && (over as f32 / samples.len() as f32) >= min_fraction
}

/// Scan a time-ordered packet list and return the activity periods
/// meeting the minimum-duration bar. Packets must be sorted by `ticks`;
/// the first packet defines the session origin.
pub fn scan_activity(packets: &[PacketRecord], config: &PlayerConfig) -> Vec<ActivityPeriod> {
    let Some(first) = packets.first() else {
        return Vec::new();
    };
    let origin_ticks = first.ticks;
    let threshold = config.silence_threshold;
    let min_fraction = config.min_active_fraction;
    let min_duration = config.min_activity_duration();

    let mut stage = DecodeStage::new(config.output_sample_rate);
    let mut periods = Vec::new();
    let mut open: Option<OpenPeriod> = None;

    for record in packets {
        let samples = stage.process(record);
        let offset = record.offset_since(origin_ticks);

        if !is_active(&samples, threshold, min_fraction) {
            // Silence and heartbeats close any in-progress period
            if let Some(period) = open.take() {
                close_period(period, min_duration, &mut periods);
            }
            continue;
        }

        let end = offset + record.audio_duration();
        let period = open.get_or_insert_with(|| OpenPeriod {
            start: offset,
            end,
            speakers: BTreeSet::new(),
            frequencies: Vec::new(),
            peak: 0.0,
            amplitude_sum: 0.0,
            sample_count: 0,
        });

        period.end = period.end.max(end);
        period.speakers.insert(record.speaker_identity().name);
        let key = record.key();
        if !period.frequencies.contains(&key) {
            period.frequencies.push(key);
        }
        for &s in &samples {
            let a = s.abs();
            if a > period.peak {
                period.peak = a;
            }
            period.amplitude_sum += a as f64;
        }
        period.sample_count += samples.len() as u64;
    }

    if let Some(period) = open.take() {
        close_period(period, min_duration, &mut periods);
    }

    debug!(periods = periods.len(), "activity scan complete");
    periods
}

fn close_period(open: OpenPeriod, min_duration: Duration, out: &mut Vec<ActivityPeriod>) {
    let period = open.finalize();
    if period.duration() >= min_duration {
        out.push(period);
    }
}
