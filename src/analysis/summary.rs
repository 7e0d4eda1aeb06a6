//! Channel roster and aggregate totals
//!
//! Read-only enumeration pass over a packet stream: which channels
//! exist, who transmitted on them and how much, plus session-wide
//! totals. Independent of the playback pipeline.

use std::collections::HashMap;
use std::time::Duration;

use crate::packet::{FrequencyModulationKey, PacketRecord};

/// Per-transmitter statistics within one channel
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerEntry {
    pub name: String,
    pub coalition: i32,
    pub unit_type: String,
    pub packet_count: u64,
    /// Wall-clock ticks of the first and last packet heard
    pub first_seen_ticks: i64,
    pub last_seen_ticks: i64,
}

/// All transmitters observed on one (frequency, modulation) channel
#[derive(Debug, Clone, Default)]
pub struct ChannelRoster {
    pub packet_count: u64,
    /// Keyed by transmitter GUID
    pub speakers: HashMap<String, SpeakerEntry>,
}

/// Session-wide totals and the channel universe
#[derive(Debug, Clone)]
pub struct FileSummary {
    pub packet_count: u64,
    /// Empty-payload keep-alive records, counted separately
    pub heartbeat_count: u64,
    pub audio_bytes: u64,
    /// Span from the first packet to the end of the last one
    pub total_span: Duration,
    pub channels: HashMap<FrequencyModulationKey, ChannelRoster>,
}

impl FileSummary {
    /// Channels sorted by frequency then modulation, for stable display
    pub fn sorted_channels(&self) -> Vec<(&FrequencyModulationKey, &ChannelRoster)> {
        let mut channels: Vec<_> = self.channels.iter().collect();
        channels.sort_by(|(a, _), (b, _)| {
            a.frequency
                .partial_cmp(&b.frequency)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.modulation.to_u8().cmp(&b.modulation.to_u8()))
        });
        channels
    }

    /// Fraction of the total span covered by the given activity time
    pub fn activity_percentage(&self, activity_time: Duration) -> f64 {
        if self.total_span.is_zero() {
            return 0.0;
        }
        (activity_time.as_secs_f64() / self.total_span.as_secs_f64()) * 100.0
    }
}

/// Enumerate channels, speakers and totals over a time-ordered packet
/// list. Packets must be sorted by `ticks`.
pub fn summarize(packets: &[PacketRecord]) -> FileSummary {
    let mut summary = FileSummary {
        packet_count: packets.len() as u64,
        heartbeat_count: 0,
        audio_bytes: 0,
        total_span: Duration::ZERO,
        channels: HashMap::new(),
    };
    let Some(first) = packets.first() else {
        return summary;
    };
    let origin_ticks = first.ticks;

    for record in packets {
        if record.is_heartbeat() {
            summary.heartbeat_count += 1;
        }
        summary.audio_bytes += record.audio.len() as u64;
        let end = record.offset_since(origin_ticks) + record.audio_duration();
        summary.total_span = summary.total_span.max(end);

        let roster = summary.channels.entry(record.key()).or_default();
        roster.packet_count += 1;
        let speaker = record.speaker_identity();
        roster
            .speakers
            .entry(speaker.guid.clone())
            .and_modify(|entry| {
                entry.packet_count += 1;
                entry.last_seen_ticks = record.ticks;
            })
            .or_insert_with(|| SpeakerEntry {
                name: speaker.name,
                coalition: speaker.coalition,
                unit_type: speaker.unit_type,
                packet_count: 1,
                first_seen_ticks: record.ticks,
                last_seen_ticks: record.ticks,
            });
    }

    summary
}
