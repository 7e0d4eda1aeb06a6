//! Transmission record types
//!
//! One `PacketRecord` is one serialized transmission unit. Records are
//! value-like and immutable once constructed; payload bytes are shared
//! cheaply via `Bytes`.

use bytes::Bytes;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use crate::constants::FRAME_DURATION_MS;

/// Radio transmission mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modulation {
    Am,
    Fm,
    Intercom,
    Disabled,
    HaveQuick,
    Satcom,
    Mids,
    /// Unknown wire value, preserved losslessly
    Other(u8),
}

impl Modulation {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Modulation::Am,
            1 => Modulation::Fm,
            2 => Modulation::Intercom,
            3 => Modulation::Disabled,
            4 => Modulation::HaveQuick,
            5 => Modulation::Satcom,
            6 => Modulation::Mids,
            other => Modulation::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Modulation::Am => 0,
            Modulation::Fm => 1,
            Modulation::Intercom => 2,
            Modulation::Disabled => 3,
            Modulation::HaveQuick => 4,
            Modulation::Satcom => 5,
            Modulation::Mids => 6,
            Modulation::Other(other) => other,
        }
    }
}

impl std::fmt::Display for Modulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Modulation::Am => write!(f, "AM"),
            Modulation::Fm => write!(f, "FM"),
            Modulation::Intercom => write!(f, "INTERCOM"),
            Modulation::Disabled => write!(f, "DISABLED"),
            Modulation::HaveQuick => write!(f, "HAVEQUICK"),
            Modulation::Satcom => write!(f, "SATCOM"),
            Modulation::Mids => write!(f, "MIDS"),
            Modulation::Other(v) => write!(f, "MOD({})", v),
        }
    }
}

/// 3-D world position of the speaking entity
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Rich speaker telemetry carried by extended-layout records
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerInfo {
    /// Display name
    pub name: String,
    /// Client GUID (duplicates the record's transmitter GUID)
    pub guid: String,
    /// Faction/team identifier
    pub coalition: i32,
    /// Seat within a multi-crew unit
    pub seat: i32,
    /// Whether the speaker permitted recording
    pub allow_record: bool,
    /// World position at transmit time
    pub position: Position,
    /// Aircraft/unit type name
    pub unit_type: String,
    /// Aircraft/unit numeric id
    pub unit_id: u32,
}

impl SpeakerInfo {
    /// Minimal speaker identity synthesized for legacy-layout records
    pub fn synthesized(guid: &str, coalition: i32) -> Self {
        Self {
            name: guid.to_string(),
            guid: guid.to_string(),
            coalition,
            seat: 0,
            allow_record: true,
            position: Position::default(),
            unit_type: String::new(),
            unit_id: 0,
        }
    }
}

/// One recorded transmission
#[derive(Debug, Clone, PartialEq)]
pub struct PacketRecord {
    /// Wall-clock instant in 100 ns ticks
    pub ticks: i64,
    /// Radio frequency in Hz
    pub frequency: f64,
    pub modulation: Modulation,
    pub encryption: u8,
    pub transmitter_unit_id: u32,
    /// Monotonic per-session counter, not globally unique
    pub packet_id: u64,
    /// Fixed-width ASCII transmitter identity
    pub transmitter_guid: String,
    /// Extended-layout telemetry; `None` for legacy records
    pub speaker: Option<SpeakerInfo>,
    pub sample_rate: u32,
    pub channel_count: u16,
    /// Redundant top-level coalition, kept for legacy compatibility
    pub coalition: i32,
    /// Opus or raw PCM16 payload; empty payloads are valid heartbeats
    pub audio: Bytes,
}

impl PacketRecord {
    /// Speaker identity, synthesizing one from the GUID for legacy records
    pub fn speaker_identity(&self) -> SpeakerInfo {
        match &self.speaker {
            Some(speaker) => speaker.clone(),
            None => SpeakerInfo::synthesized(&self.transmitter_guid, self.coalition),
        }
    }

    /// Channel key for filtering and enumeration
    pub fn key(&self) -> FrequencyModulationKey {
        FrequencyModulationKey::new(self.frequency, self.modulation)
    }

    /// True when the payload carries no audio
    pub fn is_heartbeat(&self) -> bool {
        self.audio.is_empty()
    }

    /// Playback offset relative to a session origin instant
    pub fn offset_since(&self, origin_ticks: i64) -> Duration {
        let delta = (self.ticks - origin_ticks).max(0);
        Duration::from_nanos(delta as u64 * 100)
    }

    /// Approximate audio duration of this record.
    ///
    /// Raw PCM16 payloads have an exact length; compressed or empty
    /// payloads are assumed to span one nominal frame.
    pub fn audio_duration(&self) -> Duration {
        let raw_samples = self.audio.len() / 2 / self.channel_count.max(1) as usize;
        let expected_frame = self.sample_rate as usize * FRAME_DURATION_MS as usize / 1000;
        if raw_samples >= expected_frame && self.sample_rate > 0 {
            Duration::from_nanos(raw_samples as u64 * 1_000_000_000 / self.sample_rate as u64)
        } else {
            Duration::from_millis(FRAME_DURATION_MS as u64)
        }
    }

    /// Ticks representation of a duration past an origin instant
    pub fn ticks_for_offset(origin_ticks: i64, offset: Duration) -> i64 {
        origin_ticks + (offset.as_nanos() / 100) as i64
    }
}

/// Identifies one logical channel: an exact (frequency, modulation) pair.
///
/// Frequency equality is bit-exact; the recorder writes the same f64 for
/// every packet on a channel, so bit comparison is the correct semantics.
#[derive(Debug, Clone, Copy)]
pub struct FrequencyModulationKey {
    pub frequency: f64,
    pub modulation: Modulation,
}

impl FrequencyModulationKey {
    pub fn new(frequency: f64, modulation: Modulation) -> Self {
        Self {
            frequency,
            modulation,
        }
    }

    /// Frequency in MHz for display
    pub fn frequency_mhz(&self) -> f64 {
        self.frequency / 1_000_000.0
    }
}

impl PartialEq for FrequencyModulationKey {
    fn eq(&self, other: &Self) -> bool {
        self.frequency.to_bits() == other.frequency.to_bits() && self.modulation == other.modulation
    }
}

impl Eq for FrequencyModulationKey {}

impl Hash for FrequencyModulationKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.frequency.to_bits().hash(state);
        self.modulation.hash(state);
    }
}

impl std::fmt::Display for FrequencyModulationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3} MHz {}", self.frequency_mhz(), self.modulation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ticks: i64, audio: Vec<u8>) -> PacketRecord {
        PacketRecord {
            ticks,
            frequency: 251_000_000.0,
            modulation: Modulation::Am,
            encryption: 0,
            transmitter_unit_id: 100,
            packet_id: 1,
            transmitter_guid: "abcdefghij1234567890ab".to_string(),
            speaker: None,
            sample_rate: 48_000,
            channel_count: 1,
            coalition: 2,
            audio: Bytes::from(audio),
        }
    }

    #[test]
    fn test_modulation_roundtrip() {
        for v in 0..=255u8 {
            assert_eq!(Modulation::from_u8(v).to_u8(), v);
        }
    }

    #[test]
    fn test_legacy_speaker_synthesized_from_guid() {
        let r = record(0, vec![]);
        let speaker = r.speaker_identity();
        assert_eq!(speaker.name, r.transmitter_guid);
        assert_eq!(speaker.guid, r.transmitter_guid);
        assert_eq!(speaker.coalition, 2);
    }

    #[test]
    fn test_offset_since_origin() {
        let r = record(10_000_000, vec![]);
        assert_eq!(r.offset_since(0), Duration::from_secs(1));
        // Origin after the record clamps to zero
        assert_eq!(r.offset_since(20_000_000), Duration::ZERO);
    }

    #[test]
    fn test_raw_payload_duration() {
        // 1920 samples of mono PCM16 at 48 kHz = 40 ms
        let r = record(0, vec![0u8; 1920 * 2]);
        assert_eq!(r.audio_duration(), Duration::from_millis(40));
    }

    #[test]
    fn test_compressed_payload_uses_nominal_frame() {
        let r = record(0, vec![0u8; 120]);
        assert_eq!(r.audio_duration(), Duration::from_millis(40));
    }

    #[test]
    fn test_key_bit_exact_equality() {
        let a = FrequencyModulationKey::new(251_000_000.0, Modulation::Am);
        let b = FrequencyModulationKey::new(251_000_000.0, Modulation::Am);
        let c = FrequencyModulationKey::new(251_000_000.0, Modulation::Fm);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
