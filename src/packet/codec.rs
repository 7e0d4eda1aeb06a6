//! Wire codec for the on-disk packet stream
//!
//! The stream has no container header and no version byte. Two record
//! layouts coexist: the legacy layout (audio + trailing coalition right
//! after the transmitter GUID) and the extended layout (a speaker
//! telemetry block between the GUID and the audio). Detection is
//! per-record and speculative: try the extended block, and on any bound
//! violation or malformed string rewind to just after the GUID and parse
//! as legacy. Little-endian throughout.
//!
//! End-of-stream in the middle of a record is a normal termination, not
//! an error; only an impossible payload length is reported as corruption.

use bytes::{BufMut, Bytes, BytesMut};
use std::io::Read;
use tracing::{debug, trace, warn};

use crate::constants::{GUID_LENGTH, MAX_PAYLOAD_SIZE, MAX_STRING_LENGTH};
use crate::error::CodecError;
use crate::packet::record::{Modulation, PacketRecord, Position, SpeakerInfo};

/// Result of one decode attempt against a byte window
#[derive(Debug)]
pub enum DecodeOutcome {
    /// A full record was parsed, consuming `consumed` bytes
    Complete {
        record: PacketRecord,
        consumed: usize,
    },
    /// The window ends before the record does
    Incomplete,
}

/// Rewindable little-endian cursor over a byte window
struct WireCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireCursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn set_position(&mut self, pos: usize) {
        self.pos = pos;
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.buf.len() - self.pos < len {
            return None;
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Some(slice)
    }

    fn get_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn get_i32(&mut self) -> Option<i32> {
        self.take(4).map(|b| i32::from_le_bytes(b.try_into().unwrap()))
    }

    fn get_u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes(b.try_into().unwrap()))
    }

    fn get_i64(&mut self) -> Option<i64> {
        self.take(8).map(|b| i64::from_le_bytes(b.try_into().unwrap()))
    }

    fn get_u64(&mut self) -> Option<u64> {
        self.take(8).map(|b| u64::from_le_bytes(b.try_into().unwrap()))
    }

    fn get_f64(&mut self) -> Option<f64> {
        self.get_u64().map(f64::from_bits)
    }
}

/// Why a speculative extended-block parse did not produce a block
enum ExtendedFailure {
    /// Structurally not an extended block; rewind and parse legacy
    Rewind,
    /// Ran out of bytes before the block could be judged
    NeedMore,
}

struct ExtendedBlock {
    speaker: SpeakerInfo,
    sample_rate: u32,
    channel_count: u16,
    audio: Bytes,
    coalition: i32,
}

/// Length-prefixed UTF-8 string with the wire's [0, 1000] byte bound
fn get_bounded_string(cur: &mut WireCursor<'_>) -> Result<String, ExtendedFailure> {
    let len = match cur.get_i32() {
        Some(len) => len,
        None => return Err(ExtendedFailure::NeedMore),
    };
    if len < 0 || len as usize > MAX_STRING_LENGTH {
        return Err(ExtendedFailure::Rewind);
    }
    let bytes = match cur.take(len as usize) {
        Some(bytes) => bytes,
        None => return Err(ExtendedFailure::NeedMore),
    };
    match std::str::from_utf8(bytes) {
        Ok(s) => Ok(s.to_string()),
        Err(_) => Err(ExtendedFailure::Rewind),
    }
}

fn try_extended(cur: &mut WireCursor<'_>) -> Result<ExtendedBlock, ExtendedFailure> {
    let name = get_bounded_string(cur)?;
    let guid = get_bounded_string(cur)?;

    let coalition = cur.get_i32().ok_or(ExtendedFailure::NeedMore)?;
    let seat = cur.get_i32().ok_or(ExtendedFailure::NeedMore)?;
    let allow_record = cur.get_u8().ok_or(ExtendedFailure::NeedMore)? != 0;
    let x = cur.get_f64().ok_or(ExtendedFailure::NeedMore)?;
    let y = cur.get_f64().ok_or(ExtendedFailure::NeedMore)?;
    let z = cur.get_f64().ok_or(ExtendedFailure::NeedMore)?;
    let unit_type = get_bounded_string(cur)?;
    let unit_id = cur.get_u32().ok_or(ExtendedFailure::NeedMore)?;

    let sample_rate = cur.get_i32().ok_or(ExtendedFailure::NeedMore)?;
    let channel_count = cur.get_i32().ok_or(ExtendedFailure::NeedMore)?;
    if !(8_000..=192_000).contains(&sample_rate) || !(1..=2).contains(&channel_count) {
        return Err(ExtendedFailure::Rewind);
    }

    let audio_len = cur.get_i32().ok_or(ExtendedFailure::NeedMore)?;
    if audio_len < 0 || audio_len as usize > MAX_PAYLOAD_SIZE {
        return Err(ExtendedFailure::Rewind);
    }
    let audio = match cur.take(audio_len as usize) {
        Some(bytes) => Bytes::copy_from_slice(bytes),
        None => return Err(ExtendedFailure::NeedMore),
    };
    let trailing_coalition = cur.get_i32().ok_or(ExtendedFailure::NeedMore)?;

    Ok(ExtendedBlock {
        speaker: SpeakerInfo {
            name,
            guid,
            coalition,
            seat,
            allow_record,
            position: Position { x, y, z },
            unit_type,
            unit_id,
        },
        sample_rate: sample_rate as u32,
        channel_count: channel_count as u16,
        audio,
        coalition: trailing_coalition,
    })
}

/// Decode one record from the front of `buf`.
///
/// `at_eof` tells the codec that no more bytes will ever arrive: an
/// extended-block parse that runs out of data then falls back to the
/// legacy layout instead of waiting for more input.
pub fn decode_record(buf: &[u8], at_eof: bool) -> Result<DecodeOutcome, CodecError> {
    let mut cur = WireCursor::new(buf);

    macro_rules! field {
        ($expr:expr) => {
            match $expr {
                Some(value) => value,
                None => return Ok(DecodeOutcome::Incomplete),
            }
        };
    }

    let ticks = field!(cur.get_i64());
    let frequency = field!(cur.get_f64());
    let modulation = Modulation::from_u8(field!(cur.get_u8()));
    let encryption = field!(cur.get_u8());
    let transmitter_unit_id = field!(cur.get_u32());
    let packet_id = field!(cur.get_u64());
    let guid_bytes = field!(cur.take(GUID_LENGTH));
    let transmitter_guid = String::from_utf8_lossy(guid_bytes)
        .trim_end_matches('\0')
        .to_string();

    let after_guid = cur.position();

    match try_extended(&mut cur) {
        Ok(block) => {
            trace!(packet_id, "decoded extended record");
            return Ok(DecodeOutcome::Complete {
                record: PacketRecord {
                    ticks,
                    frequency,
                    modulation,
                    encryption,
                    transmitter_unit_id,
                    packet_id,
                    transmitter_guid,
                    speaker: Some(block.speaker),
                    sample_rate: block.sample_rate,
                    channel_count: block.channel_count,
                    coalition: block.coalition,
                    audio: block.audio,
                },
                consumed: cur.position(),
            });
        }
        Err(ExtendedFailure::NeedMore) if !at_eof => return Ok(DecodeOutcome::Incomplete),
        Err(_) => cur.set_position(after_guid),
    }

    // Legacy layout: audio length, payload, trailing coalition
    let audio_len = field!(cur.get_i32());
    if audio_len < 0 || audio_len as usize > MAX_PAYLOAD_SIZE {
        return Err(CodecError::StreamCorruption {
            offset: cur.position() as u64,
            reason: format!("legacy audio length {} out of range", audio_len),
        });
    }
    let audio = Bytes::copy_from_slice(field!(cur.take(audio_len as usize)));
    let coalition = field!(cur.get_i32());

    trace!(packet_id, "decoded legacy record");
    Ok(DecodeOutcome::Complete {
        record: PacketRecord {
            ticks,
            frequency,
            modulation,
            encryption,
            transmitter_unit_id,
            packet_id,
            transmitter_guid,
            speaker: None,
            sample_rate: crate::constants::OUTPUT_SAMPLE_RATE,
            channel_count: 1,
            coalition,
            audio,
        },
        consumed: cur.position(),
    })
}

fn put_bounded_string(buf: &mut BytesMut, s: &str) {
    let mut bytes = s.as_bytes();
    if bytes.len() > MAX_STRING_LENGTH {
        // Back off to a char boundary so the wire stays valid UTF-8
        let mut end = MAX_STRING_LENGTH;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        bytes = &s.as_bytes()[..end];
    }
    buf.put_i32_le(bytes.len() as i32);
    buf.put_slice(bytes);
}

/// Encode one record. The legacy layout is written when `speaker` is
/// `None`, the extended layout otherwise.
pub fn encode_record(record: &PacketRecord) -> Bytes {
    let mut buf = BytesMut::with_capacity(128 + record.audio.len());

    buf.put_i64_le(record.ticks);
    buf.put_f64_le(record.frequency);
    buf.put_u8(record.modulation.to_u8());
    buf.put_u8(record.encryption);
    buf.put_u32_le(record.transmitter_unit_id);
    buf.put_u64_le(record.packet_id);

    let mut guid = [0u8; GUID_LENGTH];
    let guid_bytes = record.transmitter_guid.as_bytes();
    let len = guid_bytes.len().min(GUID_LENGTH);
    guid[..len].copy_from_slice(&guid_bytes[..len]);
    buf.put_slice(&guid);

    if let Some(speaker) = &record.speaker {
        put_bounded_string(&mut buf, &speaker.name);
        put_bounded_string(&mut buf, &speaker.guid);
        buf.put_i32_le(speaker.coalition);
        buf.put_i32_le(speaker.seat);
        buf.put_u8(speaker.allow_record as u8);
        buf.put_f64_le(speaker.position.x);
        buf.put_f64_le(speaker.position.y);
        buf.put_f64_le(speaker.position.z);
        put_bounded_string(&mut buf, &speaker.unit_type);
        buf.put_u32_le(speaker.unit_id);
        buf.put_i32_le(record.sample_rate as i32);
        buf.put_i32_le(record.channel_count as i32);
        buf.put_i32_le(record.audio.len() as i32);
        buf.put_slice(&record.audio);
        buf.put_i32_le(record.coalition);
    } else {
        buf.put_i32_le(record.audio.len() as i32);
        buf.put_slice(&record.audio);
        buf.put_i32_le(record.coalition);
    }

    buf.freeze()
}

const READ_CHUNK: usize = 64 * 1024;

/// Streaming reader over a record stream.
///
/// Keeps a bounded window of undecoded bytes; records are decoded from
/// the front and the window refilled from the underlying reader on
/// demand. A partial record at true end-of-stream is a clean end.
pub struct PacketReader<R> {
    inner: R,
    buf: Vec<u8>,
    start: usize,
    eof: bool,
    /// Bytes advanced past in the underlying stream: completed records
    /// plus any bytes skipped during resynchronization. Corruption
    /// offsets are reported relative to this position.
    consumed: u64,
    /// Bytes skipped while resynchronizing (lossy mode only)
    skipped: u64,
}

impl<R: Read> PacketReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(READ_CHUNK),
            start: 0,
            eof: false,
            consumed: 0,
            skipped: 0,
        }
    }

    /// Total bytes advanced past in the stream, decoded and skipped alike
    pub fn bytes_consumed(&self) -> u64 {
        self.consumed
    }

    /// Bytes skipped during lossy resynchronization
    pub fn bytes_skipped(&self) -> u64 {
        self.skipped
    }

    fn fill(&mut self) -> std::io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.inner.read(&mut chunk)?;
        if n == 0 {
            self.eof = true;
        } else {
            self.buf.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    }

    fn compact(&mut self) {
        if self.start >= READ_CHUNK {
            self.buf.drain(..self.start);
            self.start = 0;
        }
    }

    /// Next record, or `None` at a clean end of stream.
    ///
    /// The first unreadable record terminates iteration with an error;
    /// this is the strict mode the playback path requires.
    pub fn next_record(&mut self) -> Result<Option<PacketRecord>, CodecError> {
        loop {
            let window = &self.buf[self.start..];
            if window.is_empty() && self.eof {
                return Ok(None);
            }
            match decode_record(window, self.eof) {
                Ok(DecodeOutcome::Complete { record, consumed }) => {
                    self.start += consumed;
                    self.consumed += consumed as u64;
                    self.compact();
                    return Ok(Some(record));
                }
                Ok(DecodeOutcome::Incomplete) => {
                    if self.eof {
                        debug!(
                            trailing = window.len(),
                            "partial record at end of stream, treating as clean end"
                        );
                        return Ok(None);
                    }
                    self.fill().map_err(|e| CodecError::StreamCorruption {
                        offset: self.consumed,
                        reason: format!("read failed: {}", e),
                    })?;
                }
                Err(CodecError::StreamCorruption { offset, reason }) => {
                    return Err(CodecError::StreamCorruption {
                        offset: self.consumed + offset,
                        reason,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn skip_one(&mut self) {
        self.start += 1;
        self.consumed += 1;
        self.skipped += 1;
        self.compact();
    }

    /// Next record, skipping forward one byte at a time past corrupt
    /// regions. Batch analysis mode only; the playback path uses the
    /// strict `next_record`.
    pub fn next_record_lossy(&mut self) -> Result<Option<PacketRecord>, CodecError> {
        loop {
            match self.next_record() {
                Ok(Some(record)) => return Ok(Some(record)),
                Ok(None) => {
                    // A trailing fragment that never completes is part of
                    // the corrupt region in lossy mode, not a clean end
                    if self.eof && self.buf.len() > self.start {
                        self.skip_one();
                        continue;
                    }
                    return Ok(None);
                }
                Err(CodecError::StreamCorruption { offset, reason }) => {
                    if self.skipped == 0 {
                        warn!(offset, %reason, "stream corruption, resynchronizing");
                    }
                    self.skip_one();
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Read every record strictly, stopping cleanly at end of stream
pub fn read_all<R: Read>(reader: R) -> Result<Vec<PacketRecord>, CodecError> {
    let mut packets = Vec::new();
    let mut reader = PacketReader::new(reader);
    while let Some(record) = reader.next_record()? {
        packets.push(record);
    }
    Ok(packets)
}

/// Read every record, resynchronizing past corruption.
///
/// Returns the recovered records and the number of bytes skipped.
pub fn read_all_lossy<R: Read>(reader: R) -> Result<(Vec<PacketRecord>, u64), CodecError> {
    let mut packets = Vec::new();
    let mut reader = PacketReader::new(reader);
    while let Some(record) = reader.next_record_lossy()? {
        packets.push(record);
    }
    Ok((packets, reader.bytes_skipped()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn legacy_record() -> PacketRecord {
        PacketRecord {
            ticks: 637_000_000_000_000_000,
            frequency: 251_000_000.0,
            modulation: Modulation::Am,
            encryption: 0,
            transmitter_unit_id: 16_777_473,
            packet_id: 42,
            transmitter_guid: "agTzmRhDX0SJpBEqdftUKQ".to_string(),
            speaker: None,
            sample_rate: 48_000,
            channel_count: 1,
            coalition: 2,
            audio: Bytes::from_static(&[0x78, 0x01, 0x02, 0x03]),
        }
    }

    fn extended_record() -> PacketRecord {
        PacketRecord {
            speaker: Some(SpeakerInfo {
                name: "Viper 1-1".to_string(),
                guid: "agTzmRhDX0SJpBEqdftUKQ".to_string(),
                coalition: 2,
                seat: 0,
                allow_record: true,
                position: Position {
                    x: -321.5,
                    y: 1850.0,
                    z: 42_000.25,
                },
                unit_type: "F-16C_50".to_string(),
                unit_id: 16_777_473,
            },),
            ..legacy_record()
        }
    }

    fn decode_one(bytes: &[u8]) -> PacketRecord {
        match decode_record(bytes, true).unwrap() {
            DecodeOutcome::Complete { record, consumed } => {
                assert_eq!(consumed, bytes.len());
                record
            }
            DecodeOutcome::Incomplete => panic!("expected complete record"),
        }
    }

    #[test]
    fn test_legacy_roundtrip() {
        let record = legacy_record();
        let bytes = encode_record(&record);
        assert_eq!(decode_one(&bytes), record);
    }

    #[test]
    fn test_extended_roundtrip() {
        let record = extended_record();
        let bytes = encode_record(&record);
        assert_eq!(decode_one(&bytes), record);
    }

    #[test]
    fn test_legacy_synthesizes_speaker() {
        let bytes = encode_record(&legacy_record());
        let decoded = decode_one(&bytes);
        assert!(decoded.speaker.is_none());
        let speaker = decoded.speaker_identity();
        assert_eq!(speaker.guid, "agTzmRhDX0SJpBEqdftUKQ");
        assert_eq!(speaker.name, "agTzmRhDX0SJpBEqdftUKQ");
        assert_eq!(speaker.coalition, 2);
    }

    #[test]
    fn test_empty_payload_is_valid() {
        let record = PacketRecord {
            audio: Bytes::new(),
            ..legacy_record()
        };
        let bytes = encode_record(&record);
        let decoded = decode_one(&bytes);
        assert!(decoded.is_heartbeat());
    }

    #[test]
    fn test_mixed_stream() {
        let mut stream = Vec::new();
        stream.extend_from_slice(&encode_record(&legacy_record()));
        stream.extend_from_slice(&encode_record(&extended_record()));
        stream.extend_from_slice(&encode_record(&legacy_record()));

        let packets = read_all(stream.as_slice()).unwrap();
        assert_eq!(packets.len(), 3);
        assert!(packets[0].speaker.is_none());
        assert!(packets[1].speaker.is_some());
        assert!(packets[2].speaker.is_none());
    }

    #[test]
    fn test_partial_record_is_clean_end() {
        let mut stream = encode_record(&extended_record()).to_vec();
        let full = encode_record(&legacy_record());
        stream.extend_from_slice(&full[..full.len() / 2]);

        let packets = read_all(stream.as_slice()).unwrap();
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn test_strict_stops_on_corruption() {
        let good = encode_record(&legacy_record());
        let mut stream = good.to_vec();
        // Valid fixed header followed by a negative audio length, which
        // fails the extended sanity bounds and then the legacy range check
        stream.extend_from_slice(&good[..52]);
        stream.extend_from_slice(&i32::MIN.to_le_bytes());
        stream.extend_from_slice(&[0xffu8; 8]);

        let mut reader = PacketReader::new(stream.as_slice());
        assert!(reader.next_record().unwrap().is_some());
        assert!(reader.next_record().is_err());
    }

    #[test]
    fn test_lossy_resynchronizes() {
        // Identity fields chosen so no window of the garbage-shifted
        // header scans as a plausible legacy payload length
        let record = PacketRecord {
            transmitter_unit_id: 0x4242_4242,
            packet_id: 0x4242_4242_4242_4242,
            ..extended_record()
        };
        let mut stream = vec![0xffu8; 37];
        stream.extend_from_slice(&encode_record(&record));

        let (packets, skipped) = read_all_lossy(stream.as_slice()).unwrap();
        assert!(skipped >= 37);
        assert!(packets
            .iter()
            .any(|p| p.packet_id == 0x4242_4242_4242_4242 && p.speaker.is_some()));
    }

    #[test]
    fn test_consumed_tracks_stream_position_through_resync() {
        let record = PacketRecord {
            transmitter_unit_id: 0x4242_4242,
            packet_id: 0x4242_4242_4242_4242,
            ..extended_record()
        };
        let mut stream = vec![0xffu8; 37];
        stream.extend_from_slice(&encode_record(&record));
        let total = stream.len() as u64;

        let mut reader = PacketReader::new(stream.as_slice());
        while reader.next_record_lossy().unwrap().is_some() {}

        // Skipped garbage counts toward the stream position, so
        // corruption offsets stay absolute
        assert_eq!(reader.bytes_consumed(), total);
        assert_eq!(reader.bytes_skipped(), 37);
    }

    #[test]
    fn test_guid_padding() {
        let record = PacketRecord {
            transmitter_guid: "short".to_string(),
            ..legacy_record()
        };
        let bytes = encode_record(&record);
        let decoded = decode_one(&bytes);
        assert_eq!(decoded.transmitter_guid, "short");
    }

    proptest! {
        #[test]
        fn prop_legacy_roundtrip(
            ticks in 0i64..i64::MAX / 2,
            frequency in 1.0e6f64..4.0e8,
            modulation in 0u8..8,
            coalition in -2i32..3,
            audio in proptest::collection::vec(any::<u8>(), 0..2000),
        ) {
            let record = PacketRecord {
                ticks,
                frequency,
                modulation: Modulation::from_u8(modulation),
                coalition,
                audio: Bytes::from(audio),
                ..legacy_record()
            };
            let bytes = encode_record(&record);
            prop_assert_eq!(decode_one(&bytes), record);
        }

        #[test]
        fn prop_extended_roundtrip(
            name in "[a-zA-Z0-9 _-]{0,40}",
            unit_type in "[a-zA-Z0-9_-]{0,30}",
            seat in 0i32..4,
            x in -1.0e6f64..1.0e6,
            audio in proptest::collection::vec(any::<u8>(), 0..2000),
        ) {
            let mut record = extended_record();
            {
                let speaker = record.speaker.as_mut().unwrap();
                speaker.name = name;
                speaker.unit_type = unit_type;
                speaker.seat = seat;
                speaker.position.x = x;
            }
            record.audio = Bytes::from(audio);
            let bytes = encode_record(&record);
            prop_assert_eq!(decode_one(&bytes), record);
        }
    }
}
