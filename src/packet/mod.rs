//! On-disk packet stream: record types and wire codec

pub mod codec;
pub mod record;

pub use codec::{decode_record, encode_record, read_all, read_all_lossy, DecodeOutcome, PacketReader};
pub use record::{FrequencyModulationKey, Modulation, PacketRecord, Position, SpeakerInfo};
