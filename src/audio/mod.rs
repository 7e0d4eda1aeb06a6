//! Audio subsystem: payload decode, resample/gain stage, output sinks

pub mod decoder;
pub mod effects;
pub mod sink;
pub mod stage;

pub use decoder::OpusDecoder;
pub use effects::RadioEffect;
pub use sink::{AudioSink, CpalSink, NullSink};
pub use stage::{classify_payload, to_pcm16, DecodeStage, PayloadFormat, StageStats};
