//! Playback pipeline: prefetch buffering and transport control

pub mod buffer;
pub mod transport;

pub use buffer::{BufferStats, BufferedAudioChunk, PrefetchBuffer};
pub use transport::{PlaybackEvent, PlaybackState, Transport};
