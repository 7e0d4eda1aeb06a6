//! # Radio Replay
//!
//! Playback engine for recorded simulated-combat radio traffic.
//!
//! A recording is a headerless sequence of self-describing binary records,
//! each carrying a timestamp, frequency/modulation, transmitter identity and
//! telemetry, and a variable-length audio payload (Opus or raw PCM16).
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          RECORDING FILE                          │
//! │   [record][record][record][record] ...            (no header)    │
//! └───────────────┬──────────────────────────────────────────────────┘
//!                 │ packet::PacketReader (legacy/extended detection)
//!                 ▼
//! ┌──────────────────────┐       ┌────────────────────────────────┐
//! │   FrequencyFilter    │──────▶│  analysis:: activity / summary │
//! │ (channel selection)  │       │        (batch, offline)        │
//! └───────────┬──────────┘       └────────────────────────────────┘
//!             │ filtered packet list
//!             ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     playback::Transport                          │
//! │  ┌──────────────────┐   bounded queue   ┌─────────────────────┐  │
//! │  │  PrefetchBuffer  │──────────────────▶│   10 ms tick loop   │  │
//! │  │  worker thread   │   (count + time   │  (wall-clock pull)  │  │
//! │  │  audio::Stage    │    dual bound)    └──────────┬──────────┘  │
//! │  │  opus / PCM16    │                              │             │
//! │  └──────────────────┘                              ▼             │
//! └──────────────────────────────────────────┬─────────────────────┬─┘
//!                                            ▼                     ▼
//!                                   ┌───────────────┐     ┌────────────┐
//!                                   │ audio::Sink   │     │  events    │
//!                                   │ (cpal / null) │     │ (channel)  │
//!                                   └───────────────┘     └────────────┘
//! ```

pub mod analysis;
pub mod audio;
pub mod config;
pub mod error;
pub mod export;
pub mod filter;
pub mod packet;
pub mod playback;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Fixed output sample rate for playback and export
    pub const OUTPUT_SAMPLE_RATE: u32 = 48_000;

    /// Output channel count (mono radio audio)
    pub const OUTPUT_CHANNELS: u16 = 1;

    /// Nominal transmission frame duration in milliseconds
    pub const FRAME_DURATION_MS: u32 = 40;

    /// Wall-clock ticks per second (one tick = 100 ns)
    pub const TICKS_PER_SECOND: i64 = 10_000_000;

    /// Fixed width of the transmitter GUID field in bytes
    pub const GUID_LENGTH: usize = 22;

    /// Upper bound for any length-prefixed string on the wire
    pub const MAX_STRING_LENGTH: usize = 1000;

    /// Payloads below this size are assumed Opus-compressed
    pub const COMPRESSED_PAYLOAD_MAX: usize = 400;

    /// Upper bound for a single audio payload (corruption guard)
    pub const MAX_PAYLOAD_SIZE: usize = 8 * 1024 * 1024;

    /// Default number of fully processed chunks kept ahead of playback
    pub const DEFAULT_MAX_BUFFERED_CHUNKS: usize = 32;

    /// Default buffered lookahead in milliseconds
    pub const DEFAULT_BUFFER_AHEAD_MS: u64 = 3000;

    /// Delivery tolerance around the playback clock in milliseconds
    pub const DELIVERY_TOLERANCE_MS: u64 = 50;
}
