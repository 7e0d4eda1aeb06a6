//! Opus decoder wrapper
//!
//! One stateful decoder per transmitter: Opus carries prediction state
//! across packets from the same source, so decoders must persist between
//! packets and be reset when temporal continuity breaks (seeks).

use opus::{Channels, Decoder};

use crate::error::AudioError;

/// Stateful Opus decoder for one transmitter
pub struct OpusDecoder {
    decoder: Decoder,
    sample_rate: u32,
    channels: u16,
    /// Decoding buffer (reused to avoid allocations)
    decode_buffer: Vec<f32>,
    frames_decoded: u64,
    decode_failures: u64,
}

impl OpusDecoder {
    /// Create a decoder for the given stream parameters.
    ///
    /// Opus only supports a fixed set of rates; anything else is an
    /// initialization error the caller handles with silence.
    pub fn new(sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        let opus_channels = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            other => return Err(AudioError::UnsupportedChannels(other)),
        };
        if !matches!(sample_rate, 8_000 | 12_000 | 16_000 | 24_000 | 48_000) {
            return Err(AudioError::UnsupportedRate(sample_rate));
        }

        let decoder = Decoder::new(sample_rate, opus_channels)
            .map_err(|e| AudioError::DecoderInit(e.to_string()))?;

        // Max Opus frame is 120 ms
        let decode_buffer = vec![0.0f32; sample_rate as usize * channels as usize * 120 / 1000];

        Ok(Self {
            decoder,
            sample_rate,
            channels,
            decode_buffer,
            frames_decoded: 0,
            decode_failures: 0,
        })
    }

    /// Decode one Opus packet to interleaved f32 samples
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<f32>, AudioError> {
        let samples = self
            .decoder
            .decode_float(data, &mut self.decode_buffer, false)
            .map_err(|e| {
                self.decode_failures += 1;
                AudioError::DecodingFailed(e.to_string())
            })?;

        self.frames_decoded += 1;
        let total = samples * self.channels as usize;
        Ok(self.decode_buffer[..total].to_vec())
    }

    /// Drop accumulated prediction state (after a seek)
    pub fn reset(&mut self) -> Result<(), AudioError> {
        self.decoder
            .reset_state()
            .map_err(|e| AudioError::DecoderInit(e.to_string()))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_creation() {
        assert!(OpusDecoder::new(48_000, 1).is_ok());
        assert!(OpusDecoder::new(48_000, 2).is_ok());
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(matches!(
            OpusDecoder::new(48_000, 3),
            Err(AudioError::UnsupportedChannels(3))
        ));
        assert!(matches!(
            OpusDecoder::new(44_100, 1),
            Err(AudioError::UnsupportedRate(44_100))
        ));
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut encoder =
            opus::Encoder::new(48_000, Channels::Mono, opus::Application::Voip).unwrap();
        let mut decoder = OpusDecoder::new(48_000, 1).unwrap();

        // One 40 ms frame of a 440 Hz tone
        let samples: Vec<f32> = (0..1920)
            .map(|i| (i as f32 / 48_000.0 * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.5)
            .collect();
        let mut packet = vec![0u8; 4000];
        let size = encoder.encode_float(&samples, &mut packet).unwrap();

        let decoded = decoder.decode(&packet[..size]).unwrap();
        assert_eq!(decoded.len(), 1920);
        assert_eq!(decoder.frames_decoded(), 1);
    }

    #[test]
    fn test_malformed_packet_counts_failure() {
        let mut decoder = OpusDecoder::new(48_000, 1).unwrap();
        // A payload that is not a valid Opus TOC sequence
        let result = decoder.decode(&[0x01, 0x02, 0x03]);
        if result.is_err() {
            assert_eq!(decoder.decode_failures(), 1);
        }
    }
}
