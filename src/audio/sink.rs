//! Audio output sinks
//!
//! The playback loop writes PCM16 mono frames at the fixed output rate
//! through the `AudioSink` trait. `CpalSink` drives a real device;
//! `NullSink` is the fallback for headless environments and tests.
//!
//! cpal streams are not `Send`, so the stream lives on a dedicated audio
//! thread and the sink handle talks to it through a lock-free sample
//! queue.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::queue::ArrayQueue;
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::SinkError;

/// Output endpoint for decoded playback audio.
///
/// Implementations must treat `write_silence` as a first-class write:
/// some backends stall or glitch when they are starved of data, so the
/// transport feeds silence on under-run instead of skipping the write.
pub trait AudioSink: Send {
    fn start(&mut self) -> Result<(), SinkError>;

    /// Write PCM16 mono samples at the output rate
    fn write(&mut self, pcm: &[i16]) -> Result<(), SinkError>;

    /// Write `frames` samples of silence
    fn write_silence(&mut self, frames: usize) -> Result<(), SinkError>;

    /// Drop any queued-but-unplayed audio (seek support)
    fn clear(&mut self);

    /// Output volume in [0, 1]
    fn set_volume(&mut self, volume: f32);

    fn stop(&mut self);
}

/// Roughly one second of queue at 48 kHz
const SINK_QUEUE_CAPACITY: usize = 48_000;

struct SinkShared {
    queue: ArrayQueue<i16>,
    /// Volume as f32 bits; atomics keep the audio callback lock-free
    volume_bits: AtomicU32,
    shutdown: AtomicBool,
    running: AtomicBool,
    callback_errors: AtomicU64,
}

/// cpal-backed sink. The stream is owned by a dedicated thread; this
/// handle is `Send` and safe to use from the transport tick loop.
pub struct CpalSink {
    shared: Arc<SinkShared>,
    audio_thread: Option<thread::JoinHandle<()>>,
    device_name: Option<String>,
    sample_rate: u32,
}

impl CpalSink {
    /// Create a sink for the named device, or the default output device.
    ///
    /// Probes the device here so a headless environment fails at
    /// construction time, where callers can still pick the null
    /// fallback, rather than deep inside `start`.
    pub fn new(device_name: Option<String>, sample_rate: u32) -> Result<Self, SinkError> {
        let device = resolve_device(device_name.as_deref())?;
        device
            .default_output_config()
            .map_err(|e| SinkError::StreamError(e.to_string()))?;

        Ok(Self {
            shared: Arc::new(SinkShared {
                queue: ArrayQueue::new(SINK_QUEUE_CAPACITY),
                volume_bits: AtomicU32::new(1.0f32.to_bits()),
                shutdown: AtomicBool::new(false),
                running: AtomicBool::new(false),
                callback_errors: AtomicU64::new(0),
            }),
            audio_thread: None,
            device_name,
            sample_rate,
        })
    }

    fn spawn_audio_thread(&mut self) -> Result<(), SinkError> {
        let shared = self.shared.clone();
        let device_name = self.device_name.clone();
        let sample_rate = self.sample_rate;
        // The thread reports stream construction success or failure once
        let (ready_tx, ready_rx) = bounded::<Result<(), SinkError>>(1);

        let handle = thread::Builder::new()
            .name("audio-sink".to_string())
            .spawn(move || {
                let stream = match build_stream(device_name.as_deref(), sample_rate, &shared) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    error!("failed to start stream: {}", e);
                    shared.running.store(false, Ordering::Release);
                    return;
                }
                shared.running.store(true, Ordering::Release);
                while !shared.shutdown.load(Ordering::Acquire) {
                    thread::park_timeout(Duration::from_millis(100));
                }
                shared.running.store(false, Ordering::Release);
                // Stream drops here, on the thread that created it
            })
            .map_err(|e| SinkError::StreamError(e.to_string()))?;

        self.audio_thread = Some(handle);
        ready_rx
            .recv_timeout(Duration::from_secs(5))
            .map_err(|_| SinkError::StreamError("audio thread did not report readiness".into()))?
    }
}

fn resolve_device(device_name: Option<&str>) -> Result<cpal::Device, SinkError> {
    let host = cpal::default_host();
    match device_name {
        Some(name) => host
            .output_devices()
            .map_err(|e| SinkError::DeviceNotFound(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .or_else(|| {
                // Fall back to the default device rather than failing
                warn!("device '{}' not found, using default output", name);
                host.default_output_device()
            })
            .ok_or_else(|| SinkError::DeviceNotFound(name.to_string())),
        None => host
            .default_output_device()
            .ok_or_else(|| SinkError::DeviceNotFound("no default output device".into())),
    }
}

fn build_stream(
    device_name: Option<&str>,
    sample_rate: u32,
    shared: &Arc<SinkShared>,
) -> Result<cpal::Stream, SinkError> {
    let device = resolve_device(device_name)?;

    info!(
        "opening output device: {}",
        device.name().unwrap_or_else(|_| "unknown".into())
    );

    let default_config = device
        .default_output_config()
        .map_err(|e| SinkError::StreamError(e.to_string()))?;
    let channels = default_config.channels().max(1);
    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let callback_shared = shared.clone();
    let err_shared = shared.clone();
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _| {
                let volume =
                    f32::from_bits(callback_shared.volume_bits.load(Ordering::Relaxed));
                for frame in data.chunks_mut(channels as usize) {
                    // Mono source fanned out to every output channel
                    let sample = match callback_shared.queue.pop() {
                        Some(s) => s as f32 / 32768.0 * volume,
                        None => 0.0,
                    };
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            move |e| {
                err_shared.callback_errors.fetch_add(1, Ordering::Relaxed);
                error!("audio stream error: {}", e);
            },
            None,
        )
        .map_err(|e| SinkError::StreamError(e.to_string()))?;

    Ok(stream)
}

impl AudioSink for CpalSink {
    fn start(&mut self) -> Result<(), SinkError> {
        if self.audio_thread.is_some() {
            return Ok(());
        }
        self.shared.shutdown.store(false, Ordering::Release);
        self.spawn_audio_thread()
    }

    fn write(&mut self, pcm: &[i16]) -> Result<(), SinkError> {
        for &sample in pcm {
            if self.shared.queue.push(sample).is_err() {
                // One short backoff, then give up on the remainder
                thread::sleep(Duration::from_millis(10));
                if self.shared.queue.push(sample).is_err() {
                    return Err(SinkError::WriteFailed("sink queue full".into()));
                }
            }
        }
        Ok(())
    }

    fn write_silence(&mut self, frames: usize) -> Result<(), SinkError> {
        for _ in 0..frames {
            // Best effort: a full queue already has audio to play
            if self.shared.queue.push(0).is_err() {
                break;
            }
        }
        Ok(())
    }

    fn clear(&mut self) {
        let mut drained = 0usize;
        while self.shared.queue.pop().is_some() {
            drained += 1;
        }
        debug!(drained, "cleared sink queue");
    }

    fn set_volume(&mut self, volume: f32) {
        self.shared
            .volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn stop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.audio_thread.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sink that discards audio while tracking what was written. Used when
/// no audio device is available and by the test suite.
#[derive(Debug, Default)]
pub struct NullSink {
    started: bool,
    samples_written: u64,
    silence_written: u64,
    clears: u64,
    volume: f32,
}

impl NullSink {
    pub fn new() -> Self {
        Self {
            volume: 1.0,
            ..Default::default()
        }
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn silence_written(&self) -> u64 {
        self.silence_written
    }

    pub fn clears(&self) -> u64 {
        self.clears
    }
}

impl AudioSink for NullSink {
    fn start(&mut self) -> Result<(), SinkError> {
        self.started = true;
        Ok(())
    }

    fn write(&mut self, pcm: &[i16]) -> Result<(), SinkError> {
        self.samples_written += pcm.len() as u64;
        Ok(())
    }

    fn write_silence(&mut self, frames: usize) -> Result<(), SinkError> {
        self.silence_written += frames as u64;
        Ok(())
    }

    fn clear(&mut self) {
        self.clears += 1;
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn stop(&mut self) {
        self.started = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sink_counts_writes() {
        let mut sink = NullSink::new();
        sink.start().unwrap();
        sink.write(&[1, 2, 3]).unwrap();
        sink.write_silence(480).unwrap();
        assert_eq!(sink.samples_written(), 3);
        assert_eq!(sink.silence_written(), 480);
    }

    #[test]
    fn test_cpal_sink_construction_tracks_device_availability() {
        // Construction must reflect device presence so headless callers
        // can fall back to the null sink instead of failing at start
        let has_output = cpal::default_host().default_output_device().is_some();
        assert_eq!(CpalSink::new(None, 48_000).is_ok(), has_output);
    }

    #[test]
    fn test_null_sink_clear_tracked() {
        let mut sink = NullSink::new();
        sink.clear();
        sink.clear();
        assert_eq!(sink.clears(), 2);
    }
}
