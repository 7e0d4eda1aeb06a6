//! Transport: play/pause/seek orchestration
//!
//! Playback position is wall-clock driven, not sample driven: a ~10 ms
//! tick loop computes elapsed time since an anchored instant, pulls the
//! matching chunk from the prefetch buffer and writes it to the sink.
//! Under-run writes one tick of silence instead of starving the sink.
//! Progress events are rate-limited to roughly 100 ms.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::audio::{AudioSink, DecodeStage};
use crate::config::PlayerConfig;
use crate::error::{Error, PlaybackError, Result};
use crate::filter::FrequencyFilter;
use crate::packet::PacketRecord;

use super::buffer::PrefetchBuffer;

/// Event queue depth. The channel is bounded and sends never block:
/// when no observer drains events, old sessions cap out here instead of
/// growing without limit.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
    /// Transient: user input stays live, audio delivery is suppressed
    Seeking,
    Stopped,
}

/// Notifications to observers (UI, tests). Progress is rate-limited;
/// `Stopped` always eventually follows `Started`.
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    Started,
    Progress { position: Duration, total: Duration },
    Paused,
    Resumed,
    Seeked(Duration),
    Stopped,
    Error(String),
}

/// Wall-clock playback position: accumulated time plus the running
/// stretch since the last anchor. Pausing drops the anchor so resume
/// does not skip time.
struct Clock {
    accumulated: Duration,
    anchor: Option<Instant>,
}

impl Clock {
    fn position(&self) -> Duration {
        match self.anchor {
            Some(anchor) => self.accumulated + anchor.elapsed(),
            None => self.accumulated,
        }
    }

    fn freeze(&mut self) {
        self.accumulated = self.position();
        self.anchor = None;
    }

    fn run(&mut self) {
        if self.anchor.is_none() {
            self.anchor = Some(Instant::now());
        }
    }

    fn jump_to(&mut self, position: Duration, running: bool) {
        self.accumulated = position;
        self.anchor = if running { Some(Instant::now()) } else { None };
    }
}

struct TransportShared {
    state: Mutex<PlaybackState>,
    clock: Mutex<Clock>,
    scrubbing: AtomicBool,
    cancel_tick: AtomicBool,
    /// Sink settling window after a seek; delivery stays silent until
    /// this instant so cleared-but-unflushed audio cannot resurface
    cooldown_until: Mutex<Option<Instant>>,
}

/// Playback session controller
pub struct Transport {
    config: PlayerConfig,
    shared: Arc<TransportShared>,
    sink: Arc<Mutex<Box<dyn AudioSink>>>,
    events_tx: crossbeam_channel::Sender<PlaybackEvent>,
    events_rx: crossbeam_channel::Receiver<PlaybackEvent>,
    packets: Option<Arc<Vec<PacketRecord>>>,
    origin_ticks: i64,
    total: Duration,
    transmitter_gains: HashMap<String, f32>,
    buffer: Option<Arc<PrefetchBuffer>>,
    tick_handle: Option<thread::JoinHandle<()>>,
}

impl Transport {
    pub fn new(config: PlayerConfig, sink: Box<dyn AudioSink>) -> Result<Self> {
        config.validate()?;
        let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            config,
            shared: Arc::new(TransportShared {
                state: Mutex::new(PlaybackState::Idle),
                clock: Mutex::new(Clock {
                    accumulated: Duration::ZERO,
                    anchor: None,
                }),
                scrubbing: AtomicBool::new(false),
                cancel_tick: AtomicBool::new(false),
                cooldown_until: Mutex::new(None),
            }),
            sink: Arc::new(Mutex::new(sink)),
            events_tx,
            events_rx,
            packets: None,
            origin_ticks: 0,
            total: Duration::ZERO,
            transmitter_gains: HashMap::new(),
            buffer: None,
            tick_handle: None,
        })
    }

    /// Event stream for observers
    pub fn events(&self) -> crossbeam_channel::Receiver<PlaybackEvent> {
        self.events_rx.clone()
    }

    pub fn state(&self) -> PlaybackState {
        *self.shared.state.lock()
    }

    pub fn position(&self) -> Duration {
        self.shared.clock.lock().position().min(self.total)
    }

    pub fn total_duration(&self) -> Duration {
        self.total
    }

    /// Per-transmitter gain, effective from the next `play`
    pub fn set_transmitter_gain(&mut self, guid: &str, gain: f32) {
        self.transmitter_gains
            .insert(guid.to_string(), gain.clamp(0.0, 2.0));
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.sink.lock().set_volume(volume);
    }

    /// Filter and load a packet list. The filter is applied here, once;
    /// changing it later requires another `load`.
    pub fn load(&mut self, packets: Vec<PacketRecord>, filter: &FrequencyFilter) -> Result<()> {
        *self.shared.state.lock() = PlaybackState::Loading;

        let mut selected: Vec<PacketRecord> =
            packets.into_iter().filter(|p| filter.should_include(p)).collect();
        selected.sort_by_key(|p| p.ticks);

        if selected.is_empty() {
            *self.shared.state.lock() = PlaybackState::Idle;
            return Err(Error::Playback(PlaybackError::EmptySession));
        }

        self.origin_ticks = selected[0].ticks;
        self.total = match selected.last() {
            Some(last) => last.offset_since(self.origin_ticks) + last.audio_duration(),
            None => Duration::ZERO,
        };
        info!(
            packets = selected.len(),
            total_ms = self.total.as_millis() as u64,
            "session loaded"
        );
        self.packets = Some(Arc::new(selected));
        *self.shared.state.lock() = PlaybackState::Idle;
        Ok(())
    }

    /// Start playback from the current position (the beginning on a
    /// fresh or stopped session).
    pub fn play(&mut self) -> Result<()> {
        let packets = self
            .packets
            .clone()
            .ok_or(Error::Playback(PlaybackError::EmptySession))?;

        match self.state() {
            PlaybackState::Idle | PlaybackState::Stopped => {}
            PlaybackState::Paused => return self.resume(),
            other => {
                return Err(Error::Playback(PlaybackError::InvalidState(format!(
                    "cannot play from {:?}",
                    other
                ))))
            }
        }

        // A stopped session restarts from zero
        self.teardown_workers();
        self.shared.clock.lock().jump_to(Duration::ZERO, false);
        *self.shared.cooldown_until.lock() = None;

        let buffer = Arc::new(PrefetchBuffer::new(
            &self.config,
            packets.clone(),
            self.origin_ticks,
        )?);
        let mut stage =
            DecodeStage::with_master_gain(self.config.output_sample_rate, self.config.master_gain);
        stage.set_transmitter_gains(self.transmitter_gains.clone());
        buffer.start(0, stage)?;

        self.sink.lock().start().map_err(Error::Sink)?;

        self.shared.cancel_tick.store(false, Ordering::Release);
        let handle = self.spawn_tick_loop(buffer.clone())?;
        self.buffer = Some(buffer);
        self.tick_handle = Some(handle);

        self.shared.clock.lock().run();
        *self.shared.state.lock() = PlaybackState::Playing;
        let _ = self.events_tx.try_send(PlaybackEvent::Started);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if *state != PlaybackState::Playing {
            return Err(Error::Playback(PlaybackError::InvalidState(format!(
                "cannot pause from {:?}",
                *state
            ))));
        }
        self.shared.clock.lock().freeze();
        *state = PlaybackState::Paused;
        drop(state);
        let _ = self.events_tx.try_send(PlaybackEvent::Paused);
        debug!("paused");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if *state != PlaybackState::Paused {
            return Err(Error::Playback(PlaybackError::InvalidState(format!(
                "cannot resume from {:?}",
                *state
            ))));
        }
        // Re-anchor at the frozen position so no time is skipped
        self.shared.clock.lock().run();
        *state = PlaybackState::Playing;
        drop(state);
        let _ = self.events_tx.try_send(PlaybackEvent::Resumed);
        debug!("resumed");
        Ok(())
    }

    /// Jump to a position. Buffer cursor, sink queue and wall clock are
    /// re-anchored together under the `Seeking` state, which suppresses
    /// delivery until the sink settles.
    pub fn seek(&mut self, position: Duration) -> Result<()> {
        let packets = self
            .packets
            .clone()
            .ok_or(Error::Playback(PlaybackError::EmptySession))?;
        let buffer = match &self.buffer {
            Some(buffer) => buffer.clone(),
            None => return Err(Error::Playback(PlaybackError::InvalidState(
                "no active session".into(),
            ))),
        };

        let position = position.min(self.total);
        let prior = {
            let mut state = self.shared.state.lock();
            let prior = *state;
            match prior {
                PlaybackState::Playing | PlaybackState::Paused => {}
                other => {
                    return Err(Error::Playback(PlaybackError::InvalidState(format!(
                        "cannot seek from {:?}",
                        other
                    ))))
                }
            }
            *state = PlaybackState::Seeking;
            prior
        };

        let index = packets
            .partition_point(|p| p.offset_since(self.origin_ticks) < position);
        buffer.seek(index)?;
        self.sink.lock().clear();
        self.shared
            .clock
            .lock()
            .jump_to(position, prior == PlaybackState::Playing);
        *self.shared.cooldown_until.lock() =
            Some(Instant::now() + self.config.seek_cooldown());

        *self.shared.state.lock() = prior;
        let _ = self.events_tx.try_send(PlaybackEvent::Seeked(position));
        debug!(?position, index, "seek");
        Ok(())
    }

    /// While scrubbing, chunks are discarded and the sink gets silence,
    /// so drag-seeking cannot flood the device with stale audio.
    pub fn set_scrubbing(&mut self, scrubbing: bool) {
        self.shared.scrubbing.store(scrubbing, Ordering::Release);
    }

    /// Stop playback. Blocks briefly for worker shutdown but never
    /// hangs; emits `Stopped` exactly once per started session.
    pub fn stop(&mut self) -> Result<()> {
        let was_active = !matches!(
            self.state(),
            PlaybackState::Idle | PlaybackState::Stopped
        );
        self.teardown_workers();
        self.shared.clock.lock().freeze();
        *self.shared.state.lock() = PlaybackState::Stopped;
        if was_active {
            let _ = self.events_tx.try_send(PlaybackEvent::Stopped);
        }
        info!("stopped");
        Ok(())
    }

    fn teardown_workers(&mut self) {
        self.shared.cancel_tick.store(true, Ordering::Release);
        if let Some(handle) = self.tick_handle.take() {
            let _ = handle.join();
        }
        if let Some(buffer) = self.buffer.take() {
            if buffer.stop().is_err() {
                warn!("prefetch worker abandoned after stop timeout");
            }
        }
        let mut sink = self.sink.lock();
        sink.clear();
        sink.stop();
    }

    fn spawn_tick_loop(&self, buffer: Arc<PrefetchBuffer>) -> Result<thread::JoinHandle<()>> {
        let shared = self.shared.clone();
        let sink = self.sink.clone();
        let events = self.events_tx.clone();
        let total = self.total;
        let tick = self.config.tick_interval();
        let progress_every = self.config.progress_interval();
        let silence_frames =
            (self.config.output_sample_rate as u64 * tick.as_millis() as u64 / 1000) as usize;

        thread::Builder::new()
            .name("transport-tick".to_string())
            .spawn(move || {
                tick_loop(
                    shared,
                    buffer,
                    sink,
                    events,
                    total,
                    tick,
                    progress_every,
                    silence_frames,
                );
            })
            .map_err(|e| Error::Playback(PlaybackError::InvalidState(e.to_string())))
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.teardown_workers();
    }
}

#[allow(clippy::too_many_arguments)]
fn tick_loop(
    shared: Arc<TransportShared>,
    buffer: Arc<PrefetchBuffer>,
    sink: Arc<Mutex<Box<dyn AudioSink>>>,
    events: crossbeam_channel::Sender<PlaybackEvent>,
    total: Duration,
    tick: Duration,
    progress_every: Duration,
    silence_frames: usize,
) {
    let mut last_progress = Instant::now();

    loop {
        thread::sleep(tick);
        if shared.cancel_tick.load(Ordering::Acquire) {
            return;
        }

        let state = *shared.state.lock();
        match state {
            PlaybackState::Paused => continue,
            PlaybackState::Playing | PlaybackState::Seeking => {}
            _ => continue,
        }

        let position = shared.clock.lock().position();

        // Scrub, seek-transient and cool-down windows all get silence:
        // the sink keeps flowing but no stale audio is delivered
        let in_cooldown = shared
            .cooldown_until
            .lock()
            .map(|until| Instant::now() < until)
            .unwrap_or(false);
        let suppressed = state == PlaybackState::Seeking
            || shared.scrubbing.load(Ordering::Acquire)
            || in_cooldown;

        if suppressed {
            let _ = sink.lock().write_silence(silence_frames);
            continue;
        }

        match buffer.try_take_ready(position) {
            Some(chunk) => {
                let write = sink.lock().write(&chunk.pcm);
                if let Err(first) = write {
                    warn!("sink write failed, retrying: {}", first);
                    thread::sleep(Duration::from_millis(20));
                    if let Err(second) = sink.lock().write(&chunk.pcm) {
                        let _ = events.try_send(PlaybackEvent::Error(second.to_string()));
                        *shared.state.lock() = PlaybackState::Stopped;
                        let _ = events.try_send(PlaybackEvent::Stopped);
                        return;
                    }
                }
            }
            None => {
                if position >= total && buffer.is_drained() {
                    // Natural end of session
                    shared.clock.lock().freeze();
                    *shared.state.lock() = PlaybackState::Stopped;
                    let _ = events.try_send(PlaybackEvent::Stopped);
                    return;
                }
                // Under-run: one tick of silence keeps the sink alive
                let _ = sink.lock().write_silence(silence_frames);
            }
        }

        if last_progress.elapsed() >= progress_every {
            last_progress = Instant::now();
            let _ = events.try_send(PlaybackEvent::Progress {
                position: position.min(total),
                total,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::NullSink;
    use crate::packet::Modulation;
    use bytes::Bytes;

    fn pcm_packet(index: u64, ticks: i64) -> PacketRecord {
        let mut audio = Vec::with_capacity(1920 * 2);
        for _ in 0..1920 {
            audio.extend_from_slice(&8000i16.to_le_bytes());
        }
        PacketRecord {
            ticks,
            frequency: 305.0e6,
            modulation: Modulation::Am,
            encryption: 0,
            transmitter_unit_id: 7,
            packet_id: index,
            transmitter_guid: "tick-test-guid-0000000".to_string(),
            speaker: None,
            sample_rate: 48_000,
            channel_count: 1,
            coalition: 1,
            audio: Bytes::from(audio),
        }
    }

    fn short_session() -> Vec<PacketRecord> {
        // 5 packets, 40 ms apart: 240 ms total
        (0..5).map(|i| pcm_packet(i, i as i64 * 400_000)).collect()
    }

    fn long_session() -> Vec<PacketRecord> {
        // 50 packets, 40 ms apart: 2 s total
        (0..50).map(|i| pcm_packet(i, i as i64 * 400_000)).collect()
    }

    fn transport() -> Transport {
        Transport::new(PlayerConfig::default(), Box::new(NullSink::new())).unwrap()
    }

    /// Sink whose counters stay readable after the box moves into the
    /// transport
    #[derive(Clone, Default)]
    struct CountingSink {
        samples: Arc<std::sync::atomic::AtomicU64>,
        silence: Arc<std::sync::atomic::AtomicU64>,
    }

    impl AudioSink for CountingSink {
        fn start(&mut self) -> std::result::Result<(), crate::error::SinkError> {
            Ok(())
        }

        fn write(&mut self, pcm: &[i16]) -> std::result::Result<(), crate::error::SinkError> {
            self.samples.fetch_add(pcm.len() as u64, Ordering::Relaxed);
            Ok(())
        }

        fn write_silence(
            &mut self,
            frames: usize,
        ) -> std::result::Result<(), crate::error::SinkError> {
            self.silence.fetch_add(frames as u64, Ordering::Relaxed);
            Ok(())
        }

        fn clear(&mut self) {}

        fn set_volume(&mut self, _volume: f32) {}

        fn stop(&mut self) {}
    }

    fn drain_events(rx: &crossbeam_channel::Receiver<PlaybackEvent>) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_load_requires_matching_packets() {
        let mut t = transport();
        let mut filter = FrequencyFilter::new();
        filter.select(crate::packet::FrequencyModulationKey::new(
            999.0e6,
            Modulation::Fm,
        ));
        assert!(t.load(short_session(), &filter).is_err());
        assert_eq!(t.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_play_pause_resume_clock() {
        let mut t = transport();
        t.load(short_session(), &FrequencyFilter::new()).unwrap();
        t.play().unwrap();
        assert_eq!(t.state(), PlaybackState::Playing);

        thread::sleep(Duration::from_millis(60));
        t.pause().unwrap();
        let frozen = t.position();
        thread::sleep(Duration::from_millis(60));
        // Position does not advance while paused
        assert_eq!(t.position(), frozen);

        t.resume().unwrap();
        thread::sleep(Duration::from_millis(30));
        assert!(t.position() > frozen);
        t.stop().unwrap();
    }

    #[test]
    fn test_session_ends_with_stopped_event() {
        let mut t = transport();
        t.load(short_session(), &FrequencyFilter::new()).unwrap();
        let rx = t.events();
        t.play().unwrap();

        // 240 ms session: wait for the natural end
        let deadline = Instant::now() + Duration::from_secs(3);
        while t.state() != PlaybackState::Stopped && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(t.state(), PlaybackState::Stopped);

        let events = drain_events(&rx);
        assert!(matches!(events.first(), Some(PlaybackEvent::Started)));
        assert!(events
            .iter()
            .any(|e| matches!(e, PlaybackEvent::Stopped)));
    }

    #[test]
    fn test_stop_emits_event_once() {
        let mut t = transport();
        t.load(short_session(), &FrequencyFilter::new()).unwrap();
        let rx = t.events();
        t.play().unwrap();
        t.stop().unwrap();
        // Stopping an already stopped session emits nothing further
        t.stop().unwrap();

        let stopped = drain_events(&rx)
            .iter()
            .filter(|e| matches!(e, PlaybackEvent::Stopped))
            .count();
        assert_eq!(stopped, 1);
    }

    #[test]
    fn test_seek_reanchors_position() {
        let mut t = transport();
        t.load(short_session(), &FrequencyFilter::new()).unwrap();
        t.play().unwrap();

        t.seek(Duration::from_millis(120)).unwrap();
        let position = t.position();
        assert!(position >= Duration::from_millis(120));
        assert!(position < Duration::from_millis(200));
        t.stop().unwrap();
    }

    #[test]
    fn test_seek_from_paused_stays_paused() {
        let mut t = transport();
        t.load(short_session(), &FrequencyFilter::new()).unwrap();
        t.play().unwrap();
        t.pause().unwrap();

        t.seek(Duration::from_millis(80)).unwrap();
        assert_eq!(t.state(), PlaybackState::Paused);
        assert_eq!(t.position(), Duration::from_millis(80));
        t.stop().unwrap();
    }

    #[test]
    fn test_restart_after_stop() {
        let mut t = transport();
        t.load(short_session(), &FrequencyFilter::new()).unwrap();
        t.play().unwrap();
        t.stop().unwrap();
        assert_eq!(t.state(), PlaybackState::Stopped);

        t.play().unwrap();
        assert_eq!(t.state(), PlaybackState::Playing);
        assert!(t.position() < Duration::from_millis(50));
        t.stop().unwrap();
    }

    #[test]
    fn test_scrubbing_delivers_only_silence() {
        let sink = CountingSink::default();
        let mut t = Transport::new(PlayerConfig::default(), Box::new(sink.clone())).unwrap();
        t.load(long_session(), &FrequencyFilter::new()).unwrap();
        t.play().unwrap();
        thread::sleep(Duration::from_millis(60));

        t.set_scrubbing(true);
        // Let any tick already past the suppression check finish
        thread::sleep(Duration::from_millis(40));
        let samples_before = sink.samples.load(Ordering::Relaxed);
        let silence_before = sink.silence.load(Ordering::Relaxed);

        thread::sleep(Duration::from_millis(120));
        assert_eq!(sink.samples.load(Ordering::Relaxed), samples_before);
        assert!(sink.silence.load(Ordering::Relaxed) > silence_before);

        t.set_scrubbing(false);
        thread::sleep(Duration::from_millis(150));
        assert!(sink.samples.load(Ordering::Relaxed) > samples_before);
        t.stop().unwrap();
    }

    #[test]
    fn test_seek_cooldown_delivers_only_silence() {
        let config = PlayerConfig {
            seek_cooldown_ms: 400,
            ..Default::default()
        };
        let sink = CountingSink::default();
        let mut t = Transport::new(config, Box::new(sink.clone())).unwrap();
        t.load(long_session(), &FrequencyFilter::new()).unwrap();
        t.play().unwrap();
        thread::sleep(Duration::from_millis(60));

        t.seek(Duration::from_millis(400)).unwrap();
        thread::sleep(Duration::from_millis(40));
        let samples_before = sink.samples.load(Ordering::Relaxed);
        let silence_before = sink.silence.load(Ordering::Relaxed);

        // Well inside the 400 ms window: silence only
        thread::sleep(Duration::from_millis(200));
        assert_eq!(sink.samples.load(Ordering::Relaxed), samples_before);
        assert!(sink.silence.load(Ordering::Relaxed) > silence_before);

        // After the window expires, audio flows again
        thread::sleep(Duration::from_millis(400));
        assert!(sink.samples.load(Ordering::Relaxed) > samples_before);
        t.stop().unwrap();
    }

    #[test]
    fn test_event_channel_is_bounded() {
        let t = transport();
        assert_eq!(t.events().capacity(), Some(EVENT_CHANNEL_CAPACITY));
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut t = transport();
        assert!(t.play().is_err());
        assert!(t.pause().is_err());
        assert!(t.resume().is_err());

        t.load(short_session(), &FrequencyFilter::new()).unwrap();
        assert!(t.pause().is_err());
        assert!(t.seek(Duration::ZERO).is_err());
    }
}
