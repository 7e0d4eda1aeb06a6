//! Prefetch buffer
//!
//! A background worker pulls packets from the session list, runs them
//! through the decode stage and queues finished PCM16 chunks ahead of
//! the playback clock. Two independent bounds keep memory flat: a chunk
//! count bound and a time-ahead bound. The consumer polls
//! `try_take_ready` against its clock; a chunk is only released when its
//! offset is within the delivery tolerance of that clock.
//!
//! Long work (decode, resample) never happens under the state mutex; the
//! lock covers only cursor/queue bookkeeping.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::audio::{to_pcm16, DecodeStage};
use crate::config::PlayerConfig;
use crate::error::{Error, PlaybackError, Result};
use crate::packet::PacketRecord;

/// One fully processed chunk, consumed exactly once by the transport
#[derive(Debug, Clone)]
pub struct BufferedAudioChunk {
    /// Mono PCM16 at the output rate
    pub pcm: Vec<i16>,
    /// Time since session start at which this chunk plays
    pub playback_offset: Duration,
    /// Index into the session packet list
    pub packet_index: usize,
    /// Source record, for event/UI correlation
    pub record: PacketRecord,
}

#[derive(Debug, Default)]
struct Counters {
    chunks_produced: AtomicU64,
    stale_dropped: AtomicU64,
    decode_failures: AtomicU64,
}

/// Snapshot of buffer health
#[derive(Debug, Clone)]
pub struct BufferStats {
    pub queued: usize,
    pub cursor: usize,
    pub chunks_produced: u64,
    pub stale_dropped: u64,
    pub decode_failures: u64,
}

struct BufferState {
    queue: VecDeque<BufferedAudioChunk>,
    /// Next packet index the worker will process
    cursor: usize,
    /// Bumped on every seek; chunks from an old generation are discarded
    generation: u64,
    /// Worker must drop decoder state before the next packet
    reset_decoders: bool,
    /// Consumer's playback clock, updated on every poll
    current_time: Duration,
}

/// Bounded producer/consumer pipeline between the decode stage and the
/// transport tick loop.
pub struct PrefetchBuffer {
    packets: Arc<Vec<PacketRecord>>,
    origin_ticks: i64,
    max_chunks: usize,
    ahead: Duration,
    tolerance: Duration,
    stop_grace: Duration,
    state: Arc<Mutex<BufferState>>,
    cancel: Arc<AtomicBool>,
    counters: Arc<Counters>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    done_rx: Mutex<Option<crossbeam_channel::Receiver<()>>>,
}

impl PrefetchBuffer {
    /// Validates configuration before any background work starts.
    pub fn new(
        config: &PlayerConfig,
        packets: Arc<Vec<PacketRecord>>,
        origin_ticks: i64,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            packets,
            origin_ticks,
            max_chunks: config.max_buffered_chunks,
            ahead: config.buffer_ahead(),
            tolerance: config.delivery_tolerance(),
            stop_grace: config.stop_grace(),
            state: Arc::new(Mutex::new(BufferState {
                queue: VecDeque::new(),
                cursor: 0,
                generation: 0,
                reset_decoders: false,
                current_time: Duration::ZERO,
            })),
            cancel: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            worker: Mutex::new(None),
            done_rx: Mutex::new(None),
        })
    }

    /// Start the decode worker at `start_index`. The stage carries the
    /// session's gain settings and owns the per-transmitter decoders.
    pub fn start(&self, start_index: usize, stage: DecodeStage) -> Result<()> {
        if start_index > self.packets.len() {
            return Err(Error::Playback(PlaybackError::SeekOutOfRange {
                index: start_index,
                len: self.packets.len(),
            }));
        }
        let mut worker_slot = self.worker.lock();
        if worker_slot.is_some() {
            return Err(Error::Playback(PlaybackError::InvalidState(
                "buffer already started".into(),
            )));
        }

        {
            let mut state = self.state.lock();
            state.queue.clear();
            state.cursor = start_index;
            state.reset_decoders = false;
            state.current_time = self
                .packets
                .get(start_index)
                .map(|p| p.offset_since(self.origin_ticks))
                .unwrap_or(Duration::ZERO);
        }
        self.cancel.store(false, Ordering::Release);

        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);
        *self.done_rx.lock() = Some(done_rx);

        let packets = self.packets.clone();
        let state = self.state.clone();
        let cancel = self.cancel.clone();
        let counters = self.counters.clone();
        let origin_ticks = self.origin_ticks;
        let max_chunks = self.max_chunks;
        let ahead = self.ahead;

        let handle = thread::Builder::new()
            .name("prefetch-worker".to_string())
            .spawn(move || {
                worker_loop(
                    packets,
                    state,
                    cancel,
                    counters,
                    origin_ticks,
                    max_chunks,
                    ahead,
                    stage,
                );
                let _ = done_tx.send(());
            })
            .map_err(|e| Error::Playback(PlaybackError::InvalidState(e.to_string())))?;

        *worker_slot = Some(handle);
        Ok(())
    }

    /// Release a chunk only when its offset is within the tolerance of
    /// the caller's clock. Chunks the clock has passed are stale and are
    /// dropped, never delivered late.
    pub fn try_take_ready(&self, current_time: Duration) -> Option<BufferedAudioChunk> {
        let mut state = self.state.lock();
        state.current_time = current_time;

        loop {
            let front_offset = state.queue.front()?.playback_offset;
            if front_offset + self.tolerance < current_time {
                state.queue.pop_front();
                self.counters.stale_dropped.fetch_add(1, Ordering::Relaxed);
                trace!(?front_offset, ?current_time, "dropped stale chunk");
                continue;
            }
            if front_offset <= current_time + self.tolerance {
                return state.queue.pop_front();
            }
            return None;
        }
    }

    /// Jump the cursor. The queue is drained (restoring all permits),
    /// the generation advances so in-flight work is discarded, and the
    /// worker resets its decoder state before the next packet.
    pub fn seek(&self, index: usize) -> Result<()> {
        if index > self.packets.len() {
            return Err(Error::Playback(PlaybackError::SeekOutOfRange {
                index,
                len: self.packets.len(),
            }));
        }
        let mut state = self.state.lock();
        state.queue.clear();
        state.cursor = index;
        state.generation += 1;
        state.reset_decoders = true;
        state.current_time = self
            .packets
            .get(index)
            .map(|p| p.offset_since(self.origin_ticks))
            .unwrap_or(Duration::ZERO);
        debug!(index, generation = state.generation, "buffer seek");
        Ok(())
    }

    /// True when every packet has been processed and delivered
    pub fn is_drained(&self) -> bool {
        let state = self.state.lock();
        state.cursor >= self.packets.len() && state.queue.is_empty()
    }

    /// Signal cancellation and wait up to the grace period for the
    /// worker to exit. Never hangs: a stuck worker is abandoned.
    pub fn stop(&self) -> Result<()> {
        self.cancel.store(true, Ordering::Release);
        let done_rx = self.done_rx.lock().take();
        let handle = self.worker.lock().take();
        if let Some(done_rx) = done_rx {
            match done_rx.recv_timeout(self.stop_grace) {
                Ok(()) => {
                    if let Some(handle) = handle {
                        let _ = handle.join();
                    }
                    Ok(())
                }
                Err(_) => {
                    warn!("prefetch worker did not stop within grace period");
                    Err(Error::Playback(PlaybackError::StopTimeout))
                }
            }
        } else {
            Ok(())
        }
    }

    pub fn stats(&self) -> BufferStats {
        let state = self.state.lock();
        BufferStats {
            queued: state.queue.len(),
            cursor: state.cursor,
            chunks_produced: self.counters.chunks_produced.load(Ordering::Relaxed),
            stale_dropped: self.counters.stale_dropped.load(Ordering::Relaxed),
            decode_failures: self.counters.decode_failures.load(Ordering::Relaxed),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    packets: Arc<Vec<PacketRecord>>,
    state: Arc<Mutex<BufferState>>,
    cancel: Arc<AtomicBool>,
    counters: Arc<Counters>,
    origin_ticks: i64,
    max_chunks: usize,
    ahead: Duration,
    mut stage: DecodeStage,
) {
    let mut consecutive_failures = 0u32;

    while !cancel.load(Ordering::Acquire) {
        // Short critical section: bookkeeping only
        let job = {
            let mut state = state.lock();
            if state.reset_decoders {
                stage.reset();
                state.reset_decoders = false;
            }
            if state.queue.len() >= max_chunks {
                None
            } else if state.cursor >= packets.len() {
                None
            } else {
                let index = state.cursor;
                let offset = packets[index].offset_since(origin_ticks);
                if offset > state.current_time + ahead {
                    None
                } else {
                    state.cursor += 1;
                    Some((index, state.generation))
                }
            }
        };

        let (index, generation) = match job {
            Some(job) => job,
            None => {
                thread::sleep(Duration::from_millis(5));
                continue;
            }
        };

        // Decode outside the lock
        let record = &packets[index];
        let failures_before = stage.stats().decode_failures;
        let samples = stage.process(record);
        let failed = stage.stats().decode_failures > failures_before;
        if failed {
            counters.decode_failures.fetch_add(1, Ordering::Relaxed);
            consecutive_failures += 1;
        } else {
            consecutive_failures = 0;
        }

        if !samples.is_empty() {
            let chunk = BufferedAudioChunk {
                pcm: to_pcm16(&samples),
                playback_offset: record.offset_since(origin_ticks),
                packet_index: index,
                record: record.clone(),
            };
            let mut state = state.lock();
            // A seek may have happened while decoding; stale work is
            // discarded rather than delivered out of order
            if state.generation == generation {
                state.queue.push_back(chunk);
                counters.chunks_produced.fetch_add(1, Ordering::Relaxed);
            }
        }

        // A run of undecodable packets must not become a spin loop
        if consecutive_failures >= 10 {
            thread::sleep(Duration::from_millis(50));
        }
    }
}
