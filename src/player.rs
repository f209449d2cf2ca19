//! Player lifecycle: configure a format, start a run, feed chunks, stop.
//!
//! One [`Player`] owns one session state at a time. Transitions are
//! serialized under an internal mutex; the current state is also kept in
//! an atomic cell so the producer-facing [`Player::push_chunk`] never
//! waits on a transition in progress. Each run gets a fresh queue and a
//! fresh device session, so an abandoned worker from a timed-out stop can
//! never race a successor run.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::config::PlayerConfig;
use crate::device::{CpalBackend, DeviceBackend};
use crate::error::{PlayerError, Result};
use crate::format::{AudioFormat, HeaderInfo};
use crate::queue::ChunkQueue;
use crate::status::{EndReason, PlayerStatusState, StatusSnapshot};
use crate::worker;

/// Lifecycle state of a player.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// No run yet; a format may or may not be set.
    Idle = 0,
    /// `start()` is opening the device and launching the worker.
    Starting = 1,
    /// Worker is draining the queue into the device.
    Playing = 2,
    /// `stop()` is waiting for the worker to wind down.
    Stopping = 3,
    /// The last run ended (requested stop or device failure); a new
    /// `start()` is allowed.
    Stopped = 4,
    /// `close()` was called; the player is finished.
    Closed = 5,
}

/// Atomically readable state cell shared with the worker.
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: SessionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> SessionState {
        match self.0.load(Ordering::Acquire) {
            0 => SessionState::Idle,
            1 => SessionState::Starting,
            2 => SessionState::Playing,
            3 => SessionState::Stopping,
            4 => SessionState::Stopped,
            _ => SessionState::Closed,
        }
    }

    pub(crate) fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Per-run handle kept while a worker is (or may still be) alive.
struct RunHandle {
    running: Arc<AtomicBool>,
    written: Arc<AtomicU64>,
    worker: worker::WorkerHandle,
}

struct Inner {
    format: Option<AudioFormat>,
    run: Option<RunHandle>,
}

/// Real-time PCM chunk player.
///
/// The producer thread calls [`push_chunk`](Self::push_chunk); a worker
/// thread owns the device session and drains the queue. Exactly one PCM
/// stream plays through exactly one open device session at a time.
pub struct Player {
    backend: Arc<dyn DeviceBackend>,
    config: PlayerConfig,
    state: Arc<StateCell>,
    status: Arc<Mutex<PlayerStatusState>>,
    /// Producer-visible queue for the current run; swapped on `start()`.
    queue: RwLock<Arc<ChunkQueue>>,
    inner: Mutex<Inner>,
}

impl Player {
    /// Create a player backed by the host's CPAL output devices.
    pub fn new(config: PlayerConfig) -> Self {
        let backend = Arc::new(CpalBackend::new(config.device.clone()));
        Self::with_backend(backend, config)
    }

    /// Create a player over a custom device backend (tests use this to
    /// substitute a recording fake).
    pub fn with_backend(backend: Arc<dyn DeviceBackend>, config: PlayerConfig) -> Self {
        let queue = Arc::new(ChunkQueue::new(config.queue_capacity));
        Self {
            backend,
            config,
            state: Arc::new(StateCell::new(SessionState::Idle)),
            status: PlayerStatusState::shared(),
            queue: RwLock::new(queue),
            inner: Mutex::new(Inner {
                format: None,
                run: None,
            }),
        }
    }

    /// Set the PCM format for the next run.
    ///
    /// A run in progress keeps the format it started with; the new value
    /// applies from the next `start()`.
    pub fn set_format(&self, sample_width_bytes: u16, channels: u16, sample_rate_hz: u32) {
        let format = AudioFormat::new(sample_width_bytes, channels, sample_rate_hz);
        self.inner.lock().unwrap().format = Some(format);
    }

    /// Set the PCM format from externally parsed container header info.
    pub fn set_format_from_header(&self, info: &HeaderInfo) {
        let format = AudioFormat::from_header(info);
        self.inner.lock().unwrap().format = Some(format);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Snapshot of the current run's status.
    pub fn status(&self) -> StatusSnapshot {
        self.status.lock().unwrap().snapshot()
    }

    /// Open a device session and launch the playback worker.
    ///
    /// No-op when already starting, playing, stopping, or closed. Requires
    /// a configured format. A device open/start failure leaves the player
    /// in [`SessionState::Stopped`].
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        self.reap_finished(&mut inner);

        match self.state.get() {
            SessionState::Idle | SessionState::Stopped => {}
            _ => return Ok(()),
        }
        let format = inner.format.ok_or(PlayerError::FormatNotSet)?;

        self.state.set(SessionState::Starting);

        let queue = Arc::new(ChunkQueue::new(self.config.queue_capacity));
        let running = Arc::new(AtomicBool::new(true));
        let written = Arc::new(AtomicU64::new(0));

        let (handle, ready_rx) = worker::spawn(worker::WorkerSpec {
            backend: self.backend.clone(),
            format,
            queue: queue.clone(),
            running: running.clone(),
            written: written.clone(),
            state: self.state.clone(),
            status: self.status.clone(),
            poll_timeout: self.config.poll_timeout,
            buffer_frames: self.config.buffer_frames,
        });

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(anyhow::anyhow!("worker exited before the device opened")));
        match ready {
            Ok(label) => {
                {
                    let mut s = self.status.lock().unwrap();
                    s.clear_playback();
                    s.end_reason = None;
                    s.device = Some(label.clone());
                    s.sample_rate = Some(format.sample_rate_hz());
                    s.channels = Some(format.channels());
                    s.written_chunks = Some(written.clone());
                }
                *self.queue.write().unwrap() = queue;
                inner.run = Some(RunHandle {
                    running,
                    written,
                    worker: handle,
                });
                self.state.set(SessionState::Playing);
                tracing::info!(
                    device = %label,
                    rate_hz = format.sample_rate_hz(),
                    channels = format.channels(),
                    "playback started"
                );
                Ok(())
            }
            Err(e) => {
                let _ = handle.join.join();
                self.state.set(SessionState::Stopped);
                if let Ok(mut s) = self.status.lock() {
                    s.end_reason = Some(EndReason::Failed);
                }
                tracing::warn!("device open failed: {e:#}");
                Err(PlayerError::Device(e))
            }
        }
    }

    /// Hand one chunk to the playback queue.
    ///
    /// Returns `true` only while playing and the queue has room; in every
    /// other case it returns `false` immediately. Never blocks — a full
    /// queue is the backpressure signal, and the producer chooses how to
    /// react.
    pub fn push_chunk(&self, chunk: Vec<u8>) -> bool {
        if self.state.get() != SessionState::Playing {
            return false;
        }
        let queue = self.queue.read().unwrap().clone();
        queue.try_push(chunk)
    }

    /// Stop the current run.
    ///
    /// Enqueues the stop marker, so every chunk accepted before this call
    /// still reaches the device, then waits (bounded) for the worker. On
    /// timeout the worker thread is abandoned with a warning and
    /// [`PlayerError::ShutdownTimeout`] is returned; the player still
    /// ends up in [`SessionState::Stopped`]. No-op when not playing.
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if self.state.get() != SessionState::Playing {
            self.reap_finished(&mut inner);
            return Ok(());
        }

        self.state.set(SessionState::Stopping);
        let queue = self.queue.read().unwrap().clone();
        queue.push_stop();

        let Some(run) = inner.run.take() else {
            self.state.set(SessionState::Stopped);
            return Ok(());
        };

        let waited = self.config.shutdown_timeout;
        match run.worker.done_rx.recv_timeout(waited) {
            Ok(reason) => {
                let _ = run.worker.join.join();
                let discarded = queue.drain();
                if discarded > 0 {
                    tracing::debug!(discarded, "undelivered chunks discarded");
                }
                if let Ok(mut s) = self.status.lock() {
                    if s.end_reason.is_none() {
                        s.end_reason = Some(reason);
                    }
                }
                self.state.set(SessionState::Stopped);
                tracing::info!(
                    written = run.written.load(Ordering::Relaxed),
                    "playback stopped"
                );
                Ok(())
            }
            Err(_) => {
                // Cooperative cancellation cannot interrupt a stalled
                // device write; clear the flag so the thread exits on its
                // own once the device unblocks, and abandon it.
                run.running.store(false, Ordering::Release);
                let discarded = queue.drain();
                tracing::warn!(
                    waited_ms = waited.as_millis() as u64,
                    discarded,
                    "worker did not stop in time; abandoning thread"
                );
                if let Ok(mut s) = self.status.lock() {
                    s.end_reason = Some(EndReason::Stopped);
                }
                self.state.set(SessionState::Stopped);
                Err(PlayerError::ShutdownTimeout { waited })
            }
        }
    }

    /// Stop if still playing, then release everything.
    ///
    /// Always ends in [`SessionState::Closed`]; safe to call repeatedly.
    pub fn close(&self) -> Result<()> {
        if self.state.get() == SessionState::Closed {
            return Ok(());
        }
        let result = if self.state.get() == SessionState::Playing {
            self.stop()
        } else {
            Ok(())
        };

        let mut inner = self.inner.lock().unwrap();
        self.reap_finished(&mut inner);
        let discarded = self.queue.read().unwrap().drain();
        if discarded > 0 {
            tracing::debug!(discarded, "chunks discarded on close");
        }
        self.state.set(SessionState::Closed);
        tracing::info!("player closed");
        result
    }

    /// Harvest a worker that already exited on its own (device failure or
    /// an earlier abandoned stop that has since finished).
    fn reap_finished(&self, inner: &mut Inner) {
        let finished = inner
            .run
            .as_ref()
            .map(|r| r.worker.join.is_finished())
            .unwrap_or(false);
        if finished {
            if let Some(run) = inner.run.take() {
                let _ = run.worker.join.join();
            }
            let discarded = self.queue.read().unwrap().drain();
            if discarded > 0 {
                tracing::debug!(discarded, "stale chunks discarded");
            }
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
