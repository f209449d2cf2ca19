//! Real-time PCM chunk playback.
//!
//! An application thread hands discrete chunks of PCM bytes to a
//! [`Player`](player::Player); a dedicated worker thread streams them to
//! the audio output device in order, throttled to real time by the
//! device itself.
//!
//! ## Pipeline
//! 1. **Configure**: set the PCM format (sample width, channels, rate)
//!    directly or from externally parsed container header info.
//! 2. **Feed**: `push_chunk` hands bytes to a bounded queue; a full queue
//!    returns `false` (backpressure) instead of blocking.
//! 3. **Playback**: the worker drains the queue and writes each chunk to
//!    the device session; the blocking device write paces the loop.
//!
//! Shutdown is cooperative: `stop()` places a stop marker behind the
//! queued chunks, waits a bounded time for the worker, and reports (never
//! hides) a worker that had to be abandoned.

pub mod config;
pub mod device;
pub mod error;
pub mod format;
pub mod player;
pub mod queue;
pub mod status;

mod worker;
