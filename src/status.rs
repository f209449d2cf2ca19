use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Reason the last playback run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// Playback was stopped by request.
    Stopped,
    /// The output device failed mid-run.
    Failed,
}

/// Shared playback status updated by the controller and worker.
#[derive(Debug, Default)]
pub struct PlayerStatusState {
    /// Selected output device label.
    pub device: Option<String>,
    /// Configured sample rate in Hz.
    pub sample_rate: Option<u32>,
    /// Configured channel count.
    pub channels: Option<u16>,
    /// Counter incremented by the worker per chunk written to the device.
    pub written_chunks: Option<Arc<AtomicU64>>,
    /// Terminal reason from the most recent run.
    pub end_reason: Option<EndReason>,
}

/// Plain snapshot suitable for display or diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub device: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub written_chunks: Option<u64>,
    pub end_reason: Option<EndReason>,
}

impl PlayerStatusState {
    /// Create a shared, mutex-protected status store.
    pub fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Return a snapshot of the current state.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            device: self.device.clone(),
            sample_rate: self.sample_rate,
            channels: self.channels,
            written_chunks: self
                .written_chunks
                .as_ref()
                .map(|v| v.load(Ordering::Relaxed)),
            end_reason: self.end_reason,
        }
    }

    /// Clear run-specific fields when a session ends.
    ///
    /// `end_reason` survives so callers can still see how the last run
    /// finished.
    pub fn clear_playback(&mut self) {
        self.device = None;
        self.sample_rate = None;
        self.channels = None;
        self.written_chunks = None;
    }
}
