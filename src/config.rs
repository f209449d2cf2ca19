use std::time::Duration;

/// Tuning parameters for a player instance.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Maximum number of chunks buffered between producer and worker.
    pub queue_capacity: usize,
    /// Device stream buffer size in frames.
    pub buffer_frames: u32,
    /// How long the worker blocks on an empty queue before re-checking
    /// its running flag.
    pub poll_timeout: Duration,
    /// Bounded wait for worker termination during `stop()`/`close()`.
    pub shutdown_timeout: Duration,
    /// Output device selection by substring match; `None` uses the default.
    pub device: Option<String>,
}

impl Default for PlayerConfig {
    /// Defaults sized for low-latency chunked playback on common devices.
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            buffer_frames: 1024,
            poll_timeout: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(1),
            device: None,
        }
    }
}
