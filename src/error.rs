//! Error types for the playback engine.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the player lifecycle.
///
/// A full queue is not an error: `push_chunk` reports backpressure by
/// returning `false` and the producer decides how to react.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// `start()` was called before an audio format was configured.
    #[error("audio format not set; call set_format() before start()")]
    FormatNotSet,

    /// The output device failed to open, start, or accept data.
    ///
    /// Fatal to the current playback session only; the player ends up
    /// in [`SessionState::Stopped`](crate::player::SessionState::Stopped).
    #[error("audio device error: {0}")]
    Device(#[source] anyhow::Error),

    /// The playback worker did not terminate within the bounded wait.
    ///
    /// The thread is abandoned and will exit on its own once the device
    /// unblocks; the player still transitions to `Stopped`.
    #[error("playback worker did not stop within {waited:?}; thread abandoned")]
    ShutdownTimeout { waited: Duration },
}

/// Result alias for player operations.
pub type Result<T> = std::result::Result<T, PlayerError>;
