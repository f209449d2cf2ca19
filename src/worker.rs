//! Playback worker: drains the chunk queue into the device session.
//!
//! One worker thread per playback run. It opens the device session,
//! reports readiness back to `start()`, then loops: timed pop, re-check
//! the running flag on timeout, write chunks in order, exit on the stop
//! marker or on a device failure. Every exit path stops the session and
//! signals completion, so the controller's join is bounded.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::device::{DeviceBackend, DeviceSession};
use crate::format::AudioFormat;
use crate::player::{SessionState, StateCell};
use crate::queue::{ChunkQueue, QueueItem};
use crate::status::{EndReason, PlayerStatusState};

/// Everything a worker thread needs, moved in at spawn.
pub(crate) struct WorkerSpec {
    pub(crate) backend: Arc<dyn DeviceBackend>,
    pub(crate) format: AudioFormat,
    pub(crate) queue: Arc<ChunkQueue>,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) written: Arc<AtomicU64>,
    pub(crate) state: Arc<StateCell>,
    pub(crate) status: Arc<std::sync::Mutex<PlayerStatusState>>,
    pub(crate) poll_timeout: Duration,
    pub(crate) buffer_frames: u32,
}

/// Handle kept by the controller for one running worker.
pub(crate) struct WorkerHandle {
    pub(crate) join: JoinHandle<()>,
    /// Receives the end reason exactly once, after the session is closed.
    pub(crate) done_rx: Receiver<EndReason>,
}

/// Spawn the worker thread.
///
/// The returned ready channel delivers the device label on success or the
/// open/start error; the session itself never leaves the worker thread.
pub(crate) fn spawn(spec: WorkerSpec) -> (WorkerHandle, Receiver<anyhow::Result<String>>) {
    let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);

    let join = std::thread::spawn(move || {
        let mut session = match open_session(&spec) {
            Ok(s) => s,
            Err(e) => {
                spec.running.store(false, Ordering::Release);
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
        let _ = ready_tx.send(Ok(session.label().to_string()));

        let reason = pump(session.as_mut(), &spec);
        if reason == EndReason::Failed {
            // Fail fast for the producer before the session teardown below.
            spec.state.set(SessionState::Stopped);
            if let Ok(mut s) = spec.status.lock() {
                s.end_reason = Some(EndReason::Failed);
            }
        }

        session.stop();
        drop(session);
        spec.running.store(false, Ordering::Release);
        let _ = done_tx.send(reason);
    });

    (WorkerHandle { join, done_rx }, ready_rx)
}

fn open_session(spec: &WorkerSpec) -> anyhow::Result<Box<dyn DeviceSession>> {
    let mut session = spec.backend.open(&spec.format, spec.buffer_frames)?;
    session.start()?;
    Ok(session)
}

/// Drain the queue into the session until stopped.
///
/// The blocking device write is the throttle that keeps the loop at
/// real-time playback rate; cancellation never interrupts a write in
/// flight.
fn pump(session: &mut dyn DeviceSession, spec: &WorkerSpec) -> EndReason {
    while spec.running.load(Ordering::Acquire) {
        match spec.queue.pop_timeout(spec.poll_timeout) {
            None => continue,
            Some(QueueItem::Stop) => {
                tracing::debug!("stop marker observed");
                return EndReason::Stopped;
            }
            Some(QueueItem::Chunk(bytes)) => {
                if let Err(e) = session.write(&bytes) {
                    tracing::warn!("device write failed: {e:#}");
                    return EndReason::Failed;
                }
                spec.written.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    EndReason::Stopped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::PlayerStatusState;
    use std::sync::Mutex;

    /// Session that records writes and can fail on the n-th one.
    struct ScriptedSession {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        fail_on_write: Option<usize>,
        attempts: usize,
    }

    impl DeviceSession for ScriptedSession {
        fn label(&self) -> &str {
            "scripted"
        }

        fn start(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        fn write(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
            self.attempts += 1;
            if self.fail_on_write == Some(self.attempts) {
                return Err(anyhow::anyhow!("scripted failure"));
            }
            self.writes.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        fn stop(&mut self) {}
    }

    fn spec_with_queue(queue: Arc<ChunkQueue>) -> WorkerSpec {
        WorkerSpec {
            backend: Arc::new(NoopBackend),
            format: AudioFormat::new(2, 1, 44_100),
            queue,
            running: Arc::new(AtomicBool::new(true)),
            written: Arc::new(AtomicU64::new(0)),
            state: Arc::new(StateCell::new(SessionState::Playing)),
            status: PlayerStatusState::shared(),
            poll_timeout: Duration::from_millis(10),
            buffer_frames: 1024,
        }
    }

    struct NoopBackend;

    impl DeviceBackend for NoopBackend {
        fn open(
            &self,
            _format: &AudioFormat,
            _buffer_frames: u32,
        ) -> anyhow::Result<Box<dyn DeviceSession>> {
            Err(anyhow::anyhow!("not used"))
        }
    }

    #[test]
    fn pump_writes_in_order_until_stop_marker() {
        let queue = Arc::new(ChunkQueue::new(8));
        for i in 0..3u8 {
            assert!(queue.try_push(vec![i]));
        }
        queue.push_stop();

        let spec = spec_with_queue(queue);
        let writes = Arc::new(Mutex::new(Vec::new()));
        let mut session = ScriptedSession {
            writes: writes.clone(),
            fail_on_write: None,
            attempts: 0,
        };

        assert_eq!(pump(&mut session, &spec), EndReason::Stopped);
        assert_eq!(
            *writes.lock().unwrap(),
            vec![vec![0u8], vec![1u8], vec![2u8]]
        );
        assert_eq!(spec.written.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn pump_exits_when_running_flag_cleared() {
        let queue = Arc::new(ChunkQueue::new(8));
        let spec = spec_with_queue(queue);
        spec.running.store(false, Ordering::Release);

        let mut session = ScriptedSession {
            writes: Arc::new(Mutex::new(Vec::new())),
            fail_on_write: None,
            attempts: 0,
        };
        assert_eq!(pump(&mut session, &spec), EndReason::Stopped);
    }

    #[test]
    fn pump_stops_writing_after_device_failure() {
        let queue = Arc::new(ChunkQueue::new(8));
        for i in 0..5u8 {
            assert!(queue.try_push(vec![i]));
        }
        queue.push_stop();

        let spec = spec_with_queue(queue);
        let writes = Arc::new(Mutex::new(Vec::new()));
        let mut session = ScriptedSession {
            writes: writes.clone(),
            fail_on_write: Some(3),
            attempts: 0,
        };

        assert_eq!(pump(&mut session, &spec), EndReason::Failed);
        // Chunks after the failed one are never written.
        assert_eq!(*writes.lock().unwrap(), vec![vec![0u8], vec![1u8]]);
        assert_eq!(spec.written.load(Ordering::Relaxed), 2);
    }
}
