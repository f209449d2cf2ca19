//! Thread-safe bounded queues for the playback pipeline.
//!
//! Two hand-off points exist, each with its own queue shape:
//! - producer thread → worker thread: [`ChunkQueue`], a FIFO of whole PCM
//!   chunks with a non-blocking push (backpressure is returned to the
//!   producer, never absorbed by blocking)
//! - worker thread → output callback: [`ByteRing`], a byte buffer with a
//!   blocking push (the worker's real-time throttle) and a non-blocking
//!   pop (the callback must never wait)
//!
//! Both use a single [`Condvar`] as a general "state changed" signal and
//! keep their flags under the same mutex as the data to avoid races.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// One element of the producer→worker queue.
///
/// The stop marker is a variant of its own rather than a reserved chunk
/// value, so a legitimate zero-length chunk can never be mistaken for it.
#[derive(Debug, PartialEq, Eq)]
pub enum QueueItem {
    /// Opaque PCM bytes at the configured format. Ownership moves with
    /// the item; nothing reads a chunk from two places.
    Chunk(Vec<u8>),
    /// No more chunks will be produced; the worker exits after this.
    Stop,
}

/// Bounded FIFO of PCM chunks between producer and playback worker.
///
/// Chunks enqueued successfully are dequeued in exactly the same order.
/// The capacity bound applies to chunks; the stop marker is exempt so a
/// full queue can never block or fail shutdown.
pub struct ChunkQueue {
    inner: Mutex<VecDeque<QueueItem>>,
    cv: Condvar,
    capacity: usize,
}

impl ChunkQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of queued items (best-effort snapshot).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Append a chunk at the tail iff the queue has room.
    ///
    /// Never blocks and never displaces queued elements. Returns `false`
    /// when the queue is full; the producer decides how to react (retry,
    /// drop, slow down).
    pub fn try_push(&self, chunk: Vec<u8>) -> bool {
        let mut g = self.inner.lock().unwrap();
        if g.len() >= self.capacity {
            return false;
        }
        g.push_back(QueueItem::Chunk(chunk));
        drop(g);
        self.cv.notify_all();
        true
    }

    /// Append the stop marker, ordered after everything already queued.
    pub fn push_stop(&self) {
        let mut g = self.inner.lock().unwrap();
        g.push_back(QueueItem::Stop);
        drop(g);
        self.cv.notify_all();
    }

    /// Pop the head item, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout so the worker can re-check its running
    /// flag instead of blocking forever.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<QueueItem> {
        let deadline = Instant::now() + timeout;
        let mut g = self.inner.lock().unwrap();
        loop {
            if let Some(item) = g.pop_front() {
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (ng, _timeout) = self.cv.wait_timeout(g, deadline - now).unwrap();
            g = ng;
        }
    }

    /// Remove and discard everything still queued, returning the number
    /// of chunks thrown away (the stop marker is not counted).
    pub fn drain(&self) -> usize {
        let mut g = self.inner.lock().unwrap();
        let discarded = g
            .iter()
            .filter(|item| matches!(item, QueueItem::Chunk(_)))
            .count();
        g.clear();
        discarded
    }
}

/// Bounded byte buffer between the playback worker and the output callback.
///
/// The worker pushes raw PCM bytes and blocks while the buffer is full;
/// the device callback pops without ever blocking. `close()` marks the
/// end of input and unblocks any waiting pusher.
pub(crate) struct ByteRing {
    inner: Mutex<RingInner>,
    cv: Condvar,
    capacity: usize,
}

struct RingInner {
    buf: VecDeque<u8>,
    closed: bool,
}

impl ByteRing {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RingInner {
                buf: VecDeque::new(),
                closed: false,
            }),
            cv: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Mark the ring as finished and wake all waiters.
    ///
    /// Buffered bytes remain poppable until drained. Idempotent.
    pub(crate) fn close(&self) {
        let mut g = self.inner.lock().unwrap();
        g.closed = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Push bytes, blocking while the ring is full.
    ///
    /// Returns `false` if the ring was closed before all bytes were
    /// accepted; the remainder is dropped.
    pub(crate) fn push_blocking(&self, bytes: &[u8]) -> bool {
        let mut offset = 0;

        while offset < bytes.len() {
            let mut g = self.inner.lock().unwrap();

            while g.buf.len() >= self.capacity && !g.closed {
                g = self.cv.wait(g).unwrap();
            }
            if g.closed {
                return false;
            }

            while offset < bytes.len() && g.buf.len() < self.capacity {
                g.buf.push_back(bytes[offset]);
                offset += 1;
            }

            drop(g);
            self.cv.notify_all();
        }
        true
    }

    /// Pop up to `max` bytes without blocking, truncated to a multiple
    /// of `align` so a sample or frame is never torn across pops.
    ///
    /// Returns `None` when fewer than `align` bytes are buffered.
    pub(crate) fn pop_bytes(&self, max: usize, align: usize) -> Option<Vec<u8>> {
        let align = align.max(1);
        let mut g = self.inner.lock().unwrap();

        let take = (g.buf.len().min(max) / align) * align;
        if take == 0 {
            return None;
        }

        let out: Vec<u8> = g.buf.drain(..take).collect();
        drop(g);
        self.cv.notify_all();
        Some(out)
    }

    /// Wait until every buffered byte has been popped, or `timeout`.
    ///
    /// Used on clean shutdown to let queued audio play out before the
    /// stream is paused. Returns `true` if the ring drained.
    pub(crate) fn wait_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut g = self.inner.lock().unwrap();
        loop {
            if g.buf.is_empty() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (ng, _timeout) = self.cv.wait_timeout(g, deadline - now).unwrap();
            g = ng;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn try_push_respects_capacity() {
        let q = ChunkQueue::new(2);
        assert!(q.try_push(vec![1]));
        assert!(q.try_push(vec![2]));
        assert!(!q.try_push(vec![3]));
        assert_eq!(q.len(), 2);

        // Room opens up once the worker side pops.
        assert_eq!(
            q.pop_timeout(Duration::from_millis(10)),
            Some(QueueItem::Chunk(vec![1]))
        );
        assert!(q.try_push(vec![3]));
    }

    #[test]
    fn pop_preserves_fifo_order() {
        let q = ChunkQueue::new(8);
        for i in 0..5u8 {
            assert!(q.try_push(vec![i]));
        }
        for i in 0..5u8 {
            assert_eq!(
                q.pop_timeout(Duration::from_millis(10)),
                Some(QueueItem::Chunk(vec![i]))
            );
        }
    }

    #[test]
    fn pop_timeout_returns_none_when_empty() {
        let q = ChunkQueue::new(4);
        assert_eq!(q.pop_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn stop_marker_is_ordered_after_chunks_and_exempt_from_bound() {
        let q = ChunkQueue::new(2);
        assert!(q.try_push(vec![1]));
        assert!(q.try_push(vec![2]));
        q.push_stop();
        // Full for chunks, but the marker got in.
        assert!(!q.try_push(vec![3]));

        assert_eq!(
            q.pop_timeout(Duration::from_millis(10)),
            Some(QueueItem::Chunk(vec![1]))
        );
        assert_eq!(
            q.pop_timeout(Duration::from_millis(10)),
            Some(QueueItem::Chunk(vec![2]))
        );
        assert_eq!(q.pop_timeout(Duration::from_millis(10)), Some(QueueItem::Stop));
    }

    #[test]
    fn pop_unblocks_when_chunk_arrives() {
        let q = Arc::new(ChunkQueue::new(4));
        let q_pop = q.clone();
        let barrier = Arc::new(std::sync::Barrier::new(2));
        let start = barrier.clone();

        let handle = thread::spawn(move || {
            start.wait();
            q_pop.pop_timeout(Duration::from_secs(5))
        });

        barrier.wait();
        assert!(q.try_push(vec![9]));
        assert_eq!(handle.join().unwrap(), Some(QueueItem::Chunk(vec![9])));
    }

    #[test]
    fn drain_discards_and_counts_chunks_only() {
        let q = ChunkQueue::new(8);
        assert!(q.try_push(vec![1]));
        assert!(q.try_push(vec![2]));
        q.push_stop();
        assert_eq!(q.drain(), 2);
        assert!(q.is_empty());
        assert_eq!(q.pop_timeout(Duration::from_millis(5)), None);
    }

    #[test]
    fn ring_pop_is_truncated_to_alignment() {
        let ring = ByteRing::new(64);
        assert!(ring.push_blocking(&[1, 2, 3, 4, 5]));

        // 5 bytes buffered, alignment 2: only 4 come out.
        assert_eq!(ring.pop_bytes(16, 2), Some(vec![1, 2, 3, 4]));
        // The torn tail stays until more bytes complete a group.
        assert_eq!(ring.pop_bytes(16, 2), None);
        assert!(ring.push_blocking(&[6]));
        assert_eq!(ring.pop_bytes(16, 2), Some(vec![5, 6]));
    }

    #[test]
    fn ring_push_blocks_until_popped() {
        let ring = Arc::new(ByteRing::new(4));
        assert!(ring.push_blocking(&[0; 4]));

        let ring_push = ring.clone();
        let handle = thread::spawn(move || ring_push.push_blocking(&[9; 4]));

        // The pusher is stuck until the callback side makes room.
        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());

        assert_eq!(ring.pop_bytes(4, 1), Some(vec![0; 4]));
        assert!(handle.join().unwrap());
        assert_eq!(ring.pop_bytes(4, 1), Some(vec![9; 4]));
    }

    #[test]
    fn ring_close_unblocks_pusher() {
        let ring = Arc::new(ByteRing::new(2));
        assert!(ring.push_blocking(&[1, 2]));

        let ring_push = ring.clone();
        let handle = thread::spawn(move || ring_push.push_blocking(&[3, 4]));

        ring.close();
        assert!(!handle.join().unwrap());
        // Buffered bytes remain poppable after close.
        assert_eq!(ring.pop_bytes(2, 1), Some(vec![1, 2]));
    }

    #[test]
    fn ring_wait_empty_observes_drain() {
        let ring = Arc::new(ByteRing::new(8));
        assert!(ring.push_blocking(&[1, 2, 3]));
        assert!(!ring.wait_empty(Duration::from_millis(10)));

        let ring_pop = ring.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            ring_pop.pop_bytes(8, 1)
        });

        assert!(ring.wait_empty(Duration::from_secs(5)));
        assert_eq!(handle.join().unwrap(), Some(vec![1, 2, 3]));
    }
}
