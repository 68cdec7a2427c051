// Playback Scheduler
//
// FIFO of received PCM chunks drained by the output callback.
// Single producer (receive loop) / single consumer (device callback), enforced by
// splitting the queue into non-Clone handles. Append, drain and flush share one
// short critical section, so a flush is linearizable with the drain: once
// `flush` returns, no chunk queued before it can be read.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Speaking / listening edges derived from queue occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    /// Queue went from empty to non-empty
    Speaking,
    /// Queue drained or was flushed
    Listening,
}

#[derive(Default)]
struct QueueInner {
    chunks: VecDeque<Vec<f32>>,
    /// Offset into the head chunk; always < head.len() while non-empty
    cursor: usize,
    queued_samples: usize,
}

struct Shared {
    inner: Mutex<QueueInner>,
    active: AtomicBool,
    max_samples: usize,
    status_tx: mpsc::UnboundedSender<PlaybackStatus>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, status: PlaybackStatus) {
        // Receiver gone means the session is tearing down
        let _ = self.status_tx.send(status);
    }
}

pub struct PlaybackQueue {
    shared: Arc<Shared>,
}

impl PlaybackQueue {
    /// `max_samples` bounds the audio held at once (device rate samples).
    pub fn new(max_samples: usize) -> (Self, mpsc::UnboundedReceiver<PlaybackStatus>) {
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            inner: Mutex::new(QueueInner::default()),
            active: AtomicBool::new(false),
            max_samples,
            status_tx,
        });
        (Self { shared }, status_rx)
    }

    pub fn split(self) -> (PlaybackProducer, PlaybackConsumer, PlaybackControl) {
        (
            PlaybackProducer {
                shared: Arc::clone(&self.shared),
            },
            PlaybackConsumer {
                shared: Arc::clone(&self.shared),
            },
            PlaybackControl { shared: self.shared },
        )
    }
}

/// Append side, owned by the receive loop.
pub struct PlaybackProducer {
    shared: Arc<Shared>,
}

impl PlaybackProducer {
    /// Queue a chunk behind everything already queued.
    /// Returns false if the chunk would exceed the queue bound.
    pub fn push(&mut self, chunk: Vec<f32>) -> bool {
        if chunk.is_empty() {
            return true;
        }
        let mut inner = self.shared.lock();
        if inner.queued_samples + chunk.len() > self.shared.max_samples {
            warn!(
                queued = inner.queued_samples,
                rejected = chunk.len(),
                "playback queue full, dropping inbound chunk"
            );
            return false;
        }
        let was_empty = inner.chunks.is_empty();
        inner.queued_samples += chunk.len();
        inner.chunks.push_back(chunk);
        if was_empty {
            self.shared.active.store(true, Ordering::Release);
            self.shared.emit(PlaybackStatus::Speaking);
        }
        true
    }

    pub fn control(&self) -> PlaybackControl {
        PlaybackControl {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Drain side, owned by the output callback. Never blocks beyond the queue lock.
pub struct PlaybackConsumer {
    shared: Arc<Shared>,
}

impl PlaybackConsumer {
    /// Fill `out` from the head of the queue, zero-filling whatever the queue cannot cover.
    /// Returns the number of queued samples written.
    pub fn fill(&mut self, out: &mut [f32]) -> usize {
        let mut inner = self.shared.lock();
        let had_audio = !inner.chunks.is_empty();
        let mut written = 0;

        while written < out.len() {
            let cursor = inner.cursor;
            let Some(head) = inner.chunks.front() else {
                break;
            };
            let n = (head.len() - cursor).min(out.len() - written);
            out[written..written + n].copy_from_slice(&head[cursor..cursor + n]);
            let head_len = head.len();
            written += n;
            inner.queued_samples -= n;

            if cursor + n >= head_len {
                inner.chunks.pop_front();
                inner.cursor = 0;
            } else {
                inner.cursor = cursor + n;
            }
        }

        out[written..].fill(0.0);

        if had_audio && inner.chunks.is_empty() {
            self.shared.active.store(false, Ordering::Release);
            self.shared.emit(PlaybackStatus::Listening);
        }
        written
    }
}

/// Shared control handle: barge-in flush, session reset, occupancy checks.
#[derive(Clone)]
pub struct PlaybackControl {
    shared: Arc<Shared>,
}

impl PlaybackControl {
    /// Drop every queued chunk and reset the cursor. Returns how many chunks were dropped.
    pub fn flush(&self) -> usize {
        let mut inner = self.shared.lock();
        let dropped = inner.chunks.len();
        inner.chunks.clear();
        inner.cursor = 0;
        inner.queued_samples = 0;
        if dropped > 0 {
            self.shared.active.store(false, Ordering::Release);
            self.shared.emit(PlaybackStatus::Listening);
            debug!(dropped, "playback queue flushed");
        }
        dropped
    }

    /// Agent audio is queued (the agent is speaking).
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn queued_samples(&self) -> usize {
        self.shared.lock().queued_samples
    }

    pub fn queued_chunks(&self) -> usize {
        self.shared.lock().chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> (
        PlaybackProducer,
        PlaybackConsumer,
        PlaybackControl,
        mpsc::UnboundedReceiver<PlaybackStatus>,
    ) {
        let (queue, rx) = PlaybackQueue::new(10_000);
        let (producer, consumer, control) = queue.split();
        (producer, consumer, control, rx)
    }

    #[test]
    fn test_empty_queue_outputs_silence() {
        let (_producer, mut consumer, _control, mut rx) = queue();
        let mut out = [1.0f32; 8];
        assert_eq!(consumer.fill(&mut out), 0);
        assert!(out.iter().all(|&s| s == 0.0));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_drains_in_fifo_order_across_chunks() {
        let (mut producer, mut consumer, control, _rx) = queue();
        producer.push(vec![1.0, 2.0, 3.0]);
        producer.push(vec![4.0, 5.0]);
        producer.push(vec![6.0]);

        let mut out = [0.0f32; 2];
        let mut drained = Vec::new();
        for _ in 0..4 {
            consumer.fill(&mut out);
            drained.extend_from_slice(&out);
        }
        assert_eq!(drained, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 0.0, 0.0]);
        assert_eq!(control.queued_samples(), 0);
    }

    #[test]
    fn test_status_edges() {
        let (mut producer, mut consumer, _control, mut rx) = queue();
        producer.push(vec![0.1; 4]);
        producer.push(vec![0.1; 4]);
        assert_eq!(rx.try_recv().unwrap(), PlaybackStatus::Speaking);
        assert!(rx.try_recv().is_err());

        let mut out = [0.0f32; 6];
        consumer.fill(&mut out);
        assert!(rx.try_recv().is_err());
        consumer.fill(&mut out);
        assert_eq!(rx.try_recv().unwrap(), PlaybackStatus::Listening);
        consumer.fill(&mut out);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_flush_drops_everything_queued_before_it() {
        let (mut producer, mut consumer, control, mut rx) = queue();
        producer.push(vec![1.0; 100]);
        producer.push(vec![2.0; 100]);

        let mut out = [0.0f32; 30];
        consumer.fill(&mut out);
        assert!(control.is_active());

        assert_eq!(control.flush(), 2);
        assert!(!control.is_active());
        assert_eq!(consumer.fill(&mut out), 0);
        assert!(out.iter().all(|&s| s == 0.0));

        producer.push(vec![3.0; 5]);
        consumer.fill(&mut out);
        assert_eq!(&out[..5], &[3.0; 5]);

        let statuses: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            statuses,
            vec![
                PlaybackStatus::Speaking,
                PlaybackStatus::Listening,
                PlaybackStatus::Speaking,
                PlaybackStatus::Listening,
            ]
        );
    }

    #[test]
    fn test_bounded() {
        let (queue, _rx) = PlaybackQueue::new(10);
        let (mut producer, _consumer, control) = queue.split();
        assert!(producer.push(vec![0.0; 8]));
        assert!(!producer.push(vec![0.0; 3]));
        assert!(producer.push(vec![0.0; 2]));
        assert_eq!(control.queued_chunks(), 2);
    }

    #[test]
    fn test_concurrent_flush_never_replays_stale_audio() {
        let (mut producer, mut consumer, control, _rx) = queue();
        let reader = std::thread::spawn(move || {
            let mut out = [0.0f32; 64];
            let mut seen_after_flush = Vec::new();
            for _ in 0..2000 {
                consumer.fill(&mut out);
                seen_after_flush.extend(out.iter().copied().filter(|&s| s != 0.0));
            }
            seen_after_flush
        });

        for _ in 0..50 {
            producer.push(vec![1.0; 32]);
        }
        control.flush();
        // marker values queued strictly after the flush
        for _ in 0..50 {
            producer.push(vec![2.0; 32]);
        }

        let seen = reader.join().unwrap();
        if let Some(first_marker) = seen.iter().position(|&s| s == 2.0) {
            assert!(seen[first_marker..].iter().all(|&s| s == 2.0));
        }
    }
}
