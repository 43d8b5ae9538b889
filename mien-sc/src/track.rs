//! Live audio track handles

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// A live audio source the loudness monitor can sample.
///
/// Implementations hand out the most recent PCM samples (mono, -1.0..=1.0)
/// without blocking the producer for long.
pub trait AudioTrack: Send + Sync {
    fn id(&self) -> &str;

    /// False once the track has ended
    fn is_live(&self) -> bool;

    /// Copy up to `out.len()` of the most recent samples into the front of
    /// `out`, oldest first. Returns how many samples were written.
    fn snapshot(&self, out: &mut [f32]) -> usize;
}

struct Ring {
    data: Vec<f32>,
    /// Next write position
    head: usize,
    filled: usize,
}

/// Shared ring of recent samples; any PCM producer can push into it
pub struct SampleBuffer {
    id: String,
    ring: Mutex<Ring>,
    live: AtomicBool,
}

impl SampleBuffer {
    pub fn new(id: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            id: id.into(),
            ring: Mutex::new(Ring {
                data: vec![0.0; capacity],
                head: 0,
                filled: 0,
            }),
            live: AtomicBool::new(true),
        }
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().data.len()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().filled
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append samples, overwriting the oldest once full. Non-finite samples
    /// are stored as silence.
    pub fn push(&self, samples: &[f32]) {
        let mut ring = self.ring.lock();
        let capacity = ring.data.len();
        for &sample in samples {
            let head = ring.head;
            ring.data[head] = if sample.is_finite() { sample } else { 0.0 };
            ring.head = (head + 1) % capacity;
        }
        ring.filled = (ring.filled + samples.len()).min(capacity);
    }

    pub fn clear(&self) {
        let mut ring = self.ring.lock();
        ring.head = 0;
        ring.filled = 0;
    }

    /// Mark the track as ended
    pub fn end(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

impl AudioTrack for SampleBuffer {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn snapshot(&self, out: &mut [f32]) -> usize {
        let ring = self.ring.lock();
        let capacity = ring.data.len();
        let n = out.len().min(ring.filled);
        let start = (ring.head + capacity - n) % capacity;
        for (i, slot) in out.iter_mut().take(n).enumerate() {
            *slot = ring.data[(start + i) % capacity];
        }
        n
    }
}
