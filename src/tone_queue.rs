//! The tone queue: a bounded FIFO of tones between the client thread that
//! enqueues characters and the generator's consumer thread that plays them.

use log::trace;
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

/// Smallest slice of time the generator deals in, in microseconds.
pub const QUANTUM_US: i64 = 100;

/// Sentinel duration of a "forever" tone: the dequeue function keeps handing
/// out such a tone, one quantum at a time, until a finite tone arrives.
pub const FOREVER_US: i64 = -QUANTUM_US;

pub const DEFAULT_CAPACITY: usize = 3000;

/// Whether a tone has a rising slope, a falling slope, both, or neither.
/// The shape of the slopes is a property of the generator, not the tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlopeMode {
    Standard,
    NoSlopes,
    RisingOnly,
    FallingOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tone {
    /// Positive, or [`FOREVER_US`].
    pub duration_us: i64,
    /// Hz; 0 means silence.
    pub frequency: i32,
    pub slope_mode: SlopeMode,
}

impl Tone {
    pub fn new(duration_us: i64, frequency: i32, slope_mode: SlopeMode) -> Self {
        Self {
            duration_us,
            frequency,
            slope_mode,
        }
    }

    /// A silent gap of the given length.
    pub fn silence(duration_us: i64) -> Self {
        Self::new(duration_us, 0, SlopeMode::NoSlopes)
    }

    /// A tone that sounds until a finite tone is enqueued after it.
    pub fn forever(frequency: i32) -> Self {
        Self::new(FOREVER_US, frequency, SlopeMode::RisingOnly)
    }

    pub fn is_forever(&self) -> bool {
        self.duration_us == FOREVER_US
    }
}

/// `Busy` while tones are queued or a forever tone is being repeated,
/// `Idle` once the queue has drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Busy,
}

struct Inner {
    tones: Vec<Tone>,
    head: usize,
    tail: usize,
    len: usize,
    state: QueueState,
    low_water_level: usize,
    stop: bool,
}

type LowWaterCallback = Box<dyn FnMut() + Send>;

pub struct ToneQueue {
    inner: Mutex<Inner>,
    cond: Condvar,
    capacity: usize,
    // The callback lives outside the queue lock: a feeder will usually
    // enqueue from inside it.
    low_water_callback: Mutex<Option<LowWaterCallback>>,
}

impl ToneQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                tones: vec![Tone::silence(0); capacity],
                head: 0,
                tail: 0,
                len: 0,
                state: QueueState::Idle,
                low_water_level: 0,
                stop: false,
            }),
            cond: Condvar::new(),
            capacity,
            low_water_callback: Mutex::new(None),
        }
    }

    /// Append a tone and wake the consumer.
    ///
    /// A lone forever tone at the head is *replaced* by the new tone instead
    /// of being queued behind: that is how a forever tone ends.
    pub fn enqueue(&self, tone: Tone) -> Result<()> {
        let mut q = self.inner.lock();

        if q.len == self.capacity {
            return Err(Error::QueueFull);
        }

        if q.len == 1 && q.tones[q.head].is_forever() {
            let head = q.head;
            q.tones[head] = tone;
        } else {
            let tail = q.tail;
            q.tones[tail] = tone;
            q.tail = (q.tail + 1) % self.capacity;
            q.len += 1;
        }
        q.state = QueueState::Busy;

        drop(q);
        self.cond.notify_all();
        Ok(())
    }

    /// Take the tone at the head, blocking until one is present.
    ///
    /// Returns the tone together with the queue state after the dequeue.
    /// A forever tone that is the last tone in the queue is returned without
    /// being removed, over and over, until a finite tone arrives behind it.
    /// Returns `None` once the queue has been shut down and drained.
    pub fn dequeue(&self) -> Option<(Tone, QueueState)> {
        let mut q = self.inner.lock();
        while q.len == 0 {
            if q.stop {
                return None;
            }
            self.cond.wait(&mut q);
        }

        let tone = q.tones[q.head];
        if q.len == 1 && tone.is_forever() {
            return Some((tone, QueueState::Busy));
        }

        q.head = (q.head + 1) % self.capacity;
        q.len -= 1;

        let crossed = q.len + 1 > q.low_water_level && q.len <= q.low_water_level;
        if q.len == 0 {
            q.state = QueueState::Idle;
        }
        let state = q.state;

        drop(q);
        // Wake producers blocked in wait_for_level().
        self.cond.notify_all();

        if crossed {
            self.fire_low_water();
        }

        Some((tone, state))
    }

    /// Drop every queued tone. An in-progress tone is not interrupted.
    pub fn flush(&self) {
        let mut q = self.inner.lock();
        let crossed = q.len > q.low_water_level;
        q.head = 0;
        q.tail = 0;
        q.len = 0;
        q.state = QueueState::Idle;
        drop(q);

        trace!("tone queue flushed");
        self.cond.notify_all();
        if crossed {
            self.fire_low_water();
        }
    }

    /// Block until the queue length drops to `level` or below.
    pub fn wait_for_level(&self, level: usize) {
        let mut q = self.inner.lock();
        while q.len > level && !q.stop {
            self.cond.wait(&mut q);
        }
    }

    /// Register a callback invoked from the consumer thread each time the
    /// queue length falls from above `level` to `level` or below.
    pub fn register_low_water_callback(&self, callback: impl FnMut() + Send + 'static, level: usize) {
        self.inner.lock().low_water_level = level;
        *self.low_water_callback.lock() = Some(Box::new(callback));
    }

    fn fire_low_water(&self) {
        if let Some(callback) = self.low_water_callback.lock().as_mut() {
            callback();
        }
    }

    /// Ask blocked `dequeue` and `wait_for_level` callers to give up.
    /// Queued tones are still handed out before `dequeue` returns `None`.
    pub fn shutdown(&self) {
        self.inner.lock().stop = true;
        self.cond.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self) -> QueueState {
        self.inner.lock().state
    }
}

impl Default for ToneQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn tone(ms: i64) -> Tone {
        Tone::new(ms * 1000, 800, SlopeMode::Standard)
    }

    #[test]
    fn test_fifo_conservation() {
        let tq = ToneQueue::with_capacity(16);
        let tones = [tone(10), tone(20), Tone::silence(30_000), tone(40)];

        for t in tones {
            tq.enqueue(t).unwrap();
        }
        assert_eq!(tq.state(), QueueState::Busy);

        for t in tones {
            let (out, _) = tq.dequeue().unwrap();
            assert_eq!(out, t);
        }
        assert_eq!(tq.len(), 0);
        assert_eq!(tq.state(), QueueState::Idle);
    }

    #[test]
    fn test_full_queue_rejects() {
        let tq = ToneQueue::with_capacity(2);
        tq.enqueue(tone(1)).unwrap();
        tq.enqueue(tone(2)).unwrap();
        assert!(tq.is_full());
        assert_eq!(tq.enqueue(tone(3)), Err(Error::QueueFull));

        // Wraparound keeps working after a dequeue.
        tq.dequeue().unwrap();
        tq.enqueue(tone(3)).unwrap();
        assert_eq!(tq.dequeue().unwrap().0, tone(2));
        assert_eq!(tq.dequeue().unwrap().0, tone(3));
    }

    #[test]
    fn test_forever_tone_repeats_until_replaced() {
        let tq = ToneQueue::with_capacity(16);
        let forever = Tone::forever(600);
        tq.enqueue(forever).unwrap();

        // Repeated dequeues return the same tone and leave it in place.
        for _ in 0..5 {
            let (out, state) = tq.dequeue().unwrap();
            assert_eq!(out, forever);
            assert_eq!(state, QueueState::Busy);
            assert_eq!(tq.len(), 1);
        }

        // A finite tone replaces the lone forever tone.
        let finite = tone(50);
        tq.enqueue(finite).unwrap();
        assert_eq!(tq.len(), 1);

        let (out, state) = tq.dequeue().unwrap();
        assert_eq!(out, finite);
        assert_eq!(state, QueueState::Idle);
        assert_eq!(tq.len(), 0);
    }

    #[test]
    fn test_forever_then_finite_tones_play_in_order() {
        let tq = ToneQueue::with_capacity(16);
        tq.enqueue(Tone::forever(600)).unwrap();

        let tones = [tone(10), tone(20), tone(30)];
        for t in tones {
            tq.enqueue(t).unwrap();
        }
        // The first finite tone took the forever tone's place.
        assert_eq!(tq.len(), 3);

        for t in tones {
            assert_eq!(tq.dequeue().unwrap().0, t);
        }
        assert_eq!(tq.len(), 0);
        assert_eq!(tq.state(), QueueState::Idle);
    }

    #[test]
    fn test_low_water_fires_once_per_crossing() {
        let tq = ToneQueue::with_capacity(16);
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        tq.register_low_water_callback(move || _ = counter.fetch_add(1, Ordering::SeqCst), 2);

        for ms in 1..=5 {
            tq.enqueue(tone(ms)).unwrap();
        }

        tq.dequeue().unwrap(); // 4 left
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tq.dequeue().unwrap(); // 3 left
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tq.dequeue().unwrap(); // 2 left: crossed
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        tq.dequeue().unwrap(); // 1 left: below, no new crossing
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Refill above the level and cross again.
        for ms in 1..=3 {
            tq.enqueue(tone(ms)).unwrap();
        }
        tq.dequeue().unwrap(); // 3 left
        tq.dequeue().unwrap(); // 2 left: crossed again
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_flush_empties_and_idles() {
        let tq = ToneQueue::with_capacity(16);
        for ms in 1..=4 {
            tq.enqueue(tone(ms)).unwrap();
        }

        tq.flush();
        assert_eq!(tq.len(), 0);
        assert_eq!(tq.state(), QueueState::Idle);

        // The queue is still usable after a flush.
        tq.enqueue(tone(9)).unwrap();
        assert_eq!(tq.dequeue().unwrap().0, tone(9));
    }

    #[test]
    fn test_shutdown_drains_then_stops() {
        let tq = ToneQueue::with_capacity(16);
        tq.enqueue(tone(5)).unwrap();
        tq.shutdown();

        assert!(tq.dequeue().is_some());
        assert!(tq.dequeue().is_none());
    }
}
