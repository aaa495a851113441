//! Growable blocking byte queue.
//!
//! [`ByteQueue`] is an unbounded FIFO of bytes shared by exactly one producer thread and one
//! consumer thread:
//! - [`ByteQueue::write`] never blocks; when the ring is full it grows by the configured factor.
//! - [`ByteQueue::read`] blocks until a byte is available.
//! - [`ByteQueue::available`] reports the backlog without blocking.
//!
//! ## Under the hood
//! - A circular buffer guarded by a single `parking_lot::Mutex`; a `Condvar` wakes the consumer
//!   when the queue goes from empty to non-empty.
//! - Growth allocates `round(size * growth + 1)` bytes and copies the live bytes to the front in
//!   logical order, so `start` is reset to `0`. Allocation failure aborts the process.
//! - Waits re-check their condition after every wakeup, so spurious wakeups and writes racing a
//!   resize are harmless.
//! - Blocking calls can be cut short with [`ByteQueue::interrupt`]. The interrupt is one-shot:
//!   the first call that would have to wait fails with [`InterruptedError`] and clears it. Calls
//!   that can complete immediately leave a pending interrupt untouched;
//!   [`ByteQueue::check_interrupt`] consumes it without blocking.
use std::{fmt, time::Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::debug;

use crate::error::{ConfigError, InterruptedError, INTERRUPTED_ERROR};

/// Initial capacity used by the throttler for each direction.
pub const DEFAULT_CAPACITY: usize = 128 * 1024;

/// Growth factor used by the throttler for each direction.
pub const DEFAULT_GROWTH: f64 = 1.3;

struct Ring {
    buf: Box<[u8]>,
    /// Index of the oldest byte.
    start: usize,
    /// Bytes currently queued.
    size: usize,
    interrupted: bool,
}

impl Ring {
    fn invariants(&self) -> bool {
        self.start < self.buf.len() && self.size <= self.buf.len()
    }

    fn grow(&mut self, growth: f64, name: &str) {
        let old = self.buf.len();
        let new = ((self.size as f64) * growth + 1.0).round() as usize;
        // the float math must never shrink or stall the ring
        let new = new.max(old + 1);
        debug!(queue = %name, from = old, to = new, "expanding queue");

        let mut buf = vec![0u8; new].into_boxed_slice();
        let head = old - self.start;
        buf[..head].copy_from_slice(&self.buf[self.start..]);
        buf[head..self.size].copy_from_slice(&self.buf[..self.start]);
        self.buf = buf;
        self.start = 0;
    }

    fn push(&mut self, b: u8, growth: f64, name: &str) {
        if self.size == self.buf.len() {
            self.grow(growth, name);
        }
        let at = (self.start + self.size) % self.buf.len();
        self.buf[at] = b;
        self.size += 1;
    }

    fn pop(&mut self) -> u8 {
        let b = self.buf[self.start];
        self.start = (self.start + 1) % self.buf.len();
        self.size -= 1;
        b
    }

    fn take_interrupt(&mut self) -> Result<(), InterruptedError> {
        if self.interrupted {
            self.interrupted = false;
            Err(INTERRUPTED_ERROR)
        } else {
            Ok(())
        }
    }
}

/// Unbounded single-producer / single-consumer byte FIFO with a blocking read.
///
/// All operations take the same lock, so none of them can observe the buffer mid-resize.
/// Additional producers or consumers are memory safe, but ordering between them is up to the
/// caller.
pub struct ByteQueue {
    name: String,
    growth: f64,
    ring: Mutex<Ring>,
    not_empty: Condvar,
}

impl ByteQueue {
    /// Creates a queue with `initial_capacity` bytes of storage that grows by `growth`.
    ///
    /// `name` only appears in log records.
    ///
    /// # Errors
    /// [`ConfigError::InvalidCapacity`] if `initial_capacity < 1`, and
    /// [`ConfigError::InvalidGrowth`] if `growth` is not a finite number greater than `1.0`.
    pub fn new(
        name: impl Into<String>,
        initial_capacity: usize,
        growth: f64,
    ) -> Result<Self, ConfigError> {
        if initial_capacity < 1 {
            return Err(ConfigError::InvalidCapacity(initial_capacity));
        }
        if !growth.is_finite() || growth <= 1.0 {
            return Err(ConfigError::InvalidGrowth(growth));
        }

        Ok(Self {
            name: name.into(),
            growth,
            ring: Mutex::new(Ring {
                buf: vec![0u8; initial_capacity].into_boxed_slice(),
                start: 0,
                size: 0,
                interrupted: false,
            }),
            not_empty: Condvar::new(),
        })
    }

    /// Name given at construction.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        let ring = self.ring.lock();
        debug_assert!(ring.invariants());
        ring
    }

    /// Appends one byte, growing the buffer if it is full. Never blocks on the consumer.
    pub fn write(&self, b: u8) {
        self.write_all(&[b]);
    }

    /// Appends `bytes` in order under a single lock acquisition.
    ///
    /// The consumer never observes a prefix of `bytes` without the rest; tagged records rely
    /// on this.
    pub fn write_all(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        let mut ring = self.lock();
        let was_empty = ring.size == 0;
        for &b in bytes {
            ring.push(b, self.growth, &self.name);
        }
        debug_assert!(ring.invariants());
        drop(ring);

        if was_empty {
            self.not_empty.notify_all();
        }
    }

    /// Removes and returns the oldest byte, blocking while the queue is empty.
    ///
    /// # Errors
    /// [`InterruptedError`] if the queue is empty and an [`interrupt`](Self::interrupt) is
    /// pending or arrives while waiting.
    pub fn read(&self) -> Result<u8, InterruptedError> {
        let mut ring = self.lock();
        loop {
            if ring.size > 0 {
                return Ok(ring.pop());
            }
            ring.take_interrupt()?;
            self.not_empty.wait(&mut ring);
        }
    }

    /// Removes and returns the oldest byte if there is one. Never blocks.
    pub fn try_read(&self) -> Option<u8> {
        let mut ring = self.lock();
        (ring.size > 0).then(|| ring.pop())
    }

    /// Sleeps until `deadline` without holding the lock.
    ///
    /// Producers keep writing while the consumer sleeps here. The sleep observes the same
    /// interrupt as [`read`](Self::read).
    ///
    /// # Errors
    /// [`InterruptedError`] if `deadline` has not passed and an interrupt is pending or
    /// arrives while sleeping.
    pub fn park_until(&self, deadline: Instant) -> Result<(), InterruptedError> {
        let mut ring = self.lock();
        loop {
            if Instant::now() >= deadline {
                return Ok(());
            }
            ring.take_interrupt()?;
            self.not_empty.wait_until(&mut ring, deadline);
        }
    }

    /// Consumes a pending [`interrupt`](Self::interrupt). Never blocks.
    ///
    /// # Errors
    /// [`InterruptedError`] if an interrupt was pending.
    pub fn check_interrupt(&self) -> Result<(), InterruptedError> {
        self.lock().take_interrupt()
    }

    /// Number of queued bytes at the time of the call.
    pub fn available(&self) -> usize {
        self.lock().size
    }

    /// Current storage size. Only ever grows.
    pub fn capacity(&self) -> usize {
        self.lock().buf.len()
    }

    /// Wakes a blocked [`read`](Self::read) or [`park_until`](Self::park_until) with an error.
    ///
    /// If nothing is blocked, the next blocking call fails instead.
    pub fn interrupt(&self) {
        self.lock().interrupted = true;
        self.not_empty.notify_all();
    }
}

impl fmt::Debug for ByteQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.lock();
        f.debug_struct("ByteQueue")
            .field("name", &self.name)
            .field("capacity", &ring.buf.len())
            .field("size", &ring.size)
            .field("growth", &self.growth)
            .finish()
    }
}
