//! Delay-releasing reader.
//!
//! [`DelayReleasingReader`] is the consumer end of a delayed pipe. It pops one tagged record at a
//! time from the shared [`ByteQueue`], sleeps until the record's deadline and hands out the
//! payload byte. The end-of-stream sentinel turns into a permanent EOF.
//!
//! ### Behavior
//! - `Read::read` yields **at most one byte per call**: the byte after it may not be due yet.
//!   It returns `0` for an empty buffer or at EOF.
//! - A pending interrupt fails the next read at a record boundary, even when the next byte is
//!   already due. Nothing is dequeued and the channel stays usable.
//! - Interrupting the deadline sleep fails the read; the dequeued byte is kept and the next read
//!   resumes waiting for it.
//! - Interrupting while the deadline itself is being dequeued loses the record framing. The
//!   reader is then corrupted and every later read fails with
//!   [`CORRUPTED_ERROR`](crate::error::CORRUPTED_ERROR).
use std::{
    fmt,
    io::{self, Read},
    sync::Arc,
};

use tracing::{debug, warn};

use crate::{
    clock::Timestamp,
    error::{InterruptedError, CORRUPTED_ERROR},
    queue::ByteQueue,
    record::{decode_deadline, DEADLINE_LEN},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Eof,
    Corrupted,
}

pub struct DelayReleasingReader {
    queue: Arc<ByteQueue>,
    state: State,
    /// Dequeued byte whose deadline sleep was interrupted.
    pending: Option<(Timestamp, u8)>,
}

impl DelayReleasingReader {
    pub fn new(queue: Arc<ByteQueue>) -> Self {
        Self {
            queue,
            state: State::Open,
            pending: None,
        }
    }

    /// Returns the next byte once it is due, or `None` at end of stream.
    ///
    /// # Errors
    /// - `io::Error::other(INTERRUPTED_ERROR)` if [`Interrupter::interrupt`] fired while waiting.
    /// - `io::Error::other(CORRUPTED_ERROR)` once an interrupt has torn a record header.
    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        match self.state {
            State::Eof => return Ok(None),
            State::Corrupted => return Err(io::Error::other(CORRUPTED_ERROR)),
            State::Open => {}
        }

        let (deadline, payload) = match self.pending.take() {
            Some(pending) => pending,
            None => {
                // a due backlog must not hide an interrupt
                self.queue.check_interrupt()?;
                match self.next_record()? {
                    Some(record) => record,
                    None => return Ok(None),
                }
            }
        };

        if let Err(err) = self.queue.park_until(deadline.to_instant()) {
            self.pending = Some((deadline, payload));
            return Err(err.into());
        }
        Ok(Some(payload))
    }

    /// Dequeues one record, or `None` for the sentinel.
    fn next_record(&mut self) -> io::Result<Option<(Timestamp, u8)>> {
        let mut header = [0u8; DEADLINE_LEN];
        for (i, b) in header.iter_mut().enumerate() {
            match self.queue.read() {
                Ok(v) => *b = v,
                // nothing consumed yet, the channel is intact
                Err(err) if i == 0 => return Err(err.into()),
                Err(InterruptedError) => {
                    warn!(queue = %self.queue.name(), consumed = i, "interrupted inside record header");
                    self.state = State::Corrupted;
                    return Err(io::Error::other(CORRUPTED_ERROR));
                }
            }
        }

        let Some(deadline) = decode_deadline(header) else {
            debug!(queue = %self.queue.name(), "got EOF");
            self.state = State::Eof;
            return Ok(None);
        };

        // the writer pushes whole records, so the payload is already queued
        let payload = match self.queue.read() {
            Ok(b) => b,
            Err(InterruptedError) => {
                warn!(queue = %self.queue.name(), "interrupted before record payload");
                self.state = State::Corrupted;
                return Err(io::Error::other(CORRUPTED_ERROR));
            }
        };
        Ok(Some((deadline, payload)))
    }

    /// `true` once the sentinel has been seen.
    pub fn is_eof(&self) -> bool {
        self.state == State::Eof
    }

    /// Handle that can interrupt this reader from another thread.
    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            queue: self.queue.clone(),
        }
    }

    /// The queue this reader drains.
    pub fn queue(&self) -> &Arc<ByteQueue> {
        &self.queue
    }
}

impl Read for DelayReleasingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.read_byte()? {
            Some(b) => {
                buf[0] = b;
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

impl fmt::Debug for DelayReleasingReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayReleasingReader")
            .field("queue", &self.queue.name())
            .field("state", &self.state)
            .field("pending", &self.pending.is_some())
            .finish()
    }
}

/// Cloneable handle that interrupts a [`DelayReleasingReader`].
///
/// The interrupt is one-shot: it fails the read currently blocked (or the next blocking one)
/// and is then cleared.
#[derive(Clone)]
pub struct Interrupter {
    queue: Arc<ByteQueue>,
}

impl Interrupter {
    pub fn interrupt(&self) {
        debug!(queue = %self.queue.name(), "interrupting reader");
        self.queue.interrupt();
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupter")
            .field("queue", &self.queue.name())
            .finish()
    }
}
