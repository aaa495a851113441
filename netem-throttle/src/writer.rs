//! Delay-tagging writer.
//!
//! [`DelayTaggingWriter`] is the producer end of a delayed pipe. Each written byte is stamped
//! with the earliest time it may be released (`now + latency`, pushed out further by bandwidth
//! pacing) and pushed into the shared [`ByteQueue`] as a tagged record. The delay is applied
//! lazily by the [`DelayReleasingReader`](crate::reader::DelayReleasingReader) at the other end,
//! so no timer is armed per byte and FIFO order comes from the queue itself.
//!
//! Writes never block. Closing pushes the end-of-stream sentinel; dropping an open writer
//! closes it.
use std::{
    fmt,
    io::{self, Write},
    sync::Arc,
    time::Duration,
};

use tracing::debug;

use crate::{
    clock::{self, Timestamp},
    io::HalfClose,
    pacer::Pacer,
    queue::ByteQueue,
    record::{TaggedByte, DATA_LEN},
};

pub struct DelayTaggingWriter {
    queue: Arc<ByteQueue>,
    latency: Duration,
    pacer: Pacer,
    last_deadline: Option<Timestamp>,
    closed: bool,
}

impl DelayTaggingWriter {
    /// Writes into `queue`, delaying every byte by `latency` and pacing to `bandwidth_bps`
    /// bits per second (`0` = unpaced).
    pub fn new(queue: Arc<ByteQueue>, latency: Duration, bandwidth_bps: u64) -> Self {
        Self {
            queue,
            latency,
            pacer: Pacer::new(bandwidth_bps),
            last_deadline: None,
            closed: false,
        }
    }

    /// Release time for the next byte written at `now`.
    ///
    /// Never earlier than the previous one, so the reader can release strictly in order.
    fn next_deadline(&mut self, now: Timestamp) -> Timestamp {
        let deadline = self.pacer.schedule(now).saturating_add(self.latency);
        let deadline = self.last_deadline.map_or(deadline, |last| last.max(deadline));
        self.last_deadline = Some(deadline);
        deadline
    }

    /// Pushes the end-of-stream sentinel. Later calls do nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        debug!(queue = %self.queue.name(), "closing");
        let mut record = [0u8; DATA_LEN];
        let n = TaggedByte::EndOfStream.encode(&mut record);
        self.queue.write_all(&record[..n]);
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// The queue this writer feeds.
    pub fn queue(&self) -> &Arc<ByteQueue> {
        &self.queue
    }
}

impl Write for DelayTaggingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write to closed throttled stream",
            ));
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let now = clock::now();
        let mut records = Vec::with_capacity(buf.len() * DATA_LEN);
        let mut record = [0u8; DATA_LEN];
        for &payload in buf {
            let deadline = self.next_deadline(now);
            let n = TaggedByte::Data { deadline, payload }.encode(&mut record);
            records.extend_from_slice(&record[..n]);
        }
        self.queue.write_all(&records);

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl HalfClose for DelayTaggingWriter {
    fn close_write(&mut self) -> io::Result<()> {
        self.close();
        Ok(())
    }
}

impl Drop for DelayTaggingWriter {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for DelayTaggingWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayTaggingWriter")
            .field("queue", &self.queue.name())
            .field("latency", &self.latency)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{decode_deadline, DEADLINE_LEN};

    fn queue() -> Arc<ByteQueue> {
        Arc::new(ByteQueue::new("test", 4, 2.0).unwrap())
    }

    fn pop_record(q: &ByteQueue) -> TaggedByte {
        let mut header = [0u8; DEADLINE_LEN];
        for b in &mut header {
            *b = q.try_read().expect("header byte");
        }
        match decode_deadline(header) {
            Some(deadline) => TaggedByte::Data {
                deadline,
                payload: q.try_read().expect("payload byte"),
            },
            None => TaggedByte::EndOfStream,
        }
    }

    #[test]
    fn each_byte_becomes_a_nine_byte_record() {
        let q = queue();
        let mut w = DelayTaggingWriter::new(q.clone(), Duration::from_millis(50), 0);

        let before = clock::now();
        assert_eq!(w.write(b"ab").unwrap(), 2);
        assert_eq!(q.available(), 18);

        for expected in [b'a', b'b'] {
            match pop_record(&q) {
                TaggedByte::Data { deadline, payload } => {
                    assert_eq!(payload, expected);
                    assert!(deadline >= before.saturating_add(Duration::from_millis(50)));
                }
                TaggedByte::EndOfStream => panic!("unexpected sentinel"),
            }
        }
    }

    #[test]
    fn close_pushes_sentinel_once() {
        let q = queue();
        let mut w = DelayTaggingWriter::new(q.clone(), Duration::from_millis(1), 0);
        w.close();
        w.close();
        assert_eq!(q.available(), 8);
        assert_eq!(pop_record(&q), TaggedByte::EndOfStream);

        let err = w.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        drop(w);
        assert_eq!(q.available(), 0);
    }

    #[test]
    fn drop_closes_an_open_writer() {
        let q = queue();
        let mut w = DelayTaggingWriter::new(q.clone(), Duration::from_millis(1), 0);
        w.write_all(b"z").unwrap();
        drop(w);

        assert!(matches!(pop_record(&q), TaggedByte::Data { payload: b'z', .. }));
        assert_eq!(pop_record(&q), TaggedByte::EndOfStream);
    }

    #[test]
    fn deadlines_are_non_decreasing_and_paced() {
        let q = queue();
        // 8 kbit/s = one byte per millisecond
        let mut w = DelayTaggingWriter::new(q.clone(), Duration::ZERO, 8_000);
        w.write_all(&[0u8; 16]).unwrap();
        w.write_all(&[1u8; 16]).unwrap();

        let mut deadlines = Vec::new();
        while q.available() > 0 {
            if let TaggedByte::Data { deadline, .. } = pop_record(&q) {
                deadlines.push(deadline.as_nanos());
            }
        }
        assert_eq!(deadlines.len(), 32);
        for pair in deadlines.windows(2) {
            assert!(pair[1] >= pair[0] + 1_000_000, "{pair:?}");
        }
    }

    #[test]
    fn empty_write_queues_nothing() {
        let q = queue();
        let mut w = DelayTaggingWriter::new(q.clone(), Duration::from_millis(5), 0);
        assert_eq!(w.write(&[]).unwrap(), 0);
        assert_eq!(q.available(), 0);
        w.flush().unwrap();
    }
}
