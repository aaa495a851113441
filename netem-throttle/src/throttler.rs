//! Throttler facade.
//!
//! [`Throttler::wrap`] takes the two halves of a real duplex channel and returns replacement
//! halves that behave like a slow network link:
//! - bytes written to the returned writer reach the real writer only after the configured latency
//!   (and no faster than the configured bandwidth);
//! - bytes arriving on the real reader become readable from the returned reader under the same
//!   rules.
//!
//! With zero latency and zero bandwidth nothing is wrapped: the original streams come back in
//! [`Throttled::Passthrough`], untouched.
//!
//! ```no_run
//! use std::io::{Read, Write};
//! use std::net::TcpStream;
//! use netem_throttle::{ThrottleConfig, Throttler};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = TcpStream::connect("127.0.0.1:12345")?;
//! let config = ThrottleConfig::from_millis(50, 1_000_000); // 50ms, 1 Mbit/s
//! let (mut reader, mut writer, throttler) =
//!     Throttler::wrap(config, stream.try_clone()?, stream)?.into_split();
//!
//! writer.write_all(b"ping")?; // reaches the socket ~50ms later
//! let mut buf = [0u8; 4];
//! reader.read_exact(&mut buf)?; // each reply byte is held back ~50ms too
//!
//! drop(writer); // the socket write half is shut down once queued bytes are delivered
//! if let Some(throttler) = throttler {
//!     throttler.join();
//! }
//! # Ok(()) }
//! ```
//!
//! ## Under the hood
//! - Each direction is a [`ByteQueue`] with a [`DelayTaggingWriter`] on one end and a
//!   [`DelayReleasingReader`] on the other.
//! - The inbound [`Pump`] copies the real reader into the inbound tagging writer; the caller reads
//!   the inbound releasing reader.
//! - The caller writes the outbound tagging writer; the outbound [`Pump`] copies the outbound
//!   releasing reader into the real writer.
//! - Both pumps are owned by the [`Throttler`]. [`Throttler::join`] waits for them to drain;
//!   [`Throttler::shutdown`] interrupts the outbound pump first. Dropping the throttler leaves
//!   the pumps running until their streams end.
use std::{
    fmt,
    io::{self, Read, Write},
    sync::Arc,
    time::Duration,
};

use tracing::{debug, info};

use crate::{
    config::ThrottleConfig,
    error::ConfigError,
    io::HalfClose,
    pump::{Pump, PumpReport},
    queue::ByteQueue,
    reader::{DelayReleasingReader, Interrupter},
    writer::DelayTaggingWriter,
};

const INBOUND: &str = "inbound";
const OUTBOUND: &str = "outbound";

/// Creates one delayed direction: bytes written to the writer come out of the reader after the
/// configured latency and pacing.
pub fn pipe(
    name: &str,
    config: &ThrottleConfig,
) -> Result<(DelayTaggingWriter, DelayReleasingReader), ConfigError> {
    let queue = Arc::new(ByteQueue::new(
        name,
        config.queue_capacity(),
        config.queue_growth(),
    )?);
    let writer = DelayTaggingWriter::new(queue.clone(), config.latency(), config.bandwidth_bps());
    let reader = DelayReleasingReader::new(queue);
    Ok((writer, reader))
}

/// Owner of the two pump threads behind an active throttled channel.
pub struct Throttler {
    config: ThrottleConfig,
    inbound: Option<Pump>,
    outbound: Option<Pump>,
    outbound_interrupter: Interrupter,
}

impl Throttler {
    /// Wraps a real duplex channel.
    ///
    /// `reader` and `writer` are the two halves of an already-open channel (for a socket, a
    /// `try_clone` of the stream and the stream itself).
    ///
    /// Queue parameters are only checked when throttling is enabled: a disabled config always
    /// hands the streams back.
    ///
    /// # Errors
    /// [`ConfigError`] for invalid queue parameters or when a pump thread cannot be spawned.
    pub fn wrap<R, W>(
        config: ThrottleConfig,
        reader: R,
        writer: W,
    ) -> Result<Throttled<R, W>, ConfigError>
    where
        R: Read + Send + 'static,
        W: Write + HalfClose + Send + 'static,
    {
        if config.is_disabled() {
            debug!("throttling disabled, passing streams through");
            return Ok(Throttled::Passthrough { reader, writer });
        }

        config.validate()?;

        info!(
            latency_ms = config.latency().as_millis() as u64,
            bandwidth_bps = config.bandwidth_bps(),
            "throttling"
        );

        let (inbound_writer, caller_reader) = pipe(INBOUND, &config)?;
        let (caller_writer, outbound_reader) = pipe(OUTBOUND, &config)?;
        let outbound_interrupter = outbound_reader.interrupter();

        let inbound = Pump::spawn("netem-inbound", reader, inbound_writer)
            .map_err(ConfigError::Spawn)?;
        let outbound = match Pump::spawn("netem-outbound", outbound_reader, writer) {
            Ok(pump) => pump,
            Err(err) => {
                // ends on its own when the real reader does
                inbound.detach();
                return Err(ConfigError::Spawn(err));
            }
        };

        Ok(Throttled::Active {
            reader: caller_reader,
            writer: caller_writer,
            throttler: Throttler {
                config,
                inbound: Some(inbound),
                outbound: Some(outbound),
                outbound_interrupter,
            },
        })
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    pub fn latency(&self) -> Duration {
        self.config.latency()
    }

    pub fn bandwidth_bps(&self) -> u64 {
        self.config.bandwidth_bps()
    }

    /// `true` once both pump threads have exited.
    pub fn is_finished(&self) -> bool {
        self.inbound.as_ref().is_none_or(Pump::is_finished)
            && self.outbound.as_ref().is_none_or(Pump::is_finished)
    }

    /// Waits for both pumps to end on their own.
    ///
    /// The outbound pump ends after the caller's writer is closed and its queue has drained; the
    /// inbound pump ends when the real reader reports end of stream.
    pub fn join(mut self) -> Vec<PumpReport> {
        [self.outbound.take(), self.inbound.take()]
            .into_iter()
            .flatten()
            .map(Pump::join)
            .collect()
    }

    /// Interrupts the outbound pump and collects whatever has stopped.
    ///
    /// Bytes still queued outbound are discarded. The inbound pump is joined only if it has
    /// already finished: a thread blocked inside the real reader's `read` cannot be woken from
    /// here, so it is detached and exits when that reader does. Joining the outbound pump still
    /// waits for a write into the real writer that is already in progress.
    pub fn shutdown(mut self) -> Vec<PumpReport> {
        info!("throttler shutdown initiated");
        self.outbound_interrupter.interrupt();

        let mut reports = Vec::with_capacity(2);
        if let Some(outbound) = self.outbound.take() {
            reports.push(outbound.join());
        }
        if let Some(inbound) = self.inbound.take() {
            if inbound.is_finished() {
                reports.push(inbound.join());
            } else {
                debug!(pump = %inbound.name(), "inbound pump still blocked on its source");
                inbound.detach();
            }
        }

        info!(joined = reports.len(), "throttler shutdown complete");
        reports
    }
}

impl Drop for Throttler {
    fn drop(&mut self) {
        if self.inbound.is_some() || self.outbound.is_some() {
            debug!("throttler dropped, pumps keep running until their streams end");
        }
    }
}

impl fmt::Debug for Throttler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttler")
            .field("config", &self.config)
            .field("inbound", &self.inbound)
            .field("outbound", &self.outbound)
            .finish()
    }
}

/// Result of [`Throttler::wrap`].
#[derive(Debug)]
pub enum Throttled<R, W> {
    /// Throttling is disabled; these are the streams that were passed in.
    Passthrough { reader: R, writer: W },
    /// Streams to use in place of the originals, and the owner of their pumps.
    Active {
        reader: DelayReleasingReader,
        writer: DelayTaggingWriter,
        throttler: Throttler,
    },
}

impl<R, W> Throttled<R, W> {
    pub fn is_passthrough(&self) -> bool {
        matches!(self, Throttled::Passthrough { .. })
    }

    /// Splits into independently owned halves that work the same in both variants.
    pub fn into_split(self) -> (ThrottledReader<R>, ThrottledWriter<W>, Option<Throttler>) {
        match self {
            Throttled::Passthrough { reader, writer } => (
                ThrottledReader::Direct(reader),
                ThrottledWriter::Direct(writer),
                None,
            ),
            Throttled::Active {
                reader,
                writer,
                throttler,
            } => (
                ThrottledReader::Delayed(reader),
                ThrottledWriter::Delayed(writer),
                Some(throttler),
            ),
        }
    }
}

/// Read half returned by [`Throttled::into_split`].
#[derive(Debug)]
pub enum ThrottledReader<R> {
    Direct(R),
    Delayed(DelayReleasingReader),
}

impl<R: Read> Read for ThrottledReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ThrottledReader::Direct(r) => r.read(buf),
            ThrottledReader::Delayed(r) => r.read(buf),
        }
    }
}

/// Write half returned by [`Throttled::into_split`].
#[derive(Debug)]
pub enum ThrottledWriter<W> {
    Direct(W),
    Delayed(DelayTaggingWriter),
}

impl<W: Write> Write for ThrottledWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ThrottledWriter::Direct(w) => w.write(buf),
            ThrottledWriter::Delayed(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ThrottledWriter::Direct(w) => w.flush(),
            ThrottledWriter::Delayed(w) => w.flush(),
        }
    }
}

impl<W: HalfClose> HalfClose for ThrottledWriter<W> {
    fn close_write(&mut self) -> io::Result<()> {
        match self {
            ThrottledWriter::Direct(w) => w.close_write(),
            ThrottledWriter::Delayed(w) => w.close_write(),
        }
    }
}
