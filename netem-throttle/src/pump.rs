//! Relay threads.
//!
//! A [`Pump`] owns one named OS thread that copies everything from a source into a sink until the
//! source reports end of stream, then half-closes the sink with [`HalfClose::close_write`] and
//! exits. When the sink is a [`DelayTaggingWriter`](crate::writer::DelayTaggingWriter) closing
//! pushes the end-of-stream sentinel.
//!
//! I/O failures are logged and end only the failing pump; the owner sees them in the
//! [`PumpReport`] returned by [`Pump::join`].
use std::{
    fmt,
    io::{self, Read, Write},
    thread::{self, JoinHandle},
};

use tracing::{debug, error, info};

use crate::{error::is_interrupted, io::HalfClose};

const CHUNK: usize = 8 * 1024;

/// How a pump ended.
#[derive(Debug)]
pub enum PumpOutcome {
    /// The source reached end of stream and the sink was closed.
    Ended,
    /// The source was interrupted through its [`Interrupter`](crate::reader::Interrupter).
    Interrupted,
    /// Reading, writing or closing failed; the sink may not have been closed.
    Failed(io::Error),
    /// The thread panicked.
    Panicked,
}

/// Summary of a finished pump.
#[derive(Debug)]
pub struct PumpReport {
    pub name: String,
    /// Bytes accepted by the sink.
    pub bytes: u64,
    pub outcome: PumpOutcome,
}

impl PumpReport {
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, PumpOutcome::Ended)
    }
}

/// Handle to a running relay thread.
pub struct Pump {
    name: String,
    handle: Option<JoinHandle<PumpReport>>,
}

impl Pump {
    /// Starts relaying `source` into `sink` on a new thread called `name`.
    ///
    /// # Errors
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn<R, W>(name: impl Into<String>, source: R, sink: W) -> io::Result<Self>
    where
        R: Read + Send + 'static,
        W: Write + HalfClose + Send + 'static,
    {
        let name = name.into();
        debug!(pump = %name, "spawning pump thread");

        let handle = thread::Builder::new().name(name.clone()).spawn({
            let name = name.clone();
            move || run(name, source, sink)
        })?;

        Ok(Self {
            name,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `true` once the thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for the thread to exit.
    pub fn join(mut self) -> PumpReport {
        let Some(handle) = self.handle.take() else {
            return PumpReport {
                name: self.name.clone(),
                bytes: 0,
                outcome: PumpOutcome::Ended,
            };
        };

        handle.join().unwrap_or_else(|_| {
            error!(pump = %self.name, "pump thread panicked");
            PumpReport {
                name: self.name.clone(),
                bytes: 0,
                outcome: PumpOutcome::Panicked,
            }
        })
    }

    /// Lets the thread run on without a handle.
    pub fn detach(mut self) {
        debug!(pump = %self.name, "detaching pump thread");
        self.handle.take();
    }
}

impl fmt::Debug for Pump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pump")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn run<R, W>(name: String, mut source: R, mut sink: W) -> PumpReport
where
    R: Read,
    W: Write + HalfClose,
{
    info!(pump = %name, "pump started");
    let mut bytes = 0u64;
    let outcome = match relay(&mut source, &mut sink, &mut bytes) {
        Ok(()) => {
            info!(pump = %name, bytes, "pump finished");
            PumpOutcome::Ended
        }
        Err(err) if is_interrupted(&err) => {
            info!(pump = %name, bytes, "pump interrupted");
            PumpOutcome::Interrupted
        }
        Err(err) => {
            error!(pump = %name, bytes, error = %err, "pump failed");
            PumpOutcome::Failed(err)
        }
    };
    PumpReport {
        name,
        bytes,
        outcome,
    }
}

fn relay<R, W>(source: &mut R, sink: &mut W, bytes: &mut u64) -> io::Result<()>
where
    R: Read,
    W: Write + HalfClose,
{
    let mut buf = vec![0u8; CHUNK];
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        sink.write_all(&buf[..n])?;
        sink.flush()?;
        *bytes += n as u64;
    }
    sink.close_write()
}
