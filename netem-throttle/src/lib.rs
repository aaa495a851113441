//! Latency and bandwidth emulation for blocking duplex byte streams.
//!
//! `netem-throttle` turns an instantaneous channel (a socket, a child process's pipes, an
//! in-memory pipe) into one that behaves like a slow link. Every byte is stamped with a delivery
//! deadline when it is written and held back until that deadline when it is read.
//!
//! ## Modules
//! - [`queue`]: growable blocking byte FIFO shared by a writer and a reader.
//! - [`writer`]: [`DelayTaggingWriter`] stamps bytes with `now + latency` plus bandwidth pacing.
//! - [`reader`]: [`DelayReleasingReader`] releases each byte once its deadline has passed.
//! - [`pump`]: [`Pump`] threads relaying a real stream into or out of a delayed pipe.
//! - [`throttler`]: [`Throttler::wrap`] composes all of the above around a duplex stream pair.
//! - [`io`]: [`HalfClose`], how a pump signals end of stream to a real sink.
//! - [`config`], [`error`] and [`clock`]: knobs, error types and deadline timestamps.
//!
//! ## Usage
//! ```no_run
//! use std::io::{Read, Write};
//! use std::time::Duration;
//! use netem_throttle::{ThrottleConfig, Throttler};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let upstream = std::net::TcpStream::connect("127.0.0.1:5432")?;
//! let config = ThrottleConfig::new(Duration::from_millis(120), 256_000);
//!
//! let (mut reader, mut writer, _throttler) =
//!     Throttler::wrap(config, upstream.try_clone()?, upstream)?.into_split();
//! writer.write_all(b"hello")?;
//! let mut reply = Vec::new();
//! reader.read_to_end(&mut reply)?;
//! # Ok(()) }
//! ```
//!
//! ## Under the hood
//! - Deadlines come from a process-wide monotonic clock and travel in-band: each payload byte
//!   costs nine queue bytes (8-byte big-endian deadline, then the byte). Eight zero bytes mark end
//!   of stream.
//! - Writes never block; queues grow instead. Only reads wait, first for data and then for the
//!   deadline.
//! - Bandwidth is emulated by spacing deadlines at least `8e9 / bps` nanoseconds apart.
//! - Waiting readers can be woken through an [`Interrupter`]; a pump stops when its reader is
//!   interrupted.
pub mod clock;
pub mod config;
pub mod error;
pub mod io;
mod pacer;
pub mod pump;
pub mod queue;
pub mod reader;
mod record;
pub mod throttler;
pub mod writer;

pub use config::ThrottleConfig;
pub use error::ConfigError;
pub use io::HalfClose;
pub use pump::{Pump, PumpOutcome, PumpReport};
pub use queue::ByteQueue;
pub use reader::{DelayReleasingReader, Interrupter};
pub use throttler::{pipe, Throttled, ThrottledReader, ThrottledWriter, Throttler};
pub use writer::DelayTaggingWriter;
