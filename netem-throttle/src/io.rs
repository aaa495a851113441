//! Half-close support for real sinks.
//!
//! When a pump's source reaches end of stream it must tell its sink that no more data is coming.
//! For a tagging writer that means pushing the sentinel; for a socket it means
//! `shutdown(Write)`, so the peer reads EOF while the read half stays usable.
use std::{
    io::{self, BufWriter, Write},
    net::{Shutdown, TcpStream},
    process::ChildStdin,
};

/// Close the write direction of a sink.
///
/// Types without a separate write direction (pipes, in-memory buffers) implement this as a
/// flush; they are closed for real when the pump drops them.
///
/// # Idempotency
/// Safe to call more than once.
pub trait HalfClose {
    fn close_write(&mut self) -> io::Result<()>;
}

impl HalfClose for TcpStream {
    fn close_write(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Write) {
            // peer already went away
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

#[cfg(unix)]
impl HalfClose for std::os::unix::net::UnixStream {
    fn close_write(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Write) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

impl HalfClose for ChildStdin {
    fn close_write(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl HalfClose for Vec<u8> {
    fn close_write(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl HalfClose for io::Sink {
    fn close_write(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Write + HalfClose> HalfClose for BufWriter<W> {
    fn close_write(&mut self) -> io::Result<()> {
        self.flush()?;
        self.get_mut().close_write()
    }
}

impl<T: HalfClose + ?Sized> HalfClose for Box<T> {
    fn close_write(&mut self) -> io::Result<()> {
        (**self).close_write()
    }
}

impl<T: HalfClose + ?Sized> HalfClose for &mut T {
    fn close_write(&mut self) -> io::Result<()> {
        (**self).close_write()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{io::Read, net::TcpListener};

    #[test]
    fn tcp_close_write_delivers_eof_but_keeps_read_half() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        client.write_all(b"bye").unwrap();
        client.close_write().unwrap();
        client.close_write().unwrap();

        let mut got = Vec::new();
        server.read_to_end(&mut got).unwrap();
        assert_eq!(got, b"bye");

        server.write_all(b"still open").unwrap();
        server.close_write().unwrap();
        let mut back = Vec::new();
        client.read_to_end(&mut back).unwrap();
        assert_eq!(back, b"still open");
    }

    #[test]
    fn buf_writer_flushes_before_closing() {
        let mut w = BufWriter::new(Vec::new());
        w.write_all(b"abc").unwrap();
        w.close_write().unwrap();
        assert_eq!(w.get_ref(), b"abc");
    }

    #[test]
    fn boxed_sinks_delegate() {
        let mut w: Box<dyn HalfCloseWrite> = Box::new(Vec::new());
        w.write_all(b"x").unwrap();
        w.close_write().unwrap();
    }

    trait HalfCloseWrite: Write + HalfClose {}
    impl<T: Write + HalfClose> HalfCloseWrite for T {}
}
