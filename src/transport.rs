//! Duplex byte channel the session runs over.
//!
//! Anything that is `Read + Write` and can be closed will do; the binary
//! uses a plain blocking [`TcpStream`]. Reads block with no timeout.
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};

use tracing::debug;

pub trait Transport: Read + Write {
    /// Release the connection. Called exactly once when a session ends,
    /// whatever the outcome.
    fn close(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn close(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            // Peer already tore the socket down.
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// Open a blocking TCP connection to the exchange.
pub fn connect(host: &str, port: u16) -> io::Result<TcpStream> {
    let stream = TcpStream::connect((host, port))?;
    stream.set_nodelay(true)?;
    debug!(peer = %stream.peer_addr()?, "connected");
    Ok(stream)
}

/// `read` that retries on `Interrupted`. Returns 0 only on end of stream.
pub(crate) fn read_retrying<T: Read + ?Sized>(t: &mut T, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match t.read(buf) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}
