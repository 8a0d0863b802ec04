// AvrLit - Host/Target Differential Test Harness
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::{Link, TransportError};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

const READ_BUF_LEN: usize = 512;

/// Byte stream to a remote stub, e.g. a serial bridge or `avrlit serve`.
#[derive(Debug)]
pub struct TcpLink {
    stream: TcpStream,
}

impl TcpLink {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)?;
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self, TransportError> {
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    pub fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        self.stream.peer_addr().ok()
    }
}

impl Link for TcpLink {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    fn read_chunk(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        // A zero read timeout means "block forever" for sockets.
        let timeout = timeout.max(Duration::from_millis(1));
        self.stream.set_read_timeout(Some(timeout))?;

        let mut buf = [0u8; READ_BUF_LEN];
        match self.stream.read(&mut buf) {
            Ok(0) => Err(TransportError::Disconnected),
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Err(TransportError::Timeout)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
                ) =>
            {
                Err(TransportError::Disconnected)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_tcp_link_exchanges_bytes_and_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut link = TcpLink::from_stream(stream).unwrap();
            let got = link.read_chunk(Duration::from_secs(2)).unwrap();
            link.write_all(&got).unwrap();
        });

        let mut client = TcpLink::connect(addr).unwrap();
        client.write_all(&[0xA5, 1, 2]).unwrap();

        let mut echoed = Vec::new();
        while echoed.len() < 3 {
            echoed.extend(client.read_chunk(Duration::from_secs(2)).unwrap());
        }
        assert_eq!(echoed, vec![0xA5, 1, 2]);
        server.join().unwrap();

        // Server side closed: the link reports a disconnect rather than hanging.
        assert!(matches!(
            client.read_chunk(Duration::from_millis(200)),
            Err(TransportError::Disconnected) | Err(TransportError::Timeout)
        ));
    }
}
