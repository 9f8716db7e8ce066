use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, instrument};

use super::transport::is_timeout;
use super::{ReadStatus, Transport};

/// A connected byte stream: a plain tcp socket or a tls session on top of one.
pub trait Connection: Read + Write + Send {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()>;

    fn shutdown(&mut self) -> io::Result<()>;
}

impl Connection for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        TcpStream::set_nonblocking(self, nonblocking)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match TcpStream::shutdown(self, Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

/// Wraps a freshly connected socket in a tls session for `host`.
pub trait TlsConnector: Send + Sync + fmt::Debug {
    fn connect(&self, host: &str, socket: TcpStream) -> io::Result<Box<dyn Connection>>;
}

#[cfg(feature = "tls")]
mod tls {
    use std::sync::Arc;

    use rustls::pki_types::ServerName;
    use rustls::{ClientConfig, ClientConnection, StreamOwned};

    use super::*;

    impl Connection for StreamOwned<ClientConnection, TcpStream> {
        fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
            self.sock.set_read_timeout(timeout)
        }

        fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
            self.sock.set_nonblocking(nonblocking)
        }

        fn shutdown(&mut self) -> io::Result<()> {
            self.conn.send_close_notify();
            // best effort: the peer may already be gone
            let _ = self.conn.write_tls(&mut self.sock);
            Connection::shutdown(&mut self.sock)
        }
    }

    /// [`TlsConnector`] backed by a rustls client configuration.
    #[derive(Debug, Clone)]
    pub struct RustlsConnector {
        config: Arc<ClientConfig>,
    }

    impl RustlsConnector {
        pub fn new(config: Arc<ClientConfig>) -> Self {
            Self { config }
        }
    }

    impl TlsConnector for RustlsConnector {
        fn connect(&self, host: &str, socket: TcpStream) -> io::Result<Box<dyn Connection>> {
            let name = ServerName::try_from(host.to_string())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            let connection = ClientConnection::new(self.config.clone(), name)
                .map_err(io::Error::other)?;
            Ok(Box::new(StreamOwned::new(connection, socket)))
        }
    }
}

#[cfg(feature = "tls")]
pub use tls::RustlsConnector;

/// Opens a tcp connection to `host:port`, trying every resolved address in turn.
#[instrument]
pub(crate) fn connect(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_error = None;
    for address in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&address, timeout) {
            Ok(socket) => {
                debug!(%address, "connected");
                socket.set_nodelay(true)?;
                return Ok(socket);
            }
            Err(e) => {
                debug!(%address, error = %e, "connect failed");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no address found for {}", host))
    }))
}

/// Duplex transport over a [`Connection`].
pub struct SocketTransport {
    connection: Box<dyn Connection>,
    label: String,
    read_timeout: Option<Duration>,
    closed: bool,
}

impl SocketTransport {
    pub fn new(
        connection: Box<dyn Connection>,
        label: String,
        read_timeout: Option<Duration>,
    ) -> io::Result<Self> {
        connection.set_read_timeout(read_timeout)?;
        Ok(Self {
            connection,
            label,
            read_timeout,
            closed: false,
        })
    }

    fn read_status(&mut self, buf: &mut [u8]) -> io::Result<ReadStatus> {
        match self.connection.read(buf) {
            Ok(0) => Ok(ReadStatus::Eof),
            Ok(n) => Ok(ReadStatus::Data(n)),
            Err(e) if is_timeout(&e) => Ok(ReadStatus::Timeout),
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for SocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketTransport")
            .field("target", &self.label)
            .field("read_timeout", &self.read_timeout)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Transport for SocketTransport {
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn can_read(&self) -> bool {
        true
    }

    fn can_write(&self) -> bool {
        true
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.connection.read(buf)
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<ReadStatus> {
        // a zero timeout means "block forever" to the socket api
        let wait = timeout.max(Duration::from_millis(1));
        self.connection.set_read_timeout(Some(wait))?;
        let status = self.read_status(buf);
        self.connection.set_read_timeout(self.read_timeout)?;
        status
    }

    fn read_nonblock(&mut self, buf: &mut [u8]) -> io::Result<ReadStatus> {
        self.connection.set_nonblocking(true)?;
        let status = self.read_status(buf);
        self.connection.set_nonblocking(false)?;
        status
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.connection.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.connection.flush()
    }

    fn is_connection(&self) -> bool {
        true
    }

    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        debug!(target_name = %self.label, "closing socket");
        self.connection.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use super::*;
    use crate::buffer::BufferPool;
    use crate::stream::{Stream, StreamOptions};

    fn echo_server() -> (u16, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut buf = [0u8; 256];
            loop {
                match socket.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if socket.write_all(&buf[..n]).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        (port, handle)
    }

    fn socket_stream(port: u16) -> Stream {
        let socket = connect("127.0.0.1", port, Duration::from_secs(5)).unwrap();
        let transport =
            SocketTransport::new(Box::new(socket), format!("tcp://127.0.0.1:{}", port), None)
                .unwrap();
        Stream::new(transport, BufferPool::new(64, 4), StreamOptions::default())
    }

    #[test]
    fn test_request_is_flushed_before_response_is_read() {
        let (port, server) = echo_server();
        let mut stream = socket_stream(port);
        stream.println("hello echo").unwrap();
        assert_eq!(stream.read_line().unwrap().as_deref(), Some("hello echo"));
        stream.close().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_timeout_is_distinct_from_end_of_stream() {
        let (port, server) = echo_server();
        let mut stream = socket_stream(port);
        assert_eq!(
            stream.fill_with_timeout(Duration::from_millis(20)).unwrap(),
            ReadStatus::Timeout
        );
        assert!(stream.fill_if_live(Duration::from_millis(20)).unwrap());
        assert_eq!(stream.read_non_block().unwrap(), ReadStatus::Timeout);
        stream.print("x").unwrap();
        assert_eq!(
            stream.fill_with_timeout(Duration::from_secs(5)).unwrap(),
            ReadStatus::Data(1)
        );
        stream.close().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_connect_to_closed_port_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(connect("127.0.0.1", port, Duration::from_secs(1)).is_err());
    }
}
