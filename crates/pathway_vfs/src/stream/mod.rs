/* 📖 # Why one Stream type for reading, writing and both?

A duplex transport (socket, http exchange, loopback) has a read side and a write side that must
be coupled: before the read side waits for a response, everything the write side buffered has
to reach the transport. Keeping both buffers in one handle makes that coupling a plain method
call instead of a back reference between two objects. Read-only and write-only streams are the
same type with one side absent.
*/

mod encoding;
mod file;
mod http;
mod memory;
mod read;
mod socket;
mod transport;
mod write;

use std::fmt;

use pathway_base::{PathwayError, PathwayResult};
use tracing::debug;

use crate::buffer::{BufferNode, BufferPool};

pub use encoding::{DecodeStep, Decoder, Encoding};
pub use file::{FileTransport, OpenMode};
pub use http::{HttpMethod, HttpRequest, HttpTransport};
pub use memory::{LoopbackTransport, MemoryFile, MemoryFileTransport};
#[cfg(feature = "tls")]
pub use socket::RustlsConnector;
pub use socket::{Connection, SocketTransport, TlsConnector};
pub use transport::{ReadStatus, Transport};

pub(crate) use socket::connect;
pub(crate) use transport::{into_io, transport_error};

/// Default read size at or above which an empty read buffer is bypassed.
pub const DEFAULT_ZERO_COPY_THRESHOLD: usize = 1024;

/// Buffering behaviour shared by the streams a runtime opens.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Bulk reads of at least this many bytes go straight into the caller's buffer.
    pub zero_copy_threshold: usize,
    /// Propagate read-side transport errors instead of reporting end of stream.
    pub strict_reads: bool,
    pub encoding: Encoding,
    pub newline: String,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            zero_copy_threshold: DEFAULT_ZERO_COPY_THRESHOLD,
            strict_reads: false,
            encoding: Encoding::Latin1,
            newline: "\n".to_string(),
        }
    }
}

/// Buffered stream over a raw [`Transport`].
///
/// The read side fills a pool node on demand, the write side accumulates into another
/// and hands it to the transport on flush. Close is idempotent and closes the transport once.
pub struct Stream {
    transport: Box<dyn Transport>,
    label: String,
    pool: BufferPool,
    options: StreamOptions,
    readable: bool,
    writable: bool,
    closed: bool,

    read_buf: Option<BufferNode>,
    read_offset: usize,
    read_position: u64,
    decoder: Option<Box<dyn Decoder>>,

    write_buf: Option<BufferNode>,
    write_position: u64,
    encoding: Encoding,
    newline: String,
    flush_on_newline: bool,
}

impl Stream {
    pub fn new(transport: impl Transport + 'static, pool: BufferPool, options: StreamOptions) -> Self {
        Self::from_boxed(Box::new(transport), pool, options)
    }

    pub fn from_boxed(
        transport: Box<dyn Transport>,
        pool: BufferPool,
        options: StreamOptions,
    ) -> Self {
        let label = transport.describe();
        let readable = transport.can_read();
        let writable = transport.can_write();
        let encoding = options.encoding;
        let newline = options.newline.clone();
        debug!(target_name = %label, readable, writable, "opened stream");
        Self {
            transport,
            label,
            pool,
            decoder: encoding.decoder(),
            options,
            readable,
            writable,
            closed: false,
            read_buf: None,
            read_offset: 0,
            read_position: 0,
            write_buf: None,
            write_position: 0,
            encoding,
            newline,
            flush_on_newline: false,
        }
    }

    /// Target of the stream, typically the url it was opened from.
    pub fn describe(&self) -> &str {
        &self.label
    }

    pub fn can_read(&self) -> bool {
        self.readable && !self.closed
    }

    pub fn can_write(&self) -> bool {
        self.writable && !self.closed
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    /// Propagate read-side transport errors instead of reporting end of stream.
    pub fn set_strict_reads(&mut self, strict: bool) {
        self.options.strict_reads = strict;
    }

    pub fn set_zero_copy_threshold(&mut self, threshold: usize) {
        self.options.zero_copy_threshold = threshold;
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Switches the character encoding used by text reads and writes.
    pub fn set_encoding(&mut self, name: &str) -> PathwayResult<()> {
        let encoding = Encoding::for_name(name)?;
        self.encoding = encoding;
        self.decoder = encoding.decoder();
        Ok(())
    }

    /// Current position: the read position for readable streams, otherwise the write position.
    pub fn position(&self) -> u64 {
        if self.readable {
            self.read_position
        } else {
            self.write_position
        }
    }

    pub fn write_position(&self) -> u64 {
        self.write_position
    }

    /// Reads a transport attribute, such as an http response header.
    ///
    /// Pending writes are flushed first since the attribute may only exist once the request
    /// has been sent.
    pub fn attribute(&mut self, name: &str) -> PathwayResult<Option<String>> {
        self.ensure_open()?;
        self.flush_write_buffer()?;
        self.transport
            .attribute(name)
            .map_err(|e| transport_error(&*self.transport, e))
    }

    pub fn attribute_names(&mut self) -> PathwayResult<Vec<String>> {
        self.ensure_open()?;
        self.flush_write_buffer()?;
        self.transport
            .attribute_names()
            .map_err(|e| transport_error(&*self.transport, e))
    }

    pub fn set_attribute(&mut self, name: &str, value: &str) -> PathwayResult<()> {
        self.ensure_open()?;
        self.transport
            .set_attribute(name, value)
            .map_err(|e| transport_error(&*self.transport, e))
    }

    /// Flushes pending writes, returns both buffers to the pool and closes the transport.
    ///
    /// Calling close again is a no-op.
    pub fn close(&mut self) -> PathwayResult<()> {
        if self.closed {
            return Ok(());
        }
        let flushed = self.flush_write_buffer();
        self.closed = true;
        self.read_buf = None;
        self.write_buf = None;
        self.read_offset = 0;
        let closed = self
            .transport
            .close()
            .map_err(|e| transport_error(&*self.transport, e));
        debug!(target_name = %self.label, "closed stream");
        flushed?;
        closed
    }

    fn ensure_open(&self) -> PathwayResult<()> {
        if self.closed {
            return Err(Box::new(PathwayError::io(
                self.label.clone(),
                std::io::Error::new(std::io::ErrorKind::NotConnected, "stream is closed"),
            )));
        }
        Ok(())
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!(target_name = %self.label, error = %e, "error closing dropped stream");
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("target", &self.label)
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .field("closed", &self.closed)
            .field("buffered", &self.buffered())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::Transport;

    /// Counters shared between a test and its instrumented transport.
    #[derive(Debug, Default)]
    pub struct Calls {
        pub reads: AtomicUsize,
        pub writes: AtomicUsize,
        pub closes: AtomicUsize,
    }

    impl Calls {
        pub fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
        pub fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
        pub fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    /// Serves a fixed byte sequence and counts every call.
    #[derive(Debug)]
    pub struct CountingTransport {
        pub data: Vec<u8>,
        pub position: usize,
        pub calls: Arc<Calls>,
        pub fail_reads: bool,
        pub connection: bool,
    }

    impl CountingTransport {
        pub fn new(data: &[u8]) -> (Self, Arc<Calls>) {
            let calls = Arc::new(Calls::default());
            (
                Self {
                    data: data.to_vec(),
                    position: 0,
                    calls: calls.clone(),
                    fail_reads: false,
                    connection: false,
                },
                calls,
            )
        }
    }

    impl Transport for CountingTransport {
        fn describe(&self) -> String {
            "counting:".to_string()
        }

        fn can_read(&self) -> bool {
            true
        }

        fn can_write(&self) -> bool {
            true
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.calls.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
            }
            let rest = &self.data[self.position..];
            let n = rest.len().min(buf.len());
            buf[..n].copy_from_slice(&rest[..n]);
            self.position += n;
            Ok(n)
        }

        fn write(&mut self, _buf: &[u8]) -> io::Result<()> {
            self.calls.writes.fetch_add(1, Ordering::SeqCst);
            if self.connection {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
            }
            Ok(())
        }

        fn is_connection(&self) -> bool {
            self.connection
        }

        fn close(&mut self) -> io::Result<()> {
            self.calls.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
