use std::fmt;
use std::io;
use std::path::Path as NativePath;
use std::time::Duration;

use pathway_base::PathwayError;

/// Outcome of a fill that may wait for data.
///
/// `Timeout` is disjoint from `Eof`: the transport is still live and the caller may retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Data(usize),
    Eof,
    Timeout,
}

/* 📖 # Why is Transport a trait with defaults for everything?

Files, sockets, http exchanges, memory files and pipes share one buffered Stream. Each raw
transport only overrides what it can actually do; the defaults describe a transport without
that capability (no reads, no writes, no seek). The Stream turns a missing capability into
an Unsupported error instead of a silent no-op.
*/

/// Raw, unbuffered I/O endpoint wrapped by a [`Stream`](super::Stream).
pub trait Transport: Send + fmt::Debug {
    /// Human readable target, used in logs and errors.
    fn describe(&self) -> String;

    fn can_read(&self) -> bool {
        false
    }

    fn can_write(&self) -> bool {
        false
    }

    /// Reads into `buf`; `Ok(0)` signals end of stream.
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(unsupported("read"))
    }

    /// Reads, waiting at most `timeout` for data to arrive.
    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<ReadStatus> {
        Ok(match self.read(buf)? {
            0 => ReadStatus::Eof,
            n => ReadStatus::Data(n),
        })
    }

    /// Reads only what is available without waiting.
    fn read_nonblock(&mut self, buf: &mut [u8]) -> io::Result<ReadStatus> {
        self.read_timeout(buf, Duration::ZERO)
    }

    /// Bytes readable without blocking, when known.
    fn available(&mut self) -> io::Result<usize> {
        Ok(0)
    }

    /// Writes the whole of `buf`.
    fn write(&mut self, _buf: &[u8]) -> io::Result<()> {
        Err(unsupported("write"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn can_seek(&self) -> bool {
        false
    }

    /// Repositions to an absolute offset. Only called when `can_seek` is true.
    fn seek_start(&mut self, _position: u64) -> io::Result<()> {
        Err(unsupported("seek"))
    }

    /// Skips forward natively, returning `None` when the transport has no cheaper way
    /// than reading and discarding.
    fn skip(&mut self, _count: u64) -> io::Result<Option<u64>> {
        Ok(None)
    }

    /// Whether write failures mean the remote peer went away.
    fn is_connection(&self) -> bool {
        false
    }

    /// Local file backing this transport, used to report file errors.
    fn file_path(&self) -> Option<&NativePath> {
        None
    }

    /// Transport specific metadata, such as http status and response headers.
    fn attribute(&mut self, _name: &str) -> io::Result<Option<String>> {
        Ok(None)
    }

    fn attribute_names(&mut self) -> io::Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Sets transport specific metadata, such as http request headers.
    fn set_attribute(&mut self, _name: &str, _value: &str) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) fn unsupported(operation: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{} is not supported by this transport", operation),
    )
}

/// Wraps a read-side or generic transport failure.
pub(crate) fn transport_error(transport: &dyn Transport, source: io::Error) -> Box<PathwayError> {
    match transport.file_path() {
        Some(path) => Box::new(PathwayError::file(path, source)),
        None => Box::new(PathwayError::io(transport.describe(), source)),
    }
}

/// Wraps a write-side failure; connection transports report a peer disconnect.
pub(crate) fn write_error(transport: &dyn Transport, source: io::Error) -> Box<PathwayError> {
    if transport.is_connection() {
        Box::new(PathwayError::peer_disconnected(transport.describe(), source))
    } else {
        transport_error(transport, source)
    }
}

/// Converts a pathway error back into `io::Error` for std trait implementations.
pub(crate) fn into_io(error: Box<PathwayError>) -> io::Error {
    let kind = match error.kind() {
        pathway_base::ErrorKind::FileError { source, .. }
        | pathway_base::ErrorKind::Io { source, .. } => source.kind(),
        pathway_base::ErrorKind::PeerDisconnected { .. } => io::ErrorKind::BrokenPipe,
        pathway_base::ErrorKind::Unsupported { .. } => io::ErrorKind::Unsupported,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, error)
}

/// True for the io error kinds a timed out socket read reports.
pub(crate) fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
