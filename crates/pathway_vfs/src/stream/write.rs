use std::io;

use pathway_base::{PathwayError, PathwayResult};

use super::Stream;
use super::transport::{into_io, transport_error, write_error};

impl Stream {
    fn ensure_writable(&self) -> PathwayResult<()> {
        self.ensure_open()?;
        if !self.writable {
            return Err(Box::new(PathwayError::unsupported(
                "write",
                self.label.clone(),
            )));
        }
        Ok(())
    }

    /// Bytes waiting in the write buffer.
    pub fn pending_write(&self) -> usize {
        self.write_buf.as_ref().map_or(0, |node| node.len())
    }

    /// Hands the write buffer to the transport without flushing the transport itself.
    pub(super) fn flush_write_buffer(&mut self) -> PathwayResult<()> {
        let Some(node) = self.write_buf.as_mut() else {
            return Ok(());
        };
        if node.is_empty() {
            return Ok(());
        }
        let result = self.transport.write(node.filled());
        node.clear();
        result.map_err(|e| write_error(&*self.transport, e))
    }

    /// True when both sides move one transport cursor, as in a file opened read-write.
    fn shares_cursor(&self) -> bool {
        self.readable && self.writable && self.transport.can_seek()
    }

    /// Drops read-ahead and moves the shared cursor back to the logical read position.
    fn discard_read_ahead(&mut self) -> PathwayResult<()> {
        if self.buffered() == 0 {
            return Ok(());
        }
        if let Some(node) = self.read_buf.as_mut() {
            node.clear();
        }
        self.read_offset = 0;
        self.transport
            .seek_start(self.read_position)
            .map_err(|e| transport_error(&*self.transport, e))
    }

    /// Writes all of `bytes`, buffering small writes.
    ///
    /// On a shared cursor the bytes land at [`position`](Self::position), which then moves
    /// past them.
    pub fn write(&mut self, mut bytes: &[u8]) -> PathwayResult<()> {
        self.ensure_writable()?;
        if self.shares_cursor() {
            self.discard_read_ahead()?;
            self.read_position += bytes.len() as u64;
        }
        let node_size = self.pool.node_size();
        self.write_position += bytes.len() as u64;
        if bytes.len() >= node_size && self.pending_write() == 0 {
            return self
                .transport
                .write(bytes)
                .map_err(|e| write_error(&*self.transport, e));
        }
        while !bytes.is_empty() {
            let pool = &self.pool;
            let node = self.write_buf.get_or_insert_with(|| pool.allocate());
            let copied = node.push_slice(bytes);
            bytes = &bytes[copied..];
            if node.is_full() {
                self.flush_write_buffer()?;
            }
        }
        Ok(())
    }

    pub fn write_byte(&mut self, byte: u8) -> PathwayResult<()> {
        self.write(&[byte])
    }

    /// Writes `text` in the stream encoding.
    pub fn print(&mut self, text: &str) -> PathwayResult<()> {
        let mut encoded = Vec::with_capacity(text.len());
        self.encoding.encode(text, &mut encoded);
        self.write(&encoded)?;
        if self.flush_on_newline && text.contains('\n') {
            self.flush()?;
        }
        Ok(())
    }

    /// Writes `text` followed by the configured newline.
    pub fn println(&mut self, text: &str) -> PathwayResult<()> {
        let newline = std::mem::take(&mut self.newline);
        let result = self
            .print(text)
            .and_then(|()| self.print(&newline));
        self.newline = newline;
        result
    }

    pub fn newline(&self) -> &str {
        &self.newline
    }

    pub fn set_newline(&mut self, newline: impl Into<String>) {
        self.newline = newline.into();
    }

    /// Flush after every text write containing a line feed.
    pub fn set_flush_on_newline(&mut self, flush: bool) {
        self.flush_on_newline = flush;
    }

    /// Pushes buffered bytes to the transport and flushes it.
    pub fn flush(&mut self) -> PathwayResult<()> {
        if self.closed {
            return Ok(());
        }
        self.flush_write_buffer()?;
        self.transport
            .flush()
            .map_err(|e| write_error(&*self.transport, e))
    }

    /// Copies everything readable from `source` into this stream.
    pub fn write_stream(&mut self, source: &mut Stream) -> PathwayResult<u64> {
        self.ensure_writable()?;
        let mut chunk = self.pool.allocate();
        let mut total = 0u64;
        loop {
            let n = source.read(chunk.as_mut_slice())?;
            if n == 0 {
                return Ok(total);
            }
            self.write(&chunk.as_mut_slice()[..n])?;
            total += n as u64;
        }
    }

    /// Repositions a write-only stream after flushing.
    pub(super) fn seek_write_side(&mut self, position: u64) -> PathwayResult<bool> {
        if !self.transport.can_seek() {
            return Err(Box::new(PathwayError::unsupported("seek", self.label.clone())));
        }
        self.flush_write_buffer()?;
        self.transport
            .seek_start(position)
            .map_err(|e| transport_error(&*self.transport, e))?;
        self.write_position = position;
        Ok(true)
    }
}

impl io::Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Stream::write(self, buf).map_err(into_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Stream::flush(self).map_err(into_io)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::CountingTransport;
    use super::super::{LoopbackTransport, StreamOptions};
    use super::*;
    use crate::buffer::BufferPool;

    fn loopback(node_size: usize) -> Stream {
        let pool = BufferPool::new(node_size, 8);
        Stream::new(
            LoopbackTransport::new(pool.clone()),
            pool,
            StreamOptions::default(),
        )
    }

    #[test]
    fn test_small_writes_are_buffered_until_flush() {
        let (transport, calls) = CountingTransport::new(b"");
        let mut stream = Stream::new(transport, BufferPool::new(64, 4), StreamOptions::default());
        stream.write(b"hello ").unwrap();
        stream.write(b"world").unwrap();
        assert_eq!(calls.writes(), 0);
        assert_eq!(stream.pending_write(), 11);
        stream.flush().unwrap();
        assert_eq!(calls.writes(), 1);
        assert_eq!(stream.write_position(), 11);
    }

    #[test]
    fn test_full_buffer_is_handed_to_transport() {
        let (transport, calls) = CountingTransport::new(b"");
        let mut stream = Stream::new(transport, BufferPool::new(8, 4), StreamOptions::default());
        stream.write(b"0123").unwrap();
        stream.write(b"456789ab").unwrap();
        assert_eq!(calls.writes(), 1);
        assert_eq!(stream.pending_write(), 4);
    }

    #[test]
    fn test_close_is_idempotent_and_closes_transport_once() {
        let (transport, calls) = CountingTransport::new(b"");
        let mut stream = Stream::new(transport, BufferPool::new(8, 4), StreamOptions::default());
        stream.write(b"abc").unwrap();
        stream.close().unwrap();
        stream.close().unwrap();
        drop(stream);
        assert_eq!(calls.writes(), 1);
        assert_eq!(calls.closes(), 1);
    }

    #[test]
    fn test_write_failure_on_connection_is_peer_disconnect() {
        let (mut transport, _) = CountingTransport::new(b"");
        transport.connection = true;
        let mut stream = Stream::new(transport, BufferPool::new(8, 4), StreamOptions::default());
        stream.write(b"request").unwrap();
        let error = stream.flush().unwrap_err();
        assert!(error.is_peer_disconnect());
    }

    #[test]
    fn test_write_after_close_fails() {
        let mut stream = loopback(16);
        stream.close().unwrap();
        assert!(stream.write(b"late").is_err());
        assert!(stream.is_closed());
    }

    #[test]
    fn test_println_uses_configured_newline_and_encoding() {
        let mut stream = loopback(64);
        stream.set_newline("\r\n");
        stream.set_encoding("utf-8").unwrap();
        stream.println("größe").unwrap();
        stream.print("€").unwrap();
        let mut bytes = Vec::new();
        stream.flush().unwrap();
        stream.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, "größe\r\n€".as_bytes());
    }

    #[test]
    fn test_write_stream_copies_source() {
        let (source, _) = CountingTransport::new(&[9u8; 3000]);
        let pool = BufferPool::new(256, 8);
        let mut source = Stream::new(source, pool, StreamOptions::default());
        let mut sink = loopback(256);
        assert_eq!(sink.write_stream(&mut source).unwrap(), 3000);
        let mut copied = Vec::new();
        sink.read_to_end(&mut copied).unwrap();
        assert_eq!(copied.len(), 3000);
        assert!(copied.iter().all(|&b| b == 9));
    }
}
