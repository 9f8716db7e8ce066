use std::io;
use std::time::Duration;

use pathway_base::{PathwayError, PathwayResult};
use tracing::warn;

use super::transport::{into_io, transport_error};
use super::{DecodeStep, ReadStatus, Stream};

/* 📖 # How the read side fills

The read buffer is one pool node, refilled only once it is fully consumed. Every refill first
pushes the write side to the transport. Bulk reads of at least `zero_copy_threshold` bytes that
find the buffer empty skip it and read the transport straight into the caller's slice.
*/

impl Stream {
    fn ensure_readable(&self) -> PathwayResult<()> {
        self.ensure_open()?;
        if !self.readable {
            return Err(Box::new(PathwayError::unsupported(
                "read",
                self.label.clone(),
            )));
        }
        Ok(())
    }

    /// Bytes sitting in the read buffer.
    pub fn buffered(&self) -> usize {
        self.read_buf
            .as_ref()
            .map_or(0, |node| node.len() - self.read_offset)
    }

    /// Applies the failure policy to a read-side transport error.
    fn read_failure<T>(&self, error: io::Error, eof: T) -> PathwayResult<T> {
        if self.options.strict_reads {
            return Err(transport_error(&*self.transport, error));
        }
        warn!(target_name = %self.label, error = %error, "read failed, treating as end of stream");
        Ok(eof)
    }

    /// Pushes the write side out before the read side waits on the transport.
    fn flush_sibling(&mut self) -> PathwayResult<()> {
        if self.writable {
            self.flush()?;
        }
        Ok(())
    }

    /// Refills an exhausted read buffer. Returns the bytes now buffered, 0 at end of stream.
    fn refill(&mut self) -> PathwayResult<usize> {
        self.flush_sibling()?;
        let pool = &self.pool;
        let node = self.read_buf.get_or_insert_with(|| pool.allocate());
        node.clear();
        self.read_offset = 0;
        match self.transport.read(node.as_mut_slice()) {
            Ok(n) => {
                node.set_len(n);
                Ok(n)
            }
            Err(e) => self.read_failure(e, 0),
        }
    }

    /// Ensures the read buffer holds data. Returns the buffered byte count, 0 at end of stream.
    pub fn fill_buffer(&mut self) -> PathwayResult<usize> {
        self.ensure_readable()?;
        match self.buffered() {
            0 => self.refill(),
            n => Ok(n),
        }
    }

    /// Like [`fill_buffer`](Self::fill_buffer) but waits at most `timeout` for the transport.
    pub fn fill_with_timeout(&mut self, timeout: Duration) -> PathwayResult<ReadStatus> {
        self.fill_status(Some(timeout))
    }

    /// Fills only from data the transport can deliver without waiting.
    pub fn read_non_block(&mut self) -> PathwayResult<ReadStatus> {
        self.fill_status(None)
    }

    /// True while the stream is live: data arrived or the wait timed out. False at end of stream.
    pub fn fill_if_live(&mut self, timeout: Duration) -> PathwayResult<bool> {
        Ok(!matches!(self.fill_with_timeout(timeout)?, ReadStatus::Eof))
    }

    fn fill_status(&mut self, timeout: Option<Duration>) -> PathwayResult<ReadStatus> {
        self.ensure_readable()?;
        let buffered = self.buffered();
        if buffered > 0 {
            return Ok(ReadStatus::Data(buffered));
        }
        self.flush_sibling()?;
        let pool = &self.pool;
        let node = self.read_buf.get_or_insert_with(|| pool.allocate());
        node.clear();
        self.read_offset = 0;
        let result = match timeout {
            Some(timeout) => self.transport.read_timeout(node.as_mut_slice(), timeout),
            None => self.transport.read_nonblock(node.as_mut_slice()),
        };
        match result {
            Ok(ReadStatus::Data(n)) => {
                node.set_len(n);
                Ok(ReadStatus::Data(n))
            }
            Ok(status) => Ok(status),
            Err(e) => self.read_failure(e, ReadStatus::Eof),
        }
    }

    /// Bytes readable without blocking: the buffer plus what the transport reports.
    pub fn available(&mut self) -> PathwayResult<usize> {
        self.ensure_readable()?;
        let buffered = self.buffered();
        let pending = self
            .transport
            .available()
            .map_err(|e| transport_error(&*self.transport, e))?;
        Ok(buffered + pending)
    }

    /// Reads one byte, `None` at end of stream.
    pub fn read_byte(&mut self) -> PathwayResult<Option<u8>> {
        if self.fill_buffer()? == 0 {
            return Ok(None);
        }
        let byte = self
            .read_buf
            .as_ref()
            .map(|node| node.filled()[self.read_offset]);
        self.advance(1);
        Ok(byte)
    }

    /// Returns the next byte without consuming it.
    pub fn peek(&mut self) -> PathwayResult<Option<u8>> {
        if self.fill_buffer()? == 0 {
            return Ok(None);
        }
        Ok(self
            .read_buf
            .as_ref()
            .map(|node| node.filled()[self.read_offset]))
    }

    /// Consumes `count` buffered bytes.
    fn advance(&mut self, count: usize) {
        self.read_offset += count;
        self.read_position += count as u64;
    }

    /// Steps back over the last byte read from the current buffer.
    pub fn unread(&mut self) {
        if self.read_offset > 0 {
            self.read_offset -= 1;
            self.read_position -= 1;
        }
    }

    /// Reads up to `buf.len()` bytes. Returns 0 only at end of stream.
    pub fn read(&mut self, buf: &mut [u8]) -> PathwayResult<usize> {
        self.ensure_readable()?;
        if buf.is_empty() {
            return Ok(0);
        }
        if self.buffered() == 0 {
            if buf.len() >= self.options.zero_copy_threshold {
                self.flush_sibling()?;
                let n = match self.transport.read(buf) {
                    Ok(n) => n,
                    Err(e) => self.read_failure(e, 0)?,
                };
                self.read_position += n as u64;
                return Ok(n);
            }
            if self.refill()? == 0 {
                return Ok(0);
            }
        }
        Ok(self.copy_buffered(buf))
    }

    fn copy_buffered(&mut self, buf: &mut [u8]) -> usize {
        let Some(node) = self.read_buf.as_ref() else {
            return 0;
        };
        let available = &node.filled()[self.read_offset..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.advance(count);
        count
    }

    /// Reads until `buf` is full or the stream ends, returning the bytes read.
    pub fn read_fully(&mut self, buf: &mut [u8]) -> PathwayResult<usize> {
        let mut total = 0;
        while total < buf.len() {
            let n = self.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    pub fn read_to_end(&mut self, out: &mut Vec<u8>) -> PathwayResult<usize> {
        let mut chunk = self.pool.allocate();
        let mut total = 0;
        loop {
            let n = self.read(chunk.as_mut_slice())?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&chunk.as_mut_slice()[..n]);
            total += n;
        }
    }

    /// Reads the rest of the stream as text in the stream encoding.
    pub fn read_to_string(&mut self) -> PathwayResult<String> {
        let mut text = String::new();
        while let Some(c) = self.read_char()? {
            text.push(c);
        }
        Ok(text)
    }

    /// Skips up to `count` bytes, returning how many were skipped.
    pub fn skip(&mut self, count: u64) -> PathwayResult<u64> {
        self.ensure_readable()?;
        let buffered = self.buffered() as u64;
        let from_buffer = buffered.min(count);
        self.advance(from_buffer as usize);
        let mut remaining = count - from_buffer;
        if remaining == 0 {
            return Ok(count);
        }
        match self.transport.skip(remaining) {
            Ok(Some(skipped)) => {
                self.read_position += skipped;
                return Ok(from_buffer + skipped);
            }
            Ok(None) => {}
            Err(e) => return self.read_failure(e, from_buffer),
        }
        while remaining > 0 {
            if self.refill()? == 0 {
                break;
            }
            let step = (self.buffered() as u64).min(remaining);
            self.advance(step as usize);
            remaining -= step;
        }
        Ok(count - remaining)
    }

    /// Moves the read position.
    ///
    /// Backward moves discard the buffer and seek the transport, failing with Unsupported on
    /// transports without random access. Forward moves skip. Returns false when the stream
    /// ended before reaching `position`.
    pub fn set_position(&mut self, position: u64) -> PathwayResult<bool> {
        self.ensure_open()?;
        if !self.readable {
            return self.seek_write_side(position);
        }
        if position >= self.read_position {
            let wanted = position - self.read_position;
            return Ok(self.skip(wanted)? == wanted);
        }
        if !self.transport.can_seek() {
            return Err(Box::new(PathwayError::unsupported("seek", self.label.clone())));
        }
        self.flush_sibling()?;
        if let Some(node) = self.read_buf.as_mut() {
            node.clear();
        }
        self.read_offset = 0;
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.reset();
        }
        self.transport
            .seek_start(position)
            .map_err(|e| transport_error(&*self.transport, e))?;
        self.read_position = position;
        Ok(true)
    }

    pub fn read_i16(&mut self) -> PathwayResult<i16> {
        let mut bytes = [0u8; 2];
        self.read_exact_bytes(&mut bytes)?;
        Ok(i16::from_be_bytes(bytes))
    }

    pub fn read_i32(&mut self) -> PathwayResult<i32> {
        let mut bytes = [0u8; 4];
        self.read_exact_bytes(&mut bytes)?;
        Ok(i32::from_be_bytes(bytes))
    }

    pub fn read_i64(&mut self) -> PathwayResult<i64> {
        let mut bytes = [0u8; 8];
        self.read_exact_bytes(&mut bytes)?;
        Ok(i64::from_be_bytes(bytes))
    }

    fn read_exact_bytes(&mut self, bytes: &mut [u8]) -> PathwayResult<()> {
        if self.read_fully(bytes)? < bytes.len() {
            return Err(Box::new(PathwayError::io(
                self.label.clone(),
                io::Error::new(io::ErrorKind::UnexpectedEof, "unexpected end of stream"),
            )));
        }
        Ok(())
    }

    /// Reads one character in the stream encoding.
    ///
    /// Only the bytes of the returned character are consumed, so byte reads may follow.
    pub fn read_char(&mut self) -> PathwayResult<Option<char>> {
        if self.decoder.is_none() {
            return Ok(self.read_byte()?.map(char::from));
        }
        loop {
            let Some(byte) = self.peek()? else {
                return Ok(self.decoder.as_mut().and_then(|decoder| decoder.finish()));
            };
            let step = match self.decoder.as_mut() {
                Some(decoder) => decoder.push(byte),
                None => DecodeStep::Char(char::from(byte)),
            };
            match step {
                DecodeStep::Pending => self.advance(1),
                DecodeStep::Char(c) => {
                    self.advance(1);
                    return Ok(Some(c));
                }
                DecodeStep::Malformed(c) => return Ok(Some(c)),
            }
        }
    }

    /// Reads a line without its terminator. `\n`, `\r\n` and a lone `\r` all end a line.
    ///
    /// Returns `None` at end of stream.
    pub fn read_line(&mut self) -> PathwayResult<Option<String>> {
        let mut line = String::new();
        Ok(self.read_line_into(&mut line, true)?.then_some(line))
    }

    /// Reads a line keeping a normalized `\n` terminator.
    pub fn read_line_no_chop(&mut self) -> PathwayResult<Option<String>> {
        let mut line = String::new();
        Ok(self.read_line_into(&mut line, false)?.then_some(line))
    }

    /// Appends the next line to `line`. Returns false when nothing was left to read.
    pub fn read_line_into(&mut self, line: &mut String, chop: bool) -> PathwayResult<bool> {
        let mut read_any = false;
        while let Some(c) = self.read_char()? {
            read_any = true;
            match c {
                '\n' => {
                    if !chop {
                        line.push('\n');
                    }
                    return Ok(true);
                }
                '\r' => {
                    // '\n' is the same single byte in every supported encoding
                    if self.peek()? == Some(b'\n') {
                        self.advance(1);
                    }
                    if !chop {
                        line.push('\n');
                    }
                    return Ok(true);
                }
                c => line.push(c),
            }
        }
        Ok(read_any)
    }

    /// Copies the rest of the stream into `out`, returning the bytes copied.
    pub fn copy_to(&mut self, out: &mut impl io::Write) -> PathwayResult<u64> {
        let mut chunk = self.pool.allocate();
        let mut total = 0u64;
        loop {
            let n = self.read(chunk.as_mut_slice())?;
            if n == 0 {
                return Ok(total);
            }
            out.write_all(&chunk.as_mut_slice()[..n]).map_err(|e| {
                Box::new(PathwayError::io("copy destination", e))
            })?;
            total += n as u64;
        }
    }
}

impl io::Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Stream::read(self, buf).map_err(into_io)
    }
}

impl io::BufRead for Stream {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.fill_buffer().map_err(into_io)?;
        Ok(match self.read_buf.as_ref() {
            Some(node) => &node.filled()[self.read_offset..],
            None => &[],
        })
    }

    fn consume(&mut self, amount: usize) {
        let amount = amount.min(self.buffered());
        self.advance(amount);
    }
}

impl io::Seek for Stream {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let target = match pos {
            io::SeekFrom::Start(offset) => Some(offset),
            io::SeekFrom::Current(delta) => self.position().checked_add_signed(delta),
            io::SeekFrom::End(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "seeking relative to the end is not supported",
                ));
            }
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position")
        })?;
        self.set_position(target).map_err(into_io)?;
        Ok(self.position())
    }
}
