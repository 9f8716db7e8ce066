use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::stream::{ReadStatus, Transport};

/* 📖 # Why one shared ring buffer behind a condition variable?

The writer and the reader are two different owners, usually on two threads. Each end blocks
on its own condition (space for the writer, data for the reader) and every state change wakes
the other side. A single thread driving both ends deadlocks once the buffer fills; that is a
usage limitation of a bounded pipe, not something the pipe tries to detect.
*/

struct PipeShared {
    capacity: usize,
    state: Mutex<PipeState>,
    readable: Condvar,
    writable: Condvar,
}

#[derive(Default)]
struct PipeState {
    buffer: VecDeque<u8>,
    reader_closed: bool,
    writer_closed: bool,
}

/// Creates a bound reader/writer pair sharing one buffer of `capacity` bytes.
pub fn pipe(capacity: usize) -> (PipeReader, PipeWriter) {
    let capacity = capacity.max(1);
    let shared = Arc::new(PipeShared {
        capacity,
        state: Mutex::new(PipeState {
            buffer: VecDeque::with_capacity(capacity),
            ..PipeState::default()
        }),
        readable: Condvar::new(),
        writable: Condvar::new(),
    });
    (
        PipeReader {
            shared: shared.clone(),
        },
        PipeWriter { shared },
    )
}

/// Reading end of a [`pipe`].
pub struct PipeReader {
    shared: Arc<PipeShared>,
}

/// Writing end of a [`pipe`].
pub struct PipeWriter {
    shared: Arc<PipeShared>,
}

impl PipeReader {
    /// Blocks until data is available or the writer closes. Returns 0 at end of stream.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        match self.read_until(buf, None) {
            ReadStatus::Data(n) => n,
            ReadStatus::Eof | ReadStatus::Timeout => 0,
        }
    }

    /// Waits at most `timeout` for data.
    pub fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> ReadStatus {
        self.read_until(buf, Some(Instant::now() + timeout))
    }

    fn read_until(&mut self, buf: &mut [u8], deadline: Option<Instant>) -> ReadStatus {
        if buf.is_empty() {
            return ReadStatus::Data(0);
        }
        let shared = &*self.shared;
        let mut state = shared.state.lock();
        loop {
            if state.reader_closed {
                return ReadStatus::Eof;
            }
            if !state.buffer.is_empty() {
                let count = buf.len().min(state.buffer.len());
                for (slot, byte) in buf.iter_mut().zip(state.buffer.drain(..count)) {
                    *slot = byte;
                }
                shared.writable.notify_all();
                return ReadStatus::Data(count);
            }
            if state.writer_closed {
                return ReadStatus::Eof;
            }
            match deadline {
                None => shared.readable.wait(&mut state),
                Some(deadline) => {
                    let timed_out = shared.readable.wait_until(&mut state, deadline).timed_out();
                    if timed_out
                        && state.buffer.is_empty()
                        && !state.writer_closed
                        && !state.reader_closed
                    {
                        return ReadStatus::Timeout;
                    }
                }
            }
        }
    }

    /// Bytes that can be read without blocking.
    pub fn available(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }

    /// Closes the reading end, discarding buffered data and waking a blocked writer.
    pub fn close(&mut self) {
        let mut state = self.shared.state.lock();
        if !state.reader_closed {
            trace!("closing pipe reader");
            state.reader_closed = true;
            state.buffer.clear();
            self.shared.writable.notify_all();
            self.shared.readable.notify_all();
        }
    }
}

impl PipeWriter {
    /// Blocks while the buffer is full. Once either end is closed the write is discarded.
    pub fn write(&mut self, mut bytes: &[u8]) {
        let shared = &*self.shared;
        let mut state = shared.state.lock();
        while !bytes.is_empty() {
            if state.writer_closed || state.reader_closed {
                return;
            }
            let space = shared.capacity - state.buffer.len();
            if space == 0 {
                shared.writable.wait(&mut state);
                continue;
            }
            let count = space.min(bytes.len());
            state.buffer.extend(&bytes[..count]);
            bytes = &bytes[count..];
            shared.readable.notify_all();
        }
    }

    /// Closes the writing end; a blocked reader wakes and sees end of stream once drained.
    pub fn close(&mut self) {
        let mut state = self.shared.state.lock();
        if !state.writer_closed {
            trace!("closing pipe writer");
            state.writer_closed = true;
            self.shared.readable.notify_all();
            self.shared.writable.notify_all();
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.close();
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeReader")
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

impl std::fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeWriter")
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

impl io::Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(PipeReader::read(self, buf))
    }
}

impl io::Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        PipeWriter::write(self, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for PipeReader {
    fn describe(&self) -> String {
        "pipe:read".to_string()
    }

    fn can_read(&self) -> bool {
        true
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(PipeReader::read(self, buf))
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<ReadStatus> {
        Ok(PipeReader::read_timeout(self, buf, timeout))
    }

    fn available(&mut self) -> io::Result<usize> {
        Ok(PipeReader::available(self))
    }

    fn close(&mut self) -> io::Result<()> {
        PipeReader::close(self);
        Ok(())
    }
}

impl Transport for PipeWriter {
    fn describe(&self) -> String {
        "pipe:write".to_string()
    }

    fn can_write(&self) -> bool {
        true
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        PipeWriter::write(self, buf);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        PipeWriter::close(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_writer_blocks_until_reader_drains() {
        let (mut reader, mut writer) = pipe(16);
        let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let producer = thread::spawn(move || {
            writer.write(&payload);
            writer.close();
        });

        let mut received = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            let n = reader.read(&mut buf);
            if n == 0 {
                break;
            }
            assert!(n <= 7);
            received.extend_from_slice(&buf[..n]);
        }
        producer.join().unwrap();
        assert_eq!(received.len(), 1000);
        assert_eq!(received, expected);
    }

    #[test]
    fn test_closing_writer_wakes_blocked_reader() {
        let (mut reader, mut writer) = pipe(8);
        let consumer = thread::spawn(move || {
            let mut buf = [0u8; 4];
            reader.read(&mut buf)
        });
        thread::sleep(Duration::from_millis(50));
        writer.close();
        assert_eq!(consumer.join().unwrap(), 0);
    }

    #[test]
    fn test_closing_reader_turns_writes_into_noops() {
        let (mut reader, mut writer) = pipe(4);
        let producer = thread::spawn(move || {
            // blocks after 4 bytes until the reader closes
            writer.write(b"0123456789");
            writer.write(b"more");
        });
        thread::sleep(Duration::from_millis(50));
        reader.close();
        producer.join().unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf), 0);
    }

    #[test]
    fn test_read_timeout_is_distinct_from_eof() {
        let (mut reader, mut writer) = pipe(8);
        let mut buf = [0u8; 4];
        assert_eq!(
            reader.read_timeout(&mut buf, Duration::from_millis(20)),
            ReadStatus::Timeout
        );
        writer.write(b"ab");
        assert_eq!(
            reader.read_timeout(&mut buf, Duration::from_millis(20)),
            ReadStatus::Data(2)
        );
        writer.close();
        assert_eq!(
            reader.read_timeout(&mut buf, Duration::from_millis(20)),
            ReadStatus::Eof
        );
    }

    #[test]
    fn test_buffered_bytes_survive_writer_close() {
        let (mut reader, mut writer) = pipe(8);
        writer.write(b"tail");
        drop(writer);
        assert_eq!(reader.available(), 4);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf), 4);
        assert_eq!(&buf[..4], b"tail");
        assert_eq!(reader.read(&mut buf), 0);
    }
}
