use std::io;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::buffer::{BufferChain, BufferPool};

use super::Transport;

/// Duplex in-process transport: whatever is written becomes readable.
///
/// Reads at the end of the written data report end of stream, so a reader must flush
/// its writes before reading them back.
#[derive(Debug)]
pub struct LoopbackTransport {
    chain: BufferChain,
}

impl LoopbackTransport {
    pub fn new(pool: BufferPool) -> Self {
        Self {
            chain: BufferChain::new(pool),
        }
    }
}

impl Transport for LoopbackTransport {
    fn describe(&self) -> String {
        "loopback:".to_string()
    }

    fn can_read(&self) -> bool {
        true
    }

    fn can_write(&self) -> bool {
        true
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.chain.read(buf))
    }

    fn available(&mut self) -> io::Result<usize> {
        Ok(self.chain.remaining())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.chain.append(buf);
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.chain.clear();
        Ok(())
    }
}

/// Contents of a file in a memory file system.
#[derive(Debug)]
pub struct MemoryFile {
    pub(crate) data: BufferChain,
    pub(crate) modified: SystemTime,
}

impl MemoryFile {
    pub fn new(pool: BufferPool) -> Self {
        Self {
            data: BufferChain::new(pool),
            modified: SystemTime::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    pub(crate) fn touch(&mut self) {
        self.modified = SystemTime::now();
    }
}

/// Positional transport over a shared [`MemoryFile`].
///
/// Every open stream keeps its own position; writes are visible to other streams on the
/// same file immediately.
#[derive(Debug)]
pub struct MemoryFileTransport {
    file: Arc<Mutex<MemoryFile>>,
    label: String,
    position: usize,
    readable: bool,
    writable: bool,
    append: bool,
}

impl MemoryFileTransport {
    pub fn reader(file: Arc<Mutex<MemoryFile>>, label: String) -> Self {
        Self {
            file,
            label,
            position: 0,
            readable: true,
            writable: false,
            append: false,
        }
    }

    /// A write stream that replaces the current contents.
    pub fn writer(file: Arc<Mutex<MemoryFile>>, label: String) -> Self {
        {
            let mut contents = file.lock();
            contents.data.clear();
            contents.touch();
        }
        Self {
            file,
            label,
            position: 0,
            readable: false,
            writable: true,
            append: false,
        }
    }

    /// A write stream positioned after the current contents.
    pub fn appender(file: Arc<Mutex<MemoryFile>>, label: String) -> Self {
        Self {
            file,
            label,
            position: 0,
            readable: false,
            writable: true,
            append: true,
        }
    }

    /// Reads and writes at a shared position without truncating.
    pub fn read_writer(file: Arc<Mutex<MemoryFile>>, label: String) -> Self {
        Self {
            file,
            label,
            position: 0,
            readable: true,
            writable: true,
            append: false,
        }
    }
}

impl Transport for MemoryFileTransport {
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn can_read(&self) -> bool {
        self.readable
    }

    fn can_write(&self) -> bool {
        self.writable
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.lock().data.read_at(self.position, buf);
        self.position += n;
        Ok(n)
    }

    fn available(&mut self) -> io::Result<usize> {
        Ok(self.file.lock().len().saturating_sub(self.position))
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut file = self.file.lock();
        if self.append {
            self.position = file.len();
        }
        file.data.write_at(self.position, buf);
        file.touch();
        self.position += buf.len();
        Ok(())
    }

    fn can_seek(&self) -> bool {
        !self.append
    }

    fn seek_start(&mut self, position: u64) -> io::Result<()> {
        self.position = usize::try_from(position)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        Ok(())
    }

    fn skip(&mut self, count: u64) -> io::Result<Option<u64>> {
        let available = self.file.lock().len().saturating_sub(self.position) as u64;
        let skipped = available.min(count);
        self.position += skipped as usize;
        Ok(Some(skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{Stream, StreamOptions};

    #[test]
    fn test_loopback_reads_back_flushed_writes() {
        let pool = BufferPool::new(4, 8);
        let mut transport = LoopbackTransport::new(pool);
        transport.write(b"ping pong").unwrap();
        assert_eq!(transport.available().unwrap(), 9);
        let mut buf = [0u8; 16];
        assert_eq!(transport.read(&mut buf).unwrap(), 9);
        assert_eq!(&buf[..9], b"ping pong");
        assert_eq!(transport.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_memory_file_streams_share_contents() {
        let pool = BufferPool::new(8, 8);
        let file = Arc::new(Mutex::new(MemoryFile::new(pool.clone())));
        let mut out = Stream::new(
            MemoryFileTransport::writer(file.clone(), "memory:/a".to_string()),
            pool.clone(),
            StreamOptions::default(),
        );
        out.print("hello memory").unwrap();
        out.close().unwrap();

        let mut append = Stream::new(
            MemoryFileTransport::appender(file.clone(), "memory:/a".to_string()),
            pool.clone(),
            StreamOptions::default(),
        );
        append.print("!").unwrap();
        append.close().unwrap();

        let mut input = Stream::new(
            MemoryFileTransport::reader(file.clone(), "memory:/a".to_string()),
            pool,
            StreamOptions::default(),
        );
        assert_eq!(input.read_to_string().unwrap(), "hello memory!");
        assert!(input.set_position(6).unwrap());
        assert_eq!(input.read_line().unwrap().as_deref(), Some("memory!"));
        assert_eq!(file.lock().len(), 13);
    }

    #[test]
    fn test_read_write_overwrites_in_place() {
        let pool = BufferPool::new(4, 8);
        let file = Arc::new(Mutex::new(MemoryFile::new(pool.clone())));
        file.lock().data.append(b"0123456789");
        let mut transport = MemoryFileTransport::read_writer(file.clone(), "m".to_string());
        transport.seek_start(4).unwrap();
        transport.write(b"ab").unwrap();
        let mut buf = [0u8; 2];
        assert_eq!(transport.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"67");
        assert_eq!(file.lock().contents(), b"0123ab6789");
    }
}
