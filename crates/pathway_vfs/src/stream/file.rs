use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path as NativePath, PathBuf};

use tracing::{debug, instrument};

use pathway_base::{PathwayError, PathwayResult};

use super::Transport;

/// How a path is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Create or truncate.
    Write,
    /// Create or append at the end.
    Append,
    /// Open an existing file for both directions.
    ReadWrite,
}

/// Transport over a local file.
#[derive(Debug)]
pub struct FileTransport {
    file: File,
    path: PathBuf,
    label: String,
    mode: OpenMode,
}

impl FileTransport {
    #[instrument(skip(label), fields(path = %path.display()))]
    pub fn open(path: &NativePath, mode: OpenMode, label: String) -> PathwayResult<Self> {
        let mut options = OpenOptions::new();
        match mode {
            OpenMode::Read => options.read(true),
            OpenMode::Write => options.write(true).create(true).truncate(true),
            OpenMode::Append => options.append(true).create(true),
            OpenMode::ReadWrite => options.read(true).write(true),
        };
        let file = options.open(path).map_err(|e| {
            debug!(error = %e, "failed to open file");
            Box::new(PathwayError::file(path, e))
        })?;
        if mode == OpenMode::Read && file.metadata().is_ok_and(|m| m.is_dir()) {
            return Err(Box::new(PathwayError::file(
                path,
                io::Error::new(io::ErrorKind::IsADirectory, "cannot open a directory as a stream"),
            )));
        }
        debug!(?mode, "file opened");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            label,
            mode,
        })
    }

    fn position(&mut self) -> io::Result<u64> {
        self.file.stream_position()
    }
}

impl Transport for FileTransport {
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn can_read(&self) -> bool {
        matches!(self.mode, OpenMode::Read | OpenMode::ReadWrite)
    }

    fn can_write(&self) -> bool {
        !matches!(self.mode, OpenMode::Read)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn available(&mut self) -> io::Result<usize> {
        let len = self.file.metadata()?.len();
        let position = self.position()?;
        Ok(usize::try_from(len.saturating_sub(position)).unwrap_or(usize::MAX))
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }

    fn can_seek(&self) -> bool {
        self.mode != OpenMode::Append
    }

    fn seek_start(&mut self, position: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(position)).map(|_| ())
    }

    fn skip(&mut self, count: u64) -> io::Result<Option<u64>> {
        let len = self.file.metadata()?.len();
        let position = self.position()?;
        let target = position.saturating_add(count).min(len.max(position));
        self.file.seek(SeekFrom::Start(target))?;
        Ok(Some(target - position))
    }

    fn file_path(&self) -> Option<&NativePath> {
        Some(&self.path)
    }

    fn close(&mut self) -> io::Result<()> {
        if self.can_write() {
            self.file.flush()?;
        }
        Ok(())
    }
}
