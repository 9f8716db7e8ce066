use std::time::SystemTime;

/// What a path currently points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Missing,
    File,
    Directory,
    /// Exists but is neither a plain file nor a directory (sockets, devices).
    Other,
}

/// Snapshot of a path's stat surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStat {
    pub file_type: FileType,
    pub length: u64,
    pub modified: Option<SystemTime>,
    pub readable: bool,
    pub writable: bool,
}

impl PathStat {
    pub fn missing() -> Self {
        Self {
            file_type: FileType::Missing,
            length: 0,
            modified: None,
            readable: false,
            writable: false,
        }
    }

    pub fn exists(&self) -> bool {
        self.file_type != FileType::Missing
    }

    pub fn is_file(&self) -> bool {
        self.file_type == FileType::File
    }

    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }
}

impl Default for PathStat {
    fn default() -> Self {
        Self::missing()
    }
}
