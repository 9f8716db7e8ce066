use std::fs;
use std::io;
use std::path::PathBuf;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::{debug, instrument};
use walkdir::WalkDir;

use pathway_base::{PathwayError, PathwayResult};

use crate::stream::{FileTransport, OpenMode, Stream};

use super::backend::Backend;
use super::{FileType, Path, PathStat};

/* 📖 # Why plain std::fs for local paths?

Every local operation is a single blocking syscall wrapped with logging and an error that
carries the native path. The host file system already provides everything else (permissions,
atomic rename, directory listing), so the backend adds no state of its own.
*/

/// Local file system backend.
#[derive(Debug)]
pub(crate) struct LocalBackend;

fn file_error(native: &std::path::Path, e: io::Error) -> Box<PathwayError> {
    debug!(error = %e, native = %native.display(), "local file operation failed");
    Box::new(PathwayError::file(native, e))
}

impl Backend for LocalBackend {
    #[instrument(skip(self), fields(path = %path))]
    fn stat(&self, path: &Path) -> PathwayResult<PathStat> {
        let native = path.native_path();
        let metadata = match fs::metadata(&native) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(PathStat::missing()),
            Err(e) => return Err(file_error(&native, e)),
        };
        let file_type = if metadata.is_file() {
            FileType::File
        } else if metadata.is_dir() {
            FileType::Directory
        } else {
            FileType::Other
        };
        let reserved = path.is_reserved();
        Ok(PathStat {
            file_type,
            length: metadata.len(),
            modified: metadata.modified().ok(),
            readable: !reserved,
            writable: !reserved && !metadata.permissions().readonly(),
        })
    }

    #[instrument(skip(self), fields(path = %path))]
    fn open(&self, path: &Path, mode: OpenMode) -> PathwayResult<Stream> {
        let native = path.native_path();
        if path.is_reserved() {
            return Err(file_error(
                &native,
                io::Error::new(io::ErrorKind::PermissionDenied, "reserved device name"),
            ));
        }
        let transport = FileTransport::open(&native, mode, path.url())?;
        let context = path.context();
        Ok(Stream::new(
            transport,
            context.pool.clone(),
            context.stream.clone(),
        ))
    }

    #[instrument(skip(self), fields(path = %path))]
    fn list(&self, path: &Path) -> PathwayResult<Vec<String>> {
        let native = path.native_path();
        let entries = fs::read_dir(&native).map_err(|e| file_error(&native, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| file_error(&native, e))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        debug!(count = names.len(), "listed directory");
        Ok(names)
    }

    #[instrument(skip(self), fields(path = %path))]
    fn mkdir(&self, path: &Path, parents: bool) -> PathwayResult<bool> {
        let native = path.native_path();
        if native.is_dir() {
            return Ok(false);
        }
        let result = if parents {
            fs::create_dir_all(&native)
        } else {
            fs::create_dir(&native)
        };
        result.map_err(|e| file_error(&native, e))?;
        debug!("directory created");
        Ok(true)
    }

    #[instrument(skip(self), fields(path = %path))]
    fn remove(&self, path: &Path, recursive: bool) -> PathwayResult<bool> {
        let native = path.native_path();
        let metadata = match fs::symlink_metadata(&native) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(file_error(&native, e)),
        };
        let result = match (metadata.is_dir(), recursive) {
            (true, true) => fs::remove_dir_all(&native),
            (true, false) => fs::remove_dir(&native),
            (false, _) => fs::remove_file(&native),
        };
        result.map_err(|e| file_error(&native, e))?;
        debug!("removed");
        Ok(true)
    }

    #[instrument(skip(self), fields(from = %from, to = %to))]
    fn rename(&self, from: &Path, to: &Path) -> PathwayResult<()> {
        let native = from.native_path();
        fs::rename(&native, to.native_path()).map_err(|e| file_error(&native, e))
    }

    #[instrument(skip(self), fields(path = %path))]
    fn truncate(&self, path: &Path) -> PathwayResult<()> {
        let native = path.native_path();
        fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&native)
            .map_err(|e| file_error(&native, e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    fn create_new(&self, path: &Path) -> PathwayResult<bool> {
        let native = path.native_path();
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&native)
        {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(file_error(&native, e)),
        }
    }
}

fn build_glob_set(globs: &[String]) -> PathwayResult<GlobSet> {
    debug!("compiling {} glob patterns", globs.len());
    let mut builder = GlobSetBuilder::new();
    for (idx, glob) in globs.iter().enumerate() {
        let compiled = GlobBuilder::new(glob).build().map_err(|e| {
            debug!(index = idx, pattern = %glob, error = %e, "failed to compile glob pattern");
            Box::new(PathwayError::message(format!(
                "Invalid glob pattern '{}': {}",
                glob, e
            )))
        })?;
        builder.add(compiled);
    }
    builder.build().map_err(|e| {
        Box::new(PathwayError::message(format!(
            "Failed to build glob set: {}",
            e
        )))
    })
}

/// Entries below `root` whose path relative to it matches one of `globs`.
#[instrument(skip(root), fields(root = %root, globs = ?globs))]
pub(crate) fn walk<'a>(
    root: &'a Path,
    globs: &[String],
) -> PathwayResult<Box<dyn Iterator<Item = PathwayResult<Path>> + 'a>> {
    let native = root.native_path();
    if !native.is_dir() {
        return Err(file_error(
            &native,
            io::Error::new(io::ErrorKind::NotFound, "directory not found"),
        ));
    }
    let glob_set = build_glob_set(globs)?;
    let base = native.clone();
    let iter = WalkDir::new(&native)
        .sort_by_file_name()
        .into_iter()
        .filter_map(move |entry| match entry {
            Ok(entry) => {
                let relative = entry.path().strip_prefix(&base).ok()?;
                if relative.as_os_str().is_empty() || !glob_set.is_match(relative) {
                    return None;
                }
                let relative = relative
                    .iter()
                    .map(|segment| segment.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                Some(Ok(root.child(&relative)))
            }
            Err(e) => {
                debug!(error = %e, "error walking directory");
                let path = e
                    .path()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| PathBuf::from("unknown"));
                Some(Err(Box::new(PathwayError::file(
                    path,
                    io::Error::other(e.to_string()),
                ))))
            }
        });
    Ok(Box::new(iter))
}
