use std::fmt;
use std::io;

use pathway_base::{PathwayError, PathwayResult};

use crate::stream::{OpenMode, Stream};

use super::{Path, PathStat};

/* 📖 # Why a backend trait per scheme family?

Path resolution is identical for every scheme, what differs is the side effects. Each family
(local files, memory files, network endpoints, unknown schemes) implements only the
operations it can perform; everything else reports Unsupported instead of pretending to
succeed.
*/

/// Side effects of one scheme family.
pub(crate) trait Backend: fmt::Debug + Send + Sync {
    /// Current stat; a missing resource is `Ok` with [`PathStat::missing`].
    fn stat(&self, path: &Path) -> PathwayResult<PathStat>;

    fn open(&self, path: &Path, mode: OpenMode) -> PathwayResult<Stream>;

    fn list(&self, path: &Path) -> PathwayResult<Vec<String>> {
        Err(unsupported("list", path))
    }

    fn mkdir(&self, path: &Path, _parents: bool) -> PathwayResult<bool> {
        Err(unsupported("mkdir", path))
    }

    fn remove(&self, path: &Path, _recursive: bool) -> PathwayResult<bool> {
        Err(unsupported("remove", path))
    }

    fn rename(&self, from: &Path, _to: &Path) -> PathwayResult<()> {
        Err(unsupported("rename", from))
    }

    fn truncate(&self, path: &Path) -> PathwayResult<()> {
        Err(unsupported("truncate", path))
    }

    fn create_new(&self, path: &Path) -> PathwayResult<bool> {
        Err(unsupported("create", path))
    }
}

pub(crate) fn unsupported(operation: &str, path: &Path) -> Box<PathwayError> {
    Box::new(PathwayError::unsupported(operation, path.url()))
}

/// Paths under a scheme the resolving scheme map did not know.
#[derive(Debug)]
pub(crate) struct MissingBackend;

impl Backend for MissingBackend {
    fn stat(&self, _path: &Path) -> PathwayResult<PathStat> {
        Ok(PathStat::missing())
    }

    fn open(&self, path: &Path, _mode: OpenMode) -> PathwayResult<Stream> {
        Err(Box::new(PathwayError::io(
            path.url(),
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("unknown scheme '{}'", path.scheme()),
            ),
        )))
    }

    fn list(&self, _path: &Path) -> PathwayResult<Vec<String>> {
        Ok(Vec::new())
    }
}
