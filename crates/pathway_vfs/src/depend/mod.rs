/* 📖 # Why dependencies compare instead of order

A dependency remembers what its resource looked like (length, modification time, optionally
a content digest) and later compares the live stat against that snapshot. Any difference in
modification time counts, earlier or later: files copied between machines with skewed clocks
must still invalidate. Checks never fail; a stat error counts as a modification so callers
reload rather than keep serving stale data.
*/

mod container;

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::{debug, info, instrument};

use crate::path::Path;

pub use container::{DEFAULT_CHECK_INTERVAL_MS, DependencyContainer};

/// Something that can tell whether an external resource changed.
pub trait Dependency: Send + Sync + fmt::Debug {
    fn is_modified(&self) -> bool;

    /// Like [`is_modified`](Dependency::is_modified), logging what changed.
    fn log_modified(&self) -> bool {
        self.is_modified()
    }

    /// Accepts the current state as the new baseline.
    fn rebaseline(&self);

    fn describe(&self) -> String;
}

/// Snapshot of a resource's stat surface. Replaced as a whole, never edited in place.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Baseline {
    exists: bool,
    length: u64,
    modified: Option<SystemTime>,
    digest: Option<String>,
}

/// Change detection for a single [`Path`].
pub struct PathDependency {
    path: Path,
    optional: bool,
    use_digest: bool,
    baseline: RwLock<Arc<Baseline>>,
}

impl PathDependency {
    /// Tracks length and modification time; a missing resource counts as modified.
    pub fn new(path: Path) -> Self {
        Self::create(path, false, false)
    }

    /// A dependency whose source may be absent without counting as modified.
    pub fn optional(path: Path) -> Self {
        Self::create(path, true, false)
    }

    /// Also compares a SHA-256 digest of the content.
    pub fn with_digest(path: Path) -> Self {
        Self::create(path, false, true)
    }

    fn create(path: Path, optional: bool, use_digest: bool) -> Self {
        let baseline = capture(&path, use_digest);
        debug!(path = %path, ?baseline, optional, "created dependency");
        Self {
            path,
            optional,
            use_digest,
            baseline: RwLock::new(Arc::new(baseline)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Describes the first difference from the baseline, or `None` when unchanged.
    fn change(&self) -> Option<String> {
        self.path.clear_stat_cache();
        let baseline = self.baseline.read().clone();
        let stat = match self.path.stat() {
            Ok(stat) => stat,
            Err(e) => return Some(format!("stat failed: {}", e)),
        };
        if !stat.exists() {
            if self.optional || !baseline.exists {
                return None;
            }
            return Some("source is missing".to_string());
        }
        if !baseline.exists {
            return Some("source was created".to_string());
        }
        if stat.length != baseline.length {
            return Some(format!(
                "length changed from {} to {}",
                baseline.length, stat.length
            ));
        }
        if stat.modified != baseline.modified {
            return Some(format!(
                "modification time changed from {:?} to {:?}",
                baseline.modified, stat.modified
            ));
        }
        if let Some(expected) = &baseline.digest {
            match self.path.digest() {
                Some(actual) if &actual == expected => {}
                Some(actual) => {
                    return Some(format!("digest changed from {} to {}", expected, actual));
                }
                None => return Some("digest unavailable".to_string()),
            }
        }
        None
    }
}

fn capture(path: &Path, use_digest: bool) -> Baseline {
    path.clear_stat_cache();
    let stat = path.try_stat();
    let digest = if use_digest && stat.exists() {
        path.digest()
    } else {
        None
    };
    Baseline {
        exists: stat.exists(),
        length: stat.length,
        modified: stat.modified,
        digest,
    }
}

impl Dependency for PathDependency {
    fn is_modified(&self) -> bool {
        self.change().is_some()
    }

    #[instrument(skip(self), fields(path = %self.path))]
    fn log_modified(&self) -> bool {
        match self.change() {
            Some(reason) => {
                info!(path = %self.path.user_path(), reason = %reason, "dependency modified");
                true
            }
            None => false,
        }
    }

    fn rebaseline(&self) {
        let baseline = capture(&self.path, self.use_digest);
        *self.baseline.write() = Arc::new(baseline);
    }

    fn describe(&self) -> String {
        format!("PathDependency[{}]", self.path.user_path())
    }
}

impl fmt::Debug for PathDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathDependency")
            .field("path", &self.path.url())
            .field("optional", &self.optional)
            .field("use_digest", &self.use_digest)
            .field("baseline", &**self.baseline.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::VfsRuntime;

    fn setup() -> (TempDir, VfsRuntime, Path) {
        let dir = TempDir::new().unwrap();
        let runtime = VfsRuntime::default();
        let root = runtime
            .root()
            .lookup(&dir.path().to_string_lossy())
            .unwrap();
        (dir, runtime, root)
    }

    fn set_mtime(path: &Path, time: SystemTime) {
        File::options()
            .write(true)
            .open(path.native_path())
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn test_length_change_is_detected() {
        let (_dir, _runtime, root) = setup();
        let file = root.lookup("config.toml").unwrap();
        file.write_string("a = 1").unwrap();
        let dependency = file.create_dependency();
        assert!(!dependency.is_modified());

        file.write_string("a = 12").unwrap();
        assert!(dependency.log_modified());
        dependency.rebaseline();
        assert!(!dependency.is_modified());
    }

    #[test]
    fn test_older_modification_time_counts() {
        let (_dir, _runtime, root) = setup();
        let file = root.lookup("f").unwrap();
        file.write_string("x").unwrap();
        let now = SystemTime::now();
        set_mtime(&file, now);
        let dependency = file.create_dependency();
        set_mtime(&file, now - Duration::from_secs(3600));
        assert!(dependency.is_modified());
    }

    #[test]
    fn test_missing_sources() {
        let (_dir, _runtime, root) = setup();
        let required = root.lookup("required").unwrap();
        let optional = root.lookup("optional").unwrap();
        required.write_string("r").unwrap();
        optional.write_string("o").unwrap();
        let required_dependency = required.create_dependency();
        let optional_dependency = optional.create_optional_dependency();

        required.remove().unwrap();
        optional.remove().unwrap();
        assert!(required_dependency.is_modified());
        assert!(!optional_dependency.is_modified());

        optional.write_string("back").unwrap();
        assert!(optional_dependency.is_modified());
    }

    #[test]
    fn test_digest_catches_same_length_same_time_edits() {
        let (_dir, _runtime, root) = setup();
        let file = root.lookup("data").unwrap();
        file.write_string("aaaa").unwrap();
        let time = SystemTime::now() - Duration::from_secs(60);
        set_mtime(&file, time);
        let plain = file.create_dependency();
        let digest = file.create_digest_dependency();

        file.write_string("bbbb").unwrap();
        set_mtime(&file, time);
        assert!(!plain.is_modified());
        assert!(digest.is_modified());
    }

    #[test]
    fn test_memory_paths_can_be_tracked() {
        let runtime = VfsRuntime::default();
        let file = runtime.lookup("memory:/settings").unwrap();
        file.write_string("one").unwrap();
        let dependency = file.create_dependency();
        assert!(!dependency.is_modified());
        file.write_string("three").unwrap();
        assert!(dependency.is_modified());
    }
}
