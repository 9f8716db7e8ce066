use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, instrument};

use super::Dependency;

/// Default minimum time between two real checks.
pub const DEFAULT_CHECK_INTERVAL_MS: i64 = 2000;

/// Releases the in-progress flag on every exit path.
struct CheckGuard<'a>(&'a AtomicBool);

impl Drop for CheckGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// An ordered set of dependencies with a sticky, throttled combined result.
///
/// Once a check finds a modification the container keeps reporting it until
/// [`clear_modified`](DependencyContainer::clear_modified). Between checks the last answer is
/// returned without touching the members. A caller arriving while another check is running
/// gets the cached answer instead of starting a second check; the flag guarding this only
/// avoids duplicate work, concurrent checks would be harmless.
pub struct DependencyContainer {
    members: RwLock<Vec<Arc<dyn Dependency>>>,
    modified: AtomicBool,
    checking: AtomicBool,
    /// Milliseconds; `i64::MAX` means never recheck.
    interval_ms: AtomicI64,
    last_check: Mutex<Option<Instant>>,
}

impl DependencyContainer {
    pub fn new() -> Self {
        Self::with_check_interval(DEFAULT_CHECK_INTERVAL_MS)
    }

    pub fn with_check_interval(interval_ms: i64) -> Self {
        let container = Self {
            members: RwLock::new(Vec::new()),
            modified: AtomicBool::new(false),
            checking: AtomicBool::new(false),
            interval_ms: AtomicI64::new(0),
            last_check: Mutex::new(None),
        };
        container.set_check_interval(interval_ms);
        container
    }

    pub fn add(&self, dependency: Arc<dyn Dependency>) {
        self.members.write().push(dependency);
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// 0 checks on every call, a negative interval never rechecks after the first check.
    pub fn set_check_interval(&self, interval_ms: i64) {
        let interval_ms = if interval_ms < 0 { i64::MAX } else { interval_ms };
        self.interval_ms.store(interval_ms, Ordering::Relaxed);
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Relaxed).unsigned_abs())
    }

    pub fn set_modified(&self, modified: bool) {
        self.modified.store(modified, Ordering::Release);
    }

    /// Acknowledges a modification: members take their current state as baseline and the
    /// next call checks again immediately.
    pub fn clear_modified(&self) {
        let members = self.members.read().clone();
        for member in &members {
            member.rebaseline();
        }
        self.modified.store(false, Ordering::Release);
        *self.last_check.lock() = None;
        debug!(members = members.len(), "cleared modified state");
    }

    /// Claims the next check if the throttle interval elapsed.
    fn due(&self) -> bool {
        let interval_ms = self.interval_ms.load(Ordering::Relaxed);
        let mut last_check = self.last_check.lock();
        let now = Instant::now();
        let due = match *last_check {
            None => true,
            Some(_) if interval_ms == 0 => true,
            Some(_) if interval_ms == i64::MAX => false,
            Some(last) => now.duration_since(last) >= self.check_interval(),
        };
        if due {
            *last_check = Some(now);
        }
        due
    }

    #[instrument(skip(self), fields(members = self.len()))]
    fn check(&self, log: bool) -> bool {
        if self.modified.load(Ordering::Acquire) {
            return true;
        }
        if !self.due() {
            return self.modified.load(Ordering::Acquire);
        }
        if self
            .checking
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("check already in progress, returning cached result");
            return self.modified.load(Ordering::Acquire);
        }
        let _guard = CheckGuard(&self.checking);
        let members = self.members.read().clone();
        let modified = members.iter().rev().any(|member| {
            if log {
                member.log_modified()
            } else {
                member.is_modified()
            }
        });
        if modified {
            self.modified.store(true, Ordering::Release);
        }
        modified
    }
}

impl Default for DependencyContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl Dependency for DependencyContainer {
    fn is_modified(&self) -> bool {
        self.check(false)
    }

    fn log_modified(&self) -> bool {
        self.check(true)
    }

    fn rebaseline(&self) {
        self.clear_modified();
    }

    fn describe(&self) -> String {
        let members: Vec<String> = self
            .members
            .read()
            .iter()
            .map(|member| member.describe())
            .collect();
        format!("DependencyContainer[{}]", members.join(", "))
    }
}

impl fmt::Debug for DependencyContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyContainer")
            .field("members", &self.len())
            .field("modified", &self.modified.load(Ordering::Relaxed))
            .field("check_interval", &self.check_interval())
            .finish()
    }
}
