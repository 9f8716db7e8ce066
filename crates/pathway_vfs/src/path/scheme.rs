use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::Path;

static NEXT_SCHEME_MAP_ID: AtomicU64 = AtomicU64::new(1);

/// Lower-cased scheme name to root prototype.
///
/// Clones share the table; `insert` and `remove` copy it first, so a modified clone never
/// affects the map it came from. Every distinct table carries its own id, which the lookup
/// cache uses to keep resolutions under different maps apart.
#[derive(Clone)]
pub struct SchemeMap {
    id: u64,
    entries: Arc<HashMap<String, Path>>,
}

impl SchemeMap {
    /// A map that knows no schemes at all, for untrusted contexts.
    pub fn empty() -> Self {
        Self {
            id: 0,
            entries: Arc::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn get(&self, scheme: &str) -> Option<&Path> {
        self.entries.get(&scheme.to_ascii_lowercase())
    }

    pub fn contains(&self, scheme: &str) -> bool {
        self.get(scheme).is_some()
    }

    /// Registers `prototype` as the root of `scheme`.
    ///
    /// The stored prototype carries an empty scheme map; resolved paths take their scheme
    /// map from the path they were resolved against.
    pub fn insert(&mut self, scheme: &str, prototype: Path) {
        let prototype = prototype.with_schemes(SchemeMap::empty());
        Arc::make_mut(&mut self.entries).insert(scheme.to_ascii_lowercase(), prototype);
        self.id = NEXT_SCHEME_MAP_ID.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remove(&mut self, scheme: &str) -> Option<Path> {
        let removed = Arc::make_mut(&mut self.entries).remove(&scheme.to_ascii_lowercase());
        if removed.is_some() {
            self.id = NEXT_SCHEME_MAP_ID.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Registered scheme names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SchemeMap {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for SchemeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemeMap")
            .field("id", &self.id)
            .field("schemes", &self.names())
            .finish()
    }
}
