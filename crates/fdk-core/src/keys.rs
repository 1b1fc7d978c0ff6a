// SPDX-License-Identifier: MIT OR Apache-2.0
//! Process-wide flag-key interning.
//!
//! Every textual flag key maps to a dense [`KeyId`] assigned on first
//! appearance and stable for the lifetime of the process. Parsed
//! configurations, compiled evaluators, and snapshot memo slabs are
//! all indexed by these integers instead of hashing strings on the hot
//! path.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

/// Dense process-wide identifier of a flag key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(u32);

impl KeyId {
    /// Zero-based slice index for this key.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

fn registry() -> &'static RwLock<HashMap<String, KeyId>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, KeyId>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Return the identifier for `key`, assigning a new one on first use.
pub fn intern(key: &str) -> KeyId {
    if let Some(id) = lookup(key) {
        return id;
    }
    let mut map = registry().write().expect("key registry poisoned");
    // Re-check under the write lock; another thread may have won.
    if let Some(id) = map.get(key) {
        return *id;
    }
    let id = KeyId(u32::try_from(map.len()).expect("key space exhausted"));
    map.insert(key.to_string(), id);
    id
}

/// Return the identifier for `key` if it has ever been interned.
///
/// Lookup never allocates a new identifier, so unknown keys queried
/// through a snapshot do not grow the registry.
pub fn lookup(key: &str) -> Option<KeyId> {
    registry().read().expect("key registry poisoned").get(key).copied()
}

/// Number of keys interned so far.
#[must_use]
pub fn count() -> usize {
    registry().read().expect("key registry poisoned").len()
}
