//! In-memory file overlay.
//!
//! The edited buffer is exposed to the language client as a file that only
//! exists in memory. The store is process-wide and keyed by URI; a URI
//! belongs to one session until that session unregisters it.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

static GLOBAL: OnceLock<OverlayFileSystem> = OnceLock::new();

/// URI-keyed in-memory files. Clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct OverlayFileSystem {
    files: Arc<RwLock<HashMap<String, String>>>,
}

impl OverlayFileSystem {
    /// Creates an empty, private store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide store.
    pub fn global() -> Self {
        GLOBAL.get_or_init(Self::new).clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        self.files.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.files.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a file. Returns false, leaving the store untouched, when
    /// `uri` is already registered.
    pub fn register_file(&self, uri: impl Into<String>, content: impl Into<String>) -> bool {
        match self.write().entry(uri.into()) {
            Entry::Occupied(entry) => {
                log::debug!("Overlay file {} is already registered", entry.key());
                false
            }
            Entry::Vacant(entry) => {
                log::debug!("Registering overlay file {}", entry.key());
                entry.insert(content.into());
                true
            }
        }
    }

    /// Reads a file's content.
    pub fn read_file(&self, uri: &str) -> Option<String> {
        self.read().get(uri).cloned()
    }

    /// Returns true if a file is registered under `uri`.
    pub fn contains(&self, uri: &str) -> bool {
        self.read().contains_key(uri)
    }

    /// Removes a file. Returns its content if it was registered.
    pub fn unregister_file(&self, uri: &str) -> Option<String> {
        log::debug!("Unregistering overlay file {}", uri);
        self.write().remove(uri)
    }

    /// Number of registered files.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_read() {
        let overlay = OverlayFileSystem::new();
        assert!(overlay.register_file("file:///tmp/a.py", "a = 1"));
        assert_eq!(overlay.read_file("file:///tmp/a.py"), Some("a = 1".to_string()));
        assert_eq!(overlay.len(), 1);
    }

    #[test]
    fn test_register_taken_uri_keeps_first() {
        let overlay = OverlayFileSystem::new();
        assert!(overlay.register_file("file:///tmp/a.py", "a = 1"));
        assert!(!overlay.register_file("file:///tmp/a.py", "a = 2"));
        assert_eq!(overlay.read_file("file:///tmp/a.py"), Some("a = 1".to_string()));

        overlay.unregister_file("file:///tmp/a.py");
        assert!(overlay.register_file("file:///tmp/a.py", "a = 2"));
    }

    #[test]
    fn test_unregister() {
        let overlay = OverlayFileSystem::new();
        overlay.register_file("file:///tmp/b.py", "");
        assert!(overlay.contains("file:///tmp/b.py"));
        assert_eq!(overlay.unregister_file("file:///tmp/b.py"), Some(String::new()));
        assert!(overlay.is_empty());
    }

    #[test]
    fn test_clones_share_store() {
        let overlay = OverlayFileSystem::new();
        let other = overlay.clone();
        other.register_file("file:///tmp/c.py", "c");
        assert!(overlay.contains("file:///tmp/c.py"));
    }

    #[test]
    fn test_global_is_shared() {
        let uri = "file:///tmp/overlay_global_test.py";
        assert!(OverlayFileSystem::global().register_file(uri, "g"));
        assert_eq!(OverlayFileSystem::global().read_file(uri), Some("g".to_string()));
        OverlayFileSystem::global().unregister_file(uri);
    }
}
