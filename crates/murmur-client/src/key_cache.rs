//! Process-lifetime map from conversation id to its imported key.
//!
//! Both the conversation-list feed and the message stream populate the
//! cache, so every write is an idempotent merge: the first key stored for a
//! conversation wins and later inserts are no-ops.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use murmur_shared::error::CryptoError;
use murmur_shared::keys::{import_key, SymmetricKey};
use murmur_shared::types::ConversationId;

#[derive(Default)]
struct Entries {
    keys: HashMap<ConversationId, Arc<SymmetricKey>>,
    /// Exported strings that failed to import, so each is reported once.
    rejected: HashMap<ConversationId, String>,
}

#[derive(Default)]
pub struct KeyCache {
    entries: RwLock<Entries>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ConversationId) -> Option<Arc<SymmetricKey>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.keys.get(id).cloned()
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.keys.contains_key(id)
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store `key` unless one is already cached; returns the cached key.
    pub fn insert(&self, id: ConversationId, key: SymmetricKey) -> Arc<SymmetricKey> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.rejected.remove(&id);
        Arc::clone(entries.keys.entry(id).or_insert_with(|| Arc::new(key)))
    }

    /// Import an exported key for `id`.  A no-op when a key is already cached.
    pub fn import(&self, id: &ConversationId, exported: &str) -> Result<Arc<SymmetricKey>, CryptoError> {
        if let Some(key) = self.get(id) {
            return Ok(key);
        }

        match import_key(exported) {
            Ok(key) => {
                debug!(conversation = %id, "Imported conversation key");
                Ok(self.insert(id.clone(), key))
            }
            Err(e) => {
                let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
                if entries.rejected.get(id).map(String::as_str) != Some(exported) {
                    warn!(conversation = %id, error = %e, "Conversation key could not be imported");
                    entries.rejected.insert(id.clone(), exported.to_string());
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent_merge() {
        let cache = KeyCache::new();
        let id = ConversationId::from("c1");
        let first = SymmetricKey::generate();
        let second = SymmetricKey::generate();

        let stored = cache.insert(id.clone(), first.clone());
        assert_eq!(*stored, first);

        let stored_again = cache.insert(id.clone(), second);
        assert_eq!(*stored_again, first);
        assert_eq!(*cache.get(&id).unwrap(), first);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_import_skips_decoding_when_cached() {
        let cache = KeyCache::new();
        let id = ConversationId::from("c1");
        let key = SymmetricKey::generate();
        cache.insert(id.clone(), key.clone());

        let imported = cache.import(&id, "not even base64").unwrap();
        assert_eq!(*imported, key);
    }

    #[test]
    fn test_import_caches_valid_key() {
        let cache = KeyCache::new();
        let id = ConversationId::from("c1");
        let key = SymmetricKey::generate();

        assert!(cache.is_empty());
        cache.import(&id, &key.export()).unwrap();
        assert!(cache.contains(&id));
        assert_eq!(*cache.get(&id).unwrap(), key);
    }

    #[test]
    fn test_rejected_key_stays_uncached() {
        let cache = KeyCache::new();
        let id = ConversationId::from("c1");

        assert_eq!(cache.import(&id, "%%%").unwrap_err(), CryptoError::KeyFormat);
        assert_eq!(cache.import(&id, "%%%").unwrap_err(), CryptoError::KeyFormat);
        assert!(!cache.contains(&id));

        // A corrected key at the source makes the conversation readable again.
        let key = SymmetricKey::generate();
        cache.import(&id, &key.export()).unwrap();
        assert!(cache.contains(&id));
    }
}
