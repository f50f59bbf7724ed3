use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Refcounted table of per-key mutexes.
///
/// Work on one key is serialized; different keys run concurrently. An entry
/// lives only while someone holds or waits for it.
#[derive(Default)]
pub(super) struct KeyLocks {
    table: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub(super) fn with<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        let entry = self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_default()
            .clone();

        let result = {
            let _held = entry.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the table, one here: nobody else wants it.
        if Arc::strong_count(&entry) == 2 {
            table.remove(key);
        }
        result
    }

    #[cfg(test)]
    pub(super) fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
