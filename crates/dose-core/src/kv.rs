/// Non-volatile key/value persistence seam.
///
/// The on-target build backs this with the SoC's NVS partition; the bench
/// build uses a file-per-key store. Namespaces are independent key
/// partitions; keys are short (NVS-style 15 character limit).

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{DoserError, Result};

/// Maximum key length the backend guarantees to accept (NVS limit).
pub const MAX_KEY_LEN: usize = 15;

pub trait KvBackend: Send + Sync {
    fn put_bytes(&self, namespace: &str, key: &str, blob: &[u8]) -> Result<()>;
    fn get_bytes(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;
    fn remove(&self, namespace: &str, key: &str) -> Result<()>;
    fn clear(&self, namespace: &str) -> Result<()>;
    fn list_keys(&self, namespace: &str) -> Result<Vec<String>>;
}

/// Reject keys the NVS backend could not store.
pub fn check_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(DoserError::persistence(format!(
            "key '{key}' exceeds {MAX_KEY_LEN} byte limit"
        )));
    }
    Ok(())
}

/// In-memory backend for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryKv {
    namespaces: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryKv {
    fn put_bytes(&self, namespace: &str, key: &str, blob: &[u8]) -> Result<()> {
        check_key(key)?;
        let mut map = self
            .namespaces
            .lock()
            .map_err(|_| DoserError::persistence("kv mutex poisoned"))?;
        map.entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), blob.to_vec());
        Ok(())
    }

    fn get_bytes(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let map = self
            .namespaces
            .lock()
            .map_err(|_| DoserError::persistence("kv mutex poisoned"))?;
        Ok(map.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        let mut map = self
            .namespaces
            .lock()
            .map_err(|_| DoserError::persistence("kv mutex poisoned"))?;
        if let Some(ns) = map.get_mut(namespace) {
            ns.remove(key);
        }
        Ok(())
    }

    fn clear(&self, namespace: &str) -> Result<()> {
        let mut map = self
            .namespaces
            .lock()
            .map_err(|_| DoserError::persistence("kv mutex poisoned"))?;
        map.remove(namespace);
        Ok(())
    }

    fn list_keys(&self, namespace: &str) -> Result<Vec<String>> {
        let map = self
            .namespaces
            .lock()
            .map_err(|_| DoserError::persistence("kv mutex poisoned"))?;
        Ok(map
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }
}
