/// File-backed key/value store: one directory per namespace, one file per
/// key. Stands in for the SoC's NVS partition on bench builds. Writes go
/// through a temp file + rename so a power cut mid-write leaves either
/// the old or the new value, never a torn one.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use dose_core::kv::{check_key, KvBackend};
use dose_core::{DoserError, Result, NS_SYSTEM};
use tracing::info;

const KEY_DEVICE_ID: &str = "device_id";

pub struct FileKv {
    root: PathBuf,
}

impl FileKv {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| DoserError::persistence(format!("create {}: {e}", root.display())))?;
        Ok(Self { root })
    }

    fn ns_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(namespace)
    }

    fn key_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.ns_dir(namespace).join(key)
    }
}

fn io_err(context: &Path, e: std::io::Error) -> DoserError {
    DoserError::persistence(format!("{}: {e}", context.display()))
}

impl KvBackend for FileKv {
    fn put_bytes(&self, namespace: &str, key: &str, blob: &[u8]) -> Result<()> {
        check_key(key)?;
        let dir = self.ns_dir(namespace);
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

        let path = self.key_path(namespace, key);
        let tmp = dir.join(format!(".{key}.tmp"));
        std::fs::write(&tmp, blob).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
        Ok(())
    }

    fn get_bytes(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.key_path(namespace, key);
        match std::fs::read(&path) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<()> {
        let path = self.key_path(namespace, key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    fn clear(&self, namespace: &str) -> Result<()> {
        let dir = self.ns_dir(namespace);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&dir, e)),
        }
    }

    fn list_keys(&self, namespace: &str) -> Result<Vec<String>> {
        let dir = self.ns_dir(namespace);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&dir, e)),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    keys.push(name.to_string());
                }
            }
        }
        Ok(keys)
    }
}

/// Stable device identity, standing in for the SoC's factory MAC.
/// Generated once on first boot and persisted so the derived AP SSID
/// never changes across reboots.
pub fn load_or_create_device_id(kv: &dyn KvBackend) -> Result<u64> {
    if let Some(blob) = kv.get_bytes(NS_SYSTEM, KEY_DEVICE_ID)? {
        if let Ok(raw) = <[u8; 8]>::try_from(blob.as_slice()) {
            return Ok(u64::from_le_bytes(raw));
        }
    }

    let mut hasher = DefaultHasher::new();
    std::process::id().hash(&mut hasher);
    if let Ok(host) = std::env::var("HOSTNAME") {
        host.hash(&mut hasher);
    }
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos()
        .hash(&mut hasher);
    let id = hasher.finish();

    kv.put_bytes(NS_SYSTEM, KEY_DEVICE_ID, &id.to_le_bytes())?;
    info!(device_id = format!("{id:012X}"), "generated device identity");
    Ok(id)
}
