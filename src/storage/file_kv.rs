//! File-backed JSON KV store adapter.
//!
//! Writes go through a temp-file-then-rename so a crash mid-write can't
//! corrupt the namespace file; on any I/O failure the in-memory copy is
//! kept authoritative and the caller gets `CoreError::Storage` to log and
//! move on, per spec §4.A/§7.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CoreError, CoreResult};
use crate::storage::KvStore;

type Namespace = HashMap<String, serde_json::Value>;

#[derive(Default, Serialize, Deserialize)]
struct Document {
    namespaces: HashMap<String, Namespace>,
}

pub struct FileKv {
    path: PathBuf,
    doc: RwLock<Document>,
}

impl FileKv {
    /// Open (or create) the KV store at `path`. A missing or corrupt file
    /// starts empty rather than failing boot.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Self { path, doc: RwLock::new(doc) }
    }

    fn persist(&self, doc: &Document) -> CoreResult<()> {
        let json = serde_json::to_string_pretty(doc)
            .map_err(|e| CoreError::Storage(format!("serialize: {e}")))?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(|e| CoreError::Storage(format!("write tmp: {e}")))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| CoreError::Storage(format!("rename: {e}")))?;
        Ok(())
    }

    fn put(&self, ns: &str, key: &str, value: serde_json::Value) -> CoreResult<()> {
        let mut doc = self.doc.write();
        doc.namespaces.entry(ns.to_string()).or_default().insert(key.to_string(), value);
        let result = self.persist(&doc);
        if let Err(ref e) = result {
            warn!(ns, key, error = %e, "KV write failed, keeping RAM-only state");
        }
        result
    }

    fn get(&self, ns: &str, key: &str) -> Option<serde_json::Value> {
        self.doc.read().namespaces.get(ns)?.get(key).cloned()
    }
}

impl KvStore for FileKv {
    fn get_str(&self, ns: &str, key: &str) -> Option<String> {
        self.get(ns, key).and_then(|v| v.as_str().map(str::to_string))
    }

    fn put_str(&self, ns: &str, key: &str, value: &str) -> CoreResult<()> {
        self.put(ns, key, serde_json::Value::String(value.to_string()))
    }

    fn get_u8(&self, ns: &str, key: &str) -> Option<u8> {
        self.get(ns, key).and_then(|v| v.as_u64()).map(|v| v as u8)
    }

    fn put_u8(&self, ns: &str, key: &str, value: u8) -> CoreResult<()> {
        self.put(ns, key, serde_json::Value::from(value))
    }

    fn get_u32(&self, ns: &str, key: &str) -> Option<u32> {
        self.get(ns, key).and_then(|v| v.as_u64()).map(|v| v as u32)
    }

    fn put_u32(&self, ns: &str, key: &str, value: u32) -> CoreResult<()> {
        self.put(ns, key, serde_json::Value::from(value))
    }

    fn erase_namespace(&self, ns: &str) -> CoreResult<()> {
        let mut doc = self.doc.write();
        doc.namespaces.remove(ns);
        self.persist(&doc)
    }
}
