//! Durable escrow registry document.
//!
//! One JSON document maps escrow id → finalized bounty record and is
//! rewritten in full on every mutation (write to a temp file, then
//! rename), so a crash between mutations can only lose the most recent
//! record, never corrupt the document. Writes run on the blocking pool
//! and are serialized on a store-level mutex: the temp path is shared,
//! and an unserialized older snapshot could land after a newer one.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::error::{GuardianError, GuardianResult};
use crate::registry::BountyRecord;

#[derive(Debug, Clone)]
pub struct BountyStore {
    path: PathBuf,
    write_gate: Arc<Mutex<()>>,
}

impl BountyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document; an absent file is an empty registry.
    pub fn load(&self) -> GuardianResult<HashMap<String, BountyRecord>> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "no registry document yet, starting empty");
            return Ok(HashMap::new());
        }

        let raw = fs::read(&self.path)
            .map_err(|e| GuardianError::Storage(format!("read {}: {e}", self.path.display())))?;
        let records: HashMap<String, BountyRecord> = serde_json::from_slice(&raw)
            .map_err(|e| GuardianError::Storage(format!("parse {}: {e}", self.path.display())))?;

        info!(
            path = %self.path.display(),
            records = records.len(),
            "loaded escrow registry document"
        );
        Ok(records)
    }

    /// Rewrite the whole document atomically. One write at a time.
    pub async fn persist(&self, snapshot: HashMap<String, BountyRecord>) -> GuardianResult<()> {
        let _writing = self.write_gate.lock().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_document(&path, &snapshot))
            .await
            .map_err(|e| GuardianError::Storage(format!("persist task panicked: {e}")))?
    }
}

fn write_document(
    path: &Path,
    snapshot: &HashMap<String, BountyRecord>,
) -> GuardianResult<()> {
    let body = serde_json::to_vec_pretty(snapshot)
        .map_err(|e| GuardianError::Storage(format!("encode registry: {e}")))?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &body)
        .map_err(|e| GuardianError::Storage(format!("write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| GuardianError::Storage(format!("rename {}: {e}", path.display())))?;
    Ok(())
}
