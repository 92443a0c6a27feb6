//! Session and record tables for the guardian.
//!
//! `EscrowRegistry` owns the three maps that carry an escrow through
//! its lifecycle — in-progress sessions, finalized bounty records, and
//! the active wallet handles retained for signing — plus one lazily
//! allocated async mutex per escrow id. Every state transition for an
//! id (begin, finalize, sweep eviction, signing) takes that id's lock
//! first, so two interleaved requests can never both consume the same
//! pending session.
//!
//! Invariant: an escrow id lives in at most one of {pending, records}.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use guardian_wallet::MultisigWallet;
use serde::{Deserialize, Serialize};

use crate::error::GuardianResult;
use crate::store::BountyStore;

/// An in-progress key-exchange session. Lives only in memory; the
/// wallet handle is released exactly once, on finalize or eviction.
pub struct PendingSession {
    pub wallet: Arc<dyn MultisigWallet>,
    pub round1: String,
    pub created_at: DateTime<Utc>,
}

/// A finalized escrow. Persisted; never deleted by this service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BountyRecord {
    /// Block height at which refund signing unlocks. Immutable.
    pub deadline_block: u64,
    pub multisig_address: String,
    /// Whether key exchange left the wallet immediately able to sign.
    pub is_ready: bool,
    pub created_at: DateTime<Utc>,
    /// Secret. Persisted for out-of-band recovery, never served.
    pub recovery_seed: String,
}

pub struct EscrowRegistry {
    pending: StdMutex<HashMap<String, PendingSession>>,
    records: StdMutex<HashMap<String, BountyRecord>>,
    wallets: StdMutex<HashMap<String, Arc<dyn MultisigWallet>>>,
    locks: StdMutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Serializes commits across escrow ids: the snapshot a commit
    /// captures must reach disk before the next commit snapshots, or an
    /// older document could overwrite a newer one.
    commit_gate: tokio::sync::Mutex<()>,
    store: BountyStore,
}

impl EscrowRegistry {
    /// Open the registry, loading finalized records from the store.
    /// Wallet handles for previously finalized escrows are not resident
    /// after a restart; signing for those requires seed recovery.
    pub fn open(store: BountyStore) -> GuardianResult<Self> {
        let records = store.load()?;
        Ok(Self {
            pending: StdMutex::new(HashMap::new()),
            records: StdMutex::new(records),
            wallets: StdMutex::new(HashMap::new()),
            locks: StdMutex::new(HashMap::new()),
            commit_gate: tokio::sync::Mutex::new(()),
            store,
        })
    }

    /// The per-id transition lock. Entries are allocated on first use
    /// and never reclaimed; they cost two words per id ever seen.
    pub fn id_lock(&self, escrow_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        Arc::clone(
            locks
                .entry(escrow_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn has_pending(&self, escrow_id: &str) -> bool {
        self.pending.lock().unwrap().contains_key(escrow_id)
    }

    pub fn has_record(&self, escrow_id: &str) -> bool {
        self.records.lock().unwrap().contains_key(escrow_id)
    }

    /// Shared view of a pending session (handle, round-1, created-at).
    pub fn pending_session(
        &self,
        escrow_id: &str,
    ) -> Option<(Arc<dyn MultisigWallet>, String, DateTime<Utc>)> {
        self.pending
            .lock()
            .unwrap()
            .get(escrow_id)
            .map(|s| (Arc::clone(&s.wallet), s.round1.clone(), s.created_at))
    }

    /// Insert a session, returning any session it replaced (the caller
    /// must release the superseded wallet).
    pub fn insert_pending(
        &self,
        escrow_id: &str,
        session: PendingSession,
    ) -> Option<PendingSession> {
        self.pending
            .lock()
            .unwrap()
            .insert(escrow_id.to_string(), session)
    }

    pub fn remove_pending(&self, escrow_id: &str) -> Option<PendingSession> {
        self.pending.lock().unwrap().remove(escrow_id)
    }

    /// Ids of pending sessions older than `ttl` as of `now`.
    pub fn pending_older_than(&self, now: DateTime<Utc>, ttl: ChronoDuration) -> Vec<String> {
        self.pending
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| now - s.created_at > ttl)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn get_record(&self, escrow_id: &str) -> Option<BountyRecord> {
        self.records.lock().unwrap().get(escrow_id).cloned()
    }

    /// All finalized records, newest first.
    pub fn list_records(&self) -> Vec<(String, BountyRecord)> {
        let mut entries: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect();
        entries.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at));
        entries
    }

    pub fn wallet(&self, escrow_id: &str) -> Option<Arc<dyn MultisigWallet>> {
        self.wallets.lock().unwrap().get(escrow_id).map(Arc::clone)
    }

    /// Commit a finalized escrow: record + retained wallet handle in
    /// memory, then the full document to disk. A failed write rolls the
    /// in-memory state back so the caller can retry finalize.
    pub async fn commit_finalized(
        &self,
        escrow_id: &str,
        record: BountyRecord,
        wallet: Arc<dyn MultisigWallet>,
    ) -> GuardianResult<()> {
        let _committing = self.commit_gate.lock().await;

        let snapshot = {
            let mut records = self.records.lock().unwrap();
            records.insert(escrow_id.to_string(), record);
            records.clone()
        };
        self.wallets
            .lock()
            .unwrap()
            .insert(escrow_id.to_string(), wallet);

        if let Err(e) = self.store.persist(snapshot).await {
            self.records.lock().unwrap().remove(escrow_id);
            self.wallets.lock().unwrap().remove(escrow_id);
            return Err(e);
        }
        Ok(())
    }
}
