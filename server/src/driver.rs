//! Protocol driver: orchestrates the three-round handshake.
//!
//! `begin` creates a fresh wallet and hands back this party's round-1
//! payload; `finalize` consumes the two counterparties' round-1 and
//! round-2 payloads, completes key exchange, and moves the session into
//! the durable bounty registry. Both run under the per-id transition
//! lock, so a racing finalize, begin, or sweep for the same escrow id
//! observes a consistent state instead of consuming the session twice.

use std::sync::Arc;

use chrono::Utc;
use guardian_wallet::{CryptoEngine, RoundTriple};
use tracing::{info, warn};

use crate::error::{GuardianError, GuardianResult};
use crate::registry::{BountyRecord, EscrowRegistry, PendingSession};

/// Everything `finalize` returns to the caller. The round-1 payload is
/// echoed for callers that lost it between requests.
#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    pub round1: String,
    pub round2: String,
    pub multisig_address: String,
    pub is_ready: bool,
}

pub struct ProtocolDriver {
    engine: Arc<dyn CryptoEngine>,
    registry: Arc<EscrowRegistry>,
}

impl ProtocolDriver {
    pub fn new(engine: Arc<dyn CryptoEngine>, registry: Arc<EscrowRegistry>) -> Self {
        Self { engine, registry }
    }

    /// Start (or restart) a key-exchange session for `escrow_id`,
    /// returning this party's round-1 payload.
    ///
    /// A repeated begin for an id that never finalized replaces the
    /// previous session and releases its wallet; a begin for an id that
    /// already finalized is a Conflict.
    pub async fn begin(&self, escrow_id: &str) -> GuardianResult<String> {
        if escrow_id.trim().is_empty() {
            return Err(GuardianError::Validation(
                "escrow_id must not be empty".to_string(),
            ));
        }

        let lock = self.registry.id_lock(escrow_id);
        let _transition = lock.lock().await;

        if self.registry.has_record(escrow_id) {
            return Err(GuardianError::Conflict(format!(
                "escrow {escrow_id} is already finalized"
            )));
        }

        let wallet = self.engine.create_wallet(escrow_id).await?;

        let round1 = match wallet.prepare_round1().await {
            Ok(payload) => payload,
            Err(e) => {
                // No session is retained after a failed round 1.
                wallet.release().await;
                return Err(e.into());
            }
        };

        let session = PendingSession {
            wallet: Arc::from(wallet),
            round1: round1.clone(),
            created_at: Utc::now(),
        };

        if let Some(replaced) = self.registry.insert_pending(escrow_id, session) {
            warn!(escrow_id, "begin replaced an existing pending session");
            replaced.wallet.release().await;
        }

        info!(escrow_id, "escrow session started, round-1 produced");
        Ok(round1)
    }

    /// Drive round 2 and key exchange from the counterparties' payloads
    /// and finalize the escrow.
    ///
    /// Engine failures leave the pending session intact so the caller
    /// can retry finalize without re-running begin.
    #[allow(clippy::too_many_arguments)]
    pub async fn finalize(
        &self,
        escrow_id: &str,
        deadline_block: u64,
        server_round1: &str,
        server_round2: &str,
        worker_round1: &str,
        worker_round2: &str,
    ) -> GuardianResult<FinalizeOutcome> {
        let lock = self.registry.id_lock(escrow_id);
        let _transition = lock.lock().await;

        let (wallet, own_round1, _created_at) = self
            .registry
            .pending_session(escrow_id)
            .ok_or_else(|| {
                GuardianError::NotFound(format!("no pending session for escrow {escrow_id}"))
            })?;

        let round1 = RoundTriple::new(&own_round1, server_round1, worker_round1);
        if round1.has_blank() {
            return Err(GuardianError::Validation(
                "round-1 payloads must not be empty".to_string(),
            ));
        }

        let own_round2 = wallet.make_round2(&round1).await?;

        let round2 = RoundTriple::new(&own_round2, server_round2, worker_round2);
        if round2.has_blank() {
            return Err(GuardianError::Validation(
                "round-2 payloads must not be empty".to_string(),
            ));
        }

        let outcome = wallet.exchange_keys(&round2).await?;
        let recovery_seed = wallet.export_seed().await?;

        let record = BountyRecord {
            deadline_block,
            multisig_address: outcome.address.clone(),
            is_ready: outcome.is_ready,
            created_at: Utc::now(),
            recovery_seed,
        };

        // Consume the session, then commit. A failed persist restores
        // the session so finalize remains retryable.
        let session = self.registry.remove_pending(escrow_id).ok_or_else(|| {
            GuardianError::NotFound(format!("no pending session for escrow {escrow_id}"))
        })?;

        if let Err(e) = self
            .registry
            .commit_finalized(escrow_id, record, Arc::clone(&session.wallet))
            .await
        {
            self.registry.insert_pending(escrow_id, session);
            return Err(e);
        }

        info!(
            escrow_id,
            address = %outcome.address,
            is_ready = outcome.is_ready,
            deadline_block,
            "escrow finalized"
        );

        Ok(FinalizeOutcome {
            round1: own_round1,
            round2: own_round2,
            multisig_address: outcome.address,
            is_ready: outcome.is_ready,
        })
    }
}
