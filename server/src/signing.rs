//! Signing gates for finalized escrows.
//!
//! Refund signing is gated on the recorded deadline block; payout
//! signing is ungated but carries a logged dispute reason. Both require
//! the wallet handle to still be resident in this process — records
//! loaded from disk after a restart have no handle, and signing for
//! them goes through seed recovery instead.

use std::sync::Arc;

use guardian_wallet::{MultisigWallet, SignedTransfer};
use tracing::{info, warn};

use crate::error::{GuardianError, GuardianResult};
use crate::registry::EscrowRegistry;

pub struct SigningGate {
    registry: Arc<EscrowRegistry>,
}

impl SigningGate {
    pub fn new(registry: Arc<EscrowRegistry>) -> Self {
        Self { registry }
    }

    fn resident_wallet(&self, escrow_id: &str) -> GuardianResult<Arc<dyn MultisigWallet>> {
        if self.registry.get_record(escrow_id).is_none() {
            return Err(GuardianError::NotFound(format!(
                "no finalized escrow {escrow_id}"
            )));
        }
        self.registry.wallet(escrow_id).ok_or_else(|| {
            GuardianError::WalletNotResident(format!(
                "wallet for escrow {escrow_id} is not loaded in this process"
            ))
        })
    }

    /// Sign a refund transaction. Allowed only once the chain has
    /// reached the deadline recorded at finalize; a premature call
    /// reports exactly how many blocks remain.
    pub async fn sign_refund(
        &self,
        escrow_id: &str,
        current_block: u64,
        tx_hex: &str,
    ) -> GuardianResult<SignedTransfer> {
        let lock = self.registry.id_lock(escrow_id);
        let _transition = lock.lock().await;

        let record = self.registry.get_record(escrow_id).ok_or_else(|| {
            GuardianError::NotFound(format!("no finalized escrow {escrow_id}"))
        })?;

        if current_block < record.deadline_block {
            return Err(GuardianError::DeadlineNotReached {
                blocks_remaining: record.deadline_block - current_block,
            });
        }

        let wallet = self.resident_wallet(escrow_id)?;

        let summary = wallet.describe_transfer(tx_hex).await?;
        info!(
            escrow_id,
            current_block,
            deadline_block = record.deadline_block,
            recipients = summary.recipients,
            total_amount = summary.total_amount,
            fee = summary.fee,
            "signing refund transaction"
        );

        Ok(wallet.sign_transfer(tx_hex).await?)
    }

    /// Sign a dispute payout. No height gate: the mediating server has
    /// already arbitrated. The reason is recorded in the audit log only.
    pub async fn sign_payout(
        &self,
        escrow_id: &str,
        tx_hex: &str,
        reason: Option<&str>,
    ) -> GuardianResult<SignedTransfer> {
        let lock = self.registry.id_lock(escrow_id);
        let _transition = lock.lock().await;

        let wallet = self.resident_wallet(escrow_id)?;

        let summary = wallet.describe_transfer(tx_hex).await?;
        info!(
            escrow_id,
            reason = reason.unwrap_or("unspecified"),
            recipients = summary.recipients,
            total_amount = summary.total_amount,
            fee = summary.fee,
            "signing dispute payout transaction"
        );

        Ok(wallet.sign_transfer(tx_hex).await?)
    }

    /// Exchange output views with the counterparties. The export always
    /// succeeds or fails as a whole; a failed import is degraded to a
    /// warning because the counterpart blob is outside our control.
    pub async fn sync_outputs(
        &self,
        escrow_id: &str,
        counterpart_exports: &[String],
    ) -> GuardianResult<OutputsSync> {
        let lock = self.registry.id_lock(escrow_id);
        let _transition = lock.lock().await;

        let wallet = self.resident_wallet(escrow_id)?;

        let export = wallet.export_outputs().await?;

        let imported = if counterpart_exports.is_empty() {
            0
        } else {
            match wallet.import_outputs(counterpart_exports).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(escrow_id, error = %e, "output import failed, continuing");
                    0
                }
            }
        };

        Ok(OutputsSync { export, imported })
    }
}

/// Result of one outputs exchange.
#[derive(Debug, Clone)]
pub struct OutputsSync {
    /// This party's output view, for the counterparties.
    pub export: String,
    /// Outputs merged from the counterpart blobs (0 on import failure).
    pub imported: usize,
}
