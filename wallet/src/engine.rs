//! Capability interface to the external multisig signing engine.
//!
//! The guardian never talks to a wallet daemon directly: everything it
//! needs — create a wallet, produce round-1/round-2 protocol payloads,
//! complete key exchange, export a recovery seed, sign a transaction —
//! goes through these traits so the engine can be swapped for a
//! deterministic test double.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the signing engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The wallet RPC rejected an operation; reason passed through verbatim.
    #[error("wallet RPC error: {0}")]
    Rpc(String),

    /// The daemon could not be reached or returned a malformed response.
    #[error("wallet RPC transport error: {0}")]
    Transport(String),

    /// Invalid adapter configuration (bad URL, non-local endpoint).
    #[error("engine configuration error: {0}")]
    Config(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// The three parties' protocol payloads in their fixed role order.
///
/// The multi-party computation is order-sensitive: every party must
/// assemble the set as `[own, server, worker]`, or the parties derive
/// different shared keys and diverging addresses. Keeping the roles as
/// named fields (rather than a plain `Vec`) makes a shuffled assembly
/// unrepresentable at the call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundTriple {
    pub own: String,
    pub server: String,
    pub worker: String,
}

impl RoundTriple {
    pub fn new(
        own: impl Into<String>,
        server: impl Into<String>,
        worker: impl Into<String>,
    ) -> Self {
        Self {
            own: own.into(),
            server: server.into(),
            worker: worker.into(),
        }
    }

    /// All three payloads in protocol order.
    pub fn as_ordered(&self) -> [&str; 3] {
        [&self.own, &self.server, &self.worker]
    }

    /// The two counterparty payloads in protocol order (the wallet RPC
    /// expects the other participants' infos, own excluded).
    pub fn counterparties(&self) -> [&str; 2] {
        [&self.server, &self.worker]
    }

    /// True when any payload is empty or whitespace.
    pub fn has_blank(&self) -> bool {
        self.as_ordered().iter().any(|p| p.trim().is_empty())
    }
}

/// Outcome of completing the key exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyExchangeOutcome {
    /// Final shared multisig address.
    pub address: String,
    /// Whether the wallet can already sign without further rounds.
    pub is_ready: bool,
}

/// Human-readable description of a transaction, logged before signing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSummary {
    pub recipients: usize,
    pub total_amount: u64,
    pub fee: u64,
}

/// Result of adding this party's signature to a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTransfer {
    /// Updated transaction payload (hex), carrying the new signature.
    pub tx_hex: String,
    /// Signers known to this party, in signing order.
    pub signers: Vec<String>,
    /// Whether enough signatures are present to broadcast.
    pub is_ready: bool,
}

/// Engine liveness/version probe result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineHealth {
    pub version: String,
}

/// Factory side of the engine: wallet creation and liveness.
#[async_trait]
pub trait CryptoEngine: Send + Sync {
    /// Probe the engine; used by the startup readiness gate and /health.
    async fn health(&self) -> EngineResult<EngineHealth>;

    /// Create a fresh wallet for one escrow session. The returned handle
    /// exclusively owns the underlying wallet resource until `release`.
    async fn create_wallet(&self, label: &str) -> EngineResult<Box<dyn MultisigWallet>>;
}

/// Operations on one wallet handle.
#[async_trait]
pub trait MultisigWallet: Send + Sync {
    /// Round 1: this party's initial multisig payload.
    async fn prepare_round1(&self) -> EngineResult<String>;

    /// Round 2: consume the ordered round-1 triple, produce this party's
    /// round-2 payload.
    async fn make_round2(&self, round1: &RoundTriple) -> EngineResult<String>;

    /// Complete key exchange from the ordered round-2 triple.
    async fn exchange_keys(&self, round2: &RoundTriple) -> EngineResult<KeyExchangeOutcome>;

    /// Export the recovery seed (persisted, never served).
    async fn export_seed(&self) -> EngineResult<String>;

    /// Describe a transaction payload for the audit log.
    async fn describe_transfer(&self, tx_hex: &str) -> EngineResult<TransferSummary>;

    /// Add this party's signature to a transaction payload.
    async fn sign_transfer(&self, tx_hex: &str) -> EngineResult<SignedTransfer>;

    /// Export this wallet's spendable-output view.
    async fn export_outputs(&self) -> EngineResult<String>;

    /// Import counterpart output views; returns the number of outputs
    /// merged.
    async fn import_outputs(&self, blobs: &[String]) -> EngineResult<usize>;

    /// Release the underlying wallet resource. Best-effort; must be safe
    /// to call once on an abandoned handle.
    async fn release(&self);
}
