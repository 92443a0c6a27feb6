//! JSON-RPC adapter for a Monero-style wallet daemon.
//!
//! The daemon holds at most one wallet file open at a time, so all
//! handle operations serialize on a shared mutex that tracks which
//! wallet is currently open and re-opens the right one before each
//! call.
//!
//! **SECURITY:** the RPC endpoint must be localhost-only. The daemon
//! holds live key material; exposing it publicly would hand out
//! signing capability.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::engine::{
    CryptoEngine, EngineError, EngineHealth, EngineResult, KeyExchangeOutcome, MultisigWallet,
    RoundTriple, SignedTransfer, TransferSummary,
};

/// 2-of-3 threshold: any two parties can sign.
const MULTISIG_THRESHOLD: u32 = 2;

/// Configuration for the wallet RPC adapter.
#[derive(Debug, Clone)]
pub struct WalletRpcConfig {
    /// Full JSON-RPC endpoint, e.g. `http://127.0.0.1:18083/json_rpc`.
    pub rpc_url: String,
    /// Password applied to every wallet file the adapter creates.
    pub wallet_password: String,
}

/// Wallet RPC engine. Cheap to clone; all clones share one daemon
/// connection and one open-wallet slot.
#[derive(Clone)]
pub struct WalletRpc {
    shared: Arc<RpcShared>,
}

struct RpcShared {
    rpc_url: String,
    wallet_password: String,
    client: reqwest::Client,
    /// Wallet file currently open in the daemon, if any.
    open_wallet: Mutex<Option<String>>,
    /// Per-process sequence for wallet filenames. The daemon rejects
    /// `create_wallet` for a filename that already exists, so a
    /// replacement session for the same escrow id must not reuse the
    /// superseded wallet's file.
    wallet_seq: AtomicU64,
}

#[derive(Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl WalletRpc {
    pub fn new(config: WalletRpcConfig) -> EngineResult<Self> {
        // Localhost only. The RPC port grants signing capability.
        if !config.rpc_url.contains("127.0.0.1") && !config.rpc_url.contains("localhost") {
            return Err(EngineError::Config(format!(
                "wallet RPC must be localhost only, got: {}",
                config.rpc_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            shared: Arc::new(RpcShared {
                rpc_url: config.rpc_url,
                wallet_password: config.wallet_password,
                client,
                open_wallet: Mutex::new(None),
                wallet_seq: AtomicU64::new(0),
            }),
        })
    }
}

impl RpcShared {
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> EngineResult<T> {
        debug!(method, "wallet RPC call");

        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "0",
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Transport(format!("{method}: {e}")))?;

        let envelope: RpcEnvelope<T> = response
            .json()
            .await
            .map_err(|e| EngineError::Transport(format!("{method}: malformed response: {e}")))?;

        if let Some(err) = envelope.error {
            return Err(EngineError::Rpc(format!(
                "{method} failed ({}): {}",
                err.code, err.message
            )));
        }

        envelope
            .result
            .ok_or_else(|| EngineError::Transport(format!("{method}: empty result")))
    }

    /// A filename no prior wallet file can collide with: startup epoch
    /// plus a per-process counter, so replacement sessions and restarts
    /// both get fresh files.
    fn wallet_filename(&self, label: &str) -> String {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let seq = self.wallet_seq.fetch_add(1, Ordering::Relaxed);
        format!("escrow-{label}-{epoch}-{seq}")
    }

    /// Make sure `filename` is the open wallet, holding the slot for the
    /// duration of the returned guard.
    async fn open_guard(&self, filename: &str) -> EngineResult<MutexGuard<'_, Option<String>>> {
        let mut slot = self.open_wallet.lock().await;
        if slot.as_deref() != Some(filename) {
            self.call::<serde_json::Value>(
                "open_wallet",
                serde_json::json!({
                    "filename": filename,
                    "password": self.wallet_password,
                }),
            )
            .await?;
            *slot = Some(filename.to_string());
        }
        Ok(slot)
    }
}

#[async_trait]
impl CryptoEngine for WalletRpc {
    async fn health(&self) -> EngineResult<EngineHealth> {
        #[derive(Deserialize)]
        struct VersionResult {
            version: u32,
        }

        let v: VersionResult = self
            .shared
            .call("get_version", serde_json::json!({}))
            .await?;

        Ok(EngineHealth {
            version: format!("{}.{}", v.version >> 16, v.version & 0xffff),
        })
    }

    async fn create_wallet(&self, label: &str) -> EngineResult<Box<dyn MultisigWallet>> {
        let filename = self.shared.wallet_filename(label);

        let mut slot = self.shared.open_wallet.lock().await;
        self.shared
            .call::<serde_json::Value>(
                "create_wallet",
                serde_json::json!({
                    "filename": filename,
                    "password": self.shared.wallet_password,
                    "language": "English",
                }),
            )
            .await?;
        // create_wallet leaves the new wallet open.
        *slot = Some(filename.clone());
        drop(slot);

        Ok(Box::new(RpcWallet {
            shared: Arc::clone(&self.shared),
            filename,
            label: label.to_string(),
        }))
    }
}

/// One wallet file managed through the shared daemon connection.
struct RpcWallet {
    shared: Arc<RpcShared>,
    filename: String,
    label: String,
}

#[async_trait]
impl MultisigWallet for RpcWallet {
    async fn prepare_round1(&self) -> EngineResult<String> {
        #[derive(Deserialize)]
        struct PrepareResult {
            multisig_info: String,
        }

        let _slot = self.shared.open_guard(&self.filename).await?;
        let r: PrepareResult = self
            .shared
            .call("prepare_multisig", serde_json::json!({}))
            .await?;
        Ok(r.multisig_info)
    }

    async fn make_round2(&self, round1: &RoundTriple) -> EngineResult<String> {
        #[derive(Deserialize)]
        struct MakeResult {
            multisig_info: String,
        }

        let _slot = self.shared.open_guard(&self.filename).await?;
        let r: MakeResult = self
            .shared
            .call(
                "make_multisig",
                serde_json::json!({
                    "multisig_info": round1.counterparties(),
                    "threshold": MULTISIG_THRESHOLD,
                    "password": self.shared.wallet_password,
                }),
            )
            .await?;
        Ok(r.multisig_info)
    }

    async fn exchange_keys(&self, round2: &RoundTriple) -> EngineResult<KeyExchangeOutcome> {
        #[derive(Deserialize)]
        struct ExchangeResult {
            address: String,
        }

        #[derive(Deserialize)]
        struct IsMultisigResult {
            #[serde(default)]
            ready: bool,
        }

        let _slot = self.shared.open_guard(&self.filename).await?;
        let exchanged: ExchangeResult = self
            .shared
            .call(
                "exchange_multisig_keys",
                serde_json::json!({
                    "multisig_info": round2.counterparties(),
                    "password": self.shared.wallet_password,
                }),
            )
            .await?;

        let status: IsMultisigResult = self
            .shared
            .call("is_multisig", serde_json::json!({}))
            .await?;

        Ok(KeyExchangeOutcome {
            address: exchanged.address,
            is_ready: status.ready,
        })
    }

    async fn export_seed(&self) -> EngineResult<String> {
        #[derive(Deserialize)]
        struct KeyResult {
            key: String,
        }

        let _slot = self.shared.open_guard(&self.filename).await?;
        let r: KeyResult = self
            .shared
            .call("query_key", serde_json::json!({ "key_type": "mnemonic" }))
            .await?;
        Ok(r.key)
    }

    async fn describe_transfer(&self, tx_hex: &str) -> EngineResult<TransferSummary> {
        #[derive(Deserialize, Default)]
        struct DescEntry {
            #[serde(default)]
            amount_out: u64,
            #[serde(default)]
            fee: u64,
            #[serde(default)]
            recipients: Vec<serde_json::Value>,
        }

        #[derive(Deserialize)]
        struct DescribeResult {
            #[serde(default)]
            desc: Vec<DescEntry>,
        }

        let _slot = self.shared.open_guard(&self.filename).await?;
        let r: DescribeResult = self
            .shared
            .call(
                "describe_transfer",
                serde_json::json!({ "multisig_txset": tx_hex }),
            )
            .await?;

        Ok(TransferSummary {
            recipients: r.desc.iter().map(|d| d.recipients.len()).sum(),
            total_amount: r.desc.iter().map(|d| d.amount_out).sum(),
            fee: r.desc.iter().map(|d| d.fee).sum(),
        })
    }

    async fn sign_transfer(&self, tx_hex: &str) -> EngineResult<SignedTransfer> {
        #[derive(Deserialize)]
        struct SignResult {
            tx_data_hex: String,
            #[serde(default)]
            tx_hash_list: Vec<String>,
        }

        let _slot = self.shared.open_guard(&self.filename).await?;
        let r: SignResult = self
            .shared
            .call("sign_multisig", serde_json::json!({ "tx_data_hex": tx_hex }))
            .await?;

        // The daemon does not report a signer roster; we know our own
        // signature was added, and the hash list tells us whether the
        // transaction is complete.
        Ok(SignedTransfer {
            tx_hex: r.tx_data_hex,
            signers: vec![self.label.clone()],
            is_ready: !r.tx_hash_list.is_empty(),
        })
    }

    async fn export_outputs(&self) -> EngineResult<String> {
        #[derive(Deserialize)]
        struct ExportResult {
            info: String,
        }

        let _slot = self.shared.open_guard(&self.filename).await?;
        let r: ExportResult = self
            .shared
            .call("export_multisig_info", serde_json::json!({}))
            .await?;
        Ok(r.info)
    }

    async fn import_outputs(&self, blobs: &[String]) -> EngineResult<usize> {
        #[derive(Deserialize)]
        struct ImportResult {
            #[serde(default)]
            n_outputs: u64,
        }

        let _slot = self.shared.open_guard(&self.filename).await?;
        let r: ImportResult = self
            .shared
            .call(
                "import_multisig_info",
                serde_json::json!({ "info": blobs }),
            )
            .await?;
        Ok(r.n_outputs as usize)
    }

    async fn release(&self) {
        let mut slot = self.shared.open_wallet.lock().await;
        if slot.as_deref() == Some(self.filename.as_str()) {
            if let Err(e) = self
                .shared
                .call::<serde_json::Value>("close_wallet", serde_json::json!({}))
                .await
            {
                warn!(wallet = %self.filename, "failed to close wallet on release: {e}");
            }
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_local_rpc_url() {
        let result = WalletRpc::new(WalletRpcConfig {
            rpc_url: "http://10.0.0.5:18083/json_rpc".to_string(),
            wallet_password: "pw".to_string(),
        });
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn wallet_filenames_never_repeat_for_one_label() {
        let rpc = WalletRpc::new(WalletRpcConfig {
            rpc_url: "http://127.0.0.1:18083/json_rpc".to_string(),
            wallet_password: "pw".to_string(),
        })
        .unwrap();

        let first = rpc.shared.wallet_filename("b1");
        let second = rpc.shared.wallet_filename("b1");
        assert!(first.starts_with("escrow-b1-"));
        assert_ne!(first, second, "a replacement session needs a fresh file");
    }

    #[test]
    fn accepts_localhost_rpc_url() {
        for url in [
            "http://127.0.0.1:18083/json_rpc",
            "http://localhost:18083/json_rpc",
        ] {
            let result = WalletRpc::new(WalletRpcConfig {
                rpc_url: url.to_string(),
                wallet_password: "pw".to_string(),
            });
            assert!(result.is_ok(), "should accept {url}");
        }
    }
}
