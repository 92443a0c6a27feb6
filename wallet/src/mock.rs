//! Deterministic mock engine for offline tests.
//!
//! All payloads are derived with SHA-256 from the wallet label and the
//! exact ordered inputs, so two parties that assemble the round-1 set
//! in the same order converge on the same final address, and a party
//! that permutes the order derives a diverging one — which is exactly
//! what the ordering tests need to observe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::engine::{
    CryptoEngine, EngineError, EngineHealth, EngineResult, KeyExchangeOutcome, MultisigWallet,
    RoundTriple, SignedTransfer, TransferSummary,
};

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}

/// Which engine operations should fail on the next calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailureSwitches {
    pub create: bool,
    pub round1: bool,
    pub round2: bool,
    pub exchange: bool,
    pub sign: bool,
    pub import: bool,
}

#[derive(Default)]
struct MockState {
    created: usize,
    released: Vec<String>,
    fail: FailureSwitches,
}

/// Offline engine with canned deterministic payloads.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failures(&self, fail: FailureSwitches) {
        self.state.lock().unwrap().fail = fail;
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().fail = FailureSwitches::default();
    }

    /// Labels of wallets released so far, in release order.
    pub fn released(&self) -> Vec<String> {
        self.state.lock().unwrap().released.clone()
    }

    pub fn created_count(&self) -> usize {
        self.state.lock().unwrap().created
    }

    fn fail(&self) -> FailureSwitches {
        self.state.lock().unwrap().fail
    }
}

#[async_trait]
impl CryptoEngine for MockEngine {
    async fn health(&self) -> EngineResult<EngineHealth> {
        Ok(EngineHealth {
            version: "mock-1.0".to_string(),
        })
    }

    async fn create_wallet(&self, label: &str) -> EngineResult<Box<dyn MultisigWallet>> {
        if self.fail().create {
            return Err(EngineError::Rpc("simulated create_wallet failure".into()));
        }

        let counter = {
            let mut state = self.state.lock().unwrap();
            state.created += 1;
            state.created
        };

        Ok(Box::new(MockWallet {
            label: label.to_string(),
            key: digest(&["wallet-key", label, &counter.to_string()]),
            round2_state: Mutex::new(None),
            released: AtomicBool::new(false),
            engine: self.state.clone(),
        }))
    }
}

/// One mock wallet handle. The `key` differs between successive wallets
/// for the same label, so replacing a session visibly changes round-1.
pub struct MockWallet {
    label: String,
    key: String,
    /// Fingerprint of the ordered round-1 set, fixed by make_round2.
    round2_state: Mutex<Option<String>>,
    released: AtomicBool,
    engine: Arc<Mutex<MockState>>,
}

impl MockWallet {
    fn fail(&self) -> FailureSwitches {
        self.engine.lock().unwrap().fail
    }
}

#[async_trait]
impl MultisigWallet for MockWallet {
    async fn prepare_round1(&self) -> EngineResult<String> {
        if self.fail().round1 {
            return Err(EngineError::Rpc("simulated round-1 failure".into()));
        }
        Ok(format!("ms1_{}", &digest(&["round1", &self.key])[..32]))
    }

    async fn make_round2(&self, round1: &RoundTriple) -> EngineResult<String> {
        if self.fail().round2 {
            return Err(EngineError::Rpc("simulated round-2 failure".into()));
        }

        let [a, b, c] = round1.as_ordered();
        let state = digest(&["round2", a, b, c]);
        let payload = format!("ms2_{}_{}", &state[..32], self.label);
        *self.round2_state.lock().unwrap() = Some(state);
        Ok(payload)
    }

    async fn exchange_keys(&self, _round2: &RoundTriple) -> EngineResult<KeyExchangeOutcome> {
        if self.fail().exchange {
            return Err(EngineError::Rpc("simulated key-exchange failure".into()));
        }

        let state = self
            .round2_state
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| EngineError::Rpc("round 2 has not completed".into()))?;

        Ok(KeyExchangeOutcome {
            address: format!("9{}", &digest(&["address", &state])[..40]),
            is_ready: true,
        })
    }

    async fn export_seed(&self) -> EngineResult<String> {
        Ok(format!("mock mnemonic {} {}", self.label, &self.key[..16]))
    }

    async fn describe_transfer(&self, tx_hex: &str) -> EngineResult<TransferSummary> {
        Ok(TransferSummary {
            recipients: 1,
            total_amount: tx_hex.len() as u64,
            fee: 1,
        })
    }

    async fn sign_transfer(&self, tx_hex: &str) -> EngineResult<SignedTransfer> {
        if self.fail().sign {
            return Err(EngineError::Rpc("simulated signing failure".into()));
        }

        let tx_hex = format!("{tx_hex}:sig[{}]", self.label);
        let signers: Vec<String> = tx_hex
            .match_indices("sig[")
            .map(|(at, _)| {
                let rest = &tx_hex[at + 4..];
                rest[..rest.find(']').unwrap_or(rest.len())].to_string()
            })
            .collect();
        let is_ready = signers.len() >= 2;

        Ok(SignedTransfer {
            tx_hex,
            signers,
            is_ready,
        })
    }

    async fn export_outputs(&self) -> EngineResult<String> {
        Ok(format!("outputs[{}]", self.label))
    }

    async fn import_outputs(&self, blobs: &[String]) -> EngineResult<usize> {
        if self.fail().import || blobs.iter().any(|b| b == "corrupt-blob") {
            return Err(EngineError::Rpc("simulated import failure".into()));
        }
        Ok(blobs.len())
    }

    async fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.engine.lock().unwrap().released.push(self.label.clone());
        }
    }
}
