//! Multisig wallet engine integration for the escrow guardian.
//!
//! This crate defines the narrow capability interface the guardian
//! relies on for key generation, multisig round computation and
//! transaction signing, plus the JSON-RPC adapter that fulfils it
//! against a Monero-style wallet RPC daemon.

pub mod engine;
pub mod rpc;

#[cfg(feature = "mock")]
pub mod mock;

pub use engine::{
    CryptoEngine, EngineError, EngineHealth, EngineResult, KeyExchangeOutcome, MultisigWallet,
    RoundTriple, SignedTransfer, TransferSummary,
};
pub use rpc::{WalletRpc, WalletRpcConfig};

#[cfg(feature = "mock")]
pub use mock::MockEngine;
