//! Escrow guardian service library.
//!
//! The guardian is the automated third participant in a 2-of-3
//! threshold escrow: it drives the multi-round key exchange against the
//! wallet engine, keeps finalized escrow records durable, reclaims
//! abandoned sessions, and gates refund signing behind the recorded
//! deadline block height.

pub mod config;
pub mod driver;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod signing;
pub mod store;
pub mod sweeper;
