//! Herbal Supply-Chain Provenance Ledger
//!
//! Append-only, hash-linked ledger recording a botanical's journey from
//! harvest through lab testing and processing into a finished product.
//!
//! # Architecture
//!
//! - **Rule Gate**: Every transaction passes business-rule checks before it is queued
//! - **Proof of Work**: Pending transactions are sealed into SHA-256 linked blocks
//! - **Single Writer**: One actor task owns the chain; handles are cheap to clone
//! - **Replay**: Sealed blocks and pending transactions are rebuilt from RocksDB

#![forbid(unsafe_code)]
//!
//! # Invariants
//!
//! - Append-only: Sealed blocks are never modified or removed
//! - Linked: Every block after genesis references its predecessor's digest
//! - Gated: Only rule-passing transactions reach the pending set
//! - Ordered: Pending transactions are sealed in arrival order

#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod ids;
pub mod validation;
pub mod scoring;
pub mod custody;
pub mod block;
pub mod ledger;
pub mod provenance;
pub mod storage;
pub mod error;
pub mod actor;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, Result, ValidationError};
pub use types::{
    CollectionEvent, GeoLocation, Ingredient, ProcessingStep, Product, QualityTest, TestResults,
    Transaction, TransactionKind,
};
pub use block::{Block, BlockData};
pub use ledger::{ChainHealth, IntegrityViolation, Ledger};
pub use provenance::{BatchHistory, ProvenanceReport};
pub use actor::LedgerHandle;
pub use storage::Storage;
pub use config::Config;
