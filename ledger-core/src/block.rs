//! Hash-linked blocks and the sealing loop
//!
//! A block's digest is SHA-256 over
//! `previous_hash || timestamp (epoch ms) || canonical JSON of data || nonce`,
//! hex encoded. Sealing increments the nonce until the digest starts with
//! `difficulty` `'0'` characters.

use crate::{types::Transaction, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};

/// `previous_hash` of the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Marker stored in the genesis block in place of transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Sentinel {
    /// `{"type":"genesis"}`
    Genesis,
}

/// Block payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockData {
    /// Genesis marker
    Genesis(Sentinel),
    /// Sealed transactions in arrival order
    Transactions(Vec<Transaction>),
}

impl BlockData {
    /// Transactions carried by this block (none for genesis)
    pub fn transactions(&self) -> &[Transaction] {
        match self {
            BlockData::Genesis(_) => &[],
            BlockData::Transactions(txs) => txs,
        }
    }

    /// Canonical serialization fed to the digest
    pub fn canonical_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Sealed batch of transactions linked to its predecessor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Creation instant (epoch milliseconds on the wire)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Digest of the preceding block, `"0"` for genesis
    pub previous_hash: String,

    /// Proof-of-work counter
    pub nonce: u64,

    /// Payload
    pub data: BlockData,

    /// Hex SHA-256 digest over the other fields
    pub hash: String,
}

impl Block {
    /// Build a block with nonce 0 and its digest computed
    pub fn new(
        timestamp: DateTime<Utc>,
        data: BlockData,
        previous_hash: impl Into<String>,
    ) -> Result<Self> {
        let mut block = Self {
            timestamp,
            previous_hash: previous_hash.into(),
            nonce: 0,
            data,
            hash: String::new(),
        };
        block.hash = block.compute_hash()?;
        Ok(block)
    }

    /// First block of every chain
    pub fn genesis(timestamp: DateTime<Utc>) -> Result<Self> {
        Self::new(
            timestamp,
            BlockData::Genesis(Sentinel::Genesis),
            GENESIS_PREVIOUS_HASH,
        )
    }

    /// Whether this is a genesis block
    pub fn is_genesis(&self) -> bool {
        matches!(self.data, BlockData::Genesis(_))
    }

    /// Transactions in this block
    pub fn transactions(&self) -> &[Transaction] {
        self.data.transactions()
    }

    /// Recompute the digest from the block's current fields
    pub fn compute_hash(&self) -> Result<String> {
        let payload = self.data.canonical_json()?;
        Ok(digest(&self.previous_hash, self.timestamp, &payload, self.nonce))
    }

    /// Whether the stored digest matches a fresh recomputation
    pub fn has_valid_hash(&self) -> bool {
        self.compute_hash().map_or(false, |h| h == self.hash)
    }

    /// Search nonces until the digest meets `difficulty`
    pub fn mine(&mut self, difficulty: usize) -> Result<()> {
        self.mine_cancellable(difficulty, &AtomicBool::new(false))
    }

    /// Like [`Block::mine`], but gives up when `cancel` is set.
    ///
    /// The flag is read only between nonce attempts, so a block is either
    /// fully sealed or left at its last consistent (unsealed) state.
    pub fn mine_cancellable(&mut self, difficulty: usize, cancel: &AtomicBool) -> Result<()> {
        // data does not change while mining; serialize it once
        let payload = self.data.canonical_json()?;
        let mut attempts = 0u64;

        self.hash = digest(&self.previous_hash, self.timestamp, &payload, self.nonce);
        while !meets_difficulty(&self.hash, difficulty) {
            if cancel.load(Ordering::Relaxed) {
                return Err(Error::SealCancelled { attempts });
            }
            self.nonce += 1;
            attempts += 1;
            self.hash = digest(&self.previous_hash, self.timestamp, &payload, self.nonce);
        }

        tracing::debug!(nonce = self.nonce, attempts, hash = %self.hash, "Block mined");
        Ok(())
    }
}

/// Whether `hash` starts with `difficulty` zero characters
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

fn digest(previous_hash: &str, timestamp: DateTime<Utc>, payload: &str, nonce: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    hasher.update(timestamp.timestamp_millis().to_string().as_bytes());
    hasher.update(payload.as_bytes());
    hasher.update(nonce.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
