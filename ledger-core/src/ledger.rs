//! The chain of sealed blocks plus the pending-transaction staging area
//!
//! This module owns transaction intake, sealing, integrity verification and
//! lookups. A [`Ledger`] is a plain owned value: mutation takes `&mut self`,
//! so independent ledgers can live side by side. For shared access from
//! async code, see [`crate::actor`].
//!
//! # Example
//!
//! ```
//! use provenance_ledger::{Config, Ledger};
//! use provenance_ledger::types::{CollectionEvent, GeoLocation, Transaction};
//! use rust_decimal::Decimal;
//!
//! let mut ledger = Ledger::new(&Config::default()).unwrap();
//!
//! let harvest = Transaction::collection_event(CollectionEvent {
//!     collector_id: "FARMER001".into(),
//!     species: "Withania somnifera".into(),
//!     location: Some(GeoLocation::new(13.0, 77.6)),
//!     quantity: Some(Decimal::from(30)),
//!     ..Default::default()
//! });
//! let batch_id = ledger.add_transaction(harvest).unwrap();
//! ledger.seal_pending_transactions().unwrap();
//!
//! assert!(ledger.is_valid());
//! assert_eq!(ledger.find_by_batch(&batch_id).len(), 1);
//! ```

use crate::{
    block::{Block, BlockData},
    types::{now_millis, Transaction},
    validation::{self, RulePolicy},
    Config, Error, Result,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Append-only ledger
#[derive(Debug, Clone)]
pub struct Ledger {
    /// Sealed blocks, index 0 is genesis
    chain: Vec<Block>,

    /// Accepted transactions awaiting sealing, in arrival order
    pending: Vec<Transaction>,

    /// Leading zero hex characters required of a sealed digest
    difficulty: usize,

    /// Business rules applied on intake
    policy: RulePolicy,
}

/// A failed integrity check on one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrityViolation {
    /// Stored digest differs from a recomputation
    HashMismatch {
        /// Block height
        height: usize,
    },
    /// `previous_hash` differs from the predecessor's digest
    BrokenLink {
        /// Block height
        height: usize,
    },
}

impl fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityViolation::HashMismatch { height } => {
                write!(f, "block {} hash does not match its contents", height)
            }
            IntegrityViolation::BrokenLink { height } => {
                write!(f, "block {} previous_hash does not match block {}", height, height - 1)
            }
        }
    }
}

/// Summary of chain state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainHealth {
    /// Result of [`Ledger::is_valid`]
    pub is_valid: bool,
    /// Number of blocks including genesis
    pub chain_length: usize,
    /// Transactions awaiting sealing
    pub pending_transactions: usize,
    /// Digest of the newest block
    pub latest_hash: String,
    /// Timestamp of the newest block
    pub latest_timestamp: DateTime<Utc>,
}

impl Ledger {
    /// Create a ledger holding only a fresh genesis block
    pub fn new(config: &Config) -> Result<Self> {
        let genesis = Block::genesis(now_millis())?;
        Ok(Self::with_chain(vec![genesis], config))
    }

    /// Rebuild a ledger from previously sealed blocks and queued transactions.
    ///
    /// Pending transactions were validated when first accepted and are not
    /// re-checked. An integrity failure is logged, not repaired.
    pub fn restore(blocks: Vec<Block>, pending: Vec<Transaction>, config: &Config) -> Result<Self> {
        match blocks.first() {
            None => return Err(Error::IntegrityViolation("cannot restore an empty chain".into())),
            Some(first) if !first.is_genesis() => {
                return Err(Error::IntegrityViolation(
                    "first restored block is not a genesis block".into(),
                ))
            }
            Some(_) => {}
        }

        let mut ledger = Self::with_chain(blocks, config);
        ledger.pending = pending;

        let violations = ledger.verify_integrity();
        if violations.is_empty() {
            tracing::info!(
                chain_length = ledger.chain.len(),
                pending = ledger.pending.len(),
                "Ledger restored"
            );
        } else {
            for v in &violations {
                tracing::error!(violation = %v, "Restored chain failed integrity check");
            }
        }

        Ok(ledger)
    }

    fn with_chain(chain: Vec<Block>, config: &Config) -> Self {
        Self {
            chain,
            pending: Vec::new(),
            difficulty: config.difficulty,
            policy: config.rules.clone(),
        }
    }

    /// Sealed blocks in order
    pub fn blocks(&self) -> &[Block] {
        &self.chain
    }

    /// Transactions awaiting sealing
    pub fn pending(&self) -> &[Transaction] {
        &self.pending
    }

    /// Sealing difficulty
    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    /// Rules applied on intake
    pub fn policy(&self) -> &RulePolicy {
        &self.policy
    }

    /// Newest block
    pub fn latest_block(&self) -> &Block {
        // chain always holds at least the genesis block
        &self.chain[self.chain.len() - 1]
    }

    /// Validate and queue a transaction, returning its id
    pub fn add_transaction(&mut self, tx: Transaction) -> Result<String> {
        validation::check(&tx, &self.policy)?;

        let id = tx.id.clone();
        tracing::debug!(
            transaction_id = %id,
            transaction_type = tx.type_name(),
            batch_id = tx.batch_id(),
            "Transaction queued"
        );
        self.pending.push(tx);

        Ok(id)
    }

    /// Unsealed block over a snapshot of the pending set
    pub fn candidate_block(&self) -> Result<Block> {
        Block::new(
            now_millis(),
            BlockData::Transactions(self.pending.clone()),
            self.latest_block().hash.clone(),
        )
    }

    /// Append a block produced by [`Ledger::candidate_block`] and mined.
    ///
    /// Rejects a block that no longer extends the tip, carries a digest that
    /// doesn't match, or misses the difficulty target. On success the pending
    /// set is cleared.
    pub fn commit_sealed(&mut self, block: Block) -> Result<&Block> {
        if block.previous_hash != self.latest_block().hash {
            return Err(Error::IntegrityViolation(
                "sealed block does not extend the current tip".into(),
            ));
        }
        if !block.has_valid_hash() {
            return Err(Error::IntegrityViolation("sealed block digest mismatch".into()));
        }
        if !crate::block::meets_difficulty(&block.hash, self.difficulty) {
            return Err(Error::IntegrityViolation(format!(
                "sealed block digest does not meet difficulty {}",
                self.difficulty
            )));
        }

        tracing::info!(
            block_height = self.chain.len(),
            transaction_count = block.transactions().len(),
            nonce = block.nonce,
            hash = %block.hash,
            "Block sealed"
        );

        self.chain.push(block);
        self.pending.clear();

        Ok(self.latest_block())
    }

    /// Package all pending transactions into a new block and append it.
    ///
    /// An empty pending set still produces an (empty) block.
    pub fn seal_pending_transactions(&mut self) -> Result<&Block> {
        let mut block = self.candidate_block()?;
        block.mine(self.difficulty)?;
        self.commit_sealed(block)
    }

    /// Whether every block after genesis hashes correctly and links to its
    /// predecessor. Stops at the first failure.
    pub fn is_valid(&self) -> bool {
        self.chain
            .windows(2)
            .all(|pair| pair[1].has_valid_hash() && pair[1].previous_hash == pair[0].hash)
    }

    /// Every integrity failure in the chain
    pub fn verify_integrity(&self) -> Vec<IntegrityViolation> {
        let mut violations = Vec::new();

        for height in 1..self.chain.len() {
            let block = &self.chain[height];
            if !block.has_valid_hash() {
                violations.push(IntegrityViolation::HashMismatch { height });
            }
            if block.previous_hash != self.chain[height - 1].hash {
                violations.push(IntegrityViolation::BrokenLink { height });
            }
        }

        violations
    }

    fn sealed_transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.chain.iter().flat_map(|b| b.transactions().iter())
    }

    /// First sealed transaction with this id, scanning in chain order
    pub fn find_by_id(&self, id: &str) -> Option<&Transaction> {
        self.sealed_transactions().find(|tx| tx.id == id)
    }

    /// Sealed product carrying this QR code
    pub fn find_by_qr_code(&self, qr_code: &str) -> Option<&Transaction> {
        self.sealed_transactions().find(|tx| {
            tx.as_product()
                .and_then(|p| p.qr_code.as_deref())
                .map_or(false, |code| code == qr_code)
        })
    }

    /// Every sealed transaction belonging to the batch, in chain order.
    ///
    /// Includes the collection event whose own id is the batch id.
    pub fn find_by_batch(&self, batch_id: &str) -> Vec<&Transaction> {
        self.sealed_transactions()
            .filter(|tx| tx.batch_id() == batch_id)
            .collect()
    }

    /// Chain status snapshot
    pub fn health(&self) -> ChainHealth {
        let latest = self.latest_block();
        ChainHealth {
            is_valid: self.is_valid(),
            chain_length: self.chain.len(),
            pending_transactions: self.pending.len(),
            latest_hash: latest.hash.clone(),
            latest_timestamp: latest.timestamp,
        }
    }

    #[cfg(test)]
    pub(crate) fn blocks_mut(&mut self) -> &mut Vec<Block> {
        &mut self.chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::types::{
        CollectionEvent, GeoLocation, Product, QualityTest, TestResults, TransactionKind,
    };
    use rust_decimal::Decimal;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.difficulty = 1;
        config
    }

    fn harvest(id: &str, latitude: f64) -> Transaction {
        Transaction::new(
            id,
            TransactionKind::CollectionEvent(CollectionEvent {
                collector_id: "FARMER001".into(),
                species: "Tulsi".into(),
                location: Some(GeoLocation::new(latitude, 77.6)),
                quantity: Some(Decimal::from(30)),
                ..Default::default()
            }),
        )
    }

    fn moisture(id: &str, batch_id: &str, value: i64) -> Transaction {
        Transaction::new(
            id,
            TransactionKind::QualityTest(QualityTest {
                batch_id: batch_id.into(),
                lab_id: "LAB001".into(),
                test_type: "moisture".into(),
                results: Some(TestResults::value(Decimal::from(value))),
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_new_ledger_has_genesis() {
        let ledger = Ledger::new(&test_config()).unwrap();
        assert_eq!(ledger.blocks().len(), 1);
        assert!(ledger.latest_block().is_genesis());
        assert_eq!(ledger.latest_block().previous_hash, "0");
        assert!(ledger.is_valid());
    }

    #[test]
    fn test_add_transaction_queues_in_arrival_order() {
        let mut ledger = Ledger::new(&test_config()).unwrap();
        assert_eq!(ledger.add_transaction(harvest("A", 13.0)).unwrap(), "A");
        assert_eq!(ledger.add_transaction(harvest("B", 14.0)).unwrap(), "B");

        let ids: Vec<&str> = ledger.pending().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
    }

    #[test]
    fn test_rejected_transaction_is_not_queued() {
        let mut ledger = Ledger::new(&test_config()).unwrap();
        let err = ledger.add_transaction(harvest("A", 40.0)).unwrap_err();
        match err {
            Error::Validation(v) => {
                assert!(matches!(v, ValidationError::OutsideHarvestZone { .. }))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(ledger.pending().is_empty());
    }

    #[test]
    fn test_seal_links_and_clears_pending() {
        let mut ledger = Ledger::new(&test_config()).unwrap();
        ledger.add_transaction(harvest("A", 13.0)).unwrap();
        ledger.add_transaction(moisture("T1", "A", 8)).unwrap();

        let genesis_hash = ledger.latest_block().hash.clone();
        let block = ledger.seal_pending_transactions().unwrap().clone();

        assert_eq!(block.previous_hash, genesis_hash);
        assert_eq!(block.transactions().len(), 2);
        assert!(block.hash.starts_with('0'));
        assert!(ledger.pending().is_empty());
        assert_eq!(ledger.blocks().len(), 2);
        assert!(ledger.is_valid());
    }

    #[test]
    fn test_empty_seal_is_allowed() {
        let mut ledger = Ledger::new(&test_config()).unwrap();
        let block = ledger.seal_pending_transactions().unwrap();
        assert!(block.transactions().is_empty());
        assert!(!block.is_genesis());
        assert!(ledger.is_valid());
    }

    #[test]
    fn test_tampered_block_is_detected() {
        let mut ledger = Ledger::new(&test_config()).unwrap();
        ledger.add_transaction(harvest("A", 13.0)).unwrap();
        ledger.seal_pending_transactions().unwrap();
        ledger.seal_pending_transactions().unwrap();
        assert!(ledger.is_valid());

        if let BlockData::Transactions(ref mut txs) = ledger.blocks_mut()[1].data {
            txs[0].id.push('X');
        }
        assert!(!ledger.is_valid());
        assert_eq!(
            ledger.verify_integrity(),
            vec![IntegrityViolation::HashMismatch { height: 1 }]
        );
    }

    #[test]
    fn test_rehashed_tamper_breaks_link() {
        let mut ledger = Ledger::new(&test_config()).unwrap();
        ledger.add_transaction(harvest("A", 13.0)).unwrap();
        ledger.seal_pending_transactions().unwrap();
        ledger.seal_pending_transactions().unwrap();

        let blocks = ledger.blocks_mut();
        blocks[1].nonce += 1;
        blocks[1].hash = blocks[1].compute_hash().unwrap();

        assert!(!ledger.is_valid());
        assert_eq!(
            ledger.verify_integrity(),
            vec![IntegrityViolation::BrokenLink { height: 2 }]
        );
    }

    #[test]
    fn test_commit_rejects_stale_candidate() {
        let mut ledger = Ledger::new(&test_config()).unwrap();
        let mut stale = ledger.candidate_block().unwrap();
        stale.mine(1).unwrap();
        ledger.seal_pending_transactions().unwrap();

        assert!(matches!(
            ledger.commit_sealed(stale),
            Err(Error::IntegrityViolation(_))
        ));
        assert_eq!(ledger.blocks().len(), 2);
    }

    #[test]
    fn test_find_by_id_and_batch() {
        let mut ledger = Ledger::new(&test_config()).unwrap();
        ledger.add_transaction(harvest("A", 13.0)).unwrap();
        ledger.add_transaction(harvest("B", 14.0)).unwrap();
        ledger.seal_pending_transactions().unwrap();
        ledger.add_transaction(moisture("T1", "A", 8)).unwrap();

        // pending transactions are not yet visible
        assert!(ledger.find_by_id("T1").is_none());
        ledger.seal_pending_transactions().unwrap();

        assert_eq!(ledger.find_by_id("B").unwrap().id, "B");
        assert!(ledger.find_by_id("missing").is_none());

        let ids: Vec<&str> = ledger.find_by_batch("A").iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "T1"]);
        assert!(ledger.find_by_batch("nope").is_empty());
    }

    #[test]
    fn test_find_by_qr_code() {
        let mut ledger = Ledger::new(&test_config()).unwrap();
        let product = Transaction::product(Product {
            name: "Tulsi Drops".into(),
            manufacturer_id: "MFG001".into(),
            ingredients: Some(vec![]),
            qr_code: Some("QR-ABC123DEF456".into()),
            ..Default::default()
        });
        let product_id = ledger.add_transaction(product).unwrap();
        ledger.add_transaction(harvest("A", 13.0)).unwrap();

        // not visible until sealed
        assert!(ledger.find_by_qr_code("QR-ABC123DEF456").is_none());
        ledger.seal_pending_transactions().unwrap();

        assert_eq!(ledger.find_by_qr_code("QR-ABC123DEF456").unwrap().id, product_id);
        assert!(ledger.find_by_qr_code("QR-UNKNOWN").is_none());
    }

    #[test]
    fn test_restore_round_trip() {
        let config = test_config();
        let mut ledger = Ledger::new(&config).unwrap();
        ledger.add_transaction(harvest("A", 13.0)).unwrap();
        ledger.seal_pending_transactions().unwrap();
        ledger.add_transaction(harvest("B", 14.0)).unwrap();

        let restored = Ledger::restore(
            ledger.blocks().to_vec(),
            ledger.pending().to_vec(),
            &config,
        )
        .unwrap();
        assert!(restored.is_valid());
        assert_eq!(restored.blocks().len(), 2);
        assert_eq!(restored.pending().len(), 1);

        assert!(Ledger::restore(vec![], vec![], &config).is_err());
    }

    #[test]
    fn test_health_reports_tip() {
        let mut ledger = Ledger::new(&test_config()).unwrap();
        ledger.add_transaction(harvest("A", 13.0)).unwrap();
        let health = ledger.health();
        assert!(health.is_valid);
        assert_eq!(health.chain_length, 1);
        assert_eq!(health.pending_transactions, 1);
        assert_eq!(health.latest_hash, ledger.latest_block().hash);
    }
}
