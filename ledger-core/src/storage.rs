//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `blocks` - Sealed blocks (key: block height, big-endian)
//! - `transactions` - Every accepted transaction (key: transaction id)
//!
//! Values are bincode envelopes whose `data` field holds the canonical JSON
//! payload, so a replayed block recomputes the same digest it was sealed
//! with. The in-memory [`Ledger`] stays authoritative; the store only exists
//! to rebuild it after a restart.

use crate::{
    block::{Block, BlockData},
    error::{Error, Result},
    ledger::Ledger,
    types::Transaction,
    Config,
};
use chrono::DateTime;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Column family names
const CF_BLOCKS: &str = "blocks";
const CF_TRANSACTIONS: &str = "transactions";

/// Persisted block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    /// Block digest
    pub hash: String,
    /// Predecessor digest
    pub previous_hash: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    /// Proof-of-work counter
    pub nonce: u64,
    /// Canonical JSON of the block payload
    pub data: String,
}

impl BlockRecord {
    /// Envelope for a block
    pub fn from_block(block: &Block) -> Result<Self> {
        Ok(Self {
            hash: block.hash.clone(),
            previous_hash: block.previous_hash.clone(),
            timestamp: block.timestamp.timestamp_millis(),
            nonce: block.nonce,
            data: block.data.canonical_json()?,
        })
    }

    /// Decode back into a block
    pub fn into_block(self) -> Result<Block> {
        let timestamp = DateTime::from_timestamp_millis(self.timestamp)
            .ok_or_else(|| Error::Storage(format!("Invalid block timestamp {}", self.timestamp)))?;
        let data: BlockData = serde_json::from_str(&self.data)?;

        Ok(Block {
            timestamp,
            previous_hash: self.previous_hash,
            nonce: self.nonce,
            data,
            hash: self.hash,
        })
    }
}

/// Lifecycle state of a persisted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Accepted, awaiting sealing
    Pending,
    /// Included in a block
    Sealed,
}

/// Persisted transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Transaction id
    pub id: String,
    /// `type` tag
    pub kind: String,
    /// Batch key
    pub batch_id: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    /// Canonical JSON of the full transaction
    pub data: String,
    /// Pending or sealed
    pub status: TransactionStatus,
    /// Digest of the sealing block
    pub block_hash: Option<String>,
    /// Arrival order
    pub sequence: u64,
}

impl TransactionRecord {
    fn new(tx: &Transaction, sequence: u64) -> Result<Self> {
        Ok(Self {
            id: tx.id.clone(),
            kind: tx.type_name().to_string(),
            batch_id: tx.batch_id().to_string(),
            timestamp: tx.timestamp.timestamp_millis(),
            data: tx.canonical_json()?,
            status: TransactionStatus::Pending,
            block_hash: None,
            sequence,
        })
    }

    /// Decode the payload
    pub fn transaction(&self) -> Result<Transaction> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: DB,
    next_sequence: AtomicU64,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .field("next_sequence", &self.next_sequence.load(Ordering::Relaxed))
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_BLOCKS, Self::cf_options_blocks()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_transactions()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let storage = Self {
            db,
            next_sequence: AtomicU64::new(0),
        };
        let next = storage
            .scan_transactions()?
            .iter()
            .map(|r| r.sequence + 1)
            .max()
            .unwrap_or(0);
        storage.next_sequence.store(next, Ordering::SeqCst);

        tracing::info!(path = ?path, next_sequence = next, "Opened RocksDB");

        Ok(storage)
    }

    fn cf_options_blocks() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_transactions() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // point lookups by id
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    /// Rebuild the ledger from disk, persisting a genesis block on first use
    pub fn load_ledger(&self, config: &Config) -> Result<Ledger> {
        let blocks = self.load_blocks()?;

        if blocks.is_empty() {
            let ledger = Ledger::new(config)?;
            self.put_block(0, ledger.latest_block())?;
            tracing::info!(hash = %ledger.latest_block().hash, "Persisted genesis block");
            return Ok(ledger);
        }

        let pending = self.load_pending()?;
        Ledger::restore(blocks, pending, config)
    }

    // Transaction operations

    /// Persist an accepted transaction as pending, returning its arrival sequence
    pub fn put_transaction(&self, tx: &Transaction) -> Result<u64> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let record = TransactionRecord::new(tx, sequence)?;

        self.db.put_cf(cf, tx.id.as_bytes(), bincode::serialize(&record)?)?;

        tracing::debug!(transaction_id = %tx.id, sequence, "Transaction persisted");
        Ok(sequence)
    }

    /// Look up a persisted transaction record
    pub fn get_transaction(&self, id: &str) -> Result<Option<TransactionRecord>> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_transactions(&self) -> Result<Vec<TransactionRecord>> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            records.push(bincode::deserialize::<TransactionRecord>(&value)?);
        }
        Ok(records)
    }

    /// Pending transactions in arrival order
    pub fn load_pending(&self) -> Result<Vec<Transaction>> {
        let mut pending: Vec<TransactionRecord> = self
            .scan_transactions()?
            .into_iter()
            .filter(|r| r.status == TransactionStatus::Pending)
            .collect();
        pending.sort_by_key(|r| r.sequence);

        pending.iter().map(TransactionRecord::transaction).collect()
    }

    // Block operations

    /// Persist a sealed block and mark its transactions sealed (atomic)
    pub fn put_block(&self, height: u64, block: &Block) -> Result<()> {
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;

        let mut batch = WriteBatch::default();
        let record = BlockRecord::from_block(block)?;
        batch.put_cf(cf_blocks, height.to_be_bytes(), bincode::serialize(&record)?);

        for tx in block.transactions() {
            let mut tx_record = match self.get_transaction(&tx.id)? {
                Some(existing) => existing,
                None => {
                    let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
                    TransactionRecord::new(tx, sequence)?
                }
            };
            tx_record.status = TransactionStatus::Sealed;
            tx_record.block_hash = Some(block.hash.clone());
            batch.put_cf(cf_transactions, tx.id.as_bytes(), bincode::serialize(&tx_record)?);
        }

        self.db.write(batch)?;

        tracing::info!(
            block_height = height,
            transaction_count = block.transactions().len(),
            hash = %block.hash,
            "Block persisted"
        );

        Ok(())
    }

    /// Every stored block in height order
    pub fn load_blocks(&self) -> Result<Vec<Block>> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        let mut blocks = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let record: BlockRecord = bincode::deserialize(&value)?;
            blocks.push(record.into_block()?);
        }
        Ok(blocks)
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let total_blocks = self.db.iterator_cf(cf_blocks, IteratorMode::Start).count() as u64;

        let records = self.scan_transactions()?;
        let pending_transactions = records
            .iter()
            .filter(|r| r.status == TransactionStatus::Pending)
            .count() as u64;

        Ok(StorageStats {
            total_blocks,
            total_transactions: records.len() as u64,
            pending_transactions,
        })
    }
}

/// Storage statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Stored blocks including genesis
    pub total_blocks: u64,
    /// Stored transactions
    pub total_transactions: u64,
    /// Transactions not yet sealed
    pub pending_transactions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CollectionEvent, GeoLocation, TransactionKind};
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.difficulty = 1;
        (config, temp_dir)
    }

    fn harvest(id: &str) -> Transaction {
        Transaction::new(
            id,
            TransactionKind::CollectionEvent(CollectionEvent {
                collector_id: "FARMER001".into(),
                species: "Ashwagandha".into(),
                location: Some(GeoLocation::new(23.0, 72.5)),
                quantity: Some(Decimal::new(255, 1)),
                organic: true,
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_fresh_store_persists_genesis() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let ledger = storage.load_ledger(&config).unwrap();
        let stored = storage.load_blocks().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0], *ledger.latest_block());
    }

    #[test]
    fn test_transaction_status_follows_sealing() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        let mut ledger = storage.load_ledger(&config).unwrap();

        let tx = harvest("A");
        ledger.add_transaction(tx.clone()).unwrap();
        assert_eq!(storage.put_transaction(&tx).unwrap(), 0);

        let record = storage.get_transaction("A").unwrap().unwrap();
        assert_eq!(record.status, TransactionStatus::Pending);
        assert_eq!(record.kind, "CollectionEvent");
        assert_eq!(record.batch_id, "A");

        let block = ledger.seal_pending_transactions().unwrap().clone();
        storage.put_block(1, &block).unwrap();

        let record = storage.get_transaction("A").unwrap().unwrap();
        assert_eq!(record.status, TransactionStatus::Sealed);
        assert_eq!(record.block_hash.as_deref(), Some(block.hash.as_str()));
        assert!(storage.get_transaction("missing").unwrap().is_none());
    }

    #[test]
    fn test_replay_rebuilds_chain_and_pending() {
        let (config, temp) = test_config();
        let (tip, pending_id) = {
            let storage = Storage::open(&config).unwrap();
            let mut ledger = storage.load_ledger(&config).unwrap();

            for id in ["A", "B"] {
                let tx = harvest(id);
                ledger.add_transaction(tx.clone()).unwrap();
                storage.put_transaction(&tx).unwrap();
            }
            let block = ledger.seal_pending_transactions().unwrap().clone();
            storage.put_block(1, &block).unwrap();

            let tx = harvest("C");
            ledger.add_transaction(tx.clone()).unwrap();
            storage.put_transaction(&tx).unwrap();

            (block.hash, tx.id)
        };

        let storage = Storage::open(&config).unwrap();
        let ledger = storage.load_ledger(&config).unwrap();
        assert!(ledger.is_valid());
        assert_eq!(ledger.blocks().len(), 2);
        assert_eq!(ledger.latest_block().hash, tip);
        assert_eq!(ledger.pending().len(), 1);
        assert_eq!(ledger.pending()[0].id, pending_id);
        assert_eq!(ledger.find_by_batch("A").len(), 1);

        // sequence continues after reopen
        assert_eq!(storage.put_transaction(&harvest("D")).unwrap(), 3);

        let stats = storage.get_stats().unwrap();
        assert_eq!(stats.total_blocks, 2);
        assert_eq!(stats.total_transactions, 4);
        assert_eq!(stats.pending_transactions, 2);
        drop(temp);
    }

    #[test]
    fn test_block_record_round_trip() {
        let (config, _temp) = test_config();
        let mut ledger = Ledger::new(&config).unwrap();
        ledger.add_transaction(harvest("A")).unwrap();
        let block = ledger.seal_pending_transactions().unwrap().clone();

        let record = BlockRecord::from_block(&block).unwrap();
        let bytes = bincode::serialize(&record).unwrap();
        let decoded: BlockRecord = bincode::deserialize(&bytes).unwrap();
        let restored = decoded.into_block().unwrap();
        assert_eq!(restored, block);
        assert!(restored.has_valid_hash());
    }
}
