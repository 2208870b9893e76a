//! Actor-based concurrency for the ledger
//!
//! This module implements the single-writer pattern using Tokio actors:
//! - One task owns the [`Ledger`], so intake and sealing never interleave
//! - Proof-of-work runs on the blocking pool and can be bounded by a deadline
//! - Async message passing with backpressure
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                    │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)                │
//! │  ┌────────────────────────────────────────────────┐  │
//! │  │ Ledger: chain + pending                        │  │
//! │  │ Seal: candidate → spawn_blocking(mine) → commit│  │
//! │  └────────────────────────────────────────────────┘  │
//! │                       │                               │
//! │                       ▼                               │
//! │     Storage::put_transaction / put_block              │
//! │          (RocksDB, when persistence is on)            │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::{
    block::Block,
    ledger::{ChainHealth, IntegrityViolation, Ledger},
    metrics::Metrics,
    provenance::{self, BatchHistory, ProvenanceReport},
    types::Transaction,
    validation, Config, Error, Result, Storage,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Validate and queue a transaction
    AddTransaction {
        transaction: Transaction,
        response: oneshot::Sender<Result<String>>,
    },

    /// Seal all pending transactions into a block
    SealPending {
        response: oneshot::Sender<Result<Block>>,
    },

    /// Fast chain validity check
    IsValid { response: oneshot::Sender<bool> },

    /// Full integrity audit
    VerifyIntegrity {
        response: oneshot::Sender<Vec<IntegrityViolation>>,
    },

    /// Sealed transaction by id
    FindById {
        id: String,
        response: oneshot::Sender<Option<Transaction>>,
    },

    /// Sealed transactions of a batch
    FindByBatch {
        batch_id: String,
        response: oneshot::Sender<Vec<Transaction>>,
    },

    /// Product provenance
    ResolveProvenance {
        product_id: String,
        response: oneshot::Sender<Option<ProvenanceReport>>,
    },

    /// Product provenance from a scanned QR code
    ResolveByQrCode {
        qr_code: String,
        response: oneshot::Sender<Option<ProvenanceReport>>,
    },

    /// Batch history with custody verdict
    BatchHistory {
        batch_id: String,
        response: oneshot::Sender<BatchHistory>,
    },

    /// Chain status snapshot
    Health { response: oneshot::Sender<ChainHealth> },

    /// Prometheus text exposition
    Metrics { response: oneshot::Sender<String> },

    /// Shutdown actor; acknowledged once storage is closed
    Shutdown { response: oneshot::Sender<()> },
}

/// Actor that processes ledger messages
pub struct LedgerActor {
    /// In-memory chain, authoritative
    ledger: Ledger,

    /// Storage backend, absent when persistence is off
    storage: Option<Storage>,

    /// Counters and gauges
    metrics: Metrics,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Seal deadline
    seal_timeout: Option<Duration>,
}

impl std::fmt::Debug for LedgerActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerActor")
            .field("chain_length", &self.ledger.blocks().len())
            .field("pending", &self.ledger.pending().len())
            .field("persistent", &self.storage.is_some())
            .finish()
    }
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        ledger: Ledger,
        storage: Option<Storage>,
        metrics: Metrics,
        mailbox: mpsc::Receiver<LedgerMessage>,
        seal_timeout: Option<Duration>,
    ) -> Self {
        metrics.observe_chain(ledger.blocks().len(), ledger.pending().len());
        Self {
            ledger,
            storage,
            metrics,
            mailbox,
            seal_timeout,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        let mut ack = None;

        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                LedgerMessage::Shutdown { response } => {
                    ack = Some(response);
                    break;
                }
                msg => self.handle_message(msg).await,
            }
        }

        let health = self.ledger.health();
        tracing::info!(
            chain_length = health.chain_length,
            pending = health.pending_transactions,
            "Ledger actor stopped"
        );

        // close RocksDB before acknowledging so the path can be reopened
        drop(self.storage.take());
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    /// Handle a single message
    async fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::AddTransaction {
                transaction,
                response,
            } => {
                let result = self.add_transaction(transaction);
                let _ = response.send(result);
            }

            LedgerMessage::SealPending { response } => {
                let result = self.seal().await;
                if let Err(e) = &result {
                    tracing::error!(error = %e, "Sealing failed");
                }
                let _ = response.send(result);
            }

            LedgerMessage::IsValid { response } => {
                let _ = response.send(self.ledger.is_valid());
            }

            LedgerMessage::VerifyIntegrity { response } => {
                let _ = response.send(self.ledger.verify_integrity());
            }

            LedgerMessage::FindById { id, response } => {
                let _ = response.send(self.ledger.find_by_id(&id).cloned());
            }

            LedgerMessage::FindByBatch { batch_id, response } => {
                let found = self
                    .ledger
                    .find_by_batch(&batch_id)
                    .into_iter()
                    .cloned()
                    .collect();
                let _ = response.send(found);
            }

            LedgerMessage::ResolveProvenance {
                product_id,
                response,
            } => {
                let _ = response.send(provenance::resolve_provenance(&self.ledger, &product_id));
            }

            LedgerMessage::ResolveByQrCode { qr_code, response } => {
                let _ = response.send(provenance::resolve_by_qr_code(&self.ledger, &qr_code));
            }

            LedgerMessage::BatchHistory { batch_id, response } => {
                let _ = response.send(provenance::batch_history(&self.ledger, &batch_id));
            }

            LedgerMessage::Health { response } => {
                let _ = response.send(self.ledger.health());
            }

            LedgerMessage::Metrics { response } => {
                let _ = response.send(self.metrics.gather_text());
            }

            LedgerMessage::Shutdown { .. } => {
                // Handled in main loop
            }
        }
    }

    fn add_transaction(&mut self, transaction: Transaction) -> Result<String> {
        if let Err(e) = validation::check(&transaction, self.ledger.policy()) {
            self.metrics.record_rejected(e.rule());
            return Err(e.into());
        }

        if let Some(storage) = &self.storage {
            storage.put_transaction(&transaction)?;
        }

        let id = self.ledger.add_transaction(transaction)?;
        self.metrics.record_accepted(self.ledger.pending().len());
        Ok(id)
    }

    /// Mine a candidate off the executor, then persist and append it
    async fn seal(&mut self) -> Result<Block> {
        let started = Instant::now();
        let mut candidate = self.ledger.candidate_block()?;
        let difficulty = self.ledger.difficulty();

        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let mut task = tokio::task::spawn_blocking(move || {
            candidate.mine_cancellable(difficulty, &flag).map(|()| candidate)
        });

        let joined = match self.seal_timeout {
            None => (&mut task).await,
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    cancel.store(true, Ordering::Relaxed);
                    let attempts = match task.await {
                        Ok(Err(Error::SealCancelled { attempts })) => attempts,
                        _ => 0,
                    };
                    let timeout_ms = limit.as_millis() as u64;
                    tracing::warn!(
                        timeout_ms,
                        attempts,
                        pending = self.ledger.pending().len(),
                        "Seal deadline exceeded, pending transactions kept"
                    );
                    return Err(Error::SealTimeout { timeout_ms });
                }
            },
        };

        let block = joined.map_err(|e| Error::Concurrency(format!("Sealing task failed: {}", e)))??;

        if let Some(storage) = &self.storage {
            storage.put_block(self.ledger.blocks().len() as u64, &block)?;
        }

        let sealed = self.ledger.commit_sealed(block)?.clone();
        self.metrics
            .record_sealed(started.elapsed(), self.ledger.blocks().len());

        Ok(sealed)
    }
}

/// Handle for sending messages to the actor
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))
    }

    /// Validate and queue a transaction, returning its id
    pub async fn add_transaction(&self, transaction: Transaction) -> Result<String> {
        self.request(|response| LedgerMessage::AddTransaction {
            transaction,
            response,
        })
        .await?
    }

    /// Seal all pending transactions, returning the new block
    pub async fn seal_pending_transactions(&self) -> Result<Block> {
        self.request(|response| LedgerMessage::SealPending { response })
            .await?
    }

    /// Whether the chain hashes and links correctly
    pub async fn is_valid(&self) -> Result<bool> {
        self.request(|response| LedgerMessage::IsValid { response }).await
    }

    /// Every integrity failure in the chain
    pub async fn verify_integrity(&self) -> Result<Vec<IntegrityViolation>> {
        self.request(|response| LedgerMessage::VerifyIntegrity { response })
            .await
    }

    /// Sealed transaction by id
    pub async fn find_by_id(&self, id: impl Into<String>) -> Result<Option<Transaction>> {
        let id = id.into();
        self.request(|response| LedgerMessage::FindById { id, response })
            .await
    }

    /// Sealed transactions of a batch in chain order
    pub async fn find_by_batch(&self, batch_id: impl Into<String>) -> Result<Vec<Transaction>> {
        let batch_id = batch_id.into();
        self.request(|response| LedgerMessage::FindByBatch { batch_id, response })
            .await
    }

    /// Provenance of a product
    pub async fn resolve_provenance(
        &self,
        product_id: impl Into<String>,
    ) -> Result<Option<ProvenanceReport>> {
        let product_id = product_id.into();
        self.request(|response| LedgerMessage::ResolveProvenance {
            product_id,
            response,
        })
        .await
    }

    /// Provenance of the product labelled with a QR code
    pub async fn resolve_by_qr_code(
        &self,
        qr_code: impl Into<String>,
    ) -> Result<Option<ProvenanceReport>> {
        let qr_code = qr_code.into();
        self.request(|response| LedgerMessage::ResolveByQrCode { qr_code, response })
            .await
    }

    /// Batch history with custody verdict
    pub async fn batch_history(&self, batch_id: impl Into<String>) -> Result<BatchHistory> {
        let batch_id = batch_id.into();
        self.request(|response| LedgerMessage::BatchHistory { batch_id, response })
            .await
    }

    /// Chain status snapshot
    pub async fn health(&self) -> Result<ChainHealth> {
        self.request(|response| LedgerMessage::Health { response }).await
    }

    /// Prometheus text exposition
    pub async fn metrics_text(&self) -> Result<String> {
        self.request(|response| LedgerMessage::Metrics { response }).await
    }

    /// Shutdown actor and wait for storage to close
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|response| LedgerMessage::Shutdown { response })
            .await
    }
}

/// Spawn the ledger actor around an existing ledger
pub fn spawn_ledger_actor(
    ledger: Ledger,
    storage: Option<Storage>,
    config: &Config,
) -> Result<LedgerHandle> {
    let metrics = Metrics::new()?;
    let (tx, rx) = mpsc::channel(config.actor.mailbox_capacity); // Bounded channel for backpressure
    let seal_timeout = config.actor.seal_timeout_ms.map(Duration::from_millis);
    let actor = LedgerActor::new(ledger, storage, metrics, rx, seal_timeout);

    tokio::spawn(async move {
        actor.run().await;
    });

    Ok(LedgerHandle::new(tx))
}

/// Open the ledger described by `config` (replaying RocksDB when
/// persistence is on) and spawn its actor
pub fn open(config: &Config) -> Result<LedgerHandle> {
    config.validate()?;

    let (ledger, storage) = if config.persistence {
        let storage = Storage::open(config)?;
        let ledger = storage.load_ledger(config)?;
        (ledger, Some(storage))
    } else {
        (Ledger::new(config)?, None)
    };

    tracing::info!(
        chain_length = ledger.blocks().len(),
        pending = ledger.pending().len(),
        difficulty = config.difficulty,
        persistence = config.persistence,
        "Ledger opened"
    );

    spawn_ledger_actor(ledger, storage, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CollectionEvent, GeoLocation, TransactionKind};
    use rust_decimal::Decimal;

    fn memory_config(difficulty: usize) -> Config {
        let mut config = Config::default();
        config.persistence = false;
        config.difficulty = difficulty;
        config
    }

    fn harvest(id: &str, latitude: f64) -> Transaction {
        Transaction::new(
            id,
            TransactionKind::CollectionEvent(CollectionEvent {
                collector_id: "FARMER001".into(),
                species: "Shatavari".into(),
                location: Some(GeoLocation::new(latitude, 80.0)),
                quantity: Some(Decimal::from(12)),
                ..Default::default()
            }),
        )
    }

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let handle = open(&memory_config(1)).unwrap();
        assert!(handle.is_valid().await.unwrap());
        handle.shutdown().await.unwrap();

        assert!(matches!(
            handle.health().await,
            Err(Error::Concurrency(_))
        ));
    }

    #[tokio::test]
    async fn test_actor_add_and_seal() {
        let handle = open(&memory_config(1)).unwrap();

        handle.add_transaction(harvest("A", 20.0)).await.unwrap();
        assert!(handle.find_by_id("A").await.unwrap().is_none());

        let block = handle.seal_pending_transactions().await.unwrap();
        assert_eq!(block.transactions().len(), 1);
        assert!(block.hash.starts_with('0'));

        assert_eq!(handle.find_by_id("A").await.unwrap().unwrap().id, "A");
        let health = handle.health().await.unwrap();
        assert_eq!(health.chain_length, 2);
        assert_eq!(health.pending_transactions, 0);
        assert_eq!(health.latest_hash, block.hash);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejection_is_counted() {
        let handle = open(&memory_config(1)).unwrap();

        let err = handle.add_transaction(harvest("A", 45.0)).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(handle.health().await.unwrap().pending_transactions, 0);

        let text = handle.metrics_text().await.unwrap();
        assert!(text.contains("ledger_transactions_rejected_total{rule=\"geofence\"} 1"));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_submissions_all_sealed() {
        let handle = open(&memory_config(1)).unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle
                    .add_transaction(harvest(&format!("H{}", i), 10.0 + i as f64))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let block = handle.seal_pending_transactions().await.unwrap();
        assert_eq!(block.transactions().len(), 16);
        assert!(handle.verify_integrity().await.unwrap().is_empty());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_seal_timeout_keeps_pending() {
        let mut config = memory_config(64);
        config.actor.seal_timeout_ms = Some(20);
        let handle = open(&config).unwrap();

        handle.add_transaction(harvest("A", 20.0)).await.unwrap();
        let err = handle.seal_pending_transactions().await.unwrap_err();
        assert!(matches!(err, Error::SealTimeout { timeout_ms: 20 }));
        assert!(err.is_retryable());

        let health = handle.health().await.unwrap();
        assert_eq!(health.chain_length, 1);
        assert_eq!(health.pending_transactions, 1);

        handle.shutdown().await.unwrap();
    }
}
