//! Provenance reconstruction from the ledger
//!
//! Resolution is one level deep: each direct ingredient of a product gets the
//! sealed history of its source batch. An ingredient batch that is itself a
//! product is not expanded further.

use crate::{
    custody::verify_chain_of_custody,
    ledger::Ledger,
    types::{Ingredient, Transaction},
};
use serde::{Deserialize, Serialize};

/// A product with the history of each ingredient batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceReport {
    /// The product transaction
    pub product: Transaction,
    /// One entry per ingredient, in formulation order
    pub ingredients: Vec<IngredientHistory>,
    /// Chain validity at the time the report was built
    pub blockchain_valid: bool,
}

/// An ingredient and the sealed transactions of its source batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientHistory {
    /// The ingredient as listed on the product
    pub ingredient: Ingredient,
    /// Batch transactions, oldest first
    pub history: Vec<Transaction>,
}

/// History of a single batch with its custody verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchHistory {
    /// Queried batch
    pub batch_id: String,
    /// Batch transactions, oldest first
    pub history: Vec<Transaction>,
    /// Whether each transaction links to the one before it
    pub chain_of_custody: bool,
}

/// Sealed transactions of a batch, stably sorted by timestamp
fn sorted_batch(ledger: &Ledger, batch_id: &str) -> Vec<Transaction> {
    let mut history: Vec<Transaction> = ledger
        .find_by_batch(batch_id)
        .into_iter()
        .cloned()
        .collect();
    history.sort_by_key(|tx| tx.timestamp);
    history
}

/// Assemble the provenance of `product_id`.
///
/// Returns `None` when the id is unknown or is not a product.
pub fn resolve_provenance(ledger: &Ledger, product_id: &str) -> Option<ProvenanceReport> {
    let tx = ledger.find_by_id(product_id)?;
    build_report(ledger, tx)
}

/// Assemble the provenance of the product labelled with `qr_code`.
///
/// Returns `None` when no sealed product carries the code.
pub fn resolve_by_qr_code(ledger: &Ledger, qr_code: &str) -> Option<ProvenanceReport> {
    let tx = ledger.find_by_qr_code(qr_code)?;
    build_report(ledger, tx)
}

fn build_report(ledger: &Ledger, tx: &Transaction) -> Option<ProvenanceReport> {
    let product = tx.as_product()?;

    let ingredients = product
        .ingredients()
        .iter()
        .map(|ingredient| IngredientHistory {
            ingredient: ingredient.clone(),
            history: sorted_batch(ledger, &ingredient.source_batch_id),
        })
        .collect::<Vec<_>>();

    let blockchain_valid = ledger.is_valid();
    tracing::debug!(
        product_id = %tx.id,
        ingredient_count = ingredients.len(),
        blockchain_valid,
        "Provenance resolved"
    );

    Some(ProvenanceReport {
        product: tx.clone(),
        ingredients,
        blockchain_valid,
    })
}

/// Time-ordered history of a batch plus its chain-of-custody check
pub fn batch_history(ledger: &Ledger, batch_id: &str) -> BatchHistory {
    let history = sorted_batch(ledger, batch_id);
    let chain_of_custody = verify_chain_of_custody(&history);

    BatchHistory {
        batch_id: batch_id.to_string(),
        history,
        chain_of_custody,
    }
}
