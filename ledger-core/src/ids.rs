//! Identifier issuance for new transactions
//!
//! The ledger treats every id as an opaque key; these helpers only produce
//! the shapes the rest of the supply chain expects to see.

use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use uuid::Uuid;

/// Batch id for a harvest: `BATCH-{collector}-{epoch ms}-{random}`
pub fn batch_id(collector_id: &str) -> String {
    format!(
        "BATCH-{}-{}-{}",
        collector_id,
        Utc::now().timestamp_millis(),
        random_suffix(6)
    )
}

/// Random v4 UUID for lab tests and processing steps
pub fn transaction_id() -> String {
    Uuid::new_v4().to_string()
}

/// Product id: `PROD-` plus the first 8 uuid characters, upper-cased
pub fn product_id() -> String {
    format!("PROD-{}", uuid_prefix(8))
}

/// Scannable key: `QR-` plus the first 12 uuid characters, upper-cased
pub fn qr_code() -> String {
    format!("QR-{}", uuid_prefix(12))
}

fn uuid_prefix(len: usize) -> String {
    let mut s = Uuid::new_v4().to_string();
    s.truncate(len);
    s.to_uppercase()
}

fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}
