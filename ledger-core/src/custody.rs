//! Chain-of-custody linkage check

use crate::types::Transaction;

/// True when every transaction names its immediate predecessor in
/// `previous_transaction_id`. Empty and single-element sequences pass.
pub fn verify_chain_of_custody(transactions: &[Transaction]) -> bool {
    transactions.windows(2).all(|pair| {
        pair[1].previous_transaction_id.as_deref() == Some(pair[0].id.as_str())
    })
}
