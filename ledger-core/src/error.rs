//! Error types for the provenance ledger

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Transaction rejected by a business rule
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Chain linkage or digest mismatch found while restoring or auditing
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON (canonical payload) error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage envelope encoding error
    #[error("Encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Sealing was interrupted before a digest met the difficulty target
    #[error("Seal cancelled after {attempts} nonce attempts")]
    SealCancelled {
        /// Nonces tried before the cancellation flag was observed
        attempts: u64,
    },

    /// Sealing exceeded the configured deadline; the pending set is untouched
    #[error("Seal timed out after {timeout_ms} ms")]
    SealTimeout {
        /// Deadline that was exceeded
        timeout_ms: u64,
    },
}

impl Error {
    /// Whether the caller may safely resubmit the same operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SealCancelled { .. } | Error::SealTimeout { .. } | Error::Concurrency(_)
        )
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

/// Business-rule rejection. Each variant names the rule that failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// The submission's `type` tag is not one of the four known kinds
    #[error("unknown transaction type: {0}")]
    UnknownType(String),

    /// Submission could not be decoded into a transaction
    #[error("malformed transaction: {0}")]
    Malformed(String),

    /// A required field is absent or empty
    #[error("{kind} is missing required field `{field}`")]
    MissingField {
        /// Transaction kind
        kind: &'static str,
        /// Wire name of the missing field
        field: &'static str,
    },

    /// Harvest location is outside the approved zone
    #[error("geofence: location ({latitude}, {longitude}) is outside the approved harvesting zone")]
    OutsideHarvestZone {
        /// Submitted latitude
        latitude: f64,
        /// Submitted longitude
        longitude: f64,
    },

    /// Harvesting is not permitted in the monsoon months
    #[error("seasonal restriction: harvesting not allowed during monsoon season (month {month})")]
    MonsoonSeason {
        /// Calendar month (1-12) of the event
        month: u32,
    },

    /// Moisture content above the policy limit
    #[error("moisture threshold: content {value} exceeds limit {limit}")]
    MoistureExceeded {
        /// Measured value
        value: Decimal,
        /// Policy limit
        limit: Decimal,
    },

    /// Pesticide residue above the policy limit
    #[error("pesticide threshold: residue {value} exceeds safe limit {limit}")]
    PesticideExceeded {
        /// Measured value
        value: Decimal,
        /// Policy limit
        limit: Decimal,
    },

    /// Drying temperature above the policy limit
    #[error("drying temperature: {value} exceeds safe limit {limit}")]
    DryingTemperatureExceeded {
        /// Recorded temperature
        value: Decimal,
        /// Policy limit
        limit: Decimal,
    },

    /// An ingredient does not reference a source batch
    #[error("traceability gap: ingredient `{ingredient}` has no source batch")]
    UntraceableIngredient {
        /// Ingredient name
        ingredient: String,
    },
}

impl ValidationError {
    /// Short stable rule identifier, used for metric labels and logs
    pub fn rule(&self) -> &'static str {
        match self {
            ValidationError::UnknownType(_) => "unknown_type",
            ValidationError::Malformed(_) => "malformed",
            ValidationError::MissingField { .. } => "required_field",
            ValidationError::OutsideHarvestZone { .. } => "geofence",
            ValidationError::MonsoonSeason { .. } => "monsoon_season",
            ValidationError::MoistureExceeded { .. } => "moisture_threshold",
            ValidationError::PesticideExceeded { .. } => "pesticide_threshold",
            ValidationError::DryingTemperatureExceeded { .. } => "drying_temperature",
            ValidationError::UntraceableIngredient { .. } => "ingredient_traceability",
        }
    }
}
