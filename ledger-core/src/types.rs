//! Core transaction types for the ledger
//!
//! A [`Transaction`] carries the fields every supply-chain record shares
//! (id, timestamp, optional custody link) plus a [`TransactionKind`] payload.
//! Field names on the wire are camelCase and the payload is flattened next to
//! a `type` tag, so a quality test serializes as
//! `{"id":..,"timestamp":..,"type":"QualityTest","batchId":..,...}`.
//!
//! Measured quantities are [`Decimal`] so policy thresholds compare exactly.

use crate::{error::ValidationError, ids, scoring, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Wall-clock instant truncated to millisecond precision.
///
/// Timestamps are stored and hashed as epoch milliseconds, so anything finer
/// would not survive a storage round trip.
pub fn now_millis() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}

/// Drop sub-millisecond precision, matching the wire and storage encoding
pub fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

/// Supply-chain record submitted to the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Unique identifier (doubles as the batch id for collection events)
    pub id: String,

    /// Creation instant (epoch milliseconds on the wire)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Custody link to the preceding transaction for the same lot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_transaction_id: Option<String>,

    /// Typed payload
    #[serde(flatten)]
    pub kind: TransactionKind,
}

/// Transaction payload, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransactionKind {
    /// Harvest of raw material
    CollectionEvent(CollectionEvent),
    /// Laboratory test of a batch
    QualityTest(QualityTest),
    /// Processing applied to a batch
    ProcessingStep(ProcessingStep),
    /// Final product made from ingredient batches
    Product(Product),
}

impl TransactionKind {
    /// Wire name of the variant
    pub fn type_name(&self) -> &'static str {
        match self {
            TransactionKind::CollectionEvent(_) => "CollectionEvent",
            TransactionKind::QualityTest(_) => "QualityTest",
            TransactionKind::ProcessingStep(_) => "ProcessingStep",
            TransactionKind::Product(_) => "Product",
        }
    }

    /// All recognised `type` tags
    pub const TYPE_NAMES: [&'static str; 4] =
        ["CollectionEvent", "QualityTest", "ProcessingStep", "Product"];
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl Transaction {
    /// Create a transaction with an explicit id, stamped now
    pub fn new(id: impl Into<String>, kind: TransactionKind) -> Self {
        Self {
            id: id.into(),
            timestamp: now_millis(),
            previous_transaction_id: None,
            kind,
        }
    }

    /// Override the timestamp (truncated to whole milliseconds)
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = truncate_millis(timestamp);
        self
    }

    /// Link to the preceding transaction in the custody chain
    pub fn with_previous(mut self, previous_transaction_id: impl Into<String>) -> Self {
        self.previous_transaction_id = Some(previous_transaction_id.into());
        self
    }

    /// Record a harvest: issues a batch id and computes the sustainability score
    pub fn collection_event(mut event: CollectionEvent) -> Self {
        event.sustainability_score = scoring::sustainability_score(&event);
        let id = ids::batch_id(&event.collector_id);
        Self::new(id, TransactionKind::CollectionEvent(event))
    }

    /// Record a lab test with a fresh id
    pub fn quality_test(test: QualityTest) -> Self {
        Self::new(ids::transaction_id(), TransactionKind::QualityTest(test))
    }

    /// Record a processing step with a fresh id
    pub fn processing_step(step: ProcessingStep) -> Self {
        Self::new(ids::transaction_id(), TransactionKind::ProcessingStep(step))
    }

    /// Record a final product; its batch id is its own id and it gets a QR key
    pub fn product(mut product: Product) -> Self {
        let id = ids::product_id();
        product.batch_id = id.clone();
        if product.qr_code.is_none() {
            product.qr_code = Some(ids::qr_code());
        }
        Self::new(id, TransactionKind::Product(product))
    }

    /// Decode a submission, rejecting unrecognised `type` tags
    pub fn from_json(input: &str) -> std::result::Result<Self, ValidationError> {
        let value: serde_json::Value =
            serde_json::from_str(input).map_err(|e| ValidationError::Malformed(e.to_string()))?;

        match value.get("type").and_then(|t| t.as_str()) {
            Some(tag) if TransactionKind::TYPE_NAMES.contains(&tag) => {}
            Some(tag) => return Err(ValidationError::UnknownType(tag.to_string())),
            None => return Err(ValidationError::UnknownType("<missing>".to_string())),
        }

        serde_json::from_value(value).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    /// Canonical JSON of the full record
    pub fn canonical_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Batch this record belongs to.
    ///
    /// A collection event originates its batch, so its own id is the key.
    pub fn batch_id(&self) -> &str {
        match &self.kind {
            TransactionKind::CollectionEvent(_) => &self.id,
            TransactionKind::QualityTest(t) => &t.batch_id,
            TransactionKind::ProcessingStep(s) => &s.batch_id,
            TransactionKind::Product(p) => &p.batch_id,
        }
    }

    /// Wire name of the payload type
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Product payload, if this is a product
    pub fn as_product(&self) -> Option<&Product> {
        match &self.kind {
            TransactionKind::Product(p) => Some(p),
            _ => None,
        }
    }

    /// Collection payload, if this is a harvest record
    pub fn as_collection_event(&self) -> Option<&CollectionEvent> {
        match &self.kind {
            TransactionKind::CollectionEvent(e) => Some(e),
            _ => None,
        }
    }
}

/// Harvest location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GeoLocation {
    /// Decimal degrees north
    pub latitude: Option<f64>,
    /// Decimal degrees east
    pub longitude: Option<f64>,
    /// Free-form address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl GeoLocation {
    /// Location from coordinates
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude: Some(latitude),
            longitude: Some(longitude),
            address: None,
        }
    }
}

/// Harvest of a raw botanical
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CollectionEvent {
    /// Farmer / collector identifier
    #[serde(default)]
    pub collector_id: String,
    /// Botanical species
    #[serde(default)]
    pub species: String,
    /// Where it was harvested
    pub location: Option<GeoLocation>,
    /// Harvested quantity in kilograms
    pub quantity: Option<Decimal>,
    /// Harvest technique
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harvest_method: Option<String>,
    /// Certified organic
    #[serde(default)]
    pub organic: bool,
    /// Fair-trade certified
    #[serde(default)]
    pub fair_trade: bool,
    /// Computed score, 0-100
    #[serde(default)]
    pub sustainability_score: u8,
}

/// Laboratory test results; `value` drives threshold rules, anything else is
/// carried through untouched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TestResults {
    /// Primary measured value
    pub value: Option<Decimal>,
    /// Additional lab-specific fields
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TestResults {
    /// Results with a single measured value
    pub fn value(value: Decimal) -> Self {
        Self {
            value: Some(value),
            extra: BTreeMap::new(),
        }
    }
}

/// Lab test of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct QualityTest {
    /// Tested batch
    #[serde(default)]
    pub batch_id: String,
    /// Laboratory identifier
    #[serde(default)]
    pub lab_id: String,
    /// e.g. `moisture`, `pesticide`
    #[serde(default)]
    pub test_type: String,
    /// Measurements
    pub results: Option<TestResults>,
    /// Certificate reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    /// Lab's own verdict
    #[serde(default)]
    pub passed: bool,
}

/// Processing applied to a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStep {
    /// Processed batch
    #[serde(default)]
    pub batch_id: String,
    /// Facility identifier
    #[serde(default)]
    pub facility_id: String,
    /// e.g. `drying`, `grinding`
    #[serde(default)]
    pub process_type: String,
    /// Degrees Celsius
    pub temperature: Option<Decimal>,
    /// Hours
    pub duration: Option<Decimal>,
    /// Kilograms out
    pub output_quantity: Option<Decimal>,
    /// Operator notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Ingredient of a product, pointing back at its source batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Ingredient {
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Batch this ingredient came from
    #[serde(default)]
    pub source_batch_id: String,
    /// Share of the formulation
    pub percentage: Option<Decimal>,
}

impl Ingredient {
    /// Ingredient drawn from `source_batch_id`
    pub fn new(name: impl Into<String>, source_batch_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_batch_id: source_batch_id.into(),
            percentage: None,
        }
    }
}

/// Final product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Product name
    #[serde(default)]
    pub name: String,
    /// Same as the transaction id
    #[serde(default)]
    pub batch_id: String,
    /// Manufacturer identifier
    #[serde(default)]
    pub manufacturer_id: String,
    /// Ordered formulation; `None` means the field was not supplied
    pub ingredients: Option<Vec<Ingredient>>,
    /// Date of manufacture
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturing_date: Option<NaiveDate>,
    /// Date of expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<NaiveDate>,
    /// Opaque scannable key issued outside the ledger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
}

impl Product {
    /// Ingredients in formulation order (empty when not supplied)
    pub fn ingredients(&self) -> &[Ingredient] {
        self.ingredients.as_deref().unwrap_or(&[])
    }
}
