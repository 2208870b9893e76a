//! Business-rule validation for submitted transactions
//!
//! - Required-field checks per transaction kind
//! - Harvest geofence (coarse bounding box) and optional monsoon restriction
//! - Lab thresholds (moisture, pesticide residue)
//! - Drying temperature limit
//! - Ingredient traceability
//!
//! Every check is a pure function of the transaction and a [`RulePolicy`].
//! Rejections are logged at `warn` and returned as a [`ValidationError`]
//! naming the rule.

use crate::error::ValidationError;
use crate::types::{
    CollectionEvent, ProcessingStep, Product, QualityTest, Transaction, TransactionKind,
};
use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Policy constants the rules are evaluated against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulePolicy {
    /// Approved harvesting zone
    pub harvest_zone: HarvestZone,

    /// Seasonal harvesting ban
    pub monsoon_restriction: MonsoonRestriction,

    /// Maximum moisture content (percent)
    pub moisture_max: Decimal,

    /// Maximum pesticide residue (ppm)
    pub pesticide_max: Decimal,

    /// Maximum drying temperature (Celsius)
    pub drying_max_temperature: Decimal,
}

impl Default for RulePolicy {
    fn default() -> Self {
        Self {
            harvest_zone: HarvestZone::default(),
            monsoon_restriction: MonsoonRestriction::default(),
            moisture_max: Decimal::new(12, 0),
            pesticide_max: Decimal::new(1, 2), // 0.01
            drying_max_temperature: Decimal::new(60, 0),
        }
    }
}

/// Latitude/longitude bounding box, bounds inclusive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestZone {
    /// Southern bound
    pub min_latitude: f64,
    /// Northern bound
    pub max_latitude: f64,
    /// Western bound
    pub min_longitude: f64,
    /// Eastern bound
    pub max_longitude: f64,
}

impl Default for HarvestZone {
    fn default() -> Self {
        Self {
            min_latitude: 8.0,
            max_latitude: 37.0,
            min_longitude: 68.0,
            max_longitude: 97.0,
        }
    }
}

impl HarvestZone {
    /// Whether a point lies inside the box
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&latitude)
            && (self.min_longitude..=self.max_longitude).contains(&longitude)
    }
}

/// No harvesting between `start_month` and `end_month` (1-12, inclusive).
///
/// A start later than the end wraps past December, so `11..=2` bans
/// November through February.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonsoonRestriction {
    /// Off by default
    pub enabled: bool,
    /// First restricted month
    pub start_month: u32,
    /// Last restricted month
    pub end_month: u32,
}

impl Default for MonsoonRestriction {
    fn default() -> Self {
        Self {
            enabled: false,
            start_month: 6,
            end_month: 9,
        }
    }
}

impl MonsoonRestriction {
    /// Whether harvesting at `at` is banned
    pub fn forbids(&self, at: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        let month = at.month();
        if self.start_month <= self.end_month {
            (self.start_month..=self.end_month).contains(&month)
        } else {
            month >= self.start_month || month <= self.end_month
        }
    }
}

/// Check a transaction against the policy
pub fn check(tx: &Transaction, policy: &RulePolicy) -> Result<(), ValidationError> {
    let result = match &tx.kind {
        TransactionKind::CollectionEvent(event) => check_collection_event(tx, event, policy),
        TransactionKind::QualityTest(test) => check_quality_test(test, policy),
        TransactionKind::ProcessingStep(step) => check_processing_step(step, policy),
        TransactionKind::Product(product) => check_product(product),
    };

    if let Err(ref err) = result {
        tracing::warn!(
            transaction_id = %tx.id,
            transaction_type = tx.type_name(),
            rule = err.rule(),
            "Transaction rejected: {}",
            err
        );
    }

    result
}

/// Boolean form of [`check`]
pub fn validate(tx: &Transaction, policy: &RulePolicy) -> bool {
    check(tx, policy).is_ok()
}

fn missing(kind: &'static str, field: &'static str) -> ValidationError {
    ValidationError::MissingField { kind, field }
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

fn check_collection_event(
    tx: &Transaction,
    event: &CollectionEvent,
    policy: &RulePolicy,
) -> Result<(), ValidationError> {
    const KIND: &str = "CollectionEvent";

    if is_blank(&event.collector_id) {
        return Err(missing(KIND, "collectorId"));
    }
    if is_blank(&event.species) {
        return Err(missing(KIND, "species"));
    }
    let location = event.location.as_ref().ok_or_else(|| missing(KIND, "location"))?;
    if event.quantity.map_or(true, |q| q.is_zero()) {
        return Err(missing(KIND, "quantity"));
    }

    let latitude = location.latitude.ok_or_else(|| missing(KIND, "location.latitude"))?;
    let longitude = location.longitude.ok_or_else(|| missing(KIND, "location.longitude"))?;

    if !policy.harvest_zone.contains(latitude, longitude) {
        return Err(ValidationError::OutsideHarvestZone { latitude, longitude });
    }

    if policy.monsoon_restriction.forbids(tx.timestamp) {
        return Err(ValidationError::MonsoonSeason {
            month: tx.timestamp.month(),
        });
    }

    Ok(())
}

fn check_quality_test(test: &QualityTest, policy: &RulePolicy) -> Result<(), ValidationError> {
    const KIND: &str = "QualityTest";

    if is_blank(&test.batch_id) {
        return Err(missing(KIND, "batchId"));
    }
    if is_blank(&test.test_type) {
        return Err(missing(KIND, "testType"));
    }
    let results = test.results.as_ref().ok_or_else(|| missing(KIND, "results"))?;
    if is_blank(&test.lab_id) {
        return Err(missing(KIND, "labId"));
    }

    // A result without a value can't breach a threshold.
    let Some(value) = results.value else {
        return Ok(());
    };

    match test.test_type.as_str() {
        "moisture" if value > policy.moisture_max => Err(ValidationError::MoistureExceeded {
            value,
            limit: policy.moisture_max,
        }),
        "pesticide" if value > policy.pesticide_max => Err(ValidationError::PesticideExceeded {
            value,
            limit: policy.pesticide_max,
        }),
        _ => Ok(()),
    }
}

fn check_processing_step(
    step: &ProcessingStep,
    policy: &RulePolicy,
) -> Result<(), ValidationError> {
    const KIND: &str = "ProcessingStep";

    if is_blank(&step.batch_id) {
        return Err(missing(KIND, "batchId"));
    }
    if is_blank(&step.process_type) {
        return Err(missing(KIND, "processType"));
    }
    if is_blank(&step.facility_id) {
        return Err(missing(KIND, "facilityId"));
    }

    match step.temperature {
        Some(t) if step.process_type == "drying" && t > policy.drying_max_temperature => {
            Err(ValidationError::DryingTemperatureExceeded {
                value: t,
                limit: policy.drying_max_temperature,
            })
        }
        _ => Ok(()),
    }
}

fn check_product(product: &Product) -> Result<(), ValidationError> {
    const KIND: &str = "Product";

    if is_blank(&product.name) {
        return Err(missing(KIND, "name"));
    }
    if is_blank(&product.batch_id) {
        return Err(missing(KIND, "batchId"));
    }
    let ingredients = product
        .ingredients
        .as_ref()
        .ok_or_else(|| missing(KIND, "ingredients"))?;
    if is_blank(&product.manufacturer_id) {
        return Err(missing(KIND, "manufacturerId"));
    }

    if let Some(gap) = ingredients.iter().find(|i| is_blank(&i.source_batch_id)) {
        return Err(ValidationError::UntraceableIngredient {
            ingredient: gap.name.clone(),
        });
    }

    Ok(())
}
