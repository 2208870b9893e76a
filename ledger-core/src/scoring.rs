//! Sustainability scoring for harvest records

use crate::types::CollectionEvent;
use rust_decimal::Decimal;

/// Harvest above this many kilograms counts as over-harvesting
pub const OVER_HARVEST_KG: Decimal = Decimal::from_parts(50, 0, 0, false, 0);

/// Score a harvest on a 0-100 scale.
///
/// Starts at 100, loses 20 for over-harvesting and gains 10 each for organic
/// and fair-trade certification, then clamps.
pub fn sustainability_score(event: &CollectionEvent) -> u8 {
    let mut score: i32 = 100;

    if event.quantity.map_or(false, |q| q > OVER_HARVEST_KG) {
        score -= 20;
    }
    if event.organic {
        score += 10;
    }
    if event.fair_trade {
        score += 10;
    }

    score.clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(quantity: i64, organic: bool, fair_trade: bool) -> CollectionEvent {
        CollectionEvent {
            quantity: Some(Decimal::from(quantity)),
            organic,
            fair_trade,
            ..Default::default()
        }
    }

    #[test]
    fn test_small_conventional_harvest_scores_full() {
        assert_eq!(sustainability_score(&event(30, false, false)), 100);
    }

    #[test]
    fn test_over_harvest_penalty() {
        assert_eq!(sustainability_score(&event(51, false, false)), 80);
        // exactly 50 kg is not over the limit
        assert_eq!(sustainability_score(&event(50, false, false)), 100);
    }

    #[test]
    fn test_certifications_clamp_at_100() {
        assert_eq!(sustainability_score(&event(10, true, true)), 100);
        assert_eq!(sustainability_score(&event(80, true, false)), 90);
        assert_eq!(sustainability_score(&event(80, true, true)), 100);
    }

    #[test]
    fn test_missing_quantity_is_not_penalised() {
        let e = CollectionEvent::default();
        assert_eq!(sustainability_score(&e), 100);
    }
}
