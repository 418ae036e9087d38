//! Pricing engine.
//!
//! Pure functions over `rust_decimal`: effective unit price, subtotal over the
//! selected lines, threshold-based shipping, half-up rounded tax and the
//! order total. Nothing here touches the database; the cart snapshot and the
//! order creation pipeline both call into it with fresh catalog prices.

use crate::{config::PricingConfig, errors::ServiceError};
use chrono::{DateTime, Utc};
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Decimal places of a currency's minor unit, plus the conversions between
/// decimal amounts and the integer minor units used for storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinorUnits(u32);

impl MinorUnits {
    pub fn new(places: u32) -> Self {
        Self(places)
    }

    pub fn places(&self) -> u32 {
        self.0
    }

    /// Rounds half-up (midpoint away from zero) to the minor unit.
    pub fn round(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.0, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Converts an amount to integer minor units. Amounts finer than the minor
    /// unit are rejected rather than silently rounded.
    pub fn to_minor(&self, amount: Decimal) -> Result<i64, ServiceError> {
        if amount.normalize().scale() > self.0 {
            return Err(ServiceError::ValidationError(format!(
                "amount {} has more than {} decimal places",
                amount, self.0
            )));
        }
        let out_of_range =
            || ServiceError::ValidationError(format!("amount {} is out of range", amount));
        let factor = Decimal::from(10i64.pow(self.0));
        amount
            .checked_mul(factor)
            .and_then(|scaled| scaled.trunc().to_i64())
            .ok_or_else(out_of_range)
    }

    pub fn from_minor(&self, minor: i64) -> Decimal {
        Decimal::new(minor, self.0)
    }
}

/// Catalog price fields that determine what a unit actually costs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPrice {
    pub unit_price: Decimal,
    pub discount_price: Option<Decimal>,
    pub discount_expiry: Option<DateTime<Utc>>,
}

impl ProductPrice {
    /// A discount applies only while it is positive, below the list price and
    /// not past its expiry.
    pub fn discount_is_active(&self, now: DateTime<Utc>) -> bool {
        match self.discount_price {
            Some(discount) => {
                discount > Decimal::ZERO
                    && discount < self.unit_price
                    && self.discount_expiry.map_or(true, |expiry| now < expiry)
            }
            None => false,
        }
    }

    pub fn effective_unit_price(&self, now: DateTime<Utc>) -> Decimal {
        match self.discount_price {
            Some(discount) if self.discount_is_active(now) => discount,
            _ => self.unit_price,
        }
    }
}

/// One selected cart line, priced at the current effective unit price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub unit_price: Decimal,
    pub quantity: i32,
}

impl PricedLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub subtotal: Decimal,
    pub shipping_fee: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

impl PriceBreakdown {
    pub fn zero() -> Self {
        Self {
            subtotal: Decimal::ZERO,
            shipping_fee: Decimal::ZERO,
            tax: Decimal::ZERO,
            discount: Decimal::ZERO,
            total: Decimal::ZERO,
        }
    }

    /// Checks `total == subtotal + shipping_fee + tax - discount` exactly.
    pub fn verify(&self) -> Result<(), ServiceError> {
        let expected = self.subtotal + self.shipping_fee + self.tax - self.discount;
        if expected == self.total {
            Ok(())
        } else {
            Err(ServiceError::IntegrityViolation(format!(
                "order total {} does not match components (expected {})",
                self.total, expected
            )))
        }
    }
}

/// Shipping and tax policy.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingPolicy {
    pub free_shipping_threshold: Decimal,
    pub flat_shipping_fee: Decimal,
    pub tax_rate: Decimal,
    pub minor_units: MinorUnits,
}

impl From<&PricingConfig> for PricingPolicy {
    fn from(cfg: &PricingConfig) -> Self {
        Self {
            free_shipping_threshold: cfg.free_shipping_threshold,
            flat_shipping_fee: cfg.flat_shipping_fee,
            tax_rate: cfg.tax_rate,
            minor_units: MinorUnits::new(cfg.minor_units),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PricingEngine {
    policy: PricingPolicy,
}

impl PricingEngine {
    pub fn new(policy: PricingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PricingPolicy {
        &self.policy
    }

    pub fn minor_units(&self) -> MinorUnits {
        self.policy.minor_units
    }

    pub fn shipping_fee(&self, subtotal: Decimal) -> Decimal {
        if subtotal >= self.policy.free_shipping_threshold {
            Decimal::ZERO
        } else {
            self.policy.flat_shipping_fee
        }
    }

    pub fn tax(&self, subtotal: Decimal) -> Decimal {
        self.policy.minor_units.round(subtotal * self.policy.tax_rate)
    }

    /// Prices the given selected lines. An empty selection costs nothing,
    /// shipping included.
    pub fn quote(&self, lines: &[PricedLine], discount: Decimal) -> PriceBreakdown {
        if lines.is_empty() {
            return PriceBreakdown {
                discount,
                total: -discount,
                ..PriceBreakdown::zero()
            };
        }

        let subtotal: Decimal = lines.iter().map(PricedLine::line_total).sum();
        let shipping_fee = self.shipping_fee(subtotal);
        let tax = self.tax(subtotal);
        let total = subtotal + shipping_fee + tax - discount;

        PriceBreakdown {
            subtotal,
            shipping_fee,
            tax,
            discount,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn scenario_engine() -> PricingEngine {
        PricingEngine::new(PricingPolicy {
            free_shipping_threshold: dec!(250000),
            flat_shipping_fee: dec!(15000),
            tax_rate: dec!(0.11),
            minor_units: MinorUnits::new(0),
        })
    }

    fn line(price: Decimal, quantity: i32) -> PricedLine {
        PricedLine {
            product_id: Uuid::new_v4(),
            unit_price: price,
            quantity,
        }
    }

    #[test]
    fn below_threshold_pays_flat_shipping() {
        // Item B (50,000, unselected) is not passed in at all.
        let quote = scenario_engine().quote(&[line(dec!(100000), 2)], Decimal::ZERO);

        assert_eq!(quote.subtotal, dec!(200000));
        assert_eq!(quote.shipping_fee, dec!(15000));
        assert_eq!(quote.tax, dec!(22000));
        assert_eq!(quote.total, dec!(237000));
        assert!(quote.verify().is_ok());
    }

    #[test]
    fn reaching_threshold_ships_free() {
        let quote = scenario_engine().quote(&[line(dec!(100000), 3)], Decimal::ZERO);

        assert_eq!(quote.subtotal, dec!(300000));
        assert_eq!(quote.shipping_fee, Decimal::ZERO);
        assert_eq!(quote.tax, dec!(33000));
        assert_eq!(quote.total, dec!(333000));
    }

    #[test]
    fn threshold_is_inclusive() {
        let quote = scenario_engine().quote(&[line(dec!(250000), 1)], Decimal::ZERO);
        assert_eq!(quote.shipping_fee, Decimal::ZERO);
    }

    #[test]
    fn empty_selection_costs_nothing() {
        let quote = scenario_engine().quote(&[], Decimal::ZERO);
        assert_eq!(quote, PriceBreakdown::zero());
    }

    #[test]
    fn discount_is_subtracted_from_total() {
        let quote = scenario_engine().quote(&[line(dec!(100000), 2)], dec!(7000));
        assert_eq!(quote.total, dec!(230000));
        assert!(quote.verify().is_ok());
    }

    #[rstest]
    #[case(dec!(10.05), dec!(0.10), dec!(1.01))] // 1.005 rounds up
    #[case(dec!(10.04), dec!(0.10), dec!(1.00))] // 1.004 rounds down
    #[case(dec!(0.05), dec!(0.10), dec!(0.01))] // 0.005 rounds up
    #[case(dec!(19.99), dec!(0.0875), dec!(1.75))] // 1.749125
    fn tax_rounds_half_up_to_cents(
        #[case] subtotal: Decimal,
        #[case] rate: Decimal,
        #[case] expected: Decimal,
    ) {
        let engine = PricingEngine::new(PricingPolicy {
            free_shipping_threshold: dec!(50),
            flat_shipping_fee: dec!(10),
            tax_rate: rate,
            minor_units: MinorUnits::new(2),
        });
        assert_eq!(engine.tax(subtotal), expected);
    }

    #[test]
    fn tampered_total_fails_verification() {
        let mut quote = scenario_engine().quote(&[line(dec!(100000), 2)], Decimal::ZERO);
        quote.total += dec!(1);
        assert!(matches!(
            quote.verify(),
            Err(ServiceError::IntegrityViolation(_))
        ));
    }

    #[test]
    fn active_discount_is_used() {
        let now = Utc::now();
        let price = ProductPrice {
            unit_price: dec!(100),
            discount_price: Some(dec!(80)),
            discount_expiry: Some(now + Duration::days(1)),
        };
        assert_eq!(price.effective_unit_price(now), dec!(80));
    }

    #[test]
    fn discount_without_expiry_never_lapses() {
        let price = ProductPrice {
            unit_price: dec!(100),
            discount_price: Some(dec!(80)),
            discount_expiry: None,
        };
        assert_eq!(price.effective_unit_price(Utc::now()), dec!(80));
    }

    #[rstest]
    #[case::expired(Some(dec!(80)), Some(-1))]
    #[case::expires_exactly_now(Some(dec!(80)), Some(0))]
    #[case::not_below_list(Some(dec!(100)), None)]
    #[case::above_list(Some(dec!(120)), None)]
    #[case::zero(Some(dec!(0)), None)]
    #[case::negative(Some(dec!(-5)), None)]
    #[case::absent(None, None)]
    fn inactive_discount_falls_back_to_list_price(
        #[case] discount: Option<Decimal>,
        #[case] expiry_offset_days: Option<i64>,
    ) {
        let now = Utc::now();
        let price = ProductPrice {
            unit_price: dec!(100),
            discount_price: discount,
            discount_expiry: expiry_offset_days.map(|d| now + Duration::days(d)),
        };
        assert_eq!(price.effective_unit_price(now), dec!(100));
    }

    #[test]
    fn minor_unit_round_trip() {
        let cents = MinorUnits::new(2);
        assert_eq!(cents.to_minor(dec!(19.99)).unwrap(), 1999);
        assert_eq!(cents.to_minor(dec!(20)).unwrap(), 2000);
        assert_eq!(cents.from_minor(1999), dec!(19.99));

        let whole = MinorUnits::new(0);
        assert_eq!(whole.to_minor(dec!(237000)).unwrap(), 237000);
        assert_eq!(whole.from_minor(237000), dec!(237000));
    }

    #[test]
    fn amounts_finer_than_minor_unit_are_rejected() {
        let cents = MinorUnits::new(2);
        assert!(cents.to_minor(dec!(19.999)).is_err());
        // trailing zeros are fine
        assert_eq!(cents.to_minor(dec!(19.9900)).unwrap(), 1999);
    }

    #[rstest]
    #[case::decimal_max(Decimal::MAX, 2)]
    #[case::beyond_i64(dec!(100000000000000000000), 0)]
    fn amounts_too_large_for_storage_are_rejected(#[case] amount: Decimal, #[case] places: u32) {
        let err = MinorUnits::new(places).to_minor(amount).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::ValidationError(ref msg) if msg.contains("out of range")
        ));
    }
}
