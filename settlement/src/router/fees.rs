//! Rail fee computation

use crate::catalog::RailDescriptor;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Decimal places kept on fees
pub const FEE_SCALE: u32 = 8;

/// Gross/fee/net split of an amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    /// Amount requested
    pub gross: Decimal,
    /// Fee retained by the rail
    pub fee: Decimal,
    /// Amount delivered
    pub net: Decimal,
}

/// `fee = min(amount * pct + fixed, amount)`, half away from zero at 8 places
pub fn calculate_fee(amount: Decimal, rail: &RailDescriptor) -> FeeBreakdown {
    let raw = amount * rail.fee_percentage + rail.fee_fixed;
    let fee = raw
        .round_dp_with_strategy(FEE_SCALE, RoundingStrategy::MidpointAwayFromZero)
        .min(amount)
        .max(Decimal::ZERO);

    FeeBreakdown {
        gross: amount,
        fee,
        net: amount - fee,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RailCatalog;
    use crate::types::Rail;
    use rust_decimal_macros::dec;

    fn descriptor(rail: Rail) -> RailDescriptor {
        RailCatalog::default().descriptor(rail).cloned().unwrap()
    }

    #[test]
    fn test_pix_fee() {
        let fees = calculate_fee(dec!(100), &descriptor(Rail::Pix));
        assert_eq!(fees.fee, dec!(0.70));
        assert_eq!(fees.net, dec!(99.30));
    }

    #[test]
    fn test_fixed_fee_capped_at_amount() {
        let fees = calculate_fee(dec!(1), &descriptor(Rail::Wire));
        assert_eq!(fees.fee, dec!(1));
        assert_eq!(fees.net, Decimal::ZERO);
    }

    #[test]
    fn test_rounding_is_half_away_from_zero() {
        let mut rail = descriptor(Rail::Pix);
        rail.fee_percentage = dec!(0.5);
        rail.fee_fixed = Decimal::ZERO;

        // 0.000000025 is a midpoint: banker's rounding would give ...02
        let fees = calculate_fee(dec!(0.00000005), &rail);
        assert_eq!(fees.fee, dec!(0.00000003));
        assert_eq!(fees.net, dec!(0.00000002));
    }
}
