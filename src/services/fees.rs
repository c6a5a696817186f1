use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// Default marketplace commission, in percent.
pub const DEFAULT_PLATFORM_FEE_PERCENT: Decimal = Decimal::TEN;

/// Largest amount the `decimal(12, 2)` money columns hold.
pub const MAX_MONEY: Decimal = dec!(9999999999.99);

/// Revenue split of one line item between marketplace and seller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeSplit {
    pub platform_fee: Decimal,
    pub seller_earnings: Decimal,
}

/// Rounds to cents, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Splits `amount` into platform fee and seller earnings.
///
/// Both figures are rounded independently. For amounts carrying more than
/// two decimals (`33.335` at 10% gives `3.33` + `30.01`) the halves may
/// differ from the input by a cent; cent amounts always add up.
pub fn calculate_fee(amount: Decimal, percent: Decimal) -> Result<FeeSplit, ServiceError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(ServiceError::InvalidInput(format!(
            "Fee amount cannot be negative: {}",
            amount
        )));
    }
    if percent.is_sign_negative() && !percent.is_zero() {
        return Err(ServiceError::InvalidInput(format!(
            "Fee percentage cannot be negative: {}",
            percent
        )));
    }

    let gross = amount.checked_mul(percent).ok_or_else(|| {
        ServiceError::InvalidInput(format!("Fee amount out of range: {}", amount))
    })?;
    let platform_fee = round_money(gross / Decimal::ONE_HUNDRED);
    let seller_earnings = round_money(amount - platform_fee);

    Ok(FeeSplit {
        platform_fee,
        seller_earnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case(dec!(100.00), dec!(10), dec!(10.00), dec!(90.00))]
    #[case(dec!(33.33), dec!(10), dec!(3.33), dec!(30.00))]
    #[case(dec!(40.00), dec!(10), dec!(4.00), dec!(36.00))]
    #[case(dec!(0.05), dec!(10), dec!(0.01), dec!(0.04))]
    #[case(dec!(19.99), dec!(0), dec!(0.00), dec!(19.99))]
    #[case(dec!(0), dec!(10), dec!(0.00), dec!(0.00))]
    fn splits_line_amounts(
        #[case] amount: Decimal,
        #[case] percent: Decimal,
        #[case] fee: Decimal,
        #[case] earnings: Decimal,
    ) {
        let split = calculate_fee(amount, percent).unwrap();
        assert_eq!(split.platform_fee, fee);
        assert_eq!(split.seller_earnings, earnings);
    }

    #[test]
    fn independent_rounding_drifts_only_below_a_cent() {
        let split = calculate_fee(dec!(33.33), DEFAULT_PLATFORM_FEE_PERCENT).unwrap();
        assert_eq!(split.platform_fee + split.seller_earnings, dec!(33.33));

        let split = calculate_fee(dec!(33.335), DEFAULT_PLATFORM_FEE_PERCENT).unwrap();
        assert_eq!(split.platform_fee, dec!(3.33));
        assert_eq!(split.seller_earnings, dec!(30.01));
    }

    #[test]
    fn rejects_negative_amounts() {
        assert_matches!(
            calculate_fee(dec!(-1.00), dec!(10)),
            Err(ServiceError::InvalidInput(_))
        );
        assert_matches!(
            calculate_fee(dec!(1.00), dec!(-10)),
            Err(ServiceError::InvalidInput(_))
        );
    }

    #[test]
    fn oversized_amount_is_rejected_instead_of_overflowing() {
        assert_matches!(
            calculate_fee(Decimal::MAX, dec!(10)),
            Err(ServiceError::InvalidInput(_))
        );
    }

    proptest! {
        #[test]
        fn split_never_drifts_more_than_a_cent(cents in 0i64..10_000_000, pct in 0u32..=100) {
            let amount = Decimal::new(cents, 2);
            let split = calculate_fee(amount, Decimal::from(pct)).unwrap();
            prop_assert!(split.platform_fee >= Decimal::ZERO);
            prop_assert!(split.seller_earnings >= Decimal::ZERO);
            prop_assert!(split.platform_fee.scale() <= 2);
            prop_assert!(split.seller_earnings.scale() <= 2);
            prop_assert!((split.platform_fee + split.seller_earnings - amount).abs() <= dec!(0.01));
        }
    }
}
