//! Exact decimal parsing for amounts crossing the API boundary.
//!
//! Amounts arrive as decimal strings and stay [`Decimal`] from parsing
//! through persistence. Binary floating point never touches them.

use rust_decimal::Decimal;

use crate::{Result, SettlementError, constants};

/// Parse a strictly positive decimal amount.
///
/// Rejects exponents, signs other than a leading `-` (which then fails the
/// positivity check), more than [`constants::AMOUNT_PRECISION`]
/// fractional digits rather than silently rounding, and magnitudes above
/// [`constants::MAX_AMOUNT`].
pub fn parse_positive(field: &str, raw: &str) -> Result<Decimal> {
    let value = parse_exact(field, raw)?;
    if value <= Decimal::ZERO {
        return Err(SettlementError::Validation {
            reason: format!("{field} must be greater than zero, got {raw}"),
        });
    }
    Ok(value)
}

/// Parse a decimal amount that may be zero (e.g. an uncapped maximum).
pub fn parse_non_negative(field: &str, raw: &str) -> Result<Decimal> {
    let value = parse_exact(field, raw)?;
    if value.is_sign_negative() && !value.is_zero() {
        return Err(SettlementError::Validation {
            reason: format!("{field} must not be negative, got {raw}"),
        });
    }
    Ok(value)
}

fn parse_exact(field: &str, raw: &str) -> Result<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SettlementError::Validation {
            reason: format!("{field} is required"),
        });
    }
    if trimmed.contains(['e', 'E', '_']) {
        return Err(SettlementError::Validation {
            reason: format!("{field} must be a plain decimal string, got {raw}"),
        });
    }
    let value = Decimal::from_str_exact(trimmed).map_err(|e| SettlementError::Validation {
        reason: format!("{field} is not a valid decimal ({raw}): {e}"),
    })?;
    if value.scale() > constants::AMOUNT_PRECISION {
        return Err(SettlementError::Validation {
            reason: format!(
                "{field} has more than {} decimal places: {raw}",
                constants::AMOUNT_PRECISION
            ),
        });
    }
    ensure_bounded(field, value)?;
    Ok(value.normalize())
}

/// Reject a magnitude above [`constants::MAX_AMOUNT`].
pub fn ensure_bounded(field: &str, value: Decimal) -> Result<()> {
    if value.abs() > Decimal::from(constants::MAX_AMOUNT) {
        return Err(SettlementError::Validation {
            reason: format!("{field} exceeds the maximum of {}", constants::MAX_AMOUNT),
        });
    }
    Ok(())
}

/// `a * b`, normalized. Overflow is a `Validation` error, never a panic.
pub fn checked_mul(field: &str, a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_mul(b)
        .map(|v| v.normalize())
        .ok_or_else(|| overflow(field))
}

/// `a + b`. Overflow is a `Validation` error, never a panic.
pub fn checked_add(field: &str, a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_add(b).ok_or_else(|| overflow(field))
}

fn overflow(field: &str) -> SettlementError {
    SettlementError::Validation {
        reason: format!("{field} overflows the supported decimal range"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_decimals() {
        assert_eq!(parse_positive("quantity", "50").unwrap(), Decimal::new(50, 0));
        assert_eq!(
            parse_positive("price", "0.000001").unwrap(),
            Decimal::new(1, 6)
        );
        assert_eq!(parse_positive("price", " 10.50 ").unwrap(), Decimal::new(105, 1));
    }

    #[test]
    fn rejects_zero_and_negative_when_positive_required() {
        assert!(parse_positive("quantity", "0").is_err());
        assert!(parse_positive("quantity", "-1").is_err());
    }

    #[test]
    fn non_negative_accepts_zero() {
        assert_eq!(parse_non_negative("maximum", "0").unwrap(), Decimal::ZERO);
        assert!(parse_non_negative("maximum", "-0.1").is_err());
    }

    #[test]
    fn rejects_malformed_input() {
        for raw in ["", "abc", "1e3", "1_000", "1.2.3", "NaN"] {
            let err = parse_positive("amount", raw).unwrap_err();
            assert!(
                matches!(err, SettlementError::Validation { .. }),
                "{raw:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn rejects_excess_precision() {
        assert!(parse_positive("amount", "0.0000000000000001").is_err());
        assert!(parse_positive("amount", "0.000000000000001").is_ok());
    }

    #[test]
    fn rejects_magnitudes_above_the_bound() {
        let err = parse_positive("quantity", "79228162514264337593543950335").unwrap_err();
        assert!(matches!(err, SettlementError::Validation { .. }), "{err:?}");
        assert!(parse_positive("quantity", "100000000000000.5").is_err());
        assert_eq!(
            parse_positive("quantity", "100000000000000").unwrap(),
            Decimal::from(constants::MAX_AMOUNT)
        );
    }

    #[test]
    fn checked_arithmetic_reports_overflow() {
        assert!(matches!(
            checked_mul("total", Decimal::MAX, Decimal::TWO),
            Err(SettlementError::Validation { .. })
        ));
        assert!(matches!(
            checked_add("total", Decimal::MAX, Decimal::ONE),
            Err(SettlementError::Validation { .. })
        ));
        let bound = Decimal::from(constants::MAX_AMOUNT);
        assert_eq!(
            checked_mul("total", bound, bound).unwrap(),
            Decimal::from(10_u128.pow(28))
        );
        assert_eq!(
            checked_mul("total", Decimal::new(50, 0), Decimal::new(100, 1)).unwrap(),
            Decimal::new(500, 0)
        );
    }

    #[test]
    fn no_float_rounding() {
        let a = parse_positive("a", "0.1").unwrap();
        let b = parse_positive("b", "0.2").unwrap();
        assert_eq!(a + b, parse_positive("c", "0.3").unwrap());
    }
}
