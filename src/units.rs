//! Unit Conversion Utilities
//!
//! Node RPC reports amounts as floating point BTC. Every conversion into
//! [`Amount`] goes through here so that NaN/Inf values are rejected instead of
//! silently turning into zero or saturating.

use bitcoin::Amount;
use thiserror::Error;

/// Satoshis per Bitcoin
pub const SATS_PER_BTC: u64 = 100_000_000;

/// Amount conversion errors
#[derive(Debug, Error, PartialEq)]
pub enum UnitsError {
    #[error("non-finite amount: {0}")]
    NonFiniteAmount(f64),

    #[error("invalid amount {value}: {reason}")]
    InvalidAmount { value: f64, reason: String },
}

/// Convert a BTC float reported by the node into an [`Amount`]
pub fn btc_to_amount(btc: f64) -> Result<Amount, UnitsError> {
    if !btc.is_finite() {
        return Err(UnitsError::NonFiniteAmount(btc));
    }
    if btc < 0.0 {
        return Err(UnitsError::InvalidAmount {
            value: btc,
            reason: "negative".to_string(),
        });
    }

    let sats = (btc * SATS_PER_BTC as f64).round();
    if !sats.is_finite() || sats > u64::MAX as f64 {
        return Err(UnitsError::NonFiniteAmount(btc));
    }

    Ok(Amount::from_sat(sats as u64))
}

/// Sum a list of BTC floats, failing on the first non-finite value
pub fn sum_btc<I>(values: I) -> Result<Amount, UnitsError>
where
    I: IntoIterator<Item = f64>,
{
    let mut total = Amount::ZERO;
    for value in values {
        let amount = btc_to_amount(value)?;
        total = total.checked_add(amount).ok_or(UnitsError::InvalidAmount {
            value,
            reason: "sum overflows".to_string(),
        })?;
    }
    Ok(total)
}

/// Exact 8-decimal BTC string, no float rounding
pub fn sats_to_btc_string(sats: u64) -> String {
    format!("{}.{:08}", sats / SATS_PER_BTC, sats % SATS_PER_BTC)
}

/// `1,000,000 sats (0.01000000 BTC)`
pub fn sats_to_display(sats: u64) -> String {
    format!("{} sats ({} BTC)", group_thousands(sats), sats_to_btc_string(sats))
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);

    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    grouped
}

/// Parse a satoshi count, ignoring `,` and `_` separators
pub fn parse_sats(s: &str) -> Option<u64> {
    s.trim().replace([',', '_'], "").parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_btc_to_amount() {
        assert_eq!(btc_to_amount(0.0).unwrap(), Amount::ZERO);
        assert_eq!(btc_to_amount(0.00000001).unwrap(), Amount::from_sat(1));
        assert_eq!(btc_to_amount(1.0).unwrap(), Amount::from_sat(100_000_000));
        assert_eq!(btc_to_amount(0.1).unwrap(), Amount::from_sat(10_000_000));
    }

    #[test]
    fn test_non_finite_rejected() {
        assert!(matches!(
            btc_to_amount(f64::NAN),
            Err(UnitsError::NonFiniteAmount(_))
        ));
        assert!(matches!(
            btc_to_amount(f64::INFINITY),
            Err(UnitsError::NonFiniteAmount(_))
        ));
        assert!(matches!(
            btc_to_amount(-1.0),
            Err(UnitsError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn test_sum_btc() {
        let total = sum_btc([0.5, 0.25, 0.00000001]).unwrap();
        assert_eq!(total, Amount::from_sat(75_000_001));

        assert!(matches!(
            sum_btc([0.5, f64::NEG_INFINITY]),
            Err(UnitsError::NonFiniteAmount(_))
        ));
    }

    #[test]
    fn test_display_format() {
        assert_eq!(sats_to_btc_string(123_456_789), "1.23456789");
        assert_eq!(sats_to_btc_string(2_100_000_000_000_000), "21000000.00000000");
        let display = sats_to_display(1_000_000);
        assert!(display.contains("1,000,000"));
        assert!(display.contains("0.01000000 BTC"));
    }

    #[test]
    fn test_parse_sats() {
        assert_eq!(parse_sats("1,000,000"), Some(1_000_000));
        assert_eq!(parse_sats("1_000"), Some(1_000));
        assert_eq!(parse_sats("invalid"), None);
    }
}
