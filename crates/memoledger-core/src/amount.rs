//! Exact decimal-to-minor-unit arithmetic
//!
//! User-entered prices and tips are parsed straight into integer minor units.
//! No binary floating point is involved at any step.

use crate::error::{LedgerError, Result};
use crate::types::Amount;

/// Largest precision representable in a `u128` amount
pub const MAX_DECIMALS: u32 = 38;

/// Parse a non-negative decimal string into minor units.
///
/// Accepted forms: `12`, `12.`, `12.5`, `.5`. Signs, exponents, separators
/// and more than `decimals` fractional digits are rejected.
pub fn parse_amount(text: &str, decimals: u32) -> Result<Amount> {
    if decimals > MAX_DECIMALS {
        return Err(LedgerError::invalid_amount(format!(
            "precision {} exceeds {}",
            decimals, MAX_DECIMALS
        )));
    }

    let text = text.trim();
    if text.is_empty() {
        return Err(LedgerError::invalid_amount("empty amount"));
    }

    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i, f),
        None => (text, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(LedgerError::invalid_amount(format!("`{}` has no digits", text)));
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(LedgerError::invalid_amount(format!("`{}` is not a decimal", text)));
    }
    if frac_part.len() > decimals as usize {
        return Err(LedgerError::invalid_amount(format!(
            "`{}` has more than {} fractional digits",
            text, decimals
        )));
    }

    let overflow = || LedgerError::invalid_amount(format!("`{}` is too large", text));
    let scale = 10u128.pow(decimals);

    let mut whole: u128 = 0;
    for b in int_part.bytes() {
        whole = whole
            .checked_mul(10)
            .and_then(|w| w.checked_add(u128::from(b - b'0')))
            .ok_or_else(overflow)?;
    }

    let mut frac: u128 = 0;
    for b in frac_part.bytes() {
        frac = frac * 10 + u128::from(b - b'0');
    }
    frac *= 10u128.pow(decimals - frac_part.len() as u32);

    whole
        .checked_mul(scale)
        .and_then(|w| w.checked_add(frac))
        .map(Amount)
        .ok_or_else(overflow)
}

/// Compute `price + tip` in minor units. A missing or blank tip counts as zero.
pub fn compute_total(price: &str, tip: Option<&str>, decimals: u32) -> Result<Amount> {
    let price = parse_amount(price, decimals)?;
    let tip = match tip {
        Some(t) if !t.trim().is_empty() => parse_amount(t, decimals)?,
        _ => Amount::ZERO,
    };

    price
        .checked_add(tip)
        .ok_or_else(|| LedgerError::invalid_amount("total overflows"))
}

/// Render minor units as a decimal string, trimming trailing zeros but
/// keeping at least one fractional digit (`1000000000000000` -> `0.001`).
pub fn format_amount(amount: Amount, decimals: u32) -> String {
    let decimals = decimals.min(MAX_DECIMALS);
    if decimals == 0 {
        return amount.0.to_string();
    }

    let scale = 10u128.pow(decimals);
    let whole = amount.0 / scale;
    let frac = amount.0 % scale;

    let mut frac_digits = format!("{:0width$}", frac, width = decimals as usize);
    while frac_digits.len() > 1 && frac_digits.ends_with('0') {
        frac_digits.pop();
    }

    format!("{}.{}", whole, frac_digits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const WEI: u32 = 18;

    #[test]
    fn test_parse_basic() {
        assert_eq!(parse_amount("1", WEI).unwrap(), Amount(1_000_000_000_000_000_000));
        assert_eq!(parse_amount("0.001", WEI).unwrap(), Amount(1_000_000_000_000_000));
        assert_eq!(parse_amount(".5", WEI).unwrap(), Amount(500_000_000_000_000_000));
        assert_eq!(parse_amount("2.", WEI).unwrap(), Amount(2_000_000_000_000_000_000));
        assert_eq!(parse_amount(" 0.000 ", WEI).unwrap(), Amount::ZERO);
        assert_eq!(
            parse_amount("0.000000000000000001", WEI).unwrap(),
            Amount(1)
        );
    }

    #[test]
    fn test_parse_rejects() {
        for bad in ["", ".", "-1", "+1", "1e3", "1.2.3", "abc", "1,000", "0x10"] {
            assert!(
                matches!(parse_amount(bad, WEI), Err(LedgerError::InvalidAmount(_))),
                "`{}` should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_parse_precision_limit() {
        assert!(parse_amount("0.0000000000000000001", WEI).is_err());
        assert_eq!(parse_amount("1.25", 2).unwrap(), Amount(125));
        assert!(parse_amount("1.255", 2).is_err());
    }

    #[test]
    fn test_parse_overflow() {
        let huge = "1".repeat(40);
        assert!(parse_amount(&huge, WEI).is_err());
        assert!(parse_amount("1", 39).is_err());
    }

    #[test]
    fn test_compute_total() {
        let total = compute_total("0.001", Some("0.001"), WEI).unwrap();
        assert_eq!(total, Amount(2_000_000_000_000_000));

        let no_tip = compute_total("0.003", None, WEI).unwrap();
        assert_eq!(no_tip, Amount(3_000_000_000_000_000));

        let blank_tip = compute_total("0.003", Some("  "), WEI).unwrap();
        assert_eq!(blank_tip, no_tip);

        assert!(compute_total("0.001", Some("-0.001"), WEI).is_err());
    }

    #[test]
    fn test_classic_float_drift_is_exact() {
        // 0.1 + 0.2 drifts in binary floating point
        let total = compute_total("0.1", Some("0.2"), WEI).unwrap();
        assert_eq!(total, parse_amount("0.3", WEI).unwrap());
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(Amount(1_000_000_000_000_000), WEI), "0.001");
        assert_eq!(format_amount(Amount(1_000_000_000_000_000_000), WEI), "1.0");
        assert_eq!(format_amount(Amount::ZERO, WEI), "0.0");
        assert_eq!(format_amount(Amount(125), 2), "1.25");
        assert_eq!(format_amount(Amount(125), 0), "125");
    }

    fn random_decimal(rng: &mut StdRng) -> (String, u128) {
        let whole: u64 = rng.gen_range(0..1_000_000);
        let frac_len = rng.gen_range(0..=WEI as usize);
        let frac: String = (0..frac_len)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect();

        let mut expected = u128::from(whole) * 10u128.pow(WEI);
        if frac_len > 0 {
            let digits: u128 = frac.parse().unwrap();
            expected += digits * 10u128.pow(WEI - frac_len as u32);
        }

        let text = if frac_len == 0 {
            whole.to_string()
        } else {
            format!("{}.{}", whole, frac)
        };
        (text, expected)
    }

    #[test]
    fn test_randomized_totals_are_exact() {
        let mut rng = StdRng::seed_from_u64(0x5eed_cafe);
        for _ in 0..1000 {
            let (price, price_units) = random_decimal(&mut rng);
            let (tip, tip_units) = random_decimal(&mut rng);

            let total = compute_total(&price, Some(tip.as_str()), WEI).unwrap();
            assert_eq!(total.minor_units(), price_units + tip_units, "{} + {}", price, tip);
        }
    }
}
