//! Monetary amounts as integer base units (6 decimals, USDC-style).
//!
//! Seed files and config carry human decimal strings ("5.00"); everything the
//! ledger stores, compares, or subtracts is a `u64` in base units.

use crate::constants::ASSET_DECIMALS;
use crate::error::SponsorError;

/// Parse a decimal amount string ("5", "0.10", "$1.25") into base units.
pub fn parse_amount(amount: &str) -> Result<u64, SponsorError> {
    // Strip non-numeric characters (except '.') -- handles "$0.10", "0.10", "$5", etc.
    let cleaned: String = amount
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    if cleaned.is_empty() {
        return Err(SponsorError::MalformedPayload(format!(
            "invalid amount '{amount}': no numeric content"
        )));
    }

    // Integer-only parsing: split on decimal point, compute from parts.
    // No f64 anywhere in the pipeline.
    match cleaned.split_once('.') {
        Some((integer_part, fractional_part)) => {
            let integer: u64 = if integer_part.is_empty() {
                0
            } else {
                integer_part.parse::<u64>().map_err(|e| {
                    SponsorError::MalformedPayload(format!(
                        "invalid amount '{amount}': integer part: {e}"
                    ))
                })?
            };

            // Truncate the fractional part past ASSET_DECIMALS digits
            let decimals = ASSET_DECIMALS as usize;
            let frac_str = if fractional_part.len() >= decimals {
                &fractional_part[..decimals]
            } else {
                fractional_part
            };

            let fractional: u64 = if frac_str.is_empty() {
                0
            } else {
                frac_str.parse::<u64>().map_err(|e| {
                    SponsorError::MalformedPayload(format!(
                        "invalid amount '{amount}': fractional part: {e}"
                    ))
                })?
            };

            // Scale the fractional part if it had fewer digits than ASSET_DECIMALS
            let scale = 10u64.pow((decimals - frac_str.len()) as u32);

            let multiplier = 10u64.pow(ASSET_DECIMALS);
            let whole = integer.checked_mul(multiplier).ok_or_else(|| {
                SponsorError::MalformedPayload(format!("invalid amount '{amount}': overflow"))
            })?;
            let frac = fractional.checked_mul(scale).ok_or_else(|| {
                SponsorError::MalformedPayload(format!("invalid amount '{amount}': overflow"))
            })?;
            whole.checked_add(frac).ok_or_else(|| {
                SponsorError::MalformedPayload(format!("invalid amount '{amount}': overflow"))
            })
        }
        None => {
            // No decimal point -- whole units
            let integer: u64 = cleaned.parse::<u64>().map_err(|e| {
                SponsorError::MalformedPayload(format!("invalid amount '{amount}': {e}"))
            })?;
            let multiplier = 10u64.pow(ASSET_DECIMALS);
            integer.checked_mul(multiplier).ok_or_else(|| {
                SponsorError::MalformedPayload(format!("invalid amount '{amount}': overflow"))
            })
        }
    }
}

/// Render base units as a decimal string for wire payloads and logs.
/// Keeps at least two fractional digits ("5.00", "0.10") and all
/// significant digits beyond that ("1.234567").
pub fn format_amount(base_units: u64) -> String {
    let multiplier = 10u64.pow(ASSET_DECIMALS);
    let whole = base_units / multiplier;
    let frac = base_units % multiplier;

    let mut frac_str = format!("{frac:0width$}", width = ASSET_DECIMALS as usize);
    while frac_str.len() > 2 && frac_str.ends_with('0') {
        frac_str.pop();
    }
    format!("{whole}.{frac_str}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dollar_amount() {
        assert_eq!(parse_amount("$0.10").unwrap(), 100_000);
    }

    #[test]
    fn test_parse_numeric_amount() {
        assert_eq!(parse_amount("5.00").unwrap(), 5_000_000);
    }

    #[test]
    fn test_parse_whole_units() {
        assert_eq!(parse_amount("10").unwrap(), 10_000_000);
    }

    #[test]
    fn test_parse_bare_fraction() {
        assert_eq!(parse_amount(".5").unwrap(), 500_000);
    }

    #[test]
    fn test_parse_truncates_excess_precision() {
        assert_eq!(parse_amount("0.1234567").unwrap(), 123_456);
    }

    #[test]
    fn test_parse_pads_short_fraction() {
        assert_eq!(parse_amount("2.5").unwrap(), 2_500_000);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_amount("free").is_err());
        assert!(parse_amount("").is_err());
    }

    #[test]
    fn test_parse_rejects_overflow() {
        assert!(parse_amount("99999999999999999999").is_err());
    }

    #[test]
    fn test_format_two_digit_minimum() {
        assert_eq!(format_amount(5_000_000), "5.00");
        assert_eq!(format_amount(100_000), "0.10");
        assert_eq!(format_amount(0), "0.00");
    }

    #[test]
    fn test_format_keeps_significant_digits() {
        assert_eq!(format_amount(1_234_567), "1.234567");
        assert_eq!(format_amount(2_500_000), "2.50");
    }

    #[test]
    fn test_roundtrip() {
        for units in [0u64, 1, 100_000, 5_000_000, 1_234_567] {
            assert_eq!(parse_amount(&format_amount(units)).unwrap(), units);
        }
    }
}
