//! Phred conversions and the compact decimal rendering used by every text
//! output of the genotyper.

/// Number of significant digits used when rendering floating-point values.
const SIGNIFICANT_DIGITS: i32 = 6;

/// Probability that a base call is correct given its raw Phred score.
///
/// `p = 1 - 10^(-Q/10)`
#[inline]
pub fn phred_to_probability(phred: u8) -> f64 {
    1.0 - 10f64.powf(-f64::from(phred) / 10.0)
}

/// Mean probability-correct over a read's per-base Phred scores.
///
/// Returns 0 for an empty quality string.
pub fn mean_base_quality(qualities: &[u8]) -> f64 {
    if qualities.is_empty() {
        return 0.0;
    }
    let total: f64 = qualities.iter().map(|&q| phred_to_probability(q)).sum();
    total / qualities.len() as f64
}

/// Phred-scale an error probability: `-10 * log10(error)`.
#[inline]
pub fn phred_scale(error_probability: f64) -> f64 {
    -10.0 * error_probability.log10()
}

/// Truncate (not round) a value to the given number of decimal places.
pub fn truncate_decimals(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).trunc() / scale
}

/// Render a value with at most six significant digits and no trailing zeros.
///
/// `50.0` renders as `50`, `0.5555555` as `0.555556`, `23.01029996` as `23.0103`.
pub fn format_decimal(value: f64) -> String {
    if !value.is_finite() {
        return if value.is_nan() {
            "nan".to_string()
        } else if value > 0.0 {
            "inf".to_string()
        } else {
            "-inf".to_string()
        };
    }
    if value == 0.0 {
        return "0".to_string();
    }

    let magnitude = value.abs().log10().floor() as i32;
    let decimals = (SIGNIFICANT_DIGITS - 1 - magnitude).max(0) as usize;
    let rendered = format!("{:.*}", decimals, value);
    if !rendered.contains('.') {
        return rendered;
    }
    let trimmed = rendered.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}
