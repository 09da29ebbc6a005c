/// Rounds `value` to `precision` decimal digits, halves away from zero.
pub fn round(value: f64, precision: u32) -> f64 {
    let scale = 10_f64.powi(precision as i32);
    (value * scale).round() / scale
}

/// `numerator / denominator`, or `None` when the denominator is zero.
pub fn ratio(numerator: u64, denominator: u64) -> Option<f64> {
    if denominator == 0 {
        return None;
    }
    Some(numerator as f64 / denominator as f64)
}

/// Exposed ratio: clamped to `[0, 1]` and rounded to four digits.
pub fn fraction(numerator: u64, denominator: u64) -> Option<f64> {
    ratio(numerator, denominator).map(clamp_fraction)
}

pub fn clamp_fraction(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    round(value.clamp(0.0, 1.0), 4)
}
