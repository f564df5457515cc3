//! Dose, volume and fluid-rate calculations.
//!
//! Dosage ranges and concentrations are free text typed by the clinician
//! ("0.05-0.2", "10mg/ml", "2 - 4 mg/kg"). They are parsed into typed values
//! first, and the choice of which number to use is made by the named policy
//! functions [`upper_bound_of`] and [`leading_value_of`].
//!
//! Every `compute_*` function is total: an incomplete input yields an empty
//! string, because the UI calls these on every keystroke.

use serde::{Deserialize, Serialize};

/// A dosage range parsed from text. A single value parses as `low == high`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct NumericRange {
    /// First number in the text
    pub low: f64,
    /// Last number in the text
    pub high: f64,
}

/// A drug concentration parsed from text (e.g. "10 mg/ml").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConcentrationValue {
    /// Leading numeric amount
    pub amount: f64,
    /// Whatever follows the amount, trimmed (e.g. "mg/ml")
    pub unit_text: String,
}

/// A numeric token and the byte offset just past it.
struct Token {
    value: f64,
    end: usize,
}

/// Scan `text` for unsigned decimal numbers (`12`, `0.5`, `.5`).
///
/// A `-` is never part of a token: in "0.05-0.2" it separates a range.
fn numeric_tokens(text: &str) -> Vec<Token> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let starts_number = bytes[i].is_ascii_digit()
            || (bytes[i] == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit));
        if !starts_number {
            i += 1;
            continue;
        }

        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i < bytes.len()
            && bytes[i] == b'.'
            && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)
        {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }

        // Token is pure ASCII digits and at most one dot, so this parse only
        // fails on pathological lengths; skip those rather than guess.
        if let Ok(value) = text[start..i].parse::<f64>() {
            if value.is_finite() {
                tokens.push(Token { value, end: i });
            }
        }
    }

    tokens
}

/// Parse a dosage range such as "0.05-0.2" or "2 to 4 mg/kg".
pub fn parse_numeric_range(text: &str) -> Option<NumericRange> {
    let tokens = numeric_tokens(text);
    let low = tokens.first()?.value;
    let high = tokens.last()?.value;
    Some(NumericRange { low, high })
}

/// Parse a concentration such as "10mg/ml".
pub fn parse_concentration(text: &str) -> Option<ConcentrationValue> {
    let tokens = numeric_tokens(text);
    let first = tokens.first()?;
    Some(ConcentrationValue {
        amount: first.value,
        unit_text: text[first.end..].trim().to_string(),
    })
}

/// Dose policy: ranges are written low-to-high, and the anticipated dose is
/// planned at the upper bound.
pub fn upper_bound_of(range: &NumericRange) -> f64 {
    range.high
}

/// Concentration policy: a concentration is a single leading value.
pub fn leading_value_of(concentration: &ConcentrationValue) -> f64 {
    concentration.amount
}

/// Parse a field that must hold exactly one finite number.
pub fn parse_strict(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Anticipated dose in mass units, or `None` if it cannot be computed yet.
pub fn anticipated_dose(dosage_range: &str, weight: f64) -> Option<f64> {
    if !weight.is_finite() {
        return None;
    }
    let range = parse_numeric_range(dosage_range)?;
    Some(upper_bound_of(&range) * weight)
}

/// Administration volume, or `None` if it cannot be computed yet.
pub fn volume(dose: &str, concentration: &str) -> Option<f64> {
    let dose = parse_strict(dose)?;
    let concentration = leading_value_of(&parse_concentration(concentration)?);
    if concentration == 0.0 {
        return None;
    }
    Some(dose / concentration).filter(|v| v.is_finite())
}

/// Fluid rate per hour for the whole patient.
pub fn hourly_rate(rate_per_kg_per_hour: &str, weight: f64) -> Option<f64> {
    if !weight.is_finite() {
        return None;
    }
    let rate = parse_strict(rate_per_kg_per_hour)?;
    Some(rate * weight).filter(|v| v.is_finite())
}

/// Anticipated dose formatted to 2 decimals, or `""`.
pub fn compute_anticipated_dose(dosage_range: &str, weight: f64) -> String {
    anticipated_dose(dosage_range, weight)
        .map(|dose| format!("{:.2}", dose))
        .unwrap_or_default()
}

/// Volume formatted to 2 decimals, or `""`.
pub fn compute_volume(dose: &str, concentration: &str) -> String {
    volume(dose, concentration)
        .map(|v| format!("{:.2}", v))
        .unwrap_or_default()
}

/// Hourly fluid rate formatted to 1 decimal, or `""`.
pub fn compute_hourly_rate(rate_per_kg_per_hour: &str, weight: f64) -> String {
    hourly_rate(rate_per_kg_per_hour, weight)
        .map(|rate| format!("{:.1}", rate))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        let range = parse_numeric_range("0.05-0.2").unwrap();
        assert_eq!(range.low, 0.05);
        assert_eq!(range.high, 0.2);

        let single = parse_numeric_range("3 mg/kg").unwrap();
        assert_eq!(single.low, 3.0);
        assert_eq!(single.high, 3.0);

        let spaced = parse_numeric_range("2 - 10").unwrap();
        assert_eq!(upper_bound_of(&spaced), 10.0);

        assert!(parse_numeric_range("to effect").is_none());
        assert!(parse_numeric_range("").is_none());
    }

    #[test]
    fn test_leading_dot_and_trailing_dot() {
        let range = parse_numeric_range(".5-1.").unwrap();
        assert_eq!(range.low, 0.5);
        assert_eq!(range.high, 1.0);
    }

    #[test]
    fn test_parse_concentration() {
        let conc = parse_concentration("10mg/ml").unwrap();
        assert_eq!(leading_value_of(&conc), 10.0);
        assert_eq!(conc.unit_text, "mg/ml");

        let conc = parse_concentration("0.5 mg / 1 ml").unwrap();
        assert_eq!(conc.amount, 0.5);
        assert_eq!(conc.unit_text, "mg / 1 ml");

        assert!(parse_concentration("mg/ml").is_none());
    }

    #[test]
    fn test_anticipated_dose() {
        assert_eq!(compute_anticipated_dose("0.05-0.2", 32.5), "6.50");
        assert_eq!(compute_anticipated_dose("4", 10.0), "40.00");
        assert_eq!(compute_anticipated_dose("none", 10.0), "");
        assert_eq!(compute_anticipated_dose("0.2", f64::NAN), "");
        assert_eq!(compute_anticipated_dose("0.2", f64::INFINITY), "");
    }

    #[test]
    fn test_volume() {
        assert_eq!(compute_volume("6.50", "10mg/ml"), "0.65");
        assert_eq!(compute_volume("6.50", "0 mg/ml"), "");
        assert_eq!(compute_volume("6.50", ""), "");
        assert_eq!(compute_volume("", "10mg/ml"), "");
        assert_eq!(compute_volume("abc", "10mg/ml"), "");
    }

    #[test]
    fn test_hourly_rate() {
        assert_eq!(compute_hourly_rate("5", 32.5), "162.5");
        assert_eq!(compute_hourly_rate("2.5", 4.0), "10.0");
        assert_eq!(compute_hourly_rate("", 4.0), "");
        assert_eq!(compute_hourly_rate("fast", 4.0), "");
        assert_eq!(compute_hourly_rate("5", f64::NAN), "");
    }
}
