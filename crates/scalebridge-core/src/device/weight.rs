//! Weight readings and numeric extraction
//!
//! Scales print free-form lines such as `ST,GS,+0045.230kg`. The weight is
//! recovered by dropping everything but digits and decimal points and taking
//! the first `NNN.NNN` group.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn fixed_point() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d{3}\.\d{3}").expect("valid weight pattern"))
}

/// Extract the fixed-point weight text from a raw scale line
///
/// Returns `None` when no `NNN.NNN` group survives the stripping.
pub fn extract_weight(line: &str) -> Option<String> {
    let numeric: String = line
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    fixed_point()
        .find(&numeric)
        .map(|m| m.as_str().to_string())
}

/// Format a weight with the fixed `NNN.NNN` layout used on the wire
pub fn format_weight(weight: f64) -> String {
    format!("{:07.3}", weight)
}

/// Result of one timed read
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightReading {
    /// Every trimmed, non-empty line received during the read, in order
    pub raw_samples: Vec<String>,
    /// The last line received, if any
    pub last_value: Option<String>,
    /// Matched `NNN.NNN` text of the last line
    pub weight_text: Option<String>,
    /// Numeric value of `weight_text`
    pub numeric_weight: Option<f64>,
}

impl WeightReading {
    /// Build a reading from the collected samples
    ///
    /// Only the last sample feeds the weight; earlier ones are kept for
    /// diagnostics.
    pub fn from_samples(raw_samples: Vec<String>) -> Self {
        let last_value = raw_samples.last().cloned();
        let weight_text = last_value.as_deref().and_then(extract_weight);
        let numeric_weight = weight_text.as_deref().and_then(|w| w.parse::<f64>().ok());

        Self {
            raw_samples,
            last_value,
            weight_text,
            numeric_weight,
        }
    }

    /// True if nothing at all was received
    pub fn is_empty(&self) -> bool {
        self.raw_samples.is_empty()
    }

    /// True if a weight was recovered and it is exactly zero
    pub fn is_zero(&self) -> bool {
        self.numeric_weight == Some(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_plain() {
        assert_eq!(extract_weight("045.230"), Some("045.230".to_string()));
    }

    #[test]
    fn test_extract_skips_leading_digit() {
        // "0045.230" has no match at offset 0, first match starts at offset 1
        assert_eq!(extract_weight("+0045.230kg"), Some("045.230".to_string()));
    }

    #[test]
    fn test_extract_too_short() {
        assert_eq!(extract_weight("ST,GS,12.34kg"), None);
    }

    #[test]
    fn test_format_weight() {
        assert_eq!(format_weight(45.23), "045.230");
        assert_eq!(format_weight(0.0), "000.000");
        assert_eq!(format_weight(999.999), "999.999");
    }

    #[test]
    fn test_reading_uses_last_sample() {
        let reading = WeightReading::from_samples(vec![
            "ST,GS,+012.000kg".to_string(),
            "ST,GS,+013.500kg".to_string(),
        ]);
        assert_eq!(reading.weight_text.as_deref(), Some("013.500"));
        assert_eq!(reading.numeric_weight, Some(13.5));
        assert_eq!(reading.raw_samples.len(), 2);
    }

    #[test]
    fn test_reading_keeps_unparseable_last_value() {
        let reading = WeightReading::from_samples(vec!["OL".to_string()]);
        assert_eq!(reading.last_value.as_deref(), Some("OL"));
        assert!(reading.numeric_weight.is_none());
        assert!(!reading.is_empty());
    }

    #[test]
    fn test_empty_reading() {
        let reading = WeightReading::from_samples(Vec::new());
        assert!(reading.is_empty());
        assert!(reading.last_value.is_none());
        assert!(!reading.is_zero());
    }
}
