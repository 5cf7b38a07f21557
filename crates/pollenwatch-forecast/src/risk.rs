//! Pollen index to risk tier classification.

use serde::{Deserialize, Serialize};

use crate::types::PollenTypeReading;

/// Highest value on the universal pollen index.
pub const MAX_INDEX: i64 = 5;

/// Risk tier, ordered `Low < Moderate < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    #[default]
    Low,
    Moderate,
    High,
}

impl RiskTier {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "Low Risk",
            Self::Moderate => "Moderate Risk",
            Self::High => "High Risk",
        }
    }

    pub fn advice(&self) -> &'static str {
        match self {
            Self::Low => "Pollen levels are unlikely to cause symptoms.",
            Self::Moderate => "Sensitive people may notice symptoms outdoors.",
            Self::High => "Limit time outdoors if you are allergic.",
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Clamp any integer onto the index scale.
pub fn clamp_index(value: i64) -> u8 {
    value.clamp(0, MAX_INDEX) as u8
}

/// Map a pollen index to its tier. Out-of-range input is clamped first.
pub fn classify(index_value: i64) -> RiskTier {
    match clamp_index(index_value) {
        0..=2 => RiskTier::Low,
        3..=4 => RiskTier::Moderate,
        _ => RiskTier::High,
    }
}

/// Highest tier across all readings; `Low` when there are none.
pub fn overall_tier(readings: &[PollenTypeReading]) -> RiskTier {
    readings
        .iter()
        .map(|r| classify(i64::from(r.index_value)))
        .max()
        .unwrap_or(RiskTier::Low)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(code: &str, value: u8) -> PollenTypeReading {
        PollenTypeReading {
            code: code.to_string(),
            name: code.to_string(),
            index_value: value,
            category: "Low".to_string(),
            description: String::new(),
            recommendations: Vec::new(),
            in_season: Some(true),
        }
    }

    #[test]
    fn test_classify_table() {
        let cases = [
            (0, RiskTier::Low),
            (1, RiskTier::Low),
            (2, RiskTier::Low),
            (3, RiskTier::Moderate),
            (4, RiskTier::Moderate),
            (5, RiskTier::High),
        ];
        for (value, expected) in cases {
            assert_eq!(classify(value), expected, "index {}", value);
        }
    }

    #[test]
    fn test_classify_clamps_out_of_range() {
        assert_eq!(classify(-1), RiskTier::Low);
        assert_eq!(classify(i64::MIN), RiskTier::Low);
        assert_eq!(classify(6), RiskTier::High);
        assert_eq!(classify(i64::MAX), RiskTier::High);
    }

    #[test]
    fn test_tier_ordering() {
        assert!(RiskTier::Low < RiskTier::Moderate);
        assert!(RiskTier::Moderate < RiskTier::High);
    }

    #[test]
    fn test_overall_tier_empty_is_low() {
        assert_eq!(overall_tier(&[]), RiskTier::Low);
    }

    #[test]
    fn test_overall_tier_takes_maximum() {
        let readings = vec![reading("TREE", 4), reading("GRASS", 2), reading("WEED", 1)];
        assert_eq!(overall_tier(&readings), RiskTier::Moderate);
    }

    #[test]
    fn test_overall_tier_permutation_invariant() {
        let values = [1u8, 5, 3];
        let permutations = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
        for order in permutations {
            let readings: Vec<_> = order.iter().map(|&i| reading("X", values[i])).collect();
            assert_eq!(overall_tier(&readings), RiskTier::High);
        }
    }

    #[test]
    fn test_overall_tier_matches_classify_of_max() {
        for a in 0u8..=5 {
            for b in 0u8..=5 {
                let expected = classify(i64::from(a.max(b)));
                assert_eq!(overall_tier(&[reading("A", a), reading("B", b)]), expected);
            }
        }
    }

    #[test]
    fn test_labels() {
        assert_eq!(RiskTier::Low.label(), "Low Risk");
        assert_eq!(RiskTier::High.to_string(), "High Risk");
    }
}
