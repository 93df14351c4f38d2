use crate::models::RiskTier;

/// Map a resolved case count to a risk tier and its advisory text.
/// Bands are inclusive on their lower bound: <10 LOW, 10..=49 MEDIUM,
/// >=50 HIGH.
pub fn classify(cases: i64) -> (RiskTier, &'static str) {
    if cases < 10 {
        (
            RiskTier::Low,
            "Stay vigilant! Dengue cases are low in your area.",
        )
    } else if cases < 50 {
        (
            RiskTier::Medium,
            "Alert! Moderate dengue activity detected in your area.",
        )
    } else {
        (
            RiskTier::High,
            "Warning! High dengue cases in your area. Take precautions!",
        )
    }
}

/// Resolved case counts above this threshold trigger an immediate
/// outbreak alert to every subscriber in the location.
pub const OUTBREAK_THRESHOLD: i64 = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_partition_at_ten_and_fifty() {
        assert_eq!(classify(0).0, RiskTier::Low);
        assert_eq!(classify(9).0, RiskTier::Low);
        assert_eq!(classify(10).0, RiskTier::Medium);
        assert_eq!(classify(49).0, RiskTier::Medium);
        assert_eq!(classify(50).0, RiskTier::High);
        assert_eq!(classify(500).0, RiskTier::High);
    }

    #[test]
    fn classification_is_monotonic() {
        let mut last = classify(0).0;
        for cases in 1..200 {
            let tier = classify(cases).0;
            let rank = |t: RiskTier| match t {
                RiskTier::Low => 0,
                RiskTier::Medium => 1,
                RiskTier::High => 2,
            };
            assert!(rank(tier) >= rank(last));
            last = tier;
        }
    }

    #[test]
    fn advisories_match_tier() {
        assert!(classify(5).1.contains("Stay vigilant"));
        assert!(classify(25).1.contains("Moderate"));
        assert!(classify(80).1.contains("Take precautions"));
    }
}
