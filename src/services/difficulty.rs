use crate::types::DifficultyBand;

pub const DEFAULT_BASE_DIFFICULTY: f64 = 0.5;
pub const DEFAULT_MASTERY_CAP: f64 = 0.3;

const EASY_DIFFICULTY_BELOW: f64 = 0.3;
const EASY_MASTERY_ABOVE: f64 = 0.7;
const HARD_DIFFICULTY_ABOVE: f64 = 0.7;
const HARD_MASTERY_BELOW: f64 = 0.3;

/// Maps a CEFR knowledge level to a base difficulty in `[0, 1]`.
pub fn base_difficulty(level: &str) -> f64 {
    match level.trim().to_uppercase().as_str() {
        "A1" => 0.1,
        "A2" => 0.3,
        "B1" => 0.5,
        "B2" => 0.7,
        "C1" => 0.85,
        "C2" => 1.0,
        _ => DEFAULT_BASE_DIFFICULTY,
    }
}

pub fn base_difficulty_opt(level: Option<&str>) -> f64 {
    level.map(base_difficulty).unwrap_or(DEFAULT_BASE_DIFFICULTY)
}

/// Lowers difficulty as mastery grows, by at most `cap` of the base.
pub fn adjust_for_mastery(base: f64, mastery: f64, cap: f64) -> f64 {
    base * (1.0 - mastery * cap)
}

pub fn adjust_for_mastery_default(base: f64, mastery: f64) -> f64 {
    adjust_for_mastery(base, mastery, DEFAULT_MASTERY_CAP)
}

pub fn classify(difficulty: f64, mastery: f64) -> DifficultyBand {
    if difficulty < EASY_DIFFICULTY_BELOW || mastery > EASY_MASTERY_ABOVE {
        DifficultyBand::Easy
    } else if difficulty > HARD_DIFFICULTY_ABOVE || mastery < HARD_MASTERY_BELOW {
        DifficultyBand::Hard
    } else {
        DifficultyBand::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_base_difficulty_levels() {
        assert_eq!(base_difficulty("A1"), 0.1);
        assert_eq!(base_difficulty("A2"), 0.3);
        assert_eq!(base_difficulty("B1"), 0.5);
        assert_eq!(base_difficulty("B2"), 0.7);
        assert_eq!(base_difficulty("C1"), 0.85);
        assert_eq!(base_difficulty("C2"), 1.0);
    }

    #[test]
    fn test_base_difficulty_unknown_and_empty() {
        assert_eq!(base_difficulty(""), 0.5);
        assert_eq!(base_difficulty("native"), 0.5);
        assert_eq!(base_difficulty(" b2 "), 0.7);
        assert_eq!(base_difficulty_opt(None), 0.5);
    }

    #[test]
    fn test_beginner_scenario() {
        let base = base_difficulty("A1");
        let adjusted = adjust_for_mastery_default(base, 0.0);
        assert_eq!(base, 0.1);
        assert_eq!(adjusted, 0.1);
        assert_eq!(classify(adjusted, 0.0), DifficultyBand::Easy);
    }

    #[test]
    fn test_adjust_for_mastery_caps_reduction() {
        let adjusted = adjust_for_mastery(1.0, 1.0, 0.3);
        assert!((adjusted - 0.7).abs() < 1e-9);
        let half = adjust_for_mastery(0.5, 0.5, 0.3);
        assert!((half - 0.425).abs() < 1e-9);
    }

    #[test]
    fn test_classify_bands() {
        assert_eq!(classify(0.5, 0.9), DifficultyBand::Easy);
        assert_eq!(classify(0.8, 0.5), DifficultyBand::Hard);
        assert_eq!(classify(0.5, 0.1), DifficultyBand::Hard);
        assert_eq!(classify(0.5, 0.5), DifficultyBand::Medium);
        // easy rule wins over hard rule
        assert_eq!(classify(0.9, 0.8), DifficultyBand::Easy);
    }

    proptest! {
        #[test]
        fn classify_is_total_and_exclusive(d in 0.0f64..=1.0, m in 0.0f64..=1.0) {
            let band = classify(d, m);
            let matches = [DifficultyBand::Easy, DifficultyBand::Medium, DifficultyBand::Hard]
                .iter()
                .filter(|b| **b == band)
                .count();
            prop_assert_eq!(matches, 1);
            let easy = d < 0.3 || m > 0.7;
            let hard = !easy && (d > 0.7 || m < 0.3);
            match band {
                DifficultyBand::Easy => prop_assert!(easy),
                DifficultyBand::Hard => prop_assert!(hard),
                DifficultyBand::Medium => prop_assert!(!easy && !hard),
            }
        }

        #[test]
        fn adjusted_difficulty_never_exceeds_base(base in 0.0f64..=1.0, m in 0.0f64..=1.0) {
            let adjusted = adjust_for_mastery_default(base, m);
            prop_assert!(adjusted <= base + 1e-12);
            prop_assert!(adjusted >= base * 0.7 - 1e-12);
        }
    }
}
