use crate::store::DurationHistory;
use crate::types::DeliveryMethod;

pub const DEFAULT_BUFFER_RATIO: f64 = 0.2;
pub const DEFAULT_ITEM_COUNT: usize = 10;
pub const MIN_ITEM_COUNT: usize = 1;
pub const MAX_ITEM_COUNT: usize = 50;

pub const DEFAULT_TEACHING_SEC: f64 = 30.0;
pub const DEFAULT_PRACTICE_SEC: f64 = 60.0;
pub const RECAP_SEC: u32 = 30;

/// Number of items that fit in `time_budget_sec`, keeping `buffer_ratio` in reserve.
pub fn calculate_item_count(time_budget_sec: f64, avg_time_per_item: f64, buffer_ratio: f64) -> usize {
    if avg_time_per_item <= 0.0 || avg_time_per_item.is_nan() {
        return DEFAULT_ITEM_COUNT;
    }
    let usable = time_budget_sec.max(0.0) * (1.0 - buffer_ratio.clamp(0.0, 1.0));
    let raw = (usable / avg_time_per_item).floor();
    if raw.is_nan() {
        return MIN_ITEM_COUNT;
    }
    (raw.max(0.0) as usize).clamp(MIN_ITEM_COUNT, MAX_ITEM_COUNT)
}

pub fn default_method_time_sec(method: DeliveryMethod) -> f64 {
    match method {
        DeliveryMethod::Flashcard => 20.0,
        DeliveryMethod::MultipleChoice => 30.0,
        DeliveryMethod::FillBlank => 45.0,
        DeliveryMethod::Translation => 60.0,
        DeliveryMethod::SpeechToText | DeliveryMethod::TextToSpeech => 90.0,
    }
}

/// Per-step time estimates for one learner.
#[derive(Debug, Clone, Default)]
pub struct TimeEstimator {
    history: DurationHistory,
}

impl TimeEstimator {
    pub fn new(history: DurationHistory) -> Self {
        Self { history }
    }

    pub fn teaching_sec(&self) -> f64 {
        positive(self.history.teaching_avg_sec).unwrap_or(DEFAULT_TEACHING_SEC)
    }

    /// General practice average, used when no delivery method applies and for item counts.
    pub fn practice_sec(&self) -> f64 {
        positive(self.history.practice_avg_sec).unwrap_or(DEFAULT_PRACTICE_SEC)
    }

    pub fn method_sec(&self, method: Option<DeliveryMethod>) -> f64 {
        match method {
            Some(method) => positive(self.history.by_method.get(&method).copied())
                .unwrap_or_else(|| default_method_time_sec(method)),
            None => self.practice_sec(),
        }
    }

    pub fn item_count(&self, time_budget_sec: f64, buffer_ratio: f64) -> usize {
        calculate_item_count(time_budget_sec, self.practice_sec(), buffer_ratio)
    }
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

pub fn round_seconds(seconds: f64) -> u32 {
    seconds.round().clamp(0.0, u32::MAX as f64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[test]
    fn test_five_minute_budget() {
        assert_eq!(calculate_item_count(300.0, 60.0, DEFAULT_BUFFER_RATIO), 4);
    }

    #[test]
    fn test_non_positive_average_falls_back() {
        assert_eq!(calculate_item_count(300.0, 0.0, DEFAULT_BUFFER_RATIO), 10);
        assert_eq!(calculate_item_count(300.0, -5.0, DEFAULT_BUFFER_RATIO), 10);
    }

    #[test]
    fn test_count_is_clamped() {
        assert_eq!(calculate_item_count(10.0, 60.0, DEFAULT_BUFFER_RATIO), 1);
        assert_eq!(calculate_item_count(100_000.0, 10.0, DEFAULT_BUFFER_RATIO), 50);
    }

    #[test]
    fn test_estimator_defaults() {
        let estimator = TimeEstimator::default();
        assert_eq!(estimator.teaching_sec(), 30.0);
        assert_eq!(estimator.practice_sec(), 60.0);
        assert_eq!(estimator.method_sec(Some(DeliveryMethod::Flashcard)), 20.0);
        assert_eq!(estimator.method_sec(Some(DeliveryMethod::FillBlank)), 45.0);
        assert_eq!(estimator.method_sec(Some(DeliveryMethod::TextToSpeech)), 90.0);
        assert_eq!(estimator.method_sec(None), 60.0);
    }

    #[test]
    fn test_estimator_prefers_history() {
        let mut by_method = HashMap::new();
        by_method.insert(DeliveryMethod::Translation, 75.0);
        by_method.insert(DeliveryMethod::Flashcard, 0.0);
        let estimator = TimeEstimator::new(DurationHistory {
            teaching_avg_sec: Some(42.0),
            practice_avg_sec: Some(50.0),
            by_method,
        });
        assert_eq!(estimator.teaching_sec(), 42.0);
        assert_eq!(estimator.method_sec(Some(DeliveryMethod::Translation)), 75.0);
        // zero history is ignored
        assert_eq!(estimator.method_sec(Some(DeliveryMethod::Flashcard)), 20.0);
        assert_eq!(estimator.method_sec(None), 50.0);
        assert_eq!(estimator.item_count(600.0, 0.2), 9);
    }

    proptest! {
        #[test]
        fn item_count_monotone_and_bounded(
            a in 0.0f64..20_000.0,
            b in 0.0f64..20_000.0,
            avg in 1.0f64..300.0,
        ) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let small = calculate_item_count(lo, avg, DEFAULT_BUFFER_RATIO);
            let large = calculate_item_count(hi, avg, DEFAULT_BUFFER_RATIO);
            prop_assert!(small <= large);
            prop_assert!((MIN_ITEM_COUNT..=MAX_ITEM_COUNT).contains(&small));
            prop_assert!((MIN_ITEM_COUNT..=MAX_ITEM_COUNT).contains(&large));
        }
    }
}
