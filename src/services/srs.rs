use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Clock;
use crate::store::{LearningStore, SrsState, StoreError};

const DECAY: f64 = -0.5;
const FACTOR: f64 = 19.0 / 81.0;
const DEFAULT_RETENTION: f64 = 0.9;
const MAX_INTERVAL_DAYS: f64 = 36500.0;
const CORRECT_SCORE: f64 = 80.0;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid attempt: {0}")]
    InvalidAttempt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptOutcome {
    pub correct: bool,
    pub time_ms: i64,
    /// 0..=100
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SrsSchedule {
    pub next_review_due: DateTime<Utc>,
    pub interval_days: f64,
    pub stability: f64,
    pub difficulty: f64,
    pub repetitions: u32,
}

impl SrsSchedule {
    pub fn state(&self) -> SrsState {
        SrsState {
            interval_days: self.interval_days,
            stability: self.stability,
            difficulty: self.difficulty,
            repetitions: self.repetitions,
        }
    }
}

/// Computes the next review for one answered question.
#[async_trait]
pub trait SrsScheduler: Send + Sync {
    async fn schedule(
        &self,
        learner_id: &str,
        question_id: &str,
        outcome: &AttemptOutcome,
    ) -> Result<SrsSchedule, SchedulerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rating {
    Again = 1,
    Hard = 2,
    Good = 3,
    Easy = 4,
}

impl Rating {
    /// Fast correct answers rate higher.
    pub fn from_outcome(outcome: &AttemptOutcome) -> Self {
        if !outcome.correct || outcome.score < CORRECT_SCORE {
            return Self::Again;
        }
        if outcome.time_ms < 2000 {
            Self::Easy
        } else if outcome.time_ms < 5000 {
            Self::Good
        } else {
            Self::Hard
        }
    }
}

#[derive(Debug, Clone)]
pub struct FsrsWeights {
    pub w: [f64; 17],
}

impl Default for FsrsWeights {
    fn default() -> Self {
        Self {
            w: [
                0.4, 0.6, 2.4, 5.8, 4.93, 0.94, 0.86, 0.01, 1.49, 0.14, 0.94, 2.18, 0.05, 0.34,
                1.26, 0.29, 2.61,
            ],
        }
    }
}

pub fn retrievability(stability: f64, elapsed_days: f64) -> f64 {
    if stability <= 0.0 {
        return 0.0;
    }
    (1.0 + FACTOR * elapsed_days.max(0.0) / stability).powf(DECAY)
}

fn interval_for(stability: f64, retention: f64) -> f64 {
    let retention = retention.clamp(0.0001, 0.9999);
    (stability / FACTOR * (retention.powf(1.0 / DECAY) - 1.0)).clamp(1.0, MAX_INTERVAL_DAYS)
}

/// Next SRS state given the previous one (`None` for a first attempt) and the days
/// elapsed since it was recorded. Difficulty is kept on a 0..1 scale.
pub fn next_state(
    previous: Option<&SrsState>,
    elapsed_days: f64,
    rating: Rating,
    weights: &FsrsWeights,
    retention: f64,
) -> SrsState {
    let w = &weights.w;
    let r = rating as i32;

    let Some(prev) = previous.filter(|p| p.repetitions > 0) else {
        let stability = w[(r - 1) as usize].max(0.1);
        let difficulty = (w[4] - (r - 3) as f64 * w[5]).clamp(1.0, 10.0) / 10.0;
        return SrsState {
            interval_days: interval_for(stability, retention),
            stability,
            difficulty,
            repetitions: 1,
        };
    };

    let d10 = prev.difficulty * 10.0;
    let recall = retrievability(prev.stability, elapsed_days);
    let shifted = d10 - w[6] * (r - 3) as f64;
    let difficulty = (w[7] * (w[4] - 3.0 * w[5]) + (1.0 - w[7]) * shifted).clamp(1.0, 10.0) / 10.0;

    let stability = if rating == Rating::Again {
        let forgotten = w[11]
            * d10.powf(-w[12])
            * ((prev.stability + 1.0).powf(w[13]) - 1.0)
            * ((1.0 - recall) * w[14]).exp();
        forgotten.clamp(0.1, prev.stability.max(0.1))
    } else {
        let hard = if rating == Rating::Hard { w[15] } else { 1.0 };
        let easy = if rating == Rating::Easy { w[16] } else { 1.0 };
        let growth = w[8].exp()
            * (11.0 - d10)
            * prev.stability.powf(-w[9])
            * ((1.0 - recall) * w[10]).exp_m1()
            * hard
            * easy;
        (prev.stability * (1.0 + growth)).max(0.1)
    };

    SrsState {
        interval_days: interval_for(stability, retention),
        stability,
        difficulty,
        repetitions: prev.repetitions + 1,
    }
}

/// FSRS-backed scheduler reading the previous state from the learner's log.
pub struct FsrsScheduler {
    store: Arc<dyn LearningStore>,
    clock: Arc<dyn Clock>,
    weights: FsrsWeights,
    retention: f64,
}

impl FsrsScheduler {
    pub fn new(store: Arc<dyn LearningStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            weights: FsrsWeights::default(),
            retention: DEFAULT_RETENTION,
        }
    }

    pub fn with_retention(mut self, retention: f64) -> Self {
        self.retention = retention;
        self
    }
}

#[async_trait]
impl SrsScheduler for FsrsScheduler {
    async fn schedule(
        &self,
        learner_id: &str,
        question_id: &str,
        outcome: &AttemptOutcome,
    ) -> Result<SrsSchedule, SchedulerError> {
        if !(0.0..=100.0).contains(&outcome.score) || outcome.time_ms < 0 {
            return Err(SchedulerError::InvalidAttempt(format!(
                "score {} / time {}ms out of range",
                outcome.score, outcome.time_ms
            )));
        }

        let now = self.clock.now();
        let previous = self.store.latest_performance(learner_id, question_id).await?;
        let elapsed_days = previous
            .as_ref()
            .map(|p| (now - p.created_at).num_seconds() as f64 / 86_400.0)
            .unwrap_or(0.0);

        let rating = Rating::from_outcome(outcome);
        let state = next_state(
            previous.as_ref().map(|p| &p.srs),
            elapsed_days,
            rating,
            &self.weights,
            self.retention,
        );
        let next_review_due = now + Duration::seconds((state.interval_days * 86_400.0).round() as i64);

        tracing::debug!(
            learner_id = %learner_id,
            question_id = %question_id,
            rating = rating as i32,
            interval_days = state.interval_days,
            "review scheduled"
        );

        Ok(SrsSchedule {
            next_review_due,
            interval_days: state.interval_days,
            stability: state.stability,
            difficulty: state.difficulty,
            repetitions: state.repetitions,
        })
    }
}
