use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::cache::SessionPlanCache;
use crate::clock::Clock;
use crate::services::mastery::{MasteryTracker, SkillMastery};
use crate::services::srs::{AttemptOutcome, SchedulerError, SrsScheduler};
use crate::store::{LearningStore, PerformanceRecord, PreferenceSource, StoreError};
use crate::types::DeliveryMethod;

#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("unknown question {0}")]
    UnknownQuestion(String),
    #[error("invalid attempt: {0}")]
    InvalidAttempt(String),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptInput {
    pub question_id: String,
    pub correct: bool,
    /// 0..=100
    pub score: f64,
    pub time_ms: i64,
    #[serde(default)]
    pub delivery_method: Option<DeliveryMethod>,
}

#[derive(Debug, Clone)]
pub struct AttemptReceipt {
    pub record: PerformanceRecord,
    pub masteries: Vec<SkillMastery>,
    pub invalidated_plans: usize,
}

/// Write side of a session: logs answers and keeps cached plans honest.
pub struct AttemptRecorder {
    store: Arc<dyn LearningStore>,
    preferences: Arc<dyn PreferenceSource>,
    scheduler: Arc<dyn SrsScheduler>,
    cache: Arc<SessionPlanCache>,
    mastery: MasteryTracker,
    clock: Arc<dyn Clock>,
}

impl AttemptRecorder {
    pub fn new(
        store: Arc<dyn LearningStore>,
        preferences: Arc<dyn PreferenceSource>,
        scheduler: Arc<dyn SrsScheduler>,
        cache: Arc<SessionPlanCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            mastery: MasteryTracker::new(store.clone(), clock.clone()),
            store,
            preferences,
            scheduler,
            cache,
            clock,
        }
    }

    pub async fn record_attempt(&self, learner_id: &str, input: AttemptInput) -> Result<AttemptReceipt, AttemptError> {
        if !(0.0..=100.0).contains(&input.score) {
            return Err(AttemptError::InvalidAttempt(format!("score {} outside 0..=100", input.score)));
        }
        if input.time_ms < 0 {
            return Err(AttemptError::InvalidAttempt(format!("negative duration {}ms", input.time_ms)));
        }

        let question = self
            .store
            .questions_by_ids(std::slice::from_ref(&input.question_id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AttemptError::UnknownQuestion(input.question_id.clone()))?;

        let mut tags: BTreeSet<String> = question.skill_tags.iter().cloned().collect();
        if let Some(teaching_id) = &question.teaching_id {
            for teaching in self
                .store
                .teachings_by_ids(std::slice::from_ref(teaching_id))
                .await?
            {
                tags.extend(teaching.skill_tags);
            }
        }

        let outcome = AttemptOutcome {
            correct: input.correct,
            time_ms: input.time_ms,
            score: input.score,
        };
        let schedule = self
            .scheduler
            .schedule(learner_id, &input.question_id, &outcome)
            .await?;

        let record = PerformanceRecord {
            id: Uuid::new_v4().to_string(),
            learner_id: learner_id.to_string(),
            question_id: input.question_id.clone(),
            score: input.score,
            time_ms: input.time_ms,
            delivery_method: input.delivery_method,
            next_review_due: schedule.next_review_due,
            srs: schedule.state(),
            created_at: self.clock.now(),
        };
        self.store.append_performance(&record).await?;

        let defaults = self.preferences.preferences(learner_id).await?.bkt_defaults;
        let masteries = self
            .mastery
            .observe(learner_id, &tags, input.correct, defaults)
            .await?;
        let invalidated_plans = self.cache.invalidate_learner(learner_id);

        tracing::info!(
            learner_id = %learner_id,
            question_id = %input.question_id,
            correct = input.correct,
            score = input.score,
            skills = masteries.len(),
            invalidated_plans,
            "attempt recorded"
        );

        Ok(AttemptReceipt {
            record,
            masteries,
            invalidated_plans,
        })
    }

    /// Marks a teaching as seen so later plans no longer pair it with its questions.
    pub async fn record_teaching_viewed(&self, learner_id: &str, teaching_id: &str) -> Result<(), AttemptError> {
        self.store.mark_teaching_seen(learner_id, teaching_id).await?;
        self.cache.invalidate_learner(learner_id);
        tracing::debug!(learner_id = %learner_id, teaching_id = %teaching_id, "teaching viewed");
        Ok(())
    }

    pub fn complete_lesson(&self, learner_id: &str, lesson_id: &str) -> usize {
        let removed = self.cache.invalidate_learner(learner_id);
        tracing::info!(
            learner_id = %learner_id,
            lesson_id = %lesson_id,
            invalidated_plans = removed,
            "lesson completed"
        );
        removed
    }

    /// Drops every cached plan scoped to the lesson, e.g. after its content changed.
    pub fn invalidate_lesson(&self, lesson_id: &str) -> usize {
        let removed = self.cache.invalidate_lesson(lesson_id);
        tracing::info!(lesson_id = %lesson_id, invalidated_plans = removed, "lesson plans invalidated");
        removed
    }

    pub async fn reset_progress(&self, learner_id: &str) -> Result<u64, AttemptError> {
        let removed = self.mastery.reset(learner_id).await?;
        self.cache.invalidate_learner(learner_id);
        Ok(removed)
    }
}
