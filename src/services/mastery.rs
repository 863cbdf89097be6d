use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::store::{LearningStore, StoreError};

const MAX_GUESS: f64 = 0.49;
const MAX_SLIP: f64 = 0.49;

/// Bayesian Knowledge Tracing parameters for one skill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BktParams {
    pub prior: f64,
    pub learn: f64,
    pub guess: f64,
    pub slip: f64,
}

impl Default for BktParams {
    fn default() -> Self {
        Self {
            prior: 0.3,
            learn: 0.2,
            guess: 0.2,
            slip: 0.1,
        }
    }
}

impl BktParams {
    /// Keeps guess and slip below 0.5 so a wrong answer can never raise mastery.
    pub fn sanitized(self) -> Self {
        Self {
            prior: clamp_unit(self.prior),
            learn: clamp_unit(self.learn),
            guess: clamp_unit(self.guess).min(MAX_GUESS),
            slip: clamp_unit(self.slip).min(MAX_SLIP),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillMastery {
    pub learner_id: String,
    pub skill_tag: String,
    pub mastery_probability: f64,
    pub params: BktParams,
    pub last_updated: DateTime<Utc>,
}

impl SkillMastery {
    pub fn new(learner_id: &str, skill_tag: &str, params: BktParams, now: DateTime<Utc>) -> Self {
        let params = params.sanitized();
        Self {
            learner_id: learner_id.to_string(),
            skill_tag: skill_tag.to_string(),
            mastery_probability: params.prior,
            params,
            last_updated: now,
        }
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Posterior mastery after observing one answer.
pub fn bkt_update(p: f64, params: &BktParams, correct: bool) -> f64 {
    let p = clamp_unit(p);
    let BktParams {
        learn, guess, slip, ..
    } = params.sanitized();

    let next = if correct {
        let numerator = p * (1.0 - slip);
        let denominator = numerator + (1.0 - p) * guess;
        if denominator <= 0.0 {
            return p;
        }
        let p_correct = numerator / denominator;
        p_correct + (1.0 - p_correct) * learn
    } else {
        let numerator = p * slip;
        let denominator = numerator + (1.0 - p) * (1.0 - guess);
        if denominator <= 0.0 {
            return p;
        }
        numerator / denominator
    };

    clamp_unit(next)
}

pub struct MasteryTracker {
    store: Arc<dyn LearningStore>,
    clock: Arc<dyn Clock>,
}

impl MasteryTracker {
    pub fn new(store: Arc<dyn LearningStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Applies one scored attempt to every skill it touched.
    pub async fn observe(
        &self,
        learner_id: &str,
        skill_tags: &BTreeSet<String>,
        correct: bool,
        onboarding_defaults: Option<BktParams>,
    ) -> Result<Vec<SkillMastery>, StoreError> {
        let now = self.clock.now();
        let seed = onboarding_defaults.unwrap_or_default();
        let mut updated = Vec::with_capacity(skill_tags.len());

        for tag in skill_tags {
            let mut state = match self.store.skill_mastery(learner_id, tag).await? {
                Some(existing) => existing,
                None => SkillMastery::new(learner_id, tag, seed, now),
            };
            let before = state.mastery_probability;
            state.mastery_probability = bkt_update(before, &state.params, correct);
            state.last_updated = now;
            self.store.upsert_skill_mastery(&state).await?;

            tracing::debug!(
                learner_id = %learner_id,
                skill = %tag,
                correct,
                before,
                after = state.mastery_probability,
                "skill mastery updated"
            );
            updated.push(state);
        }

        Ok(updated)
    }

    pub async fn mastery(&self, learner_id: &str, skill_tag: &str) -> Result<Option<f64>, StoreError> {
        Ok(self
            .store
            .skill_mastery(learner_id, skill_tag)
            .await?
            .map(|m| m.mastery_probability))
    }

    /// Skills whose mastery is strictly below `threshold`, sorted by tag.
    pub async fn low_mastery_skills(
        &self,
        learner_id: &str,
        threshold: f64,
    ) -> Result<Vec<String>, StoreError> {
        let mut skills: Vec<String> = self
            .store
            .skill_masteries(learner_id)
            .await?
            .into_iter()
            .filter(|m| m.mastery_probability < threshold)
            .map(|m| m.skill_tag)
            .collect();
        skills.sort();
        skills.dedup();
        Ok(skills)
    }

    pub async fn reset(&self, learner_id: &str) -> Result<u64, StoreError> {
        let removed = self.store.delete_skill_masteries(learner_id).await?;
        tracing::info!(learner_id = %learner_id, removed, "skill mastery reset");
        Ok(removed)
    }
}
