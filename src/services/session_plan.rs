use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use uuid::Uuid;

use crate::cache::{PlanCacheKey, SessionPlanCache};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::services::candidates::{CandidateGenerator, NewContent};
use crate::services::mastery::MasteryTracker;
use crate::services::modality::{select_method, StepBuilderRegistry};
use crate::services::priority::{rank, RankingContext};
use crate::services::sequencing::{compose_review, compose_teach_test, CompositionSettings};
use crate::services::time_budget::{round_seconds, TimeEstimator, RECAP_SEC};
use crate::store::{DurationHistory, LearningStore, PreferenceSource, StoreError};
use crate::types::{
    Candidate, DeliveryMethod, PlanContext, PlanMetadata, SessionMode, SessionPlan, SessionStep,
    StepItem, StepType,
};

const EMPTY_PLAN_MESSAGE: &str = "Nothing is due right now. Come back later for more practice.";

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("learner id must not be empty")]
    EmptyLearnerId,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Schema mismatches degrade to the default value; everything else propagates.
fn degrade<T: Default>(result: Result<T, StoreError>, what: &str, learner_id: &str) -> Result<T, StoreError> {
    match result {
        Err(err) if err.is_schema_mismatch() => {
            tracing::warn!(
                error = %err,
                learner_id = %learner_id,
                "{what} unavailable during migration, using defaults"
            );
            Ok(T::default())
        }
        other => other,
    }
}

/// Everything gathered for one learner before ranking starts.
struct PlanInputs {
    challenge_weight: f64,
    session_minutes: Option<u32>,
    reviews: Vec<Candidate>,
    fresh: NewContent,
    history: DurationHistory,
    weak_skills: Vec<String>,
    method_scores: HashMap<DeliveryMethod, f64>,
}

pub struct SessionPlanner {
    store: Arc<dyn LearningStore>,
    preferences: Arc<dyn PreferenceSource>,
    clock: Arc<dyn Clock>,
    cache: Arc<SessionPlanCache>,
    candidates: CandidateGenerator,
    mastery: MasteryTracker,
    registry: StepBuilderRegistry,
    config: EngineConfig,
    rng: Mutex<StdRng>,
}

impl SessionPlanner {
    pub fn new(
        store: Arc<dyn LearningStore>,
        preferences: Arc<dyn PreferenceSource>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let cache = Arc::new(SessionPlanCache::new(clock.clone(), config.cache_ttl));
        Self {
            candidates: CandidateGenerator::new(store.clone(), clock.clone()),
            mastery: MasteryTracker::new(store.clone(), clock.clone()),
            store,
            preferences,
            clock,
            cache,
            registry: StepBuilderRegistry::default(),
            config,
            rng: Mutex::new(StdRng::seed_from_u64(rand::random())),
        }
    }

    /// Shares a cache with other components, e.g. the attempt recorder.
    pub fn with_cache(mut self, cache: Arc<SessionPlanCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_registry(mut self, registry: StepBuilderRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Fixes the modality selector's randomness.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    pub fn cache(&self) -> Arc<SessionPlanCache> {
        self.cache.clone()
    }

    pub async fn create_plan(&self, learner_id: &str, context: PlanContext) -> Result<SessionPlan, PlanError> {
        if learner_id.trim().is_empty() {
            return Err(PlanError::EmptyLearnerId);
        }

        let key = PlanCacheKey::new(learner_id, &context);
        if let Some(plan) = self.cache.get(&key) {
            return Ok(plan);
        }

        let inputs = self.gather(learner_id, &context).await?;
        let estimator = TimeEstimator::new(inputs.history.clone());

        let budget_sec = context
            .time_budget_sec
            .or_else(|| inputs.session_minutes.map(|m| m.saturating_mul(60)));
        let item_count = match budget_sec {
            Some(budget) => estimator.item_count(budget as f64, self.config.buffer_ratio),
            None => self.config.default_item_count,
        };

        let ranking = RankingContext::new(inputs.weak_skills.iter().cloned(), inputs.challenge_weight);
        let due_ranked = rank(inputs.reviews, &ranking);
        let new_ranked = rank(inputs.fresh.questions, &ranking);

        let settings = CompositionSettings {
            item_count,
            max_same_type_in_row: self.config.max_same_type_in_row,
            review_batch_floor: self.config.review_batch_floor,
            consecutive_errors: context.consecutive_errors,
        };
        let sequence = match context.mode {
            SessionMode::Review => compose_review(&due_ranked, &settings),
            mode => compose_teach_test(
                mode,
                &new_ranked,
                &due_ranked,
                &inputs.fresh.teachings,
                &inputs.fresh.seen_teachings,
                &settings,
            ),
        };

        let steps = self.build_steps(learner_id, &sequence, &inputs.method_scores, &estimator);
        let metadata = summarize(&sequence, &steps, item_count);
        let plan = SessionPlan {
            session_id: Uuid::new_v4().to_string(),
            learner_id: learner_id.to_string(),
            mode: context.mode,
            steps,
            metadata,
            created_at: self.clock.now(),
        };

        tracing::info!(
            learner_id = %learner_id,
            mode = context.mode.as_str(),
            session_id = %plan.session_id,
            steps = plan.metadata.total_steps,
            reviews = plan.metadata.review_count,
            new = plan.metadata.new_count,
            target = item_count,
            "session plan composed"
        );

        self.cache.put(key, plan.clone());
        Ok(plan)
    }

    async fn gather(&self, learner_id: &str, context: &PlanContext) -> Result<PlanInputs, StoreError> {
        let new_content = async {
            if context.mode == SessionMode::Review {
                Ok(NewContent::default())
            } else {
                self.candidates.new_content(learner_id, &context.scope).await
            }
        };

        let (preferences, reviews, fresh, history, weak_skills, stored_scores) = tokio::join!(
            self.preferences.preferences(learner_id),
            self.candidates.review_candidates(learner_id, &context.scope),
            new_content,
            self.store.duration_history(learner_id),
            self.mastery
                .low_mastery_skills(learner_id, self.config.low_mastery_threshold),
            self.store.delivery_method_scores(learner_id),
        );

        let preferences = preferences?;
        let mut method_scores = preferences.method_scores;
        method_scores.extend(degrade(stored_scores, "delivery method scores", learner_id)?);

        Ok(PlanInputs {
            challenge_weight: preferences.challenge_weight.clamp(0.0, 1.0),
            session_minutes: preferences.session_minutes,
            reviews: reviews?,
            fresh: fresh?,
            history: degrade(history, "duration history", learner_id)?,
            weak_skills: degrade(weak_skills, "skill mastery", learner_id)?,
            method_scores,
        })
    }

    fn build_steps(
        &self,
        learner_id: &str,
        sequence: &[Candidate],
        method_scores: &HashMap<DeliveryMethod, f64>,
        estimator: &TimeEstimator,
    ) -> Vec<SessionStep> {
        if sequence.is_empty() {
            return vec![SessionStep {
                step_number: 1,
                step_type: StepType::Recap,
                item: StepItem::Recap {
                    message: EMPTY_PLAN_MESSAGE.to_string(),
                    topics: Vec::new(),
                },
                estimated_time_sec: RECAP_SEC,
                delivery_method: None,
            }];
        }

        let mut rng = self.rng.lock();
        sequence
            .iter()
            .enumerate()
            .map(|(index, candidate)| {
                let (step_type, method, seconds) = if candidate.is_teaching() {
                    (StepType::Teach, None, estimator.teaching_sec())
                } else {
                    let method = select_method(&candidate.delivery_methods, method_scores, &mut *rng);
                    (StepType::Practice, method, estimator.method_sec(method))
                };
                SessionStep {
                    step_number: index as u32 + 1,
                    step_type,
                    item: self.registry.build(learner_id, candidate, method),
                    estimated_time_sec: round_seconds(seconds),
                    delivery_method: method,
                }
            })
            .collect()
    }
}

fn summarize(sequence: &[Candidate], steps: &[SessionStep], target_item_count: usize) -> PlanMetadata {
    let mut topics_seen = HashSet::new();
    let mut topics_covered = Vec::new();
    for tag in sequence.iter().flat_map(|c| c.skill_tags.iter()) {
        if topics_seen.insert(tag.as_str()) {
            topics_covered.push(tag.clone());
        }
    }

    let mut delivery_methods_used = Vec::new();
    for method in steps.iter().filter_map(|s| s.delivery_method) {
        if !delivery_methods_used.contains(&method) {
            delivery_methods_used.push(method);
        }
    }

    let practice: Vec<&Candidate> = sequence.iter().filter(|c| !c.is_teaching()).collect();
    PlanMetadata {
        total_steps: steps.len(),
        teach_count: sequence.len() - practice.len(),
        practice_count: practice.len(),
        review_count: practice.iter().filter(|c| c.is_review()).count(),
        new_count: practice.iter().filter(|c| !c.is_review()).count(),
        target_item_count,
        estimated_total_sec: steps.iter().map(|s| s.estimated_time_sec).sum(),
        topics_covered,
        delivery_methods_used,
    }
}
