use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::services::difficulty::{adjust_for_mastery_default, base_difficulty_opt};
use crate::store::{AttemptSummary, LearningStore, PerformanceRecord, QuestionRecord, StoreError, TeachingRecord};
use crate::types::{Candidate, CandidateKind, ContentScope, DeliveryMethod, ExerciseType};

pub const RECENT_ATTEMPT_WINDOW: usize = 5;

const MS_PER_HOUR: f64 = 3_600_000.0;
const ERROR_SCORE_BELOW: f64 = 80.0;
const DEFAULT_AVERAGE_SCORE: f64 = 50.0;

const SPEAKING_KEYWORDS: &[&str] = &["pronounc", "speak", "listen", "accent"];
const TRANSLATION_KEYWORDS: &[&str] = &["translat"];
const GRAMMAR_KEYWORDS: &[&str] = &["grammar", "conjugat", "tense", "article", "agreement"];
const VOCABULARY_KEYWORDS: &[&str] = &["vocab", "word", "meaning", "phrase"];

/// Exercise type implied by the available delivery methods, falling back to
/// keywords in the teaching tip.
pub fn exercise_type_for<'a, I>(methods: I, tip: Option<&str>) -> ExerciseType
where
    I: IntoIterator<Item = &'a DeliveryMethod>,
{
    let methods: HashSet<DeliveryMethod> = methods.into_iter().copied().collect();
    let has = |m: DeliveryMethod| methods.contains(&m);

    if has(DeliveryMethod::SpeechToText) || has(DeliveryMethod::TextToSpeech) {
        ExerciseType::Speaking
    } else if has(DeliveryMethod::Translation) {
        ExerciseType::Translation
    } else if has(DeliveryMethod::FillBlank) {
        ExerciseType::Grammar
    } else if has(DeliveryMethod::MultipleChoice) || has(DeliveryMethod::Flashcard) {
        ExerciseType::Vocabulary
    } else {
        tip.and_then(exercise_type_from_tip)
            .unwrap_or(ExerciseType::Practice)
    }
}

pub fn exercise_type_from_tip(tip: &str) -> Option<ExerciseType> {
    let tip = tip.to_lowercase();
    let mentions = |keywords: &[&str]| keywords.iter().any(|k| tip.contains(k));

    if mentions(SPEAKING_KEYWORDS) {
        Some(ExerciseType::Speaking)
    } else if mentions(TRANSLATION_KEYWORDS) {
        Some(ExerciseType::Translation)
    } else if mentions(GRAMMAR_KEYWORDS) {
        Some(ExerciseType::Grammar)
    } else if mentions(VOCABULARY_KEYWORDS) {
        Some(ExerciseType::Vocabulary)
    } else {
        None
    }
}

/// Hours past the scheduled review, never negative.
pub fn due_score(now: DateTime<Utc>, next_review_due: DateTime<Utc>) -> f64 {
    ((now - next_review_due).num_milliseconds() as f64 / MS_PER_HOUR).max(0.0)
}

/// Number of recent attempts scored below 80.
pub fn error_score(attempts: &[AttemptSummary]) -> u32 {
    attempts.iter().filter(|a| a.score < ERROR_SCORE_BELOW).count() as u32
}

pub fn estimated_mastery(attempts: &[AttemptSummary]) -> f64 {
    let average = if attempts.is_empty() {
        DEFAULT_AVERAGE_SCORE
    } else {
        attempts.iter().map(|a| a.score).sum::<f64>() / attempts.len() as f64
    };
    (average / 100.0).clamp(0.0, 1.0)
}

/// Latest record per question by `created_at`, most overdue first.
pub fn latest_per_question(records: Vec<PerformanceRecord>) -> Vec<PerformanceRecord> {
    let mut latest: HashMap<String, PerformanceRecord> = HashMap::new();
    for record in records {
        match latest.get(&record.question_id) {
            Some(existing) if existing.created_at >= record.created_at => {}
            _ => {
                latest.insert(record.question_id.clone(), record);
            }
        }
    }
    let mut out: Vec<PerformanceRecord> = latest.into_values().collect();
    out.sort_by(|a, b| {
        a.next_review_due
            .cmp(&b.next_review_due)
            .then_with(|| a.question_id.cmp(&b.question_id))
    });
    out
}

fn skill_tags(question: &QuestionRecord, teaching: Option<&TeachingRecord>) -> BTreeSet<String> {
    question
        .skill_tags
        .iter()
        .chain(teaching.into_iter().flat_map(|t| t.skill_tags.iter()))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn level_for<'a>(question: &'a QuestionRecord, teaching: Option<&'a TeachingRecord>) -> Option<&'a str> {
    question
        .level
        .as_deref()
        .or_else(|| teaching.and_then(|t| t.level.as_deref()))
}

fn question_candidate(question: &QuestionRecord, teaching: Option<&TeachingRecord>) -> Candidate {
    Candidate {
        kind: CandidateKind::Question {
            teaching_id: question.teaching_id.clone(),
            content: question.content.clone(),
        },
        id: question.id.clone(),
        lesson_id: question
            .lesson_id
            .clone()
            .or_else(|| teaching.and_then(|t| t.lesson_id.clone())),
        due_score: 0.0,
        error_score: 0,
        time_since_last_seen_ms: f64::INFINITY,
        skill_tags: skill_tags(question, teaching),
        exercise_type: exercise_type_for(
            &question.delivery_methods,
            teaching.and_then(|t| t.tip.as_deref()),
        ),
        difficulty: 0.0,
        estimated_mastery: 0.0,
        delivery_methods: question.delivery_methods.iter().copied().collect(),
    }
}

pub fn teaching_candidate(teaching: &TeachingRecord) -> Candidate {
    Candidate {
        kind: CandidateKind::Teaching {
            title: teaching.title.clone(),
            tip: teaching.tip.clone(),
        },
        id: teaching.id.clone(),
        lesson_id: teaching.lesson_id.clone(),
        due_score: 0.0,
        error_score: 0,
        time_since_last_seen_ms: f64::INFINITY,
        skill_tags: teaching.skill_tags.iter().cloned().collect(),
        exercise_type: teaching
            .tip
            .as_deref()
            .and_then(exercise_type_from_tip)
            .unwrap_or(ExerciseType::Practice),
        difficulty: base_difficulty_opt(teaching.level.as_deref()),
        estimated_mastery: 0.0,
        delivery_methods: BTreeSet::new(),
    }
}

/// New content for teach-then-test composition.
#[derive(Debug, Clone, Default)]
pub struct NewContent {
    pub questions: Vec<Candidate>,
    pub teachings: HashMap<String, Candidate>,
    pub seen_teachings: HashSet<String>,
}

pub struct CandidateGenerator {
    store: Arc<dyn LearningStore>,
    clock: Arc<dyn Clock>,
    recent_window: usize,
}

impl CandidateGenerator {
    pub fn new(store: Arc<dyn LearningStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            recent_window: RECENT_ATTEMPT_WINDOW,
        }
    }

    /// Due-for-review candidates. A schema mismatch yields an empty list.
    pub async fn review_candidates(
        &self,
        learner_id: &str,
        scope: &ContentScope,
    ) -> Result<Vec<Candidate>, StoreError> {
        match self.load_review_candidates(learner_id, scope).await {
            Err(err) if err.is_schema_mismatch() => {
                tracing::warn!(
                    error = %err,
                    learner_id = %learner_id,
                    "review candidates unavailable during migration, returning empty list"
                );
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Never-attempted questions in scope. A schema mismatch yields no content.
    pub async fn new_content(
        &self,
        learner_id: &str,
        scope: &ContentScope,
    ) -> Result<NewContent, StoreError> {
        match self.load_new_content(learner_id, scope).await {
            Err(err) if err.is_schema_mismatch() => {
                tracing::warn!(
                    error = %err,
                    learner_id = %learner_id,
                    "new content unavailable during migration, returning empty list"
                );
                Ok(NewContent::default())
            }
            other => other,
        }
    }

    async fn load_review_candidates(
        &self,
        learner_id: &str,
        scope: &ContentScope,
    ) -> Result<Vec<Candidate>, StoreError> {
        let now = self.clock.now();
        let records = latest_per_question(self.store.due_performance(learner_id, scope, now).await?);
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let question_ids: Vec<String> = records.iter().map(|r| r.question_id.clone()).collect();
        let (questions, attempts) = futures::try_join!(
            self.store.questions_by_ids(&question_ids),
            self.store
                .recent_attempts(learner_id, &question_ids, self.recent_window),
        )?;
        let questions: HashMap<String, QuestionRecord> =
            questions.into_iter().map(|q| (q.id.clone(), q)).collect();
        let teachings = self.load_teachings(questions.values()).await?;

        let mut candidates = Vec::with_capacity(records.len());
        for record in &records {
            let Some(question) = questions.get(&record.question_id) else {
                tracing::debug!(
                    learner_id = %learner_id,
                    question_id = %record.question_id,
                    "due record without question metadata skipped"
                );
                continue;
            };
            let teaching = question.teaching_id.as_ref().and_then(|id| teachings.get(id));
            let recent: &[AttemptSummary] = attempts
                .get(&record.question_id)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let recent = &recent[..recent.len().min(self.recent_window)];

            let last_seen = recent
                .iter()
                .map(|a| a.timestamp)
                .max()
                .unwrap_or(record.created_at);
            let mastery = estimated_mastery(recent);
            let base = base_difficulty_opt(level_for(question, teaching));

            let mut candidate = question_candidate(question, teaching);
            // Due exactly now still counts as a review.
            candidate.due_score = due_score(now, record.next_review_due).max(f64::MIN_POSITIVE);
            candidate.error_score = error_score(recent);
            candidate.estimated_mastery = mastery;
            candidate.time_since_last_seen_ms = ((now - last_seen).num_milliseconds() as f64).max(0.0);
            candidate.difficulty = adjust_for_mastery_default(base, mastery);
            candidates.push(candidate);
        }

        tracing::debug!(
            learner_id = %learner_id,
            due = candidates.len(),
            "review candidates generated"
        );
        Ok(candidates)
    }

    async fn load_new_content(
        &self,
        learner_id: &str,
        scope: &ContentScope,
    ) -> Result<NewContent, StoreError> {
        let (in_scope, attempted, seen_teachings) = futures::try_join!(
            self.store.questions_in_scope(scope),
            self.store.attempted_question_ids(learner_id),
            self.store.seen_teaching_ids(learner_id),
        )?;

        let fresh: Vec<QuestionRecord> = in_scope
            .into_iter()
            .filter(|q| !attempted.contains(&q.id))
            .collect();
        let teaching_records = self.load_teachings(fresh.iter()).await?;

        let questions = fresh
            .iter()
            .map(|question| {
                let teaching = question
                    .teaching_id
                    .as_ref()
                    .and_then(|id| teaching_records.get(id));
                let mut candidate = question_candidate(question, teaching);
                candidate.difficulty =
                    base_difficulty_opt(level_for(question, teaching));
                candidate
            })
            .collect::<Vec<_>>();

        let teachings = teaching_records
            .values()
            .map(|t| (t.id.clone(), teaching_candidate(t)))
            .collect();

        tracing::debug!(
            learner_id = %learner_id,
            new = questions.len(),
            "new candidates generated"
        );
        Ok(NewContent {
            questions,
            teachings,
            seen_teachings,
        })
    }

    async fn load_teachings<'q, I>(&self, questions: I) -> Result<HashMap<String, TeachingRecord>, StoreError>
    where
        I: Iterator<Item = &'q QuestionRecord>,
    {
        let mut ids: Vec<String> = questions.filter_map(|q| q.teaching_id.clone()).collect();
        ids.sort();
        ids.dedup();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(self
            .store
            .teachings_by_ids(&ids)
            .await?
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect())
    }
}
