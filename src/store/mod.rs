pub mod memory;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::mastery::{BktParams, SkillMastery};
use crate::types::{ContentScope, DeliveryMethod, QuestionContent};

const UNDEFINED_COLUMN: &str = "42703";
const UNDEFINED_TABLE: &str = "42P01";

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing schema is missing a table or column, typically mid-migration.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("sql error: {0}")]
    Sql(sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_schema_mismatch(&self) -> bool {
        matches!(self, Self::SchemaMismatch(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::ColumnNotFound(column) = &err {
            return Self::SchemaMismatch(format!("column {column} not found"));
        }
        let code = err
            .as_database_error()
            .and_then(|db| db.code().map(|c| c.into_owned()));
        match code.as_deref() {
            Some(UNDEFINED_COLUMN) | Some(UNDEFINED_TABLE) => Self::SchemaMismatch(err.to_string()),
            _ => Self::Sql(err),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SrsState {
    pub interval_days: f64,
    pub stability: f64,
    pub difficulty: f64,
    pub repetitions: u32,
}

/// One attempt as logged by the spaced-repetition collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceRecord {
    pub id: String,
    pub learner_id: String,
    pub question_id: String,
    /// 0..=100
    pub score: f64,
    pub time_ms: i64,
    pub delivery_method: Option<DeliveryMethod>,
    pub next_review_due: DateTime<Utc>,
    pub srs: SrsState,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSummary {
    pub score: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRecord {
    pub id: String,
    pub teaching_id: Option<String>,
    pub lesson_id: Option<String>,
    pub module_id: Option<String>,
    pub level: Option<String>,
    pub skill_tags: Vec<String>,
    pub delivery_methods: Vec<DeliveryMethod>,
    pub content: QuestionContent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeachingRecord {
    pub id: String,
    pub lesson_id: Option<String>,
    pub module_id: Option<String>,
    pub level: Option<String>,
    pub title: String,
    pub tip: Option<String>,
    pub skill_tags: Vec<String>,
}

/// Historical per-learner step durations, in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DurationHistory {
    pub teaching_avg_sec: Option<f64>,
    pub practice_avg_sec: Option<f64>,
    #[serde(default)]
    pub by_method: HashMap<DeliveryMethod, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerPreferences {
    pub challenge_weight: f64,
    pub session_minutes: Option<u32>,
    #[serde(default)]
    pub method_scores: HashMap<DeliveryMethod, f64>,
    pub bkt_defaults: Option<BktParams>,
}

impl Default for LearnerPreferences {
    fn default() -> Self {
        Self {
            challenge_weight: 0.5,
            session_minutes: None,
            method_scores: HashMap::new(),
            bkt_defaults: None,
        }
    }
}

/// Query layer the engine reads learner history and content from.
#[async_trait]
pub trait LearningStore: Send + Sync {
    /// Latest performance record per question, kept only when its `next_review_due <= now`.
    async fn due_performance(
        &self,
        learner_id: &str,
        scope: &ContentScope,
        now: DateTime<Utc>,
    ) -> Result<Vec<PerformanceRecord>, StoreError>;

    /// Most recent attempts per question, newest first, at most `per_question` each.
    async fn recent_attempts(
        &self,
        learner_id: &str,
        question_ids: &[String],
        per_question: usize,
    ) -> Result<HashMap<String, Vec<AttemptSummary>>, StoreError>;

    /// Newest record for one question, if the learner ever attempted it.
    async fn latest_performance(
        &self,
        learner_id: &str,
        question_id: &str,
    ) -> Result<Option<PerformanceRecord>, StoreError>;

    async fn questions_in_scope(&self, scope: &ContentScope) -> Result<Vec<QuestionRecord>, StoreError>;

    async fn questions_by_ids(&self, ids: &[String]) -> Result<Vec<QuestionRecord>, StoreError>;

    async fn teachings_by_ids(&self, ids: &[String]) -> Result<Vec<TeachingRecord>, StoreError>;

    async fn attempted_question_ids(&self, learner_id: &str) -> Result<HashSet<String>, StoreError>;

    async fn seen_teaching_ids(&self, learner_id: &str) -> Result<HashSet<String>, StoreError>;

    async fn mark_teaching_seen(&self, learner_id: &str, teaching_id: &str) -> Result<(), StoreError>;

    async fn duration_history(&self, learner_id: &str) -> Result<DurationHistory, StoreError>;

    async fn delivery_method_scores(
        &self,
        learner_id: &str,
    ) -> Result<HashMap<DeliveryMethod, f64>, StoreError>;

    async fn skill_mastery(
        &self,
        learner_id: &str,
        skill_tag: &str,
    ) -> Result<Option<SkillMastery>, StoreError>;

    async fn skill_masteries(&self, learner_id: &str) -> Result<Vec<SkillMastery>, StoreError>;

    async fn upsert_skill_mastery(&self, mastery: &SkillMastery) -> Result<(), StoreError>;

    async fn delete_skill_masteries(&self, learner_id: &str) -> Result<u64, StoreError>;

    async fn append_performance(&self, record: &PerformanceRecord) -> Result<(), StoreError>;
}

/// Onboarding-derived learner preferences.
#[async_trait]
pub trait PreferenceSource: Send + Sync {
    async fn preferences(&self, learner_id: &str) -> Result<LearnerPreferences, StoreError>;
}
