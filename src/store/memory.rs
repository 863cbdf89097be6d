//! Process-local store used by tests and the demo binary when no database is configured.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{
    AttemptSummary, DurationHistory, LearnerPreferences, LearningStore, PerformanceRecord,
    PreferenceSource, QuestionRecord, StoreError, TeachingRecord,
};
use crate::services::mastery::SkillMastery;
use crate::types::{ContentScope, DeliveryMethod};

/// Injected failure for a named store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    SchemaMismatch,
    Unavailable,
}

#[derive(Default)]
struct State {
    questions: BTreeMap<String, QuestionRecord>,
    teachings: BTreeMap<String, TeachingRecord>,
    performance: Vec<PerformanceRecord>,
    seen_teachings: HashMap<String, HashSet<String>>,
    durations: HashMap<String, DurationHistory>,
    method_scores: HashMap<String, HashMap<DeliveryMethod, f64>>,
    masteries: HashMap<(String, String), SkillMastery>,
    preferences: HashMap<String, LearnerPreferences>,
    failures: HashMap<&'static str, FailureMode>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

fn in_scope(question: &QuestionRecord, scope: &ContentScope) -> bool {
    let lesson_ok = scope
        .lesson_id
        .as_ref()
        .map_or(true, |id| question.lesson_id.as_ref() == Some(id));
    let module_ok = scope
        .module_id
        .as_ref()
        .map_or(true, |id| question.module_id.as_ref() == Some(id));
    lesson_ok && module_ok
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_question(&self, question: QuestionRecord) {
        self.state.write().questions.insert(question.id.clone(), question);
    }

    pub fn insert_teaching(&self, teaching: TeachingRecord) {
        self.state.write().teachings.insert(teaching.id.clone(), teaching);
    }

    pub fn push_performance(&self, record: PerformanceRecord) {
        self.state.write().performance.push(record);
    }

    pub fn set_preferences(&self, learner_id: &str, preferences: LearnerPreferences) {
        self.state
            .write()
            .preferences
            .insert(learner_id.to_string(), preferences);
    }

    pub fn set_method_score(&self, learner_id: &str, method: DeliveryMethod, score: f64) {
        self.state
            .write()
            .method_scores
            .entry(learner_id.to_string())
            .or_default()
            .insert(method, score);
    }

    pub fn set_duration_history(&self, learner_id: &str, history: DurationHistory) {
        self.state
            .write()
            .durations
            .insert(learner_id.to_string(), history);
    }

    /// Makes every subsequent call to `operation` fail until cleared.
    pub fn fail_operation(&self, operation: &'static str, mode: FailureMode) {
        self.state.write().failures.insert(operation, mode);
    }

    pub fn clear_failures(&self) {
        self.state.write().failures.clear();
    }

    pub fn performance_for(&self, learner_id: &str) -> Vec<PerformanceRecord> {
        self.state
            .read()
            .performance
            .iter()
            .filter(|r| r.learner_id == learner_id)
            .cloned()
            .collect()
    }

    fn check(&self, operation: &'static str) -> Result<(), StoreError> {
        match self.state.read().failures.get(operation) {
            None => Ok(()),
            Some(FailureMode::SchemaMismatch) => Err(StoreError::SchemaMismatch(format!(
                "{operation}: relation does not exist"
            ))),
            Some(FailureMode::Unavailable) => {
                Err(StoreError::Unavailable(format!("{operation}: connection refused")))
            }
        }
    }
}

#[async_trait]
impl LearningStore for InMemoryStore {
    async fn due_performance(
        &self,
        learner_id: &str,
        scope: &ContentScope,
        now: DateTime<Utc>,
    ) -> Result<Vec<PerformanceRecord>, StoreError> {
        self.check("due_performance")?;
        let state = self.state.read();
        let mut latest: HashMap<&str, &PerformanceRecord> = HashMap::new();
        for record in state.performance.iter().filter(|r| r.learner_id == learner_id) {
            match latest.get(record.question_id.as_str()) {
                Some(existing) if existing.created_at >= record.created_at => {}
                _ => {
                    latest.insert(record.question_id.as_str(), record);
                }
            }
        }
        Ok(latest
            .into_values()
            .filter(|r| r.next_review_due <= now)
            .filter(|r| {
                state
                    .questions
                    .get(&r.question_id)
                    .map_or(false, |q| in_scope(q, scope))
            })
            .cloned()
            .collect())
    }

    async fn recent_attempts(
        &self,
        learner_id: &str,
        question_ids: &[String],
        per_question: usize,
    ) -> Result<HashMap<String, Vec<AttemptSummary>>, StoreError> {
        self.check("recent_attempts")?;
        let wanted: HashSet<&String> = question_ids.iter().collect();
        let mut out: HashMap<String, Vec<AttemptSummary>> = HashMap::new();
        for record in self.state.read().performance.iter() {
            if record.learner_id == learner_id && wanted.contains(&record.question_id) {
                out.entry(record.question_id.clone())
                    .or_default()
                    .push(AttemptSummary {
                        score: record.score,
                        timestamp: record.created_at,
                    });
            }
        }
        for attempts in out.values_mut() {
            attempts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            attempts.truncate(per_question);
        }
        Ok(out)
    }

    async fn latest_performance(
        &self,
        learner_id: &str,
        question_id: &str,
    ) -> Result<Option<PerformanceRecord>, StoreError> {
        self.check("latest_performance")?;
        Ok(self
            .state
            .read()
            .performance
            .iter()
            .filter(|r| r.learner_id == learner_id && r.question_id == question_id)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn questions_in_scope(&self, scope: &ContentScope) -> Result<Vec<QuestionRecord>, StoreError> {
        self.check("questions_in_scope")?;
        Ok(self
            .state
            .read()
            .questions
            .values()
            .filter(|q| in_scope(q, scope))
            .cloned()
            .collect())
    }

    async fn questions_by_ids(&self, ids: &[String]) -> Result<Vec<QuestionRecord>, StoreError> {
        self.check("questions_by_ids")?;
        let state = self.state.read();
        Ok(ids.iter().filter_map(|id| state.questions.get(id).cloned()).collect())
    }

    async fn teachings_by_ids(&self, ids: &[String]) -> Result<Vec<TeachingRecord>, StoreError> {
        self.check("teachings_by_ids")?;
        let state = self.state.read();
        Ok(ids.iter().filter_map(|id| state.teachings.get(id).cloned()).collect())
    }

    async fn attempted_question_ids(&self, learner_id: &str) -> Result<HashSet<String>, StoreError> {
        self.check("attempted_question_ids")?;
        Ok(self
            .state
            .read()
            .performance
            .iter()
            .filter(|r| r.learner_id == learner_id)
            .map(|r| r.question_id.clone())
            .collect())
    }

    async fn seen_teaching_ids(&self, learner_id: &str) -> Result<HashSet<String>, StoreError> {
        self.check("seen_teaching_ids")?;
        Ok(self
            .state
            .read()
            .seen_teachings
            .get(learner_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn mark_teaching_seen(&self, learner_id: &str, teaching_id: &str) -> Result<(), StoreError> {
        self.check("mark_teaching_seen")?;
        self.state
            .write()
            .seen_teachings
            .entry(learner_id.to_string())
            .or_default()
            .insert(teaching_id.to_string());
        Ok(())
    }

    async fn duration_history(&self, learner_id: &str) -> Result<DurationHistory, StoreError> {
        self.check("duration_history")?;
        let state = self.state.read();
        if let Some(history) = state.durations.get(learner_id) {
            return Ok(history.clone());
        }

        let mut total_ms = 0i64;
        let mut count = 0usize;
        let mut by_method: HashMap<DeliveryMethod, (i64, usize)> = HashMap::new();
        for record in state.performance.iter().filter(|r| r.learner_id == learner_id) {
            total_ms += record.time_ms;
            count += 1;
            if let Some(method) = record.delivery_method {
                let entry = by_method.entry(method).or_default();
                entry.0 += record.time_ms;
                entry.1 += 1;
            }
        }
        Ok(DurationHistory {
            teaching_avg_sec: None,
            practice_avg_sec: (count > 0).then(|| total_ms as f64 / count as f64 / 1000.0),
            by_method: by_method
                .into_iter()
                .map(|(method, (ms, n))| (method, ms as f64 / n as f64 / 1000.0))
                .collect(),
        })
    }

    async fn delivery_method_scores(
        &self,
        learner_id: &str,
    ) -> Result<HashMap<DeliveryMethod, f64>, StoreError> {
        self.check("delivery_method_scores")?;
        Ok(self
            .state
            .read()
            .method_scores
            .get(learner_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn skill_mastery(
        &self,
        learner_id: &str,
        skill_tag: &str,
    ) -> Result<Option<SkillMastery>, StoreError> {
        self.check("skill_mastery")?;
        Ok(self
            .state
            .read()
            .masteries
            .get(&(learner_id.to_string(), skill_tag.to_string()))
            .cloned())
    }

    async fn skill_masteries(&self, learner_id: &str) -> Result<Vec<SkillMastery>, StoreError> {
        self.check("skill_masteries")?;
        let mut out: Vec<SkillMastery> = self
            .state
            .read()
            .masteries
            .values()
            .filter(|m| m.learner_id == learner_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.skill_tag.cmp(&b.skill_tag));
        Ok(out)
    }

    async fn upsert_skill_mastery(&self, mastery: &SkillMastery) -> Result<(), StoreError> {
        self.check("upsert_skill_mastery")?;
        self.state.write().masteries.insert(
            (mastery.learner_id.clone(), mastery.skill_tag.clone()),
            mastery.clone(),
        );
        Ok(())
    }

    async fn delete_skill_masteries(&self, learner_id: &str) -> Result<u64, StoreError> {
        self.check("delete_skill_masteries")?;
        let mut state = self.state.write();
        let before = state.masteries.len();
        state.masteries.retain(|(learner, _), _| learner != learner_id);
        Ok((before - state.masteries.len()) as u64)
    }

    async fn append_performance(&self, record: &PerformanceRecord) -> Result<(), StoreError> {
        self.check("append_performance")?;
        self.state.write().performance.push(record.clone());
        Ok(())
    }
}

#[async_trait]
impl PreferenceSource for InMemoryStore {
    async fn preferences(&self, learner_id: &str) -> Result<LearnerPreferences, StoreError> {
        self.check("preferences")?;
        Ok(self
            .state
            .read()
            .preferences
            .get(learner_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    fn record(question_id: &str, score: f64, minutes_ago: i64) -> PerformanceRecord {
        PerformanceRecord {
            id: format!("{question_id}-{minutes_ago}"),
            learner_id: "learner".to_string(),
            question_id: question_id.to_string(),
            score,
            time_ms: 30_000,
            delivery_method: Some(DeliveryMethod::Flashcard),
            next_review_due: now() - Duration::minutes(minutes_ago) + Duration::hours(1),
            srs: Default::default(),
            created_at: now() - Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn due_performance_uses_latest_record_per_question() {
        let store = InMemoryStore::new();
        store.insert_question(QuestionRecord {
            id: "q1".to_string(),
            lesson_id: Some("l1".to_string()),
            ..Default::default()
        });
        store.insert_question(QuestionRecord {
            id: "q2".to_string(),
            lesson_id: Some("l2".to_string()),
            ..Default::default()
        });
        store.push_performance(record("q1", 50.0, 120));
        store.push_performance(record("q2", 50.0, 120));
        store.push_performance(record("q1", 50.0, 10));

        let all = store
            .due_performance("learner", &ContentScope::default(), now())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].question_id, "q2");

        let later = store
            .due_performance("learner", &ContentScope::default(), now() + Duration::hours(2))
            .await
            .unwrap();
        let mut ids: Vec<(&str, DateTime<Utc>)> =
            later.iter().map(|r| (r.question_id.as_str(), r.created_at)).collect();
        ids.sort();
        assert_eq!(
            ids,
            vec![
                ("q1", now() - Duration::minutes(10)),
                ("q2", now() - Duration::minutes(120)),
            ]
        );

        let lesson = store
            .due_performance("learner", &ContentScope::lesson("l2"), now())
            .await
            .unwrap();
        assert_eq!(lesson.len(), 1);
        assert_eq!(lesson[0].question_id, "q2");
    }

    #[tokio::test]
    async fn recent_attempts_newest_first_and_truncated() {
        let store = InMemoryStore::new();
        for (i, score) in [10.0, 20.0, 30.0].into_iter().enumerate() {
            store.push_performance(record("q1", score, 30 - i as i64 * 10));
        }
        let attempts = store
            .recent_attempts("learner", &["q1".to_string()], 2)
            .await
            .unwrap();
        let scores: Vec<f64> = attempts["q1"].iter().map(|a| a.score).collect();
        assert_eq!(scores, vec![30.0, 20.0]);
    }

    #[tokio::test]
    async fn duration_history_derived_from_attempts() {
        let store = InMemoryStore::new();
        store.push_performance(record("q1", 90.0, 5));
        let history = store.duration_history("learner").await.unwrap();
        assert_eq!(history.practice_avg_sec, Some(30.0));
        assert_eq!(history.by_method.get(&DeliveryMethod::Flashcard), Some(&30.0));
    }

    #[tokio::test]
    async fn injected_failures_surface_as_errors() {
        let store = InMemoryStore::new();
        store.fail_operation("questions_in_scope", FailureMode::SchemaMismatch);
        let err = store
            .questions_in_scope(&ContentScope::default())
            .await
            .unwrap_err();
        assert!(err.is_schema_mismatch());

        store.clear_failures();
        assert!(store.questions_in_scope(&ContentScope::default()).await.is_ok());
    }
}
