use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use crate::services::mastery::{BktParams, SkillMastery};
use crate::store::{
    AttemptSummary, DurationHistory, LearnerPreferences, LearningStore, PerformanceRecord,
    PreferenceSource, QuestionRecord, SrsState, StoreError, TeachingRecord,
};
use crate::types::{ContentScope, DeliveryMethod, QuestionContent};

const MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Postgres-backed store over the learning schema.
#[derive(Clone)]
pub struct PgLearningStore {
    pool: PgPool,
}

impl PgLearningStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn utc(naive: NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(naive, Utc)
}

fn parse_methods(raw: Vec<String>) -> Vec<DeliveryMethod> {
    raw.iter()
        .filter_map(|m| {
            let parsed = DeliveryMethod::parse(m);
            if parsed.is_none() {
                tracing::debug!(method = %m, "unknown delivery method ignored");
            }
            parsed
        })
        .collect()
}

fn map_performance(row: &PgRow) -> Result<PerformanceRecord, sqlx::Error> {
    let method: Option<String> = row.try_get("deliveryMethod")?;
    let repetitions: i32 = row.try_get("repetitions")?;
    Ok(PerformanceRecord {
        id: row.try_get("id")?,
        learner_id: row.try_get("learnerId")?,
        question_id: row.try_get("questionId")?,
        score: row.try_get("score")?,
        time_ms: row.try_get("timeMs")?,
        delivery_method: method.as_deref().and_then(DeliveryMethod::parse),
        next_review_due: utc(row.try_get("nextReviewDue")?),
        srs: SrsState {
            interval_days: row.try_get("intervalDays")?,
            stability: row.try_get("stability")?,
            difficulty: row.try_get("difficulty")?,
            repetitions: repetitions.max(0) as u32,
        },
        created_at: utc(row.try_get("createdAt")?),
    })
}

fn map_question(row: &PgRow) -> Result<QuestionRecord, sqlx::Error> {
    let content: serde_json::Value = row.try_get("content")?;
    let id: String = row.try_get("id")?;
    let content = serde_json::from_value::<QuestionContent>(content).unwrap_or_else(|err| {
        tracing::warn!(question_id = %id, error = %err, "malformed question content");
        QuestionContent::default()
    });
    Ok(QuestionRecord {
        id,
        teaching_id: row.try_get("teachingId")?,
        lesson_id: row.try_get("lessonId")?,
        module_id: row.try_get("moduleId")?,
        level: row.try_get("level")?,
        skill_tags: row.try_get("skillTags")?,
        delivery_methods: parse_methods(row.try_get("deliveryMethods")?),
        content,
    })
}

fn map_teaching(row: &PgRow) -> Result<TeachingRecord, sqlx::Error> {
    Ok(TeachingRecord {
        id: row.try_get("id")?,
        lesson_id: row.try_get("lessonId")?,
        module_id: row.try_get("moduleId")?,
        level: row.try_get("level")?,
        title: row.try_get("title")?,
        tip: row.try_get("tip")?,
        skill_tags: row.try_get("skillTags")?,
    })
}

fn map_mastery(row: &PgRow) -> Result<SkillMastery, sqlx::Error> {
    Ok(SkillMastery {
        learner_id: row.try_get("learnerId")?,
        skill_tag: row.try_get("skillTag")?,
        mastery_probability: row.try_get("masteryProbability")?,
        params: BktParams {
            prior: row.try_get("prior")?,
            learn: row.try_get("learn")?,
            guess: row.try_get("guess")?,
            slip: row.try_get("slip")?,
        },
        last_updated: utc(row.try_get("lastUpdated")?),
    })
}

fn collect<T>(rows: &[PgRow], map: fn(&PgRow) -> Result<T, sqlx::Error>) -> Result<Vec<T>, StoreError> {
    rows.iter().map(|row| map(row).map_err(StoreError::from)).collect()
}

fn method_scores_from_json(value: serde_json::Value) -> HashMap<DeliveryMethod, f64> {
    let serde_json::Value::Object(entries) = value else {
        return HashMap::new();
    };
    entries
        .into_iter()
        .filter_map(|(k, v)| Some((DeliveryMethod::parse(&k)?, v.as_f64()?)))
        .collect()
}

const QUESTION_COLUMNS: &str = r#""id", "teachingId", "lessonId", "moduleId", "level", "skillTags", "deliveryMethods", "content""#;
const TEACHING_COLUMNS: &str = r#""id", "lessonId", "moduleId", "level", "title", "tip", "skillTags""#;

#[async_trait]
impl LearningStore for PgLearningStore {
    async fn due_performance(
        &self,
        learner_id: &str,
        scope: &ContentScope,
        now: DateTime<Utc>,
    ) -> Result<Vec<PerformanceRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT latest.* FROM (
                SELECT DISTINCT ON (p."questionId")
                       p."id", p."learnerId", p."questionId", p."score", p."timeMs",
                       p."deliveryMethod", p."nextReviewDue", p."intervalDays", p."stability",
                       p."difficulty", p."repetitions", p."createdAt"
                FROM "question_performance" p
                WHERE p."learnerId" = $1
                ORDER BY p."questionId", p."createdAt" DESC
            ) latest
            JOIN "questions" q ON q."id" = latest."questionId"
            WHERE latest."nextReviewDue" <= $2
              AND ($3::text IS NULL OR q."lessonId" = $3)
              AND ($4::text IS NULL OR q."moduleId" = $4)
            "#,
        )
        .bind(learner_id)
        .bind(now.naive_utc())
        .bind(scope.lesson_id.as_deref())
        .bind(scope.module_id.as_deref())
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, map_performance)
    }

    async fn recent_attempts(
        &self,
        learner_id: &str,
        question_ids: &[String],
        per_question: usize,
    ) -> Result<HashMap<String, Vec<AttemptSummary>>, StoreError> {
        if question_ids.is_empty() || per_question == 0 {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT "questionId", "score", "createdAt" FROM (
                SELECT "questionId", "score", "createdAt",
                       ROW_NUMBER() OVER (PARTITION BY "questionId" ORDER BY "createdAt" DESC) AS rn
                FROM "question_performance"
                WHERE "learnerId" = $1 AND "questionId" = ANY($2)
            ) ranked
            WHERE rn <= $3
            ORDER BY "questionId", "createdAt" DESC
            "#,
        )
        .bind(learner_id)
        .bind(question_ids)
        .bind(per_question as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out: HashMap<String, Vec<AttemptSummary>> = HashMap::new();
        for row in &rows {
            let question_id: String = row.try_get("questionId")?;
            out.entry(question_id).or_default().push(AttemptSummary {
                score: row.try_get("score")?,
                timestamp: utc(row.try_get("createdAt")?),
            });
        }
        Ok(out)
    }

    async fn latest_performance(
        &self,
        learner_id: &str,
        question_id: &str,
    ) -> Result<Option<PerformanceRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM "question_performance"
            WHERE "learnerId" = $1 AND "questionId" = $2
            ORDER BY "createdAt" DESC
            LIMIT 1
            "#,
        )
        .bind(learner_id)
        .bind(question_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(map_performance).transpose()?)
    }

    async fn questions_in_scope(&self, scope: &ContentScope) -> Result<Vec<QuestionRecord>, StoreError> {
        let sql = format!(
            r#"SELECT {QUESTION_COLUMNS} FROM "questions"
            WHERE ($1::text IS NULL OR "lessonId" = $1)
              AND ($2::text IS NULL OR "moduleId" = $2)
            ORDER BY "id""#
        );
        let rows = sqlx::query(&sql)
            .bind(scope.lesson_id.as_deref())
            .bind(scope.module_id.as_deref())
            .fetch_all(&self.pool)
            .await?;
        collect(&rows, map_question)
    }

    async fn questions_by_ids(&self, ids: &[String]) -> Result<Vec<QuestionRecord>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(r#"SELECT {QUESTION_COLUMNS} FROM "questions" WHERE "id" = ANY($1)"#);
        let rows = sqlx::query(&sql).bind(ids).fetch_all(&self.pool).await?;
        collect(&rows, map_question)
    }

    async fn teachings_by_ids(&self, ids: &[String]) -> Result<Vec<TeachingRecord>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(r#"SELECT {TEACHING_COLUMNS} FROM "teachings" WHERE "id" = ANY($1)"#);
        let rows = sqlx::query(&sql).bind(ids).fetch_all(&self.pool).await?;
        collect(&rows, map_teaching)
    }

    async fn attempted_question_ids(&self, learner_id: &str) -> Result<HashSet<String>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT DISTINCT "questionId" FROM "question_performance" WHERE "learnerId" = $1"#,
        )
        .bind(learner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("questionId").map_err(StoreError::from))
            .collect()
    }

    async fn seen_teaching_ids(&self, learner_id: &str) -> Result<HashSet<String>, StoreError> {
        let rows = sqlx::query(r#"SELECT "teachingId" FROM "teaching_views" WHERE "learnerId" = $1"#)
            .bind(learner_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("teachingId").map_err(StoreError::from))
            .collect()
    }

    async fn mark_teaching_seen(&self, learner_id: &str, teaching_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO "teaching_views" ("learnerId", "teachingId", "viewedAt")
            VALUES ($1, $2, $3)
            ON CONFLICT ("learnerId", "teachingId") DO NOTHING
            "#,
        )
        .bind(learner_id)
        .bind(teaching_id)
        .bind(Utc::now().naive_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn duration_history(&self, learner_id: &str) -> Result<DurationHistory, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT "deliveryMethod", AVG("timeMs")::float8 AS "avgMs", COUNT(*)::int8 AS "attempts"
            FROM "question_performance"
            WHERE "learnerId" = $1 AND "timeMs" > 0
            GROUP BY "deliveryMethod"
            "#,
        )
        .bind(learner_id)
        .fetch_all(&self.pool)
        .await?;

        let mut history = DurationHistory::default();
        let mut total_ms = 0.0;
        let mut total_attempts = 0i64;
        for row in &rows {
            let method: Option<String> = row.try_get("deliveryMethod")?;
            let avg_ms: f64 = row.try_get("avgMs")?;
            let attempts: i64 = row.try_get("attempts")?;
            total_ms += avg_ms * attempts as f64;
            total_attempts += attempts;
            if let Some(method) = method.as_deref().and_then(DeliveryMethod::parse) {
                history.by_method.insert(method, avg_ms / 1000.0);
            }
        }
        if total_attempts > 0 {
            history.practice_avg_sec = Some(total_ms / total_attempts as f64 / 1000.0);
        }

        let teaching_avg_ms: Option<f64> = sqlx::query(
            r#"SELECT AVG("durationMs")::float8 AS "avgMs" FROM "teaching_views" WHERE "learnerId" = $1"#,
        )
        .bind(learner_id)
        .fetch_one(&self.pool)
        .await?
        .try_get("avgMs")?;
        history.teaching_avg_sec = teaching_avg_ms.map(|ms| ms / 1000.0);

        Ok(history)
    }

    async fn delivery_method_scores(
        &self,
        learner_id: &str,
    ) -> Result<HashMap<DeliveryMethod, f64>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT "deliveryMethod", "score" FROM "delivery_method_scores" WHERE "learnerId" = $1"#,
        )
        .bind(learner_id)
        .fetch_all(&self.pool)
        .await?;
        let mut scores = HashMap::new();
        for row in &rows {
            let method: String = row.try_get("deliveryMethod")?;
            if let Some(method) = DeliveryMethod::parse(&method) {
                scores.insert(method, row.try_get::<f64, _>("score")?);
            }
        }
        Ok(scores)
    }

    async fn skill_mastery(
        &self,
        learner_id: &str,
        skill_tag: &str,
    ) -> Result<Option<SkillMastery>, StoreError> {
        let row = sqlx::query(
            r#"SELECT * FROM "skill_mastery" WHERE "learnerId" = $1 AND "skillTag" = $2"#,
        )
        .bind(learner_id)
        .bind(skill_tag)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(map_mastery).transpose()?)
    }

    async fn skill_masteries(&self, learner_id: &str) -> Result<Vec<SkillMastery>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT * FROM "skill_mastery" WHERE "learnerId" = $1 ORDER BY "skillTag""#,
        )
        .bind(learner_id)
        .fetch_all(&self.pool)
        .await?;
        collect(&rows, map_mastery)
    }

    async fn upsert_skill_mastery(&self, mastery: &SkillMastery) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO "skill_mastery" (
                "learnerId", "skillTag", "masteryProbability",
                "prior", "learn", "guess", "slip", "lastUpdated"
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT ("learnerId", "skillTag") DO UPDATE SET
                "masteryProbability" = EXCLUDED."masteryProbability",
                "prior" = EXCLUDED."prior",
                "learn" = EXCLUDED."learn",
                "guess" = EXCLUDED."guess",
                "slip" = EXCLUDED."slip",
                "lastUpdated" = EXCLUDED."lastUpdated"
            "#,
        )
        .bind(&mastery.learner_id)
        .bind(&mastery.skill_tag)
        .bind(mastery.mastery_probability)
        .bind(mastery.params.prior)
        .bind(mastery.params.learn)
        .bind(mastery.params.guess)
        .bind(mastery.params.slip)
        .bind(mastery.last_updated.naive_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_skill_masteries(&self, learner_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query(r#"DELETE FROM "skill_mastery" WHERE "learnerId" = $1"#)
            .bind(learner_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn append_performance(&self, record: &PerformanceRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO "question_performance" (
                "id", "learnerId", "questionId", "score", "timeMs", "deliveryMethod",
                "nextReviewDue", "intervalDays", "stability", "difficulty", "repetitions", "createdAt"
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&record.id)
        .bind(&record.learner_id)
        .bind(&record.question_id)
        .bind(record.score)
        .bind(record.time_ms)
        .bind(record.delivery_method.map(|m| m.as_str()))
        .bind(record.next_review_due.naive_utc())
        .bind(record.srs.interval_days)
        .bind(record.srs.stability)
        .bind(record.srs.difficulty)
        .bind(record.srs.repetitions as i32)
        .bind(record.created_at.naive_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceSource for PgLearningStore {
    async fn preferences(&self, learner_id: &str) -> Result<LearnerPreferences, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT "challengeWeight", "sessionMinutes", "methodScores", "bktDefaults"
            FROM "learner_preferences"
            WHERE "learnerId" = $1
            "#,
        )
        .bind(learner_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(LearnerPreferences::default());
        };

        let challenge_weight: Option<f64> = row.try_get("challengeWeight")?;
        let session_minutes: Option<i32> = row.try_get("sessionMinutes")?;
        let method_scores: Option<serde_json::Value> = row.try_get("methodScores")?;
        let bkt_defaults: Option<serde_json::Value> = row.try_get("bktDefaults")?;

        Ok(LearnerPreferences {
            challenge_weight: challenge_weight.unwrap_or(0.5),
            session_minutes: session_minutes.filter(|m| *m > 0).map(|m| m as u32),
            method_scores: method_scores.map(method_scores_from_json).unwrap_or_default(),
            bkt_defaults: bkt_defaults.and_then(|v| serde_json::from_value(v).ok()),
        })
    }
}
