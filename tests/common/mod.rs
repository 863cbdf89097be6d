#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use danci_session_engine::clock::ManualClock;
use danci_session_engine::config::EngineConfig;
use danci_session_engine::services::srs::FsrsScheduler;
use danci_session_engine::store::memory::InMemoryStore;
use danci_session_engine::store::{PerformanceRecord, QuestionRecord, SrsState, TeachingRecord};
use danci_session_engine::types::{DeliveryMethod, QuestionContent, StepItem};
use danci_session_engine::{AttemptRecorder, SessionPlanner};

pub const LEARNER: &str = "learner-1";
pub const SEED: u64 = 42;

pub struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub clock: Arc<ManualClock>,
    pub planner: SessionPlanner,
    pub recorder: AttemptRecorder,
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
}

pub fn fixture() -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let planner = SessionPlanner::new(
        store.clone(),
        store.clone(),
        clock.clone(),
        EngineConfig::default(),
    )
    .with_seed(SEED);
    let scheduler = Arc::new(FsrsScheduler::new(store.clone(), clock.clone()));
    let recorder = AttemptRecorder::new(
        store.clone(),
        store.clone(),
        scheduler,
        planner.cache(),
        clock.clone(),
    );
    Fixture {
        store,
        clock,
        planner,
        recorder,
    }
}

pub fn question(id: &str, tags: &[&str], methods: &[DeliveryMethod]) -> QuestionRecord {
    QuestionRecord {
        id: id.to_string(),
        lesson_id: Some("lesson-1".to_string()),
        module_id: Some("module-1".to_string()),
        level: Some("A2".to_string()),
        skill_tags: tags.iter().map(|t| t.to_string()).collect(),
        delivery_methods: methods.to_vec(),
        content: QuestionContent {
            prompt: format!("What is {id}?"),
            answer: Some(format!("{id} answer")),
            options: vec![format!("{id} answer"), "decoy".to_string()],
            sentence: Some(format!("Fill the ___ for {id}")),
            source_text: Some(format!("source {id}")),
            audio_url: None,
        },
        ..Default::default()
    }
}

pub fn flashcard(id: &str, tag: &str) -> QuestionRecord {
    question(id, &[tag], &[DeliveryMethod::Flashcard])
}

pub fn taught(mut question: QuestionRecord, teaching_id: &str) -> QuestionRecord {
    question.teaching_id = Some(teaching_id.to_string());
    question
}

pub fn teaching(id: &str, tag: &str) -> TeachingRecord {
    TeachingRecord {
        id: id.to_string(),
        lesson_id: Some("lesson-1".to_string()),
        module_id: Some("module-1".to_string()),
        level: Some("A2".to_string()),
        title: format!("About {tag}"),
        tip: Some("Mind the word order".to_string()),
        skill_tags: vec![tag.to_string()],
    }
}

/// A past attempt whose review came due `hours_overdue` hours ago.
pub fn due_record(question_id: &str, hours_overdue: i64, score: f64) -> PerformanceRecord {
    PerformanceRecord {
        id: format!("perf-{question_id}-{hours_overdue}"),
        learner_id: LEARNER.to_string(),
        question_id: question_id.to_string(),
        score,
        time_ms: 20_000,
        delivery_method: Some(DeliveryMethod::Flashcard),
        next_review_due: start() - Duration::hours(hours_overdue),
        srs: SrsState {
            interval_days: 1.0,
            stability: 1.0,
            difficulty: 0.5,
            repetitions: 1,
        },
        created_at: start() - Duration::hours(hours_overdue + 24),
    }
}

pub fn item_id(item: &StepItem) -> Option<&str> {
    match item {
        StepItem::Teaching { teaching_id, .. } => Some(teaching_id.as_str()),
        StepItem::Flashcard { question_id, .. }
        | StepItem::MultipleChoice { question_id, .. }
        | StepItem::FillBlank { question_id, .. }
        | StepItem::Translation { question_id, .. }
        | StepItem::Speaking { question_id, .. }
        | StepItem::Listening { question_id, .. }
        | StepItem::Generic { question_id, .. } => Some(question_id.as_str()),
        StepItem::Recap { .. } => None,
    }
}
