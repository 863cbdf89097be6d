mod common;

use std::collections::HashSet;

use chrono::Duration;

use common::*;
use danci_session_engine::store::memory::FailureMode;
use danci_session_engine::store::{DurationHistory, LearnerPreferences, StoreError};
use danci_session_engine::types::{ContentScope, DeliveryMethod, PlanContext, SessionMode, StepItem, StepType};
use danci_session_engine::PlanError;

fn ids(plan: &danci_session_engine::SessionPlan) -> Vec<String> {
    plan.steps
        .iter()
        .filter_map(|s| item_id(&s.item).map(str::to_string))
        .collect()
}

#[tokio::test]
async fn empty_pools_yield_single_recap_step() {
    let fx = fixture();
    for mode in [SessionMode::Review, SessionMode::Learn, SessionMode::Mixed] {
        let plan = fx
            .planner
            .create_plan(LEARNER, PlanContext::new(mode))
            .await
            .unwrap();
        assert_eq!(plan.steps.len(), 1, "mode {mode:?}");
        assert_eq!(plan.steps[0].step_type, StepType::Recap);
        assert_eq!(plan.steps[0].estimated_time_sec, 30);
        assert!(matches!(plan.steps[0].item, StepItem::Recap { .. }));
    }
}

#[tokio::test]
async fn empty_learner_id_is_rejected() {
    let fx = fixture();
    let err = fx
        .planner
        .create_plan("  ", PlanContext::new(SessionMode::Review))
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::EmptyLearnerId));
}

#[tokio::test]
async fn review_plan_has_no_duplicate_questions() {
    let fx = fixture();
    for (id, tag) in [("r1", "a"), ("r2", "b"), ("r3", "c")] {
        fx.store.insert_question(flashcard(id, tag));
    }
    fx.store.push_performance(due_record("r1", 5, 50.0));
    fx.store.push_performance(due_record("r1", 3, 60.0));
    fx.store.push_performance(due_record("r2", 4, 90.0));
    fx.store.push_performance(due_record("r3", 2, 95.0));

    let plan = fx
        .planner
        .create_plan(LEARNER, PlanContext::new(SessionMode::Review))
        .await
        .unwrap();

    let ids = ids(&plan);
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(ids.len(), 3);
    assert_eq!(unique.len(), 3);
    assert_eq!(plan.metadata.review_count, 3);
    assert_eq!(plan.metadata.new_count, 0);
    for step in &plan.steps {
        assert_eq!(step.step_type, StepType::Practice);
        assert_eq!(step.delivery_method, Some(DeliveryMethod::Flashcard));
        assert!(matches!(step.item, StepItem::Flashcard { .. }));
    }
}

#[tokio::test]
async fn learn_mode_teaches_before_testing() {
    let fx = fixture();
    fx.store.insert_teaching(teaching("t1", "word-order"));
    fx.store.insert_question(taught(flashcard("q1", "word-order"), "t1"));
    fx.store.insert_question(flashcard("q2", "numbers"));

    let plan = fx
        .planner
        .create_plan(LEARNER, PlanContext::new(SessionMode::Learn))
        .await
        .unwrap();

    assert_eq!(ids(&plan), vec!["t1", "q1", "q2"]);
    assert_eq!(plan.steps[0].step_type, StepType::Teach);
    assert_eq!(plan.steps[0].delivery_method, None);
    assert_eq!(plan.metadata.teach_count, 1);
    assert_eq!(plan.metadata.new_count, 2);
    assert_eq!(
        plan.metadata.topics_covered,
        vec!["word-order".to_string(), "numbers".to_string()]
    );
    let numbers: Vec<u32> = plan.steps.iter().map(|s| s.step_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
}

#[tokio::test]
async fn viewed_teachings_are_not_repeated() {
    let fx = fixture();
    fx.store.insert_teaching(teaching("t1", "word-order"));
    fx.store.insert_question(taught(flashcard("q1", "word-order"), "t1"));

    let first = fx
        .planner
        .create_plan(LEARNER, PlanContext::new(SessionMode::Learn))
        .await
        .unwrap();
    assert_eq!(ids(&first), vec!["t1", "q1"]);

    fx.recorder.record_teaching_viewed(LEARNER, "t1").await.unwrap();
    let second = fx
        .planner
        .create_plan(LEARNER, PlanContext::new(SessionMode::Learn))
        .await
        .unwrap();
    assert_eq!(ids(&second), vec!["q1"]);
}

#[tokio::test]
async fn mixed_mode_alternates_new_and_review() {
    let fx = fixture();
    fx.store.insert_question(flashcard("n1", "x"));
    fx.store.insert_question(flashcard("n2", "y"));
    fx.store.insert_question(flashcard("r1", "a"));
    fx.store.insert_question(flashcard("r2", "b"));
    fx.store.push_performance(due_record("r1", 5, 70.0));
    fx.store.push_performance(due_record("r2", 2, 70.0));

    let plan = fx
        .planner
        .create_plan(LEARNER, PlanContext::new(SessionMode::Mixed))
        .await
        .unwrap();

    let prefixes: Vec<char> = ids(&plan).iter().filter_map(|id| id.chars().next()).collect();
    assert_eq!(prefixes, vec!['n', 'r', 'n', 'r']);
    assert_eq!(plan.metadata.review_count, 2);
    assert_eq!(plan.metadata.new_count, 2);
}

#[tokio::test]
async fn time_budget_sets_target_item_count() {
    let fx = fixture();
    fx.store.set_duration_history(
        LEARNER,
        DurationHistory {
            practice_avg_sec: Some(60.0),
            ..Default::default()
        },
    );
    for i in 1..=6 {
        fx.store.insert_question(flashcard(&format!("n{i}"), &format!("tag{i}")));
    }

    let plan = fx
        .planner
        .create_plan(LEARNER, PlanContext::new(SessionMode::Learn).with_time_budget(300))
        .await
        .unwrap();

    assert_eq!(plan.metadata.target_item_count, 4);
    assert_eq!(plan.steps.len(), 4);
    assert_eq!(plan.metadata.estimated_total_sec, 4 * 20);
}

#[tokio::test]
async fn session_minutes_preference_used_without_budget() {
    let fx = fixture();
    fx.store.set_preferences(
        LEARNER,
        LearnerPreferences {
            session_minutes: Some(5),
            ..Default::default()
        },
    );
    for i in 1..=8 {
        fx.store.insert_question(flashcard(&format!("n{i}"), "tag"));
    }

    let plan = fx
        .planner
        .create_plan(LEARNER, PlanContext::new(SessionMode::Learn))
        .await
        .unwrap();
    assert_eq!(plan.metadata.target_item_count, 4);
}

#[tokio::test]
async fn lesson_scope_limits_new_content() {
    let fx = fixture();
    fx.store.insert_question(flashcard("in-scope", "a"));
    let mut other = flashcard("elsewhere", "b");
    other.lesson_id = Some("lesson-2".to_string());
    fx.store.insert_question(other);

    let plan = fx
        .planner
        .create_plan(
            LEARNER,
            PlanContext::new(SessionMode::Learn).with_scope(ContentScope::lesson("lesson-1")),
        )
        .await
        .unwrap();
    assert_eq!(ids(&plan), vec!["in-scope"]);
}

#[tokio::test]
async fn missing_modality_data_degrades_to_generic_step() {
    let fx = fixture();
    let mut fill = question("fb", &["grammar"], &[DeliveryMethod::FillBlank]);
    fill.content.sentence = None;
    fx.store.insert_question(fill);

    let plan = fx
        .planner
        .create_plan(LEARNER, PlanContext::new(SessionMode::Learn))
        .await
        .unwrap();

    assert_eq!(plan.steps.len(), 1);
    assert_eq!(plan.steps[0].delivery_method, Some(DeliveryMethod::FillBlank));
    assert!(matches!(plan.steps[0].item, StepItem::Generic { .. }));
}

#[tokio::test]
async fn schema_mismatch_degrades_to_empty_and_defaults() {
    let fx = fixture();
    fx.store.insert_question(flashcard("n1", "a"));
    fx.store.fail_operation("due_performance", FailureMode::SchemaMismatch);
    fx.store.fail_operation("duration_history", FailureMode::SchemaMismatch);

    let plan = fx
        .planner
        .create_plan(LEARNER, PlanContext::new(SessionMode::Learn).with_time_budget(300))
        .await
        .unwrap();
    assert_eq!(ids(&plan), vec!["n1"]);
    // default 60s practice average: 300 * 0.8 / 60
    assert_eq!(plan.metadata.target_item_count, 4);

    let review = fx
        .planner
        .create_plan(LEARNER, PlanContext::new(SessionMode::Review))
        .await
        .unwrap();
    assert_eq!(review.steps[0].step_type, StepType::Recap);
}

#[tokio::test]
async fn upstream_failures_propagate() {
    let fx = fixture();
    fx.store.fail_operation("questions_in_scope", FailureMode::Unavailable);

    let err = fx
        .planner
        .create_plan(LEARNER, PlanContext::new(SessionMode::Learn))
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::Store(StoreError::Unavailable(_))));

    // review mode never reads new content
    assert!(fx
        .planner
        .create_plan(LEARNER, PlanContext::new(SessionMode::Review))
        .await
        .is_ok());

    fx.store.clear_failures();
    fx.store.fail_operation("preferences", FailureMode::Unavailable);
    let err = fx
        .planner
        .create_plan(LEARNER, PlanContext::new(SessionMode::Mixed))
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::Store(StoreError::Unavailable(_))));
}

#[tokio::test]
async fn plans_are_cached_until_ttl_expires() {
    let fx = fixture();
    fx.store.insert_question(flashcard("r1", "a"));
    fx.store.push_performance(due_record("r1", 2, 50.0));
    let context = PlanContext::new(SessionMode::Review);

    let first = fx.planner.create_plan(LEARNER, context.clone()).await.unwrap();
    let second = fx.planner.create_plan(LEARNER, context.clone()).await.unwrap();
    assert_eq!(first.session_id, second.session_id);

    let other_budget = fx
        .planner
        .create_plan(LEARNER, context.clone().with_time_budget(120))
        .await
        .unwrap();
    assert_ne!(first.session_id, other_budget.session_id);

    fx.clock.advance(Duration::seconds(301));
    let third = fx.planner.create_plan(LEARNER, context).await.unwrap();
    assert_ne!(first.session_id, third.session_id);
}

#[tokio::test]
async fn plan_serializes_with_camel_case_fields() {
    let fx = fixture();
    fx.store.insert_question(flashcard("n1", "a"));
    let plan = fx
        .planner
        .create_plan(LEARNER, PlanContext::new(SessionMode::Learn))
        .await
        .unwrap();

    let json = serde_json::to_value(&plan).unwrap();
    assert_eq!(json["mode"], "learn");
    assert_eq!(json["steps"][0]["type"], "practice");
    assert_eq!(json["steps"][0]["deliveryMethod"], "flashcard");
    assert_eq!(json["metadata"]["totalSteps"], 1);
}

#[tokio::test]
async fn review_due_exactly_now_counts_as_review() {
    let fx = fixture();
    fx.store.insert_question(flashcard("q1", "colors"));
    fx.store.push_performance(due_record("q1", 0, 50.0));

    let plan = fx
        .planner
        .create_plan(LEARNER, PlanContext::new(SessionMode::Review))
        .await
        .unwrap();
    assert_eq!(ids(&plan), vec!["q1".to_string()]);
    assert_eq!(plan.metadata.review_count, 1);
    assert_eq!(plan.metadata.new_count, 0);
}
