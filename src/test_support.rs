use std::collections::BTreeSet;

use crate::types::{Candidate, CandidateKind, DeliveryMethod, ExerciseType, QuestionContent};

/// A never-seen question tagged with a single skill.
pub fn question(id: &str, tag: &str) -> Candidate {
    Candidate {
        kind: CandidateKind::Question {
            teaching_id: None,
            content: QuestionContent {
                prompt: format!("prompt {id}"),
                answer: Some(format!("answer {id}")),
                options: vec![format!("answer {id}"), "other".to_string()],
                ..QuestionContent::default()
            },
        },
        id: id.to_string(),
        lesson_id: None,
        due_score: 0.0,
        error_score: 0,
        time_since_last_seen_ms: f64::INFINITY,
        skill_tags: BTreeSet::from([tag.to_string()]),
        exercise_type: ExerciseType::Vocabulary,
        difficulty: 0.5,
        estimated_mastery: 0.0,
        delivery_methods: BTreeSet::from([DeliveryMethod::Flashcard, DeliveryMethod::MultipleChoice]),
    }
}

/// A due review `due_score` hours overdue, last seen an hour ago.
pub fn review(id: &str, tag: &str, due_score: f64, error_score: u32) -> Candidate {
    Candidate {
        due_score,
        error_score,
        time_since_last_seen_ms: 3_600_000.0,
        estimated_mastery: 0.5,
        ..question(id, tag)
    }
}
