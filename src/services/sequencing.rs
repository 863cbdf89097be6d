use std::collections::{HashMap, HashSet};

use crate::services::interleave::{interleave, InterleaveOptions};
use crate::types::{Candidate, SessionMode};

pub const DEFAULT_REVIEW_BATCH_FLOOR: usize = 10;

const LEARN_REVIEW_SHARE: f64 = 0.25;
const MIXED_REVIEW_SHARE: f64 = 0.5;

/// Portion of a teach-then-test session reserved for due reviews.
pub fn review_share(mode: SessionMode) -> f64 {
    match mode {
        SessionMode::Learn => LEARN_REVIEW_SHARE,
        SessionMode::Mixed => MIXED_REVIEW_SHARE,
        SessionMode::Review => 1.0,
    }
}

/// Keeps the first occurrence of every id.
pub fn dedupe_by_id(candidates: &[Candidate]) -> Vec<Candidate> {
    let mut seen: HashSet<&str> = HashSet::new();
    candidates
        .iter()
        .filter(|c| seen.insert(c.id.as_str()))
        .cloned()
        .collect()
}

/// Pairs each new question with its unseen teaching, teaching first.
pub fn teach_then_test(
    questions: &[Candidate],
    teachings: &HashMap<String, Candidate>,
    seen_teachings: &HashSet<String>,
) -> Vec<Vec<Candidate>> {
    let mut emitted: HashSet<&str> = HashSet::new();
    let mut units = Vec::with_capacity(questions.len());

    for question in questions {
        let teaching = question
            .teaching_id()
            .filter(|id| !seen_teachings.contains(*id) && !emitted.contains(id))
            .and_then(|id| teachings.get(id));

        match teaching {
            Some(teaching) => {
                emitted.insert(teaching.id.as_str());
                units.push(vec![teaching.clone(), question.clone()]);
            }
            None => units.push(vec![question.clone()]),
        }
    }
    units
}

/// Alternates one teach-test unit with one review until both run out.
pub fn merge_alternating(units: Vec<Vec<Candidate>>, reviews: Vec<Candidate>) -> Vec<Vec<Candidate>> {
    let mut merged = Vec::with_capacity(units.len() + reviews.len());
    let mut units = units.into_iter();
    let mut reviews = reviews.into_iter();
    loop {
        let unit = units.next();
        let review = reviews.next();
        if unit.is_none() && review.is_none() {
            break;
        }
        if let Some(unit) = unit {
            merged.push(unit);
        }
        if let Some(review) = review {
            merged.push(vec![review]);
        }
    }
    merged
}

/// Flattens whole units until `max_items` would be exceeded. The first unit is
/// always kept so a teaching is never separated from its question.
pub fn take_units(units: Vec<Vec<Candidate>>, max_items: usize) -> Vec<Candidate> {
    let mut out = Vec::new();
    for unit in units {
        if !out.is_empty() && out.len() + unit.len() > max_items {
            break;
        }
        out.extend(unit);
    }
    out
}

pub fn review_batch_size(due_count: usize, item_count: usize, batch_floor: usize) -> usize {
    if due_count > 1 {
        item_count.max(batch_floor.min(due_count))
    } else {
        item_count
    }
}

#[derive(Debug, Clone)]
pub struct CompositionSettings {
    pub item_count: usize,
    pub max_same_type_in_row: usize,
    pub review_batch_floor: usize,
    pub consecutive_errors: u32,
}

/// Review session: every orchestrator strategy over deduplicated due items.
pub fn compose_review(due_ranked: &[Candidate], settings: &CompositionSettings) -> Vec<Candidate> {
    let unique = dedupe_by_id(due_ranked);
    let batch = review_batch_size(unique.len(), settings.item_count, settings.review_batch_floor);
    let options = InterleaveOptions::full(settings.max_same_type_in_row, settings.consecutive_errors)
        .with_limit(batch);
    interleave(&unique, options)
}

/// Learn or mixed session: teach-then-test units for new content interleaved
/// with a share of due reviews.
pub fn compose_teach_test(
    mode: SessionMode,
    new_ranked: &[Candidate],
    due_ranked: &[Candidate],
    teachings: &HashMap<String, Candidate>,
    seen_teachings: &HashSet<String>,
    settings: &CompositionSettings,
) -> Vec<Candidate> {
    let units = teach_then_test(&dedupe_by_id(new_ranked), teachings, seen_teachings);
    let new_items: usize = units.iter().map(Vec::len).sum();

    let share = (settings.item_count as f64 * review_share(mode)).round() as usize;
    let review_quota = share.max(settings.item_count.saturating_sub(new_items));

    let reviews = interleave(
        &dedupe_by_id(due_ranked),
        InterleaveOptions::variety_only(settings.max_same_type_in_row).with_limit(review_quota),
    );

    tracing::debug!(
        mode = mode.as_str(),
        units = units.len(),
        new_items,
        review_quota,
        reviews = reviews.len(),
        "teach-then-test composition"
    );

    take_units(merge_alternating(units, reviews), settings.item_count)
}
