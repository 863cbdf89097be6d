use std::cmp::Ordering;
use std::collections::HashSet;

use crate::types::Candidate;

const DUE_BASE: f64 = 1000.0;
const DUE_ERROR_WEIGHT: f64 = 10.0;
const NEW_ERROR_WEIGHT: f64 = 5.0;
const PRIORITIZED_SKILL_BONUS: f64 = 500.0;
const CHALLENGE_MATCH_BONUS: f64 = 100.0;

const LOW_CHALLENGE_BELOW: f64 = 0.4;
const HIGH_CHALLENGE_ABOVE: f64 = 0.7;
const EASY_ITEM_BELOW: f64 = 0.4;
const HARD_ITEM_ABOVE: f64 = 0.6;

#[derive(Debug, Clone, Default)]
pub struct RankingContext {
    pub prioritized_skills: HashSet<String>,
    pub challenge_weight: f64,
}

impl RankingContext {
    pub fn new<I, S>(prioritized_skills: I, challenge_weight: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prioritized_skills: prioritized_skills.into_iter().map(Into::into).collect(),
            challenge_weight,
        }
    }
}

fn matches_challenge(difficulty: f64, challenge_weight: f64) -> bool {
    (challenge_weight < LOW_CHALLENGE_BELOW && difficulty < EASY_ITEM_BELOW)
        || (challenge_weight > HIGH_CHALLENGE_ABOVE && difficulty > HARD_ITEM_ABOVE)
}

/// Due reviews always score above 1000; everything else stays far below that
/// unless it was never seen, in which case the recency term is infinite.
pub fn score(candidate: &Candidate, ctx: &RankingContext) -> f64 {
    if candidate.due_score > 0.0 {
        return DUE_BASE + candidate.due_score + candidate.error_score as f64 * DUE_ERROR_WEIGHT;
    }

    let mut score = candidate.error_score as f64 * NEW_ERROR_WEIGHT
        + candidate.time_since_last_seen_ms / 1000.0;
    if candidate.shares_tag_with(&ctx.prioritized_skills) {
        score += PRIORITIZED_SKILL_BONUS;
    }
    if matches_challenge(candidate.difficulty, ctx.challenge_weight) {
        score += CHALLENGE_MATCH_BONUS;
    }
    score
}

/// Stable descending sort by score; ties keep input order.
pub fn rank(candidates: Vec<Candidate>, ctx: &RankingContext) -> Vec<Candidate> {
    let mut scored: Vec<(f64, Candidate)> = candidates
        .into_iter()
        .map(|c| (score(&c, ctx), c))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    scored.into_iter().map(|(_, c)| c).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{question, review};

    #[test]
    fn test_due_items_outrank_everything() {
        let ctx = RankingContext::new(["verbs"], 0.9);
        let mut fresh = question("fresh", "verbs");
        fresh.time_since_last_seen_ms = 3_600_000.0;
        fresh.difficulty = 0.9;
        let due = review("due", "nouns", 0.5, 0);
        let ranked = rank(vec![fresh, due], &ctx);
        assert_eq!(ranked[0].id, "due");
    }

    #[test]
    fn test_due_score_formula() {
        let ctx = RankingContext::default();
        let due = review("q", "nouns", 2.5, 3);
        assert!((score(&due, &ctx) - 1032.5).abs() < 1e-9);
    }

    #[test]
    fn test_non_due_bonuses() {
        let ctx = RankingContext::new(["verbs"], 0.2);
        let mut c = question("q", "verbs");
        c.time_since_last_seen_ms = 5_000.0;
        c.error_score = 1;
        c.difficulty = 0.2;
        // 5 + 5 + 500 + 100
        assert!((score(&c, &ctx) - 610.0).abs() < 1e-9);

        let neutral = RankingContext::new(Vec::<String>::new(), 0.5);
        assert!((score(&c, &neutral) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_high_challenge_prefers_hard_items() {
        let ctx = RankingContext::new(Vec::<String>::new(), 0.8);
        let mut easy = question("easy", "a");
        easy.time_since_last_seen_ms = 0.0;
        easy.difficulty = 0.2;
        let mut hard = question("hard", "b");
        hard.time_since_last_seen_ms = 0.0;
        hard.difficulty = 0.65;
        let ranked = rank(vec![easy, hard], &ctx);
        assert_eq!(ranked[0].id, "hard");
    }

    #[test]
    fn test_ties_keep_input_order() {
        let ctx = RankingContext::default();
        let items: Vec<Candidate> = (0..6)
            .map(|i| {
                let mut c = question(&format!("q{i}"), "same");
                c.time_since_last_seen_ms = 1000.0;
                c
            })
            .collect();
        let ranked = rank(items, &ctx);
        let ids: Vec<&str> = ranked.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["q0", "q1", "q2", "q3", "q4", "q5"]);
    }

    #[test]
    fn test_never_seen_items_rank_first_among_new() {
        let ctx = RankingContext::new(["x"], 0.5);
        let mut seen = question("seen", "x");
        seen.time_since_last_seen_ms = 60_000.0;
        let unseen = question("unseen", "y");
        let ranked = rank(vec![seen, unseen], &ctx);
        assert_eq!(ranked[0].id, "unseen");
    }
}
