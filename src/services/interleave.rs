//! Constraint-based sequencing of session candidates.
//!
//! Each step tries, in order: scaffolding for a skill with accumulated
//! errors, an easy item after an error streak, a listening/speaking item
//! while modality coverage is outstanding, and finally variety with three
//! relaxation levels. The first strategy that yields a candidate wins.

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::Serialize;

use crate::services::difficulty::classify;
use crate::types::{Candidate, DifficultyBand, ExerciseType};

pub const DEFAULT_MAX_SAME_TYPE_IN_ROW: usize = 2;

const SCAFFOLD_ERROR_THRESHOLD: u32 = 3;
const SCAFFOLD_MASTERY_ABOVE: f64 = 0.7;
const ERROR_STREAK_TRIGGER: u32 = 2;
const RECENT_TAG_WINDOW: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct InterleaveOptions {
    pub max_same_type_in_row: usize,
    pub require_modality_coverage: bool,
    pub enable_scaffolding: bool,
    pub consecutive_errors: u32,
    /// Stop after this many selections.
    pub limit: Option<usize>,
}

impl Default for InterleaveOptions {
    fn default() -> Self {
        Self {
            max_same_type_in_row: DEFAULT_MAX_SAME_TYPE_IN_ROW,
            require_modality_coverage: false,
            enable_scaffolding: false,
            consecutive_errors: 0,
            limit: None,
        }
    }
}

impl InterleaveOptions {
    /// Every strategy enabled, as used for a dedicated review session.
    pub fn full(max_same_type_in_row: usize, consecutive_errors: u32) -> Self {
        Self {
            max_same_type_in_row,
            require_modality_coverage: true,
            enable_scaffolding: true,
            consecutive_errors,
            limit: None,
        }
    }

    /// Variety only, as used for reviews merged into teach-then-test sessions.
    pub fn variety_only(max_same_type_in_row: usize) -> Self {
        Self {
            max_same_type_in_row,
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    Scaffolding,
    ErrorRecovery,
    ModalityCoverage,
    Variety,
    DifferentType,
    WithinTypeLimit,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub candidate: Candidate,
    pub strategy: SelectionStrategy,
}

pub struct InterleavingOrchestrator<'a> {
    pool: &'a [Candidate],
    options: InterleaveOptions,
    max_run: usize,
    sequence: Vec<Selection>,
    used_ids: HashSet<&'a str>,
    recent_types: VecDeque<ExerciseType>,
    recent_tags: VecDeque<String>,
    skill_errors: BTreeMap<String, u32>,
    error_streak: u32,
    needs_coverage: bool,
}

impl<'a> InterleavingOrchestrator<'a> {
    pub fn new(pool: &'a [Candidate], options: InterleaveOptions) -> Self {
        // One noisy question is enough to flag its whole skill.
        let mut skill_errors: BTreeMap<String, u32> = BTreeMap::new();
        for candidate in pool {
            for tag in &candidate.skill_tags {
                let entry = skill_errors.entry(tag.clone()).or_insert(0);
                *entry = (*entry).max(candidate.error_score);
            }
        }

        Self {
            pool,
            max_run: options.max_same_type_in_row.max(1),
            error_streak: options.consecutive_errors,
            needs_coverage: options.require_modality_coverage,
            options,
            sequence: Vec::new(),
            used_ids: HashSet::new(),
            recent_types: VecDeque::new(),
            recent_tags: VecDeque::new(),
            skill_errors,
        }
    }

    pub fn run(mut self) -> Vec<Selection> {
        let limit = self.options.limit.unwrap_or(usize::MAX);

        while self.sequence.len() < limit {
            if self.next_unused(|_, _| true).is_none() {
                break;
            }
            let Some((index, strategy)) = self.select_next() else {
                break;
            };
            self.commit(index, strategy);
        }

        tracing::debug!(
            pool = self.pool.len(),
            selected = self.sequence.len(),
            error_streak = self.error_streak,
            coverage_pending = self.needs_coverage,
            "interleaving complete"
        );
        self.sequence
    }

    fn select_next(&mut self) -> Option<(usize, SelectionStrategy)> {
        if let Some(pick) = self.try_scaffolding() {
            return Some(pick);
        }
        if let Some(pick) = self.try_error_recovery() {
            return Some(pick);
        }
        if let Some(pick) = self.try_modality_coverage() {
            return Some(pick);
        }
        self.try_variety()
    }

    fn is_used(&self, candidate: &Candidate) -> bool {
        self.used_ids.contains(candidate.id.as_str())
    }

    fn next_unused<F>(&self, predicate: F) -> Option<usize>
    where
        F: Fn(&Self, &Candidate) -> bool,
    {
        self.pool
            .iter()
            .position(|c| !self.is_used(c) && predicate(self, c))
    }

    fn violates_type_limit(&self, candidate: &Candidate) -> bool {
        self.recent_types.len() >= self.max_run
            && self
                .recent_types
                .iter()
                .all(|t| *t == candidate.exercise_type)
    }

    fn last_type(&self) -> Option<ExerciseType> {
        self.recent_types.back().copied()
    }

    fn try_scaffolding(&mut self) -> Option<(usize, SelectionStrategy)> {
        if !self.options.enable_scaffolding {
            return None;
        }
        let struggling: Vec<String> = self
            .skill_errors
            .iter()
            .filter(|(_, errors)| **errors >= SCAFFOLD_ERROR_THRESHOLD)
            .map(|(skill, _)| skill.clone())
            .collect();

        for skill in struggling {
            let found = self.next_unused(|this, c| {
                c.is_review()
                    && c.estimated_mastery > SCAFFOLD_MASTERY_ABOVE
                    && c.skill_tags.contains(&skill)
                    && !this.violates_type_limit(c)
            });
            if let Some(index) = found {
                self.skill_errors.insert(skill, 0);
                return Some((index, SelectionStrategy::Scaffolding));
            }
        }
        None
    }

    fn try_error_recovery(&mut self) -> Option<(usize, SelectionStrategy)> {
        if !self.options.enable_scaffolding || self.error_streak < ERROR_STREAK_TRIGGER {
            return None;
        }
        let index = self.next_unused(|this, c| {
            classify(c.difficulty, c.estimated_mastery) == DifficultyBand::Easy
                && !this.violates_type_limit(c)
        })?;
        Some((index, SelectionStrategy::ErrorRecovery))
    }

    fn try_modality_coverage(&mut self) -> Option<(usize, SelectionStrategy)> {
        if !self.needs_coverage {
            return None;
        }
        if self.next_unused(|_, c| c.offers_audio()).is_none() {
            self.needs_coverage = false;
            return None;
        }
        let index =
            self.next_unused(|this, c| c.offers_audio() && !this.violates_type_limit(c))?;
        Some((index, SelectionStrategy::ModalityCoverage))
    }

    fn try_variety(&self) -> Option<(usize, SelectionStrategy)> {
        let last_type = self.last_type();
        let differs = |c: &Candidate| last_type.map_or(true, |t| t != c.exercise_type);

        if let Some(index) =
            self.next_unused(|this, c| differs(c) && !c.shares_tag_with(&this.recent_tags))
        {
            return Some((index, SelectionStrategy::Variety));
        }
        if let Some(index) = self.next_unused(|_, c| differs(c)) {
            return Some((index, SelectionStrategy::DifferentType));
        }
        if let Some(index) = self.next_unused(|this, c| !this.violates_type_limit(c)) {
            return Some((index, SelectionStrategy::WithinTypeLimit));
        }
        self.next_unused(|_, _| true)
            .map(|index| (index, SelectionStrategy::Fallback))
    }

    fn commit(&mut self, index: usize, strategy: SelectionStrategy) {
        let pool = self.pool;
        let candidate = &pool[index];
        self.used_ids.insert(candidate.id.as_str());

        self.recent_types.push_back(candidate.exercise_type);
        while self.recent_types.len() > self.max_run {
            self.recent_types.pop_front();
        }

        for tag in &candidate.skill_tags {
            self.recent_tags.retain(|t| t != tag);
            self.recent_tags.push_front(tag.clone());
        }
        self.recent_tags.truncate(RECENT_TAG_WINDOW);

        if strategy == SelectionStrategy::ErrorRecovery {
            self.error_streak = 0;
        } else if candidate.error_score > 0 {
            self.error_streak += 1;
        } else {
            self.error_streak = 0;
        }

        if candidate.offers_audio() {
            self.needs_coverage = false;
        }

        if strategy == SelectionStrategy::Fallback {
            tracing::trace!(
                candidate_id = %candidate.id,
                exercise_type = candidate.exercise_type.as_str(),
                "same-type limit relaxed, no alternative left"
            );
        }

        self.sequence.push(Selection {
            candidate: candidate.clone(),
            strategy,
        });
    }
}

pub fn interleave(pool: &[Candidate], options: InterleaveOptions) -> Vec<Candidate> {
    InterleavingOrchestrator::new(pool, options)
        .run()
        .into_iter()
        .map(|s| s.candidate)
        .collect()
}
