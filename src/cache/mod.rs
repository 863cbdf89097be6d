pub mod keys;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::types::SessionPlan;

pub use keys::{PlanCacheKey, SESSION_PLAN_TTL};

struct CachedPlan {
    plan: SessionPlan,
    written_at: DateTime<Utc>,
}

/// Shared TTL cache of composed plans. Entries are written only once a plan is complete.
pub struct SessionPlanCache {
    entries: Mutex<HashMap<PlanCacheKey, CachedPlan>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SessionPlanCache {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            ttl,
        }
    }

    /// Returns a fresh plan, evicting the entry if it has expired.
    pub fn get(&self, key: &PlanCacheKey) -> Option<SessionPlan> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let fresh = match entries.get(key) {
            Some(entry) => self.is_fresh(entry.written_at, now),
            None => return None,
        };
        if fresh {
            tracing::debug!(key = %key, "session plan cache hit");
            entries.get(key).map(|entry| entry.plan.clone())
        } else {
            entries.remove(key);
            tracing::debug!(key = %key, "session plan cache entry expired");
            None
        }
    }

    pub fn put(&self, key: PlanCacheKey, plan: SessionPlan) {
        let written_at = self.clock.now();
        self.entries.lock().insert(key, CachedPlan { plan, written_at });
    }

    /// Drops every plan cached for the learner. Returns the number removed.
    pub fn invalidate_learner(&self, learner_id: &str) -> usize {
        self.remove_where(|key| key.learner_id == learner_id)
    }

    /// Drops plans scoped to the lesson, for any learner.
    pub fn invalidate_lesson(&self, lesson_id: &str) -> usize {
        self.remove_where(|key| key.lesson_id.as_deref() == Some(lesson_id))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_fresh(&self, written_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match (now - written_at).to_std() {
            Ok(age) => age < self.ttl,
            // written "in the future" by a clock that moved backwards
            Err(_) => true,
        }
    }

    fn remove_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&PlanCacheKey) -> bool,
    {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !predicate(key));
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::types::{ContentScope, PlanContext, PlanMetadata, SessionMode};
    use chrono::TimeZone;

    fn plan(learner: &str) -> SessionPlan {
        SessionPlan {
            session_id: format!("session-{learner}"),
            learner_id: learner.to_string(),
            mode: SessionMode::Review,
            steps: Vec::new(),
            metadata: PlanMetadata::default(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn setup() -> (SessionPlanCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        (SessionPlanCache::new(clock.clone(), SESSION_PLAN_TTL), clock)
    }

    #[test]
    fn hit_before_ttl_and_miss_after() {
        let (cache, clock) = setup();
        let key = PlanCacheKey::new("u1", &PlanContext::new(SessionMode::Review));
        cache.put(key.clone(), plan("u1"));

        clock.advance(chrono::Duration::seconds(299));
        assert!(cache.get(&key).is_some());

        clock.advance(chrono::Duration::seconds(1));
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_learner_keeps_other_learners() {
        let (cache, _clock) = setup();
        let review = PlanContext::new(SessionMode::Review);
        let learn = PlanContext::new(SessionMode::Learn).with_time_budget(600);
        cache.put(PlanCacheKey::new("u1", &review), plan("u1"));
        cache.put(PlanCacheKey::new("u1", &learn), plan("u1"));
        cache.put(PlanCacheKey::new("u2", &review), plan("u2"));

        assert_eq!(cache.invalidate_learner("u1"), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&PlanCacheKey::new("u2", &review)).is_some());
    }

    #[test]
    fn invalidate_lesson_only_drops_scoped_plans() {
        let (cache, _clock) = setup();
        let scoped = PlanContext::new(SessionMode::Learn).with_scope(ContentScope::lesson("l1"));
        let other = PlanContext::new(SessionMode::Learn).with_scope(ContentScope::lesson("l2"));
        let unscoped = PlanContext::new(SessionMode::Learn);
        cache.put(PlanCacheKey::new("u1", &scoped), plan("u1"));
        cache.put(PlanCacheKey::new("u2", &scoped), plan("u2"));
        cache.put(PlanCacheKey::new("u1", &other), plan("u1"));
        cache.put(PlanCacheKey::new("u1", &unscoped), plan("u1"));

        assert_eq!(cache.invalidate_lesson("l1"), 2);
        assert_eq!(cache.len(), 2);
    }
}
