use std::fmt;
use std::time::Duration;

use crate::types::{PlanContext, SessionMode};

pub const SESSION_PLAN_TTL: Duration = Duration::from_secs(5 * 60);

/// Identity of a cached plan: learner, mode, scope and budget.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlanCacheKey {
    pub learner_id: String,
    pub mode: SessionMode,
    pub lesson_id: Option<String>,
    pub module_id: Option<String>,
    pub time_budget_sec: Option<u32>,
}

impl PlanCacheKey {
    pub fn new(learner_id: &str, context: &PlanContext) -> Self {
        Self {
            learner_id: learner_id.to_string(),
            mode: context.mode,
            lesson_id: context.scope.lesson_id.clone(),
            module_id: context.scope.module_id.clone(),
            time_budget_sec: context.time_budget_sec,
        }
    }
}

impl fmt::Display for PlanCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "plan:{}:{}:{}:{}:",
            self.learner_id,
            self.mode.as_str(),
            self.lesson_id.as_deref().unwrap_or("all"),
            self.module_id.as_deref().unwrap_or("all"),
        )?;
        match self.time_budget_sec {
            Some(budget) => write!(f, "{budget}"),
            None => f.write_str("default"),
        }
    }
}
