pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod logging;
pub mod services;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

pub use services::attempts::{AttemptError, AttemptInput, AttemptRecorder};
pub use services::session_plan::{PlanError, SessionPlanner};
pub use types::{PlanContext, SessionMode, SessionPlan};
