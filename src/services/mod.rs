pub mod attempts;
pub mod candidates;
pub mod difficulty;
pub mod interleave;
pub mod mastery;
pub mod modality;
pub mod priority;
pub mod sequencing;
pub mod session_plan;
pub mod srs;
pub mod time_budget;
