use std::sync::Arc;

use clap::{Parser, ValueEnum};

use danci_session_engine::clock::SystemClock;
use danci_session_engine::config::{Config, EngineConfig};
use danci_session_engine::db::PgLearningStore;
use danci_session_engine::logging::init_tracing;
use danci_session_engine::store::memory::InMemoryStore;
use danci_session_engine::store::{LearningStore, PreferenceSource};
use danci_session_engine::types::{ContentScope, PlanContext, SessionMode};
use danci_session_engine::SessionPlanner;

#[derive(Parser)]
#[command(name = "danci-session-engine", about = "Compose a study session plan for a learner", version)]
struct Cli {
    /// Learner to plan for
    learner_id: String,

    /// Session mode
    #[arg(value_enum, default_value = "review")]
    mode: Mode,

    /// Time budget in seconds (falls back to the learner's preferred session length)
    #[arg(short, long)]
    budget: Option<u32>,

    /// Restrict content to one lesson
    #[arg(short, long)]
    lesson: Option<String>,

    /// Restrict content to one module
    #[arg(short, long)]
    module: Option<String>,

    /// Consecutive wrong answers so far in the running session
    #[arg(long, default_value = "0")]
    errors: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Learn,
    Review,
    Mixed,
}

impl From<Mode> for SessionMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Learn => SessionMode::Learn,
            Mode::Review => SessionMode::Review,
            Mode::Mixed => SessionMode::Mixed,
        }
    }
}

impl Cli {
    fn context(&self) -> PlanContext {
        let mut context = PlanContext::new(self.mode.into()).with_scope(ContentScope {
            lesson_id: self.lesson.clone(),
            module_id: self.module.clone(),
        });
        if let Some(budget) = self.budget {
            context = context.with_time_budget(budget);
        }
        context.with_consecutive_errors(self.errors)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let context = cli.context();
    let learner_id = cli.learner_id;

    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config.log);

    let (store, preferences): (Arc<dyn LearningStore>, Arc<dyn PreferenceSource>) =
        match config.database_url.as_deref() {
            Some(url) => match PgLearningStore::connect(url).await {
                Ok(pg) => {
                    let pg = Arc::new(pg);
                    let store: Arc<dyn LearningStore> = pg.clone();
                    let preferences: Arc<dyn PreferenceSource> = pg;
                    (store, preferences)
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to connect to database");
                    std::process::exit(1);
                }
            },
            None => {
                tracing::warn!("DATABASE_URL not set, planning against an empty in-memory store");
                let memory = Arc::new(InMemoryStore::new());
                let store: Arc<dyn LearningStore> = memory.clone();
                let preferences: Arc<dyn PreferenceSource> = memory;
                (store, preferences)
            }
        };

    let planner = SessionPlanner::new(store, preferences, Arc::new(SystemClock), EngineConfig::from_env());

    let plan = match planner.create_plan(&learner_id, context).await {
        Ok(plan) => plan,
        Err(err) => {
            tracing::error!(error = %err, learner_id = %learner_id, "failed to create session plan");
            std::process::exit(1);
        }
    };

    match serde_json::to_string_pretty(&plan) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize session plan");
            std::process::exit(1);
        }
    }
}
