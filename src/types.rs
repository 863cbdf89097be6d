use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryMethod {
    Flashcard,
    MultipleChoice,
    FillBlank,
    Translation,
    SpeechToText,
    TextToSpeech,
}

impl DeliveryMethod {
    pub const ALL: [DeliveryMethod; 6] = [
        Self::Flashcard,
        Self::MultipleChoice,
        Self::FillBlank,
        Self::Translation,
        Self::SpeechToText,
        Self::TextToSpeech,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flashcard => "flashcard",
            Self::MultipleChoice => "multiple-choice",
            Self::FillBlank => "fill-blank",
            Self::Translation => "translation",
            Self::SpeechToText => "speech-to-text",
            Self::TextToSpeech => "text-to-speech",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "flashcard" => Some(Self::Flashcard),
            "multiple-choice" => Some(Self::MultipleChoice),
            "fill-blank" => Some(Self::FillBlank),
            "translation" => Some(Self::Translation),
            "speech-to-text" => Some(Self::SpeechToText),
            "text-to-speech" => Some(Self::TextToSpeech),
            _ => None,
        }
    }

    /// Listening or speaking modality.
    pub fn is_audio(&self) -> bool {
        matches!(self, Self::SpeechToText | Self::TextToSpeech)
    }
}

impl fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExerciseType {
    Speaking,
    Translation,
    Grammar,
    Vocabulary,
    Practice,
}

impl ExerciseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Speaking => "speaking",
            Self::Translation => "translation",
            Self::Grammar => "grammar",
            Self::Vocabulary => "vocabulary",
            Self::Practice => "practice",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyBand {
    Easy,
    Medium,
    Hard,
}

impl DifficultyBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    Learn,
    Review,
    Mixed,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Learn => "learn",
            Self::Review => "review",
            Self::Mixed => "mixed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "learn" => Some(Self::Learn),
            "review" => Some(Self::Review),
            "mixed" => Some(Self::Mixed),
            _ => None,
        }
    }
}

/// Structured payload a delivery method renders from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionContent {
    pub prompt: String,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub sentence: Option<String>,
    #[serde(default)]
    pub source_text: Option<String>,
    #[serde(default)]
    pub audio_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CandidateKind {
    Teaching {
        title: String,
        tip: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Question {
        teaching_id: Option<String>,
        content: QuestionContent,
    },
}

/// One teaching card or question available for delivery in this session.
///
/// A positive `due_score` marks a spaced-repetition review; zero means the
/// item is new to the learner.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub kind: CandidateKind,
    pub id: String,
    pub lesson_id: Option<String>,
    pub due_score: f64,
    pub error_score: u32,
    /// Milliseconds, `f64::INFINITY` when never seen.
    pub time_since_last_seen_ms: f64,
    pub skill_tags: BTreeSet<String>,
    pub exercise_type: ExerciseType,
    pub difficulty: f64,
    pub estimated_mastery: f64,
    pub delivery_methods: BTreeSet<DeliveryMethod>,
}

impl Candidate {
    pub fn is_review(&self) -> bool {
        self.due_score > 0.0
    }

    pub fn is_teaching(&self) -> bool {
        matches!(self.kind, CandidateKind::Teaching { .. })
    }

    pub fn teaching_id(&self) -> Option<&str> {
        match &self.kind {
            CandidateKind::Question { teaching_id, .. } => teaching_id.as_deref(),
            CandidateKind::Teaching { .. } => Some(self.id.as_str()),
        }
    }

    pub fn offers_audio(&self) -> bool {
        self.delivery_methods.iter().any(DeliveryMethod::is_audio)
    }

    pub fn shares_tag_with<'a, I>(&self, tags: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        tags.into_iter().any(|tag| self.skill_tags.contains(tag))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Teach,
    Practice,
    Recap,
}

/// Renderable content of a single session step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "format", rename_all = "kebab-case")]
pub enum StepItem {
    #[serde(rename_all = "camelCase")]
    Teaching {
        teaching_id: String,
        title: String,
        tip: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Flashcard {
        question_id: String,
        front: String,
        back: String,
    },
    #[serde(rename_all = "camelCase")]
    MultipleChoice {
        question_id: String,
        prompt: String,
        options: Vec<String>,
        answer: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    FillBlank {
        question_id: String,
        sentence: String,
        answer: String,
    },
    #[serde(rename_all = "camelCase")]
    Translation {
        question_id: String,
        source_text: String,
        reference: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Speaking {
        question_id: String,
        phrase: String,
    },
    #[serde(rename_all = "camelCase")]
    Listening {
        question_id: String,
        text: String,
        audio_url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Generic {
        question_id: String,
        prompt: String,
    },
    Recap {
        message: String,
        topics: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStep {
    pub step_number: u32,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub item: StepItem,
    pub estimated_time_sec: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_method: Option<DeliveryMethod>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanMetadata {
    pub total_steps: usize,
    pub teach_count: usize,
    pub practice_count: usize,
    pub review_count: usize,
    pub new_count: usize,
    pub target_item_count: usize,
    pub estimated_total_sec: u32,
    pub topics_covered: Vec<String>,
    pub delivery_methods_used: Vec<DeliveryMethod>,
}

/// A composed session. Never mutated after assembly.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPlan {
    pub session_id: String,
    pub learner_id: String,
    pub mode: SessionMode,
    pub steps: Vec<SessionStep>,
    pub metadata: PlanMetadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentScope {
    pub lesson_id: Option<String>,
    pub module_id: Option<String>,
}

impl ContentScope {
    pub fn lesson(lesson_id: impl Into<String>) -> Self {
        Self {
            lesson_id: Some(lesson_id.into()),
            module_id: None,
        }
    }

    pub fn module(module_id: impl Into<String>) -> Self {
        Self {
            lesson_id: None,
            module_id: Some(module_id.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanContext {
    pub mode: SessionMode,
    #[serde(default)]
    pub time_budget_sec: Option<u32>,
    #[serde(default)]
    pub scope: ContentScope,
    #[serde(default)]
    pub consecutive_errors: u32,
}

impl PlanContext {
    pub fn new(mode: SessionMode) -> Self {
        Self {
            mode,
            time_budget_sec: None,
            scope: ContentScope::default(),
            consecutive_errors: 0,
        }
    }

    pub fn with_time_budget(mut self, seconds: u32) -> Self {
        self.time_budget_sec = Some(seconds);
        self
    }

    pub fn with_scope(mut self, scope: ContentScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_consecutive_errors(mut self, count: u32) -> Self {
        self.consecutive_errors = count;
        self
    }
}
