use std::collections::{BTreeSet, HashMap};

use rand::Rng;
use thiserror::Error;

use crate::types::{Candidate, CandidateKind, DeliveryMethod, QuestionContent, StepItem};

pub const NEUTRAL_METHOD_SCORE: f64 = 0.5;
pub const EXPLOIT_PROBABILITY: f64 = 0.85;

const MIN_METHOD_SCORE: f64 = 0.1;
const WEIGHT_EXPONENT: i32 = 4;

pub fn method_weight(score: f64) -> f64 {
    score.max(MIN_METHOD_SCORE).powi(WEIGHT_EXPONENT)
}

/// Picks a delivery method, mostly from the learner's best performers.
///
/// With a single method no randomness is consumed. With none, the caller has
/// to fall back to a generic step.
pub fn select_method<R: Rng>(
    methods: &BTreeSet<DeliveryMethod>,
    scores: &HashMap<DeliveryMethod, f64>,
    rng: &mut R,
) -> Option<DeliveryMethod> {
    let available: Vec<DeliveryMethod> = methods.iter().copied().collect();
    match available.len() {
        0 => None,
        1 => Some(available[0]),
        len => {
            if rng.random::<f64>() < EXPLOIT_PROBABILITY {
                let weights: Vec<f64> = available
                    .iter()
                    .map(|m| method_weight(scores.get(m).copied().unwrap_or(NEUTRAL_METHOD_SCORE)))
                    .collect();
                Some(weighted_pick(&available, &weights, rng))
            } else {
                Some(available[rng.random_range(0..len)])
            }
        }
    }
}

fn weighted_pick<R: Rng>(methods: &[DeliveryMethod], weights: &[f64], rng: &mut R) -> DeliveryMethod {
    let total: f64 = weights.iter().sum();
    let target = rng.random::<f64>() * total;

    let mut cumulative = 0.0;
    for (method, weight) in methods.iter().zip(weights) {
        cumulative += weight;
        if target < cumulative {
            return *method;
        }
    }
    methods[methods.len() - 1]
}

#[derive(Debug, Error)]
#[error("{method} step for question {question_id} is missing {field}")]
pub struct MissingModalityData {
    pub method: DeliveryMethod,
    pub question_id: String,
    pub field: &'static str,
}

/// Renders one delivery method from a question's structured content.
pub trait StepBuilder: Send + Sync {
    fn build_step(&self, question_id: &str, content: &QuestionContent) -> Result<StepItem, MissingModalityData>;
}

fn required<'c>(
    value: Option<&'c str>,
    method: DeliveryMethod,
    question_id: &str,
    field: &'static str,
) -> Result<&'c str, MissingModalityData> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| MissingModalityData {
            method,
            question_id: question_id.to_string(),
            field,
        })
}

struct FlashcardStep;

impl StepBuilder for FlashcardStep {
    fn build_step(&self, question_id: &str, content: &QuestionContent) -> Result<StepItem, MissingModalityData> {
        let method = DeliveryMethod::Flashcard;
        let front = required(Some(content.prompt.as_str()), method, question_id, "prompt")?;
        let back = required(content.answer.as_deref(), method, question_id, "answer")?;
        Ok(StepItem::Flashcard {
            question_id: question_id.to_string(),
            front: front.to_string(),
            back: back.to_string(),
        })
    }
}

struct MultipleChoiceStep;

impl StepBuilder for MultipleChoiceStep {
    fn build_step(&self, question_id: &str, content: &QuestionContent) -> Result<StepItem, MissingModalityData> {
        let method = DeliveryMethod::MultipleChoice;
        let prompt = required(Some(content.prompt.as_str()), method, question_id, "prompt")?;
        let options: Vec<String> = content
            .options
            .iter()
            .map(|o| o.trim())
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();
        if options.len() < 2 {
            return Err(MissingModalityData {
                method,
                question_id: question_id.to_string(),
                field: "options",
            });
        }
        Ok(StepItem::MultipleChoice {
            question_id: question_id.to_string(),
            prompt: prompt.to_string(),
            options,
            answer: content.answer.clone(),
        })
    }
}

struct FillBlankStep;

impl StepBuilder for FillBlankStep {
    fn build_step(&self, question_id: &str, content: &QuestionContent) -> Result<StepItem, MissingModalityData> {
        let method = DeliveryMethod::FillBlank;
        let sentence = required(content.sentence.as_deref(), method, question_id, "sentence")?;
        let answer = required(content.answer.as_deref(), method, question_id, "answer")?;
        Ok(StepItem::FillBlank {
            question_id: question_id.to_string(),
            sentence: sentence.to_string(),
            answer: answer.to_string(),
        })
    }
}

struct TranslationStep;

impl StepBuilder for TranslationStep {
    fn build_step(&self, question_id: &str, content: &QuestionContent) -> Result<StepItem, MissingModalityData> {
        let source = required(
            content.source_text.as_deref(),
            DeliveryMethod::Translation,
            question_id,
            "source text",
        )?;
        Ok(StepItem::Translation {
            question_id: question_id.to_string(),
            source_text: source.to_string(),
            reference: content.answer.clone(),
        })
    }
}

struct SpeechToTextStep;

impl StepBuilder for SpeechToTextStep {
    fn build_step(&self, question_id: &str, content: &QuestionContent) -> Result<StepItem, MissingModalityData> {
        let phrase = required(
            content.answer.as_deref(),
            DeliveryMethod::SpeechToText,
            question_id,
            "phrase",
        )?;
        Ok(StepItem::Speaking {
            question_id: question_id.to_string(),
            phrase: phrase.to_string(),
        })
    }
}

struct TextToSpeechStep;

impl StepBuilder for TextToSpeechStep {
    fn build_step(&self, question_id: &str, content: &QuestionContent) -> Result<StepItem, MissingModalityData> {
        let text = required(
            content.answer.as_deref(),
            DeliveryMethod::TextToSpeech,
            question_id,
            "spoken text",
        )?;
        Ok(StepItem::Listening {
            question_id: question_id.to_string(),
            text: text.to_string(),
            audio_url: content.audio_url.clone(),
        })
    }
}

pub struct StepBuilderRegistry {
    builders: HashMap<DeliveryMethod, Box<dyn StepBuilder>>,
}

impl Default for StepBuilderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(DeliveryMethod::Flashcard, FlashcardStep);
        registry.register(DeliveryMethod::MultipleChoice, MultipleChoiceStep);
        registry.register(DeliveryMethod::FillBlank, FillBlankStep);
        registry.register(DeliveryMethod::Translation, TranslationStep);
        registry.register(DeliveryMethod::SpeechToText, SpeechToTextStep);
        registry.register(DeliveryMethod::TextToSpeech, TextToSpeechStep);
        registry
    }
}

impl StepBuilderRegistry {
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    pub fn register<B>(&mut self, method: DeliveryMethod, builder: B)
    where
        B: StepBuilder + 'static,
    {
        self.builders.insert(method, Box::new(builder));
    }

    /// Builds the renderable item for a candidate. Never fails: missing data
    /// degrades to a generic step and is logged.
    pub fn build(&self, learner_id: &str, candidate: &Candidate, method: Option<DeliveryMethod>) -> StepItem {
        let content = match &candidate.kind {
            CandidateKind::Teaching { title, tip } => {
                return StepItem::Teaching {
                    teaching_id: candidate.id.clone(),
                    title: title.clone(),
                    tip: tip.clone(),
                };
            }
            CandidateKind::Question { content, .. } => content,
        };

        let Some(method) = method else {
            tracing::warn!(
                learner_id = %learner_id,
                question_id = %candidate.id,
                "no delivery method available, emitting generic step"
            );
            return generic_step(&candidate.id, content);
        };

        let Some(builder) = self.builders.get(&method) else {
            tracing::warn!(
                learner_id = %learner_id,
                question_id = %candidate.id,
                method = %method,
                "no step builder registered, emitting generic step"
            );
            return generic_step(&candidate.id, content);
        };

        match builder.build_step(&candidate.id, content) {
            Ok(item) => item,
            Err(err) => {
                tracing::warn!(
                    learner_id = %learner_id,
                    question_id = %candidate.id,
                    lesson_id = candidate.lesson_id.as_deref().unwrap_or("-"),
                    method = %method,
                    options = content.options.len(),
                    error = %err,
                    "delivery method data missing, emitting best-effort step"
                );
                generic_step(&candidate.id, content)
            }
        }
    }
}

fn generic_step(question_id: &str, content: &QuestionContent) -> StepItem {
    StepItem::Generic {
        question_id: question_id.to_string(),
        prompt: content.prompt.clone(),
    }
}
