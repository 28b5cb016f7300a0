//! services/api/src/adapters/question_llm.rs
//!
//! This module contains the adapter for the question-generating LLM.
//! It implements the `QuestionGenerationService` port from the `core` crate:
//! prompt construction, per-difficulty token budgets, structural parsing of
//! the response, and mapping of upstream overload signals onto the port's
//! retryable error.

const SYSTEM_INSTRUCTIONS: &str = r#"You are a question writer for a medication study guide.

You receive an excerpt of source material about a medication and must write ONE
multiple-choice question about it.

Rules:
- The question must be answerable from the excerpt alone.
- Provide exactly 4 answer options. Exactly one is correct.
- Write the question, options and explanation in the same language as the excerpt.
- The explanation must say why the correct option is right, in one or two sentences.
- If the excerpt mentions a page number, include it as "pageReference".

Respond with valid JSON only, no prose around it, in exactly this shape:
{
  "questions": [
    {
      "question": "...",
      "options": ["...", "...", "...", "..."],
      "correctIndex": 0,
      "explanation": "...",
      "pageReference": 12
    }
  ]
}

"pageReference" is optional; omit it when the excerpt gives no page."#;

const USER_INPUT_TEMPLATE: &str = r#"SOURCE EXCERPT:
---
{excerpt}
---

DIFFICULTY: {difficulty}
{difficulty_instructions}

Write one question now. Respond with the JSON object only."#;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde::Deserialize;

use medquiz_core::domain::{Difficulty, QuestionPayload};
use medquiz_core::ports::{PortError, PortResult, QuestionGenerationService};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `QuestionGenerationService` using an
/// OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiQuestionAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiQuestionAdapter {
    /// Creates a new `OpenAiQuestionAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

/// Token budget per difficulty. A tuning parameter, not a contract.
fn max_tokens_for(difficulty: Difficulty) -> u32 {
    match difficulty {
        Difficulty::Simple => 400,
        Difficulty::Media => 700,
        Difficulty::Elaborada => 1100,
    }
}

fn difficulty_instructions(difficulty: Difficulty) -> &'static str {
    match difficulty {
        Difficulty::Simple => {
            "Write a direct recall question: a single fact stated plainly in the excerpt."
        }
        Difficulty::Media => {
            "Write an applied question: the reader must connect two facts from the \
             excerpt or apply one to a short practical situation."
        }
        Difficulty::Elaborada => {
            "Write an elaborate clinical-case question: a short patient scenario \
             requiring multi-step reasoning over the excerpt."
        }
    }
}

//=========================================================================================
// Structured Response Parsing
//=========================================================================================

#[derive(Deserialize)]
struct GenerationResponse {
    questions: Vec<GeneratedQuestion>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedQuestion {
    question: String,
    options: Vec<String>,
    correct_index: usize,
    explanation: Option<String>,
    page_reference: Option<i32>,
}

/// Extracts the outermost JSON object from a response that may be wrapped in
/// markdown fences or prose, then parses and validates it.
fn parse_response(text: &str) -> PortResult<QuestionPayload> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => {
            return Err(PortError::Malformed(
                "Response contains no JSON object".to_string(),
            ))
        }
    };

    let parsed: GenerationResponse =
        serde_json::from_str(json).map_err(|e| PortError::Malformed(e.to_string()))?;

    let question = parsed
        .questions
        .into_iter()
        .next()
        .ok_or_else(|| PortError::Malformed("Response contains no questions".to_string()))?;

    if question.options.len() < 2 {
        return Err(PortError::Malformed(format!(
            "Question has only {} options",
            question.options.len()
        )));
    }
    if question.correct_index >= question.options.len() {
        return Err(PortError::Malformed(format!(
            "correctIndex {} out of range for {} options",
            question.correct_index,
            question.options.len()
        )));
    }

    Ok(QuestionPayload {
        question_text: question.question,
        options: question.options,
        correct_index: question.correct_index,
        explanation: question.explanation.unwrap_or_default(),
        page_reference: question.page_reference,
    })
}

/// Maps upstream failures to the port taxonomy. The backend signals
/// rate-limit/overload with numeric statuses (429, 503 and 529 observed);
/// 529 gets a longer suggested wait.
fn map_generation_error(e: OpenAIError) -> PortError {
    let message = e.to_string();
    if message.contains("529") {
        PortError::RateLimited {
            retry_after_ms: 5000,
        }
    } else if message.contains("429")
        || message.contains("503")
        || message.to_lowercase().contains("rate limit")
        || message.to_lowercase().contains("overloaded")
    {
        PortError::RateLimited {
            retry_after_ms: 3000,
        }
    } else {
        PortError::Unexpected(message)
    }
}

//=========================================================================================
// `QuestionGenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl QuestionGenerationService for OpenAiQuestionAdapter {
    /// Generates one multiple-choice question from a source excerpt.
    async fn generate_question(
        &self,
        excerpt: &str,
        difficulty: Difficulty,
    ) -> PortResult<QuestionPayload> {
        let user_input = USER_INPUT_TEMPLATE
            .replace("{excerpt}", excerpt)
            .replace("{difficulty}", difficulty.as_str())
            .replace(
                "{difficulty_instructions}",
                difficulty_instructions(difficulty),
            );

        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_INSTRUCTIONS)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_input)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .max_tokens(max_tokens_for(difficulty))
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        // Call the API and manually map the error, which respects the orphan rule.
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_generation_error)?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::Malformed("Generation response contained no text content".to_string())
            })?;

        parse_response(&content)
    }
}
