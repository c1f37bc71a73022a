//! Judge client
//!
//! Deterministic scoring via a temperature-0 messages API. The evaluation
//! rubric weighs Relevance 0.4, Accuracy 0.4, Completeness 0.2 and requires a
//! JSON-only reply; the parser tolerates surrounding prose, and unparseable
//! replies are re-requested up to a capped budget before the call turns into
//! a schema failure.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::retry::{CallOutcome, RetryPolicy, TerminalFailure, call_with_retry};
use super::{ApiError, Evaluation, Judge, JudgePrompt};
use crate::config::EvaluationConfig;
use crate::storage::Store;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const API_VERSION: &str = "2023-06-01";

/// Name used in cost and retry rows.
pub const JUDGE_API: &str = "judge";

/// Judge client error
#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    /// Retries exhausted or a non-retryable transport/auth failure
    #[error("judge API unavailable after {attempts} attempt(s): {source}")]
    Unavailable {
        attempts: u32,
        #[source]
        source: ApiError,
    },
    /// Response never conformed to the expected JSON shape
    #[error("judge response schema invalid: {0}")]
    Schema(String),
    /// HTTP client could not be constructed
    #[error("judge client init failed: {0}")]
    Init(String),
}

impl From<TerminalFailure> for JudgeError {
    fn from(f: TerminalFailure) -> Self {
        match f.source {
            ApiError::Schema(msg) | ApiError::Parse(msg) => JudgeError::Schema(msg),
            source => JudgeError::Unavailable {
                attempts: f.attempts,
                source,
            },
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<MessagesUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Deserialize)]
struct RewardReply {
    reward: f64,
    #[serde(default)]
    reasoning: String,
}

#[derive(Deserialize)]
struct ScoreReply {
    score: f64,
}

const EVALUATE_SYSTEM: &str = "You are a deterministic evaluation judge for a retrieval system. \
Score the assistant's answer against the user's query and the retrieved context using this rubric: \
Relevance to the query (weight 0.4), Accuracy with respect to the context (weight 0.4), \
Completeness (weight 0.2). Combine the weighted rubric into a single reward in [-1, 1], where -1 is \
useless or misleading and 1 is excellent. \
Respond with JSON only, no prose: {\"reward\": <number in [-1, 1]>, \"reasoning\": \"<short explanation>\"}";

const REFLECT_SYSTEM: &str = "You review a failed retrieval interaction and produce one short, \
concrete lesson the system should remember for similar future queries. Reply with the lesson as \
plain text, at most three sentences, no preamble.";

const SCORE_SYSTEM_PRIMARY: &str = "You judge whether a document is relevant to a query. \
Consider topical relevance (0.4), factual usefulness for answering (0.4), and coverage (0.2). \
Respond with JSON only: {\"score\": <number in [0, 1]>}";

const SCORE_SYSTEM_SECONDARY: &str = "Act as an independent second reviewer rating document \
relevance. Ask yourself: would a careful analyst cite this document when answering the query? \
Weigh subject match (0.4), answer support (0.4), and completeness of coverage (0.2). \
Respond with JSON only: {\"score\": <number in [0, 1]>}";

/// Messages-API judge client.
pub struct JudgeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    parse_retries: u32,
    cost_per_1k: f64,
    store: Store,
    policy: RetryPolicy,
}

impl JudgeClient {
    pub fn new(
        cfg: &EvaluationConfig,
        policy: RetryPolicy,
        api_key: String,
        store: Store,
    ) -> Result<Self, JudgeError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| JudgeError::Init(e.to_string()))?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: cfg.model_id.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            parse_retries: cfg.parse_retries,
            cost_per_1k: cfg.cost_per_1k_eur,
            store,
            policy,
        })
    }

    /// One messages round-trip. Returns the text reply plus token usage.
    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<(String, u64), ApiError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens,
            temperature: self.temperature,
            system,
            messages: vec![Message {
                role: "user",
                content: user,
            }],
        };
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await?;
        if !(200..300).contains(&status) {
            return Err(ApiError::from_status(status, &text));
        }

        let parsed: MessagesResponse =
            serde_json::from_str(&text).map_err(|e| ApiError::Parse(e.to_string()))?;
        let reply = parsed
            .content
            .iter()
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        let tokens = parsed
            .usage
            .map(|u| u.input_tokens + u.output_tokens)
            .unwrap_or(0);
        Ok((reply, tokens))
    }

    fn cost_of(&self, tokens: u64) -> f64 {
        tokens as f64 / 1000.0 * self.cost_per_1k
    }

    /// Run a completion whose reply must parse via `parse`. Unparseable
    /// replies count against the parse budget and then become terminal
    /// schema failures.
    async fn complete_parsed<T, P>(
        &self,
        system: &str,
        user: &str,
        parse: P,
    ) -> Result<CallOutcome<T>, TerminalFailure>
    where
        P: Fn(&str) -> Result<T, String>,
    {
        let parse_failures = AtomicU32::new(0);
        let parse = &parse;
        let parse_failures = &parse_failures;
        call_with_retry(&self.store, JUDGE_API, &self.policy, |_| async move {
            let (reply, tokens) = self.complete(system, user, self.max_tokens).await?;
            match parse(&reply) {
                Ok(value) => Ok(CallOutcome::new(value, tokens, self.cost_of(tokens))),
                Err(reason) => {
                    let failures = parse_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    if failures > self.parse_retries {
                        Err(ApiError::Schema(reason))
                    } else {
                        Err(ApiError::Parse(reason))
                    }
                }
            }
        })
        .await
    }
}

#[async_trait]
impl Judge for JudgeClient {
    async fn evaluate(
        &self,
        query: &str,
        context_docs: &[String],
        answer: &str,
    ) -> Result<Evaluation, JudgeError> {
        let user = format_evaluation_input(query, context_docs, answer);
        let outcome = self
            .complete_parsed(EVALUATE_SYSTEM, &user, |reply| {
                let parsed: RewardReply = extract_json(reply)?;
                if !(-1.0..=1.0).contains(&parsed.reward) {
                    return Err(format!("reward {} outside [-1, 1]", parsed.reward));
                }
                Ok(parsed)
            })
            .await?;

        Ok(Evaluation {
            reward: outcome.value.reward,
            reasoning: outcome.value.reasoning,
            tokens: outcome.tokens,
            cost: outcome.cost,
        })
    }

    async fn reflect(
        &self,
        query: &str,
        answer: &str,
        reward: f64,
        reasoning: &str,
    ) -> Result<String, JudgeError> {
        let user = format!(
            "Query: {query}\n\nAnswer given: {answer}\n\nJudge reward: {reward:.2}\n\
             Judge reasoning: {reasoning}\n\nWhat should the system remember?"
        );
        let outcome = self
            .complete_parsed(REFLECT_SYSTEM, &user, |reply| {
                let trimmed = reply.trim();
                if trimmed.is_empty() {
                    Err("empty reflection".to_string())
                } else {
                    Ok(trimmed.to_string())
                }
            })
            .await?;
        Ok(outcome.value)
    }

    async fn score_document(
        &self,
        query: &str,
        document: &str,
        prompt: JudgePrompt,
    ) -> Result<f64, JudgeError> {
        let system = match prompt {
            JudgePrompt::Primary => SCORE_SYSTEM_PRIMARY,
            JudgePrompt::Secondary => SCORE_SYSTEM_SECONDARY,
        };
        let user = format!("Query: {query}\n\nDocument:\n{document}");
        let outcome = self
            .complete_parsed(system, &user, |reply| {
                let parsed: ScoreReply = extract_json(reply)?;
                if !(0.0..=1.0).contains(&parsed.score) {
                    return Err(format!("score {} outside [0, 1]", parsed.score));
                }
                Ok(parsed.score)
            })
            .await?;
        Ok(outcome.value)
    }

    async fn health_ping(&self) -> Result<(), JudgeError> {
        // Single unlogged attempt: ping failures must not feed the retry and
        // fallback machinery.
        self.complete("Reply with the single word: pong", "ping", 8)
            .await
            .map(|_| ())
            .map_err(|e| JudgeError::Unavailable {
                attempts: 1,
                source: e,
            })
    }
}

/// Pull the first JSON object out of a reply that may carry adjacent prose.
fn extract_json<T: serde::de::DeserializeOwned>(reply: &str) -> Result<T, String> {
    let start = reply.find('{').ok_or_else(|| "no JSON object in reply".to_string())?;
    let end = reply.rfind('}').ok_or_else(|| "no JSON object in reply".to_string())?;
    if end < start {
        return Err("malformed JSON object in reply".to_string());
    }
    serde_json::from_str(&reply[start..=end]).map_err(|e| e.to_string())
}

fn format_evaluation_input(query: &str, context_docs: &[String], answer: &str) -> String {
    let mut out = format!("Query: {query}\n\nRetrieved context:\n");
    if context_docs.is_empty() {
        out.push_str("(none)\n");
    }
    for (i, doc) in context_docs.iter().enumerate() {
        out.push_str(&format!("[{}] {}\n", i + 1, doc));
    }
    out.push_str(&format!("\nAnswer to evaluate:\n{answer}"));
    out
}
