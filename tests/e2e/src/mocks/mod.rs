//! Scripted API mocks
//!
//! Deterministic, network-free implementations of the `Embedder` and `Judge`
//! traits. The embedder hashes tokens into a bag-of-words vector so related
//! texts overlap in cosine space; the judge follows a programmable script.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use engram_core::{
    ApiError, EMBEDDING_DIMENSIONS, Embedder, EmbeddingError, Evaluation, Judge, JudgeError,
    JudgePrompt, cosine_similarity,
};

/// Deterministic token-hash embedder.
///
/// Identical texts embed to identical vectors; texts sharing tokens have
/// positive cosine similarity.
pub struct ScriptedEmbedder {
    calls: AtomicU32,
    batch_calls: AtomicU32,
}

impl ScriptedEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            batch_calls: AtomicU32::new(0),
        }
    }

    /// Individual texts embedded (across both entry points).
    pub fn texts_embedded(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Batch API round-trips.
    pub fn batch_calls(&self) -> u32 {
        self.batch_calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0_f32; EMBEDDING_DIMENSIONS];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        vector[(hasher.finish() as usize) % EMBEDDING_DIMENSIONS] += 1.0;
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    } else {
        vector[0] = 1.0;
    }
    vector
}

#[async_trait]
impl Embedder for ScriptedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(embed_text(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.calls.fetch_add(texts.len() as u32, Ordering::SeqCst);
        Ok(texts.iter().map(|t| embed_text(t)).collect())
    }
}

/// What the scripted judge does next.
#[derive(Debug, Clone, Copy)]
pub enum JudgeScript {
    /// Evaluate successfully with this reward.
    Reward(f64),
    /// Behave as if retries exhausted against an unavailable API.
    Unavailable,
}

/// Programmable judge with call counters.
pub struct ScriptedJudge {
    script: Mutex<JudgeScript>,
    evaluate_calls: AtomicU32,
    ping_calls: AtomicU32,
}

impl ScriptedJudge {
    pub fn new(script: JudgeScript) -> Self {
        Self {
            script: Mutex::new(script),
            evaluate_calls: AtomicU32::new(0),
            ping_calls: AtomicU32::new(0),
        }
    }

    pub fn set_script(&self, script: JudgeScript) {
        *self.script.lock().expect("script lock poisoned") = script;
    }

    fn current(&self) -> JudgeScript {
        *self.script.lock().expect("script lock poisoned")
    }

    pub fn evaluate_calls(&self) -> u32 {
        self.evaluate_calls.load(Ordering::SeqCst)
    }

    pub fn ping_calls(&self) -> u32 {
        self.ping_calls.load(Ordering::SeqCst)
    }

    fn unavailable() -> JudgeError {
        JudgeError::Unavailable {
            attempts: 4,
            source: ApiError::ServerUnavailable(503),
        }
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn evaluate(
        &self,
        _query: &str,
        _context_docs: &[String],
        _answer: &str,
    ) -> Result<Evaluation, JudgeError> {
        self.evaluate_calls.fetch_add(1, Ordering::SeqCst);
        match self.current() {
            JudgeScript::Reward(reward) => Ok(Evaluation {
                reward,
                reasoning: "scripted verdict".to_string(),
                tokens: 25,
                cost: 0.0005,
            }),
            JudgeScript::Unavailable => Err(Self::unavailable()),
        }
    }

    async fn reflect(
        &self,
        query: &str,
        _answer: &str,
        _reward: f64,
        _reasoning: &str,
    ) -> Result<String, JudgeError> {
        match self.current() {
            JudgeScript::Reward(_) => Ok(format!(
                "Next time, retrieve context that actually covers: {query}"
            )),
            JudgeScript::Unavailable => Err(Self::unavailable()),
        }
    }

    async fn score_document(
        &self,
        query: &str,
        document: &str,
        prompt: JudgePrompt,
    ) -> Result<f64, JudgeError> {
        match self.current() {
            JudgeScript::Unavailable => Err(Self::unavailable()),
            JudgeScript::Reward(_) => {
                let base =
                    cosine_similarity(&embed_text(query), &embed_text(document)) as f64;
                let offset = match prompt {
                    JudgePrompt::Primary => 0.0,
                    JudgePrompt::Secondary => 0.05,
                };
                Ok((base + offset).clamp(0.0, 1.0))
            }
        }
    }

    async fn health_ping(&self) -> Result<(), JudgeError> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        match self.current() {
            JudgeScript::Reward(_) => Ok(()),
            JudgeScript::Unavailable => Err(Self::unavailable()),
        }
    }
}
