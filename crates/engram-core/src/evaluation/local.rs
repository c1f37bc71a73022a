//! Local heuristic evaluator
//!
//! Used while the external judge is in fallback. Reproduces the rubric shape
//! (Relevance 0.4, Accuracy 0.4, Completeness 0.2) with lexical-overlap
//! channels; no external calls, no cost.

use std::collections::HashSet;

use crate::clients::Evaluation;

/// Heuristic stand-in for the external judge.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalEvaluator;

impl LocalEvaluator {
    /// Rubric-weighted lexical evaluation, reward in [-1, 1].
    pub fn evaluate(&self, query: &str, context_docs: &[String], answer: &str) -> Evaluation {
        let query_tokens = tokenize(query);
        let answer_tokens = tokenize(answer);
        let context_tokens: HashSet<String> = context_docs
            .iter()
            .flat_map(|doc| tokenize(doc))
            .collect();

        let relevance = overlap_fraction(&query_tokens, &answer_tokens);
        let accuracy = overlap_fraction(&answer_tokens, &context_tokens);
        let completeness = coverage(&context_tokens, &answer_tokens);

        let score = 0.4 * relevance + 0.4 * accuracy + 0.2 * completeness;
        let reward = (2.0 * score - 1.0).clamp(-1.0, 1.0);

        Evaluation {
            reward,
            reasoning: format!(
                "Heuristic rubric: relevance {relevance:.2}, accuracy {accuracy:.2}, \
                 completeness {completeness:.2} (weights 0.4/0.4/0.2)"
            ),
            tokens: 0,
            cost: 0.0,
        }
    }

    /// Template reflection so low-reward outcomes still leave a lesson.
    pub fn reflect(&self, query: &str, _answer: &str, reward: f64, reasoning: &str) -> String {
        format!(
            "Answer to \"{}\" scored {:.2}. {}. Retrieve more specific context before answering \
             similar queries.",
            truncate(query, 120),
            reward,
            truncate(reasoning, 200)
        )
    }
}

/// Fraction of `needles` found in `haystack`. Empty needle set scores 0.
fn overlap_fraction(needles: &HashSet<String>, haystack: &HashSet<String>) -> f64 {
    if needles.is_empty() {
        return 0.0;
    }
    let hits = needles.iter().filter(|t| haystack.contains(*t)).count();
    hits as f64 / needles.len() as f64
}

/// How much of the context vocabulary the answer reuses, saturating so long
/// contexts do not demand verbatim repetition.
fn coverage(context: &HashSet<String>, answer: &HashSet<String>) -> f64 {
    if context.is_empty() {
        return 0.0;
    }
    let hits = context.iter().filter(|t| answer.contains(*t)).count();
    (hits as f64 / (context.len().min(20)) as f64).min(1.0)
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(String::from)
        .collect()
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect::<String>() + "..."
    }
}
