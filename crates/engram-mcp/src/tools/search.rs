//! hybrid_search and multi_query_search tools

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use engram_core::{ScoredInsight, SearchWeights};

use crate::error::ToolError;
use crate::state::Services;

pub fn hybrid_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query_text": {
                "type": "string",
                "minLength": 1,
                "description": "Query text; always required, also used for the keyword branch"
            },
            "query_embedding": {
                "type": "array",
                "items": {"type": "number"},
                "minItems": 1536,
                "maxItems": 1536,
                "description": "Optional precomputed 1536-dim query vector"
            },
            "top_k": {
                "type": "integer",
                "minimum": 1,
                "maximum": 100,
                "default": 5
            },
            "weights": {
                "type": "object",
                "properties": {
                    "semantic": {"type": "number", "minimum": 0, "maximum": 1, "default": 0.7},
                    "keyword": {"type": "number", "minimum": 0, "maximum": 1, "default": 0.3}
                },
                "description": "Branch weights; must sum to 1"
            }
        },
        "required": ["query_text"]
    })
}

pub fn multi_query_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query_variants": {
                "type": "array",
                "items": {"type": "string", "minLength": 1},
                "minItems": 1,
                "maxItems": 5,
                "description": "Host-supplied variants, original query included"
            },
            "top_k": {
                "type": "integer",
                "minimum": 1,
                "maximum": 100,
                "default": 5
            },
            "weights": {
                "type": "object",
                "properties": {
                    "semantic": {"type": "number", "minimum": 0, "maximum": 1, "default": 0.7},
                    "keyword": {"type": "number", "minimum": 0, "maximum": 1, "default": 0.3}
                }
            }
        },
        "required": ["query_variants"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WeightArgs {
    semantic: f64,
    keyword: f64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HybridArgs {
    query_text: String,
    #[serde(default)]
    query_embedding: Option<Vec<f32>>,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    weights: Option<WeightArgs>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MultiQueryArgs {
    query_variants: Vec<String>,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    weights: Option<WeightArgs>,
}

fn resolve_weights(
    weights: Option<WeightArgs>,
    services: &Services,
) -> Result<SearchWeights, ToolError> {
    match weights {
        Some(w) => Ok(SearchWeights::new(w.semantic, w.keyword)?),
        None => Ok(services.default_weights),
    }
}

fn render_results(results: &[ScoredInsight]) -> Vec<Value> {
    results
        .iter()
        .map(|hit| {
            json!({
                "id": hit.insight.id,
                "content": hit.insight.content,
                "score": hit.score,
                "semantic_score": hit.semantic_score,
                "keyword_score": hit.keyword_score,
                "source": hit.source,
            })
        })
        .collect()
}

pub async fn execute_hybrid(
    services: &Arc<Services>,
    args: Option<Value>,
) -> Result<Value, ToolError> {
    let args: HybridArgs = super::parse_args(args)?;
    let weights = resolve_weights(args.weights, services)?;
    let top_k = args.top_k.unwrap_or(services.config.retrieval.default_top_k);

    let results = services
        .hybrid
        .search(&args.query_text, args.query_embedding, top_k, weights)
        .await?;

    Ok(json!({
        "results": render_results(&results),
        "counts": {"final_results": results.len()},
    }))
}

pub async fn execute_multi_query(
    services: &Arc<Services>,
    args: Option<Value>,
) -> Result<Value, ToolError> {
    let args: MultiQueryArgs = super::parse_args(args)?;
    let weights = resolve_weights(args.weights, services)?;
    let top_k = args.top_k.unwrap_or(services.retriever.default_top_k());

    let fused = services
        .retriever
        .search(&args.query_variants, top_k, weights)
        .await?;

    Ok(json!({
        "results": render_results(&fused.results),
        "counts": {
            "variants": fused.counts.variants,
            "candidates": fused.counts.candidates,
            "final_results": fused.counts.final_results,
        },
    }))
}
