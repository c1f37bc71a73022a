//! store_episode tool

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::ToolError;
use crate::state::Services;

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "minLength": 1,
                "description": "The original query; its embedding indexes the episode"
            },
            "reward": {
                "type": "number",
                "minimum": -1,
                "maximum": 1,
                "description": "Judge reward for the failed interaction"
            },
            "reflection": {
                "type": "string",
                "minLength": 1,
                "description": "Verbalized lesson to surface on similar future queries"
            }
        },
        "required": ["query", "reward", "reflection"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Args {
    query: String,
    reward: f64,
    reflection: String,
}

pub async fn execute(services: &Arc<Services>, args: Option<Value>) -> Result<Value, ToolError> {
    let args: Args = super::parse_args(args)?;
    let episode = services
        .tiers
        .store_episode(&args.query, args.reward, &args.reflection)
        .await?;
    Ok(json!({
        "id": episode.id,
        "timestamp": episode.created_at.to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests_support::test_services;
    use engram_core::EpisodeFilter;

    #[tokio::test]
    async fn test_store_and_recall_by_similarity() {
        let (services, _dir) = test_services();
        execute(
            &services,
            Some(json!({
                "query": "why did the deployment fail",
                "reward": -0.6,
                "reflection": "check rollout health before answering deployment questions"
            })),
        )
        .await
        .unwrap();

        let recalled = services
            .tiers
            .recall_episodes(
                "why did the deployment fail",
                5,
                Some(0.95),
                &EpisodeFilter::default(),
            )
            .await
            .unwrap();
        assert_eq!(recalled.len(), 1);
        assert!(recalled[0].similarity > 0.99);
    }

    #[tokio::test]
    async fn test_reward_bounds() {
        let (services, _dir) = test_services();
        let result = execute(
            &services,
            Some(json!({"query": "q", "reward": 2.0, "reflection": "r"})),
        )
        .await;
        assert!(result.is_err());
    }
}
