use std::fs;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use tracing::info;

use remedy_rag::{
    build_engine, build_query_from_profile, load_profile, EmbeddingClient, EmbeddingIndex, Judge,
    RetrievalConfig, RetrievalEngine,
};

use crate::cli::QueryArgs;

pub async fn run(args: QueryArgs) -> Result<()> {
    let mut retrieval = RetrievalConfig::from_env()?;
    args.retrieval.apply(&mut retrieval);
    let profile = load_profile(&args.profile)
        .with_context(|| format!("failed to load {}", args.profile.display()))?;
    let engine = build_engine(retrieval, EmbeddingClient::from_env()?)
        .await
        .context("failed to build retrieval engine")?;
    let output = profile_passages(&engine, profile).await?;
    let passages = output["top_passages"].as_array().map_or(0, Vec::len);
    let rendered = serde_json::to_string_pretty(&output)?;
    fs::write(&args.out, rendered + "\n")
        .with_context(|| format!("failed to write {}", args.out.display()))?;
    info!(out = %args.out.display(), passages, "profile query written");
    println!("[remedy] {passages} passages -> {}", args.out.display());
    Ok(())
}

/// Queries the engine with the profile's description and returns the profile
/// extended with `user_description` and `top_passages`.
pub async fn profile_passages<I: EmbeddingIndex, J: Judge>(
    engine: &RetrievalEngine<I, J>,
    profile: Value,
) -> Result<Value> {
    let description = build_query_from_profile(&profile);
    let hits = engine.query(&description).await?;
    let Value::Object(mut output) = profile else {
        return Err(anyhow!("profile must be a JSON object"));
    };
    output.insert("user_description".into(), Value::String(description));
    output.insert("top_passages".into(), serde_json::to_value(hits)?);
    Ok(Value::Object(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use remedy_rag::{LlmJudge, MemoryIndex};
    use serde_json::json;

    #[tokio::test]
    async fn profile_output_keeps_profile_and_adds_passages() {
        let index = MemoryIndex::from_texts(
            vec![
                "Screen reader users need text alternatives for images".to_string(),
                "Keyboard users need visible focus".to_string(),
            ],
            EmbeddingClient::hash(),
        )
        .await
        .unwrap();
        let config = RetrievalConfig {
            similarity_cutoff: -1.0,
            rerank_enabled: false,
            rerank_top_n: 1,
            ..RetrievalConfig::default()
        };
        let engine = RetrievalEngine::<_, LlmJudge>::new(index, None, config).unwrap();
        let profile = json!({
            "intial_profile": {"user_description": ["screen reader user"]},
            "name": "tester"
        });
        let output = profile_passages(&engine, profile).await.unwrap();
        assert_eq!(output["name"], "tester");
        assert_eq!(
            output["user_description"],
            "User has the following accessibility needs: screen reader user"
        );
        assert_eq!(output["top_passages"].as_array().unwrap().len(), 1);
        assert!(output["top_passages"][0]["text"].is_string());
    }
}
