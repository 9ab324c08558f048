use serde_json::{Value, json};
use switchyard::prelude::*;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Application handler
// ---------------------------------------------------------------------------

/// Stand-in for a model backend: answers `ai_request` by echoing the prompt.
struct EchoAi;

#[async_trait]
impl MessageHandler for EchoAi {
    async fn handle(&self, conn: ConnectionId, data: Value) -> Result<HandlerReply, HandlerError> {
        let prompt = data
            .get("prompt")
            .and_then(Value::as_str)
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| HandlerError::InvalidData("Missing 'prompt'".into()))?;

        tracing::debug!(conn_id = %conn, len = prompt.len(), "ai request");
        Ok(HandlerReply::new(
            "ai_response",
            json!({ "text": format!("Echo: {prompt}"), "model": "echo" }),
        ))
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "switchyard.json".into());
    let config = HubConfig::load(&path)?;
    tracing::info!(config = %path, addr = %config.bind_addr(), "starting switchyard server");

    let server = SwitchyardServer::builder()
        .config(config)
        .handler("ai_request", EchoAi)
        .build()
        .await?;

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
