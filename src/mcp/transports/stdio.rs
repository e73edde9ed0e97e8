use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::mcp::McpEngine;

const STDIO_SESSION: &str = "stdio";

/// Line-delimited JSON on stdin/stdout (§4.8). A line that fails to parse
/// logs and the transport continues at the next newline; stderr never
/// carries protocol messages.
pub async fn run(engine: Arc<McpEngine>) -> std::io::Result<()> {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            tracing::info!("stdin closed, stopping stdio transport");
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match engine.handle_raw(STDIO_SESSION, trimmed).await {
            Some(response) => {
                let mut encoded = serde_json::to_string(&response).unwrap_or_else(|e| {
                    tracing::error!(error = %e, "failed to serialize response");
                    "{}".to_string()
                });
                encoded.push('\n');
                stdout.write_all(encoded.as_bytes()).await?;
                stdout.flush().await?;
            }
            None => {}
        }
    }
    Ok(())
}
