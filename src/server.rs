// src/server.rs

use std::time::{Duration, Instant};

use crate::error::{ChatError, Result};

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// One `/health` probe against a local llama-server.
pub async fn is_server_ready(client: &reqwest::Client, url: &str) -> bool {
    let health_url = format!("{}/health", url.trim_end_matches('/'));
    matches!(
        client.get(&health_url).timeout(PROBE_TIMEOUT).send().await,
        Ok(resp) if resp.status().is_success()
    )
}

pub async fn wait_for_server_ready(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();

    loop {
        if is_server_ready(client, url).await {
            tracing::debug!("[server] {} ready after {:?}", url, start.elapsed());
            return Ok(());
        }
        if start.elapsed() > timeout {
            return Err(ChatError::transport(format!(
                "Local server at {} did not become ready within {}s",
                url,
                timeout.as_secs()
            )));
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
