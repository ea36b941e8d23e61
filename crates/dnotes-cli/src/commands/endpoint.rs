//! Endpoint command - show where the push stream would connect

use anyhow::Result;
use dnotes_client::StreamConfig;

use crate::output::OutputContext;

/// Print the resolved stream URL and client tuning
pub fn endpoint(config: &StreamConfig, ctx: &OutputContext) -> Result<()> {
    ctx.print_kv(&endpoint_pairs(config)?);
    Ok(())
}

fn endpoint_pairs(config: &StreamConfig) -> Result<Vec<(&'static str, String)>> {
    let policy = &config.reconnect;
    Ok(vec![
        ("stream_url", config.endpoint.stream_url()?.to_string()),
        ("source", config.endpoint.base_source().to_string()),
        ("max_attempts", policy.max_attempts.to_string()),
        ("base_delay_ms", policy.base_delay_ms.to_string()),
        ("dedup_window_ms", config.dedup_window_ms.to_string()),
        ("connect_timeout_ms", config.connect_timeout_ms.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pairs_for_configured_base() {
        let mut config = StreamConfig::default();
        config.endpoint.api_base = Some("https://notes.example.com/api".parse().unwrap());

        let pairs = endpoint_pairs(&config).unwrap();
        assert_eq!(pairs[0], ("stream_url", "https://notes.example.com/api/sse".to_string()));
        assert_eq!(pairs[2], ("max_attempts", "5".to_string()));
        assert_eq!(pairs[3], ("base_delay_ms", "1000".to_string()));
        assert_eq!(pairs[4], ("dedup_window_ms", "2000".to_string()));
    }
}
