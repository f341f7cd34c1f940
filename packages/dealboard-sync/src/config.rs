/// Remote backend endpoints for one deployment.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub server_url: String,
}

impl SyncConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn rest_url(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }

    /// Realtime channel URL for a pipeline, derived from the REST base.
    pub fn ws_url(&self, pipeline_id: &str) -> String {
        format!(
            "{}/realtime/{}",
            self.server_url
                .replace("http://", "ws://")
                .replace("https://", "wss://"),
            pipeline_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_trimmed() {
        let config = SyncConfig::new("https://crm.example.com/");
        assert_eq!(config.rest_url("/deals/d1/move"), "https://crm.example.com/deals/d1/move");
    }

    #[test]
    fn test_ws_url_derived_from_rest_base() {
        let config = SyncConfig::new("https://crm.example.com");
        assert_eq!(config.ws_url("p1"), "wss://crm.example.com/realtime/p1");
        let config = SyncConfig::new("http://localhost:8000");
        assert_eq!(config.ws_url("p1"), "ws://localhost:8000/realtime/p1");
    }
}
