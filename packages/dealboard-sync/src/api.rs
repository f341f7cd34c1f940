/// REST client for the deal backend.
///
/// The backend is a black box consumed over four endpoints:
///
///   GET  /deals/by-pipeline/{pipeline_id}  -> full stage+deals snapshot
///   POST /deals/{id}/move   { "stage_id": ... }
///   POST /deals/{id}/win    {}
///   POST /deals/{id}/lose   { "reason": ... | null }
///
/// `DealApi` is the seam the reconciler works against; `HttpDealApi` is
/// the reqwest-backed production implementation.
use async_trait::async_trait;
use dealboard_core::types::Stage;
use serde::Deserialize;

use crate::config::SyncConfig;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Request failed with status {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Deserialize)]
pub struct BoardSnapshot {
    pub stages: Vec<Stage>,
}

#[async_trait]
pub trait DealApi: Send + Sync {
    /// Load the authoritative stage+deals snapshot for a pipeline.
    async fn load_board(&self, pipeline_id: &str) -> Result<Vec<Stage>, ApiError>;

    /// Move a deal to another stage.
    async fn move_deal(&self, deal_id: &str, stage_id: &str) -> Result<(), ApiError>;

    /// Mark a deal won. The server stamps `won_at`.
    async fn mark_won(&self, deal_id: &str) -> Result<(), ApiError>;

    /// Mark a deal lost with an optional reason. The server stamps `lost_at`.
    async fn mark_lost(&self, deal_id: &str, reason: Option<&str>) -> Result<(), ApiError>;
}

pub struct HttpDealApi {
    client: reqwest::Client,
    config: SyncConfig,
}

impl HttpDealApi {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl DealApi for HttpDealApi {
    async fn load_board(&self, pipeline_id: &str) -> Result<Vec<Stage>, ApiError> {
        let url = self
            .config
            .rest_url(&format!("/deals/by-pipeline/{}", pipeline_id));
        let resp = self.client.get(url).send().await?;
        let resp = check_status(resp).await?;
        let snapshot: BoardSnapshot = resp.json().await?;
        Ok(snapshot.stages)
    }

    async fn move_deal(&self, deal_id: &str, stage_id: &str) -> Result<(), ApiError> {
        let url = self.config.rest_url(&format!("/deals/{}/move", deal_id));
        let body = serde_json::json!({ "stage_id": stage_id });
        let resp = self.client.post(url).json(&body).send().await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn mark_won(&self, deal_id: &str) -> Result<(), ApiError> {
        let url = self.config.rest_url(&format!("/deals/{}/win", deal_id));
        let resp = self
            .client
            .post(url)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn mark_lost(&self, deal_id: &str, reason: Option<&str>) -> Result<(), ApiError> {
        let url = self.config.rest_url(&format!("/deals/{}/lose", deal_id));
        let body = serde_json::json!({ "reason": reason });
        let resp = self.client.post(url).json(&body).send().await?;
        check_status(resp).await?;
        Ok(())
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        let body = resp.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
