/// Aggregate pipeline metrics derived from a board snapshot.
///
/// Pure reads for the dashboard layer; nothing here touches the store.
use serde::{Deserialize, Serialize};

use crate::types::Stage;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageMetrics {
    pub stage_id: String,
    pub stage_name: String,
    pub deal_count: usize,
    pub total_value: f64,
    /// Sum of value * probability / 100 over open deals.
    pub weighted_value: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineMetrics {
    pub open_count: usize,
    pub won_count: usize,
    pub lost_count: usize,
    pub total_value: f64,
    pub weighted_value: f64,
    pub stages: Vec<StageMetrics>,
}

pub fn pipeline_metrics(stages: &[Stage]) -> PipelineMetrics {
    let mut metrics = PipelineMetrics::default();

    for stage in stages {
        let mut stage_metrics = StageMetrics {
            stage_id: stage.id.clone(),
            stage_name: stage.name.clone(),
            ..Default::default()
        };

        for deal in &stage.deals {
            stage_metrics.deal_count += 1;
            stage_metrics.total_value += deal.value;

            if deal.won_at.is_some() {
                metrics.won_count += 1;
            } else if deal.lost_at.is_some() {
                metrics.lost_count += 1;
            } else {
                metrics.open_count += 1;
                stage_metrics.weighted_value += deal.value * f64::from(deal.probability) / 100.0;
            }
        }

        metrics.total_value += stage_metrics.total_value;
        metrics.weighted_value += stage_metrics.weighted_value;
        metrics.stages.push(stage_metrics);
    }

    metrics
}
