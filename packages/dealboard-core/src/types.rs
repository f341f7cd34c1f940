use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A pipeline stage (one board column).
///
/// `is_win` / `is_loss` mark terminal-outcome columns: dropping a deal
/// into one of them closes the deal on the server side. At most one of
/// the two flags is set per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub is_win: bool,
    #[serde(default)]
    pub is_loss: bool,
    #[serde(default)]
    pub deals: Vec<Deal>,
}

/// A deal (opportunity) moving through the pipeline.
///
/// Wire format is the backend's snake_case JSON. `won_at` and `lost_at`
/// are mutually exclusive; a deal is closed iff one of them is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub value: f64,
    /// Win probability in percent (0-100).
    #[serde(default)]
    pub probability: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_close_date: Option<NaiveDate>,
    pub stage_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    /// Display name of the linked contact, denormalized for search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub won_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lost_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub custom_fields: serde_json::Map<String, serde_json::Value>,
}

impl Deal {
    /// A deal is closed once the server stamped a terminal outcome.
    pub fn is_closed(&self) -> bool {
        self.won_at.is_some() || self.lost_at.is_some()
    }
}

/// Partial deal payload carried by realtime push events.
///
/// The push schema only covers the core scalar fields; tags, the contact
/// display name, and custom fields never appear in it and must be
/// preserved from the local copy on merge. Nullable fields use a double
/// `Option` so "absent" (retain) and "null" (clear) stay distinct.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DealPatch {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<u8>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub expected_close_date: Option<Option<NaiveDate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub contact_id: Option<Option<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub won_at: Option<Option<DateTime<Utc>>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "double_option"
    )]
    pub lost_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

impl DealPatch {
    /// Merge this patch over an existing deal. Fields absent from the
    /// patch keep their local values; present fields overwrite, with
    /// `null` clearing nullable ones.
    pub fn apply_to(&self, existing: &Deal) -> Deal {
        let mut merged = existing.clone();
        if let Some(title) = &self.title {
            merged.title = title.clone();
        }
        if let Some(value) = self.value {
            merged.value = value;
        }
        if let Some(probability) = self.probability {
            merged.probability = probability;
        }
        if let Some(date) = &self.expected_close_date {
            merged.expected_close_date = *date;
        }
        if let Some(stage_id) = &self.stage_id {
            merged.stage_id = stage_id.clone();
        }
        if let Some(contact_id) = &self.contact_id {
            merged.contact_id = contact_id.clone();
        }
        if let Some(won_at) = &self.won_at {
            merged.won_at = *won_at;
        }
        if let Some(lost_at) = &self.lost_at {
            merged.lost_at = *lost_at;
        }
        if let Some(created_at) = self.created_at {
            merged.created_at = created_at;
        }
        if let Some(updated_at) = self.updated_at {
            merged.updated_at = updated_at;
        }
        merged
    }

    /// Build a full deal from the patch alone (insert with no prior
    /// local copy). Returns None when the payload carries no stage id,
    /// since the deal could not be placed anywhere.
    pub fn materialize(&self) -> Option<Deal> {
        let stage_id = self.stage_id.clone()?;
        let now = Utc::now();
        Some(Deal {
            id: self.id.clone(),
            title: self.title.clone().unwrap_or_default(),
            value: self.value.unwrap_or(0.0),
            probability: self.probability.unwrap_or(0),
            expected_close_date: self.expected_close_date.flatten(),
            stage_id,
            contact_id: self.contact_id.clone().flatten(),
            contact_name: None,
            tag_ids: Vec::new(),
            won_at: self.won_at.flatten(),
            lost_at: self.lost_at.flatten(),
            created_at: self.created_at.unwrap_or(now),
            updated_at: self.updated_at.unwrap_or(now),
            custom_fields: serde_json::Map::new(),
        })
    }
}

/// Summary info for a board in list responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardSummary {
    pub pipeline_id: String,
    pub stages: Vec<StageSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSummary {
    pub id: String,
    pub name: String,
    pub deal_count: usize,
    pub total_value: f64,
}

pub fn summarize(pipeline_id: &str, stages: &[Stage]) -> BoardSummary {
    BoardSummary {
        pipeline_id: pipeline_id.to_string(),
        stages: stages
            .iter()
            .map(|stage| StageSummary {
                id: stage.id.clone(),
                name: stage.name.clone(),
                deal_count: stage.deals.len(),
                total_value: stage.deals.iter().map(|d| d.value).sum(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_deal() -> Deal {
        Deal {
            id: "d1".into(),
            title: "Acme renewal".into(),
            value: 1200.0,
            probability: 60,
            expected_close_date: NaiveDate::from_ymd_opt(2026, 9, 1),
            stage_id: "s1".into(),
            contact_id: Some("c1".into()),
            contact_name: Some("Ada Lovelace".into()),
            tag_ids: vec!["enterprise".into()],
            won_at: None,
            lost_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            custom_fields: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_patch_retains_absent_fields() {
        let deal = base_deal();
        let patch: DealPatch =
            serde_json::from_str(r#"{"id":"d1","value":2000.0,"stage_id":"s2"}"#).unwrap();
        let merged = patch.apply_to(&deal);
        assert_eq!(merged.value, 2000.0);
        assert_eq!(merged.stage_id, "s2");
        assert_eq!(merged.title, "Acme renewal");
        assert_eq!(merged.tag_ids, vec!["enterprise".to_string()]);
        assert_eq!(merged.contact_name.as_deref(), Some("Ada Lovelace"));
    }

    #[test]
    fn test_patch_null_clears_nullable_field() {
        let deal = base_deal();
        let patch: DealPatch =
            serde_json::from_str(r#"{"id":"d1","expected_close_date":null}"#).unwrap();
        let merged = patch.apply_to(&deal);
        assert_eq!(merged.expected_close_date, None);
    }

    #[test]
    fn test_patch_absent_nullable_field_retained() {
        let deal = base_deal();
        let patch: DealPatch = serde_json::from_str(r#"{"id":"d1","title":"New"}"#).unwrap();
        let merged = patch.apply_to(&deal);
        assert_eq!(merged.expected_close_date, deal.expected_close_date);
        assert_eq!(merged.title, "New");
    }

    #[test]
    fn test_materialize_requires_stage() {
        let patch: DealPatch = serde_json::from_str(r#"{"id":"d9"}"#).unwrap();
        assert!(patch.materialize().is_none());

        let patch: DealPatch =
            serde_json::from_str(r#"{"id":"d9","stage_id":"s1","title":"Fresh"}"#).unwrap();
        let deal = patch.materialize().unwrap();
        assert_eq!(deal.stage_id, "s1");
        assert_eq!(deal.title, "Fresh");
        assert!(deal.tag_ids.is_empty());
    }

    #[test]
    fn test_summarize_counts_and_values() {
        let stage = crate::types::Stage {
            id: "s1".into(),
            name: "Qualify".into(),
            color: None,
            position: 0,
            is_win: false,
            is_loss: false,
            deals: vec![base_deal()],
        };
        let summary = summarize("p1", &[stage]);
        assert_eq!(summary.pipeline_id, "p1");
        assert_eq!(summary.stages[0].deal_count, 1);
        assert_eq!(summary.stages[0].total_value, 1200.0);
    }

    #[test]
    fn test_is_closed() {
        let mut deal = base_deal();
        assert!(!deal.is_closed());
        deal.won_at = Some(Utc::now());
        assert!(deal.is_closed());
    }
}
