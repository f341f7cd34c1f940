/// Realtime deal-event merge.
///
/// Push events arrive out of band and may race with locally initiated
/// moves, so every merge is a total function from the previous full
/// stage list to the next one. Interleavings never observe a
/// partially-applied state, and the single-owner invariant (a deal id
/// lives in exactly one stage) holds after every application.
use serde::{Deserialize, Serialize};

use crate::types::{Deal, DealPatch, Stage};

/// A push notification for one deal change, scoped to a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DealEvent {
    Update { deal: DealPatch },
    Insert { deal: DealPatch },
    Delete { deal: DealPatch },
}

impl DealEvent {
    pub fn deal_id(&self) -> &str {
        match self {
            DealEvent::Update { deal } | DealEvent::Insert { deal } | DealEvent::Delete { deal } => {
                &deal.id
            }
        }
    }
}

/// Apply a realtime event to a stage list, producing the next list.
pub fn apply_event(stages: &[Stage], event: &DealEvent) -> Vec<Stage> {
    match event {
        DealEvent::Update { deal } => apply_update(stages, deal),
        DealEvent::Insert { deal } => apply_insert(stages, deal),
        DealEvent::Delete { deal } => remove_everywhere(stages, &deal.id),
    }
}

fn apply_update(stages: &[Stage], patch: &DealPatch) -> Vec<Stage> {
    // Capture the full local object before removal so fields absent
    // from the push payload survive the merge.
    let existing = find_deal(stages, &patch.id).cloned();

    let merged = match &existing {
        Some(old) => patch.apply_to(old),
        None => match patch.materialize() {
            Some(deal) => deal,
            None => {
                log::warn!(
                    "[realtime] update for unknown deal {} without stage_id, dropped",
                    patch.id
                );
                return stages.to_vec();
            }
        },
    };

    if !stage_exists(stages, &merged.stage_id) {
        // Target stage is not on the board (stale stage list). Keep the
        // deal where it was rather than lose it; a reload reconciles.
        log::warn!(
            "[realtime] update for deal {} targets unknown stage {}, keeping current placement",
            merged.id,
            merged.stage_id
        );
        return stages.to_vec();
    }

    let mut next = remove_everywhere(stages, &patch.id);
    insert_into_stage(&mut next, merged);
    next
}

fn apply_insert(stages: &[Stage], patch: &DealPatch) -> Vec<Stage> {
    // Duplicate delivery guard: an id already on the board is ignored.
    if find_deal(stages, &patch.id).is_some() {
        return stages.to_vec();
    }

    let deal = match patch.materialize() {
        Some(deal) => deal,
        None => {
            log::warn!("[realtime] insert for deal {} without stage_id, dropped", patch.id);
            return stages.to_vec();
        }
    };

    if !stage_exists(stages, &deal.stage_id) {
        log::warn!(
            "[realtime] insert for deal {} targets unknown stage {}, dropped",
            deal.id,
            deal.stage_id
        );
        return stages.to_vec();
    }

    let mut next = stages.to_vec();
    insert_into_stage(&mut next, deal);
    next
}

/// Remove a deal id from every stage. Idempotent when the id is absent.
pub fn remove_everywhere(stages: &[Stage], deal_id: &str) -> Vec<Stage> {
    stages
        .iter()
        .map(|stage| {
            let mut stage = stage.clone();
            stage.deals.retain(|deal| deal.id != deal_id);
            stage
        })
        .collect()
}

pub fn find_deal<'a>(stages: &'a [Stage], deal_id: &str) -> Option<&'a Deal> {
    stages
        .iter()
        .flat_map(|stage| stage.deals.iter())
        .find(|deal| deal.id == deal_id)
}

fn stage_exists(stages: &[Stage], stage_id: &str) -> bool {
    stages.iter().any(|stage| stage.id == stage_id)
}

fn insert_into_stage(stages: &mut [Stage], deal: Deal) {
    if let Some(stage) = stages.iter_mut().find(|stage| stage.id == deal.stage_id) {
        stage.deals.push(deal);
    }
}
