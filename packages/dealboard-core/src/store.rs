/// In-memory board state for one pipeline.
///
/// The store is the single source of truth for rendering. Every mutation
/// computes a brand-new stage list from the previous one and swaps it in
/// under the write lock, so a reader holding an earlier snapshot is
/// never surprised by in-place edits, and the single-owner invariant
/// (each deal id in exactly one stage) survives any interleaving of
/// optimistic moves, rollback reloads, and realtime pushes.
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::realtime::{self, DealEvent};
use crate::types::{Deal, Stage};

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("Deal not found: {0}")]
    DealNotFound(String),

    #[error("Stage not found: {0}")]
    StageNotFound(String),
}

/// Events emitted after every committed store mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BoardChangeEvent {
    Replaced {
        version: u64,
    },
    DealMoved {
        deal_id: String,
        from_stage_id: String,
        to_stage_id: String,
        version: u64,
    },
    RealtimeApplied {
        deal_id: String,
        version: u64,
    },
}

#[derive(Debug)]
struct BoardState {
    stages: Vec<Stage>,
    /// Monotonic version counter, incremented on every change.
    version: u64,
}

pub struct BoardStore {
    state: RwLock<BoardState>,
    event_tx: broadcast::Sender<BoardChangeEvent>,
}

impl Default for BoardStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BoardStore {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            state: RwLock::new(BoardState {
                stages: Vec::new(),
                version: 0,
            }),
            event_tx,
        }
    }

    /// Subscribe to change events. Lagging receivers miss events but the
    /// store itself is always consistent; a `snapshot()` catches up.
    pub fn subscribe(&self) -> broadcast::Receiver<BoardChangeEvent> {
        self.event_tx.subscribe()
    }

    /// Cloned stage list for rendering or projection.
    pub fn snapshot(&self) -> Vec<Stage> {
        self.state.read().unwrap().stages.clone()
    }

    pub fn version(&self) -> u64 {
        self.state.read().unwrap().version
    }

    /// Locate a deal and its owning stage by id. Linear scan; boards are
    /// bounded to a few hundred deals in practice.
    pub fn find_deal_and_stage(&self, deal_id: &str) -> Option<(Deal, Stage)> {
        let state = self.state.read().unwrap();
        for stage in &state.stages {
            if let Some(deal) = stage.deals.iter().find(|d| d.id == deal_id) {
                return Some((deal.clone(), stage.clone()));
            }
        }
        None
    }

    pub fn find_stage(&self, stage_id: &str) -> Option<Stage> {
        let state = self.state.read().unwrap();
        state.stages.iter().find(|s| s.id == stage_id).cloned()
    }

    /// Full resync from a freshly loaded snapshot. Authoritative and
    /// idempotent; the recovery path for every inconsistency.
    pub fn replace_all(&self, stages: Vec<Stage>) {
        let version = {
            let mut state = self.state.write().unwrap();
            state.stages = stages;
            state.version += 1;
            state.version
        };
        self.emit(BoardChangeEvent::Replaced { version });
    }

    /// Optimistically move a deal between stages, re-stamping its
    /// `stage_id`. The deal must currently sit in `from_stage_id`; a
    /// mismatch means the board already drifted and is left for the next
    /// reload to fix.
    pub fn move_deal_locally(
        &self,
        deal_id: &str,
        from_stage_id: &str,
        to_stage_id: &str,
    ) -> Result<(), BoardError> {
        let (version, result) = {
            let mut state = self.state.write().unwrap();
            match move_deal(&state.stages, deal_id, from_stage_id, to_stage_id) {
                Ok(next) => {
                    state.stages = next;
                    state.version += 1;
                    (state.version, Ok(()))
                }
                Err(e) => (state.version, Err(e)),
            }
        };
        match result {
            Ok(()) => {
                self.emit(BoardChangeEvent::DealMoved {
                    deal_id: deal_id.to_string(),
                    from_stage_id: from_stage_id.to_string(),
                    to_stage_id: to_stage_id.to_string(),
                    version,
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Merge a realtime push event (update / insert / delete).
    pub fn apply_event(&self, event: &DealEvent) {
        let version = {
            let mut state = self.state.write().unwrap();
            state.stages = realtime::apply_event(&state.stages, event);
            state.version += 1;
            state.version
        };
        self.emit(BoardChangeEvent::RealtimeApplied {
            deal_id: event.deal_id().to_string(),
            version,
        });
    }

    fn emit(&self, event: BoardChangeEvent) {
        // Send fails only when no receiver is subscribed, which is fine.
        let _ = self.event_tx.send(event);
    }
}

/// Pure move transition: removes the deal from every stage and appends
/// it, re-stamped, to the target. Funneling through one full rewrite is
/// what keeps a deal from ever existing in two columns.
fn move_deal(
    stages: &[Stage],
    deal_id: &str,
    from_stage_id: &str,
    to_stage_id: &str,
) -> Result<Vec<Stage>, BoardError> {
    let in_from = stages
        .iter()
        .find(|s| s.id == from_stage_id)
        .map(|s| s.deals.iter().any(|d| d.id == deal_id))
        .unwrap_or(false);
    if !in_from {
        return Err(BoardError::DealNotFound(deal_id.to_string()));
    }
    if !stages.iter().any(|s| s.id == to_stage_id) {
        return Err(BoardError::StageNotFound(to_stage_id.to_string()));
    }

    let mut moved = realtime::find_deal(stages, deal_id)
        .cloned()
        .ok_or_else(|| BoardError::DealNotFound(deal_id.to_string()))?;
    moved.stage_id = to_stage_id.to_string();

    let mut next = realtime::remove_everywhere(stages, deal_id);
    if let Some(stage) = next.iter_mut().find(|s| s.id == to_stage_id) {
        stage.deals.push(moved);
    }
    Ok(next)
}
