/// Move reconciliation: optimistic local move, server confirmation,
/// authoritative reload on any failure.
///
/// Failure semantics: move/win/lose requests are never retried. The only
/// recovery action is a full reload from the server, so the board is
/// never left showing a state known to be wrong. A user whose move was
/// rejected re-drags after the reload.
use std::sync::Arc;

use dealboard_core::store::BoardStore;

use crate::api::{ApiError, DealApi};

/// What a reconciled move ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Deal missing, unknown target, or already in the target stage.
    NoOp,
    /// Optimistic move confirmed by the server.
    Moved,
    /// Moved into a win stage; `mark_won` issued and board reloaded.
    MovedAndWon,
    /// Moved into a loss stage; `mark_lost` issued and board reloaded.
    MovedAndLost,
    /// Target stage is a loss stage: nothing was mutated. The caller
    /// collects a loss reason (or an explicit skip), then calls
    /// `complete_loss`.
    NeedsLossReason,
    /// The move was rejected or the request failed; the board was
    /// resynced from the server snapshot.
    Reloaded,
}

pub struct MoveReconciler {
    store: Arc<BoardStore>,
    api: Arc<dyn DealApi>,
    pipeline_id: String,
}

impl MoveReconciler {
    pub fn new(store: Arc<BoardStore>, api: Arc<dyn DealApi>, pipeline_id: impl Into<String>) -> Self {
        Self {
            store,
            api,
            pipeline_id: pipeline_id.into(),
        }
    }

    /// Reconcile a "move deal to stage" intent.
    ///
    /// Errors are only returned when the recovery reload itself fails;
    /// ordinary move failures resolve to `MoveOutcome::Reloaded`.
    pub async fn move_deal(
        &self,
        deal_id: &str,
        target_stage_id: &str,
    ) -> Result<MoveOutcome, ApiError> {
        let Some((_, current_stage)) = self.store.find_deal_and_stage(deal_id) else {
            log::debug!("[reconciler] move for unknown deal {}, ignoring", deal_id);
            return Ok(MoveOutcome::NoOp);
        };
        if current_stage.id == target_stage_id {
            return Ok(MoveOutcome::NoOp);
        }
        let Some(target_stage) = self.store.find_stage(target_stage_id) else {
            log::debug!(
                "[reconciler] move for deal {} to unknown stage {}, ignoring",
                deal_id,
                target_stage_id
            );
            return Ok(MoveOutcome::NoOp);
        };

        // Loss stages gate on a reason before anything is touched.
        if target_stage.is_loss {
            return Ok(MoveOutcome::NeedsLossReason);
        }

        if self
            .store
            .move_deal_locally(deal_id, &current_stage.id, target_stage_id)
            .is_err()
        {
            // The board drifted between lookup and move; a reload fixes it.
            return Ok(MoveOutcome::NoOp);
        }

        if let Err(e) = self.api.move_deal(deal_id, target_stage_id).await {
            log::warn!(
                "[reconciler] move of deal {} to stage {} failed ({}), reloading",
                deal_id,
                target_stage_id,
                e
            );
            self.reload().await?;
            return Ok(MoveOutcome::Reloaded);
        }

        if target_stage.is_win {
            // Reload unconditionally once a win side-effect call is made
            // so the board reflects the server's closing timestamps.
            if let Err(e) = self.api.mark_won(deal_id).await {
                log::warn!("[reconciler] mark_won for deal {} failed: {}", deal_id, e);
            }
            self.reload().await?;
            return Ok(MoveOutcome::MovedAndWon);
        }

        Ok(MoveOutcome::Moved)
    }

    /// Finish a loss move after the user supplied a reason (or `None`
    /// for an explicit skip).
    pub async fn complete_loss(
        &self,
        deal_id: &str,
        target_stage_id: &str,
        reason: Option<String>,
    ) -> Result<MoveOutcome, ApiError> {
        let Some((_, current_stage)) = self.store.find_deal_and_stage(deal_id) else {
            log::debug!("[reconciler] loss for unknown deal {}, ignoring", deal_id);
            return Ok(MoveOutcome::NoOp);
        };

        if current_stage.id != target_stage_id {
            let _ = self
                .store
                .move_deal_locally(deal_id, &current_stage.id, target_stage_id);
        }

        if let Err(e) = self.api.move_deal(deal_id, target_stage_id).await {
            log::warn!(
                "[reconciler] loss move of deal {} to stage {} failed ({}), reloading",
                deal_id,
                target_stage_id,
                e
            );
            self.reload().await?;
            return Ok(MoveOutcome::Reloaded);
        }

        if let Err(e) = self.api.mark_lost(deal_id, reason.as_deref()).await {
            log::warn!("[reconciler] mark_lost for deal {} failed: {}", deal_id, e);
        }
        self.reload().await?;
        Ok(MoveOutcome::MovedAndLost)
    }

    /// Authoritative resync from the server snapshot.
    pub async fn reload(&self) -> Result<(), ApiError> {
        let stages = self.api.load_board(&self.pipeline_id).await?;
        self.store.replace_all(stages);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use dealboard_core::types::{Deal, Stage};
    use std::sync::Mutex;

    fn make_deal(id: &str, stage_id: &str) -> Deal {
        Deal {
            id: id.into(),
            title: format!("Deal {}", id),
            value: 100.0,
            probability: 50,
            expected_close_date: None,
            stage_id: stage_id.into(),
            contact_id: None,
            contact_name: None,
            tag_ids: Vec::new(),
            won_at: None,
            lost_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            custom_fields: serde_json::Map::new(),
        }
    }

    fn make_stage(id: &str, deals: Vec<Deal>) -> Stage {
        Stage {
            id: id.into(),
            name: id.to_uppercase(),
            color: None,
            position: 0,
            is_win: false,
            is_loss: false,
            deals,
        }
    }

    /// In-memory API double. Records calls and fails on demand; the
    /// snapshot it serves on reload stands in for server truth.
    struct FakeApi {
        calls: Mutex<Vec<String>>,
        snapshot: Mutex<Vec<Stage>>,
        fail_move: bool,
        fail_won: bool,
        fail_lost: bool,
    }

    impl FakeApi {
        fn new(snapshot: Vec<Stage>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                snapshot: Mutex::new(snapshot),
                fail_move: false,
                fail_won: false,
                fail_lost: false,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn rejection() -> ApiError {
            ApiError::Status {
                status: 422,
                body: "rejected".into(),
            }
        }
    }

    #[async_trait]
    impl DealApi for FakeApi {
        async fn load_board(&self, pipeline_id: &str) -> Result<Vec<Stage>, ApiError> {
            self.record(format!("load:{}", pipeline_id));
            Ok(self.snapshot.lock().unwrap().clone())
        }

        async fn move_deal(&self, deal_id: &str, stage_id: &str) -> Result<(), ApiError> {
            self.record(format!("move:{}:{}", deal_id, stage_id));
            if self.fail_move {
                return Err(Self::rejection());
            }
            Ok(())
        }

        async fn mark_won(&self, deal_id: &str) -> Result<(), ApiError> {
            self.record(format!("won:{}", deal_id));
            if self.fail_won {
                return Err(Self::rejection());
            }
            Ok(())
        }

        async fn mark_lost(&self, deal_id: &str, reason: Option<&str>) -> Result<(), ApiError> {
            self.record(format!("lost:{}:{}", deal_id, reason.unwrap_or("-")));
            if self.fail_lost {
                return Err(Self::rejection());
            }
            Ok(())
        }
    }

    fn board() -> Vec<Stage> {
        vec![
            make_stage("a", vec![make_deal("1", "a")]),
            make_stage("b", vec![]),
            Stage {
                is_win: true,
                ..make_stage("win", vec![])
            },
            Stage {
                is_loss: true,
                ..make_stage("loss", vec![])
            },
        ]
    }

    fn setup(api: FakeApi) -> (Arc<BoardStore>, Arc<FakeApi>, MoveReconciler) {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = Arc::new(BoardStore::new());
        store.replace_all(board());
        let api = Arc::new(api);
        let reconciler = MoveReconciler::new(store.clone(), api.clone(), "p1");
        (store, api, reconciler)
    }

    #[tokio::test]
    async fn test_same_stage_is_noop() {
        let (store, api, reconciler) = setup(FakeApi::new(board()));
        let before = store.version();
        let outcome = reconciler.move_deal("1", "a").await.unwrap();
        assert_eq!(outcome, MoveOutcome::NoOp);
        assert!(api.calls().is_empty());
        assert_eq!(store.version(), before);
    }

    #[tokio::test]
    async fn test_unknown_deal_is_noop() {
        let (_, api, reconciler) = setup(FakeApi::new(board()));
        let outcome = reconciler.move_deal("ghost", "b").await.unwrap();
        assert_eq!(outcome, MoveOutcome::NoOp);
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_confirmed_move_keeps_optimistic_state() {
        let (store, api, reconciler) = setup(FakeApi::new(board()));
        let outcome = reconciler.move_deal("1", "b").await.unwrap();
        assert_eq!(outcome, MoveOutcome::Moved);
        assert_eq!(api.calls(), vec!["move:1:b"]);
        let (deal, stage) = store.find_deal_and_stage("1").unwrap();
        assert_eq!(stage.id, "b");
        assert_eq!(deal.stage_id, "b");
    }

    #[tokio::test]
    async fn test_rejected_move_converges_to_server_snapshot() {
        // Server truth disagrees with both the pre-move and the
        // optimistic post-move placement.
        let server = vec![
            make_stage("a", vec![]),
            make_stage("b", vec![]),
            Stage {
                is_win: true,
                ..make_stage("win", vec![make_deal("1", "win")])
            },
            Stage {
                is_loss: true,
                ..make_stage("loss", vec![])
            },
        ];
        let mut api = FakeApi::new(server);
        api.fail_move = true;
        let (store, api, reconciler) = setup(api);

        let outcome = reconciler.move_deal("1", "b").await.unwrap();
        assert_eq!(outcome, MoveOutcome::Reloaded);
        assert_eq!(api.calls(), vec!["move:1:b", "load:p1"]);
        let (_, stage) = store.find_deal_and_stage("1").unwrap();
        assert_eq!(stage.id, "win");
    }

    #[tokio::test]
    async fn test_win_move_marks_won_then_reloads() {
        let (_, api, reconciler) = setup(FakeApi::new(board()));
        let outcome = reconciler.move_deal("1", "win").await.unwrap();
        assert_eq!(outcome, MoveOutcome::MovedAndWon);
        assert_eq!(api.calls(), vec!["move:1:win", "won:1", "load:p1"]);
    }

    #[tokio::test]
    async fn test_reload_unconditional_when_mark_won_fails() {
        let mut api = FakeApi::new(board());
        api.fail_won = true;
        let (_, api, reconciler) = setup(api);
        let outcome = reconciler.move_deal("1", "win").await.unwrap();
        assert_eq!(outcome, MoveOutcome::MovedAndWon);
        assert_eq!(api.calls(), vec!["move:1:win", "won:1", "load:p1"]);
    }

    #[tokio::test]
    async fn test_loss_stage_gates_without_mutation() {
        let (store, api, reconciler) = setup(FakeApi::new(board()));
        let before = store.version();
        let outcome = reconciler.move_deal("1", "loss").await.unwrap();
        assert_eq!(outcome, MoveOutcome::NeedsLossReason);
        assert!(api.calls().is_empty());
        assert_eq!(store.version(), before);
        let (_, stage) = store.find_deal_and_stage("1").unwrap();
        assert_eq!(stage.id, "a");
    }

    #[tokio::test]
    async fn test_complete_loss_with_reason() {
        let (_, api, reconciler) = setup(FakeApi::new(board()));
        let outcome = reconciler
            .complete_loss("1", "loss", Some("price".into()))
            .await
            .unwrap();
        assert_eq!(outcome, MoveOutcome::MovedAndLost);
        assert_eq!(api.calls(), vec!["move:1:loss", "lost:1:price", "load:p1"]);
    }

    #[tokio::test]
    async fn test_complete_loss_with_skipped_reason() {
        let (_, api, reconciler) = setup(FakeApi::new(board()));
        let outcome = reconciler.complete_loss("1", "loss", None).await.unwrap();
        assert_eq!(outcome, MoveOutcome::MovedAndLost);
        assert_eq!(api.calls(), vec!["move:1:loss", "lost:1:-", "load:p1"]);
    }

    #[tokio::test]
    async fn test_complete_loss_move_failure_reloads() {
        let mut api = FakeApi::new(board());
        api.fail_move = true;
        let (_, api, reconciler) = setup(api);
        let outcome = reconciler
            .complete_loss("1", "loss", Some("price".into()))
            .await
            .unwrap();
        assert_eq!(outcome, MoveOutcome::Reloaded);
        assert_eq!(api.calls(), vec!["move:1:loss", "load:p1"]);
    }

    #[tokio::test]
    async fn test_realtime_echo_of_own_move_does_not_duplicate() {
        let (store, _, reconciler) = setup(FakeApi::new(board()));
        reconciler.move_deal("1", "b").await.unwrap();

        // The server echoes our own move over the realtime channel.
        let echo: dealboard_core::realtime::DealEvent =
            serde_json::from_str(r#"{"type":"update","deal":{"id":"1","stage_id":"b"}}"#).unwrap();
        store.apply_event(&echo);

        let stages = store.snapshot();
        let occurrences: usize = stages
            .iter()
            .flat_map(|s| s.deals.iter())
            .filter(|d| d.id == "1")
            .count();
        assert_eq!(occurrences, 1);
        let (_, stage) = store.find_deal_and_stage("1").unwrap();
        assert_eq!(stage.id, "b");
    }

    #[tokio::test]
    async fn test_reload_failure_surfaces_error() {
        struct DeadApi;

        #[async_trait]
        impl DealApi for DeadApi {
            async fn load_board(&self, _: &str) -> Result<Vec<Stage>, ApiError> {
                Err(ApiError::Status {
                    status: 503,
                    body: "down".into(),
                })
            }
            async fn move_deal(&self, _: &str, _: &str) -> Result<(), ApiError> {
                Err(ApiError::Status {
                    status: 503,
                    body: "down".into(),
                })
            }
            async fn mark_won(&self, _: &str) -> Result<(), ApiError> {
                unreachable!()
            }
            async fn mark_lost(&self, _: &str, _: Option<&str>) -> Result<(), ApiError> {
                unreachable!()
            }
        }

        let store = Arc::new(BoardStore::new());
        store.replace_all(board());
        let reconciler = MoveReconciler::new(store, Arc::new(DeadApi), "p1");
        assert!(reconciler.move_deal("1", "b").await.is_err());
    }
}
