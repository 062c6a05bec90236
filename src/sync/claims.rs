//! Incremental claim sync / 增量声明同步
//!
//! Walks chainquery rows modified since the checkpoint in id order,
//! routing each one to an index upsert or a delete. The cursor is only
//! persisted after a run completes, so an aborted run replays its rows;
//! operations are keyed by claim id and replays converge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::MySqlPool;

use crate::config;
use crate::es::bulk::{BulkOperation, BulkProcessor};
use crate::es::EsClient;
use crate::models::{BidState, Claim, ClaimRow};
use crate::sync::state::SyncState;
use crate::sync::{try_acquire, SyncOutcome};

/// Batch query over chainquery. Joins the publishing channel for its
/// name and certificate amount, and aggregates tags into one column.
const CLAIM_BATCH_SQL: &str = r#"
SELECT c.id,
       c.name,
       p.name AS channel,
       p.claim_id AS channel_claim_id,
       c.bid_state,
       c.effective_amount,
       c.transaction_time,
       COALESCE(p.effective_amount, 1) AS certificate_amount,
       c.claim_id,
       c.value_as_json AS value,
       c.title,
       c.description,
       c.release_time,
       c.content_type,
       c.is_cert_valid AS cert_valid,
       c.type AS claim_type,
       c.frame_width,
       c.frame_height,
       c.duration,
       c.is_nsfw AS nsfw,
       c.thumbnail_url,
       c.fee,
       GROUP_CONCAT(t.tag) AS tags
FROM claim c
    LEFT JOIN claim p ON p.claim_id = c.publisher_id
    LEFT JOIN claim_tag ct ON ct.claim_id = c.claim_id
    LEFT JOIN tag t ON ct.tag_id = t.id
WHERE c.id > ? AND c.modified_at >= ?
GROUP BY c.id
ORDER BY c.id
LIMIT ?
"#;

/// Decide what one source row means for the index. Terminal bid states
/// always delete, whatever else the row carries; rows that cannot be
/// transformed are logged and skipped without failing the batch.
pub fn route_row(row: ClaimRow, terminal_states: &[String]) -> Option<BulkOperation> {
    let bid_state = BidState::from(row.bid_state.clone());
    if bid_state.is_terminal(terminal_states) {
        return Some(Claim::delete_op(&row.claim_id));
    }
    match Claim::try_from(row) {
        Ok(claim) => match claim.index_op() {
            Ok(op) => Some(op),
            Err(e) => {
                tracing::error!("could not encode claim {}: {}", claim.claim_id, e);
                None
            }
        },
        Err(e) => {
            tracing::error!("skipping claim row: {:#}", e);
            None
        }
    }
}

/// Cursor transition after one batch. A short batch means the head was
/// reached: the pass closes, the id cursor resets and the time bound
/// rolls up to when the pass started. A full batch keeps the cursor on
/// the last processed id; at the per-run ceiling the run stops and
/// reports that more work is pending. / 批次后的游标转移
pub fn advance_cursor(
    state: &mut SyncState,
    fetched: usize,
    processed: usize,
    batch_size: usize,
    max_per_run: usize,
) -> Option<SyncOutcome> {
    if fetched < batch_size {
        state.last_id = 0;
        state.last_sync_time = state.start_sync_time;
        return Some(SyncOutcome::CaughtUp);
    }
    if processed >= max_per_run {
        return Some(SyncOutcome::MoreWork);
    }
    None
}

/// Incremental sync driver / 增量同步驱动
pub struct ClaimSync {
    db: MySqlPool,
    es: EsClient,
    running: AtomicBool,
}

impl ClaimSync {
    pub fn new(db: MySqlPool, es: EsClient) -> Arc<Self> {
        Arc::new(Self {
            db,
            es,
            running: AtomicBool::new(false),
        })
    }

    /// Whether a run is currently in flight / 是否有运行中的任务
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one bounded pass of the sync / 运行一次有界同步
    pub async fn run(&self) -> SyncOutcome {
        let Some(_guard) = try_acquire(&self.running) else {
            tracing::debug!("claim sync already running, skipping");
            return SyncOutcome::Skipped;
        };

        let path = config::config().get_sync_state_path();
        let mut state = match SyncState::load(&path) {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("claim sync cannot load checkpoint: {:#}", e);
                return SyncOutcome::Failed;
            }
        };
        // A new pass records its own start so rows modified while it
        // runs are picked up by the next pass
        if state.is_between_passes() {
            state.start_sync_time = Utc::now();
        }

        let processor = BulkProcessor::start(self.es.clone(), "ClaimSync", 4, 500);
        let outcome = match self.process_batches(&processor, &mut state).await {
            Ok(outcome) => {
                if let Err(e) = state.save(&path) {
                    tracing::error!("claim sync cannot persist checkpoint: {:#}", e);
                }
                outcome
            }
            Err(e) => {
                // Cursor untouched, the next run replays this window
                tracing::error!("claim sync aborted: {:#}", e);
                SyncOutcome::Failed
            }
        };
        processor.flush().await;
        processor.close().await;
        outcome
    }

    async fn process_batches(
        &self,
        processor: &BulkProcessor,
        state: &mut SyncState,
    ) -> Result<SyncOutcome> {
        let sync_cfg = config::config().sync;
        let terminal_states = sync_cfg.terminal_states;
        // The time bound stays fixed for the whole pass; only the id
        // cursor advances between batches
        let since = state.last_sync_time;
        let mut processed = 0usize;

        loop {
            let rows: Vec<ClaimRow> = sqlx::query_as(CLAIM_BATCH_SQL)
                .bind(state.last_id)
                .bind(since)
                .bind(sync_cfg.batch_size as u64)
                .fetch_all(&self.db)
                .await
                .context("chainquery batch query failed")?;
            let fetched = rows.len();

            for row in rows {
                state.last_id = row.id;
                if let Some(op) = route_row(row, &terminal_states) {
                    processor.add(op).await;
                }
            }
            processed += fetched;
            tracing::debug!("claim sync processed batch of {} rows", fetched);

            match advance_cursor(
                state,
                fetched,
                processed,
                sync_cfg.batch_size,
                sync_cfg.max_per_run,
            ) {
                Some(SyncOutcome::CaughtUp) => {
                    tracing::info!("claim sync caught up after {} rows", processed);
                    return Ok(SyncOutcome::CaughtUp);
                }
                Some(outcome) => {
                    tracing::info!(
                        "claim sync hit the per-run ceiling at {} rows, more work pending",
                        processed
                    );
                    return Ok(outcome);
                }
                None => {}
            }
        }
    }
}
