//! Blocklist sweep / 屏蔽列表清理
//!
//! Removes content the service will not serve: claims named by an
//! external blocklist of outpoints, plus everything published by the
//! statically configured blocked channels. Runs rarely; deletion of an
//! already absent document is a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use sqlx::MySqlPool;

use crate::config;
use crate::es::bulk::BulkProcessor;
use crate::es::EsClient;
use crate::models::Claim;
use crate::sync::{try_acquire, SyncOutcome};

/// Blocklist sweep driver / 屏蔽清理驱动
pub struct BlocklistSync {
    db: MySqlPool,
    es: EsClient,
    http: reqwest::Client,
    running: AtomicBool,
}

impl BlocklistSync {
    pub fn new(db: MySqlPool, es: EsClient) -> Arc<Self> {
        Arc::new(Self {
            db,
            es,
            http: reqwest::Client::new(),
            running: AtomicBool::new(false),
        })
    }

    /// Whether a sweep is currently in flight / 是否有运行中的清理
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one sweep over blocklist and blocked channels / 运行一次清理
    pub async fn run(&self) -> SyncOutcome {
        let Some(_guard) = try_acquire(&self.running) else {
            tracing::debug!("blocklist sweep already running, skipping");
            return SyncOutcome::Skipped;
        };
        let sync_cfg = config::config().sync;
        if sync_cfg.blocklist_url.is_none() && sync_cfg.blocked_channels.is_empty() {
            return SyncOutcome::Skipped;
        }

        let processor = BulkProcessor::start(self.es.clone(), "Blocklist", 2, 500);
        let mut failed = false;

        if let Some(url) = &sync_cfg.blocklist_url {
            match self.fetch_outpoints(url).await {
                Ok(outpoints) => {
                    tracing::info!("blocklist returned {} outpoints", outpoints.len());
                    for outpoint in &outpoints {
                        if let Err(e) = self.remove_outpoint(&processor, outpoint).await {
                            tracing::error!("could not remove outpoint {}: {:#}", outpoint, e);
                            failed = true;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("could not fetch blocklist: {:#}", e);
                    failed = true;
                }
            }
        }

        for channel in &sync_cfg.blocked_channels {
            if let Err(e) = self.remove_channel_content(&processor, channel).await {
                tracing::error!("could not remove channel {}: {:#}", channel, e);
                failed = true;
            }
        }

        processor.flush().await;
        processor.close().await;
        if failed {
            SyncOutcome::Failed
        } else {
            SyncOutcome::CaughtUp
        }
    }

    /// Fetch the outpoint list, tolerating both envelope shapes
    async fn fetch_outpoints(&self, url: &str) -> Result<Vec<String>> {
        let body: Value = self
            .http
            .get(url)
            .send()
            .await
            .context("blocklist request failed")?
            .error_for_status()
            .context("blocklist request rejected")?
            .json()
            .await
            .context("blocklist response was not valid json")?;
        let outpoints = body["data"]["outpoints"]
            .as_array()
            .or_else(|| body["outpoints"].as_array())
            .context("blocklist response carried no outpoints")?;
        Ok(outpoints
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect())
    }

    /// Resolve one `txid:vout` outpoint through chainquery and delete
    /// what it names. A blocked channel outpoint takes its whole
    /// catalog down with it.
    async fn remove_outpoint(&self, processor: &BulkProcessor, outpoint: &str) -> Result<()> {
        let Some((txid, vout)) = outpoint.split_once(':') else {
            bail!("malformed outpoint {:?}", outpoint);
        };
        let vout: u32 = vout
            .parse()
            .with_context(|| format!("malformed vout in outpoint {:?}", outpoint))?;

        let claim: Option<(String, Option<String>)> = sqlx::query_as(
            "SELECT claim_id, type FROM claim WHERE transaction_hash_update = ? AND vout_update = ?",
        )
        .bind(txid)
        .bind(vout)
        .fetch_optional(&self.db)
        .await
        .context("outpoint lookup failed")?;

        // Outpoints that never resolve are stale blocklist entries
        let Some((claim_id, claim_type)) = claim else {
            tracing::debug!("outpoint {} resolves to no claim", outpoint);
            return Ok(());
        };
        if claim_type.as_deref() == Some("channel") {
            self.remove_channel_content(processor, &claim_id).await?;
        } else {
            processor.add(Claim::delete_op(&claim_id)).await;
        }
        Ok(())
    }

    /// Delete a channel document and every claim it published
    async fn remove_channel_content(
        &self,
        processor: &BulkProcessor,
        channel_claim_id: &str,
    ) -> Result<()> {
        let published: Vec<(String,)> =
            sqlx::query_as("SELECT claim_id FROM claim WHERE publisher_id = ?")
                .bind(channel_claim_id)
                .fetch_all(&self.db)
                .await
                .context("channel content lookup failed")?;
        tracing::info!(
            "removing channel {} and {} published claims",
            channel_claim_id,
            published.len()
        );
        for (claim_id,) in published {
            processor.add(Claim::delete_op(&claim_id)).await;
        }
        processor.add(Claim::delete_op(channel_claim_id)).await;
        Ok(())
    }
}
