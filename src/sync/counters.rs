//! Engagement counter sync / 互动计数同步
//!
//! Walks the index with a scroll cursor and patches view and subscriber
//! counts fetched from the internal APIs. Counts of zero are never
//! written; absent counters stay absent and score neutrally. The whole
//! job is disabled when no internal APIs are configured.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::{self, InternalApisConfig};
use crate::es::bulk::{BulkOperation, BulkProcessor};
use crate::es::{index, EsClient};
use crate::sync::{try_acquire, SyncOutcome};

const SCROLL_KEEP_ALIVE: &str = "10m";

/// Envelope of every internal API response / 内部API响应信封
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    error: Option<String>,
    data: Option<T>,
}

/// Counter sync driver / 计数同步驱动
pub struct CounterSync {
    es: EsClient,
    http: reqwest::Client,
    running: AtomicBool,
}

impl CounterSync {
    pub fn new(es: EsClient) -> Arc<Self> {
        Arc::new(Self {
            es,
            http: reqwest::Client::new(),
            running: AtomicBool::new(false),
        })
    }

    /// Whether a sweep is currently in flight / 是否有运行中的扫描
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one full counter sweep / 运行一次完整计数扫描
    pub async fn run(&self) -> SyncOutcome {
        let Some(_guard) = try_acquire(&self.running) else {
            tracing::debug!("counter sync already running, skipping");
            return SyncOutcome::Skipped;
        };
        let Some(api) = config::config().internal_apis else {
            tracing::debug!("no internal APIs configured, counter sync disabled");
            return SyncOutcome::Skipped;
        };

        let mut failed = false;
        if let Err(e) = self.sync_view_counts(&api).await {
            tracing::error!("view count sync failed: {:#}", e);
            failed = true;
        }
        if let Err(e) = self.sync_sub_counts(&api).await {
            tracing::error!("subscriber count sync failed: {:#}", e);
            failed = true;
        }
        if failed {
            SyncOutcome::Failed
        } else {
            SyncOutcome::CaughtUp
        }
    }

    /// Patch `view_cnt` across every document / 为全部文档更新浏览数
    async fn sync_view_counts(&self, api: &InternalApisConfig) -> Result<()> {
        let query = json!({
            "query": { "match_all": {} },
            "_source": false,
            "size": config::config().sync.batch_size
        });
        let processor = BulkProcessor::start(self.es.clone(), "ViewCounts", 2, 500);
        let outcome = self
            .scroll_and_patch(&processor, &query, |ids| {
                let api = api.clone();
                let http = self.http.clone();
                async move {
                    let counts = fetch_view_counts(&http, &api, &ids).await?;
                    Ok(ids
                        .into_iter()
                        .zip(counts)
                        .filter(|(_, count)| *count > 0)
                        .map(|(id, count)| BulkOperation::Update {
                            id,
                            doc: json!({ "view_cnt": count }),
                        })
                        .collect())
                }
            })
            .await;
        processor.flush().await;
        processor.close().await;
        outcome
    }

    /// Patch `sub_cnt` across channel documents only / 仅为频道更新订阅数
    async fn sync_sub_counts(&self, api: &InternalApisConfig) -> Result<()> {
        let query = json!({
            "query": { "match": { "claim_type": "channel" } },
            "_source": false,
            "size": config::config().sync.batch_size
        });
        let processor = BulkProcessor::start(self.es.clone(), "SubCounts", 2, 500);
        let outcome = self
            .scroll_and_patch(&processor, &query, |ids| {
                let api = api.clone();
                let http = self.http.clone();
                async move {
                    let counts = fetch_sub_counts(&http, &api, &ids).await?;
                    Ok(ids
                        .into_iter()
                        .filter_map(|id| {
                            let count = counts.get(&id).copied().unwrap_or(0);
                            (count > 0).then(|| BulkOperation::Update {
                                id,
                                doc: json!({ "sub_cnt": count }),
                            })
                        })
                        .collect())
                }
            })
            .await;
        processor.flush().await;
        processor.close().await;
        outcome
    }

    /// Scroll the index and queue the patches `fetch` derives for each
    /// page of ids. The cursor is always released, also on error.
    async fn scroll_and_patch<F, Fut>(
        &self,
        processor: &BulkProcessor,
        query: &Value,
        fetch: F,
    ) -> Result<()>
    where
        F: Fn(Vec<String>) -> Fut,
        Fut: std::future::Future<Output = Result<Vec<BulkOperation>>>,
    {
        let mut page = self
            .es
            .open_scroll(index::CLAIMS, query, SCROLL_KEEP_ALIVE)
            .await
            .context("could not open scroll")?;
        let Some(mut scroll_id) = page.scroll_id.clone() else {
            bail!("scroll response carried no cursor id");
        };

        let outcome = loop {
            let ids: Vec<String> = page.hits.hits.iter().map(|hit| hit.id.clone()).collect();
            if ids.is_empty() {
                break Ok(());
            }
            match fetch(ids).await {
                Ok(ops) => {
                    for op in ops {
                        processor.add(op).await;
                    }
                }
                Err(e) => break Err(e),
            }
            match self.es.continue_scroll(&scroll_id, SCROLL_KEEP_ALIVE).await {
                Ok(next) => {
                    if let Some(id) = next.scroll_id.clone() {
                        scroll_id = id;
                    }
                    page = next;
                }
                Err(e) => break Err(e.into()),
            }
        };

        if let Err(e) = self.es.clear_scroll(&scroll_id).await {
            tracing::warn!("could not clear scroll cursor: {}", e);
        }
        outcome
    }
}

/// Fetch view counts for a page of claim ids, positionally aligned
async fn fetch_view_counts(
    http: &reqwest::Client,
    api: &InternalApisConfig,
    ids: &[String],
) -> Result<Vec<i64>> {
    let response = http
        .post(format!("{}/file/view_count", api.url.trim_end_matches('/')))
        .form(&[
            ("auth_token", api.auth_token.as_str()),
            ("claim_id", ids.join(",").as_str()),
        ])
        .send()
        .await
        .context("view count request failed")?;
    let envelope: ApiEnvelope<Vec<i64>> = response
        .error_for_status()
        .context("view count request rejected")?
        .json()
        .await
        .context("view count response was not valid json")?;
    if !envelope.success {
        bail!(
            "view count api error: {}",
            envelope.error.unwrap_or_else(|| "unknown".to_string())
        );
    }
    let counts = envelope.data.context("view count api returned no data")?;
    if counts.len() != ids.len() {
        bail!(
            "view count api returned {} counts for {} claims",
            counts.len(),
            ids.len()
        );
    }
    Ok(counts)
}

/// Fetch subscriber counts keyed by channel claim id
async fn fetch_sub_counts(
    http: &reqwest::Client,
    api: &InternalApisConfig,
    ids: &[String],
) -> Result<HashMap<String, i64>> {
    let response = http
        .post(format!(
            "{}/subscription/sub_count",
            api.url.trim_end_matches('/')
        ))
        .form(&[
            ("auth_token", api.auth_token.as_str()),
            ("claim_id", ids.join(",").as_str()),
            ("is_map", "true"),
        ])
        .send()
        .await
        .context("subscriber count request failed")?;
    let envelope: ApiEnvelope<HashMap<String, i64>> = response
        .error_for_status()
        .context("subscriber count request rejected")?
        .json()
        .await
        .context("subscriber count response was not valid json")?;
    if !envelope.success {
        bail!(
            "subscriber count api error: {}",
            envelope.error.unwrap_or_else(|| "unknown".to_string())
        );
    }
    envelope
        .data
        .context("subscriber count api returned no data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_parses_success() {
        let envelope: ApiEnvelope<Vec<i64>> =
            serde_json::from_str(r#"{"success": true, "error": null, "data": [3, 0, 12]}"#)
                .unwrap();
        assert!(envelope.success);
        assert_eq!(envelope.data.unwrap(), vec![3, 0, 12]);
    }

    #[test]
    fn test_envelope_parses_map_payload() {
        let envelope: ApiEnvelope<HashMap<String, i64>> =
            serde_json::from_str(r#"{"success": true, "error": null, "data": {"abc": 9}}"#)
                .unwrap();
        assert_eq!(envelope.data.unwrap().get("abc"), Some(&9));
    }

    #[test]
    fn test_envelope_parses_failure() {
        let envelope: ApiEnvelope<Vec<i64>> =
            serde_json::from_str(r#"{"success": false, "error": "bad token", "data": null}"#)
                .unwrap();
        assert!(!envelope.success);
        assert_eq!(envelope.error.as_deref(), Some("bad token"));
        assert!(envelope.data.is_none());
    }
}
