//! Index engine client / 索引引擎客户端
//!
//! Thin HTTP client over an Elasticsearch-compatible engine. The service
//! only relies on the capabilities spelled out at this boundary: scored
//! structured queries, bulk upsert/update/delete, and cursor (scroll)
//! exports.

pub mod bulk;
pub mod index;

use serde::Deserialize;
use serde_json::{json, Value};

/// Errors returned by the index engine boundary / 索引引擎错误
#[derive(Debug, thiserror::Error)]
pub enum EsError {
    #[error("index engine request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("index engine returned {status}: {body}")]
    Status { status: u16, body: String },
}

pub type EsResult<T> = Result<T, EsError>;

/// One hit of a search or scroll page / 单条命中
#[derive(Debug, Clone, Deserialize)]
pub struct Hit {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source", default)]
    pub source: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Hits {
    #[serde(default)]
    pub hits: Vec<Hit>,
}

/// Response of `_search` and `_search/scroll` / 搜索与滚动响应
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    #[serde(rename = "_scroll_id", default)]
    pub scroll_id: Option<String>,
    #[serde(default)]
    pub hits: Hits,
}

/// Index engine HTTP client / 引擎HTTP客户端
#[derive(Debug, Clone)]
pub struct EsClient {
    http: reqwest::Client,
    base_url: String,
}

impl EsClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> EsResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(EsError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Verify the engine is reachable, fatal at bootstrap / 启动连通性检查
    pub async fn ping(&self) -> EsResult<()> {
        let response = self.http.get(self.url("/")).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Cluster health document for the status endpoint / 集群健康信息
    pub async fn cluster_health(&self) -> EsResult<Value> {
        let response = self.http.get(self.url("/_cluster/health")).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Document count of an index / 索引文档数量
    pub async fn count(&self, index: &str) -> EsResult<u64> {
        let response = self
            .http
            .get(self.url(&format!("/{}/_count", index)))
            .send()
            .await?;
        let body: Value = Self::check(response).await?.json().await?;
        Ok(body["count"].as_u64().unwrap_or(0))
    }

    /// Create the claims index with its mapping when missing / 索引不存在时创建
    pub async fn ensure_claims_index(&self) -> EsResult<()> {
        let response = self
            .http
            .head(self.url(&format!("/{}", index::CLAIMS)))
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status().as_u16() != 404 {
            return Self::check(response).await.map(|_| ());
        }
        tracing::info!("Claims index missing, creating with mapping");
        let response = self
            .http
            .put(self.url(&format!("/{}", index::CLAIMS)))
            .json(&index::claims_mapping())
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Execute a search request / 执行搜索
    pub async fn search(&self, index: &str, body: &Value) -> EsResult<SearchResponse> {
        let response = self
            .http
            .post(self.url(&format!("/{}/_search", index)))
            .json(body)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Execute a search and return the raw engine response / 返回原始响应
    ///
    /// Used by the debug/explain path, which passes everything through.
    pub async fn search_raw(&self, index: &str, body: &Value) -> EsResult<Value> {
        let response = self
            .http
            .post(self.url(&format!("/{}/_search", index)))
            .json(body)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Open a scroll cursor over an index / 打开滚动游标
    pub async fn open_scroll(
        &self,
        index: &str,
        body: &Value,
        keep_alive: &str,
    ) -> EsResult<SearchResponse> {
        let response = self
            .http
            .post(self.url(&format!("/{}/_search?scroll={}", index, keep_alive)))
            .json(body)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Fetch the next scroll page / 获取下一页
    pub async fn continue_scroll(
        &self,
        scroll_id: &str,
        keep_alive: &str,
    ) -> EsResult<SearchResponse> {
        let response = self
            .http
            .post(self.url("/_search/scroll"))
            .json(&json!({ "scroll": keep_alive, "scroll_id": scroll_id }))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Release a scroll cursor, must run on completion or error / 释放游标
    pub async fn clear_scroll(&self, scroll_id: &str) -> EsResult<()> {
        let response = self
            .http
            .delete(self.url("/_search/scroll"))
            .json(&json!({ "scroll_id": [scroll_id] }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Submit one ndjson `_bulk` payload / 提交批量载荷
    pub async fn bulk_raw(&self, ndjson: String) -> EsResult<Value> {
        let response = self
            .http
            .post(self.url("/_bulk"))
            .header("Content-Type", "application/x-ndjson")
            .body(ndjson)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}
