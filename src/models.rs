//! Claim document model / 声明文档模型
//!
//! Maps one chainquery row into the document shape stored in the search
//! index. The `value` payload is schema-on-read: it is carried as opaque
//! JSON and returned unchanged, never interpreted structurally.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::es::bulk::BulkOperation;

/// Lifecycle status of a claim's ownership stake / 声明所有权状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BidState {
    Controlling,
    Active,
    Accepted,
    Spent,
    Expired,
    /// Unrecognized state carried through verbatim / 未识别状态原样保留
    Other(String),
}

impl BidState {
    pub fn as_str(&self) -> &str {
        match self {
            BidState::Controlling => "Controlling",
            BidState::Active => "Active",
            BidState::Accepted => "Accepted",
            BidState::Spent => "Spent",
            BidState::Expired => "Expired",
            BidState::Other(s) => s,
        }
    }

    /// Whether this state routes the claim to deletion / 是否触发删除
    pub fn is_terminal(&self, terminal_states: &[String]) -> bool {
        terminal_states.iter().any(|s| s == self.as_str())
    }
}

impl From<String> for BidState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Controlling" => BidState::Controlling,
            "Active" => BidState::Active,
            "Accepted" => BidState::Accepted,
            "Spent" => BidState::Spent,
            "Expired" => BidState::Expired,
            _ => BidState::Other(s),
        }
    }
}

impl From<BidState> for String {
    fn from(b: BidState) -> Self {
        b.as_str().to_string()
    }
}

/// One row of the chainquery claim batch query / 链查询批量查询的一行
#[derive(Debug, Clone, Default, sqlx::FromRow)]
pub struct ClaimRow {
    pub id: u64,
    pub name: String,
    pub channel: Option<String>,
    pub channel_claim_id: Option<String>,
    pub bid_state: String,
    pub effective_amount: u64,
    pub transaction_time: Option<i64>,
    pub certificate_amount: u64,
    pub claim_id: String,
    pub value: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub release_time: Option<i64>,
    pub content_type: Option<String>,
    pub cert_valid: bool,
    pub claim_type: Option<String>,
    pub frame_width: Option<u64>,
    pub frame_height: Option<u64>,
    pub duration: Option<u64>,
    pub nsfw: bool,
    pub thumbnail_url: Option<String>,
    pub fee: Option<f64>,
    pub tags: Option<String>,
}

/// The document stored in the claims index / 存入索引的文档
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: u64,
    pub name: String,
    pub stripped_name: String,
    #[serde(rename = "claimId")]
    pub claim_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_claim_id: Option<String>,
    pub bid_state: BidState,
    pub effective_amount: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_time: Option<DateTime<Utc>>,
    pub certificate_amount: u64,
    /// Opaque source metadata, stored and returned unchanged / 不透明元数据
    pub value: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub cert_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_width: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    pub nsfw: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_cnt: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_cnt: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
}

impl TryFrom<ClaimRow> for Claim {
    type Error = anyhow::Error;

    /// Transform a source row into an index document / 将源行转换为索引文档
    ///
    /// Rows without a value payload cannot be indexed and are rejected;
    /// the caller logs and skips them without failing the batch.
    fn try_from(row: ClaimRow) -> Result<Self> {
        let raw_value = row
            .value
            .ok_or_else(|| anyhow!("claim {} has no value payload", row.claim_id))?;
        let value: serde_json::Value = serde_json::from_str(&raw_value)
            .with_context(|| format!("could not parse value json for claim {}", row.claim_id))?;

        let transaction_time = row
            .transaction_time
            .and_then(|t| Utc.timestamp_opt(t, 0).single());
        // Claims without an explicit release time sort by their transaction time
        let release_time = row
            .release_time
            .and_then(|t| Utc.timestamp_opt(t, 0).single())
            .or(transaction_time);

        let tags = row
            .tags
            .as_deref()
            .map(crate::utils::split_csv)
            .unwrap_or_default();

        Ok(Claim {
            stripped_name: stripped_name(&row.name),
            id: row.id,
            name: row.name,
            claim_id: row.claim_id,
            channel: row.channel,
            channel_claim_id: row.channel_claim_id,
            bid_state: BidState::from(row.bid_state),
            effective_amount: row.effective_amount,
            transaction_time,
            certificate_amount: row.certificate_amount,
            value,
            title: row.title,
            description: row.description,
            release_time,
            content_type: row.content_type,
            cert_valid: row.cert_valid,
            claim_type: row.claim_type,
            frame_width: row.frame_width,
            frame_height: row.frame_height,
            duration: row.duration,
            nsfw: row.nsfw,
            view_cnt: None,
            sub_cnt: None,
            thumbnail_url: row.thumbnail_url,
            fee: row.fee,
            tags,
        })
    }
}

impl Claim {
    /// Bulk upsert intent for this claim / 该声明的批量写入意图
    pub fn index_op(&self) -> Result<BulkOperation> {
        Ok(BulkOperation::Index {
            id: self.claim_id.clone(),
            doc: serde_json::to_value(self)?,
        })
    }

    /// Bulk delete intent keyed by claim id / 按claim id删除
    pub fn delete_op(claim_id: &str) -> BulkOperation {
        BulkOperation::Delete {
            id: claim_id.to_string(),
        }
    }
}

/// Normalized name used for channel lookups / 用于匹配的规范化名称
///
/// Strips separators and articles so that "The-Cool_Channel" and
/// "CoolChannel" land on the same token.
pub fn stripped_name(name: &str) -> String {
    name.replace('-', "")
        .replace('_', "")
        .replace('&', "")
        .replace("The", "")
        .replace("the", "")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> ClaimRow {
        ClaimRow {
            id: 10,
            name: "cats".to_string(),
            claim_id: "abc".to_string(),
            bid_state: "Controlling".to_string(),
            effective_amount: 500,
            certificate_amount: 100,
            transaction_time: Some(1_500_000_000),
            value: Some(r#"{"stream":{"metadata":{"title":"cats"}}}"#.to_string()),
            tags: Some("animals,funny".to_string()),
            ..ClaimRow::default()
        }
    }

    #[test]
    fn test_transform_basic() {
        let claim = Claim::try_from(sample_row()).unwrap();
        assert_eq!(claim.claim_id, "abc");
        assert_eq!(claim.bid_state, BidState::Controlling);
        assert_eq!(claim.tags, vec!["animals", "funny"]);
        assert_eq!(claim.value["stream"]["metadata"]["title"], "cats");
    }

    #[test]
    fn test_transform_requires_value() {
        let mut row = sample_row();
        row.value = None;
        assert!(Claim::try_from(row).is_err());

        let mut row = sample_row();
        row.value = Some("not json".to_string());
        assert!(Claim::try_from(row).is_err());
    }

    #[test]
    fn test_release_time_falls_back_to_transaction_time() {
        let row = sample_row();
        let claim = Claim::try_from(row).unwrap();
        assert_eq!(claim.release_time, claim.transaction_time);

        let mut row = sample_row();
        row.release_time = Some(1_600_000_000);
        let claim = Claim::try_from(row).unwrap();
        assert_eq!(
            claim.release_time,
            Utc.timestamp_opt(1_600_000_000, 0).single()
        );
    }

    #[test]
    fn test_bid_state_terminal_policy() {
        let terminal = vec!["Spent".to_string(), "Expired".to_string()];
        assert!(BidState::from("Spent".to_string()).is_terminal(&terminal));
        assert!(BidState::from("Expired".to_string()).is_terminal(&terminal));
        assert!(!BidState::from("Controlling".to_string()).is_terminal(&terminal));
        assert!(!BidState::from("weird".to_string()).is_terminal(&terminal));
    }

    #[test]
    fn test_bid_state_serde_round_trip() {
        let s: String = BidState::from("Controlling".to_string()).into();
        assert_eq!(s, "Controlling");
        let s: String = BidState::from("something-new".to_string()).into();
        assert_eq!(s, "something-new");
    }

    #[test]
    fn test_stripped_name() {
        assert_eq!(stripped_name("The-Cool_Channel"), "CoolChannel");
        assert_eq!(stripped_name("cats&dogs"), "catsdogs");
        assert_eq!(stripped_name("funny cats"), "funny cats");
    }
}
