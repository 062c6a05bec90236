//! Claims index schema / 声明索引结构

use serde_json::{json, Value};

/// Name of the claims index / 声明索引名
pub const CLAIMS: &str = "claims";

/// Mapping applied when the claims index does not exist on startup.
///
/// `value` stays a nested blob: the engine indexes inside it for
/// autocomplete but the service never depends on its shape.
pub fn claims_mapping() -> Value {
    json!({
        "settings": {
            "number_of_shards": 1
        },
        "mappings": {
            "properties": {
                "value": { "type": "nested" },
                "suggest_name": { "type": "completion" },
                "suggest_desc": { "type": "completion" },
                "name": { "type": "text" },
                "stripped_name": { "type": "text" },
                "claimId": { "type": "keyword" },
                "channel": { "type": "text" },
                "channel_claim_id": { "type": "keyword" },
                "bid_state": { "type": "keyword" },
                "claim_type": { "type": "keyword" },
                "title": { "type": "text" },
                "description": { "type": "text" },
                "content_type": {
                    "type": "text",
                    "fields": { "keyword": { "type": "keyword", "ignore_above": 256 } }
                },
                "tags": { "type": "keyword" },
                "thumbnail_url": { "type": "keyword" },
                "effective_amount": { "type": "long" },
                "certificate_amount": { "type": "long" },
                "view_cnt": { "type": "long" },
                "sub_cnt": { "type": "long" },
                "frame_width": { "type": "long" },
                "frame_height": { "type": "long" },
                "duration": { "type": "long" },
                "fee": { "type": "double" },
                "nsfw": { "type": "boolean" },
                "cert_valid": { "type": "boolean" },
                "transaction_time": { "type": "date", "format": "epoch_second||date_optional_time" },
                "release_time": { "type": "date", "format": "epoch_second||date_optional_time" }
            }
        }
    })
}
