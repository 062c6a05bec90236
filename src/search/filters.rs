//! Hard constraint pipeline / 硬性过滤管线
//!
//! Every clause produced here lands in the filter context of the final
//! query: matching is mandatory and contributes nothing to the score.
//! The bid-state exclusion is always appended last so no request can
//! surface claims in excluded states.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use crate::config;
use crate::search::query::escape_reserved;
use crate::search::types::SearchRequest;
use crate::utils;

static EXACT_PHRASES: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]*)""#).unwrap_or_else(|e| panic!("exact phrase regex: {}", e)));

/// Tags and flag spelling that mark mature content / 标记成人内容的标签
const NSFW_TAGS: &[&str] = &["nsfw", "porn", "mature", "xxx"];

/// Requested media category, mapped to a content type constraint.
/// Anything outside the vocabulary is remembered as unrecognized so the
/// pipeline can collapse the request to zero results instead of
/// silently widening it. / 请求的媒体类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Audio,
    Video,
    Text,
    Application,
    Image,
    Cad,
    Unrecognized,
}

impl MediaType {
    pub fn parse(token: &str) -> Self {
        match token {
            "audio" => MediaType::Audio,
            "video" => MediaType::Video,
            "text" => MediaType::Text,
            "application" => MediaType::Application,
            "image" => MediaType::Image,
            "cad" => MediaType::Cad,
            _ => MediaType::Unrecognized,
        }
    }

    /// Constraint this category places on `content_type` / 对应的约束
    pub fn constraint(&self) -> Option<Value> {
        let prefix = match self {
            MediaType::Audio => "audio/",
            MediaType::Video => "video/",
            MediaType::Text => "text/",
            MediaType::Application => "application/",
            MediaType::Image => "image/",
            // CAD has no MIME family of its own
            MediaType::Cad => {
                return Some(json!({
                    "terms": { "content_type.keyword": ["SKP", "simplify3d_stl"] }
                }))
            }
            MediaType::Unrecognized => return None,
        };
        Some(json!({ "prefix": { "content_type.keyword": prefix } }))
    }
}

/// Requested claim category / 请求的声明类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimTypeFilter {
    Channel,
    Stream,
    Unrecognized,
}

impl ClaimTypeFilter {
    pub fn parse(token: &str) -> Self {
        match token {
            "channel" => ClaimTypeFilter::Channel,
            "file" => ClaimTypeFilter::Stream,
            _ => ClaimTypeFilter::Unrecognized,
        }
    }

    pub fn constraint(&self) -> Option<Value> {
        match self {
            ClaimTypeFilter::Channel => Some(json!({ "match": { "claim_type": "channel" } })),
            ClaimTypeFilter::Stream => Some(json!({ "match": { "claim_type": "stream" } })),
            ClaimTypeFilter::Unrecognized => None,
        }
    }
}

/// Quoted phrases in the term must phrase-match one of the text fields
fn exact_phrase_filters(s: &str) -> Vec<Value> {
    EXACT_PHRASES
        .captures_iter(s)
        .filter_map(|captures| captures.get(1))
        .filter(|phrase| !phrase.as_str().is_empty())
        .map(|phrase| {
            let phrase = phrase.as_str();
            json!({
                "bool": {
                    "should": [
                        { "match_phrase": { "channel": phrase } },
                        { "match_phrase": { "name": phrase } },
                        { "match_phrase": { "title": phrase } },
                        { "match_phrase": { "description": phrase } }
                    ]
                }
            })
        })
        .collect()
}

/// Mature content gate. A claim counts as mature when it carries one of
/// the marker tags or the nsfw flag. / 成人内容闸门
fn nsfw_filter(wanted: bool) -> Value {
    let mature = json!({
        "bool": {
            "should": [
                { "terms": { "tags": NSFW_TAGS } },
                { "match": { "nsfw": true } }
            ],
            "minimum_should_match": 1
        }
    });
    if wanted {
        json!({ "bool": { "must": [mature] } })
    } else {
        json!({ "bool": { "must_not": [mature] } })
    }
}

fn free_filter() -> Value {
    json!({ "range": { "fee": { "lte": 0 } } })
}

fn content_type_filter(raw: &str) -> Option<Value> {
    let types = utils::split_csv(raw);
    if types.is_empty() {
        return None;
    }
    Some(json!({ "terms": { "content_type.keyword": types } }))
}

/// Media categories widen each other; a request made of nothing but
/// unrecognized tokens matches nothing at all.
fn media_type_filter(raw: &str) -> Option<Value> {
    let requested: Vec<&str> = raw.split(',').filter(|t| !t.is_empty()).collect();
    if requested.is_empty() {
        return None;
    }
    let constraints: Vec<Value> = requested
        .iter()
        .filter_map(|token| MediaType::parse(token).constraint())
        .collect();
    if constraints.is_empty() {
        return Some(json!({ "match_none": {} }));
    }
    Some(json!({ "bool": { "should": constraints } }))
}

/// An unrecognized claim type places no constraint at all
fn claim_type_filter(raw: &str) -> Option<Value> {
    ClaimTypeFilter::parse(raw).constraint()
}

/// Excluded bid states are a service-level policy, appended after every
/// request-driven filter. / 排除的竞价状态，始终追加在最后
fn bid_state_filter() -> Value {
    let excluded: Vec<Value> = config::config()
        .search
        .excluded_bid_states
        .iter()
        .map(|state| json!({ "match": { "bid_state": state } }))
        .collect();
    json!({ "bool": { "must_not": excluded } })
}

/// Compile the full ordered filter list for one request / 编译过滤列表
pub fn compile_filters(req: &SearchRequest) -> Vec<Value> {
    let mut filters = exact_phrase_filters(&req.s);
    if let Some(nsfw) = req.nsfw {
        filters.push(nsfw_filter(nsfw));
    }
    if req.free_only.unwrap_or(false) {
        filters.push(free_filter());
    }
    if let Some(content_type) = &req.content_type {
        if let Some(filter) = content_type_filter(content_type) {
            filters.push(filter);
        }
    }
    if let Some(media_type) = &req.media_type {
        if let Some(filter) = media_type_filter(media_type) {
            filters.push(filter);
        }
    }
    if let Some(claim_type) = &req.claim_type {
        if let Some(filter) = claim_type_filter(claim_type) {
            filters.push(filter);
        }
    }
    if let Some(channel_id) = &req.channel_id {
        filters.push(json!({ "match": { "channel_claim_id": channel_id } }));
    }
    if let Some(channel) = &req.channel {
        filters.push(json!({
            "bool": {
                "must": {
                    "query_string": {
                        "query": escape_reserved(channel),
                        "fields": ["channel"]
                    }
                }
            }
        }));
    }
    if let Some(claim_id) = &req.claim_id {
        filters.push(json!({ "match": { "claimId": claim_id } }));
    }
    // Related content is only ever other streams, never channels
    if req.related_to.is_some() {
        filters.push(json!({ "match": { "claim_type": "stream" } }));
    }
    filters.push(bid_state_filter());
    filters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{init_config, AppConfig};
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn setup() {
        INIT.call_once(|| {
            init_config(AppConfig::default());
        });
    }

    #[test]
    fn test_bid_state_always_last() {
        setup();
        let req = SearchRequest {
            s: "cats".to_string(),
            nsfw: Some(false),
            ..SearchRequest::default()
        };
        let filters = compile_filters(&req);
        let last = filters.last().unwrap();
        assert_eq!(
            last["bool"]["must_not"][0]["match"]["bid_state"],
            "Expired"
        );
    }

    #[test]
    fn test_media_type_prefix_and_cad() {
        assert_eq!(
            MediaType::parse("video").constraint().unwrap()["prefix"]["content_type.keyword"],
            "video/"
        );
        let cad = MediaType::parse("cad").constraint().unwrap();
        assert_eq!(cad["terms"]["content_type.keyword"][0], "SKP");
        assert_eq!(cad["terms"]["content_type.keyword"][1], "simplify3d_stl");
    }

    #[test]
    fn test_unrecognized_media_type_matches_nothing() {
        let filter = media_type_filter("flash").unwrap();
        assert!(filter.get("match_none").is_some());
        // A recognized token alongside keeps the request alive
        let filter = media_type_filter("flash,video").unwrap();
        assert!(filter.get("bool").is_some());
    }

    #[test]
    fn test_claim_type_mapping() {
        assert_eq!(
            claim_type_filter("channel").unwrap()["match"]["claim_type"],
            "channel"
        );
        assert_eq!(
            claim_type_filter("file").unwrap()["match"]["claim_type"],
            "stream"
        );
        assert!(claim_type_filter("bogus").is_none());
    }

    #[test]
    fn test_related_requests_are_stream_only() {
        setup();
        let req = SearchRequest {
            s: "cats".to_string(),
            related_to: Some("abcdef".to_string()),
            ..SearchRequest::default()
        };
        let filters = compile_filters(&req);
        let stream_only = &filters[filters.len() - 2];
        assert_eq!(stream_only["match"]["claim_type"], "stream");
    }

    #[test]
    fn test_nsfw_tristate() {
        setup();
        let mut req = SearchRequest {
            s: "cats".to_string(),
            ..SearchRequest::default()
        };
        let neutral = compile_filters(&req).len();
        req.nsfw = Some(false);
        assert_eq!(compile_filters(&req).len(), neutral + 1);
        let excluded = nsfw_filter(false);
        assert!(excluded["bool"]["must_not"].is_array());
        let wanted = nsfw_filter(true);
        assert!(wanted["bool"]["must"].is_array());
    }

    #[test]
    fn test_exact_phrases_extracted() {
        let filters = exact_phrase_filters(r#"silly "big buck bunny" video"#);
        assert_eq!(filters.len(), 1);
        assert_eq!(
            filters[0]["bool"]["should"][1]["match_phrase"]["name"],
            "big buck bunny"
        );
    }
}
