//! Query compiler / 查询编译器
//!
//! General searches compile to one `function_score` query: text clauses
//! sit in a `must` bool so at least one of them has to match, the
//! scoring clauses sit in `should` and only add weight, and the filter
//! pipeline gates everything without scoring. Similarity searches rank
//! by content similarity alone, filters still attached.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::search::filters::compile_filters;
use crate::search::scoring;
use crate::search::types::{SearchRequest, SearchType};

/// Characters the engine's query string syntax reserves / 保留字符
const RESERVED: &[char] = &[
    '+', '-', '=', '>', '<', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':',
    '\\', '/',
];

/// Escape a user term for query string contexts. `&&` and `||` are
/// operators only when doubled, a single `&` or `|` passes through.
pub fn escape_reserved(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 2);
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '&' | '|' => {
                if chars.peek() == Some(&c) {
                    chars.next();
                    out.push('\\');
                    out.push(c);
                    out.push('\\');
                    out.push(c);
                } else {
                    out.push(c);
                }
            }
            c if RESERVED.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// Escape only the characters that break phrase prefix suggestions
pub fn escape_autocomplete(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 2);
    for c in s.chars() {
        if matches!(c, '/' | '[' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// The term with whitespace stripped, for handles typed with spaces
fn compressed(s: &str) -> String {
    s.split_whitespace().collect()
}

fn channel_only() -> Value {
    json!({ "match": { "claim_type": "channel" } })
}

fn stream_only() -> Value {
    json!({ "match": { "claim_type": "stream" } })
}

/// Text matching clauses, each named for the explain output / 文本匹配子句
fn text_clauses(req: &SearchRequest) -> Vec<Value> {
    let s = req.s.as_str();
    // Channel-style terms put all their weight on the name fields
    let channel_multiplier = if req.is_channel_search() { 10.0 } else { 1.0 };
    vec![
        json!({
            "more_like_this": {
                "_name": "more-like-this",
                "fields": ["name", "title", "channel"],
                "like": s,
                "unlike": "https"
            }
        }),
        json!({
            "match_phrase": {
                "name": {
                    "_name": "name-match-phrase",
                    "query": s,
                    "boost": 2.0 * channel_multiplier
                }
            }
        }),
        json!({
            "match": {
                "name": {
                    "_name": "name-match",
                    "query": s,
                    "fuzziness": "AUTO",
                    "boost": 1.0 * channel_multiplier
                }
            }
        }),
        json!({
            "bool": {
                "_name": "channel-phrase-match",
                "boost": 10.0,
                "must": [
                    channel_only(),
                    { "match_phrase": { "name": s } }
                ]
            }
        }),
        json!({
            "bool": {
                "_name": "name-match-compressed",
                "must": [
                    channel_only(),
                    {
                        "match": {
                            "name": {
                                "query": compressed(s),
                                "fuzziness": "AUTO",
                                "boost": 10.0
                            }
                        }
                    }
                ]
            }
        }),
        json!({
            "match": {
                "title": { "_name": "title-match", "query": s, "fuzziness": "AUTO", "boost": 1.0 }
            }
        }),
        json!({
            "match_phrase": {
                "title": { "_name": "title-match-phrase", "query": s, "boost": 10.0 }
            }
        }),
        json!({
            "match": {
                "description": { "_name": "description-match", "query": s, "boost": 1.0 }
            }
        }),
        json!({
            "match_phrase": {
                "description": { "_name": "description-match-phrase", "query": s, "boost": 2.0 }
            }
        }),
        json!({
            "bool": {
                "_name": "channel-match",
                "boost": 5.0,
                "must": [
                    stream_only(),
                    { "match": { "channel": s } }
                ]
            }
        }),
        json!({
            "bool": {
                "_name": "channel-match-compressed",
                "must": [
                    stream_only(),
                    { "match_phrase": { "channel": { "query": compressed(s), "boost": 5.0 } } }
                ]
            }
        }),
    ]
}

/// Seeded similarity clause for related content / 相关内容的相似子句
fn related_clause(claim_id: &str) -> Value {
    json!({
        "more_like_this": {
            "_name": "related-content",
            "like": [{ "_index": crate::es::index::CLAIMS, "_id": claim_id }],
            "boost": 2.0
        }
    })
}

/// Compile the final engine query for a prepared request.
///
/// `now` anchors the recency decay curves; passing it in keeps
/// compilation deterministic.
pub fn compile(req: &SearchRequest, now: DateTime<Utc>) -> Value {
    let filters = compile_filters(req);
    match (req.search_type, &req.related_to) {
        // Similarity mode ranks by content similarity alone: no decay
        // functions, no stake or popularity clauses
        (SearchType::RelatedContent, Some(claim_id)) => json!({
            "bool": {
                "must": [related_clause(claim_id)],
                "filter": filters
            }
        }),
        _ => json!({
            "function_score": {
                "score_mode": "sum",
                "functions": scoring::decay_functions(now),
                "query": {
                    "bool": {
                        "should": scoring::should_clauses(),
                        "must": [{ "bool": { "should": text_clauses(req) } }],
                        "filter": filters
                    }
                }
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{init_config, AppConfig};
    use chrono::TimeZone;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn setup() {
        INIT.call_once(|| {
            init_config(AppConfig::default());
        });
    }

    fn prepared(s: &str) -> SearchRequest {
        let mut req = SearchRequest {
            s: s.to_string(),
            ..SearchRequest::default()
        };
        req.prepare();
        req
    }

    #[test]
    fn test_escape_reserved() {
        assert_eq!(escape_reserved("a+b"), "a\\+b");
        assert_eq!(escape_reserved("a && b"), "a \\&\\& b");
        assert_eq!(escape_reserved("a & b"), "a & b");
        assert_eq!(escape_reserved("path/to"), "path\\/to");
        assert_eq!(escape_reserved("plain"), "plain");
    }

    #[test]
    fn test_escape_autocomplete_is_narrow() {
        assert_eq!(escape_autocomplete("a/b"), "a\\/b");
        assert_eq!(escape_autocomplete("[x]"), "\\[x\\]");
        // Reserved elsewhere but harmless in phrase prefix
        assert_eq!(escape_autocomplete("a+b:c"), "a+b:c");
    }

    #[test]
    fn test_compile_is_pure() {
        setup();
        let req = prepared("big buck bunny");
        let now = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(compile(&req, now), compile(&req, now));
    }

    #[test]
    fn test_general_query_shape() {
        setup();
        let req = prepared("big buck bunny");
        let now = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let query = compile(&req, now);
        assert_eq!(query["function_score"]["score_mode"], "sum");
        assert_eq!(
            query["function_score"]["functions"].as_array().unwrap().len(),
            4
        );
        let text = &query["function_score"]["query"]["bool"]["must"][0]["bool"]["should"];
        assert_eq!(text[0]["more_like_this"]["_name"], "more-like-this");
    }

    #[test]
    fn test_channel_handle_multiplies_name_boosts() {
        setup();
        let plain = prepared("someone");
        let handle = prepared("@someone");
        let now = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let plain_text = compile(&plain, now)["function_score"]["query"]["bool"]["must"][0]
            ["bool"]["should"]
            .clone();
        let handle_text = compile(&handle, now)["function_score"]["query"]["bool"]["must"][0]
            ["bool"]["should"]
            .clone();
        assert_eq!(plain_text[1]["match_phrase"]["name"]["boost"], 2.0);
        assert_eq!(handle_text[1]["match_phrase"]["name"]["boost"], 20.0);
        assert_eq!(plain_text[2]["match"]["name"]["boost"], 1.0);
        assert_eq!(handle_text[2]["match"]["name"]["boost"], 10.0);
    }

    #[test]
    fn test_related_mode_ranks_by_similarity_only() {
        setup();
        let mut req = prepared("cats");
        req.related_to = Some("abcdef".to_string());
        req.prepare();
        let now = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let query = compile(&req, now);
        assert!(query.get("function_score").is_none());
        let must = &query["bool"]["must"];
        assert_eq!(must[0]["more_like_this"]["like"][0]["_id"], "abcdef");
        assert_eq!(must[0]["more_like_this"]["like"][0]["_index"], "claims");
        // No decay, stake or popularity clauses ride along
        assert!(query["bool"].get("should").is_none());
        let serialized = query.to_string();
        assert!(!serialized.contains("field_value_factor"));
        assert!(!serialized.contains("constant_score"));
        assert!(!serialized.contains("gauss"));
    }

    #[test]
    fn test_filters_present_in_both_modes() {
        setup();
        let mut req = prepared("cats");
        req.nsfw = Some(false);
        let now = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let general = compile(&req, now);
        assert!(general["function_score"]["query"]["bool"]["filter"]
            .as_array()
            .map(|f| !f.is_empty())
            .unwrap_or(false));
        req.related_to = Some("abcdef".to_string());
        req.prepare();
        let related = compile(&req, now);
        assert!(related["bool"]["filter"]
            .as_array()
            .map(|f| !f.is_empty())
            .unwrap_or(false));
    }
}
