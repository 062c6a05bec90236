//! Search handlers / 搜索处理器

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{OriginalUri, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use searchlight_backend::es::{index, Hit};
use searchlight_backend::search::{query, AutoCompleteRequest, SearchRequest};
use searchlight_backend::utils;

use crate::api::ApiResponse;
use crate::state::AppState;

/// Fields added to the projection when the caller asks to resolve
/// claims for display / 解析展示时附加的字段
const RESOLVE_FIELDS: &[&str] = &[
    "channel",
    "channel_claim_id",
    "title",
    "thumbnail_url",
    "release_time",
    "fee",
    "nsfw",
    "duration",
];

fn bad_request(message: String) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn engine_error(e: impl std::fmt::Display) -> (StatusCode, Json<Value>) {
    tracing::error!("index engine request failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "search backend unavailable" })),
    )
}

/// Projection for one request. The opaque value payload is always
/// excluded; callers only ever see indexed fields.
fn source_projection(req: &SearchRequest) -> Value {
    if req.source {
        return json!({ "excludes": ["value"] });
    }
    let mut includes = vec!["name".to_string(), "claimId".to_string()];
    if let Some(include) = &req.include {
        for field in utils::split_csv(include) {
            if !includes.contains(&field) {
                includes.push(field);
            }
        }
    }
    if req.resolve {
        for field in RESOLVE_FIELDS {
            if !includes.iter().any(|seen| seen.as_str() == *field) {
                includes.push(field.to_string());
            }
        }
    }
    json!({ "includes": includes, "excludes": ["value"] })
}

/// Sort clause from a csv of fields, `^` prefix flips to descending
fn sort_clause(raw: &str) -> Value {
    let clauses: Vec<Value> = raw
        .split(',')
        .filter(|field| !field.is_empty())
        .map(|field| match field.strip_prefix('^') {
            Some(field) => json!({ field: { "order": "desc" } }),
            None => json!({ field: { "order": "asc" } }),
        })
        .collect();
    json!(clauses)
}

/// GET /search / 搜索接口
pub async fn search(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    Query(mut req): Query<SearchRequest>,
) -> Result<Response, (StatusCode, Json<Value>)> {
    req.validate().map_err(bad_request)?;
    req.prepare();
    state.total_searches.fetch_add(1, Ordering::Relaxed);
    tracing::debug!(
        "serving {} search for {:?}",
        req.search_type.as_str(),
        req.s
    );

    let cache_key = uri.to_string();
    if !req.debug {
        if let Some(cached) = state.search_cache.get(&cache_key) {
            return Ok(Json(ApiResponse::success((*cached).clone())).into_response());
        }
    }

    let mut body = json!({
        "query": query::compile(&req, Utc::now()),
        "size": req.size.unwrap_or(10),
        "from": req.from.unwrap_or(0),
        "_source": source_projection(&req),
    });
    if let Some(sort_by) = &req.sort_by {
        body["sort"] = sort_clause(sort_by);
    }

    if req.debug {
        // Pass the engine response through untouched, with explanations
        body["explain"] = json!(true);
        let raw = state
            .es
            .search_raw(index::CLAIMS, &body)
            .await
            .map_err(engine_error)?;
        return Ok(Json(raw).into_response());
    }

    let response = state
        .es
        .search(index::CLAIMS, &body)
        .await
        .map_err(engine_error)?;
    let results: Vec<Value> = response
        .hits
        .hits
        .into_iter()
        .filter_map(|hit| hit.source)
        .collect();
    let results = Arc::new(Value::Array(results));
    state.search_cache.put(cache_key, results.clone());
    Ok(Json(ApiResponse::success((*results).clone())).into_response())
}

/// Phrase-prefix query over names, titles and the metadata inside the
/// opaque value payload / 前缀短语查询
fn autocomplete_query(req: &AutoCompleteRequest) -> Value {
    let s = query::escape_autocomplete(&req.s);
    let nested = json!({
        "nested": {
            "path": "value",
            "query": {
                "multi_match": {
                    "query": s,
                    "type": "phrase_prefix",
                    "slop": 5,
                    "max_expansions": 50,
                    "fields": [
                        "value.stream.metadata.author^3",
                        "value.stream.metadata.title^5",
                        "value.stream.metadata.description^2"
                    ]
                }
            }
        }
    });
    let names = json!({
        "multi_match": {
            "query": s,
            "type": "phrase_prefix",
            "slop": 5,
            "max_expansions": 50,
            "fields": ["name^4"]
        }
    });
    let mut compiled = json!({ "bool": { "should": [nested, names] } });
    if let Some(nsfw) = req.nsfw {
        compiled["bool"]["must"] = json!([{ "match": { "nsfw": nsfw } }]);
    }
    compiled
}

/// Distinct suggestion names in first-seen (relevance) order
fn distinct_names(hits: Vec<Hit>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for hit in hits {
        if let Some(name) = hit
            .source
            .as_ref()
            .and_then(|source| source["name"].as_str())
        {
            if !names.iter().any(|seen| seen == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// GET /autocomplete / 自动补全接口
pub async fn autocomplete(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    Query(req): Query<AutoCompleteRequest>,
) -> Result<Response, (StatusCode, Json<Value>)> {
    req.validate().map_err(bad_request)?;
    let debug = req.debug.unwrap_or(false);

    let cache_key = uri.to_string();
    if !debug {
        if let Some(cached) = state.search_cache.get(&cache_key) {
            return Ok(Json(ApiResponse::success((*cached).clone())).into_response());
        }
    }

    let mut body = json!({
        "query": autocomplete_query(&req),
        "size": req.size.unwrap_or(10),
        "from": req.from.unwrap_or(0),
    });
    if !req.source.unwrap_or(false) {
        body["_source"] = json!({ "includes": ["name", "claimId"], "excludes": ["value"] });
    } else {
        body["_source"] = json!({ "excludes": ["value"] });
    }

    if debug {
        body["explain"] = json!(true);
        let raw = state
            .es
            .search_raw(index::CLAIMS, &body)
            .await
            .map_err(engine_error)?;
        return Ok(Json(raw).into_response());
    }

    let response = state
        .es
        .search(index::CLAIMS, &body)
        .await
        .map_err(engine_error)?;
    let results = Arc::new(json!(distinct_names(response.hits.hits)));
    state.search_cache.put(cache_key, results.clone());
    Ok(Json(ApiResponse::success((*results).clone())).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_projection_defaults() {
        let req = SearchRequest {
            s: "cats".to_string(),
            ..SearchRequest::default()
        };
        let projection = source_projection(&req);
        assert_eq!(projection["includes"], json!(["name", "claimId"]));
        assert_eq!(projection["excludes"], json!(["value"]));
    }

    #[test]
    fn test_source_projection_resolve_and_include() {
        let req = SearchRequest {
            s: "cats".to_string(),
            include: Some("effective_amount".to_string()),
            resolve: true,
            ..SearchRequest::default()
        };
        let includes = source_projection(&req)["includes"].clone();
        let includes: Vec<&str> = includes
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(includes.contains(&"effective_amount"));
        assert!(includes.contains(&"thumbnail_url"));
    }

    #[test]
    fn test_source_projection_deduplicates() {
        let req = SearchRequest {
            s: "cats".to_string(),
            include: Some("name,title,title".to_string()),
            resolve: true,
            ..SearchRequest::default()
        };
        let includes = source_projection(&req)["includes"].clone();
        let includes: Vec<&str> = includes
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        // `name` from the defaults and `title` from both the include
        // list and the resolve set appear once each
        assert_eq!(includes.iter().filter(|f| **f == "name").count(), 1);
        assert_eq!(includes.iter().filter(|f| **f == "title").count(), 1);
    }

    #[test]
    fn test_source_flag_keeps_value_hidden() {
        let req = SearchRequest {
            s: "cats".to_string(),
            source: true,
            ..SearchRequest::default()
        };
        let projection = source_projection(&req);
        assert!(projection.get("includes").is_none());
        assert_eq!(projection["excludes"], json!(["value"]));
    }

    #[test]
    fn test_sort_clause_direction() {
        let sort = sort_clause("^release_time,name");
        assert_eq!(sort[0]["release_time"]["order"], "desc");
        assert_eq!(sort[1]["name"]["order"], "asc");
    }

    #[test]
    fn test_distinct_names_keep_first_seen_order() {
        let hit = |name: &str| Hit {
            id: name.to_string(),
            source: Some(json!({ "name": name })),
        };
        let hits = vec![hit("cats"), hit("dogs"), hit("cats"), hit("birds")];
        assert_eq!(distinct_names(hits), vec!["cats", "dogs", "birds"]);
    }

    #[test]
    fn test_autocomplete_query_nsfw_gate() {
        let req = AutoCompleteRequest {
            s: "cat".to_string(),
            nsfw: Some(false),
            ..AutoCompleteRequest::default()
        };
        let compiled = autocomplete_query(&req);
        assert_eq!(compiled["bool"]["must"][0]["match"]["nsfw"], false);

        let open = AutoCompleteRequest {
            s: "cat".to_string(),
            ..AutoCompleteRequest::default()
        };
        assert!(autocomplete_query(&open)["bool"].get("must").is_none());
    }
}
