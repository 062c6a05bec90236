//! Relevance scoring clauses / 相关性评分子句
//!
//! Economic weight, engagement counters, presentation boosts and
//! recency decay. All clauses are summed by the surrounding
//! `function_score` query, so each one contributes independently.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

/// Flat boost for the winning claim of a name / 胜出声明的固定加权
const CONTROLLING_BOOST: f64 = 50.0;

/// Flat boost for claims that carry a thumbnail / 有缩略图的固定加权
const THUMBNAIL_BOOST: f64 = 4.0;

/// Economic weight of the claim itself. A missing amount scores as 1 so
/// the logarithm stays at zero instead of going negative.
pub fn claim_weight() -> Value {
    json!({
        "function_score": {
            "field_value_factor": {
                "field": "effective_amount",
                "modifier": "log1p",
                "missing": 1
            }
        }
    })
}

/// Economic weight of the publishing channel / 发布频道的经济权重
pub fn channel_weight() -> Value {
    json!({
        "function_score": {
            "field_value_factor": {
                "field": "certificate_amount",
                "modifier": "log1p",
                "missing": 1
            }
        }
    })
}

/// View counter weight, neutral when the counter was never synced
pub fn view_count_weight() -> Value {
    json!({
        "function_score": {
            "field_value_factor": {
                "field": "view_cnt",
                "modifier": "log1p",
                "missing": 0
            }
        }
    })
}

/// Subscriber counter weight / 订阅数权重
pub fn sub_count_weight() -> Value {
    json!({
        "function_score": {
            "field_value_factor": {
                "field": "sub_cnt",
                "modifier": "log1p",
                "missing": 0
            }
        }
    })
}

/// Boost for claims currently controlling their name / 当前控制名称的加权
pub fn controlling_boost() -> Value {
    json!({
        "constant_score": {
            "filter": { "match": { "bid_state": "Controlling" } },
            "boost": CONTROLLING_BOOST
        }
    })
}

/// Boost for claims with a thumbnail / 有缩略图的加权
pub fn thumbnail_boost() -> Value {
    json!({
        "constant_score": {
            "filter": { "exists": { "field": "thumbnail_url" } },
            "boost": THUMBNAIL_BOOST
        }
    })
}

/// All additive scoring clauses, in a fixed order / 所有加性评分子句
pub fn should_clauses() -> Vec<Value> {
    vec![
        claim_weight(),
        channel_weight(),
        view_count_weight(),
        sub_count_weight(),
        controlling_boost(),
        thumbnail_boost(),
    ]
}

/// Four recency decay curves over `release_time`, anchored at `now`.
///
/// The first week decays fast but with a small weight, day 30 and day 90
/// each contribute another small step, and past the first year a heavy
/// slow curve takes over. Summed together they yield a freshness score
/// that favors recent uploads without burying the archive.
pub fn decay_functions(now: DateTime<Utc>) -> Vec<Value> {
    let origin = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    vec![
        json!({
            "gauss": {
                "release_time": {
                    "origin": origin,
                    "scale": "1d",
                    "decay": 0.1
                }
            },
            "weight": 0.2
        }),
        json!({
            "gauss": {
                "release_time": {
                    "origin": origin,
                    "offset": "30d",
                    "scale": "1d",
                    "decay": 0.1
                }
            },
            "weight": 0.2
        }),
        json!({
            "gauss": {
                "release_time": {
                    "origin": origin,
                    "offset": "90d",
                    "scale": "30d",
                    "decay": 0.5
                }
            },
            "weight": 0.2
        }),
        json!({
            "gauss": {
                "release_time": {
                    "origin": origin,
                    "offset": "365d",
                    "scale": "30d",
                    "decay": 0.1
                }
            },
            "weight": 1.0
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_missing_defaults_differ() {
        // Economic fields default to 1, counters to 0
        assert_eq!(
            claim_weight()["function_score"]["field_value_factor"]["missing"],
            1
        );
        assert_eq!(
            view_count_weight()["function_score"]["field_value_factor"]["missing"],
            0
        );
    }

    #[test]
    fn test_controlling_boost_shape() {
        let clause = controlling_boost();
        assert_eq!(
            clause["constant_score"]["filter"]["match"]["bid_state"],
            "Controlling"
        );
        assert_eq!(clause["constant_score"]["boost"], 50.0);
    }

    #[test]
    fn test_decay_functions_are_pure() {
        let now = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(decay_functions(now), decay_functions(now));
        assert_eq!(decay_functions(now).len(), 4);
    }

    #[test]
    fn test_decay_origin_is_anchor() {
        let now = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        let functions = decay_functions(now);
        for f in &functions {
            assert_eq!(f["gauss"]["release_time"]["origin"], "2023-06-01T12:00:00Z");
        }
    }
}
