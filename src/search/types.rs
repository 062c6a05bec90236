//! Request types and validation / 请求类型与校验

use serde::Deserialize;

use crate::search::special;
use crate::utils;

const POSSIBLE_MEDIA_TYPES: &[&str] = &["audio", "video", "text", "application", "image", "cad"];

/// Kind of search being served, used for logging / 搜索类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchType {
    #[default]
    General,
    RelatedContent,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::General => "general",
            SearchType::RelatedContent => "related_content",
        }
    }
}

/// A full-text search request. Immutable once validated and prepared;
/// lives for the duration of one request. / 搜索请求
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    /// Free text term / 搜索词
    #[serde(default)]
    pub s: String,
    pub size: Option<usize>,
    pub from: Option<usize>,
    pub channel: Option<String>,
    pub channel_id: Option<String>,
    pub related_to: Option<String>,
    #[serde(alias = "sortBy")]
    pub sort_by: Option<String>,
    pub include: Option<String>,
    #[serde(alias = "contentType")]
    pub content_type: Option<String>,
    #[serde(alias = "mediaType")]
    pub media_type: Option<String>,
    #[serde(alias = "claimType")]
    pub claim_type: Option<String>,
    pub nsfw: Option<bool>,
    pub free_only: Option<bool>,
    #[serde(default)]
    pub resolve: bool,
    // Debug params / 调试参数
    pub claim_id: Option<String>,
    #[serde(default)]
    pub source: bool,
    #[serde(default)]
    pub debug: bool,
    // Derived fields, filled by prepare() / 派生字段
    #[serde(skip)]
    pub search_type: SearchType,
    #[serde(skip)]
    pub terms: usize,
}

impl SearchRequest {
    /// Validate request bounds, halting on the first violation / 校验请求
    pub fn validate(&self) -> Result<(), String> {
        let chars = self.s.chars().count();
        if !(3..=99999).contains(&chars) {
            return Err("s: the length must be between 3 and 99999".to_string());
        }
        if let Some(size) = self.size {
            if size > 10000 {
                return Err("size: must be no greater than 10000".to_string());
            }
        }
        if let Some(from) = self.from {
            if from > 9999 {
                return Err("from: must be no greater than 9999".to_string());
            }
        }
        if let Some(media_type) = &self.media_type {
            for token in media_type.split(',') {
                if !token.is_empty() && !POSSIBLE_MEDIA_TYPES.contains(&token) {
                    return Err(format!(
                        "mediaType: can only be {}",
                        POSSIBLE_MEDIA_TYPES.join(",")
                    ));
                }
            }
        }
        Ok(())
    }

    /// Normalize the term and resolve derived fields / 规范化并填充派生字段
    pub fn prepare(&mut self) {
        self.s = utils::truncate_term(&self.s);
        self.s = special::rewrite(&self.s);
        self.terms = utils::term_count(&self.s);
        self.search_type = if self.related_to.is_some() {
            SearchType::RelatedContent
        } else {
            SearchType::General
        };
    }

    /// Whether the raw term explicitly targets a channel / 是否显式搜索频道
    pub fn is_channel_search(&self) -> bool {
        self.s.starts_with('@')
    }
}

/// An autocomplete request / 自动补全请求
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AutoCompleteRequest {
    #[serde(default)]
    pub s: String,
    pub size: Option<usize>,
    pub from: Option<usize>,
    pub nsfw: Option<bool>,
    // Debug params / 调试参数
    pub source: Option<bool>,
    pub debug: Option<bool>,
}

impl AutoCompleteRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.s.is_empty() {
            return Err("s: cannot be blank".to_string());
        }
        if let Some(size) = self.size {
            if size > 10000 {
                return Err("size: must be no greater than 10000".to_string());
            }
        }
        if let Some(from) = self.from {
            if from > 9999 {
                return Err("from: must be no greater than 9999".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_validation_bounds() {
        let mut req = SearchRequest {
            s: "cats".to_string(),
            ..SearchRequest::default()
        };
        assert!(req.validate().is_ok());

        req.s = "ab".to_string();
        assert!(req.validate().is_err());

        req.s = "cats".to_string();
        req.size = Some(10001);
        assert!(req.validate().is_err());

        req.size = Some(10000);
        req.from = Some(10000);
        assert!(req.validate().is_err());

        req.from = Some(9999);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_media_type_vocabulary() {
        let mut req = SearchRequest {
            s: "cats".to_string(),
            media_type: Some("video,audio".to_string()),
            ..SearchRequest::default()
        };
        assert!(req.validate().is_ok());

        req.media_type = Some("video,foo".to_string());
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_prepare_derives_fields() {
        let mut req = SearchRequest {
            s: "big buck bunny".to_string(),
            ..SearchRequest::default()
        };
        req.prepare();
        assert_eq!(req.terms, 3);
        assert_eq!(req.search_type, SearchType::General);

        let mut req = SearchRequest {
            s: "cats".to_string(),
            related_to: Some("abc".to_string()),
            ..SearchRequest::default()
        };
        req.prepare();
        assert_eq!(req.search_type, SearchType::RelatedContent);
        assert_eq!(req.search_type.as_str(), "related_content");
    }

    #[test]
    fn test_autocomplete_validation() {
        let req = AutoCompleteRequest {
            s: "c".to_string(),
            ..AutoCompleteRequest::default()
        };
        assert!(req.validate().is_ok());

        let req = AutoCompleteRequest::default();
        assert!(req.validate().is_err());
    }
}
