//! Small shared helpers / 通用小工具

const MAX_TERM_CHARS: usize = 1000;

/// Cap a raw search term to a sane length, on a char boundary / 截断过长的搜索词
pub fn truncate_term(s: &str) -> String {
    if s.chars().count() <= MAX_TERM_CHARS {
        return s.to_string();
    }
    s.chars().take(MAX_TERM_CHARS).collect()
}

/// Split a comma-separated parameter into trimmed, non-empty tokens / 拆分逗号分隔参数
pub fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Number of whitespace-separated terms in a query / 查询词数量
pub fn term_count(s: &str) -> usize {
    s.split_whitespace().count()
}
