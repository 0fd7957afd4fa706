//! Listen path helpers: wildcard detection and `{name}` parameter discovery.
use once_cell::sync::Lazy;
use regex::Regex;

static WILDCARD_RULE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/\*(.+)?").expect("wildcard rule is a valid regex"));

static PARAM_RULE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^/{}]+)\}").expect("param rule is a valid regex"));

/// Detects and strips the wildcard suffix (`/*`, optionally followed by more
/// segments) of a listen path.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenPathMatcher;

impl ListenPathMatcher {
    pub fn new() -> Self {
        Self
    }

    /// True if the listen path carries a wildcard suffix.
    pub fn matches(&self, listen_path: &str) -> bool {
        WILDCARD_RULE.is_match(listen_path)
    }

    /// The literal prefix in front of the wildcard; paths without a wildcard
    /// are returned unchanged.
    pub fn extract(&self, listen_path: &str) -> String {
        WILDCARD_RULE.replace_all(listen_path, "").into_owned()
    }
}

/// Finds `{name}` placeholders in a path template.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParamNameExtractor;

impl ParamNameExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Placeholder names in left-to-right order.
    pub fn extract(&self, path: &str) -> Vec<String> {
        PARAM_RULE
            .captures_iter(path)
            .map(|caps| caps[1].to_string())
            .collect()
    }
}
