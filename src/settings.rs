use serde::{Deserialize, Serialize};

pub const DEFAULT_LABEL_MAX_CHARS: usize = 20;
pub const DEFAULT_ELLIPSIS: &str = "...";

/// Truncation rule for free-text labels (message content, string outputs).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelSettings {
    pub max_chars: usize,
    pub ellipsis: String,
}

impl Default for LabelSettings {
    fn default() -> Self {
        Self { max_chars: DEFAULT_LABEL_MAX_CHARS, ellipsis: DEFAULT_ELLIPSIS.into() }
    }
}

impl LabelSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_chars = std::env::var("CHAT_REFS_LABEL_MAX_CHARS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_chars);
        let ellipsis = std::env::var("CHAT_REFS_LABEL_ELLIPSIS").unwrap_or(defaults.ellipsis);
        Self { max_chars, ellipsis }
    }

    /// First `max_chars` characters, plus the ellipsis marker only when something was cut.
    pub fn truncate(&self, text: &str) -> String {
        match text.char_indices().nth(self.max_chars) {
            Some((cut, _)) => format!("{}{}", &text[..cut], self.ellipsis),
            None => text.to_string(),
        }
    }
}

/// Per-request overrides, e.g. a narrow sidebar asking for shorter labels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LabelOverrides {
    pub max_chars: Option<usize>,
    pub ellipsis: Option<String>,
}

pub fn resolve_label_settings(global: &LabelSettings, request: Option<&LabelOverrides>) -> LabelSettings {
    LabelSettings {
        max_chars: request
            .and_then(|r| r.max_chars)
            .unwrap_or(global.max_chars),
        ellipsis: request
            .and_then(|r| r.ellipsis.clone())
            .unwrap_or_else(|| global.ellipsis.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_counts_characters_not_bytes() {
        let s = LabelSettings { max_chars: 3, ellipsis: "…".into() };
        assert_eq!(s.truncate("héllo"), "hél…");
        assert_eq!(s.truncate("hé"), "hé");
        assert_eq!(s.truncate("abc"), "abc");
        assert_eq!(s.truncate(""), "");
    }

    #[test]
    fn request_overrides_take_precedence() {
        let global = LabelSettings { max_chars: 30, ellipsis: "..".into() };
        let request = LabelOverrides { max_chars: Some(5), ellipsis: None };
        let eff = resolve_label_settings(&global, Some(&request));
        assert_eq!(eff.max_chars, 5); // from request
        assert_eq!(eff.ellipsis, ".."); // from global
        assert_eq!(resolve_label_settings(&global, None), global);
    }
}
