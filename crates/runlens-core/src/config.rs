//! Projection tunables, loadable from TOML.
//!
//! Every field has a default so a config file only needs the keys it changes:
//!
//! ```toml
//! detail_max_chars = 80
//! intervention_prefixes = ["[HUMAN INTERVENTION]"]
//!
//! [action_labels]
//! tap = "Tap"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Built-in raw action code → label table. Config entries override these.
const BUILTIN_ACTION_LABELS: &[(&str, &str)] = &[
    ("click", "Click"),
    ("left_click", "Click"),
    ("double_click", "Double click"),
    ("right_click", "Right click"),
    ("mouse_move", "Move mouse"),
    ("hover", "Hover"),
    ("drag", "Drag"),
    ("left_click_drag", "Drag"),
    ("type", "Type text"),
    ("input_text", "Type text"),
    ("key", "Press key"),
    ("press", "Press key"),
    ("scroll", "Scroll"),
    ("scroll_up", "Scroll up"),
    ("scroll_down", "Scroll down"),
    ("navigate", "Navigate"),
    ("goto", "Navigate"),
    ("go_to_url", "Navigate"),
    ("go_back", "Go back"),
    ("screenshot", "Take screenshot"),
    ("wait", "Wait"),
    ("select", "Select option"),
    ("select_option", "Select option"),
    ("extract", "Extract content"),
    ("extract_content", "Extract content"),
    ("assert", "Verify"),
    ("verify", "Verify"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    /// Extra or overriding raw action code → human label entries.
    pub action_labels: BTreeMap<String, String>,
    /// Prefixes stripped from intervention messages (matched case-insensitively).
    pub intervention_prefixes: Vec<String>,
    /// Message used when an intervention step carries no narration.
    pub default_intervention_message: String,
    /// Normalized tool details are truncated to this many characters.
    pub detail_max_chars: usize,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            action_labels: BTreeMap::new(),
            intervention_prefixes: vec![
                "[HUMAN INTERVENTION]".to_owned(),
                "[INTERVENTION]".to_owned(),
            ],
            default_intervention_message: "The agent is waiting for human assistance.".to_owned(),
            detail_max_chars: 120,
        }
    }
}

impl ProjectionConfig {
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Map a raw action code to its display label.
    ///
    /// Lookup is case-insensitive; unknown codes pass through verbatim.
    pub fn action_label(&self, raw: &str) -> String {
        let code = raw.trim();
        let lowered = code.to_ascii_lowercase();
        if let Some(label) = self.action_labels.get(&lowered) {
            return label.clone();
        }
        BUILTIN_ACTION_LABELS
            .iter()
            .find(|(k, _)| *k == lowered)
            .map(|(_, v)| (*v).to_owned())
            .unwrap_or_else(|| code.to_owned())
    }

    /// Strip the first matching intervention prefix and surrounding whitespace.
    pub fn strip_intervention_prefix<'a>(&self, message: &'a str) -> &'a str {
        let trimmed = message.trim();
        for prefix in &self.intervention_prefixes {
            if let Some(head) = trimmed.get(..prefix.len())
                && head.eq_ignore_ascii_case(prefix)
            {
                return trimmed[prefix.len()..].trim_start_matches([':', ' ', '-']).trim();
            }
        }
        trimmed
    }
}
