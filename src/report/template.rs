//! Prompt templates loaded from disk.

use std::path::Path;
use tracing::{debug, warn};

pub const PROMPT_FILE: &str = "prompt.md";
pub const SYSTEM_ROLE_FILE: &str = "system_role.md";

const DEFAULT_PROMPT: &str = "Using the data above, write a concise daily report for {date}. \
Summarize what was done, what is in progress and what is planned next. \
Group related work together and do not invent activity that is not in the data.";

const DEFAULT_SYSTEM_ROLE: &str =
    "You are an assistant that writes concise, structured daily productivity reports.";

/// The instruction template and the system role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplates {
    pub prompt: String,
    pub system_role: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            system_role: DEFAULT_SYSTEM_ROLE.to_string(),
        }
    }
}

impl PromptTemplates {
    /// Read both templates from `dir`. A missing or empty file falls back
    /// to the built-in text.
    pub fn load(dir: &Path) -> Self {
        let defaults = Self::default();
        Self {
            prompt: read_template(&dir.join(PROMPT_FILE)).unwrap_or(defaults.prompt),
            system_role: read_template(&dir.join(SYSTEM_ROLE_FILE))
                .unwrap_or(defaults.system_role),
        }
    }

    /// The prompt with `{date}` filled in.
    pub fn render_prompt(&self, date: &str) -> String {
        self.prompt.replace("{date}", date)
    }
}

fn read_template(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let content = strip_filepath_comment(&content).trim().to_string();
            if content.is_empty() {
                warn!("Template file is empty: {}", path.display());
                None
            } else {
                debug!("Loaded template {}", path.display());
                Some(content)
            }
        }
        Err(_) => {
            warn!("Template file not found: {}", path.display());
            None
        }
    }
}

/// Drop a leading `<!-- filepath: ... -->` line left by editors.
fn strip_filepath_comment(content: &str) -> &str {
    if content.starts_with("<!-- filepath:") {
        content.split_once('\n').map(|(_, rest)| rest).unwrap_or("")
    } else {
        content
    }
}
