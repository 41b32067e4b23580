//! Configuration file handling.
//!
//! Settings come from `.dayreport.toml` (or `--config`), then environment
//! variables, then CLI flags; later layers win. The resulting [`Config`] is
//! read-only for the rest of the run and passed explicitly to every client.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".dayreport.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Clockify time tracking.
    #[serde(default)]
    pub clockify: ClockifyConfig,

    /// Jira issue tracker.
    #[serde(default)]
    pub jira: JiraConfig,

    /// GitLab source control.
    #[serde(default)]
    pub gitlab: GitLabConfig,

    /// GitHub source control.
    #[serde(default)]
    pub github: GitHubConfig,

    /// Report synthesis.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Email delivery.
    #[serde(default)]
    pub smtp: SmtpConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Skip the report when no time was tracked, even if other sources
    /// have activity.
    #[serde(default = "default_true")]
    pub require_time_entries: bool,

    /// Per-request timeout for source APIs, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Report recipients.
    #[serde(default)]
    pub recipients: Vec<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            require_time_entries: true,
            request_timeout_secs: default_request_timeout(),
            recipients: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

/// Clockify settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockifyConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_clockify_url")]
    pub base_url: String,

    #[serde(default = "default_clockify_page_size")]
    pub page_size: usize,
}

impl Default for ClockifyConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_clockify_url(),
            page_size: default_clockify_page_size(),
        }
    }
}

fn default_clockify_url() -> String {
    "https://api.clockify.me/api/v1".to_string()
}

fn default_clockify_page_size() -> usize {
    50
}

impl ClockifyConfig {
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Jira settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub api_token: Option<String>,

    /// Custom field holding the date a task was closed.
    #[serde(default = "default_closed_date_field")]
    pub closed_date_field: String,

    /// Custom field holding the date work on a task started.
    #[serde(default = "default_start_date_field")]
    pub start_date_field: String,

    #[serde(default = "default_jira_page_size")]
    pub page_size: usize,

    /// Also list agile boards.
    #[serde(default = "default_true")]
    pub include_boards: bool,
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self {
            url: None,
            email: None,
            api_token: None,
            closed_date_field: default_closed_date_field(),
            start_date_field: default_start_date_field(),
            page_size: default_jira_page_size(),
            include_boards: true,
        }
    }
}

fn default_closed_date_field() -> String {
    "customfield_10100".to_string()
}

fn default_start_date_field() -> String {
    "customfield_10101".to_string()
}

fn default_jira_page_size() -> usize {
    100
}

impl JiraConfig {
    pub fn is_configured(&self) -> bool {
        self.url.is_some() || self.email.is_some() || self.api_token.is_some()
    }
}

/// GitLab settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLabConfig {
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_gitlab_url")]
    pub url: String,

    /// Restrict to these projects instead of every accessible one.
    #[serde(default)]
    pub project_ids: Vec<u64>,

    /// Keep only commits authored by the token's user.
    #[serde(default = "default_true")]
    pub filter_by_user: bool,

    /// Explicit author address; takes precedence over the user's email.
    #[serde(default)]
    pub author_email: Option<String>,

    #[serde(default = "default_gitlab_page_size")]
    pub page_size: usize,
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            token: None,
            url: default_gitlab_url(),
            project_ids: Vec::new(),
            filter_by_user: true,
            author_email: None,
            page_size: default_gitlab_page_size(),
        }
    }
}

fn default_gitlab_url() -> String {
    "https://gitlab.com".to_string()
}

fn default_gitlab_page_size() -> usize {
    100
}

impl GitLabConfig {
    pub fn is_configured(&self) -> bool {
        self.token.is_some()
    }
}

/// GitHub settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default)]
    pub token: Option<String>,

    /// Login whose repositories and project board are read.
    #[serde(default)]
    pub owner: Option<String>,

    #[serde(default = "default_github_graphql_url")]
    pub graphql_url: String,

    /// Restrict to these repositories instead of every owned one.
    #[serde(default)]
    pub repos: Vec<String>,

    /// ProjectV2 number of the task board; no board items when unset.
    #[serde(default)]
    pub project_number: Option<u64>,

    #[serde(default = "default_board_start_field")]
    pub start_date_field: String,

    #[serde(default = "default_board_end_field")]
    pub end_date_field: String,

    /// Keep only commits whose author email is the viewer's public email.
    #[serde(default)]
    pub filter_by_user: bool,

    /// Explicit author address; filters even when `filter_by_user` is off.
    #[serde(default)]
    pub author_email: Option<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            owner: None,
            graphql_url: default_github_graphql_url(),
            repos: Vec::new(),
            project_number: None,
            start_date_field: default_board_start_field(),
            end_date_field: default_board_end_field(),
            filter_by_user: false,
            author_email: None,
        }
    }
}

fn default_github_graphql_url() -> String {
    "https://api.github.com/graphql".to_string()
}

fn default_board_start_field() -> String {
    "Start date".to_string()
}

fn default_board_end_field() -> String {
    "End date".to_string()
}

impl GitHubConfig {
    pub fn is_configured(&self) -> bool {
        self.token.is_some() || self.owner.is_some()
    }
}

/// LLM settings (OpenAI-compatible Responses API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_llm_url")]
    pub base_url: String,

    /// Stored prompt id; replaces local instructions when set.
    #[serde(default)]
    pub prompt_id: Option<String>,

    /// Directory holding `prompt.md` and `system_role.md`.
    #[serde(default = "default_templates_dir")]
    pub templates_dir: String,

    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            base_url: default_llm_url(),
            prompt_id: None,
            templates_dir: default_templates_dir(),
            timeout_seconds: default_llm_timeout(),
        }
    }
}

fn default_model() -> String {
    "gpt-5.2-mini".to_string()
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_templates_dir() -> String {
    ".".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

/// SMTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_server")]
    pub server: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Defaults to `user`.
    #[serde(default)]
    pub sender: Option<String>,

    /// Implicit TLS (465) when true, STARTTLS otherwise.
    #[serde(default = "default_true")]
    pub use_ssl: bool,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: default_smtp_server(),
            port: default_smtp_port(),
            user: None,
            password: None,
            sender: None,
            use_ssl: true,
        }
    }
}

fn default_smtp_server() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    465
}

/// Parse a boolean the way the environment spells it.
fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Split a comma-separated address list, dropping blanks.
pub fn parse_recipients(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_process_env(&mut self) {
        self.apply_env(|key| std::env::var(key).ok());
    }

    /// Apply environment-style overrides from `lookup`. Empty values are
    /// treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // General
        if let Some(v) = get("REQUIRE_CLOCKIFY_ENTRIES") {
            self.general.require_time_entries = parse_flag(&v);
        }
        if let Some(v) = get("RECIPIENT_EMAILS") {
            self.general.recipients = parse_recipients(&v);
        }
        if let Some(v) = get("REQUEST_TIMEOUT_SECS").and_then(|v| v.trim().parse().ok()) {
            self.general.request_timeout_secs = v;
        }

        // Clockify
        if let Some(v) = get("CLOCKIFY_API_KEY") {
            self.clockify.api_key = Some(v);
        }
        if let Some(v) = get("CLOCKIFY_URL") {
            self.clockify.base_url = v;
        }

        // Jira
        if let Some(v) = get("JIRA_URL") {
            self.jira.url = Some(v);
        }
        if let Some(v) = get("JIRA_EMAIL") {
            self.jira.email = Some(v);
        }
        if let Some(v) = get("JIRA_API_TOKEN") {
            self.jira.api_token = Some(v);
        }
        if let Some(v) = get("JIRA_CLOSED_DATE_FIELD") {
            self.jira.closed_date_field = v;
        }
        if let Some(v) = get("JIRA_START_DATE_FIELD") {
            self.jira.start_date_field = v;
        }

        // GitLab
        if let Some(v) = get("GITLAB_TOKEN") {
            self.gitlab.token = Some(v);
        }
        if let Some(v) = get("GITLAB_URL") {
            self.gitlab.url = v;
        }

        // GitHub
        if let Some(v) = get("GH_TOKEN") {
            self.github.token = Some(v);
        }
        if let Some(v) = get("GITHUB_OWNER") {
            self.github.owner = Some(v);
        }
        if let Some(v) = get("GITHUB_PROJECT_NUMBER").and_then(|v| v.trim().parse().ok()) {
            self.github.project_number = Some(v);
        }
        if let Some(v) = get("GITHUB_URL") {
            self.github.graphql_url = v;
        }

        // LLM
        if let Some(v) = get("OPENAI_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("OPENAI_PROMPT_ID") {
            self.llm.prompt_id = Some(v);
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.llm.base_url = v;
        }

        // SMTP
        if let Some(v) = get("SMTP_SERVER") {
            self.smtp.server = v;
        }
        if let Some(v) = get("SMTP_PORT").and_then(|v| v.trim().parse().ok()) {
            self.smtp.port = v;
        }
        if let Some(v) = get("SMTP_USER") {
            self.smtp.user = Some(v);
        }
        if let Some(v) = get("SMTP_PASSWORD") {
            self.smtp.password = Some(v);
        }
        if let Some(v) = get("SENDER_EMAIL") {
            self.smtp.sender = Some(v);
        }
        if let Some(v) = get("SMTP_USE_SSL") {
            self.smtp.use_ssl = parse_flag(&v);
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence; only explicitly provided values override.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.model {
            self.llm.model = model.clone();
        }

        if args.allow_empty_time {
            self.general.require_time_entries = false;
        }

        if let Some(ref recipients) = args.to {
            self.general.recipients = recipients.clone();
        }
    }

    /// Validate settings that would otherwise fail deep inside a request.
    pub fn validate(&self) -> Result<()> {
        if self.general.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be at least 1");
        }

        let urls = [
            ("clockify.base_url", Some(&self.clockify.base_url)),
            ("jira.url", self.jira.url.as_ref()),
            ("gitlab.url", Some(&self.gitlab.url)),
            ("github.graphql_url", Some(&self.github.graphql_url)),
            ("llm.base_url", Some(&self.llm.base_url)),
        ];
        for (name, url) in urls {
            if let Some(url) = url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    bail!("{} must start with 'http://' or 'https://': {}", name, url);
                }
            }
        }

        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
