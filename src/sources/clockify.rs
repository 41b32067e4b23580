//! Clockify time-tracking client.
//!
//! Resolves the current user and default workspace once, then pages through
//! the user's time entries for the report day.

use super::http::HttpClient;
use super::paging::{paginate, Page};
use super::Source;
use crate::config::ClockifyConfig;
use crate::error::{SourceError, SourceResult};
use crate::models::{to_api_timestamp, ReportDay, TimeEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{info, warn};

const SOURCE: &str = "clockify";

/// The authenticated user and the workspace entries are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockifyIdentity {
    pub user_id: String,
    pub workspace_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUser {
    id: String,
    #[serde(default)]
    default_workspace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawNamed {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawInterval {
    #[serde(default)]
    start: Option<String>,
    #[serde(default)]
    end: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTimeEntry {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    project: Option<RawNamed>,
    #[serde(default)]
    task: Option<RawNamed>,
    #[serde(default)]
    tags: Option<Vec<RawNamed>>,
    #[serde(default)]
    time_interval: Option<RawInterval>,
}

/// Client for the Clockify REST API.
pub struct ClockifyClient {
    http: HttpClient,
    base_url: String,
    page_size: usize,
    identity: OnceCell<ClockifyIdentity>,
}

impl ClockifyClient {
    /// Build a client; fails when the API key is missing.
    pub fn from_config(config: &ClockifyConfig, timeout_secs: u64) -> SourceResult<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .ok_or_else(|| SourceError::Configuration("CLOCKIFY_API_KEY is not set".to_string()))?;

        Ok(Self {
            http: HttpClient::new(timeout_secs, &[("x-api-key", api_key)])?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size,
            identity: OnceCell::new(),
        })
    }

    /// Resolve (once) the current user and default workspace.
    pub async fn authenticate(&self) -> SourceResult<&ClockifyIdentity> {
        self.identity
            .get_or_try_init(|| async {
                let url = format!("{}/user", self.base_url);
                let user: RawUser = self.http.send_json(self.http.get(&url)).await?;
                let workspace_id = user.default_workspace.ok_or_else(|| {
                    SourceError::Configuration("Clockify user has no default workspace".to_string())
                })?;
                info!("Clockify user resolved (workspace {})", workspace_id);
                Ok::<_, SourceError>(ClockifyIdentity {
                    user_id: user.id,
                    workspace_id,
                })
            })
            .await
    }

    /// All time entries in `[day.start, day.end]`, in API order.
    pub async fn time_entries(&self, day: &ReportDay) -> SourceResult<Vec<TimeEntry>> {
        let identity = self.authenticate().await?;
        let raw = paginate(self.page_size, |page| self.fetch_page(identity, day, page)).await?;
        info!("Retrieved {} time entries", raw.len());
        Ok(raw.into_iter().filter_map(normalize_entry).collect())
    }

    async fn fetch_page(
        &self,
        identity: &ClockifyIdentity,
        day: &ReportDay,
        page: Page,
    ) -> SourceResult<Vec<RawTimeEntry>> {
        let url = format!(
            "{}/workspaces/{}/user/{}/time-entries",
            self.base_url, identity.workspace_id, identity.user_id
        );
        let request = self.http.get(&url).query(&[
            ("start", to_api_timestamp(&day.start)),
            ("end", to_api_timestamp(&day.end)),
            ("hydrated", "true".to_string()),
            ("page", page.number.to_string()),
            ("page-size", page.size.to_string()),
        ]);
        self.http.send_json(request).await
    }
}

#[async_trait]
impl Source for ClockifyClient {
    type Output = Vec<TimeEntry>;

    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_today(&self, day: &ReportDay) -> Vec<TimeEntry> {
        match self.time_entries(day).await {
            Ok(entries) => {
                if entries.is_empty() {
                    info!("No time entries found for {}", day.iso_date());
                }
                entries
            }
            Err(e) => {
                e.log(SOURCE, "fetching time entries");
                Vec::new()
            }
        }
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Convert a raw entry; entries without a parseable start (or with a
/// malformed end) are dropped.
fn normalize_entry(raw: RawTimeEntry) -> Option<TimeEntry> {
    let interval = raw.time_interval.unwrap_or_default();

    let Some(start) = interval.start.as_deref().and_then(parse_timestamp) else {
        warn!("Skipping time entry without a valid start: {:?}", interval.start);
        return None;
    };

    let end = match interval.end.as_deref() {
        None => None,
        Some(value) => match parse_timestamp(value) {
            Some(end) => Some(end),
            None => {
                warn!("Skipping time entry with malformed end: {}", value);
                return None;
            }
        },
    };

    let project_name = raw
        .project
        .and_then(|p| p.name)
        .unwrap_or_else(|| "No project".to_string());
    let task_name = raw.task.and_then(|t| t.name);
    let tags = raw
        .tags
        .unwrap_or_default()
        .into_iter()
        .filter_map(|t| t.name)
        .collect();

    Some(TimeEntry::new(
        raw.description.unwrap_or_default(),
        project_name,
        task_name,
        start,
        end,
        tags,
    ))
}
