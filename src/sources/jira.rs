//! Jira issue-tracker client.
//!
//! Three JQL views over the current user's issues (in progress, closed
//! today, all open) plus the list of agile boards. Descriptions stored as
//! Atlassian Document Format are flattened to plain text.

use super::http::HttpClient;
use super::paging::{paginate_cursor, CursorPage};
use super::{or_empty, Source};
use crate::config::JiraConfig;
use crate::error::{SourceError, SourceResult};
use crate::models::{Board, IssueActivity, ReportDay, StatusCategory, Task, TaskBuckets};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::OnceCell;
use tracing::{info, warn};

const SOURCE: &str = "jira";

/// Maximum characters kept from an issue description.
pub const MAX_DESCRIPTION_CHARS: usize = 500;

const BOARD_PAGE_SIZE: usize = 50;

/// Standard fields requested for every search.
const STANDARD_FIELDS: [&str; 12] = [
    "summary",
    "status",
    "issuetype",
    "project",
    "assignee",
    "priority",
    "description",
    "created",
    "updated",
    "labels",
    "components",
    "resolutiondate",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMyself {
    account_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawSearchPage {
    issues: Vec<RawIssue>,
    next_page_token: Option<String>,
    is_last: Option<bool>,
}

impl RawSearchPage {
    fn into_page(self) -> CursorPage<RawIssue> {
        let next = if self.is_last == Some(true) {
            None
        } else {
            self.next_page_token
        };
        CursorPage {
            records: self.issues,
            next,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawIssue {
    key: String,
    fields: RawFields,
}

#[derive(Debug, Default, Deserialize)]
struct RawNamed {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStatusCategory {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatus {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status_category: Option<RawStatusCategory>,
}

#[derive(Debug, Default, Deserialize)]
struct RawProject {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawUser {
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFields {
    summary: Option<String>,
    status: Option<RawStatus>,
    issuetype: Option<RawNamed>,
    project: Option<RawProject>,
    assignee: Option<RawUser>,
    priority: Option<RawNamed>,
    description: Option<Value>,
    created: Option<String>,
    updated: Option<String>,
    resolutiondate: Option<String>,
    labels: Option<Vec<String>>,
    components: Option<Vec<RawNamed>>,
    /// Custom fields (`customfield_*`) and anything else we did not model.
    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBoardPage {
    #[serde(default)]
    values: Vec<RawBoard>,
}

#[derive(Debug, Deserialize)]
struct RawBoard {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    board_type: Option<String>,
    #[serde(default)]
    location: Option<RawBoardLocation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBoardLocation {
    #[serde(default)]
    project_key: Option<String>,
}

/// Client for the Jira Cloud REST and Agile APIs.
pub struct JiraClient {
    http: HttpClient,
    base_url: String,
    email: String,
    api_token: String,
    closed_date_field: String,
    start_date_field: String,
    page_size: usize,
    include_boards: bool,
    account_id: OnceCell<String>,
}

impl JiraClient {
    /// Build a client; URL, email and API token are all required.
    pub fn from_config(config: &JiraConfig, timeout_secs: u64) -> SourceResult<Self> {
        let (Some(url), Some(email), Some(api_token)) = (
            config.url.as_deref(),
            config.email.as_deref(),
            config.api_token.as_deref(),
        ) else {
            return Err(SourceError::Configuration(
                "JIRA_URL, JIRA_EMAIL, and JIRA_API_TOKEN must all be set".to_string(),
            ));
        };

        Ok(Self {
            http: HttpClient::new(timeout_secs, &[])?,
            base_url: url.trim_end_matches('/').to_string(),
            email: email.to_string(),
            api_token: api_token.to_string(),
            closed_date_field: config.closed_date_field.clone(),
            start_date_field: config.start_date_field.clone(),
            page_size: config.page_size,
            include_boards: config.include_boards,
            account_id: OnceCell::new(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/rest/api/3/{}", self.base_url, path)
    }

    fn agile_url(&self, path: &str) -> String {
        format!("{}/rest/agile/1.0/{}", self.base_url, path)
    }

    /// Resolve (once) the account id of the token's user.
    pub async fn authenticate(&self) -> SourceResult<&str> {
        let id = self
            .account_id
            .get_or_try_init(|| async {
                let request = self
                    .http
                    .get(&self.api_url("myself"))
                    .basic_auth(&self.email, Some(&self.api_token));
                let me: RawMyself = self.http.send_json(request).await?;
                Ok::<_, SourceError>(me.account_id)
            })
            .await?;
        Ok(id.as_str())
    }

    /// Run a JQL search, following `nextPageToken`, and normalize the issues.
    pub async fn search(&self, jql: &str) -> SourceResult<Vec<Task>> {
        info!("Searching Jira with JQL: {}", jql);
        let raw = paginate_cursor(|token| self.search_page(jql, token)).await?;
        Ok(raw
            .into_iter()
            .map(|issue| {
                normalize_issue(
                    issue,
                    &self.base_url,
                    &self.closed_date_field,
                    &self.start_date_field,
                )
            })
            .collect())
    }

    async fn search_page(
        &self,
        jql: &str,
        token: Option<String>,
    ) -> SourceResult<CursorPage<RawIssue>> {
        let mut fields: Vec<&str> = STANDARD_FIELDS.to_vec();
        fields.push(&self.closed_date_field);
        fields.push(&self.start_date_field);

        let mut query = vec![
            ("jql", jql.to_string()),
            ("maxResults", self.page_size.to_string()),
            ("fields", fields.join(",")),
        ];
        if let Some(token) = token {
            query.push(("nextPageToken", token));
        }

        let request = self
            .http
            .get(&self.api_url("search/jql"))
            .basic_auth(&self.email, Some(&self.api_token))
            .query(&query);
        let result: RawSearchPage = self.http.send_json(request).await?;
        Ok(result.into_page())
    }

    /// Tasks in the "In Progress" status category.
    pub async fn tasks_in_progress(&self, account_id: &str) -> SourceResult<Vec<Task>> {
        let tasks = self.search(&in_progress_jql(account_id)).await?;
        info!("Found {} tasks in progress", tasks.len());
        Ok(tasks)
    }

    /// Tasks resolved, or marked closed via the custom field, on `day`.
    pub async fn tasks_closed_today(
        &self,
        account_id: &str,
        day: &ReportDay,
    ) -> SourceResult<Vec<Task>> {
        let date = day.iso_date();
        let tasks = search_with_fallback(
            closed_today_jql(account_id, &self.closed_date_field, &date),
            closed_today_fallback_jql(account_id, &date),
            |jql| async move { self.search(&jql).await },
        )
        .await?;
        info!("Found {} tasks closed today", tasks.len());
        Ok(tasks)
    }

    /// Every open task assigned to the user.
    pub async fn open_tasks(&self, account_id: &str) -> SourceResult<Vec<Task>> {
        let tasks = self.search(&open_tasks_jql(account_id)).await?;
        info!("Found {} open tasks assigned to user", tasks.len());
        Ok(tasks)
    }

    /// Agile boards visible to the user. A 404 means the instance has no
    /// agile API.
    pub async fn boards(&self) -> SourceResult<Vec<Board>> {
        let request = self
            .http
            .get(&self.agile_url("board"))
            .basic_auth(&self.email, Some(&self.api_token))
            .query(&[("maxResults", BOARD_PAGE_SIZE)]);

        match self.http.send_json::<RawBoardPage>(request).await {
            Ok(page) => {
                let boards: Vec<Board> = page.values.into_iter().map(normalize_board).collect();
                info!("Found {} boards", boards.len());
                Ok(boards)
            }
            Err(e) if e.is_not_found() => {
                warn!("Agile API not available, skipping boards");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Source for JiraClient {
    type Output = IssueActivity;

    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_today(&self, day: &ReportDay) -> IssueActivity {
        let account_id = match self.authenticate().await {
            Ok(id) => id,
            Err(e) => {
                e.log(SOURCE, "resolving current user");
                return IssueActivity::default();
            }
        };

        let boards = async {
            if self.include_boards {
                self.boards().await
            } else {
                Ok(Vec::new())
            }
        };

        let (in_progress, closed_today, all, boards) = tokio::join!(
            self.tasks_in_progress(account_id),
            self.tasks_closed_today(account_id, day),
            self.open_tasks(account_id),
            boards,
        );

        IssueActivity {
            tasks: TaskBuckets {
                in_progress: or_empty(SOURCE, "fetching in-progress tasks", in_progress),
                closed_today: or_empty(SOURCE, "fetching tasks closed today", closed_today),
                all: or_empty(SOURCE, "fetching open tasks", all),
            },
            boards: or_empty(SOURCE, "fetching boards", boards),
        }
    }
}

pub fn in_progress_jql(account_id: &str) -> String {
    format!(
        "assignee = '{}' AND statusCategory = 'In Progress' ORDER BY updated DESC",
        account_id
    )
}

/// Resolution date OR the custom closed-date field, to cover workflows
/// that never set the resolution.
pub fn closed_today_jql(account_id: &str, closed_field: &str, date: &str) -> String {
    format!(
        "assignee = '{}' AND (resolutiondate >= '{}' OR {} >= '{}') ORDER BY updated DESC",
        account_id, date, closed_field, date
    )
}

pub fn closed_today_fallback_jql(account_id: &str, date: &str) -> String {
    format!(
        "assignee = '{}' AND resolutiondate >= '{}' ORDER BY updated DESC",
        account_id, date
    )
}

pub fn open_tasks_jql(account_id: &str) -> String {
    format!(
        "assignee = '{}' AND statusCategory != Done ORDER BY updated DESC",
        account_id
    )
}

/// Run `primary`; if it fails for any reason (typically a custom field
/// the instance does not have), run `fallback` once instead.
pub async fn search_with_fallback<T, F, Fut>(
    primary: String,
    fallback: String,
    search: F,
) -> SourceResult<T>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = SourceResult<T>>,
{
    match search(primary).await {
        Ok(found) => Ok(found),
        Err(e) => {
            warn!(
                "Custom closed-date query failed ({}), retrying with resolutiondate only",
                e
            );
            search(fallback).await
        }
    }
}

fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Custom date fields hold either `YYYY-MM-DD` or a full timestamp.
fn parse_date_field(value: Option<&Value>) -> Option<NaiveDate> {
    let text = value?.as_str()?;
    let prefix = text.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

fn normalize_issue(
    issue: RawIssue,
    base_url: &str,
    closed_field: &str,
    start_field: &str,
) -> Task {
    let fields = issue.fields;

    let status = fields.status.unwrap_or_default();
    let status_name = status.name.unwrap_or_else(|| "Unknown".to_string());
    let category = status.status_category.unwrap_or_default();
    let status_category =
        StatusCategory::resolve(category.key.or(category.name).as_deref(), &status_name);

    let project = fields.project.unwrap_or_default();
    let description = fields.description.as_ref().and_then(description_text);

    let url = if issue.key.is_empty() {
        String::new()
    } else {
        format!("{}/browse/{}", base_url, issue.key)
    };

    Task {
        summary: fields.summary.unwrap_or_default(),
        status: status_name,
        status_category,
        issue_type: fields
            .issuetype
            .and_then(|t| t.name)
            .unwrap_or_else(|| "Task".to_string()),
        project_key: project.key.unwrap_or_default(),
        project_name: project.name.unwrap_or_default(),
        assignee: fields.assignee.and_then(|a| a.display_name),
        priority: fields.priority.and_then(|p| p.name),
        description,
        created: fields.created.as_deref().and_then(parse_datetime),
        updated: fields.updated.as_deref().and_then(parse_datetime),
        resolution_date: fields.resolutiondate.as_deref().and_then(parse_datetime),
        closed_date: parse_date_field(fields.extra.get(closed_field)),
        start_date: parse_date_field(fields.extra.get(start_field)),
        labels: fields.labels.unwrap_or_default(),
        components: fields
            .components
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| c.name)
            .collect(),
        url,
        key: issue.key,
    }
}

fn normalize_board(raw: RawBoard) -> Board {
    Board {
        id: raw.id,
        name: raw.name.unwrap_or_default(),
        board_type: raw.board_type.unwrap_or_default(),
        project_key: raw.location.and_then(|l| l.project_key),
    }
}

/// Plain-text description from either a string or an ADF document.
fn description_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => truncate_chars(s.trim(), MAX_DESCRIPTION_CHARS),
        Value::Object(_) | Value::Array(_) => {
            extract_adf_text(&AdfNode::from(value), MAX_DESCRIPTION_CHARS)
        }
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// A node of an Atlassian Document Format tree.
#[derive(Debug, Clone, PartialEq)]
pub enum AdfNode {
    Object {
        node_type: Option<String>,
        text: Option<String>,
        children: Vec<AdfNode>,
    },
    Array(Vec<AdfNode>),
    Leaf,
}

impl From<&Value> for AdfNode {
    fn from(value: &Value) -> Self {
        match value {
            Value::Object(map) => AdfNode::Object {
                node_type: map.get("type").and_then(Value::as_str).map(String::from),
                text: map.get("text").and_then(Value::as_str).map(String::from),
                children: match map.get("content") {
                    Some(Value::Array(items)) => items.iter().map(AdfNode::from).collect(),
                    _ => Vec::new(),
                },
            },
            Value::Array(items) => AdfNode::Array(items.iter().map(AdfNode::from).collect()),
            _ => AdfNode::Leaf,
        }
    }
}

/// Depth-first, document-order concatenation of every `text` node,
/// space-separated and cut to `max_chars` characters.
pub fn extract_adf_text(root: &AdfNode, max_chars: usize) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let mut stack: Vec<&AdfNode> = vec![root];

    while let Some(node) = stack.pop() {
        match node {
            AdfNode::Object {
                node_type,
                text,
                children,
            } => {
                if node_type.as_deref() == Some("text") {
                    parts.push(text.as_deref().unwrap_or(""));
                }
                stack.extend(children.iter().rev());
            }
            AdfNode::Array(items) => stack.extend(items.iter().rev()),
            AdfNode::Leaf => {}
        }
    }

    truncate_chars(&parts.join(" "), max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::stub::{has_param, StubServer};
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::Mutex;

    fn stub_client(base_url: &str) -> JiraClient {
        let config = JiraConfig {
            url: Some(base_url.to_string()),
            email: Some("dev@example.com".to_string()),
            api_token: Some("token".to_string()),
            page_size: 2,
            ..JiraConfig::default()
        };
        JiraClient::from_config(&config, 5).unwrap()
    }

    fn raw_issue(key: &str) -> Value {
        json!({"key": key, "fields": {"summary": key, "status": {"name": "To Do"}}})
    }

    fn report_day() -> ReportDay {
        ReportDay::for_date(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap())
    }

    fn issue(value: Value) -> Task {
        normalize_issue(
            serde_json::from_value(value).unwrap(),
            "https://acme.atlassian.net",
            "customfield_10100",
            "customfield_10101",
        )
    }

    #[test]
    fn test_normalize_full_issue() {
        let task = issue(json!({
            "key": "API-42",
            "fields": {
                "summary": "Fix login",
                "status": {
                    "name": "In Review",
                    "statusCategory": {"key": "indeterminate", "name": "In Progress"}
                },
                "issuetype": {"name": "Bug"},
                "project": {"key": "API", "name": "Public API"},
                "assignee": {"displayName": "Dev One"},
                "priority": {"name": "High"},
                "description": "Users cannot log in",
                "created": "2024-05-01T08:00:00.000+0000",
                "updated": "2024-05-02T10:15:30.123+0200",
                "resolutiondate": null,
                "labels": ["auth"],
                "components": [{"name": "backend"}],
                "customfield_10100": "2024-05-02",
                "customfield_10101": "2024-05-01T09:00:00.000+0000"
            }
        }));

        assert_eq!(task.key, "API-42");
        assert_eq!(task.status, "In Review");
        assert_eq!(task.status_category, StatusCategory::InProgress);
        assert_eq!(task.issue_type, "Bug");
        assert_eq!(task.project_key, "API");
        assert_eq!(task.assignee.as_deref(), Some("Dev One"));
        assert_eq!(task.priority.as_deref(), Some("High"));
        assert_eq!(task.description.as_deref(), Some("Users cannot log in"));
        assert_eq!(
            task.updated.unwrap().to_rfc3339(),
            "2024-05-02T08:15:30.123+00:00"
        );
        assert!(task.resolution_date.is_none());
        assert_eq!(task.closed_date, NaiveDate::from_ymd_opt(2024, 5, 2));
        assert_eq!(task.start_date, NaiveDate::from_ymd_opt(2024, 5, 1));
        assert_eq!(task.labels, vec!["auth"]);
        assert_eq!(task.components, vec!["backend"]);
        assert_eq!(task.url, "https://acme.atlassian.net/browse/API-42");
    }

    #[test]
    fn test_normalize_sparse_issue() {
        let task = issue(json!({"key": "OPS-1", "fields": {"status": {"name": "Waiting"}}}));
        assert_eq!(task.status_category, StatusCategory::ToDo);
        assert_eq!(task.issue_type, "Task");
        assert!(task.assignee.is_none());
        assert!(task.description.is_none());
        assert!(task.labels.is_empty());

        let blocked = issue(json!({
            "key": "OPS-2",
            "fields": {"status": {"name": "Blocked", "statusCategory": {"key": "indeterminate"}}}
        }));
        assert_eq!(blocked.status_category, StatusCategory::Blocked);
    }

    #[test]
    fn test_adf_text_in_document_order() {
        let doc = json!({
            "type": "doc",
            "version": 1,
            "content": [
                {"type": "paragraph", "content": [
                    {"type": "text", "text": "First"},
                    {"type": "text", "text": "second", "marks": [{"type": "strong"}]}
                ]},
                {"type": "bulletList", "content": [
                    {"type": "listItem", "content": [
                        {"type": "paragraph", "content": [{"type": "text", "text": "nested"}]}
                    ]}
                ]},
                {"type": "paragraph", "content": [{"type": "text", "text": "last"}]}
            ]
        });

        let text = extract_adf_text(&AdfNode::from(&doc), MAX_DESCRIPTION_CHARS);
        assert_eq!(text, "First second nested last");
    }

    #[test]
    fn test_adf_text_is_truncated_by_chars() {
        let long = "ж".repeat(600);
        let doc = json!({"type": "doc", "content": [
            {"type": "paragraph", "content": [{"type": "text", "text": long}]}
        ]});

        let task = issue(json!({"key": "A-1", "fields": {"description": doc}}));
        assert_eq!(
            task.description.unwrap().chars().count(),
            MAX_DESCRIPTION_CHARS
        );
    }

    #[test]
    fn test_adf_ignores_non_text_nodes() {
        let doc = json!([{"type": "mention", "attrs": {"text": "@dev"}}, 5, "loose", null]);
        assert_eq!(extract_adf_text(&AdfNode::from(&doc), 100), "");
        assert!(description_text(&doc).is_none());
    }

    #[test]
    fn test_jql_builders() {
        assert_eq!(
            in_progress_jql("abc"),
            "assignee = 'abc' AND statusCategory = 'In Progress' ORDER BY updated DESC"
        );
        assert_eq!(
            closed_today_jql("abc", "customfield_10100", "2024-05-02"),
            "assignee = 'abc' AND (resolutiondate >= '2024-05-02' \
             OR customfield_10100 >= '2024-05-02') ORDER BY updated DESC"
        );
        assert_eq!(
            closed_today_fallback_jql("abc", "2024-05-02"),
            "assignee = 'abc' AND resolutiondate >= '2024-05-02' ORDER BY updated DESC"
        );
        assert!(open_tasks_jql("abc").contains("statusCategory != Done"));
    }

    #[tokio::test]
    async fn test_closed_today_falls_back_when_custom_field_query_fails() {
        let queries = Mutex::new(Vec::new());

        let result = search_with_fallback(
            closed_today_jql("abc", "customfield_10100", "2024-05-02"),
            closed_today_fallback_jql("abc", "2024-05-02"),
            |jql| {
                queries.lock().unwrap().push(jql.clone());
                async move {
                    if jql.contains("customfield_10100") {
                        Err(SourceError::Rejected {
                            status: 400,
                            body: "Field 'customfield_10100' does not exist".to_string(),
                        })
                    } else {
                        Ok(vec!["API-7".to_string()])
                    }
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(result, vec!["API-7"]);
        let queries = queries.lock().unwrap();
        assert_eq!(queries.len(), 2);
        assert!(!queries[1].contains("customfield_10100"));
    }

    #[tokio::test]
    async fn test_closed_today_primary_success_skips_fallback() {
        let calls = Mutex::new(0);
        let result = search_with_fallback("primary".to_string(), "fallback".to_string(), |jql| {
            *calls.lock().unwrap() += 1;
            async move { Ok::<_, SourceError>(jql) }
        })
        .await
        .unwrap();

        assert_eq!(result, "primary");
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_normalize_board() {
        let raw: RawBoard = serde_json::from_value(json!({
            "id": 7, "name": "API board", "type": "scrum", "location": {"projectKey": "API"}
        }))
        .unwrap();
        let board = normalize_board(raw);
        assert_eq!(board.id, 7);
        assert_eq!(board.board_type, "scrum");
        assert_eq!(board.project_key.as_deref(), Some("API"));
    }

    #[test]
    fn test_missing_credentials_is_configuration_error() {
        let config = JiraConfig {
            url: Some("https://acme.atlassian.net".to_string()),
            ..JiraConfig::default()
        };
        assert!(matches!(
            JiraClient::from_config(&config, 30),
            Err(SourceError::Configuration(_))
        ));
    }

    #[test]
    fn test_search_page_token_and_last_flag() {
        let page: RawSearchPage = serde_json::from_value(json!({
            "issues": [raw_issue("A-1")],
            "nextPageToken": "tok-2",
            "isLast": false
        }))
        .unwrap();
        let page = page.into_page();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.next.as_deref(), Some("tok-2"));

        let last: RawSearchPage =
            serde_json::from_value(json!({"issues": [], "nextPageToken": "tok-3", "isLast": true}))
                .unwrap();
        assert!(last.into_page().next.is_none());
    }

    #[tokio::test]
    async fn test_search_follows_next_page_token() {
        let server = StubServer::start(|uri, _| {
            let body = if has_param(uri, "nextPageToken=tok-2") {
                json!({"issues": [raw_issue("A-3")], "isLast": true})
            } else {
                json!({
                    "issues": [raw_issue("A-1"), raw_issue("A-2")],
                    "nextPageToken": "tok-2",
                    "isLast": false
                })
            };
            (StatusCode::OK, body.to_string())
        })
        .await;

        let tasks = stub_client(&server.base_url)
            .search("project = A")
            .await
            .unwrap();
        let keys: Vec<&str> = tasks.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["A-1", "A-2", "A-3"]);

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.starts_with("/rest/api/3/search/jql?")));
        assert!(!requests[0].contains("nextPageToken"));
        assert!(!requests[0].contains("startAt"));
        assert!(requests[1].contains("nextPageToken=tok-2"));
    }

    #[tokio::test]
    async fn test_search_stops_when_server_ignores_the_token() {
        let server = StubServer::start(|_, _| {
            let body = json!({
                "issues": [raw_issue("A-1"), raw_issue("A-2")],
                "nextPageToken": "tok-2",
                "isLast": false
            });
            (StatusCode::OK, body.to_string())
        })
        .await;

        let tasks = stub_client(&server.base_url)
            .search("project = A")
            .await
            .unwrap();
        assert_eq!(server.requests().len(), 2);
        assert_eq!(tasks.len(), 4);
    }

    #[tokio::test]
    async fn test_fetch_today_unreachable_host_is_empty() {
        let client = stub_client("http://127.0.0.1:1");
        let activity = client.fetch_today(&report_day()).await;
        assert!(activity.tasks.is_empty());
        assert!(activity.boards.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_today_rejected_credentials_is_empty() {
        let server = StubServer::start(|_, _| {
            (
                StatusCode::UNAUTHORIZED,
                json!({"errorMessages": ["Unauthorized"]}).to_string(),
            )
        })
        .await;

        let activity = stub_client(&server.base_url).fetch_today(&report_day()).await;
        assert!(activity.tasks.is_empty());
        assert!(activity.boards.is_empty());
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_today_board_failure_keeps_tasks() {
        let server = StubServer::start(|uri, _| match uri.path() {
            "/rest/api/3/myself" => (StatusCode::OK, json!({"accountId": "abc"}).to_string()),
            "/rest/api/3/search/jql" => (
                StatusCode::OK,
                json!({"issues": [raw_issue("A-1")], "isLast": true}).to_string(),
            ),
            _ => (StatusCode::BAD_GATEWAY, "{}".to_string()),
        })
        .await;

        let activity = stub_client(&server.base_url).fetch_today(&report_day()).await;
        assert_eq!(activity.tasks.in_progress.len(), 1);
        assert_eq!(activity.tasks.closed_today.len(), 1);
        assert_eq!(activity.tasks.all.len(), 1);
        assert!(activity.boards.is_empty());
    }
}
