//! GitHub source-control client (GraphQL API).
//!
//! Reads the default-branch history of the owner's repositories and,
//! when a ProjectV2 board is configured, the board items scheduled for the
//! report day.

use super::http::HttpClient;
use super::paging::{paginate_cursor, CursorPage};
use super::{collect_each, filter_by_author, or_empty, Source, REPOSITORY_CONCURRENCY};
use crate::config::GitHubConfig;
use crate::error::{SourceError, SourceResult};
use crate::models::{BoardItem, Commit, ReportDay, SourceControlActivity};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const SOURCE: &str = "github";

const VIEWER_QUERY: &str = "query { viewer { login email } }";

const REPOSITORIES_QUERY: &str = r#"
query($owner: String!, $cursor: String) {
  user(login: $owner) {
    repositories(first: 100, after: $cursor, ownerAffiliations: OWNER) {
      pageInfo { hasNextPage endCursor }
      nodes { name nameWithOwner }
    }
  }
}"#;

const HISTORY_QUERY: &str = r#"
query(
  $owner: String!
  $name: String!
  $since: GitTimestamp!
  $until: GitTimestamp!
  $cursor: String
) {
  repository(owner: $owner, name: $name) {
    name
    nameWithOwner
    defaultBranchRef {
      target {
        ... on Commit {
          history(first: 100, since: $since, until: $until, after: $cursor) {
            pageInfo { hasNextPage endCursor }
            nodes {
              abbreviatedOid
              message
              committedDate
              url
              author { name email }
            }
          }
        }
      }
    }
  }
}"#;

const PROJECT_ITEMS_QUERY: &str = r#"
query($owner: String!, $number: Int!, $cursor: String) {
  user(login: $owner) {
    projectV2(number: $number) {
      id
      title
      items(first: 100, after: $cursor) {
        pageInfo { hasNextPage endCursor }
        nodes {
          content {
            ... on Issue { title url state number body }
            ... on PullRequest { title url state number body }
            ... on DraftIssue { title body }
          }
          fieldValues(first: 20) {
            nodes {
              ... on ProjectV2ItemFieldDateValue {
                date
                field { ... on ProjectV2FieldCommon { name } }
              }
              ... on ProjectV2ItemFieldSingleSelectValue {
                name
                field { ... on ProjectV2FieldCommon { name } }
              }
            }
          }
        }
      }
    }
  }
}"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    #[serde(default)]
    message: String,
}

/// A GraphQL connection; `pageInfo` is only requested where we page.
#[derive(Debug, Deserialize)]
struct Nodes<T> {
    #[serde(default = "Vec::new")]
    nodes: Vec<Option<T>>,
    #[serde(default, rename = "pageInfo")]
    page_info: Option<PageInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

impl<T> Default for Nodes<T> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            page_info: None,
        }
    }
}

impl<T> Nodes<T> {
    fn into_vec(self) -> Vec<T> {
        self.nodes.into_iter().flatten().collect()
    }

    fn into_page(self) -> CursorPage<T> {
        let Nodes { nodes, page_info } = self;
        let next = page_info
            .filter(|info| info.has_next_page)
            .and_then(|info| info.end_cursor);
        CursorPage {
            records: nodes.into_iter().flatten().collect(),
            next,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ViewerData {
    viewer: RawViewer,
}

#[derive(Debug, Deserialize)]
struct RawViewer {
    #[serde(default)]
    login: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepositoriesData {
    user: Option<RawOwnerRepositories>,
}

#[derive(Debug, Deserialize)]
struct RawOwnerRepositories {
    repositories: Nodes<RawRepository>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRepository {
    name_with_owner: String,
}

#[derive(Debug, Deserialize)]
struct HistoryData {
    repository: Option<RawRepositoryHistory>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRepositoryHistory {
    default_branch_ref: Option<RawBranchRef>,
}

#[derive(Debug, Deserialize)]
struct RawBranchRef {
    target: Option<RawTarget>,
}

#[derive(Debug, Deserialize)]
struct RawTarget {
    #[serde(default)]
    history: Option<Nodes<RawCommit>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCommit {
    #[serde(default)]
    abbreviated_oid: String,
    #[serde(default)]
    message: String,
    committed_date: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    author: Option<RawAuthor>,
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectData {
    user: Option<RawProjectOwner>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProjectOwner {
    #[serde(rename = "projectV2")]
    project: Option<RawProject>,
}

#[derive(Debug, Deserialize)]
struct RawProject {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    items: Nodes<RawProjectItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawProjectItem {
    content: Option<RawItemContent>,
    field_values: Nodes<RawFieldValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawItemContent {
    title: Option<String>,
    url: Option<String>,
    state: Option<String>,
    number: Option<u64>,
    body: Option<String>,
}

/// A date or single-select value; other field kinds come back as `{}`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFieldValue {
    date: Option<String>,
    name: Option<String>,
    field: Option<RawFieldName>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFieldName {
    name: Option<String>,
}

/// A repository whose default-branch history is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parse `name` or `owner/name`; a bare name belongs to `default_owner`.
    pub fn parse(value: &str, default_owner: &str) -> Self {
        match value.trim().split_once('/') {
            Some((owner, name)) => Self {
                owner: owner.to_string(),
                name: name.to_string(),
            },
            None => Self {
                owner: default_owner.to_string(),
                name: value.trim().to_string(),
            },
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Names of the board fields that schedule an item.
#[derive(Debug, Clone)]
pub struct BoardDateFields {
    pub start: String,
    pub end: String,
}

/// Client for the GitHub GraphQL API.
pub struct GitHubClient {
    http: HttpClient,
    graphql_url: String,
    owner: String,
    repos: Vec<String>,
    project_number: Option<u64>,
    date_fields: BoardDateFields,
    filter_by_user: bool,
    author_email: Option<String>,
    viewer_email: OnceCell<Option<String>>,
}

impl GitHubClient {
    /// Build a client; token and owner are both required.
    pub fn from_config(config: &GitHubConfig, timeout_secs: u64) -> SourceResult<Self> {
        let (Some(token), Some(owner)) = (config.token.as_deref(), config.owner.as_deref()) else {
            return Err(SourceError::Configuration(
                "GH_TOKEN and GITHUB_OWNER must both be set".to_string(),
            ));
        };

        let bearer = format!("Bearer {}", token);
        Ok(Self {
            http: HttpClient::new(timeout_secs, &[("authorization", bearer.as_str())])?,
            graphql_url: config.graphql_url.clone(),
            owner: owner.to_string(),
            repos: config.repos.clone(),
            project_number: config.project_number,
            date_fields: BoardDateFields {
                start: config.start_date_field.clone(),
                end: config.end_date_field.clone(),
            },
            filter_by_user: config.filter_by_user,
            author_email: config.author_email.clone(),
            viewer_email: OnceCell::new(),
        })
    }

    async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: Value) -> SourceResult<T> {
        let request = self
            .http
            .post(&self.graphql_url)
            .json(&json!({ "query": query, "variables": variables }));
        let response: GraphQlResponse<T> = self.http.send_json(request).await?;
        into_data(response)
    }

    /// Public email of the token's user, resolved once.
    pub async fn authenticate(&self) -> SourceResult<Option<&str>> {
        let email = self
            .viewer_email
            .get_or_try_init(|| async {
                let data: ViewerData = self.graphql(VIEWER_QUERY, json!({})).await?;
                debug!(
                    "GitHub viewer: {}",
                    data.viewer.login.as_deref().unwrap_or("unknown")
                );
                Ok::<_, SourceError>(data.viewer.email.filter(|e| !e.trim().is_empty()))
            })
            .await?;
        Ok(email.as_deref())
    }

    /// Author address commits are filtered on, if any.
    async fn author_filter(&self) -> Option<String> {
        if let Some(email) = &self.author_email {
            return Some(email.clone());
        }
        if !self.filter_by_user {
            return None;
        }
        match self.authenticate().await {
            Ok(Some(email)) => Some(email.to_string()),
            Ok(None) => {
                warn!("GitHub user has no public email, commits are not filtered by author");
                None
            }
            Err(e) => {
                warn!(
                    "Could not resolve GitHub user ({}), commits are not filtered by author",
                    e
                );
                None
            }
        }
    }

    /// Configured repositories, or every repository the owner owns.
    pub async fn repositories(&self) -> SourceResult<Vec<RepoRef>> {
        if !self.repos.is_empty() {
            return Ok(self
                .repos
                .iter()
                .map(|r| RepoRef::parse(r, &self.owner))
                .collect());
        }

        let raw = paginate_cursor(|cursor| {
            let variables = json!({ "owner": self.owner, "cursor": cursor });
            async move {
                let data: RepositoriesData = self.graphql(REPOSITORIES_QUERY, variables).await?;
                let repositories = data.user.map(|u| u.repositories).unwrap_or_default();
                Ok::<_, SourceError>(repositories.into_page())
            }
        })
        .await?;
        let repos: Vec<RepoRef> = raw
            .into_iter()
            .map(|r| RepoRef::parse(&r.name_with_owner, &self.owner))
            .collect();
        info!("Found {} GitHub repositories", repos.len());
        Ok(repos)
    }

    /// Default-branch commits of one repository for the day.
    pub async fn repository_commits(
        &self,
        repo: &RepoRef,
        day: &ReportDay,
    ) -> SourceResult<Vec<Commit>> {
        let (since, until) = day.commit_window();
        let raw = paginate_cursor(|cursor| {
            let variables = json!({
                "owner": repo.owner,
                "name": repo.name,
                "since": since,
                "until": until,
                "cursor": cursor,
            });
            async move {
                let data: HistoryData = self.graphql(HISTORY_QUERY, variables).await?;
                let history = data
                    .repository
                    .and_then(|r| r.default_branch_ref)
                    .and_then(|b| b.target)
                    .and_then(|t| t.history);
                match history {
                    Some(history) => Ok::<_, SourceError>(history.into_page()),
                    None => {
                        debug!("{} has no default branch", repo);
                        Ok(Nodes::default().into_page())
                    }
                }
            }
        })
        .await?;

        Ok(raw
            .into_iter()
            .filter_map(|c| normalize_commit(c, repo))
            .collect())
    }

    /// Items of the configured board scheduled to start or end on `day`.
    pub async fn board_items(&self, day: &ReportDay) -> SourceResult<Vec<BoardItem>> {
        let Some(number) = self.project_number else {
            return Ok(Vec::new());
        };

        let raw = paginate_cursor(|cursor| {
            let variables = json!({ "owner": self.owner, "number": number, "cursor": cursor });
            async move {
                let data: ProjectData = self.graphql(PROJECT_ITEMS_QUERY, variables).await?;
                let project = data.user.and_then(|u| u.project).ok_or_else(|| {
                    SourceError::NotFound(format!("project {} of {}", number, self.owner))
                })?;
                debug!(
                    "Reading board {} ({})",
                    project.title.as_deref().unwrap_or("untitled"),
                    project.id
                );
                Ok::<_, SourceError>(project.items.into_page())
            }
        })
        .await?;

        let items: Vec<BoardItem> = raw
            .into_iter()
            .filter_map(|item| board_item_for_day(item, day.date, &self.date_fields))
            .collect();
        info!("Found {} board items scheduled for {}", items.len(), day.iso_date());
        Ok(items)
    }
}

#[async_trait]
impl Source for GitHubClient {
    type Output = SourceControlActivity;

    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_today(&self, day: &ReportDay) -> SourceControlActivity {
        let commits = async {
            let repos = match self.repositories().await {
                Ok(repos) => repos,
                Err(e) => {
                    e.log(SOURCE, "listing repositories");
                    return Vec::new();
                }
            };
            let author = self.author_filter().await;
            let commits = collect_each(SOURCE, &repos, REPOSITORY_CONCURRENCY, |repo| {
                self.repository_commits(repo, day)
            })
            .await;
            filter_by_author(commits, author.as_deref())
        };

        let (commits, board_items) = tokio::join!(commits, self.board_items(day));
        info!("Found {} GitHub commits", commits.len());

        SourceControlActivity {
            commits,
            board_items: or_empty(SOURCE, "fetching board items", board_items),
        }
    }
}

fn into_data<T>(response: GraphQlResponse<T>) -> SourceResult<T> {
    if !response.errors.is_empty() {
        let messages: Vec<String> = response.errors.into_iter().map(|e| e.message).collect();
        return Err(SourceError::GraphQl(messages.join("; ")));
    }
    response
        .data
        .ok_or_else(|| SourceError::GraphQl("response carried no data".to_string()))
}

fn normalize_commit(raw: RawCommit, repo: &RepoRef) -> Option<Commit> {
    let committed_at = match DateTime::parse_from_rfc3339(&raw.committed_date) {
        Ok(ts) => ts.with_timezone(&Utc),
        Err(_) => {
            warn!("Skipping commit with malformed date: {}", raw.committed_date);
            return None;
        }
    };
    let author = raw.author.unwrap_or(RawAuthor {
        name: None,
        email: None,
    });

    Some(Commit {
        project_name: repo.name.clone(),
        project_path: repo.to_string(),
        message: raw.message,
        short_id: raw.abbreviated_oid,
        committed_at,
        web_url: raw.url,
        author_name: author.name.unwrap_or_default(),
        author_email: author.email.unwrap_or_default(),
    })
}

fn board_item_for_day(
    item: RawProjectItem,
    day: NaiveDate,
    fields: &BoardDateFields,
) -> Option<BoardItem> {
    let mut start_date = None;
    let mut end_date = None;
    let mut status = None;

    for value in item.field_values.into_vec() {
        let field_name = value.field.and_then(|f| f.name).unwrap_or_default();
        if let Some(date) = value.date.as_deref() {
            let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok();
            if field_name.eq_ignore_ascii_case(&fields.start) {
                start_date = parsed;
            } else if field_name.eq_ignore_ascii_case(&fields.end) {
                end_date = parsed;
            }
        } else if field_name.eq_ignore_ascii_case("status") {
            status = value.name;
        }
    }

    if start_date != Some(day) && end_date != Some(day) {
        return None;
    }

    let content = item.content.unwrap_or_default();
    Some(BoardItem {
        title: content.title.unwrap_or_else(|| "Untitled".to_string()),
        url: content.url,
        state: content.state,
        number: content.number,
        description: content.body.filter(|b| !b.trim().is_empty()),
        status,
        start_date,
        end_date,
    })
}
