//! GitLab source-control client.

use super::http::HttpClient;
use super::paging::{paginate, Page};
use super::{collect_each, filter_by_author, Source, REPOSITORY_CONCURRENCY};
use crate::config::GitLabConfig;
use crate::error::{SourceError, SourceResult};
use crate::models::{Commit, ReportDay, SourceControlActivity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use tokio::sync::OnceCell;
use tracing::{info, warn};

const SOURCE: &str = "gitlab";

#[derive(Debug, Deserialize)]
struct RawUser {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawProject {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    path_with_namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    #[serde(default)]
    short_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    author_name: Option<String>,
    #[serde(default)]
    author_email: Option<String>,
    #[serde(default)]
    committed_date: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    web_url: Option<String>,
}

/// A project whose history is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRef {
    pub id: u64,
    pub name: String,
    pub path: String,
}

impl ProjectRef {
    /// Project configured by id only; its name is not known up front.
    fn from_id(id: u64) -> Self {
        Self {
            id,
            name: format!("project-{}", id),
            path: format!("project-{}", id),
        }
    }
}

impl fmt::Display for ProjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path, self.id)
    }
}

/// Client for the GitLab REST API v4.
pub struct GitLabClient {
    http: HttpClient,
    api_url: String,
    project_ids: Vec<u64>,
    filter_by_user: bool,
    author_email: Option<String>,
    page_size: usize,
    user_email: OnceCell<Option<String>>,
}

impl GitLabClient {
    pub fn from_config(config: &GitLabConfig, timeout_secs: u64) -> SourceResult<Self> {
        let token = config
            .token
            .as_deref()
            .ok_or_else(|| SourceError::Configuration("GITLAB_TOKEN is not set".to_string()))?;

        Ok(Self {
            http: HttpClient::new(timeout_secs, &[("private-token", token)])?,
            api_url: format!("{}/api/v4", config.url.trim_end_matches('/')),
            project_ids: config.project_ids.clone(),
            filter_by_user: config.filter_by_user,
            author_email: config.author_email.clone(),
            page_size: config.page_size,
            user_email: OnceCell::new(),
        })
    }

    /// Email of the token's user, resolved once.
    pub async fn authenticate(&self) -> SourceResult<Option<&str>> {
        let email = self
            .user_email
            .get_or_try_init(|| async {
                let url = format!("{}/user", self.api_url);
                let user: RawUser = self.http.send_json(self.http.get(&url)).await?;
                info!(
                    "GitLab user resolved: {}",
                    user.username.as_deref().unwrap_or("unknown")
                );
                Ok::<_, SourceError>(user.email)
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
                warn!("GitLab user has no public email, commits are not filtered by author");
                None
            }
            Err(e) => {
                warn!("Could not resolve GitLab user ({}), commits are not filtered by author", e);
                None
            }
        }
    }

    /// Configured projects, or every project the user can push to.
    pub async fn projects(&self) -> SourceResult<Vec<ProjectRef>> {
        if !self.project_ids.is_empty() {
            return Ok(self.project_ids.iter().copied().map(ProjectRef::from_id).collect());
        }

        let raw = paginate(self.page_size, |page| self.projects_page(page)).await?;
        let projects: Vec<ProjectRef> = raw.into_iter().map(normalize_project).collect();
        info!("Found {} accessible GitLab projects", projects.len());
        Ok(projects)
    }

    async fn projects_page(&self, page: Page) -> SourceResult<Vec<RawProject>> {
        let url = format!("{}/projects", self.api_url);
        let request = self.http.get(&url).query(&[
            ("membership", "true".to_string()),
            ("min_access_level", "30".to_string()),
            ("simple", "true".to_string()),
            ("per_page", page.size.to_string()),
            ("page", page.number.to_string()),
        ]);
        self.http.send_json(request).await
    }

    /// Commits of one project inside the day's window.
    pub async fn project_commits(
        &self,
        project: &ProjectRef,
        day: &ReportDay,
    ) -> SourceResult<Vec<Commit>> {
        let (since, until) = day.commit_window();
        let raw = paginate(self.page_size, |page| {
            let url = format!("{}/projects/{}/repository/commits", self.api_url, project.id);
            let request = self.http.get(&url).query(&[
                ("since", since.clone()),
                ("until", until.clone()),
                ("per_page", page.size.to_string()),
                ("page", page.number.to_string()),
            ]);
            async move { self.http.send_json::<Vec<RawCommit>>(request).await }
        })
        .await?;

        Ok(raw
            .into_iter()
            .filter_map(|c| normalize_commit(c, project))
            .collect())
    }
}

#[async_trait]
impl Source for GitLabClient {
    type Output = SourceControlActivity;

    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_today(&self, day: &ReportDay) -> SourceControlActivity {
        let projects = match self.projects().await {
            Ok(projects) => projects,
            Err(e) => {
                e.log(SOURCE, "listing projects");
                return SourceControlActivity::default();
            }
        };

        let author = self.author_filter().await;
        let commits = collect_each(SOURCE, &projects, REPOSITORY_CONCURRENCY, |project| {
            self.project_commits(project, day)
        })
        .await;

        let commits = filter_by_author(commits, author.as_deref());
        info!("Found {} GitLab commits", commits.len());

        SourceControlActivity {
            commits,
            board_items: Vec::new(),
        }
    }
}

fn normalize_project(raw: RawProject) -> ProjectRef {
    let name = raw.name.unwrap_or_else(|| format!("project-{}", raw.id));
    ProjectRef {
        id: raw.id,
        path: raw.path_with_namespace.unwrap_or_else(|| name.clone()),
        name,
    }
}

fn normalize_commit(raw: RawCommit, project: &ProjectRef) -> Option<Commit> {
    let date = raw.committed_date.or(raw.created_at)?;
    let committed_at = match DateTime::parse_from_rfc3339(&date) {
        Ok(ts) => ts.with_timezone(&Utc),
        Err(_) => {
            warn!("Skipping commit with malformed date: {}", date);
            return None;
        }
    };

    Some(Commit {
        project_name: project.name.clone(),
        project_path: project.path.clone(),
        message: raw.message.or(raw.title).unwrap_or_default(),
        short_id: raw.short_id.unwrap_or_default(),
        committed_at,
        web_url: raw.web_url.unwrap_or_default(),
        author_name: raw.author_name.unwrap_or_default(),
        author_email: raw.author_email.unwrap_or_default(),
    })
}
