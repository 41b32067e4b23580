//! Concurrent collection across sources and the proceed/skip gate.

use crate::config::Config;
use crate::error::SourceError;
use crate::models::{
    AggregatedDataset, IssueActivity, ReportDay, SourceControlActivity, TimeEntry,
};
use crate::sources::{ClockifyClient, GitHubClient, GitLabClient, JiraClient, Source};
use futures::future::join_all;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info};

pub type TimeSource = Box<dyn Source<Output = Vec<TimeEntry>>>;
pub type IssueSource = Box<dyn Source<Output = IssueActivity>>;
pub type CodeSource = Box<dyn Source<Output = SourceControlActivity>>;

/// Why a run produced no report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Time tracking is mandatory and nothing was tracked.
    NoTimeEntries,
    /// No source produced anything.
    NoActivity,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoTimeEntries => write!(f, "no time entries were tracked today"),
            SkipReason::NoActivity => write!(f, "no activity was found in any source"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Skipped(SkipReason),
}

/// Decide whether a dataset is worth a report.
pub fn gate(dataset: &AggregatedDataset, require_time_entries: bool) -> GateDecision {
    if require_time_entries && dataset.time_entries.is_empty() {
        return GateDecision::Skipped(SkipReason::NoTimeEntries);
    }
    if dataset.is_empty() {
        return GateDecision::Skipped(SkipReason::NoActivity);
    }
    GateDecision::Proceed
}

pub fn should_generate(dataset: &AggregatedDataset, require_time_entries: bool) -> bool {
    gate(dataset, require_time_entries) == GateDecision::Proceed
}

/// Runs every configured source for a day and merges the results.
pub struct Aggregator {
    time_tracking: Option<TimeSource>,
    issue_tracker: Option<IssueSource>,
    source_control: Vec<CodeSource>,
    require_time_entries: bool,
}

impl Aggregator {
    pub fn new(require_time_entries: bool) -> Self {
        Self {
            time_tracking: None,
            issue_tracker: None,
            source_control: Vec::new(),
            require_time_entries,
        }
    }

    pub fn with_time_tracking(mut self, source: TimeSource) -> Self {
        self.time_tracking = Some(source);
        self
    }

    pub fn with_issue_tracker(mut self, source: IssueSource) -> Self {
        self.issue_tracker = Some(source);
        self
    }

    /// Source-control outputs are merged in the order sources are added.
    pub fn with_source_control(mut self, source: CodeSource) -> Self {
        self.source_control.push(source);
        self
    }

    /// Build every source whose section is configured. A section that is
    /// set but incomplete is logged and left out.
    pub fn from_config(config: &Config) -> Self {
        let timeout = config.general.request_timeout_secs;
        let mut aggregator = Self::new(config.general.require_time_entries);

        if config.clockify.is_configured() {
            let client = ClockifyClient::from_config(&config.clockify, timeout);
            if let Some(client) = enabled("clockify", client) {
                aggregator = aggregator.with_time_tracking(Box::new(client));
            }
        } else {
            info!("Clockify not configured, skipping time entries");
        }

        if config.jira.is_configured() {
            let client = JiraClient::from_config(&config.jira, timeout);
            if let Some(client) = enabled("jira", client) {
                aggregator = aggregator.with_issue_tracker(Box::new(client));
            }
        } else {
            info!("Jira not configured, skipping tasks");
        }

        if config.gitlab.is_configured() {
            let client = GitLabClient::from_config(&config.gitlab, timeout);
            if let Some(client) = enabled("gitlab", client) {
                aggregator = aggregator.with_source_control(Box::new(client));
            }
        } else {
            info!("GitLab not configured, skipping");
        }

        if config.github.is_configured() {
            let client = GitHubClient::from_config(&config.github, timeout);
            if let Some(client) = enabled("github", client) {
                aggregator = aggregator.with_source_control(Box::new(client));
            }
        } else {
            info!("GitHub not configured, skipping");
        }

        aggregator
    }

    /// Names of the sources that will be queried.
    pub fn source_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if let Some(source) = &self.time_tracking {
            names.push(source.name());
        }
        if let Some(source) = &self.issue_tracker {
            names.push(source.name());
        }
        names.extend(self.source_control.iter().map(|s| s.name()));
        names
    }

    /// Query every source concurrently. Never fails: a source that errors or
    /// panics contributes its empty default.
    pub async fn collect(&self, day: &ReportDay) -> AggregatedDataset {
        let time_entries = async {
            match &self.time_tracking {
                Some(source) => isolate(source.name(), source.fetch_today(day)).await,
                None => Vec::new(),
            }
        };
        let issues = async {
            match &self.issue_tracker {
                Some(source) => isolate(source.name(), source.fetch_today(day)).await,
                None => IssueActivity::default(),
            }
        };
        let code = join_all(
            self.source_control
                .iter()
                .map(|source| isolate(source.name(), source.fetch_today(day))),
        );

        let (time_entries, issues, code) = futures::join!(time_entries, issues, code);

        let mut activity = SourceControlActivity::default();
        for part in code {
            activity.extend(part);
        }

        let dataset = AggregatedDataset {
            commits: activity.commits,
            tasks: issues.tasks,
            time_entries,
            boards: issues.boards,
            board_items: activity.board_items,
        };
        debug!(
            "Collected {} commits, {} time entries; report warranted: {}",
            dataset.commits.len(),
            dataset.time_entries.len(),
            should_generate(&dataset, self.require_time_entries)
        );
        dataset
    }

    pub fn gate(&self, dataset: &AggregatedDataset) -> GateDecision {
        gate(dataset, self.require_time_entries)
    }
}

fn enabled<T>(source: &str, built: Result<T, SourceError>) -> Option<T> {
    match built {
        Ok(client) => Some(client),
        Err(e) => {
            e.log(source, "configuring client");
            None
        }
    }
}

/// Await `fut`, turning a panic into the empty default.
async fn isolate<T, F>(name: &str, fut: F) -> T
where
    T: Default,
    F: Future<Output = T>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(output) => output,
        Err(_) => {
            error!("{} panicked while fetching, continuing without it", name);
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Board, Commit, Task, TaskBuckets};
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, Utc};

    fn day() -> ReportDay {
        ReportDay::for_date(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap())
    }

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn entry() -> TimeEntry {
        TimeEntry::new(
            "Fix bug".to_string(),
            "API".to_string(),
            None,
            ts("2024-05-02T09:00:00Z"),
            Some(ts("2024-05-02T09:45:00Z")),
            vec![],
        )
    }

    fn commit(project: &str) -> Commit {
        Commit {
            project_name: project.to_string(),
            project_path: format!("team/{}", project),
            message: "Fix login".to_string(),
            short_id: "abc1234".to_string(),
            committed_at: ts("2024-05-02T10:00:00Z"),
            web_url: String::new(),
            author_name: "Dev".to_string(),
            author_email: "dev@example.com".to_string(),
        }
    }

    fn task(key: &str) -> Task {
        Task {
            key: key.to_string(),
            summary: "Write docs".to_string(),
            status: "To Do".to_string(),
            status_category: crate::models::StatusCategory::ToDo,
            issue_type: "Task".to_string(),
            project_key: "API".to_string(),
            project_name: "API".to_string(),
            assignee: None,
            priority: None,
            description: None,
            created: None,
            updated: None,
            resolution_date: None,
            closed_date: None,
            start_date: None,
            labels: vec![],
            components: vec![],
            url: String::new(),
        }
    }

    struct FixedTime(Vec<TimeEntry>);

    #[async_trait]
    impl Source for FixedTime {
        type Output = Vec<TimeEntry>;
        fn name(&self) -> &'static str {
            "fixed-time"
        }
        async fn fetch_today(&self, _day: &ReportDay) -> Vec<TimeEntry> {
            self.0.clone()
        }
    }

    struct FixedIssues(IssueActivity);

    #[async_trait]
    impl Source for FixedIssues {
        type Output = IssueActivity;
        fn name(&self) -> &'static str {
            "fixed-issues"
        }
        async fn fetch_today(&self, _day: &ReportDay) -> IssueActivity {
            self.0.clone()
        }
    }

    struct FixedCode(SourceControlActivity);

    #[async_trait]
    impl Source for FixedCode {
        type Output = SourceControlActivity;
        fn name(&self) -> &'static str {
            "fixed-code"
        }
        async fn fetch_today(&self, _day: &ReportDay) -> SourceControlActivity {
            self.0.clone()
        }
    }

    struct Panicking;

    #[async_trait]
    impl Source for Panicking {
        type Output = SourceControlActivity;
        fn name(&self) -> &'static str {
            "panicking"
        }
        async fn fetch_today(&self, _day: &ReportDay) -> SourceControlActivity {
            panic!("unexpected payload");
        }
    }

    struct PanickingTime;

    #[async_trait]
    impl Source for PanickingTime {
        type Output = Vec<TimeEntry>;
        fn name(&self) -> &'static str {
            "panicking-time"
        }
        async fn fetch_today(&self, _day: &ReportDay) -> Vec<TimeEntry> {
            panic!("bad interval");
        }
    }

    fn code(projects: &[&str]) -> CodeSource {
        Box::new(FixedCode(SourceControlActivity {
            commits: projects.iter().map(|p| commit(p)).collect(),
            board_items: vec![],
        }))
    }

    #[tokio::test]
    async fn test_collect_merges_all_sources() {
        let issues = IssueActivity {
            tasks: TaskBuckets {
                in_progress: vec![task("API-1")],
                closed_today: vec![],
                all: vec![task("API-1"), task("API-2")],
            },
            boards: vec![Board {
                id: 1,
                name: "API".to_string(),
                board_type: "scrum".to_string(),
                project_key: Some("API".to_string()),
            }],
        };

        let aggregator = Aggregator::new(true)
            .with_time_tracking(Box::new(FixedTime(vec![entry()])))
            .with_issue_tracker(Box::new(FixedIssues(issues)))
            .with_source_control(code(&["api"]))
            .with_source_control(code(&["web", "docs"]));

        let dataset = aggregator.collect(&day()).await;
        assert_eq!(dataset.time_entries.len(), 1);
        assert_eq!(dataset.total_minutes(), 45);
        assert_eq!(dataset.tasks.all.len(), 2);
        assert_eq!(dataset.boards.len(), 1);
        let projects: Vec<&str> = dataset.commits.iter().map(|c| c.project_name.as_str()).collect();
        assert_eq!(projects, vec!["api", "web", "docs"]);
        assert_eq!(aggregator.gate(&dataset), GateDecision::Proceed);
    }

    #[tokio::test]
    async fn test_collect_survives_panicking_sources() {
        let aggregator = Aggregator::new(false)
            .with_time_tracking(Box::new(PanickingTime))
            .with_source_control(Box::new(Panicking))
            .with_source_control(code(&["api"]));

        let dataset = aggregator.collect(&day()).await;
        assert!(dataset.time_entries.is_empty());
        assert_eq!(dataset.commits.len(), 1);
        assert!(dataset.tasks.is_empty());
    }

    #[tokio::test]
    async fn test_collect_without_sources_is_empty() {
        let aggregator = Aggregator::new(true);
        assert!(aggregator.source_names().is_empty());

        let dataset = aggregator.collect(&day()).await;
        assert_eq!(dataset, AggregatedDataset::default());
        assert_eq!(
            aggregator.gate(&dataset),
            GateDecision::Skipped(SkipReason::NoTimeEntries)
        );
    }

    #[test]
    fn test_gate_with_mandatory_time_tracking() {
        let mut dataset = AggregatedDataset {
            commits: vec![commit("api")],
            ..AggregatedDataset::default()
        };
        assert!(!should_generate(&dataset, true));

        dataset.time_entries.push(entry());
        assert!(should_generate(&dataset, true));
    }

    #[test]
    fn test_gate_without_mandatory_time_tracking() {
        let empty = AggregatedDataset::default();
        assert_eq!(
            gate(&empty, false),
            GateDecision::Skipped(SkipReason::NoActivity)
        );

        let only_open_tasks = AggregatedDataset {
            tasks: TaskBuckets {
                all: vec![task("API-9")],
                ..TaskBuckets::default()
            },
            ..AggregatedDataset::default()
        };
        assert_eq!(
            gate(&only_open_tasks, false),
            GateDecision::Skipped(SkipReason::NoActivity)
        );

        let closed_today = AggregatedDataset {
            tasks: TaskBuckets {
                closed_today: vec![task("API-7")],
                ..TaskBuckets::default()
            },
            ..AggregatedDataset::default()
        };
        assert!(should_generate(&closed_today, false));

        let only_boards = AggregatedDataset {
            boards: vec![Board {
                id: 3,
                name: "Ops".to_string(),
                board_type: "kanban".to_string(),
                project_key: None,
            }],
            ..AggregatedDataset::default()
        };
        assert!(!should_generate(&only_boards, false));
    }

    #[test]
    fn test_unconfigured_sources_are_left_out() {
        let mut config = Config::default();
        config.jira.url = Some("https://acme.atlassian.net".to_string());
        config.gitlab.token = Some("glpat".to_string());

        let aggregator = Aggregator::from_config(&config);
        assert_eq!(aggregator.source_names(), vec!["gitlab"]);
    }
}
