//! Data models for the daily report.
//!
//! Every source normalizes its raw API payloads into the records defined
//! here. Downstream code (the gate, the prompt formatter) only ever sees
//! these types, never raw JSON.

use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The calendar day a run reports on.
///
/// `start`/`end` bound the time-tracking query; commit history and Jira
/// predicates are derived from `date`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportDay {
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReportDay {
    /// The caller's local calendar day, with its midnight expressed in UTC.
    pub fn local_today() -> Self {
        let now = Local::now();
        let date = now.date_naive();
        let start = date
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| utc_midnight(date));
        Self::with_start(date, start)
    }

    /// A specific day, bounded by UTC midnight.
    pub fn for_date(date: NaiveDate) -> Self {
        Self::with_start(date, utc_midnight(date))
    }

    fn with_start(date: NaiveDate, start: DateTime<Utc>) -> Self {
        Self {
            date,
            start,
            end: start + Duration::days(1) - Duration::seconds(1),
        }
    }

    /// `YYYY-MM-DD`, the form Jira JQL date predicates expect.
    pub fn iso_date(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// Commit-history window: `[date 00:00:00Z, date 23:59:59Z]`.
    pub fn commit_window(&self) -> (String, String) {
        let day = self.iso_date();
        (format!("{}T00:00:00Z", day), format!("{}T23:59:59Z", day))
    }
}

fn utc_midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
}

/// Format a UTC timestamp the way the tracker APIs accept it (`...Z`).
pub fn to_api_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// A single time-tracking entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub description: String,
    pub project_name: String,
    pub task_name: Option<String>,
    /// Whole minutes between start and end; 0 while running.
    pub duration_minutes: u64,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub is_running: bool,
    pub tags: Vec<String>,
}

impl TimeEntry {
    pub fn new(
        description: String,
        project_name: String,
        task_name: Option<String>,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            description,
            project_name,
            task_name,
            duration_minutes: duration_minutes(start, end),
            start,
            end,
            is_running: end.is_none(),
            tags,
        }
    }

    /// Description for display, with a placeholder for blank entries.
    pub fn display_name(&self) -> &str {
        if self.description.trim().is_empty() {
            "No description"
        } else {
            &self.description
        }
    }
}

/// Floor of the elapsed minutes; running or inverted spans yield 0.
pub fn duration_minutes(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> u64 {
    match end {
        Some(end) => {
            let seconds = (end - start).num_seconds();
            if seconds <= 0 {
                0
            } else {
                (seconds / 60) as u64
            }
        }
        None => 0,
    }
}

/// Render minutes as `2h 5m` or `45m`.
pub fn format_minutes(minutes: u64) -> String {
    let hours = minutes / 60;
    let mins = minutes % 60;
    if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else {
        format!("{}m", mins)
    }
}

/// A commit authored on the report day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub project_name: String,
    pub project_path: String,
    /// Full commit message.
    pub message: String,
    pub short_id: String,
    pub committed_at: DateTime<Utc>,
    pub web_url: String,
    pub author_name: String,
    pub author_email: String,
}

impl Commit {
    /// First line of the message.
    pub fn title(&self) -> &str {
        self.message.lines().next().unwrap_or("").trim()
    }

    /// Case-insensitive exact match on the author address.
    pub fn is_authored_by(&self, email: &str) -> bool {
        self.author_email.eq_ignore_ascii_case(email.trim())
    }
}

/// Controlled vocabulary for issue status buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCategory {
    ToDo,
    InProgress,
    Done,
    Blocked,
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCategory::ToDo => write!(f, "To Do"),
            StatusCategory::InProgress => write!(f, "In Progress"),
            StatusCategory::Done => write!(f, "Done"),
            StatusCategory::Blocked => write!(f, "Blocked"),
        }
    }
}

impl StatusCategory {
    /// Resolve a category from the tracker's category key/name and the
    /// free-text status name.
    ///
    /// Blocking statuses win over the tracker category, because Jira files
    /// "Blocked" and "On Hold" under whatever category the workflow chose.
    pub fn resolve(category: Option<&str>, status_name: &str) -> Self {
        let status = status_name.to_lowercase();
        if status.contains("block") || status.contains("on hold") {
            return StatusCategory::Blocked;
        }

        match category.map(|c| c.trim().to_lowercase()).as_deref() {
            Some("indeterminate") | Some("in progress") | Some("in_progress") => {
                StatusCategory::InProgress
            }
            Some("done") | Some("complete") | Some("completed") => StatusCategory::Done,
            Some("new") | Some("to do") | Some("todo") | Some("undefined") => StatusCategory::ToDo,
            _ => Self::from_status_name(&status),
        }
    }

    fn from_status_name(status: &str) -> Self {
        match status {
            "in progress" | "in review" | "review" | "testing" => StatusCategory::InProgress,
            "done" | "closed" | "resolved" => StatusCategory::Done,
            _ => StatusCategory::ToDo,
        }
    }
}

/// An issue-tracker task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub key: String,
    pub summary: String,
    pub status: String,
    pub status_category: StatusCategory,
    pub issue_type: String,
    pub project_key: String,
    pub project_name: String,
    pub assignee: Option<String>,
    pub priority: Option<String>,
    /// Plain text, bounded length.
    pub description: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub resolution_date: Option<DateTime<Utc>>,
    pub closed_date: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
    pub labels: Vec<String>,
    pub components: Vec<String>,
    pub url: String,
}

/// Named task views returned by the issue tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskBucket {
    InProgress,
    ClosedToday,
    All,
}

impl TaskBucket {
    pub const ALL: [TaskBucket; 3] = [
        TaskBucket::InProgress,
        TaskBucket::ClosedToday,
        TaskBucket::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskBucket::InProgress => "in_progress",
            TaskBucket::ClosedToday => "closed_today",
            TaskBucket::All => "all",
        }
    }
}

impl fmt::Display for TaskBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tasks grouped by view. Each bucket is empty, never absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskBuckets {
    pub in_progress: Vec<Task>,
    pub closed_today: Vec<Task>,
    pub all: Vec<Task>,
}

impl TaskBuckets {
    pub fn get(&self, bucket: TaskBucket) -> &[Task] {
        match bucket {
            TaskBucket::InProgress => &self.in_progress,
            TaskBucket::ClosedToday => &self.closed_today,
            TaskBucket::All => &self.all,
        }
    }

    pub fn is_empty(&self) -> bool {
        TaskBucket::ALL.iter().all(|b| self.get(*b).is_empty())
    }

    /// Whether any task moved today: in progress or closed today. The
    /// "all open" bucket is standing backlog and does not count.
    pub fn has_daily_activity(&self) -> bool {
        !self.in_progress.is_empty() || !self.closed_today.is_empty()
    }
}

/// An agile board visible to the issue-tracker user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: u64,
    pub name: String,
    pub board_type: String,
    pub project_key: Option<String>,
}

/// Everything the issue tracker contributes to a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueActivity {
    pub tasks: TaskBuckets,
    pub boards: Vec<Board>,
}

/// An item on a source-control project board scheduled for the day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardItem {
    pub title: String,
    pub url: Option<String>,
    pub state: Option<String>,
    pub number: Option<u64>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Everything a source-control host contributes to a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceControlActivity {
    pub commits: Vec<Commit>,
    pub board_items: Vec<BoardItem>,
}

impl SourceControlActivity {
    pub fn extend(&mut self, other: SourceControlActivity) {
        self.commits.extend(other.commits);
        self.board_items.extend(other.board_items);
    }
}

/// The merged result of one collection run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedDataset {
    pub commits: Vec<Commit>,
    pub tasks: TaskBuckets,
    pub time_entries: Vec<TimeEntry>,
    pub boards: Vec<Board>,
    pub board_items: Vec<BoardItem>,
}

impl AggregatedDataset {
    /// Total tracked minutes across all entries.
    pub fn total_minutes(&self) -> u64 {
        self.time_entries.iter().map(|e| e.duration_minutes).sum()
    }

    /// True when nothing happened on the day. Boards and the open-task
    /// backlog are context and do not count as activity.
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
            && !self.tasks.has_daily_activity()
            && self.time_entries.is_empty()
            && self.board_items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_duration_floor() {
        let start = ts("2024-05-02T09:00:00Z");
        assert_eq!(duration_minutes(start, Some(ts("2024-05-02T09:45:00Z"))), 45);
        assert_eq!(duration_minutes(start, Some(ts("2024-05-02T09:45:59Z"))), 45);
        assert_eq!(duration_minutes(start, Some(ts("2024-05-02T09:00:59Z"))), 0);
        assert_eq!(duration_minutes(start, Some(ts("2024-05-02T08:00:00Z"))), 0);
        assert_eq!(duration_minutes(start, None), 0);
    }

    #[test]
    fn test_time_entry_running_flag() {
        let finished = TimeEntry::new(
            "Fix bug".to_string(),
            "API".to_string(),
            None,
            ts("2024-05-02T09:00:00Z"),
            Some(ts("2024-05-02T09:45:00Z")),
            vec![],
        );
        assert_eq!(finished.duration_minutes, 45);
        assert!(!finished.is_running);

        let running = TimeEntry::new(
            String::new(),
            "API".to_string(),
            None,
            ts("2024-05-02T09:00:00Z"),
            None,
            vec![],
        );
        assert!(running.is_running);
        assert_eq!(running.duration_minutes, 0);
        assert_eq!(running.display_name(), "No description");
    }

    #[test]
    fn test_report_day_bounds() {
        let day = ReportDay::for_date(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());
        assert_eq!(to_api_timestamp(&day.start), "2024-05-02T00:00:00Z");
        assert_eq!(to_api_timestamp(&day.end), "2024-05-02T23:59:59Z");
        assert_eq!(day.iso_date(), "2024-05-02");
        let (since, until) = day.commit_window();
        assert_eq!(since, "2024-05-02T00:00:00Z");
        assert_eq!(until, "2024-05-02T23:59:59Z");
    }

    #[test]
    fn test_local_today_spans_one_day() {
        let day = ReportDay::local_today();
        assert_eq!((day.end - day.start).num_seconds(), 86_399);
    }

    #[test]
    fn test_format_minutes() {
        assert_eq!(format_minutes(45), "45m");
        assert_eq!(format_minutes(125), "2h 5m");
        assert_eq!(format_minutes(0), "0m");
    }

    #[test]
    fn test_commit_title_and_author() {
        let commit = Commit {
            project_name: "api".to_string(),
            project_path: "team/api".to_string(),
            message: "Fix login\n\nLonger body".to_string(),
            short_id: "abc123".to_string(),
            committed_at: ts("2024-05-02T10:00:00Z"),
            web_url: String::new(),
            author_name: "Dev".to_string(),
            author_email: "Dev@Example.com".to_string(),
        };
        assert_eq!(commit.title(), "Fix login");
        assert!(commit.message.contains("Longer body"));
        assert!(commit.is_authored_by("dev@example.com"));
        assert!(!commit.is_authored_by("dev@example.org"));
    }

    #[test]
    fn test_status_category_resolution() {
        assert_eq!(
            StatusCategory::resolve(Some("indeterminate"), "In Review"),
            StatusCategory::InProgress
        );
        assert_eq!(
            StatusCategory::resolve(Some("In Progress"), "Doing"),
            StatusCategory::InProgress
        );
        assert_eq!(StatusCategory::resolve(Some("done"), "Closed"), StatusCategory::Done);
        assert_eq!(
            StatusCategory::resolve(Some("indeterminate"), "Blocked by vendor"),
            StatusCategory::Blocked
        );
        assert_eq!(StatusCategory::resolve(None, "Resolved"), StatusCategory::Done);
        assert_eq!(
            StatusCategory::resolve(Some("something odd"), "Whatever"),
            StatusCategory::ToDo
        );
    }

    #[test]
    fn test_task_buckets_by_name() {
        let buckets = TaskBuckets::default();
        assert!(buckets.is_empty());
        let names: Vec<_> = TaskBucket::ALL.iter().map(|b| b.as_str()).collect();
        assert_eq!(names, vec!["in_progress", "closed_today", "all"]);
        assert!(buckets.get(TaskBucket::All).is_empty());
    }

    #[test]
    fn test_dataset_defaults_are_empty() {
        let dataset = AggregatedDataset::default();
        assert!(dataset.is_empty());
        assert_eq!(dataset.total_minutes(), 0);
        let json = serde_json::to_value(&dataset).unwrap();
        assert!(json["commits"].as_array().unwrap().is_empty());
        assert!(json["tasks"]["closed_today"].as_array().unwrap().is_empty());
    }
}
