//! Plain-text rendering of a collected dataset for the LLM prompt.
//!
//! Every section is always present; an empty one says so explicitly so the
//! model never has to guess whether data was missing or just not fetched.

use crate::models::{
    format_minutes, AggregatedDataset, Board, BoardItem, Commit, Task, TaskBuckets, TimeEntry,
};

/// How many open tasks are listed before the rest are summarized.
pub const MAX_LISTED_TASKS: usize = 10;

/// Render the whole dataset.
pub fn format_dataset(dataset: &AggregatedDataset) -> String {
    let mut output = String::new();

    output.push_str(&format_commits(&dataset.commits));
    output.push('\n');
    output.push_str(&format_tasks(&dataset.tasks, &dataset.boards));
    output.push('\n');
    output.push_str(&format_board_items(&dataset.board_items));
    output.push('\n');
    output.push_str(&format_time_entries(&dataset.time_entries));

    output
}

/// Commits grouped by project, in first-seen order.
pub fn format_commits(commits: &[Commit]) -> String {
    let mut section = String::from("## Commits\n\n");

    if commits.is_empty() {
        section.push_str("No commits today.\n");
        return section;
    }

    let mut projects: Vec<(&str, Vec<&Commit>)> = Vec::new();
    for commit in commits {
        match projects.iter().position(|(name, _)| *name == commit.project_path) {
            Some(index) => projects[index].1.push(commit),
            None => projects.push((commit.project_path.as_str(), vec![commit])),
        }
    }

    for (project, group) in projects {
        section.push_str(&format!("### {}\n", project));
        for commit in group {
            section.push_str(&format!(
                "- {} ({})\n",
                commit.title(),
                commit.committed_at.format("%Y-%m-%d")
            ));
        }
        section.push('\n');
    }

    section
}

/// Workflow status, followed by the normalized category when they differ.
fn status_label(task: &Task) -> String {
    let category = task.status_category.to_string();
    if task.status.eq_ignore_ascii_case(&category) {
        task.status.clone()
    } else {
        format!("{} ({})", task.status, category)
    }
}

fn task_line(task: &Task) -> String {
    format!(
        "- [{}] {} - {} (project: {})\n",
        task.key,
        task.summary,
        status_label(task),
        task.project_key
    )
}

/// Jira views plus the boards line.
pub fn format_tasks(tasks: &TaskBuckets, boards: &[Board]) -> String {
    let mut section = String::from("## Jira tasks\n\n");

    section.push_str("### In progress\n");
    if tasks.in_progress.is_empty() {
        section.push_str("None.\n");
    }
    for task in &tasks.in_progress {
        section.push_str(&task_line(task));
    }
    section.push('\n');

    section.push_str("### Closed today\n");
    if tasks.closed_today.is_empty() {
        section.push_str("None.\n");
    }
    for task in &tasks.closed_today {
        section.push_str(&task_line(task));
    }
    section.push('\n');

    section.push_str(&format!("### Active tasks: {}\n", tasks.all.len()));
    for task in tasks.all.iter().take(MAX_LISTED_TASKS) {
        section.push_str(&format!(
            "- [{}] {} - {}\n",
            task.key,
            task.summary,
            status_label(task)
        ));
    }
    if tasks.all.len() > MAX_LISTED_TASKS {
        section.push_str(&format!(
            "... and {} more\n",
            tasks.all.len() - MAX_LISTED_TASKS
        ));
    }
    section.push('\n');

    if boards.is_empty() {
        section.push_str("Boards: none\n");
    } else {
        let names: Vec<&str> = boards.iter().map(|b| b.name.as_str()).collect();
        section.push_str(&format!("Boards: {}\n", names.join(", ")));
    }

    section
}

/// Project-board items scheduled for the day.
pub fn format_board_items(items: &[BoardItem]) -> String {
    let mut section = String::from("## Board items\n\n");

    if items.is_empty() {
        section.push_str("No board items scheduled for today.\n");
        return section;
    }

    for item in items {
        let mut line = match item.number {
            Some(number) => format!("- #{} {}", number, item.title),
            None => format!("- {}", item.title),
        };
        if let Some(status) = item.status.as_deref().or(item.state.as_deref()) {
            line.push_str(&format!(" [{}]", status));
        }
        if let Some(end) = item.end_date {
            line.push_str(&format!(" (due {})", end));
        }
        section.push_str(&line);
        section.push('\n');
    }

    section
}

/// Time entries with durations and the day's total.
pub fn format_time_entries(entries: &[TimeEntry]) -> String {
    let mut section = String::from("## Time tracking\n\n");

    if entries.is_empty() {
        section.push_str("No time entries today.\n");
        return section;
    }

    for entry in entries {
        let duration = if entry.is_running {
            "running".to_string()
        } else {
            format_minutes(entry.duration_minutes)
        };
        section.push_str(&format!(
            "- {} ({}) - {}\n",
            entry.display_name(),
            entry.project_name,
            duration
        ));
    }

    let total: u64 = entries.iter().map(|e| e.duration_minutes).sum();
    section.push_str(&format!(
        "\n**Total time: {}h {}m**\n",
        total / 60,
        total % 60
    ));

    section
}

/// Dataset sections followed by the rendered instructions.
pub fn build_user_prompt(dataset: &AggregatedDataset, instructions: &str) -> String {
    format!("{}\n\n{}", format_dataset(dataset).trim_end(), instructions.trim())
        .trim()
        .to_string()
}
