//! Source clients for the external activity APIs.
//!
//! Every client implements [`Source`]: construction resolves credentials
//! (failing with a configuration error), and `fetch_today` never fails,
//! logging any request error and returning the empty default instead.

pub mod clockify;
pub mod github;
pub mod gitlab;
pub mod http;
pub mod jira;
pub mod paging;

#[cfg(test)]
pub(crate) mod stub;

pub use clockify::ClockifyClient;
pub use github::GitHubClient;
pub use gitlab::GitLabClient;
pub use jira::JiraClient;

use crate::error::SourceResult;
use crate::models::{Commit, ReportDay};
use async_trait::async_trait;
use futures::future::join_all;
use std::fmt::Display;
use std::future::Future;
use tracing::info;

/// How many repositories/projects are queried at once.
pub const REPOSITORY_CONCURRENCY: usize = 4;

/// One external system queried for the day's activity.
#[async_trait]
pub trait Source: Send + Sync {
    /// Normalized records; `Default` is the empty result used on failure.
    type Output: Default + Send;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Retrieve and normalize everything relevant to `day`. Never fails.
    async fn fetch_today(&self, day: &ReportDay) -> Self::Output;
}

/// Unwrap a source result, logging the error and substituting the default.
pub fn or_empty<T: Default>(source: &str, context: &str, result: SourceResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            e.log(source, context);
            T::default()
        }
    }
}

/// Run `fetch` for every item, `concurrency` at a time, and concatenate the
/// results in item order. A failing item is logged and skipped; the
/// others still contribute.
pub async fn collect_each<'a, I, R, F, Fut>(
    source: &str,
    items: &'a [I],
    concurrency: usize,
    fetch: F,
) -> Vec<R>
where
    I: Display,
    F: Fn(&'a I) -> Fut,
    Fut: Future<Output = SourceResult<Vec<R>>>,
{
    let fetch = &fetch;
    let mut results: Vec<(&I, SourceResult<Vec<R>>)> = Vec::with_capacity(items.len());
    for chunk in items.chunks(concurrency.max(1)) {
        let batch = join_all(chunk.iter().map(|item| async move { (item, fetch(item).await) }));
        results.extend(batch.await);
    }

    let mut records = Vec::new();
    for (item, result) in results {
        match result {
            Ok(batch) => {
                if !batch.is_empty() {
                    info!("{}: {} records from {}", source, batch.len(), item);
                }
                records.extend(batch);
            }
            Err(e) => e.log(source, &format!("skipping {}", item)),
        }
    }
    records
}

/// Keep only commits by `author`; no filter keeps everything.
pub fn filter_by_author(commits: Vec<Commit>, author: Option<&str>) -> Vec<Commit> {
    match author {
        Some(email) => commits
            .into_iter()
            .filter(|c| c.is_authored_by(email))
            .collect(),
        None => commits,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;

    #[tokio::test]
    async fn test_collect_each_continues_after_failure() {
        let repos = vec!["first".to_string(), "second".to_string(), "third".to_string()];

        let commits = collect_each("test", &repos, 1, |repo| async move {
            if repo == "second" {
                Err(SourceError::Transient("502 from second".to_string()))
            } else {
                Ok(vec![format!("{}-commit", repo)])
            }
        })
        .await;

        assert_eq!(commits, vec!["first-commit", "third-commit"]);
    }

    #[tokio::test]
    async fn test_collect_each_keeps_item_order_when_concurrent() {
        let items: Vec<u64> = vec![30, 10, 20];
        let out = collect_each("test", &items, 3, |delay| async move {
            tokio::time::sleep(std::time::Duration::from_millis(*delay)).await;
            Ok(vec![*delay])
        })
        .await;
        assert_eq!(out, vec![30, 10, 20]);
    }

    #[test]
    fn test_or_empty() {
        let ok: Vec<u8> = or_empty("test", "ctx", Ok(vec![1]));
        assert_eq!(ok, vec![1]);
        let failed: Vec<u8> = or_empty("test", "ctx", Err(SourceError::NotFound("x".into())));
        assert!(failed.is_empty());
    }
}
