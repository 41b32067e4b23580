//! Page-by-page fetching for paginated APIs.

use crate::error::SourceResult;
use std::future::Future;
use tracing::{debug, warn};

/// Upper bound on pages per query, for servers that ignore the page size.
pub const MAX_PAGES: usize = 1000;

/// One page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// 1-based page number.
    pub number: usize,
    /// Requested page size.
    pub size: usize,
}

/// Fetch pages until one comes back shorter than `page_size`.
///
/// Records keep page order. A failing first page is an error; a failure on
/// a later page ends the loop and returns what was collected so far.
pub async fn paginate<T, F, Fut>(page_size: usize, mut fetch_page: F) -> SourceResult<Vec<T>>
where
    F: FnMut(Page) -> Fut,
    Fut: Future<Output = SourceResult<Vec<T>>>,
{
    let size = page_size.max(1);
    let mut records = Vec::new();

    for number in 1..=MAX_PAGES {
        let page = Page { number, size };
        let batch = match fetch_page(page).await {
            Ok(batch) => batch,
            Err(e) if number == 1 => return Err(e),
            Err(e) => {
                warn!(
                    "Page {} failed ({}), keeping {} records from earlier pages",
                    number,
                    e,
                    records.len()
                );
                return Ok(records);
            }
        };

        let len = batch.len();
        records.extend(batch);
        debug!("Page {} returned {} records", number, len);

        if len < size {
            return Ok(records);
        }
    }

    warn!("Stopped after {} pages", MAX_PAGES);
    Ok(records)
}

/// One page of a cursor-paginated result.
#[derive(Debug)]
pub struct CursorPage<T> {
    pub records: Vec<T>,
    /// Cursor of the following page; `None` on the last one.
    pub next: Option<String>,
}

/// Fetch pages by cursor until the server stops handing one out.
///
/// `fetch_page` gets `None` for the first page. An empty page or a cursor
/// the server already returned also ends the loop. Errors are handled as in
/// [`paginate`].
pub async fn paginate_cursor<T, F, Fut>(mut fetch_page: F) -> SourceResult<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = SourceResult<CursorPage<T>>>,
{
    let mut records = Vec::new();
    let mut cursor: Option<String> = None;

    for number in 1..=MAX_PAGES {
        let page = match fetch_page(cursor.clone()).await {
            Ok(page) => page,
            Err(e) if number == 1 => return Err(e),
            Err(e) => {
                warn!(
                    "Page {} failed ({}), keeping {} records from earlier pages",
                    number,
                    e,
                    records.len()
                );
                return Ok(records);
            }
        };

        let len = page.records.len();
        records.extend(page.records);
        debug!("Page {} returned {} records", number, len);

        match page.next {
            Some(next) if len > 0 && cursor.as_deref() != Some(next.as_str()) => {
                cursor = Some(next);
            }
            Some(next) if len > 0 => {
                warn!("Server repeated page cursor {}, stopping", next);
                return Ok(records);
            }
            _ => return Ok(records),
        }
    }

    warn!("Stopped after {} pages", MAX_PAGES);
    Ok(records)
}
