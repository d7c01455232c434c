use anyhow::Result;
use tracing::{debug, warn};
use url::Url;

use crate::fetch::{FetchClient, FetchOutcome};
use crate::parser::review::{parse_review_page, ParentFields, ReviewRecord};

#[derive(Debug, Clone, Copy)]
pub struct ReviewLimits {
    /// Listing pages to fetch per movie, the first page included.
    pub page_budget: usize,
    pub max_reviews: usize,
}

/// Collect reviews for one movie, following "load more" tokens within `limits`.
///
/// Failing to fetch the first page is an error; a later page failing ends
/// pagination with what was already collected.
pub fn collect_reviews(
    client: &FetchClient,
    reviews_url: &str,
    parent: &ParentFields,
    limits: &ReviewLimits,
) -> Result<Vec<ReviewRecord>> {
    let first = match client.fetch(reviews_url)? {
        FetchOutcome::Page(doc) => parse_review_page(&doc, parent),
        FetchOutcome::Skipped => return Ok(Vec::new()),
    };

    let page_budget = limits.page_budget.max(1);
    let mut reviews = first.reviews;
    let mut continuation = first.continuation;
    let mut pages = 1;
    let mut used_key: Option<String> = None;

    while let Some(next) = continuation.take() {
        if pages >= page_budget || reviews.len() >= limits.max_reviews {
            break;
        }
        if used_key.as_deref() == Some(next.key.as_str()) {
            warn!(url = reviews_url, key = %next.key, "continuation token repeated");
            break;
        }
        let Some(endpoint) = ajax_endpoint(reviews_url, next.ajax_path.as_deref()) else {
            warn!(url = reviews_url, "no endpoint for continuation token");
            break;
        };

        let query = [("ref_", "undefined"), ("paginationKey", next.key.as_str())];
        match client.fetch_with_query(&endpoint, &query) {
            Ok(FetchOutcome::Page(doc)) => {
                let page = parse_review_page(&doc, parent);
                pages += 1;
                debug!(url = reviews_url, page = pages, found = page.reviews.len(), "review page");
                reviews.extend(page.reviews);
                continuation = page.continuation;
            }
            Ok(FetchOutcome::Skipped) => break,
            Err(e) => {
                warn!(url = reviews_url, page = pages + 1, error = %e, "stopping pagination");
                break;
            }
        }
        used_key = Some(next.key);
    }

    reviews.truncate(limits.max_reviews);
    Ok(reviews)
}

/// Endpoint serving the next batch: `ajax_path` when the page gave one,
/// otherwise `/title/<id>/reviews/_ajax` on the listing's host.
pub fn ajax_endpoint(reviews_url: &str, ajax_path: Option<&str>) -> Option<String> {
    let base = Url::parse(reviews_url).ok()?;
    if let Some(path) = ajax_path {
        return base.join(path).ok().map(String::from);
    }
    let mut segments = base.path_segments()?;
    segments.find(|s| *s == "title")?;
    let id = segments.next().filter(|id| !id.is_empty())?;
    base.join(&format!("/title/{}/reviews/_ajax", id))
        .ok()
        .map(String::from)
}
