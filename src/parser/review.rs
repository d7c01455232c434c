use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::Lookup;
use crate::document::DocumentView;
use crate::text::SENTINEL;

static HELPFUL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d,]+)\s+out\s+of\s+([\d,]+)").unwrap());

/// Movie columns copied onto every review row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParentFields {
    pub title: String,
    pub url: String,
    pub director: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub movie_title: String,
    pub movie_url: String,
    pub director: String,
    pub review_title: String,
    pub author: String,
    pub date: String,
    pub content: String,
    pub user_rating: String,
    pub helpful_votes: String,
    pub total_votes: String,
}

pub const REVIEW_HEADERS: [&str; 10] = [
    "movie_title",
    "movie_url",
    "director",
    "review_title",
    "author",
    "date",
    "content",
    "user_rating",
    "helpful_votes",
    "total_votes",
];

/// Reviews are checkpointed per movie.
pub const REVIEW_KEY: &str = "movie_url";

impl ReviewRecord {
    fn stamped(parent: &ParentFields) -> Self {
        let na = || SENTINEL.to_string();
        ReviewRecord {
            movie_title: parent.title.clone(),
            movie_url: parent.url.clone(),
            director: parent.director.clone(),
            review_title: na(),
            author: na(),
            date: na(),
            content: na(),
            user_rating: na(),
            helpful_votes: na(),
            total_votes: na(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReviewField {
    Title,
    Author,
    Date,
    Content,
    Rating,
}

const REVIEW_ITEM: &str = ".lister-item-content";

const REVIEW_RULES: &[(ReviewField, Lookup)] = &[
    (ReviewField::Title, Lookup::Text(".title")),
    (ReviewField::Author, Lookup::Text(".display-name-link")),
    (ReviewField::Date, Lookup::Text(".review-date")),
    (ReviewField::Content, Lookup::Markup(".text")),
    (ReviewField::Rating, Lookup::Text("span.rating-other-user-rating > span")),
];

/// "Load more" token and the endpoint it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    pub key: String,
    /// Path from `data-ajaxurl`, when the page provides one.
    pub ajax_path: Option<String>,
}

#[derive(Debug)]
pub struct ReviewPage {
    pub reviews: Vec<ReviewRecord>,
    pub continuation: Option<Continuation>,
}

/// Parse one listing page (full page or ajax fragment).
pub fn parse_review_page<D: DocumentView>(doc: &D, parent: &ParentFields) -> ReviewPage {
    let reviews = doc
        .sections(REVIEW_ITEM)
        .iter()
        .map(|item| parse_review(item, parent))
        .collect();

    let continuation = doc
        .attr_at(".load-more-data", "data-key")
        .map(|key| Continuation {
            key,
            ajax_path: doc.attr_at(".load-more-data", "data-ajaxurl"),
        });

    ReviewPage {
        reviews,
        continuation,
    }
}

fn parse_review<D: DocumentView>(item: &D, parent: &ParentFields) -> ReviewRecord {
    let mut review = ReviewRecord::stamped(parent);
    for (field, lookup) in REVIEW_RULES {
        let value = lookup.apply(item, None);
        match field {
            ReviewField::Title => review.review_title = value,
            ReviewField::Author => review.author = value,
            ReviewField::Date => review.date = value,
            ReviewField::Content => review.content = value,
            ReviewField::Rating => review.user_rating = value,
        }
    }
    if let Some((helpful, total)) = item
        .text_at(".actions")
        .and_then(|text| helpful_votes(&text))
    {
        review.helpful_votes = helpful;
        review.total_votes = total;
    }
    review
}

/// "12 out of 15 found this helpful." -> ("12", "15")
pub fn helpful_votes(text: &str) -> Option<(String, String)> {
    let caps = HELPFUL_RE.captures(text)?;
    Some((caps[1].replace(',', ""), caps[2].replace(',', "")))
}
