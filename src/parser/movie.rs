use serde::{Deserialize, Serialize};
use url::Url;

use super::{LabelMatch, Lookup};
use crate::document::DocumentView;
use crate::text::SENTINEL;

/// One row of the details store. Column order is the serialization order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieRecord {
    pub title: String,
    pub url: String,
    pub rating: String,
    pub director: String,
    pub gross_worldwide: String,
    pub opening_weekend: String,
    pub budget: String,
    pub writers: String,
    pub languages: String,
    pub countries: String,
    pub filming_locations: String,
    pub production_companies: String,
    pub release_date: String,
    pub reviews_url: String,
}

pub const MOVIE_HEADERS: [&str; 14] = [
    "title",
    "url",
    "rating",
    "director",
    "gross_worldwide",
    "opening_weekend",
    "budget",
    "writers",
    "languages",
    "countries",
    "filming_locations",
    "production_companies",
    "release_date",
    "reviews_url",
];

/// Natural key column of the details store.
pub const MOVIE_KEY: &str = "url";

impl Default for MovieRecord {
    fn default() -> Self {
        let na = || SENTINEL.to_string();
        MovieRecord {
            title: na(),
            url: na(),
            rating: na(),
            director: na(),
            gross_worldwide: na(),
            opening_weekend: na(),
            budget: na(),
            writers: na(),
            languages: na(),
            countries: na(),
            filming_locations: na(),
            production_companies: na(),
            release_date: na(),
            reviews_url: na(),
        }
    }
}

/// Fields filled from the page (the URL comes from the task).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Rating,
    Director,
    GrossWorldwide,
    OpeningWeekend,
    Budget,
    Writers,
    Languages,
    Countries,
    FilmingLocations,
    ProductionCompanies,
    ReleaseDate,
    ReviewsUrl,
}

impl MovieRecord {
    fn slot_mut(&mut self, field: Field) -> &mut String {
        match field {
            Field::Title => &mut self.title,
            Field::Rating => &mut self.rating,
            Field::Director => &mut self.director,
            Field::GrossWorldwide => &mut self.gross_worldwide,
            Field::OpeningWeekend => &mut self.opening_weekend,
            Field::Budget => &mut self.budget,
            Field::Writers => &mut self.writers,
            Field::Languages => &mut self.languages,
            Field::Countries => &mut self.countries,
            Field::FilmingLocations => &mut self.filming_locations,
            Field::ProductionCompanies => &mut self.production_companies,
            Field::ReleaseDate => &mut self.release_date,
            Field::ReviewsUrl => &mut self.reviews_url,
        }
    }
}

const CREDIT_ITEM: &str = r#"li[data-testid="title-pc-principal-credit"]"#;
const LIST_ITEM: &str = "li.ipc-metadata-list__item";
const LIST_LABEL: &str = ".ipc-metadata-list-item__label";
const LIST_VALUE: &str = ".ipc-metadata-list-item__list-content-item";

const fn credits(label: &'static str) -> Lookup {
    Lookup::Labeled {
        item: CREDIT_ITEM,
        label_at: LIST_LABEL,
        label,
        matching: LabelMatch::Prefix,
        value_at: LIST_VALUE,
        first_only: false,
    }
}

/// Box-office row whose label is exactly `label`; yields its first value.
pub const fn labeled_list_item(label: &'static str) -> Lookup {
    Lookup::Labeled {
        item: LIST_ITEM,
        label_at: "span",
        label,
        matching: LabelMatch::Exact,
        value_at: "span.ipc-metadata-list-item__list-content-item",
        first_only: true,
    }
}

pub const MOVIE_RULES: &[(Field, Lookup)] = &[
    (Field::Title, Lookup::Text(".hero__primary-text")),
    (
        Field::Rating,
        Lookup::Text(r#"[data-testid="hero-rating-bar__aggregate-rating__score"] span"#),
    ),
    (Field::Director, credits("Director")),
    (Field::Writers, credits("Writer")),
    (Field::GrossWorldwide, labeled_list_item("Gross worldwide")),
    (Field::OpeningWeekend, labeled_list_item("Opening weekend US & Canada")),
    (Field::Budget, labeled_list_item("Budget")),
    (
        Field::Languages,
        Lookup::List(r#"[data-testid="title-details-languages"] .ipc-metadata-list-item__list-content-item"#),
    ),
    (
        Field::Countries,
        Lookup::List(r#"[data-testid="title-details-origin"] .ipc-metadata-list-item__list-content-item"#),
    ),
    (
        Field::ProductionCompanies,
        Lookup::List(r#"[data-testid="title-details-companies"] .ipc-metadata-list-item__list-content-item"#),
    ),
    (
        Field::ReleaseDate,
        Lookup::List(r#"[data-testid="title-details-releasedate"] .ipc-metadata-list-item__list-content-item"#),
    ),
    (
        Field::FilmingLocations,
        Lookup::List(r#"[data-testid="title-details-filminglocations"] .ipc-metadata-list-item__list-content-item"#),
    ),
    (
        Field::ReviewsUrl,
        Lookup::Link {
            selector: r#"[data-testid="reviews-header"] a"#,
            attr: "href",
        },
    ),
];

/// Build a record from a title page. Never fails: unmatched rules leave the sentinel.
pub fn extract_movie<D: DocumentView>(doc: &D, source_url: &str, origin: Option<&Url>) -> MovieRecord {
    let mut record = MovieRecord {
        url: source_url.to_string(),
        ..MovieRecord::default()
    };
    for (field, lookup) in MOVIE_RULES {
        *record.slot_mut(*field) = lookup.apply(doc, origin);
    }
    record
}
