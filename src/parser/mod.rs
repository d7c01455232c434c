pub mod movie;
pub mod review;

use url::Url;

use crate::document::DocumentView;
use crate::text::{clean, join};

/// How a label node is compared against the wanted label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelMatch {
    Exact,
    /// `Director` also matches `Directors`.
    Prefix,
}

impl LabelMatch {
    fn matches(self, candidate: &str, wanted: &str) -> bool {
        let candidate = candidate.trim();
        match self {
            LabelMatch::Exact => candidate == wanted,
            LabelMatch::Prefix => candidate.starts_with(wanted),
        }
    }
}

/// One field's selection rule. Every variant yields a finished cell value.
#[derive(Debug, Clone, Copy)]
pub enum Lookup {
    /// Text of the first match.
    Text(&'static str),
    /// Inner markup of the first match, cleaned (keeps `<br>` as a word break).
    Markup(&'static str),
    /// Text of every match, joined in document order.
    List(&'static str),
    /// Values under the first list item whose label matches.
    Labeled {
        item: &'static str,
        label_at: &'static str,
        label: &'static str,
        matching: LabelMatch,
        value_at: &'static str,
        first_only: bool,
    },
    /// Attribute value resolved against the site origin.
    Link {
        selector: &'static str,
        attr: &'static str,
    },
}

impl Lookup {
    pub fn apply<D: DocumentView>(&self, doc: &D, origin: Option<&Url>) -> String {
        match *self {
            Lookup::Text(sel) => clean(doc.text_at(sel)),
            Lookup::Markup(sel) => clean(doc.html_at(sel)),
            Lookup::List(sel) => clean(Some(join(doc.all_text_at(sel)))),
            Lookup::Labeled {
                item,
                label_at,
                label,
                matching,
                value_at,
                first_only,
            } => {
                let values = labeled_values(doc, item, label_at, label, matching, value_at);
                if first_only {
                    clean(values.into_iter().flatten().next())
                } else {
                    clean(Some(join(values.unwrap_or_default())))
                }
            }
            Lookup::Link { selector, attr } => {
                clean(doc.attr_at(selector, attr).and_then(|href| resolve(origin, &href)))
            }
        }
    }
}

/// Scan `item` nodes for one whose `label_at` descendant matches `label` and
/// return the texts under its `value_at` descendants. `None` when no item matches.
pub fn labeled_values<D: DocumentView>(
    doc: &D,
    item: &str,
    label_at: &str,
    label: &str,
    matching: LabelMatch,
    value_at: &str,
) -> Option<Vec<String>> {
    doc.sections(item)
        .into_iter()
        .find(|section| {
            section
                .all_text_at(label_at)
                .iter()
                .any(|candidate| matching.matches(candidate, label))
        })
        .map(|section| section.all_text_at(value_at))
}

/// Resolve a possibly relative link. Without an origin only absolute links survive.
pub fn resolve(origin: Option<&Url>, href: &str) -> Option<String> {
    match origin {
        Some(base) => base.join(href).ok().map(String::from),
        None => Url::parse(href).ok().map(String::from),
    }
}
