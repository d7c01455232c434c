use scraper::{ElementRef, Html, Selector};
use tracing::debug;

/// Read-only queries against a parsed page.
///
/// Every lookup returns an explicit empty result when nothing matches, so
/// extraction code never needs error handling for missing markup.
pub trait DocumentView: Sized {
    /// Concatenated text of the first match.
    fn text_at(&self, selector: &str) -> Option<String>;
    /// Text of every match, in document order.
    fn all_text_at(&self, selector: &str) -> Vec<String>;
    /// Attribute value of the first match that carries it.
    fn attr_at(&self, selector: &str, attr: &str) -> Option<String>;
    /// Inner markup of the first match (for fields whose line breaks are tags).
    fn html_at(&self, selector: &str) -> Option<String>;
    /// Every match as its own view, for per-item queries.
    fn sections(&self, selector: &str) -> Vec<Self>;
}

pub struct HtmlDocument {
    html: Html,
}

impl HtmlDocument {
    pub fn parse(body: &str) -> Self {
        HtmlDocument {
            html: Html::parse_document(body),
        }
    }

    fn fragment(markup: &str) -> Self {
        HtmlDocument {
            html: Html::parse_fragment(markup),
        }
    }

    fn select<'a>(&'a self, selector: &str) -> Vec<ElementRef<'a>> {
        match Selector::parse(selector) {
            Ok(sel) => self.html.select(&sel).collect(),
            Err(e) => {
                debug!(selector, error = %e, "invalid selector");
                Vec::new()
            }
        }
    }
}

fn element_text(el: &ElementRef) -> String {
    el.text().collect::<String>()
}

impl DocumentView for HtmlDocument {
    fn text_at(&self, selector: &str) -> Option<String> {
        self.select(selector).first().map(element_text)
    }

    fn all_text_at(&self, selector: &str) -> Vec<String> {
        self.select(selector).iter().map(element_text).collect()
    }

    fn attr_at(&self, selector: &str, attr: &str) -> Option<String> {
        self.select(selector)
            .iter()
            .find_map(|el| el.value().attr(attr))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn html_at(&self, selector: &str) -> Option<String> {
        self.select(selector).first().map(|el| el.inner_html())
    }

    fn sections(&self, selector: &str) -> Vec<Self> {
        self.select(selector)
            .iter()
            .map(|el| HtmlDocument::fragment(&el.html()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <h1><span class="name">The <i>Dark</i> Knight</span></h1>
        <ul class="langs"><li><a href="/a">English</a></li><li><a href="/b">Mandarin</a></li></ul>
        <a class="link" href="  /title/tt1/reviews  ">Reviews</a>
        <div class="body">one<br>two</div>
        <ul>
          <li class="item"><span class="label">Budget</span><span class="value">$185M</span></li>
          <li class="item"><span class="label">Gross</span><span class="value">$1B</span></li>
        </ul>
    </body></html>"#;

    #[test]
    fn text_concatenates_descendants() {
        let doc = HtmlDocument::parse(PAGE);
        assert_eq!(doc.text_at(".name").as_deref(), Some("The Dark Knight"));
        assert_eq!(doc.text_at(".missing"), None);
    }

    #[test]
    fn all_text_in_order() {
        let doc = HtmlDocument::parse(PAGE);
        assert_eq!(doc.all_text_at(".langs a"), vec!["English", "Mandarin"]);
        assert!(doc.all_text_at(".nothing").is_empty());
    }

    #[test]
    fn attr_trimmed() {
        let doc = HtmlDocument::parse(PAGE);
        assert_eq!(doc.attr_at("a.link", "href").as_deref(), Some("/title/tt1/reviews"));
        assert_eq!(doc.attr_at("a.link", "data-key"), None);
    }

    #[test]
    fn inner_html_keeps_breaks() {
        let doc = HtmlDocument::parse(PAGE);
        assert_eq!(doc.html_at(".body").as_deref(), Some("one<br>two"));
    }

    #[test]
    fn sections_are_scoped() {
        let doc = HtmlDocument::parse(PAGE);
        let items = doc.sections("li.item");
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].text_at(".label").as_deref(), Some("Gross"));
        assert_eq!(items[1].all_text_at(".value"), vec!["$1B"]);
    }

    #[test]
    fn invalid_selector_is_empty() {
        let doc = HtmlDocument::parse(PAGE);
        assert_eq!(doc.text_at("li:contains(\"x\")"), None);
        assert!(doc.sections("[[[").is_empty());
    }
}
