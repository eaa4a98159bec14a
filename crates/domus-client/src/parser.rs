//! CSS-selector page parser driven by per-site configuration.

use domus_core::models::{ParsedPage, Record};
use domus_core::site::SiteConfig;
use domus_core::traits::PageParser;
use domus_core::ScrapeError;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Parses listing pages with the selectors from a [`SiteConfig`].
///
/// Stateless: selectors are compiled per call, which keeps the parser
/// trivially `Send + Sync` (scraper's parsed documents are not shareable
/// across threads).
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorParser;

impl SelectorParser {
    pub fn new() -> Self {
        Self
    }
}

fn compile(selector: &str, what: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(selector)
        .map_err(|e| ScrapeError::ConfigInvalid(format!("bad {what} selector '{selector}': {e}")))
}

/// Text content of the first match of `selector` inside `scope`, with
/// whitespace collapsed. Empty text counts as missing.
fn select_text(scope: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    let element = scope.select(selector).next()?;
    let text = element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if text.is_empty() { None } else { Some(text) }
}

/// Resolve an href against the page it appeared on.
fn resolve_href(page_url: &str, href: &str) -> Option<String> {
    let base = Url::parse(page_url).ok()?;
    base.join(href).ok().map(String::from)
}

impl PageParser for SelectorParser {
    /// Compile every selector in the config, so bad selector syntax fails
    /// the job at launch instead of on the first page.
    fn validate(&self, config: &SiteConfig) -> Result<(), ScrapeError> {
        compile(&config.listing_selector, "listing")?;
        for (field, selector) in &config.field_selectors {
            compile(selector, field)?;
        }
        if let Some(next) = &config.next_page_selector {
            compile(next, "next page")?;
        }
        Ok(())
    }

    fn parse(
        &self,
        html: &str,
        page_url: &str,
        config: &SiteConfig,
    ) -> Result<ParsedPage, ScrapeError> {
        let document = Html::parse_document(html);
        let listing = compile(&config.listing_selector, "listing")?;

        let mut field_selectors = Vec::with_capacity(config.field_selectors.len());
        for (field, selector) in &config.field_selectors {
            field_selectors.push((field.as_str(), compile(selector, field)?));
        }

        let mut page = ParsedPage::default();
        'listings: for element in document.select(&listing) {
            let mut record = Record::new(page_url);
            for (field, selector) in &field_selectors {
                match select_text(&element, selector) {
                    Some(value) => record.set_field(field, value),
                    None if config.required_fields.iter().any(|r| r == field) => {
                        tracing::debug!(
                            site = %config.key, %page_url, %field,
                            "Skipping listing: required field missing"
                        );
                        page.skipped += 1;
                        continue 'listings;
                    }
                    None => {}
                }
            }
            page.records.push(record);
        }

        if let Some(next) = &config.next_page_selector {
            let next = compile(next, "next page")?;
            page.next_url = document
                .select(&next)
                .next()
                .and_then(|el| el.value().attr("href"))
                .and_then(|href| resolve_href(page_url, href));
        }

        tracing::debug!(
            site = %config.key, %page_url,
            records = page.records.len(), skipped = page.skipped,
            has_next = page.next_url.is_some(),
            "Parsed listing page"
        );
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domus_core::testutil::make_site_config;

    const PAGE: &str = r#"
        <html><body>
          <div class="listing">
            <h2 class="title">T2 apartment in Alfama</h2>
            <span class="price">250 000 &euro;</span>
            <p class="desc">River view,  needs   work.</p>
          </div>
          <div class="listing">
            <h2 class="title">Farmhouse near Evora</h2>
            <span class="price">480 000 &euro;</span>
          </div>
          <div class="listing">
            <h2 class="title">Plot without a price</h2>
            <span class="price">   </span>
          </div>
          <a class="next" href="/search?page=2">Next</a>
        </body></html>
    "#;

    #[test]
    fn extracts_records_and_skips_incomplete_listings() {
        let config = make_site_config("pearls")
            .with_field("description", "p.desc")
            .with_required("price");
        let page = SelectorParser::new()
            .parse(PAGE, "https://example.com/search", &config)
            .unwrap();

        assert_eq!(page.records.len(), 2);
        assert_eq!(page.skipped, 1);
        assert_eq!(page.records[0].title.as_deref(), Some("T2 apartment in Alfama"));
        assert_eq!(page.records[0].price.as_deref(), Some("250 000 €"));
        // Whitespace collapsed, optional field allowed to be absent.
        assert_eq!(
            page.records[0].description.as_deref(),
            Some("River view, needs work.")
        );
        assert_eq!(page.records[1].description, None);
        assert_eq!(page.records[1].source_url, "https://example.com/search");
    }

    #[test]
    fn optional_missing_field_does_not_skip() {
        let config = make_site_config("pearls");
        let page = SelectorParser::new()
            .parse(PAGE, "https://example.com/search", &config)
            .unwrap();
        // No required fields: the priceless plot still yields a record.
        assert_eq!(page.records.len(), 3);
        assert_eq!(page.skipped, 0);
    }

    #[test]
    fn next_link_resolved_against_page_url() {
        let config = make_site_config("pearls");
        let page = SelectorParser::new()
            .parse(PAGE, "https://example.com/search", &config)
            .unwrap();
        assert_eq!(
            page.next_url.as_deref(),
            Some("https://example.com/search?page=2")
        );
    }

    #[test]
    fn missing_next_link_yields_none() {
        let config = make_site_config("pearls");
        let html = r#"<div class="listing"><h2 class="title">Last page</h2></div>"#;
        let page = SelectorParser::new()
            .parse(html, "https://example.com/search?page=9", &config)
            .unwrap();
        assert_eq!(page.next_url, None);
    }

    #[test]
    fn unknown_field_names_land_in_attributes() {
        let config = make_site_config("pearls").with_field("energy_certificate", "span.price");
        let page = SelectorParser::new()
            .parse(PAGE, "https://example.com/search", &config)
            .unwrap();
        assert_eq!(
            page.records[0].attributes.get("energy_certificate").unwrap(),
            "250 000 €"
        );
    }

    #[test]
    fn validate_rejects_bad_selector_syntax() {
        let config = make_site_config("pearls").with_field("title", "h2..broken");
        let err = SelectorParser::new().validate(&config).unwrap_err();
        assert!(matches!(err, ScrapeError::ConfigInvalid(_)));

        SelectorParser::new()
            .validate(&make_site_config("pearls"))
            .unwrap();
    }

    #[test]
    fn empty_page_parses_to_empty_result() {
        let config = make_site_config("pearls");
        let page = SelectorParser::new()
            .parse("<html><body></body></html>", "https://example.com/search", &config)
            .unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.skipped, 0);
        assert_eq!(page.next_url, None);
    }
}
