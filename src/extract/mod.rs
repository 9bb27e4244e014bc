pub mod spiderum;
pub mod text;
pub mod xenforo;

use std::sync::Arc;
use scraper::ElementRef;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::cli::config::SiteLayout;
use crate::crawler::task::{RawPost, WorkUnit};

// Re-export common types
pub use spiderum::SpiderumExtractor;
pub use text::{MinWordsFilter, QualityFilter};
pub use xenforo::XenforoExtractor;

/// Author recorded when a post carries no readable username
pub const ANONYMOUS: &str = "Anonymous";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// The page has none of the markers the layout expects
    #[error("expected content markers not found: {0}")]
    MissingContent(&'static str),
}

/// Site-specific HTML structure: listing pages to units, unit pages to posts
pub trait ContentExtractor: Send + Sync {
    /// Work units linked from a listing page, in page order, without duplicates
    fn extract_units(&self, html: &str, page_url: &str) -> Vec<WorkUnit>;

    /// Raw posts on one page of a unit
    fn extract_documents(&self, html: &str) -> Result<Vec<RawPost>, ExtractError>;

    /// Whether the page links to a following page
    fn has_next_page(&self, html: &str) -> bool;

    /// Last page number advertised by the pagination widget
    fn page_count(&self, html: &str) -> Option<u32>;

    /// Last listing page advertised by a listing page. Sites that redirect
    /// past-the-end pages to the last one need this to end pagination.
    fn listing_last_page(&self, _html: &str) -> Option<u32> {
        None
    }

    /// Whether any listing page number past the end serves the last page
    /// again. On such sites a later page without pagination widget is the
    /// single page of the category, re-served.
    fn redirects_past_last_page(&self) -> bool {
        false
    }

    /// URL of page `page` (1-based) of a category listing
    fn listing_page_url(&self, category_url: &str, page: u32) -> String;

    /// URL of page `page` (1-based) of a unit
    fn unit_page_url(&self, unit_url: &str, page: u32) -> String;
}

pub fn extractor_for(layout: SiteLayout) -> Arc<dyn ContentExtractor> {
    match layout {
        SiteLayout::Xenforo => Arc::new(XenforoExtractor::new()),
        SiteLayout::Spiderum => Arc::new(SpiderumExtractor::new()),
    }
}

/// Resolve a link against the page it appeared on, dropping the fragment.
/// Host case and default ports are normalized by the parser.
pub fn resolve_url(base: &str, href: &str) -> Option<Url> {
    let base = Url::parse(base).ok()?;
    let mut resolved = base.join(href.trim()).ok()?;

    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }
    resolved.set_fragment(None);

    Some(resolved)
}

/// Stable unit identifier derived from a unit URL.
///
/// XenForo threads end in `slug.<id>`, which yields the numeric id. Other
/// URLs use their last meaningful path segment.
pub fn unit_id_from_url(url: &str) -> String {
    let segment = Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()?
            .filter(|s| !s.is_empty())
            .filter(|s| !is_page_suffix(s) && *s != "unread" && *s != "latest")
            .last()
            .map(|s| s.to_string())
    });

    match segment {
        Some(segment) => match segment.rsplit_once('.') {
            Some((_, id)) if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) => id.to_string(),
            _ => segment,
        },
        None => {
            let digest = hex::encode(Sha256::digest(url.as_bytes()));
            digest[..12].to_string()
        }
    }
}

/// `page-N` path segments used by XenForo pagination
pub fn is_page_suffix(segment: &str) -> bool {
    segment
        .strip_prefix("page-")
        .map(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

/// Visible text of an element, skipping quoted replies and non-content tags.
/// Block boundaries become line breaks.
pub fn element_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    collect_text(element, &mut out);
    out
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            continue;
        }

        let Some(child) = ElementRef::wrap(child) else {
            continue;
        };

        match child.value().name() {
            "blockquote" | "script" | "style" | "noscript" => {}
            "br" => out.push('\n'),
            "p" | "div" | "li" | "h1" | "h2" | "h3" | "h4" | "tr" => {
                if !out.is_empty() && !out.ends_with(char::is_whitespace) {
                    out.push('\n');
                }
                collect_text(child, out);
                out.push('\n');
            }
            _ => collect_text(child, out),
        }
    }
}

/// First trimmed, non-empty text among the elements matched by a selector
pub fn first_text<'a>(mut elements: impl Iterator<Item = ElementRef<'a>>) -> Option<String> {
    elements.find_map(|el| {
        let text = el.text().collect::<String>();
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    #[test]
    fn unit_ids_follow_thread_numbers() {
        assert_eq!(unit_id_from_url("https://voz.vn/t/hoi-ve-laptop.812345/"), "812345");
        assert_eq!(unit_id_from_url("https://voz.vn/t/hoi-ve-laptop.812345/page-7"), "812345");
        assert_eq!(unit_id_from_url("https://www.otofun.net/threads/xe-cu.1234/unread"), "1234");
        assert_eq!(
            unit_id_from_url("https://spiderum.com/bai-dang/Song-cham-lai-abc123"),
            "Song-cham-lai-abc123"
        );
        assert_eq!(unit_id_from_url("https://spiderum.com/").len(), 12);
    }

    #[test]
    fn resolve_drops_fragments_and_lowercases_host() {
        let url = resolve_url("https://VOZ.vn:443/f/x.17/", "/t/a.1/#post-9").unwrap();
        assert_eq!(url.as_str(), "https://voz.vn/t/a.1/");

        assert!(resolve_url("https://voz.vn/", "javascript:void(0)").is_none());
    }

    #[test]
    fn element_text_skips_quotes() {
        let html = Html::parse_fragment(
            "<div class=\"bbWrapper\"><blockquote>trích</blockquote>Một<br>hai<p>ba</p><script>x()</script></div>",
        );
        let selector = Selector::parse("div.bbWrapper").unwrap();
        let wrapper = html.select(&selector).next().unwrap();

        assert_eq!(element_text(wrapper), "Một\nhai\nba\n");
    }

    #[test]
    fn block_elements_never_join_words() {
        let html = Html::parse_fragment("<div class=\"bbWrapper\">chữ<div>thêm</div>nữa<li>một</li></div>");
        let selector = Selector::parse("div.bbWrapper").unwrap();
        let wrapper = html.select(&selector).next().unwrap();

        let text = element_text(wrapper);
        assert_eq!(text, "chữ\nthêm\nnữa\nmột\n");
        assert_eq!(text.split_whitespace().count(), 4);
    }
}
