use std::collections::HashSet;
use scraper::{Html, Selector};
use tracing::debug;

use crate::crawler::task::{RawPost, WorkUnit};
use super::{element_text, first_text, resolve_url, unit_id_from_url, ContentExtractor, ExtractError, ANONYMOUS};

/// Spiderum articles. An article page holds the article body followed by its
/// comments, all on one page.
pub struct SpiderumExtractor {
    article_link: Selector,
    title: Selector,
    author: Selector,
    time: Selector,
    body: Selector,
    comment: Selector,
}

impl SpiderumExtractor {
    pub fn new() -> Self {
        Self {
            article_link: Selector::parse(r#"a[href*="/bai-dang/"]"#).unwrap(),
            title: Selector::parse("h1").unwrap(),
            author: Selector::parse("a.author-name, span.author").unwrap(),
            time: Selector::parse("time[datetime]").unwrap(),
            body: Selector::parse("div.post-content, article, div#content").unwrap(),
            comment: Selector::parse("div.comment-content").unwrap(),
        }
    }
}

impl Default for SpiderumExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentExtractor for SpiderumExtractor {
    fn extract_units(&self, html: &str, page_url: &str) -> Vec<WorkUnit> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut units = Vec::new();

        for link in document.select(&self.article_link) {
            let Some(mut url) = link.value().attr("href").and_then(|href| resolve_url(page_url, href)) else {
                continue;
            };
            url.set_query(None);

            let unit_id = unit_id_from_url(url.as_str());
            if !seen.insert(unit_id.clone()) {
                continue;
            }

            units.push(WorkUnit {
                unit_id,
                url: url.to_string(),
                title: link.text().collect::<String>().trim().to_string(),
            });
        }

        debug!("Found {} articles on {}", units.len(), page_url);
        units
    }

    fn extract_documents(&self, html: &str) -> Result<Vec<RawPost>, ExtractError> {
        let document = Html::parse_document(html);
        let mut posts = Vec::new();

        let timestamp = document
            .select(&self.time)
            .next()
            .and_then(|t| t.value().attr("datetime"))
            .unwrap_or_default()
            .to_string();

        // First container in document order that carries text
        let body = document
            .select(&self.body)
            .map(element_text)
            .find(|text| !text.trim().is_empty());

        if let Some(body_text) = body {
            let title = first_text(document.select(&self.title)).unwrap_or_default();
            let body_text = if title.is_empty() {
                body_text
            } else {
                format!("{}\n{}", title, body_text)
            };

            posts.push(RawPost {
                author: first_text(document.select(&self.author)).unwrap_or_else(|| ANONYMOUS.to_string()),
                timestamp,
                body_text,
            });
        }

        for comment in document.select(&self.comment) {
            posts.push(RawPost {
                author: ANONYMOUS.to_string(),
                timestamp: String::new(),
                body_text: element_text(comment),
            });
        }

        if posts.is_empty() {
            return Err(ExtractError::MissingContent("div.post-content"));
        }

        Ok(posts)
    }

    fn has_next_page(&self, _html: &str) -> bool {
        false
    }

    fn page_count(&self, _html: &str) -> Option<u32> {
        Some(1)
    }

    fn listing_page_url(&self, category_url: &str, page: u32) -> String {
        if page <= 1 {
            return category_url.to_string();
        }
        let separator = if category_url.contains('?') { '&' } else { '?' };
        format!("{}{}page={}", category_url, separator, page)
    }

    fn unit_page_url(&self, unit_url: &str, _page: u32) -> String {
        unit_url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <html><body>
          <a href="/bai-dang/Song-cham-lai-abc123?utm=home"><img src="x.png"></a>
          <a href="/bai-dang/Song-cham-lai-abc123">Sống chậm lại</a>
          <a href="https://spiderum.com/bai-dang/Doc-sach-xyz789">Đọc sách</a>
          <a href="/nguoi-dung/alice">alice</a>
        </body></html>
    "#;

    const ARTICLE: &str = r#"
        <html><body>
          <h1>Sống chậm lại</h1>
          <a class="author-name" href="/nguoi-dung/bob">bob</a>
          <time datetime="2024-02-10T08:00:00Z">10/2</time>
          <div class="post-content"><p>Đoạn một.</p><p>Đoạn hai.</p></div>
          <div class="comment"><div class="comment-content">Bài viết hay quá</div></div>
        </body></html>
    "#;

    #[test]
    fn listing_dedupes_article_links() {
        let extractor = SpiderumExtractor::new();
        let units = extractor.extract_units(LISTING, "https://spiderum.com/chuyen-muc/tam-su");

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].unit_id, "Song-cham-lai-abc123");
        assert_eq!(units[0].url, "https://spiderum.com/bai-dang/Song-cham-lai-abc123");
        assert_eq!(units[1].unit_id, "Doc-sach-xyz789");
    }

    #[test]
    fn article_and_comments_become_posts() {
        let extractor = SpiderumExtractor::new();
        let posts = extractor.extract_documents(ARTICLE).unwrap();

        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].author, "bob");
        assert_eq!(posts[0].timestamp, "2024-02-10T08:00:00Z");
        assert!(posts[0].body_text.starts_with("Sống chậm lại\n"));
        assert!(posts[0].body_text.contains("Đoạn hai."));
        assert_eq!(posts[1].body_text, "Bài viết hay quá");
    }

    #[test]
    fn listing_pages_use_query_parameter() {
        let extractor = SpiderumExtractor::new();

        assert_eq!(
            extractor.listing_page_url("https://spiderum.com/chuyen-muc/tam-su", 3),
            "https://spiderum.com/chuyen-muc/tam-su?page=3"
        );
        assert!(!extractor.has_next_page(ARTICLE));
    }
}
