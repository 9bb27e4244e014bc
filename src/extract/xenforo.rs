use std::collections::HashSet;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::crawler::task::{RawPost, WorkUnit};
use super::{element_text, first_text, resolve_url, unit_id_from_url, ContentExtractor, ExtractError, ANONYMOUS};

/// XenForo 2 forums: Voz, Otofun and TinhTe
pub struct XenforoExtractor {
    thread_link: Selector,
    tooltip_link: Selector,
    post: Selector,
    author: Selector,
    time: Selector,
    body: Selector,
    body_fallback: Selector,
    next_page: Selector,
    page_links: Selector,
}

impl XenforoExtractor {
    pub fn new() -> Self {
        Self {
            thread_link: Selector::parse("div.structItem-title a[href]").unwrap(),
            tooltip_link: Selector::parse("a.PreviewTooltip[href]").unwrap(),
            post: Selector::parse("article.message").unwrap(),
            author: Selector::parse(".message-name .username, a.username").unwrap(),
            time: Selector::parse("time[datetime]").unwrap(),
            body: Selector::parse("div.message-body .bbWrapper").unwrap(),
            body_fallback: Selector::parse("div.message-body").unwrap(),
            next_page: Selector::parse("a.pageNav-jump--next").unwrap(),
            page_links: Selector::parse("ul.pageNav-main li a").unwrap(),
        }
    }

    /// Thread URL without page, unread or query suffixes
    fn canonical_thread_url(&self, page_url: &str, href: &str) -> Option<Url> {
        let mut url = resolve_url(page_url, href)?;

        let segments: Vec<String> = url.path_segments()?
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
        let marker = segments.iter().position(|s| s == "t" || s == "threads" || s == "thread")?;
        if marker + 1 >= segments.len() {
            return None;
        }

        url.set_path(&format!("/{}/", segments[..=marker + 1].join("/")));
        url.set_query(None);

        Some(url)
    }
}

impl Default for XenforoExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// `page-N` pagination shared by listings and threads
fn xenforo_page_url(url: &str, page: u32) -> String {
    if page <= 1 {
        return url.to_string();
    }
    if url.ends_with('/') {
        format!("{}page-{}", url, page)
    } else {
        format!("{}/page-{}", url, page)
    }
}

impl ContentExtractor for XenforoExtractor {
    fn extract_units(&self, html: &str, page_url: &str) -> Vec<WorkUnit> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut units = Vec::new();

        // Older themes only mark thread links with the preview tooltip class
        let links = document.select(&self.thread_link).chain(document.select(&self.tooltip_link));

        for link in links {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let Some(url) = self.canonical_thread_url(page_url, href) else {
                continue;
            };

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

        debug!("Found {} threads on {}", units.len(), page_url);
        units
    }

    fn extract_documents(&self, html: &str) -> Result<Vec<RawPost>, ExtractError> {
        let document = Html::parse_document(html);
        let mut posts = Vec::new();

        for article in document.select(&self.post) {
            let body = article
                .select(&self.body)
                .next()
                .or_else(|| article.select(&self.body_fallback).next());
            let Some(body) = body else {
                continue;
            };

            let author = first_text(article.select(&self.author))
                .unwrap_or_else(|| ANONYMOUS.to_string());
            let timestamp = article
                .select(&self.time)
                .next()
                .and_then(|t| t.value().attr("datetime"))
                .unwrap_or_default()
                .to_string();

            posts.push(RawPost {
                author,
                timestamp,
                body_text: element_text(body),
            });
        }

        if posts.is_empty() {
            return Err(ExtractError::MissingContent("article.message"));
        }

        Ok(posts)
    }

    fn has_next_page(&self, html: &str) -> bool {
        Html::parse_document(html).select(&self.next_page).next().is_some()
    }

    fn page_count(&self, html: &str) -> Option<u32> {
        Html::parse_document(html)
            .select(&self.page_links)
            .filter_map(|a| a.text().collect::<String>().trim().parse::<u32>().ok())
            .max()
    }

    fn listing_last_page(&self, html: &str) -> Option<u32> {
        self.page_count(html)
    }

    fn redirects_past_last_page(&self) -> bool {
        true
    }

    fn listing_page_url(&self, category_url: &str, page: u32) -> String {
        xenforo_page_url(category_url, page)
    }

    fn unit_page_url(&self, unit_url: &str, page: u32) -> String {
        xenforo_page_url(unit_url, page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <html><body>
        <div class="structItem structItem--thread">
          <div class="structItem-title">
            <a href="/f/chuyen-tro-linh-tinh.17/?prefix_id=3" class="labelLink">Thảo luận</a>
            <a href="/t/xe-dien-co-dang-mua.900001/" data-tp-primary="on">Xe điện có đáng mua?</a>
          </div>
        </div>
        <div class="structItem structItem--thread">
          <div class="structItem-title">
            <a href="/t/hoi-ve-laptop.900002/unread">Hỏi về laptop</a>
          </div>
        </div>
        <div class="structItem structItem--thread">
          <div class="structItem-title">
            <a href="https://voz.vn/t/xe-dien-co-dang-mua.900001/page-3">Xe điện có đáng mua?</a>
          </div>
        </div>
        </body></html>
    "#;

    const THREAD: &str = r#"
        <html><body>
        <ul class="pageNav-main">
          <li><a href="/t/a.1/">1</a></li><li><a href="/t/a.1/page-2">2</a></li><li><a href="/t/a.1/page-5">5</a></li>
        </ul>
        <a class="pageNav-jump pageNav-jump--next" href="/t/a.1/page-2">Next</a>
        <article class="message message--post">
          <div class="message-name"><a class="username" href="/u/alice.1/">alice</a></div>
          <time class="u-dt" datetime="2024-03-01T10:00:00+0700">1/3/24</time>
          <div class="message-body"><div class="bbWrapper">
            <blockquote class="bbCodeBlock bbCodeBlock--quote">nội dung trích dẫn</blockquote>
            Trả lời của tôi
          </div></div>
        </article>
        <article class="message message--post">
          <div class="message-body"><div class="bbWrapper">Không có tên</div></div>
        </article>
        </body></html>
    "#;

    #[test]
    fn listing_units_are_canonical_and_unique() {
        let extractor = XenforoExtractor::new();
        let units = extractor.extract_units(LISTING, "https://voz.vn/f/chuyen-tro-linh-tinh.17/");

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].unit_id, "900001");
        assert_eq!(units[0].url, "https://voz.vn/t/xe-dien-co-dang-mua.900001/");
        assert_eq!(units[0].title, "Xe điện có đáng mua?");
        assert_eq!(units[1].unit_id, "900002");
        assert_eq!(units[1].url, "https://voz.vn/t/hoi-ve-laptop.900002/");
    }

    #[test]
    fn posts_exclude_quotes() {
        let extractor = XenforoExtractor::new();
        let posts = extractor.extract_documents(THREAD).unwrap();

        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].author, "alice");
        assert_eq!(posts[0].timestamp, "2024-03-01T10:00:00+0700");
        assert!(posts[0].body_text.contains("Trả lời của tôi"));
        assert!(!posts[0].body_text.contains("trích dẫn"));
        assert_eq!(posts[1].author, ANONYMOUS);
        assert_eq!(posts[1].timestamp, "");
    }

    #[test]
    fn pagination_markers() {
        let extractor = XenforoExtractor::new();

        assert!(extractor.has_next_page(THREAD));
        assert_eq!(extractor.page_count(THREAD), Some(5));
        assert!(!extractor.has_next_page(LISTING));
        assert_eq!(extractor.page_count(LISTING), None);
        assert_eq!(
            extractor.unit_page_url("https://voz.vn/t/a.1/", 3),
            "https://voz.vn/t/a.1/page-3"
        );
        assert_eq!(extractor.listing_page_url("https://voz.vn/f/x.17/", 1), "https://voz.vn/f/x.17/");
    }

    #[test]
    fn page_without_posts_is_missing_content() {
        let extractor = XenforoExtractor::new();

        assert_eq!(
            extractor.extract_documents("<html><body><p>Oops</p></body></html>"),
            Err(ExtractError::MissingContent("article.message"))
        );
    }
}
