//! In-memory fetcher and XenForo-shaped pages for crawl loop tests

use std::collections::HashMap;
use std::sync::Mutex;
use async_trait::async_trait;

use crate::fetch::{FetchFailure, PageFetcher};

pub const BASE: &str = "https://forum.test";
pub const CATEGORY_URL: &str = "https://forum.test/f/chuyen-tro.1/";

/// Serves canned responses by URL. Unknown URLs answer 404.
#[derive(Default)]
pub struct ScriptedFetcher {
    pages: Mutex<HashMap<String, Result<String, FetchFailure>>>,
    hits: Mutex<HashMap<String, usize>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(self, url: &str, html: String) -> Self {
        self.pages.lock().unwrap().insert(url.to_string(), Ok(html));
        self
    }

    pub fn failing(self, url: &str, failure: FetchFailure) -> Self {
        self.pages.lock().unwrap().insert(url.to_string(), Err(failure));
        self
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchFailure> {
        *self.hits.lock().unwrap().entry(url.to_string()).or_default() += 1;

        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(Err(FetchFailure::HttpError(404)))
    }
}

/// `n` distinct words, unique per `seed`
pub fn words(seed: &str, n: usize) -> String {
    (0..n).map(|i| format!("{}{}", seed, i)).collect::<Vec<_>>().join(" ")
}

pub fn thread_url(id: u32) -> String {
    format!("{}/t/chu-de.{}/", BASE, id)
}

pub fn listing_page_url(page: u32) -> String {
    if page <= 1 {
        CATEGORY_URL.to_string()
    } else {
        format!("{}page-{}", CATEGORY_URL, page)
    }
}

pub fn thread_page_url(id: u32, page: u32) -> String {
    if page <= 1 {
        thread_url(id)
    } else {
        format!("{}page-{}", thread_url(id), page)
    }
}

/// Listing page linking the given thread ids
pub fn listing_html(thread_ids: &[u32], last_page: u32) -> String {
    let items: String = thread_ids
        .iter()
        .map(|id| {
            format!(
                r#"<div class="structItem"><div class="structItem-title"><a href="/t/chu-de.{id}/">Chủ đề {id}</a></div></div>"#
            )
        })
        .collect();

    format!(
        r#"<html><body>{}{}</body></html>"#,
        page_nav(last_page, false),
        items
    )
}

/// Thread page holding posts by (author, body)
pub fn thread_html(posts: &[(&str, &str)], last_page: u32, has_next: bool) -> String {
    let articles: String = posts
        .iter()
        .map(|(author, body)| {
            format!(
                r#"<article class="message message--post"><div class="message-name"><a class="username">{author}</a></div><time datetime="2024-01-01T00:00:00Z">1/1</time><div class="message-body"><div class="bbWrapper">{body}</div></div></article>"#
            )
        })
        .collect();

    format!(
        r#"<html><body>{}{}</body></html>"#,
        page_nav(last_page, has_next),
        articles
    )
}

fn page_nav(last_page: u32, has_next: bool) -> String {
    let links: String = (1..=last_page)
        .map(|n| format!(r#"<li><a href="page-{n}">{n}</a></li>"#))
        .collect();
    let next = if has_next {
        r#"<a class="pageNav-jump pageNav-jump--next" href="next">Next</a>"#
    } else {
        ""
    };

    format!(r#"<ul class="pageNav-main">{}</ul>{}"#, links, next)
}
