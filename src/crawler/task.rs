use serde::{Serialize, Deserialize};
use chrono::{DateTime, Utc};

/// A crawlable container of documents (a forum thread or an article)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Stable identifier extracted from the unit URL, unique per source
    pub unit_id: String,

    /// Absolute URL of the first content page
    pub url: String,

    /// Title shown on the listing page (display only)
    pub title: String,
}

/// A post or comment as returned by a content extractor, before cleaning
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawPost {
    pub author: String,
    pub timestamp: String,
    pub body_text: String,
}

/// An accepted document, written as one line of the output sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// SHA-256 of the cleaned body text, the global dedup key
    pub fingerprint: String,

    /// Source name (e.g. "voz")
    pub source: String,

    /// Unit the document was found in
    pub parent_unit_id: String,

    pub author: String,

    /// Post time as published by the site (ISO-8601), empty when unknown
    pub timestamp: String,

    /// Cleaned body text
    #[serde(rename = "content")]
    pub body_text: String,

    pub word_count: usize,

    /// When the crawler accepted the document
    pub collected_at: DateTime<Utc>,
}

/// A listing page after filtering through the dedup index
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    /// Units not visited yet
    pub units: Vec<WorkUnit>,

    /// Every unit seen on the page, visited or not. Zero means end of pagination.
    pub total_seen: usize,
}

impl ListingPage {
    /// True when the page had no units at all
    pub fn is_terminal(&self) -> bool {
        self.total_seen == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_serializes_body_as_content() {
        let doc = Document {
            fingerprint: "abc".to_string(),
            source: "voz".to_string(),
            parent_unit_id: "42".to_string(),
            author: "tester".to_string(),
            timestamp: String::new(),
            body_text: "xin chào".to_string(),
            word_count: 2,
            collected_at: Utc::now(),
        };

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["content"], "xin chào");
        assert!(value.get("body_text").is_none());
        assert_eq!(value["word_count"], 2);
    }

    #[test]
    fn listing_page_terminal_only_when_nothing_seen() {
        let empty = ListingPage::default();
        assert!(empty.is_terminal());

        let all_visited = ListingPage { units: vec![], total_seen: 20 };
        assert!(!all_visited.is_terminal());
    }
}
