use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Normalizes extracted text and decides whether it is worth keeping
pub trait QualityFilter: Send + Sync {
    /// Normalized form of a raw post body; the fingerprint is taken over this
    fn clean(&self, raw: &str) -> String;

    /// Whitespace-separated tokens
    fn word_count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }

    fn is_acceptable(&self, text: &str) -> bool;
}

/// Accepts cleaned text with at least `min_words` words
pub struct MinWordsFilter {
    min_words: usize,
    url_regex: Regex,
    email_regex: Regex,
    entity_regex: Regex,
    quote_marker_regex: Regex,
    whitespace_regex: Regex,
}

impl MinWordsFilter {
    pub fn new(min_words: usize) -> Self {
        Self {
            min_words,
            url_regex: Regex::new(r"(?i)\b(?:https?://|www\.)\S+").unwrap(),
            email_regex: Regex::new(r"\S+@\S+\.\S+").unwrap(),
            entity_regex: Regex::new(r"&(?:[a-zA-Z]{2,8}|#[0-9]{1,6}|#x[0-9a-fA-F]{1,6});").unwrap(),
            quote_marker_regex: Regex::new(r"(?m)^[ \t]*[>|]+[ \t]*").unwrap(),
            whitespace_regex: Regex::new(r"\s+").unwrap(),
        }
    }
}

impl QualityFilter for MinWordsFilter {
    fn clean(&self, raw: &str) -> String {
        let text: String = raw.nfc().collect();
        let text = self.entity_regex.replace_all(&text, " ");
        let text = self.url_regex.replace_all(&text, "");
        let text = self.email_regex.replace_all(&text, "");
        // Line-anchored, so it must run before whitespace is collapsed
        let text = self.quote_marker_regex.replace_all(&text, "");
        let text = self.whitespace_regex.replace_all(&text, " ");

        text.trim().to_string()
    }

    fn is_acceptable(&self, text: &str) -> bool {
        self.word_count(text) >= self.min_words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        vec!["chữ"; n].join(" ")
    }

    #[test]
    fn word_threshold_is_inclusive() {
        let filter = MinWordsFilter::new(50);

        assert!(!filter.is_acceptable(&words(49)));
        assert!(filter.is_acceptable(&words(50)));
        assert!(filter.is_acceptable(&words(51)));
    }

    #[test]
    fn clean_strips_noise_and_collapses_whitespace() {
        let filter = MinWordsFilter::new(1);
        let raw = "> trích dẫn\n  Xem https://voz.vn/t/abc.1/ hoặc  mail admin@voz.vn&nbsp;nhé\n\n\tcảm ơn";

        assert_eq!(filter.clean(raw), "trích dẫn Xem hoặc mail nhé cảm ơn");
    }

    #[test]
    fn clean_composes_vietnamese_diacritics() {
        let filter = MinWordsFilter::new(1);
        // "Việt" written with combining marks
        let decomposed = "Vie\u{0323}\u{0302}t";

        assert_eq!(filter.clean(decomposed), "Việt");
        assert_eq!(filter.word_count(&filter.clean("  một   hai\nba ")), 3);
    }
}
