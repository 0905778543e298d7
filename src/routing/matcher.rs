use regex::Regex;

/// Case-insensitive, word-bounded keyword and phrase matching.
///
/// Phrases tolerate any run of whitespace between words. Keywords are
/// tried in configured order, so the reported match is deterministic.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    patterns: Vec<(String, Regex)>,
}

impl KeywordMatcher {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Result<Self, regex::Error> {
        let mut patterns = Vec::with_capacity(keywords.len());
        for kw in keywords {
            let kw = kw.as_ref().trim();
            if kw.is_empty() {
                continue;
            }
            let body = kw
                .split_whitespace()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s+");
            patterns.push((kw.to_lowercase(), Regex::new(&format!(r"(?i)\b{body}\b"))?));
        }
        Ok(Self { patterns })
    }

    /// The first configured keyword found in `text`.
    pub fn find(&self, text: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(kw, _)| kw.as_str())
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.find(text).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_whole_words_only() {
        let m = KeywordMatcher::new(&["sop", "manager"]).unwrap();
        assert_eq!(m.find("Where is the SOP for refunds?"), Some("sop"));
        assert!(!m.is_match("I like soup"));
        assert!(!m.is_match("management reports"));
    }

    #[test]
    fn phrases_span_whitespace() {
        let m = KeywordMatcher::new(&["api key"]).unwrap();
        assert!(m.is_match("rotate the API\n  key please"));
        assert!(!m.is_match("apikey"));
    }

    #[test]
    fn first_configured_keyword_wins() {
        let m = KeywordMatcher::new(&["urgent", "asap"]).unwrap();
        assert_eq!(m.find("asap, this is urgent"), Some("urgent"));
    }

    #[test]
    fn blank_keywords_are_ignored() {
        let m = KeywordMatcher::new(&["", "  "]).unwrap();
        assert!(!m.is_match("anything"));
    }
}
