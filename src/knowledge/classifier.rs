//! Domain Classifier (C9, §4.9): keyword-driven detection of which known
//! domain(s) a query string touches. Each domain owns a set of
//! distinguishing terms; matches are ranked by match count and
//! length-weighted specificity. Unknown queries return an empty set, which
//! callers treat as "search all collections".

use std::collections::HashMap;

#[derive(Debug, Clone)]
struct DomainEntry {
    keywords: Vec<String>,
}

/// A registry of domains and the terms that identify them.
pub struct DomainClassifier {
    domains: HashMap<String, DomainEntry>,
}

impl DomainClassifier {
    pub fn new() -> Self {
        Self {
            domains: HashMap::new(),
        }
    }

    /// Seeds the classifier with the example domains named in the
    /// knowledge index's ingest contract (§4.8): `naver`, `weather`,
    /// `kakao`, `google`. Callers register additional domains as the
    /// knowledge base grows.
    pub fn with_default_domains() -> Self {
        let mut classifier = Self::new();
        classifier.register("naver", &["naver", "네이버", "naver maps", "naver search"]);
        classifier.register("weather", &["weather", "forecast", "temperature", "humidity", "rainfall"]);
        classifier.register("kakao", &["kakao", "카카오", "kakao map", "kakaotalk"]);
        classifier.register("google", &["google", "gmail", "google maps", "google cloud"]);
        classifier
    }

    pub fn register(&mut self, domain: &str, keywords: &[&str]) {
        self.domains.insert(
            domain.to_string(),
            DomainEntry {
                keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            },
        );
    }

    /// Ranked domains matching `query`, most specific first. Empty if no
    /// registered domain's keywords appear in the query.
    pub fn classify(&self, query: &str) -> Vec<String> {
        let haystack = query.to_lowercase();
        let mut scored: Vec<(String, usize, usize)> = self
            .domains
            .iter()
            .filter_map(|(domain, entry)| {
                let matches: Vec<&String> = entry
                    .keywords
                    .iter()
                    .filter(|kw| haystack.contains(kw.as_str()))
                    .collect();
                if matches.is_empty() {
                    return None;
                }
                let specificity: usize = matches.iter().map(|kw| kw.len()).sum();
                Some((domain.clone(), matches.len(), specificity))
            })
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)).then(a.0.cmp(&b.0)));
        scored.into_iter().map(|(domain, _, _)| domain).collect()
    }
}

impl Default for DomainClassifier {
    fn default() -> Self {
        Self::with_default_domains()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_a_registered_domain_by_keyword() {
        let classifier = DomainClassifier::with_default_domains();
        let hits = classifier.classify("what's the weather forecast for tomorrow?");
        assert_eq!(hits, vec!["weather".to_string()]);
    }

    #[test]
    fn unknown_query_returns_empty() {
        let classifier = DomainClassifier::with_default_domains();
        assert!(classifier.classify("completely unrelated gibberish").is_empty());
    }

    #[test]
    fn more_specific_match_ranks_first() {
        let mut classifier = DomainClassifier::new();
        classifier.register("a", &["map"]);
        classifier.register("b", &["kakao map", "kakao"]);
        let hits = classifier.classify("open the kakao map app");
        assert_eq!(hits[0], "b");
    }
}
