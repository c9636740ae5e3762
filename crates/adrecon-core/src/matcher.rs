use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Lowercases, strips diacritics and collapses whitespace runs.
pub fn normalize_label(raw: &str) -> String {
    let stripped: String = raw.nfd().filter(|c| !is_combining_mark(*c)).collect();
    stripped
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Returns the first campaign name (input order) whose normalized form
/// contains the normalized label. A prefix is a substring, so prefix matches
/// fall out of the same check. Blank labels never match.
pub fn match_source_to_campaign<'a, S: AsRef<str>>(
    label: &str,
    campaign_names: &'a [S],
) -> Option<&'a str> {
    let needle = normalize_label(label);
    if needle.is_empty() {
        return None;
    }
    campaign_names
        .iter()
        .map(AsRef::<str>::as_ref)
        .find(|name| normalize_label(name).contains(&needle))
}

/// Campaign names known to a request, normalized once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CampaignUniverse {
    names: Vec<String>,
    normalized: Vec<String>,
}

impl CampaignUniverse {
    /// Keeps input order and drops repeated and blank names.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut universe = Self::default();
        for name in names {
            let name = name.into();
            let trimmed = name.trim();
            if trimmed.is_empty() || universe.names.iter().any(|n| n == trimmed) {
                continue;
            }
            universe.normalized.push(normalize_label(trimmed));
            universe.names.push(trimmed.to_string());
        }
        universe
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Generic match on an already normalized label.
    pub fn find_containing(&self, normalized_label: &str) -> Option<&str> {
        if normalized_label.is_empty() {
            return None;
        }
        self.find(|candidate| candidate.contains(normalized_label))
    }

    /// First campaign whose normalized name contains every token.
    pub fn find_containing_all<T: AsRef<str>>(&self, tokens: &[T]) -> Option<&str> {
        if tokens.is_empty() {
            return None;
        }
        self.find(|candidate| tokens.iter().all(|t| candidate.contains(t.as_ref())))
    }

    fn find(&self, predicate: impl Fn(&str) -> bool) -> Option<&str> {
        self.normalized
            .iter()
            .position(|candidate| predicate(candidate))
            .map(|idx| self.names[idx].as_str())
    }
}
