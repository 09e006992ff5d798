use glob::{MatchOptions, Pattern, PatternError};

const MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
enum Rule {
    /// Pattern with a `/`: matches the path itself or any ancestor of it.
    Anchored(Pattern),
    /// Bare pattern: matches when some single path component equals it.
    Component(Pattern),
}

/// Request paths the resolver must never serve.
#[derive(Debug, Clone, Default)]
pub struct HidePatterns {
    rules: Vec<Rule>,
}

impl HidePatterns {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, PatternError> {
        let mut rules = Vec::with_capacity(patterns.len());
        for raw in patterns {
            let raw = raw.as_ref().trim();
            if raw.is_empty() {
                continue;
            }
            if raw.contains('/') {
                let anchored = format!("/{}", raw.trim_matches('/'));
                rules.push(Rule::Anchored(Pattern::new(&anchored)?));
            } else {
                rules.push(Rule::Component(Pattern::new(raw)?));
            }
        }
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// `path` is an absolute request path such as `/docs/index.html`.
    pub fn is_hidden(&self, path: &str) -> bool {
        self.rules.iter().any(|rule| match rule {
            Rule::Anchored(pattern) => ancestors(path).any(|p| pattern.matches_with(p, MATCH)),
            Rule::Component(pattern) => path
                .split('/')
                .filter(|c| !c.is_empty())
                .any(|c| pattern.matches_with(c, MATCH)),
        })
    }
}

/// `/a/b/c` yields `/a`, `/a/b`, `/a/b/c`. Only whole components are cut, so
/// `/foo` is never produced from `/foobar`.
fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    let path = path.trim_end_matches('/');
    path.char_indices()
        .filter(|&(i, c)| c == '/' && i > 0)
        .map(move |(i, _)| &path[..i])
        .chain((!path.is_empty()).then_some(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hide(patterns: &[&str]) -> HidePatterns {
        HidePatterns::new(patterns).unwrap()
    }

    #[test]
    fn test_bare_pattern_matches_whole_components() {
        let h = hide(&["bar"]);
        assert!(h.is_hidden("/bar"));
        assert!(h.is_hidden("/foo/bar/baz"));
        assert!(!h.is_hidden("/barstool"));
        assert!(!h.is_hidden("/foo/rebar"));
    }

    #[test]
    fn test_separator_pattern_matches_by_prefix() {
        let h = hide(&["/foo"]);
        assert!(h.is_hidden("/foo"));
        assert!(h.is_hidden("/foo/bar"));
        assert!(!h.is_hidden("/foobar"));
        assert!(!h.is_hidden("/bar/foo"));
    }

    #[test]
    fn test_globs() {
        let h = hide(&[".*", "/drafts/*.md"]);
        assert!(h.is_hidden("/.git/config"));
        assert!(h.is_hidden("/blog/.env"));
        assert!(h.is_hidden("/drafts/post.md"));
        assert!(!h.is_hidden("/drafts/post.html"));
        assert!(!h.is_hidden("/published/post.md"));
    }

    #[test]
    fn test_relative_pattern_with_separator_is_anchored() {
        let h = hide(&["private/keys/"]);
        assert!(h.is_hidden("/private/keys/id_rsa"));
        assert!(!h.is_hidden("/private/keystore"));
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        assert!(HidePatterns::new(&["[unclosed"]).is_err());
        assert!(hide(&[]).is_empty());
    }

    #[test]
    fn test_ancestors() {
        let all: Vec<&str> = ancestors("/a/b/c").collect();
        assert_eq!(all, vec!["/a", "/a/b", "/a/b/c"]);
        let all: Vec<&str> = ancestors("/a/").collect();
        assert_eq!(all, vec!["/a"]);
    }
}
