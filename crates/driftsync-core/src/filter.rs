//! Case-insensitive glob filter over relative paths.

use globset::{GlobBuilder, GlobMatcher};
use log::warn;

/// Compiled include filter. An empty pattern includes everything; a pattern
/// that fails to compile includes nothing (compilation itself never fails
/// externally). Matching is case-insensitive with literal separators, so `*`
/// and `?` stay within one path segment while `**` crosses segments.
pub struct PatternFilter {
    matcher: Option<GlobMatcher>,
    match_all: bool,
}

impl PatternFilter {
    pub fn new(pattern: &str) -> Self {
        if pattern.is_empty() {
            return Self {
                matcher: None,
                match_all: true,
            };
        }

        let compiled = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .literal_separator(true)
            .build();

        match compiled {
            Ok(glob) => Self {
                matcher: Some(glob.compile_matcher()),
                match_all: false,
            },
            Err(err) => {
                warn!("invalid file pattern {pattern:?}: {err}; matching nothing");
                Self {
                    matcher: None,
                    match_all: false,
                }
            }
        }
    }

    pub fn should_include(&self, rel_path: &str) -> bool {
        match &self.matcher {
            Some(matcher) => matcher.is_match(rel_path),
            None => self.match_all,
        }
    }
}

impl Default for PatternFilter {
    fn default() -> Self {
        Self::new("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pattern_matches_everything() {
        let filter = PatternFilter::new("");
        assert!(filter.should_include("a.txt"));
        assert!(filter.should_include("deep/nested/b.bin"));
    }

    #[test]
    fn star_stays_within_a_segment() {
        let filter = PatternFilter::new("*.mov");
        assert!(filter.should_include("clip.mov"));
        assert!(!filter.should_include("sub/clip.mov"));
    }

    #[test]
    fn double_star_crosses_segments() {
        let filter = PatternFilter::new("**/*.mov");
        assert!(filter.should_include("clip.mov"));
        assert!(filter.should_include("a/b/clip.mov"));
        assert!(!filter.should_include("a/b/clip.jpg"));
    }

    #[test]
    fn matching_ignores_case() {
        let filter = PatternFilter::new("**/*.mov");
        assert!(filter.should_include("sub/w.MOV"));
        assert!(filter.should_include("SUB/W.Mov"));
    }

    #[test]
    fn question_mark_and_classes() {
        let filter = PatternFilter::new("img_?[0-9].png");
        assert!(filter.should_include("img_a1.png"));
        assert!(!filter.should_include("img_10x.png"));

        let negated = PatternFilter::new("[!a]*.txt");
        assert!(negated.should_include("b.txt"));
        assert!(!negated.should_include("a.txt"));
    }

    #[test]
    fn alternation() {
        let filter = PatternFilter::new("**/*.{jpg,png}");
        assert!(filter.should_include("photos/x.jpg"));
        assert!(filter.should_include("photos/y.PNG"));
        assert!(!filter.should_include("photos/z.gif"));
    }

    #[test]
    fn invalid_pattern_matches_nothing() {
        let filter = PatternFilter::new("broken[");
        assert!(!filter.should_include("broken["));
        assert!(!filter.should_include("anything"));
    }
}
