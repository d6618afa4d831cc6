//! Leaf-name exclusion rules shared by the watcher and the supervisor.

use globset::{GlobBuilder, GlobMatcher};

use crate::error::CoreError;

/// Decides which directory entries are worth tracking.
///
/// `.`, `..` and the empty name are always rejected. With a non-empty
/// exclusion list, any leaf matching one of the shell-style globs is
/// rejected; with an empty list the built-in rule rejects editor backup
/// files (`*~`) and `*.tmp` scratch files. The filter looks at leaf names
/// only, never at the full path, file type, or contents.
#[derive(Debug, Clone)]
pub struct PathFilter {
    excludes: Vec<GlobMatcher>,
}

impl PathFilter {
    /// Compile the given exclusion patterns. An empty slice selects the
    /// built-in `*~` / `*.tmp` rule.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, CoreError> {
        let mut excludes = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let glob = GlobBuilder::new(pattern)
                .literal_separator(false)
                .build()
                .map_err(|source| CoreError::Pattern {
                    pattern: pattern.to_owned(),
                    source,
                })?;
            excludes.push(glob.compile_matcher());
        }
        Ok(Self { excludes })
    }

    /// Returns `true` if the leaf should be tracked.
    pub fn accepts(&self, leaf: &str) -> bool {
        if leaf.is_empty() || leaf == "." || leaf == ".." {
            return false;
        }

        if self.excludes.is_empty() {
            return !(leaf.ends_with('~') || leaf.ends_with(".tmp"));
        }

        !self.excludes.iter().any(|glob| glob.is_match(leaf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_filter() -> PathFilter {
        PathFilter::new::<&str>(&[]).unwrap()
    }

    #[test]
    fn rejects_dot_entries_and_empty_names() {
        let filter = default_filter();
        assert!(!filter.accepts(""));
        assert!(!filter.accepts("."));
        assert!(!filter.accepts(".."));
        assert!(filter.accepts(".hidden"), "dotfiles other than . and .. pass");
    }

    #[test]
    fn default_rule_rejects_backups_and_tmp() {
        let filter = default_filter();
        assert!(!filter.accepts("notes.txt~"));
        assert!(!filter.accepts("upload.tmp"));
        assert!(filter.accepts("notes.txt"));
        assert!(filter.accepts("tmp"));
    }

    #[test]
    fn explicit_excludes_replace_the_default_rule() {
        let filter = PathFilter::new(&["*.log", "cache-*"]).unwrap();
        assert!(!filter.accepts("build.log"));
        assert!(!filter.accepts("cache-0001"));
        // The built-in rule no longer applies.
        assert!(filter.accepts("notes.txt~"));
        assert!(filter.accepts("upload.tmp"));
    }

    #[test]
    fn patterns_match_the_leaf_only() {
        let filter = PathFilter::new(&["sub/*"]).unwrap();
        // A leaf never contains a slash, so this pattern can still match
        // because the separator is not treated specially.
        assert!(filter.accepts("file.txt"));
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let err = PathFilter::new(&["bad[pattern"]).unwrap_err();
        assert!(matches!(err, CoreError::Pattern { .. }));
    }
}
