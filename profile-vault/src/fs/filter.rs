//! Inclusion rules for snapshot contents and change notifications.
//!
//! Paths are archive-relative and `/`-separated, e.g.
//! `.claude/projects/app/notes.md`. The filter never touches the
//! filesystem, so it can be applied to enumerated files and to watcher
//! events alike.

use crate::config::SnapshotConfig;

/// Per-entry filtering switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterOptions {
    /// Drop the configured bulky subtree
    pub exclude_subtree: bool,
}

/// Decides whether a relative path belongs in a snapshot.
#[derive(Debug, Clone)]
pub struct PathFilter {
    root_dir_name: String,
    excluded_subtree: String,
    home_alias: String,
}

impl PathFilter {
    pub fn new(
        root_dir_name: impl Into<String>,
        excluded_subtree: impl Into<String>,
        home_alias: impl Into<String>,
    ) -> Self {
        Self {
            root_dir_name: root_dir_name.into(),
            excluded_subtree: excluded_subtree.into(),
            home_alias: home_alias.into(),
        }
    }

    pub fn from_config(config: &SnapshotConfig) -> Self {
        Self::new(
            &config.root_dir_name,
            &config.excluded_subtree,
            &config.home_alias,
        )
    }

    pub fn excluded_subtree(&self) -> &str {
        &self.excluded_subtree
    }

    /// Returns true when `relative_path` must be left out.
    ///
    /// 1. With `exclude_subtree`, any whole segment equal to the excluded
    ///    subtree name drops the path (this covers the subtree itself).
    /// 2. A segment equal to the root directory name drops the path when it
    ///    is nested. Index 0 is never nested; index 1 is treated as top level
    ///    when segment 0 is the home alias or the root directory name.
    pub fn should_exclude(&self, relative_path: &str, options: FilterOptions) -> bool {
        let segments: Vec<&str> = relative_path
            .split(['/', '\\'])
            .filter(|s| !s.is_empty() && *s != ".")
            .collect();

        if options.exclude_subtree && segments.iter().any(|s| *s == self.excluded_subtree) {
            return true;
        }

        segments.iter().enumerate().any(|(index, segment)| {
            *segment == self.root_dir_name && !self.is_top_level(index, &segments)
        })
    }

    fn is_top_level(&self, index: usize, segments: &[&str]) -> bool {
        match index {
            0 => true,
            1 => segments[0] == self.home_alias || segments[0] == self.root_dir_name,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> PathFilter {
        PathFilter::new(".claude", "projects", "~")
    }

    const SKIP: FilterOptions = FilterOptions {
        exclude_subtree: true,
    };
    const KEEP: FilterOptions = FilterOptions {
        exclude_subtree: false,
    };

    #[test]
    fn test_plain_paths_included() {
        let f = filter();
        assert!(!f.should_exclude(".claude/settings.json", SKIP));
        assert!(!f.should_exclude(".claude.json", SKIP));
        assert!(!f.should_exclude(".claude/commands/review.md", KEEP));
    }

    #[test]
    fn test_subtree_excluded_only_when_requested() {
        let f = filter();
        assert!(f.should_exclude(".claude/projects", SKIP));
        assert!(f.should_exclude(".claude/projects/app/session.jsonl", SKIP));
        assert!(!f.should_exclude(".claude/projects/app/session.jsonl", KEEP));
    }

    #[test]
    fn test_subtree_matches_whole_segments_only() {
        let f = filter();
        assert!(!f.should_exclude(".claude/my-projects/notes.md", SKIP));
        assert!(!f.should_exclude(".claude/projects.md", SKIP));
    }

    #[test]
    fn test_nested_root_directory_excluded() {
        let f = filter();
        assert!(f.should_exclude(".claude/projects/app/.claude/settings.json", KEEP));
        assert!(f.should_exclude("work/app/.claude/settings.json", KEEP));
        assert!(f.should_exclude("a/b/.claude", KEEP));
    }

    #[test]
    fn test_top_level_root_directory_allowed() {
        let f = filter();
        assert!(!f.should_exclude(".claude", KEEP));
        assert!(!f.should_exclude("~/.claude/settings.json", KEEP));
        // index 1 under the root name itself counts as top level
        assert!(!f.should_exclude(".claude/.claude/settings.json", KEEP));
        // index 1 under anything else is nested
        assert!(f.should_exclude("backup/.claude/settings.json", KEEP));
    }

    #[test]
    fn test_windows_separators_and_dot_segments() {
        let f = filter();
        assert!(f.should_exclude(".claude\\projects\\x.json", SKIP));
        assert!(!f.should_exclude("./.claude/settings.json", KEEP));
    }

    #[test]
    fn test_total_on_odd_input() {
        let f = filter();
        for path in ["", "/", "//", ".", "~", "projects", "\\\\"] {
            let first = f.should_exclude(path, SKIP);
            assert_eq!(first, f.should_exclude(path, SKIP));
        }
        assert!(!f.should_exclude("", SKIP));
        assert!(f.should_exclude("projects", SKIP));
    }
}
