//! Gitignore-style exclusion rules for archive builds.
//!
//! Supported syntax: blank lines and `#` comments are skipped, `!` negates,
//! a trailing `/` restricts a rule to directories, and a rule containing any
//! other `/` is anchored at the source root. Unanchored rules match the
//! entry's file name at any depth. Globs (`*`, `?`, `[..]`, `**`) follow
//! `glob::Pattern` with literal separators. The last matching rule wins.

use std::fs;
use std::io;
use std::path::Path;

use glob::{MatchOptions, Pattern};

/// Name of the per-project ignore file read from the source root.
pub const IGNORE_FILE_NAME: &str = ".appignore";

/// Rules used when a project has no ignore file.
const DEFAULT_RULES: &[&str] = &[
    ".git/",
    ".hg/",
    ".svn/",
    ".bzr/",
    "__pycache__/",
    "*.py[cod]",
    "*.swp",
    "*.swo",
    "*~",
    "*.log",
    ".DS_Store",
    "Thumbs.db",
    "desktop.ini",
];

/// Extra rules for production archives.
const PRODUCTION_RULES: &[&str] = &[".git/", "__pycache__/", "test*", "tests/"];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    /// Source line, used for de-duplication.
    line: String,
    pattern: Pattern,
    negated: bool,
    dir_only: bool,
    anchored: bool,
}

impl Rule {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let (negated, body) = match line.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let (dir_only, body) = match body.strip_suffix('/') {
            Some(rest) => (true, rest),
            None => (false, body),
        };
        let anchored = body.contains('/');
        let body = body.trim_start_matches('/');
        if body.is_empty() {
            return None;
        }

        match Pattern::new(body) {
            Ok(pattern) => Some(Self {
                line: line.to_string(),
                pattern,
                negated,
                dir_only,
                anchored,
            }),
            Err(e) => {
                tracing::warn!("Skipping invalid ignore rule '{}': {}", line, e);
                None
            }
        }
    }

    fn matches(&self, rel_path: &str, file_name: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        let candidate = if self.anchored { rel_path } else { file_name };
        self.pattern.matches_with(candidate, MATCH_OPTIONS)
    }
}

/// An ordered set of compiled ignore rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreRules {
    rules: Vec<Rule>,
}

impl IgnoreRules {
    /// Compile rules from the text of an ignore file. Invalid globs are
    /// skipped with a warning.
    pub fn parse(text: &str) -> Self {
        Self {
            rules: text.lines().filter_map(Rule::parse).collect(),
        }
    }

    /// VCS directories, bytecode caches, swap/log files and OS metadata.
    pub fn defaults() -> Self {
        Self::from_lines(DEFAULT_RULES)
    }

    /// Rules applied on top of the base set for production archives.
    pub fn production() -> Self {
        Self::from_lines(PRODUCTION_RULES)
    }

    fn from_lines(lines: &[&str]) -> Self {
        Self {
            rules: lines.iter().copied().filter_map(Rule::parse).collect(),
        }
    }

    /// Rules from `<source_root>/.appignore`, or [`IgnoreRules::defaults`] if
    /// the project has none.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the ignore file exists but cannot be read.
    pub fn load(source_root: &Path) -> io::Result<Self> {
        let path = source_root.join(IGNORE_FILE_NAME);
        if path.is_file() {
            tracing::debug!("Using ignore rules from {}", path.display());
            Ok(Self::parse(&fs::read_to_string(&path)?))
        } else {
            Ok(Self::defaults())
        }
    }

    /// `self` followed by the rules of `other` that `self` lacks.
    pub fn union(&self, other: &Self) -> Self {
        let mut rules = self.rules.clone();
        for rule in &other.rules {
            if !rules.iter().any(|r| r.line == rule.line) {
                rules.push(rule.clone());
            }
        }
        Self { rules }
    }

    /// Whether `rel_path` (forward-slash separated, relative to the source
    /// root) is excluded.
    ///
    /// Only the entry itself is tested; callers walking a tree prune
    /// ignored directories so their contents are never visited.
    pub fn is_ignored(&self, rel_path: &str, is_dir: bool) -> bool {
        let rel_path = rel_path.trim_matches('/');
        let file_name = rel_path.rsplit('/').next().unwrap_or(rel_path);

        let mut ignored = false;
        for rule in &self.rules {
            if rule.matches(rel_path, file_name, is_dir) {
                ignored = !rule.negated;
            }
        }
        ignored
    }

    /// Number of compiled rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns `true` if there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn comments_and_blanks_are_skipped() {
        let rules = IgnoreRules::parse("# comment\n\n*.tmp\n");
        assert_eq!(rules.len(), 1);
    }

    #[test]
    fn unanchored_rule_matches_at_any_depth() {
        let rules = IgnoreRules::parse("*.log");
        assert!(rules.is_ignored("debug.log", false));
        assert!(rules.is_ignored("widgets/deep/trace.log", false));
        assert!(!rules.is_ignored("widgets/logger.py", false));
    }

    #[test]
    fn anchored_rule_matches_only_from_root() {
        let rules = IgnoreRules::parse("/build\ndocs/*.md");
        assert!(rules.is_ignored("build", true));
        assert!(!rules.is_ignored("widgets/build", true));
        assert!(rules.is_ignored("docs/intro.md", false));
        assert!(!rules.is_ignored("docs/api/intro.md", false));
    }

    #[test]
    fn dir_only_rule_skips_files() {
        let rules = IgnoreRules::parse("cache/");
        assert!(rules.is_ignored("widgets/cache", true));
        assert!(!rules.is_ignored("widgets/cache", false));
    }

    #[test]
    fn negation_last_match_wins() {
        let rules = IgnoreRules::parse("*.log\n!keep.log");
        assert!(rules.is_ignored("other.log", false));
        assert!(!rules.is_ignored("keep.log", false));
    }

    #[test]
    fn double_star_crosses_directories() {
        let rules = IgnoreRules::parse("widgets/**/fixtures");
        assert!(rules.is_ignored("widgets/a/b/fixtures", true));
        assert!(rules.is_ignored("widgets/fixtures", true));
    }

    #[test]
    fn defaults_cover_vcs_and_caches() {
        let rules = IgnoreRules::defaults();
        assert!(rules.is_ignored(".git", true));
        assert!(rules.is_ignored("widgets/__pycache__", true));
        assert!(rules.is_ignored("widgets/mod.pyc", false));
        assert!(rules.is_ignored(".DS_Store", false));
        assert!(!rules.is_ignored("widgets/main.mod", false));
    }

    #[test]
    fn production_rules_drop_tests() {
        let rules = IgnoreRules::production();
        assert!(rules.is_ignored("widgets/test_helper.mod", false));
        assert!(rules.is_ignored("widgets/tests", true));
        assert!(!rules.is_ignored("widgets/contest.mod", false));
    }

    #[test]
    fn union_deduplicates() {
        let merged = IgnoreRules::defaults().union(&IgnoreRules::production());
        // .git/ and __pycache__/ appear in both sets
        assert_eq!(
            merged.len(),
            IgnoreRules::defaults().len() + IgnoreRules::production().len() - 2
        );
    }

    #[test]
    fn load_prefers_project_file() {
        let dir = tempdir().unwrap();
        assert_eq!(IgnoreRules::load(dir.path()).unwrap(), IgnoreRules::defaults());

        fs::write(dir.path().join(IGNORE_FILE_NAME), "secret.txt\n").unwrap();
        let rules = IgnoreRules::load(dir.path()).unwrap();
        assert_eq!(rules.len(), 1);
        assert!(rules.is_ignored("secret.txt", false));
        assert!(!rules.is_ignored(".git", true));
    }
}
