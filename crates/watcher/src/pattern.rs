//! Include/exclude pattern resolution
//!
//! User patterns are compiled into an ordered list of absolute globs. A
//! leading `!` turns a pattern into an exclusion. Rules are folded in order
//! and the last one that matches decides, so
//! `["**/*", "!sub/**/*", "sub/keep/**/*"]` drops everything under `sub`
//! and then takes `sub/keep` back.

use globset::{Candidate, GlobBuilder, GlobMatcher};
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, WatchError};

/// Characters that make a path segment a glob rather than a literal
const GLOB_META: &[char] = &['*', '?', '[', ']', '{', '}'];

#[derive(Debug, Clone)]
struct MatchRule {
    glob: String,
    matcher: GlobMatcher,
    negative: bool,
    /// Deepest directory the pattern names literally
    base: PathBuf,
}

/// Compiled, immutable rule set
#[derive(Debug, Clone)]
pub struct MatchRules {
    rules: Vec<MatchRule>,
    base_dir: PathBuf,
}

impl MatchRules {
    /// Compile `patterns` relative to `base_dir`
    ///
    /// `base_dir` must be absolute. Fails on the first malformed pattern or
    /// when no pattern is given.
    pub fn resolve<I, S>(patterns: I, base_dir: &Path) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = patterns
            .into_iter()
            .map(|pattern| compile(pattern.as_ref(), base_dir))
            .collect::<Result<Vec<_>>>()?;

        if rules.is_empty() {
            return Err(WatchError::NoPatterns);
        }

        Ok(Self {
            rules,
            base_dir: base_dir.to_path_buf(),
        })
    }

    /// True when the last rule matching `path` is an inclusion
    pub fn matches(&self, path: &Path) -> bool {
        let candidate = Candidate::new(path);
        self.rules.iter().fold(false, |matched, rule| {
            if rule.matcher.is_match_candidate(&candidate) {
                !rule.negative
            } else {
                matched
            }
        })
    }

    /// True when `path` is, or leads to, the literal directory of an inclusion
    ///
    /// Such directories are watched even though they do not match, because
    /// something below them might (`a` has to be watched to reach `a/b/**`).
    pub fn is_ancestor_of_pattern(&self, path: &Path) -> bool {
        self.rules
            .iter()
            .any(|rule| !rule.negative && rule.base.starts_with(path))
    }

    /// Whether the engine should track `path` at all
    pub fn wants(&self, path: &Path) -> bool {
        self.matches(path) || self.is_ancestor_of_pattern(path)
    }

    /// Directories where discovery starts
    ///
    /// The literal directories of all inclusions, minus those nested inside
    /// another one.
    pub fn roots(&self) -> Vec<PathBuf> {
        let mut bases: Vec<&PathBuf> = self
            .rules
            .iter()
            .filter(|rule| !rule.negative)
            .map(|rule| &rule.base)
            .collect();
        bases.sort();
        bases.dedup();

        let mut roots: Vec<PathBuf> = Vec::new();
        for base in bases {
            if !roots.iter().any(|root| base.starts_with(root)) {
                roots.push(base.clone());
            }
        }
        roots
    }

    /// Directory relative patterns were resolved against
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Compiled globs with their negation flag, in rule order
    pub fn globs(&self) -> impl Iterator<Item = (&str, bool)> + '_ {
        self.rules
            .iter()
            .map(|rule| (rule.glob.as_str(), rule.negative))
    }
}

fn compile(pattern: &str, base_dir: &Path) -> Result<MatchRule> {
    let (negative, body) = match pattern.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, pattern),
    };

    // Backslash is an escape character in globs everywhere but Windows
    let body = if cfg!(windows) {
        body.replace('\\', "/")
    } else {
        body.to_string()
    };

    let (base, tail) = split_literal(&body, base_dir);
    let glob = join_glob(&base, &tail);

    let matcher = GlobBuilder::new(&glob)
        .literal_separator(true)
        .build()
        .map_err(|source| WatchError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?
        .compile_matcher();

    Ok(MatchRule {
        glob,
        matcher,
        negative,
        base,
    })
}

/// Split a pattern into its literal leading directory and the glob tail
///
/// `.` and `..` in the literal part are folded lexically. The final
/// segment always belongs to the tail since it names what is matched.
fn split_literal(pattern: &str, base_dir: &Path) -> (PathBuf, String) {
    let components: Vec<Component<'_>> = Path::new(pattern).components().collect();
    let mut dir = base_dir.to_path_buf();
    let mut tail: Vec<String> = Vec::new();

    for (idx, component) in components.iter().enumerate() {
        if !tail.is_empty() {
            tail.push(component.as_os_str().to_string_lossy().into_owned());
            continue;
        }

        match component {
            // An absolute pattern replaces the base directory
            Component::Prefix(_) | Component::RootDir => dir.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                dir.pop();
            }
            Component::Normal(name) => {
                let name = name.to_string_lossy();
                if idx + 1 == components.len() || name.contains(GLOB_META) {
                    tail.push(name.into_owned());
                } else {
                    dir.push(name.as_ref());
                }
            }
        }
    }

    (dir, tail.join("/"))
}

fn join_glob(dir: &Path, tail: &str) -> String {
    let mut dir_str = dir.to_string_lossy().into_owned();
    if cfg!(windows) {
        dir_str = dir_str.replace('\\', "/");
    }

    let mut glob = escape(&dir_str);
    if !tail.is_empty() {
        if !glob.ends_with('/') {
            glob.push('/');
        }
        glob.push_str(tail);
    }
    glob
}

/// Quote glob metacharacters appearing in a literal path
fn escape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if GLOB_META.contains(&c) {
            out.push('[');
            out.push(c);
            out.push(']');
        } else {
            out.push(c);
        }
    }
    out
}
