//! Canonical path form for archive-relative paths (component A).
//!
//! A canonical path is a sequence of slash-delimited, non-empty
//! components, always starting with `/`. The root is exactly `/`.
//! Comparison is case-insensitive (ordinal, not locale-aware). No
//! `.`/`..` collapsing happens here: paths arrive from the archive
//! catalog or from the kernel bridge, both of which are trusted to
//! already be resolved.

use std::fmt;

#[derive(Debug, Clone, Eq)]
pub struct CanonicalPath(String);

impl CanonicalPath {
    pub fn root() -> Self {
        CanonicalPath("/".to_string())
    }

    /// Normalizes an arbitrary input string into canonical form.
    pub fn normalize(input: &str) -> Self {
        if input.is_empty() {
            return Self::root();
        }
        let mut s = input.replace('\\', "/");
        if !s.starts_with('/') {
            s.insert(0, '/');
        }
        while s.len() > 1 && s.ends_with('/') {
            s.pop();
        }
        if s.is_empty() {
            s.push('/');
        }
        CanonicalPath(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Components of the path, excluding the leading empty segment
    /// produced by the leading slash.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    /// The final path component (the file or directory name), or
    /// `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.components().last()
    }

    /// The canonical path of the parent directory. The root is its own
    /// parent.
    pub fn parent(&self) -> CanonicalPath {
        if self.is_root() {
            return self.clone();
        }
        match self.0.rfind('/') {
            Some(0) => CanonicalPath::root(),
            Some(idx) => CanonicalPath(self.0[..idx].to_string()),
            None => CanonicalPath::root(),
        }
    }

    /// Every ancestor of this path, nearest first, root last.
    pub fn ancestors(&self) -> Vec<CanonicalPath> {
        let mut out = Vec::new();
        let mut cur = self.parent();
        loop {
            let is_root = cur.is_root();
            out.push(cur.clone());
            if is_root {
                break;
            }
            cur = cur.parent();
        }
        out
    }

    /// A key suitable for case-insensitive map lookups and comparisons.
    pub fn fold_key(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    pub fn join(&self, name: &str) -> CanonicalPath {
        if self.is_root() {
            CanonicalPath::normalize(&format!("/{name}"))
        } else {
            CanonicalPath::normalize(&format!("{}/{name}", self.0))
        }
    }
}

impl PartialEq for CanonicalPath {
    fn eq(&self, other: &Self) -> bool {
        self.fold_key() == other.fold_key()
    }
}

impl std::hash::Hash for CanonicalPath {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.fold_key().hash(state);
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CanonicalPath {
    fn from(s: &str) -> Self {
        CanonicalPath::normalize(s)
    }
}

impl From<String> for CanonicalPath {
    fn from(s: String) -> Self {
        CanonicalPath::normalize(&s)
    }
}

/// Matches `*` (any run of characters) and `?` (exactly one character),
/// case-insensitively. `*` and `*.*` are treated as matching everything,
/// same as the Windows `FindFirstFile` convention the bridge expects.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    if pattern == "*" || pattern == "*.*" {
        return true;
    }
    let pattern: Vec<char> = pattern.to_ascii_lowercase().chars().collect();
    let name: Vec<char> = name.to_ascii_lowercase().chars().collect();
    glob_match_rec(&pattern, &name)
}

fn glob_match_rec(pattern: &[char], name: &[char]) -> bool {
    match pattern.first() {
        None => name.is_empty(),
        Some('*') => {
            glob_match_rec(&pattern[1..], name)
                || (!name.is_empty() && glob_match_rec(pattern, &name[1..]))
        }
        Some('?') => !name.is_empty() && glob_match_rec(&pattern[1..], &name[1..]),
        Some(c) => name.first() == Some(c) && glob_match_rec(&pattern[1..], &name[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_backslashes_and_trailing_slash() {
        assert_eq!(CanonicalPath::normalize("a\\b\\c/").as_str(), "/a/b/c");
        assert_eq!(CanonicalPath::normalize("").as_str(), "/");
        assert_eq!(CanonicalPath::normalize("/").as_str(), "/");
        assert_eq!(CanonicalPath::normalize("readme.txt").as_str(), "/readme.txt");
    }

    #[test]
    fn case_insensitive_equality() {
        let a = CanonicalPath::normalize("/A/B/C.TXT");
        let b = CanonicalPath::normalize("/a/b/c.txt");
        assert_eq!(a, b);
    }

    #[test]
    fn ancestors_walk_to_root() {
        let p = CanonicalPath::normalize("/a/b/c.dat");
        let ancestors: Vec<String> = p.ancestors().iter().map(|p| p.to_string()).collect();
        assert_eq!(ancestors, vec!["/a/b".to_string(), "/a".to_string(), "/".to_string()]);
    }

    #[test]
    fn glob_semantics() {
        assert!(glob_match("*", "anything.bin"));
        assert!(glob_match("*.*", "anything.bin"));
        assert!(glob_match("*.txt", "Readme.TXT"));
        assert!(!glob_match("*.txt", "readme.md"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "abbc"));
    }
}
