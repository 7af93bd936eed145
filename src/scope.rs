use anyhow::{Context, Result};
use regex::Regex;

/// Matches GraphQL schema and operation files.
pub const DEFAULT_SCHEMA_PATTERN: &str = r"\.graphqls?$";

/// The set of paths guarded by the review gate.
#[derive(Debug, Clone)]
pub struct SchemaScope {
    patterns: Vec<Regex>,
}

impl SchemaScope {
    /// Compiles `patterns`, falling back to [`DEFAULT_SCHEMA_PATTERN`] when
    /// none are given.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let sources: Vec<&str> = if patterns.is_empty() {
            vec![DEFAULT_SCHEMA_PATTERN]
        } else {
            patterns.iter().map(AsRef::as_ref).collect()
        };

        let patterns = sources
            .into_iter()
            .map(|p| Regex::new(p).with_context(|| format!("Invalid schema pattern: '{}'", p)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(path))
    }

    /// Returns the first changed path that falls inside the gate's scope.
    pub fn first_match<'a, S: AsRef<str>>(&self, files: &'a [S]) -> Option<&'a str> {
        files
            .iter()
            .map(AsRef::as_ref)
            .find(|path| self.matches(path))
    }
}

impl Default for SchemaScope {
    fn default() -> Self {
        Self {
            patterns: vec![Regex::new(DEFAULT_SCHEMA_PATTERN).expect("default pattern is valid")],
        }
    }
}
