//! Path pattern matching.
//!
//! # Responsibilities
//! - Compile endpoint path patterns into anchored regular expressions
//! - Match request paths against compiled patterns
//!
//! # Design Decisions
//! - `:name` matches exactly one non-empty path segment
//! - `*` matches any suffix, including the empty one
//! - Everything else matches literally
//! - Patterns are compiled once, when the router is built

use regex::Regex;

/// A compiled endpoint path.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
}

impl PathPattern {
    /// Compile a path pattern such as `/users/:id/orders/*`.
    pub fn compile(path: &str) -> Result<Self, regex::Error> {
        let mut expr = String::with_capacity(path.len() + 8);
        expr.push('^');

        let mut segments = path.split('/').peekable();
        while let Some(segment) = segments.next() {
            if segment.starts_with(':') && segment.len() > 1 {
                expr.push_str("[^/]+");
            } else {
                let mut literals = segment.split('*').peekable();
                while let Some(literal) = literals.next() {
                    expr.push_str(&regex::escape(literal));
                    if literals.peek().is_some() {
                        expr.push_str(".*");
                    }
                }
            }
            if segments.peek().is_some() {
                expr.push('/');
            }
        }

        expr.push('$');
        Ok(Self {
            source: path.to_string(),
            regex: Regex::new(&expr)?,
        })
    }

    /// True if the whole path matches.
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Pattern text as configured.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True if the pattern has no parameters or wildcards.
    pub fn is_literal(path: &str) -> bool {
        !path.contains('*') && !path.split('/').any(|s| s.starts_with(':'))
    }
}
