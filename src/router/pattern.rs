//! Route pattern parsing.
//!
//! A pattern is a `/`-rooted sequence of literal text, named parameter segments
//! (`:name`, one whole segment) and at most one trailing wildcard segment (`*name`
//! or bare `*`, which binds the name `*`).

use crate::error::{FrameworkError, Result};

/// One piece of a parsed pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Literal bytes, including the separating slashes.
    Static(String),
    /// `:name`, captures one segment.
    Param(String),
    /// `*name`, captures the rest of the path.
    Wildcard(String),
}

/// Parsed route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pub tokens: Vec<Token>,
}

impl Pattern {
    /// Parse `pattern`; `case_sensitive = false` lower-cases literal text.
    pub fn parse(pattern: &str, case_sensitive: bool) -> Result<Self> {
        let invalid = |reason: &str| FrameworkError::InvalidRoutePattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if !pattern.starts_with('/') {
            return Err(invalid("pattern must start with '/'"));
        }

        let mut tokens: Vec<Token> = Vec::new();
        let mut literal = String::new();
        let segments: Vec<&str> = pattern[1..].split('/').collect();
        let last = segments.len() - 1;

        literal.push('/');
        for (i, segment) in segments.iter().enumerate() {
            if let Some(name) = segment.strip_prefix(':') {
                if !is_valid_name(name) {
                    return Err(invalid("parameter names must be non-empty [A-Za-z0-9_]"));
                }
                if tokens.iter().any(|t| matches!(t, Token::Param(n) if n == name)) {
                    return Err(invalid("duplicate parameter name"));
                }
                tokens.push(Token::Static(std::mem::take(&mut literal)));
                tokens.push(Token::Param(name.to_string()));
            } else if let Some(name) = segment.strip_prefix('*') {
                if i != last {
                    return Err(invalid("wildcard must be the last segment"));
                }
                if !name.is_empty() && !is_valid_name(name) {
                    return Err(invalid("wildcard names must be [A-Za-z0-9_]"));
                }
                let name = if name.is_empty() { "*" } else { name };
                tokens.push(Token::Static(std::mem::take(&mut literal)));
                tokens.push(Token::Wildcard(name.to_string()));
            } else {
                if segment.contains(':') || segment.contains('*') {
                    return Err(invalid(
                        "':' and '*' are only allowed at the start of a segment",
                    ));
                }
                if case_sensitive {
                    literal.push_str(segment);
                } else {
                    literal.push_str(&segment.to_ascii_lowercase());
                }
            }
            if i != last {
                literal.push('/');
            }
        }
        if !literal.is_empty() {
            tokens.push(Token::Static(literal));
        }
        tokens.retain(|t| !matches!(t, Token::Static(s) if s.is_empty()));

        Ok(Self { tokens })
    }

    /// Names bound by this pattern, in capture order.
    #[must_use]
    pub fn param_names(&self) -> Vec<String> {
        self.tokens
            .iter()
            .filter_map(|t| match t {
                Token::Param(n) | Token::Wildcard(n) => Some(n.clone()),
                Token::Static(_) => None,
            })
            .collect()
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}
