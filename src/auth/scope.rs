//! Scope authorization.
//!
//! A request is authorized only when *every* required scope appears in the
//! token's scope claim. An absent or empty claim grants nothing.

use std::collections::HashSet;
use std::fmt;

use super::token::Claims;

/// Ordered, de-duplicated set of scope names an operation demands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequiredScopes(Vec<String>);

impl RequiredScopes {
    /// Build from names; blank entries are dropped and duplicates collapsed.
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = Vec::new();
        for scope in scopes {
            let scope: String = scope.into();
            let scope = scope.trim();
            if !scope.is_empty() && !names.iter().any(|n| n == scope) {
                names.push(scope.to_string());
            }
        }
        Self(names)
    }

    /// Iterate the scope names in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Number of required scopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing is required.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RequiredScopes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

/// Whether `claims` grant every scope in `required`.
///
/// An empty `required` set is satisfied by any claims.
#[must_use]
pub fn has_required_scopes(claims: &Claims, required: &RequiredScopes) -> bool {
    let granted: HashSet<&str> = claims.scopes().collect();
    required.iter().all(|scope| granted.contains(scope))
}

/// Required scopes that `claims` do not grant, in declaration order.
#[must_use]
pub fn missing_scopes<'a>(claims: &Claims, required: &'a RequiredScopes) -> Vec<&'a str> {
    let granted: HashSet<&str> = claims.scopes().collect();
    required
        .iter()
        .filter(|scope| !granted.contains(scope))
        .collect()
}
