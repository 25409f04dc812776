//! Bookmarks: causal-consistency tokens
//!
//! A bookmark is an opaque token naming a point in the database's replication
//! history. A transaction started with a set of bookmarks only runs once the
//! serving member has caught up with all of them, so a reader seeded with a
//! writer's bookmarks observes that writer's commits.
//!
//! [`Bookmarks`] is a value type:
//! - Merging is set union; no operation removes a token
//! - Every operation returns a new set, the receiver is never touched
//! - Cloning is cheap (shared immutable storage)

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Immutable set of bookmark tokens
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Bookmarks {
    tokens: Arc<BTreeSet<String>>,
}

impl Bookmarks {
    /// The empty set
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a set from any collection of tokens
    ///
    /// Empty strings are not valid tokens and are skipped.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: BTreeSet<String> = tokens
            .into_iter()
            .map(Into::into)
            .filter(|t| !t.is_empty())
            .collect();
        Self {
            tokens: Arc::new(tokens),
        }
    }

    /// Union of `self` and `other`
    pub fn merge(&self, other: &Bookmarks) -> Bookmarks {
        if other.tokens.is_subset(&self.tokens) {
            return self.clone();
        }
        if self.tokens.is_subset(&other.tokens) {
            return other.clone();
        }
        let mut tokens = (*self.tokens).clone();
        tokens.extend(other.tokens.iter().cloned());
        Bookmarks {
            tokens: Arc::new(tokens),
        }
    }

    /// `self` plus one token
    pub fn with_token(&self, token: impl Into<String>) -> Bookmarks {
        let token = token.into();
        if token.is_empty() || self.tokens.contains(&token) {
            return self.clone();
        }
        let mut tokens = (*self.tokens).clone();
        tokens.insert(token);
        Bookmarks {
            tokens: Arc::new(tokens),
        }
    }

    /// Whether `token` is in the set
    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    /// Whether every token of `other` is also in `self`
    pub fn is_superset(&self, other: &Bookmarks) -> bool {
        self.tokens.is_superset(&other.tokens)
    }

    /// Number of tokens
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// True if there are no tokens
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Iterate the tokens in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }

    /// Copy the tokens out, e.g. to hand them to a transport
    pub fn to_vec(&self) -> Vec<String> {
        self.tokens.iter().cloned().collect()
    }
}

impl fmt::Debug for Bookmarks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.tokens.iter()).finish()
    }
}

impl<S: Into<String>> FromIterator<S> for Bookmarks {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Bookmarks::from_tokens(iter)
    }
}

impl Serialize for Bookmarks {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.tokens.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Bookmarks {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tokens = Vec::<String>::deserialize(deserializer)?;
        Ok(Bookmarks::from_tokens(tokens))
    }
}
