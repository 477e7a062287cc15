//! Selector (`n`) resolution for partial up/down.
//!
//! A selector is a count, a migration name or a timestamp. Resolving it
//! against an ordered list yields the prefix ending at the first match.
//! No match yields an empty prefix.
//!
//! All-digit selectors shorter than a full `YYYYMMDDHHMMSS` timestamp are
//! counts only. Anything else matches the timestamp or the name of an id.

use std::fmt;
use std::str::FromStr;

use crate::migration::{Migration, MigrationId};

const TIMESTAMP_DIGITS: usize = 14;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector(String);

impl Selector {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn matches(&self, position: usize, id: &MigrationId) -> bool {
        let n = self.0.as_str();
        if let Some(count) = self.count() {
            return count == position + 1;
        }
        id.timestamp() == n || id.name() == Some(n)
    }

    fn count(&self) -> Option<usize> {
        if self.0.len() >= TIMESTAMP_DIGITS || !self.0.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        self.0.parse().ok()
    }

    /// Length of the selected prefix of `ids`.
    pub fn prefix_len<'a>(&self, ids: impl IntoIterator<Item = &'a MigrationId>) -> usize {
        let ids = ids.into_iter();
        if self.0.is_empty() {
            return ids.count();
        }
        ids.enumerate()
            .find(|(position, id)| self.matches(*position, id))
            .map_or(0, |(position, _)| position + 1)
    }

    pub fn resolve<'a>(&self, migrations: &'a [Migration]) -> &'a [Migration] {
        let len = self.prefix_len(migrations.iter().map(|m| &m.id));
        &migrations[..len]
    }
}

impl FromStr for Selector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Selector::new(s))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
