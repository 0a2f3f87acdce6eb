//! Repository identity: a named container of versioned tables (spec §3).

use std::fmt;

use serde::{Deserialize, Serialize};

/// A repository is identified by `(namespace, name)`. Within one engine, repository
/// identity is unique (spec §3 invariant).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Repository {
    pub namespace: String,
    pub name: String,
}

impl Repository {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Unqualified repository, `schema()` == `name`.
    pub fn unqualified(name: impl Into<String>) -> Self {
        Self::new("", name)
    }

    /// The live SQL schema this repository materializes into: `namespace/name` when
    /// namespace is non-empty, else `name` (spec §3).
    pub fn schema(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.namespace, self.name)
        }
    }

    /// Parse `namespace/name` or bare `name` (the CLI's `<repo>` argument form).
    pub fn parse(s: &str) -> Self {
        match s.split_once('/') {
            Some((ns, name)) => Repository::new(ns, name),
            None => Repository::unqualified(s),
        }
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.schema())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_bare_name_without_namespace() {
        assert_eq!(Repository::unqualified("fruits").schema(), "fruits");
    }

    #[test]
    fn schema_joins_namespace_and_name() {
        assert_eq!(Repository::new("alice", "fruits").schema(), "alice/fruits");
    }

    #[test]
    fn parse_roundtrips_through_schema() {
        let r = Repository::parse("alice/fruits");
        assert_eq!(r.schema(), "alice/fruits");
        let r2 = Repository::parse("fruits");
        assert_eq!(r2.schema(), "fruits");
    }
}
