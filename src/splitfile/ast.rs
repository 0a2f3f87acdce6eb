//! Typed Splitfile AST (spec §4.5 grammar), produced by `splitfile::parser` and consumed
//! by `splitfile::executor`. One variant per grammar production rather than a generic
//! node/decorator tree, per the REDESIGN FLAGS note against implicit registration —
//! commands here are plain data, not objects that register themselves.

use crate::config::EngineConfig;
use crate::model::Repository;

/// One table named by an `IMPORT` command, with its optional `AS` rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTable {
    pub name: String,
    pub alias: Option<String>,
}

impl ImportTable {
    pub fn target_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// One parsed, `$PARAM`-substituted Splitfile command (spec §4.5 grammar).
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Comment(String),
    Output {
        repository: Repository,
        image_hash: Option<String>,
    },
    Import {
        conn: Option<EngineConfig>,
        source_repository: Repository,
        source_tag: Option<String>,
        tables: Vec<ImportTable>,
    },
    Sql(String),
}

/// A parsed Splitfile: an ordered command list plus the substituted parameter map used
/// to produce it (kept for `rebuild`'s override semantics).
#[derive(Debug, Clone)]
pub struct Splitfile {
    pub commands: Vec<Command>,
}
