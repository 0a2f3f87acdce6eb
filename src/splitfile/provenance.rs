//! Renders a `ProvenanceRecord` chain back into canonical Splitfile text, the
//! regeneration half of `provenance(image)` / `rebuild(image, substitutions)` (spec
//! §4.5).

use crate::model::{ProvenanceRecord, Repository};
use crate::splitfile::ast::{Command, ImportTable};

/// Re-serializes one executed command back to the line of Splitfile text it was parsed
/// from (modulo whitespace canonicalization).
pub fn render_command(command: &Command) -> String {
    match command {
        Command::Comment(text) => format!("# {text}"),
        Command::Output { repository, image_hash } => match image_hash {
            Some(hash) => format!("OUTPUT {repository} {hash}"),
            None => format!("OUTPUT {repository}"),
        },
        Command::Import {
            conn,
            source_repository,
            source_tag,
            tables,
        } => {
            let conn_prefix = conn.as_ref().map(|c| format!("{} ", c.to_conn_string())).unwrap_or_default();
            let repo_ref = match source_tag {
                Some(tag) => format!("{source_repository}:{tag}"),
                None => source_repository.to_string(),
            };
            let table_list = tables.iter().map(render_import_table).collect::<Vec<_>>().join(", ");
            format!("FROM {conn_prefix}{repo_ref} IMPORT {table_list}")
        }
        Command::Sql(stmt) => format!("SQL {stmt}"),
    }
}

fn render_import_table(table: &ImportTable) -> String {
    match &table.alias {
        Some(alias) => format!("{} AS {}", table.name, alias),
        None => table.name.clone(),
    }
}

/// Reconstructs the full Splitfile text that produced `output_repo`, given the chain of
/// `ProvenanceRecord`s that built it, oldest command first.
pub fn reconstruct_script(output_repo: &Repository, records: &[ProvenanceRecord]) -> String {
    let mut lines = vec![format!("OUTPUT {output_repo}")];
    lines.extend(records.iter().map(|r| r.script.clone()));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn renders_import_with_aliases_and_no_connection() {
        let cmd = Command::Import {
            conn: None,
            source_repository: Repository::unqualified("fruits"),
            source_tag: Some("stable".to_string()),
            tables: vec![
                ImportTable { name: "apples".to_string(), alias: None },
                ImportTable { name: "pears".to_string(), alias: Some("fuzzy_pears".to_string()) },
            ],
        };
        assert_eq!(render_command(&cmd), "FROM fruits:stable IMPORT apples, pears AS fuzzy_pears");
    }

    #[test]
    fn renders_import_with_connection_string() {
        let cmd = Command::Import {
            conn: Some(EngineConfig {
                host: "db.example.com".to_string(),
                port: 5432,
                user: "alice".to_string(),
                password: "s3cret".to_string(),
                db_name: "warehouse".to_string(),
            }),
            source_repository: Repository::unqualified("fruits"),
            source_tag: None,
            tables: vec![ImportTable { name: "apples".to_string(), alias: None }],
        };
        assert_eq!(
            render_command(&cmd),
            "FROM alice:s3cret@db.example.com:5432/warehouse fruits IMPORT apples"
        );
    }

    #[test]
    fn reconstructs_script_from_records() {
        let repo = Repository::unqualified("fruits");
        let records = vec![crate::model::ProvenanceRecord {
            repository: repo.clone(),
            image_hash: crate::hash::ObjectHash::compute(b"x"),
            sources: vec![],
            script: "SQL select * from apples".to_string(),
        }];
        let script = reconstruct_script(&repo, &records);
        assert_eq!(script, "OUTPUT fruits\nSQL select * from apples");
    }
}
