//! Row decoding: one logical row may span several CSV files whose columns
//! are correlated by the per-column templates. A template value addresses a
//! source column as `~<FileName>:<column>`.

use super::LoaderError;
use crate::config::FieldTemplateCfg;
use crate::rsr::{parse_rules, RuleSource};
use std::collections::HashMap;

/// Field-name to decoded value for a single logical row.
pub type LoaderData = HashMap<String, String>;

/// The tenant-scoped key a row belongs to.
pub fn tenant_key(data: &LoaderData) -> String {
    format!(
        "{}:{}",
        data.get("Tenant").map(String::as_str).unwrap_or(""),
        data.get("ID").map(String::as_str).unwrap_or("")
    )
}

/// All file names the templates of a type reference.
pub fn files_for_templates(templates: &[FieldTemplateCfg]) -> Vec<String> {
    let mut files = Vec::new();
    for template in templates {
        let Ok(rules) = parse_rules(&template.value) else {
            continue;
        };
        for rule in rules {
            if let RuleSource::Path(path) = &rule.source {
                if let Some((file, _)) = path.split_once(':') {
                    if !files.iter().any(|f| f == file) {
                        files.push(file.to_string());
                    }
                }
            }
        }
    }
    files
}

/// Decode one record of `file_name` into the row-local mapping. Templates
/// whose dynamic rules address other files are left for those files'
/// records; literal-only templates apply to every record and are
/// idempotent.
pub fn update_from_csv(
    data: &mut LoaderData,
    file_name: &str,
    record: &csv::StringRecord,
    templates: &[FieldTemplateCfg],
) -> Result<(), LoaderError> {
    for template in templates {
        let rules = parse_rules(&template.value)?;
        let references_this_file = rules.iter().any(|rule| match &rule.source {
            RuleSource::Path(path) => path
                .split_once(':')
                .is_some_and(|(file, _)| file == file_name),
            RuleSource::Literal(_) => false,
        });
        let all_literal = rules
            .iter()
            .all(|rule| matches!(rule.source, RuleSource::Literal(_)));
        if !references_this_file && !all_literal {
            continue;
        }

        let lookup = |path: &str| -> Option<String> {
            let (file, column) = path.split_once(':')?;
            if file != file_name {
                return None;
            }
            let index: usize = column.parse().ok()?;
            record.get(index).map(str::to_string)
        };
        let mut value = String::new();
        for rule in &rules {
            if let Some(part) = rule.evaluate(&lookup)? {
                value.push_str(&part);
            }
        }
        if value.is_empty() {
            if template.mandatory && references_this_file {
                return Err(LoaderError::MissingField {
                    field: template.label(),
                });
            }
            continue;
        }
        data.insert(template.path.clone(), value);
    }
    Ok(())
}
