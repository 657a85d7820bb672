//! Extraction of module definitions and references from free-form Fortran.
//!
//! The scanner is line oriented: it strips comments and string-free prefixes
//! and looks only at statement keywords, which is enough to recover
//! `module`, `submodule`, `program` and `use` relationships.

use super::{AnalysisError, SourceUnit};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// Keywords that may follow `module` without naming a module.
const MODULE_PROCEDURE_KEYWORDS: &[&str] = &["procedure", "function", "subroutine"];

/// Scan the file at `path`, recording it under `unit_path`.
///
/// # Errors
///
/// Returns [`AnalysisError::Read`] if the file cannot be read.
pub fn scan_file(path: &Utf8Path, unit_path: Utf8PathBuf) -> Result<SourceUnit, AnalysisError> {
    let text = fs::read_to_string(path.as_std_path()).map_err(|source| AnalysisError::Read {
        path: path.to_owned(),
        source,
    })?;
    Ok(scan_source(unit_path, &text))
}

/// Scan Fortran source text.
///
/// Names are lower-cased. Intrinsic modules (`use, intrinsic ::`) are
/// dropped here because they can never be provided locally.
///
/// # Examples
///
/// ```
/// use fabline::deps::scan_source;
/// let unit = scan_source("driver.f90".into(), "program Driver\n  use Physics_Mod, only: step\nend program\n");
/// assert_eq!(unit.programs, vec!["driver".to_owned()]);
/// assert_eq!(unit.uses, vec!["physics_mod".to_owned()]);
/// ```
#[must_use]
pub fn scan_source(path: Utf8PathBuf, text: &str) -> SourceUnit {
    let mut unit = SourceUnit::new(path);
    for raw in text.lines() {
        let line = strip_comment(raw).trim().to_ascii_lowercase();
        let mut words = line.split_whitespace();
        match words.next() {
            Some("module") => {
                if let Some(name) = words.next().map(identifier)
                    && !name.is_empty()
                    && !MODULE_PROCEDURE_KEYWORDS.contains(&name)
                {
                    push_unique(&mut unit.modules, name);
                }
            }
            Some("program") => {
                if let Some(name) = words.next().map(identifier)
                    && !name.is_empty()
                {
                    push_unique(&mut unit.programs, name);
                }
            }
            Some(first) if first.starts_with("submodule") => {
                if let Some(parent) = submodule_parent(&line) {
                    push_unique(&mut unit.uses, parent);
                }
            }
            Some(first) if first == "use" || first.starts_with("use,") || first.starts_with("use::") => {
                if let Some(name) = used_module(&line) {
                    push_unique(&mut unit.uses, name);
                }
            }
            _ => {}
        }
    }
    unit
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|existing| existing == name) {
        list.push(name.to_owned());
    }
}

/// Leading identifier characters of `word`.
fn identifier(word: &str) -> &str {
    let end = word
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(word.len());
    word.get(..end).unwrap_or_default()
}

/// Remove a trailing `!` comment, ignoring `!` inside string literals.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    for (idx, c) in line.char_indices() {
        match (quote, c) {
            (None, '!') => return line.get(..idx).unwrap_or_default(),
            (None, '\'' | '"') => quote = Some(c),
            (Some(open), _) if open == c => quote = None,
            _ => {}
        }
    }
    line
}

/// Module named by a `use` statement, or `None` for intrinsic modules.
fn used_module(line: &str) -> Option<&str> {
    let statement = line.strip_prefix("use")?.trim_start();
    let rest = if let Some(attrs) = statement.strip_prefix(',') {
        let (nature, after) = attrs.split_once("::")?;
        if nature.trim() == "intrinsic" {
            return None;
        }
        after
    } else {
        statement.strip_prefix("::").unwrap_or(statement)
    };
    let name = identifier(rest.trim_start());
    (!name.is_empty()).then_some(name)
}

/// Ancestor module of `submodule (parent[:ancestor]) name`.
fn submodule_parent(line: &str) -> Option<&str> {
    let open = line.find('(')?;
    let close = line.find(')')?;
    let inner = line.get(open + 1..close)?;
    let parent = identifier(inner.split(':').next()?.trim());
    (!parent.is_empty()).then_some(parent)
}
