//! Rewrite string concatenation in `stop` statements.
//!
//! The Fortran parser used by the transformer rejects `stop` and
//! `error stop` statements whose stop code is a `//` concatenation, which the
//! configuration generators emit (often split across `&` continuation lines).
//! This pass rewrites such statements in every generated `.f90` file:
//!
//! - when every operand is a character literal, the operands are merged into
//!   a single literal: `stop 'a: ' // 'b'` becomes `stop 'a: b'`;
//! - otherwise the message is written to unit 0 first and the statement
//!   becomes a bare `stop`.
//!
//! Only statements that begin with the keyword are rewritten. Statements
//! with a string literal split across lines, a `;` or a top-level `,` are
//! left alone.

use super::{
    Stage, StageContext, StageFailure, StageId, StageOutcome, StageSpec, generated_with_extension,
    workers::parallel_map,
};
use crate::state::StateField;
use std::fs;
use tracing::debug;

/// Fixed stage applying [`rewrite_stop_concatenation`] to generated sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopConcatenationWorkaround;

impl Stage for StopConcatenationWorkaround {
    fn spec(&self) -> StageSpec {
        StageSpec {
            id: StageId::StopConcatenationWorkaround,
            requires: &[StateField::GeneratedFiles],
            effects: &[],
        }
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> Result<StageOutcome, StageFailure> {
        let inputs = generated_with_extension(ctx.state, "f90");
        if inputs.is_empty() {
            return Ok(StageOutcome::skipped("no generated .f90 sources"));
        }
        let shared = &*ctx;
        let rewritten = parallel_map(&inputs, shared.config.jobs, shared.cancel, |path| {
            let text = fs::read_to_string(path).map_err(|err| StageFailure::io(path, err))?;
            let Some(fixed) = rewrite_stop_concatenation(&text) else {
                return Ok(false);
            };
            fs::write(path, fixed).map_err(|err| StageFailure::io(path, err))?;
            debug!(file = %path, "rewrote stop concatenation");
            Ok(true)
        })?;
        let count = rewritten.into_iter().filter(|changed| *changed).count();
        debug!(count, "stop concatenation workaround applied");
        Ok(StageOutcome::Ran)
    }
}

/// Rewrite concatenated stop codes in free-form source `text`.
///
/// Returns `None` when nothing needed rewriting.
///
/// # Examples
///
/// ```
/// use fabline::stage::rewrite_stop_concatenation;
/// let source = "  stop 'feign_config: ' // &\n       'Unable to close temporary file'\n";
/// assert_eq!(
///     rewrite_stop_concatenation(source).as_deref(),
///     Some("  stop 'feign_config: Unable to close temporary file'\n"),
/// );
/// ```
#[must_use]
pub fn rewrite_stop_concatenation(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut changed = false;
    let mut start = 0;
    while start < lines.len() {
        let end = statement_end(&lines, start);
        let group = lines.get(start..=end).unwrap_or_default();
        match rewrite_statement(group) {
            Some(replacement) => {
                changed = true;
                out.extend(replacement);
            }
            None => out.extend(group.iter().map(|line| (*line).to_owned())),
        }
        start = end + 1;
    }
    if !changed {
        return None;
    }
    let mut result = out.join("\n");
    if text.ends_with('\n') {
        result.push('\n');
    }
    Some(result)
}

/// Index of the last physical line of the statement starting at `start`.
///
/// Blank and comment-only lines inside a continuation belong to it.
fn statement_end(lines: &[&str], start: usize) -> usize {
    let mut end = start;
    let mut continued = lines
        .get(start)
        .is_some_and(|line| strip_comment(line).0.trim_end().ends_with('&'));
    while continued && end + 1 < lines.len() {
        end += 1;
        let code = lines.get(end).map_or("", |line| strip_comment(line).0.trim());
        if !code.is_empty() {
            continued = code.ends_with('&');
        }
    }
    end
}

/// Split off a trailing `!` comment; the flag is `false` when a character
/// literal is left open at the end of the line.
fn strip_comment(line: &str) -> (&str, bool) {
    let mut quote: Option<char> = None;
    let mut chars = line.char_indices().peekable();
    while let Some((index, ch)) = chars.next() {
        match (quote, ch) {
            (None, '!') => return (line.get(..index).unwrap_or(line), true),
            (None, '\'' | '"') => quote = Some(ch),
            (Some(open), _) if ch == open => {
                if chars.peek().is_some_and(|(_, next)| *next == open) {
                    chars.next();
                } else {
                    quote = None;
                }
            }
            _ => {}
        }
    }
    (line, quote.is_none())
}

fn rewrite_statement(group: &[&str]) -> Option<Vec<String>> {
    let first = group.first()?;
    let indent = first
        .get(..first.len() - first.trim_start().len())
        .unwrap_or_default();
    let mut joined = String::new();
    for line in group {
        let (raw, closed) = strip_comment(line);
        if !closed {
            return None;
        }
        let mut code = raw.trim();
        if let Some(rest) = code.strip_prefix('&') {
            code = rest.trim_start();
        }
        if let Some(rest) = code.strip_suffix('&') {
            code = rest.trim_end();
        }
        if code.is_empty() {
            continue;
        }
        if !joined.is_empty() {
            joined.push(' ');
        }
        joined.push_str(code);
    }

    let keyword_len = stop_keyword_len(&joined)?;
    let keyword = joined.get(..keyword_len)?;
    let rest = joined.get(keyword_len..)?.trim();
    if rest.is_empty() || rest.starts_with('=') {
        return None;
    }
    let operands = split_concatenation(rest)?;
    if operands.len() < 2 {
        return None;
    }
    let literals: Option<Vec<String>> = operands.iter().map(|op| literal_value(op)).collect();
    Some(match literals {
        Some(parts) => {
            let merged = parts.concat().replace('\'', "''");
            vec![format!("{indent}{keyword} '{merged}'")]
        }
        None => vec![
            format!("{indent}write(0, '(a)') {rest}"),
            format!("{indent}{keyword}"),
        ],
    })
}

/// Byte length of a leading `stop` or `error stop` keyword.
fn stop_keyword_len(code: &str) -> Option<usize> {
    let lower = code.to_ascii_lowercase();
    let mut index = 0;
    if let Some(after) = lower.strip_prefix("error") {
        index = "error".len() + (after.len() - after.trim_start().len());
    }
    let tail = lower.get(index..)?.strip_prefix("stop")?;
    match tail.chars().next() {
        None => Some(index + "stop".len()),
        Some(next) if next.is_whitespace() || next == '\'' || next == '"' => {
            Some(index + "stop".len())
        }
        Some(_) => None,
    }
}

/// Split `expr` at top-level `//` operators.
///
/// Returns `None` if the expression contains a top-level `,` or `;`.
fn split_concatenation(expr: &str) -> Option<Vec<&str>> {
    let bytes = expr.as_bytes();
    let mut parts = Vec::new();
    let mut quote: Option<u8> = None;
    let mut depth = 0_usize;
    let mut start = 0;
    let mut index = 0;
    while let Some(&byte) = bytes.get(index) {
        match quote {
            Some(open) if byte == open => {
                if bytes.get(index + 1) == Some(&open) {
                    index += 1;
                } else {
                    quote = None;
                }
            }
            Some(_) => {}
            None => match byte {
                b'\'' | b'"' => quote = Some(byte),
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                b',' | b';' if depth == 0 => return None,
                b'/' if depth == 0 && bytes.get(index + 1) == Some(&b'/') => {
                    parts.push(expr.get(start..index)?.trim());
                    index += 1;
                    start = index + 1;
                }
                _ => {}
            },
        }
        index += 1;
    }
    parts.push(expr.get(start..)?.trim());
    Some(parts)
}

/// Contents of a single character literal, with doubled quotes collapsed.
fn literal_value(operand: &str) -> Option<String> {
    let mut chars = operand.chars().peekable();
    let open = chars.next().filter(|ch| *ch == '\'' || *ch == '"')?;
    let mut value = String::new();
    while let Some(ch) = chars.next() {
        if ch != open {
            value.push(ch);
            continue;
        }
        if chars.peek() == Some(&open) {
            chars.next();
            value.push(open);
            continue;
        }
        // Closing quote must end the operand.
        return chars.next().is_none().then_some(value);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::single_line("stop 'a' // 'b'\n", "stop 'ab'\n")]
    #[case::error_stop("    error stop \"x: \" // 'y'\n", "    error stop 'x: y'\n")]
    #[case::keeps_case("  STOP 'a'//'b'\n", "  STOP 'ab'\n")]
    #[case::escaped_quotes("stop 'it''s ' // \"a \"\"b\"\"\"\n", "stop 'it''s a \"b\"'\n")]
    #[case::continuation(
        "  stop 'feign: ' // & ! why\n     & 'closing'\n  x = 1\n",
        "  stop 'feign: closing'\n  x = 1\n"
    )]
    #[case::comment_between(
        "stop 'a' // &\n! note\n  'b'\n",
        "stop 'ab'\n"
    )]
    #[case::expression(
        "  stop 'bad unit: ' // trim(name)\n",
        "  write(0, '(a)') 'bad unit: ' // trim(name)\n  stop\n"
    )]
    fn rewrites_concatenated_stop_codes(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(rewrite_stop_concatenation(input).as_deref(), Some(expected));
    }

    #[rstest]
    #[case::plain_stop("stop\n")]
    #[case::single_literal("stop 'done'\n")]
    #[case::integer_code("error stop 3\n")]
    #[case::quoted_operator("stop 'a // b'\n")]
    #[case::commented("! stop 'a' // 'b'\n")]
    #[case::identifier("stopped = 'a' // 'b'\n")]
    #[case::variable_named_stop("stop = 'a' // 'b'\n")]
    #[case::quiet_specifier("stop 'a' // 'b', quiet = .true.\n")]
    #[case::split_literal("stop 'a&\n  &b' // 'c'\n")]
    #[case::guarded("if (fail) stop 'a' // 'b'\n")]
    fn leaves_other_statements_alone(#[case] input: &str) {
        assert_eq!(rewrite_stop_concatenation(input), None);
    }

    #[rstest]
    fn only_rewritten_statements_change() {
        let input = "module m\ncontains\n  subroutine s()\n    stop 'a' // 'b' ! bye\n  end subroutine\nend module";
        let expected = "module m\ncontains\n  subroutine s()\n    stop 'ab'\n  end subroutine\nend module";
        assert_eq!(rewrite_stop_concatenation(input).as_deref(), Some(expected));
    }
}
