//! Pattern compilation for statement and markup rules
//!
//! Patterns are operator-configured and applied to semi-trusted document
//! content. The regex engine guarantees linear-time matching; the length
//! bound keeps pathological configurations out regardless.

use regex::Regex;
use tracing::warn;

use doccheck_common::config::{FileTypeConfig, MarkupAction};
use doccheck_common::{Error, Result};

/// Longest accepted pattern, in characters.
pub const MAX_PATTERN_LEN: usize = 1500;

/// Compile a pattern through the safety bound.
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    if pattern.len() > MAX_PATTERN_LEN {
        return Err(Error::RejectedPattern(format!(
            "pattern exceeds {MAX_PATTERN_LEN} characters"
        )));
    }
    Regex::new(pattern).map_err(|e| Error::RejectedPattern(e.to_string()))
}

/// The five inline statement kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    TestStart,
    TestEnd,
    IgnoreStart,
    IgnoreEnd,
    Step,
}

/// A file type's patterns, compiled once per detection run.
pub struct CompiledFileType {
    pub statements: Vec<(StatementKind, Regex)>,
    pub markup: Vec<CompiledMarkupRule>,
}

pub struct CompiledMarkupRule {
    pub name: String,
    pub patterns: Vec<Regex>,
    pub actions: Vec<MarkupAction>,
    pub batch_matches: bool,
}

/// Compile a file type's statement patterns and, when step detection is on,
/// its markup rules. Rejected patterns are logged and skipped; a bad
/// operator pattern drops that rule, not the run.
pub fn compile_file_type(file_type: &FileTypeConfig, detect_steps: bool) -> CompiledFileType {
    let mut statements = Vec::new();
    let statement_sets = [
        (StatementKind::TestStart, &file_type.inline_statements.test_start),
        (StatementKind::TestEnd, &file_type.inline_statements.test_end),
        (StatementKind::IgnoreStart, &file_type.inline_statements.ignore_start),
        (StatementKind::IgnoreEnd, &file_type.inline_statements.ignore_end),
        (StatementKind::Step, &file_type.inline_statements.step),
    ];
    for (kind, patterns) in statement_sets {
        for pattern in patterns {
            match compile_pattern(pattern) {
                Ok(re) => statements.push((kind, re)),
                Err(e) => warn!(
                    file_type = %file_type.name,
                    pattern,
                    "skipping statement pattern: {e}"
                ),
            }
        }
    }

    let mut markup = Vec::new();
    if detect_steps {
        for rule in &file_type.markup {
            let mut compiled = Vec::new();
            for pattern in &rule.regex {
                match compile_pattern(pattern) {
                    Ok(re) => compiled.push(re),
                    Err(e) => warn!(
                        file_type = %file_type.name,
                        rule = %rule.name,
                        pattern,
                        "skipping markup pattern: {e}"
                    ),
                }
            }
            if !compiled.is_empty() {
                markup.push(CompiledMarkupRule {
                    name: rule.name.clone(),
                    patterns: compiled,
                    actions: rule.actions.clone(),
                    batch_matches: rule.batch_matches,
                });
            }
        }
    }

    CompiledFileType { statements, markup }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_pattern_is_rejected() {
        let pattern = "a".repeat(MAX_PATTERN_LEN + 1);
        let err = compile_pattern(&pattern).unwrap_err();
        assert!(matches!(err, Error::RejectedPattern(_)));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(compile_pattern("(unclosed").is_err());
    }

    #[test]
    fn bounded_pattern_compiles() {
        assert!(compile_pattern(r"\*\*([^*]+)\*\*").is_ok());
    }

    #[test]
    fn default_file_types_compile_cleanly() {
        for file_type in doccheck_common::config::default_file_types() {
            let compiled = compile_file_type(&file_type, true);
            assert!(!compiled.statements.is_empty(), "{} has no statements", file_type.name);
            assert_eq!(compiled.markup.len(), file_type.markup.len());
        }
    }
}
