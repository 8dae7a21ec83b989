//! Contextual false-positive suppression.
//!
//! Runs after scoring and before deduplication. A finding is dropped when:
//!
//! 1. its line is a comment (or otherwise not code),
//! 2. its variable was last assigned a plain string literal, or
//! 3. its line is literal-only (`x = "..."` with nothing interpolated).
//!
//! Rules 2 and 3 do not apply to hardcoded secrets, which are literals by
//! definition. Findings on test, logging and debug lines are kept at low
//! severity.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use argus_rules::{PatternCategory, Severity};

use crate::finding::Finding;
use crate::preprocess::CodeLine;
use crate::types::TypeMap;

/// Word-level markers of test, assertion, logging and debug code.
static SAFE_CONTEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(tests?|test_\w+|\w+_test|mock\w*|assert\w*|log|logger|logging|print|println|debug)\b|console\.\w+\(",
    )
    .expect("safe context regex is valid")
});

/// Filter switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Cap findings on safe-context lines at [`Severity::Low`].
    pub downgrade_safe_context: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            downgrade_safe_context: true,
        }
    }
}

/// Drops findings that cannot be real and downgrades test/log noise.
#[derive(Debug, Clone, Default)]
pub struct FalsePositiveFilter {
    config: FilterConfig,
}

impl FalsePositiveFilter {
    /// Creates a filter.
    #[must_use]
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// Applies the filter. `lines` are the preprocessed lines of the same
    /// input; a finding whose line is not among them sits on a comment.
    #[must_use]
    pub fn apply(&self, findings: Vec<Finding>, lines: &[CodeLine], types: &TypeMap) -> Vec<Finding> {
        let by_number: BTreeMap<u32, &CodeLine> = lines.iter().map(|l| (l.line_number, l)).collect();
        let before = findings.len();

        let kept: Vec<Finding> = findings
            .into_iter()
            .filter_map(|mut finding| {
                let Some(line) = by_number.get(&finding.line) else {
                    debug!(line = finding.line, "dropped: comment line");
                    return None;
                };
                let exempt = finding.category == PatternCategory::HardcodedSecret;
                if !exempt {
                    if let Some(variable) = finding.variable.as_deref() {
                        if types.is_string_literal(variable) {
                            debug!(line = finding.line, variable, "dropped: string literal variable");
                            return None;
                        }
                    }
                    if line.is_literal_only() {
                        debug!(line = finding.line, "dropped: literal-only line");
                        return None;
                    }
                }
                if self.config.downgrade_safe_context && is_safe_context(line) {
                    finding.severity = finding.severity.cap_at(Severity::Low);
                }
                Some(finding)
            })
            .collect();

        debug!(before, after = kept.len(), "false-positive filter applied");
        kept
    }
}

/// Test, assertion, logging or debug code, or a line that starts with a
/// string literal. Words inside literals and trailing comments do not count.
#[must_use]
pub fn is_safe_context(line: &CodeLine) -> bool {
    let trimmed = line.text.trim_start();
    trimmed.starts_with('"')
        || trimmed.starts_with('\'')
        || trimmed.starts_with('`')
        || SAFE_CONTEXT.is_match(&line.masked.text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::{DetectionMethod, FindingBuilder};
    use crate::preprocess::preprocess;
    use crate::types::infer_types;
    use argus_rules::{Language, PatternCatalog};

    fn finding(line: u32, category: PatternCategory, variable: Option<&str>) -> Finding {
        FindingBuilder::new()
            .line(line)
            .snippet("x")
            .category(category)
            .risk_score(0.7)
            .confidence(0.8)
            .detection_method(DetectionMethod::Pattern)
            .variable(variable.map(str::to_string))
            .build()
            .unwrap()
    }

    fn run(code: &str, findings: Vec<Finding>) -> Vec<Finding> {
        let catalog = PatternCatalog::builtin().unwrap();
        let tables = catalog.tables(Language::Python).unwrap();
        let lines = preprocess(code, Language::Python);
        let types = infer_types(&lines, tables);
        FalsePositiveFilter::default().apply(findings, &lines, &types)
    }

    #[test]
    fn drops_comment_lines() {
        let code = "# cursor.execute('SELECT ' + x)\ncursor.execute(q)\n";
        let kept = run(
            code,
            vec![
                finding(1, PatternCategory::SqlInjection, None),
                finding(2, PatternCategory::SqlInjection, None),
            ],
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].line, 2);
    }

    #[test]
    fn drops_string_literal_variables() {
        let code = "q = 'SELECT * FROM t'\ncursor.execute(q)\n";
        let kept = run(code, vec![finding(2, PatternCategory::SqlInjection, Some("q"))]);
        assert!(kept.is_empty());
    }

    #[test]
    fn drops_literal_only_lines() {
        let code = "query = \"SELECT * FROM users WHERE name = 'bob'\"\n";
        let kept = run(code, vec![finding(1, PatternCategory::SqlInjection, None)]);
        assert!(kept.is_empty());
    }

    #[test]
    fn hardcoded_secrets_are_exempt_from_literal_rules() {
        let code = "password = 'hunter2hunter2'\n";
        let kept = run(
            code,
            vec![finding(1, PatternCategory::HardcodedSecret, Some("password"))],
        );
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn safe_context_caps_severity() {
        let code = "logger.info('running ' + cmd)\nos.system('ls ' + cmd)\n";
        let kept = run(
            code,
            vec![
                finding(1, PatternCategory::CommandInjection, None),
                finding(2, PatternCategory::CommandInjection, None),
            ],
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].severity, Severity::Low);
        assert_eq!(kept[1].severity, Severity::Critical);
    }

    #[test]
    fn downgrade_can_be_disabled() {
        let catalog = PatternCatalog::builtin().unwrap();
        let tables = catalog.tables(Language::Python).unwrap();
        let lines = preprocess("print(eval(expr))\n", Language::Python);
        let types = infer_types(&lines, tables);
        let filter = FalsePositiveFilter::new(FilterConfig {
            downgrade_safe_context: false,
        });
        let kept = filter.apply(
            vec![finding(1, PatternCategory::CodeInjection, None)],
            &lines,
            &types,
        );
        assert_eq!(kept[0].severity, Severity::Critical);
    }

    #[test]
    fn safe_context_uses_word_boundaries() {
        let syntax = Language::Python.syntax();
        assert!(is_safe_context(&CodeLine::new(1, "assert run(cmd)", syntax)));
        assert!(is_safe_context(&CodeLine::new(1, "def test_login():", syntax)));
        assert!(is_safe_context(&CodeLine::new(1, "'SELECT ' + x", syntax)));
        assert!(!is_safe_context(&CodeLine::new(1, "login(user)", syntax)));
        assert!(!is_safe_context(&CodeLine::new(1, "catalog.load(x)", syntax)));
        assert!(!is_safe_context(&CodeLine::new(1, "cursor.execute(query)", syntax)));
    }

    #[test]
    fn safe_words_inside_literals_do_not_downgrade() {
        let syntax = Language::Python.syntax();
        let line = CodeLine::new(
            1,
            "cursor.execute(\"SELECT * FROM test_results WHERE id = \" + uid)",
            syntax,
        );
        assert!(!is_safe_context(&line));
        assert!(!is_safe_context(&CodeLine::new(1, "os.system(cmd)  # debug only", syntax)));

        let code = "cursor.execute(\"SELECT * FROM test_results WHERE id = \" + uid)\n";
        let kept = run(code, vec![finding(1, PatternCategory::SqlInjection, None)]);
        assert_eq!(kept[0].severity, Severity::High);
    }
}
