//! Source / sink location.
//!
//! Tests every catalog source and sink pattern against each line's masked
//! text, so a keyword inside a string literal never registers as a sink.
//! At most one source is recorded per line, and one sink per
//! `(line, category)`. A line can be a source and a sink of several
//! categories at once.

use serde::{Deserialize, Serialize};
use tracing::debug;

use argus_rules::{LanguageTables, PatternCategory, SourceKind};

use crate::preprocess::CodeLine;

/// A line where untrusted data is assigned to a variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHit {
    /// 1-based line number.
    pub line: u32,
    /// Variable receiving the untrusted value.
    pub variable: String,
    /// Kind of input.
    pub kind: SourceKind,
    /// Original line text.
    pub content: String,
}

/// A line performing a dangerous operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkHit {
    /// 1-based line number.
    pub line: u32,
    /// Danger category.
    pub category: PatternCategory,
    /// Variable assigned on the line, if any.
    pub variable: Option<String>,
    /// Original line text.
    pub content: String,
}

/// Locator output, ordered by line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Located {
    /// Source lines.
    pub sources: Vec<SourceHit>,
    /// Sink lines.
    pub sinks: Vec<SinkHit>,
}

impl Located {
    /// Sinks recorded on `line`.
    pub fn sinks_on(&self, line: u32) -> impl Iterator<Item = &SinkHit> {
        self.sinks.iter().filter(move |s| s.line == line)
    }

    /// Returns `true` if `line` is a sink of `category`.
    #[must_use]
    pub fn is_sink(&self, line: u32, category: PatternCategory) -> bool {
        self.sinks_on(line).any(|s| s.category == category)
    }
}

/// Finds source and sink lines in `lines`.
#[must_use]
pub fn locate(lines: &[CodeLine], tables: &LanguageTables) -> Located {
    let mut located = Located::default();

    for line in lines {
        let masked = line.masked.text.as_str();
        let variable = line.assignment().map(|a| a.target.to_string());

        if let Some(name) = &variable {
            if let Some(source) = tables.sources.iter().find(|s| s.regex.is_match(masked)) {
                located.sources.push(SourceHit {
                    line: line.line_number,
                    variable: name.clone(),
                    kind: source.kind,
                    content: line.text.clone(),
                });
            }
        }

        let first_sink = located.sinks.len();
        for sink in &tables.sinks {
            let seen = located.sinks[first_sink..]
                .iter()
                .any(|s| s.category == sink.category);
            if !seen && sink.regex.is_match(masked) {
                located.sinks.push(SinkHit {
                    line: line.line_number,
                    category: sink.category,
                    variable: variable.clone(),
                    content: line.text.clone(),
                });
            }
        }
    }

    debug!(
        sources = located.sources.len(),
        sinks = located.sinks.len(),
        "located sources and sinks"
    );
    located
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::preprocess;
    use argus_rules::{Language, PatternCatalog};

    fn run(code: &str, language: Language) -> Located {
        let catalog = PatternCatalog::builtin().unwrap();
        let lines = preprocess(code, language);
        locate(&lines, catalog.tables(language).unwrap())
    }

    #[test]
    fn python_source_and_sink() {
        let code = "user_id = request.args.get('id')\nquery = 'SELECT 1'\ncursor.execute(query)\n";
        let located = run(code, Language::Python);
        assert_eq!(located.sources.len(), 1);
        assert_eq!(located.sources[0].variable, "user_id");
        assert_eq!(located.sources[0].kind, SourceKind::Request);
        assert_eq!(located.sinks.len(), 1);
        assert_eq!(located.sinks[0].line, 3);
        assert_eq!(located.sinks[0].category, PatternCategory::SqlInjection);
        assert!(located.sinks[0].variable.is_none(), "anonymous sink");
    }

    #[test]
    fn source_without_variable_is_dropped() {
        let located = run("handle(request.args.get('id'))\n", Language::Python);
        assert!(located.sources.is_empty());
    }

    #[test]
    fn sink_keyword_inside_literal_is_ignored() {
        let located = run("msg = 'call os.system(cmd) later'\n", Language::Python);
        assert!(located.sinks.is_empty(), "got {:?}", located.sinks);
    }

    #[test]
    fn one_sink_per_line_and_category() {
        let located = run("cursor.execute(a); cursor.executemany(b)\n", Language::Python);
        assert_eq!(located.sinks.len(), 1);
    }

    #[test]
    fn a_line_can_sink_several_categories() {
        let located = run("eval(open(path).read())\n", Language::Python);
        let categories: Vec<_> = located.sinks.iter().map(|s| s.category).collect();
        assert!(categories.contains(&PatternCategory::CodeInjection));
        assert!(categories.contains(&PatternCategory::PathTraversal));
        assert!(located.is_sink(1, PatternCategory::PathTraversal));
        assert!(!located.is_sink(1, PatternCategory::SqlInjection));
    }

    #[test]
    fn javascript_dom_sink_and_request_source() {
        let code = "const user = req.query.name;\nel.innerHTML = user;\nel.textContent = user;\n";
        let located = run(code, Language::JavaScript);
        assert_eq!(located.sources[0].variable, "user");
        assert_eq!(located.sinks.len(), 1);
        assert_eq!(located.sinks[0].line, 2);
        assert_eq!(located.sinks[0].category, PatternCategory::CrossSiteScripting);
    }
}
