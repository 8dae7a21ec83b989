//! Forward alias tracing from sources to sinks.
//!
//! For every source the tracer walks the following lines inside a fixed
//! lookahead window, keeping the set of variables that currently hold the
//! tainted value. On a line that reads one of those aliases it checks, in
//! order:
//!
//! 1. sanitizers: a real sanitizer (with no cosmetic transform on the same
//!    line) marks its categories as neutralized for the rest of the trace;
//! 2. sinks: every sink on the line yields a [`DataFlow`];
//! 3. propagation: `v = <rhs using an alias>` adds `v` to the alias set.
//!
//! A line that reassigns an alias without reading any alias kills it. The
//! trace stops when no alias is left or the window is exhausted.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use argus_rules::{LanguageTables, PatternCategory, SanitizerKind};

use crate::locator::{Located, SourceHit};
use crate::preprocess::CodeLine;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Tracer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataFlowConfig {
    /// Maximum distance in lines between a source and a sink.
    pub lookahead_window: u32,
    /// Confidence of a flow that reaches its sink unsanitized.
    pub unsanitized_confidence: f64,
    /// Confidence of a flow sanitized for its sink's category.
    pub sanitized_confidence: f64,
}

impl Default for DataFlowConfig {
    fn default() -> Self {
        Self {
            lookahead_window: 100,
            unsanitized_confidence: 0.95,
            sanitized_confidence: 0.30,
        }
    }
}

// ---------------------------------------------------------------------------
// Flow model
// ---------------------------------------------------------------------------

/// Role of a node on a flow path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Where the tainted value entered.
    Source,
    /// The dangerous operation reached.
    Sink,
    /// Propagation or sanitization in between.
    Transform,
}

/// One step of a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFlowNode {
    /// 1-based line number.
    pub line: u32,
    /// Variable involved at this step.
    pub variable: Option<String>,
    /// Original line text.
    pub content: String,
    /// Role on the path.
    pub role: NodeRole,
    /// Whether a real sanitizer applied at this step.
    pub sanitized: bool,
    /// Name of the sanitizer (real or cosmetic) seen at this step.
    pub sanitizer: Option<String>,
}

/// A traced path from a source to a sink.
///
/// `path[0]` is the source, and every path node precedes the sink line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFlow {
    /// Source node.
    pub source: DataFlowNode,
    /// Sink node.
    pub sink: DataFlowNode,
    /// Source plus intermediate transforms, in line order.
    pub path: Vec<DataFlowNode>,
    /// Alias read at the sink.
    pub variable: String,
    /// Whether a real sanitizer for `category` was seen on the path.
    pub fully_sanitized: bool,
    /// Category of the sink.
    pub category: PatternCategory,
    /// Detection confidence before scoring.
    pub base_confidence: f64,
}

impl DataFlow {
    /// Distance in lines between source and sink.
    #[must_use]
    pub fn span(&self) -> u32 {
        self.sink.line.saturating_sub(self.source.line)
    }
}

// ---------------------------------------------------------------------------
// Tracer
// ---------------------------------------------------------------------------

/// Traces flows for one analysis.
#[derive(Debug)]
pub struct DataFlowTracer<'a> {
    tables: &'a LanguageTables,
    config: &'a DataFlowConfig,
}

impl<'a> DataFlowTracer<'a> {
    /// Creates a tracer over the given language tables.
    #[must_use]
    pub fn new(tables: &'a LanguageTables, config: &'a DataFlowConfig) -> Self {
        Self { tables, config }
    }

    /// Traces every source in `located` and returns all flows found, ordered
    /// by source line, then sink line.
    #[must_use]
    pub fn trace(&self, lines: &[CodeLine], located: &Located) -> Vec<DataFlow> {
        let mut flows = Vec::new();
        for source in &located.sources {
            self.trace_source(lines, located, source, &mut flows);
        }
        debug!(
            sources = located.sources.len(),
            flows = flows.len(),
            "data-flow tracing complete"
        );
        flows
    }

    fn trace_source(
        &self,
        lines: &[CodeLine],
        located: &Located,
        source: &SourceHit,
        flows: &mut Vec<DataFlow>,
    ) {
        let source_node = DataFlowNode {
            line: source.line,
            variable: Some(source.variable.clone()),
            content: source.content.clone(),
            role: NodeRole::Source,
            sanitized: false,
            sanitizer: None,
        };
        let mut aliases: Vec<String> = vec![source.variable.clone()];
        let mut sanitized: BTreeSet<PatternCategory> = BTreeSet::new();
        let mut path = vec![source_node.clone()];

        let following = lines.iter().skip_while(|l| l.line_number <= source.line);
        for line in following {
            if line.line_number - source.line > self.config.lookahead_window {
                break;
            }

            let assignment = line.assignment();
            // The left-hand side is not a read.
            let read_region = assignment.map_or(line.masked.text.as_str(), |a| a.rhs);
            let Some(alias) = aliases
                .iter()
                .find(|a| mentions_identifier(read_region, a))
                .cloned()
            else {
                if let Some(a) = assignment {
                    if let Some(pos) = aliases.iter().position(|v| v == a.target) {
                        trace!(line = line.line_number, alias = a.target, "alias reassigned");
                        aliases.remove(pos);
                    }
                }
                if aliases.is_empty() {
                    break;
                }
                continue;
            };

            // 1. Sanitizers.
            let masked = line.masked.text.as_str();
            let cosmetic = self.tables.has_cosmetic_match(masked);
            for sanitizer in self.tables.sanitizers.iter().filter(|s| s.regex.is_match(masked)) {
                let neutralizes = sanitizer.kind == SanitizerKind::Real && !cosmetic;
                if neutralizes {
                    sanitized.extend(sanitizer.applies_to.iter().copied());
                }
                path.push(DataFlowNode {
                    line: line.line_number,
                    variable: Some(alias.clone()),
                    content: line.text.clone(),
                    role: NodeRole::Transform,
                    sanitized: neutralizes,
                    sanitizer: Some(sanitizer.name.clone()),
                });
            }

            // 2. Sinks.
            for sink in located.sinks_on(line.line_number) {
                let fully_sanitized = sanitized.contains(&sink.category);
                flows.push(DataFlow {
                    source: source_node.clone(),
                    sink: DataFlowNode {
                        line: line.line_number,
                        variable: Some(alias.clone()),
                        content: line.text.clone(),
                        role: NodeRole::Sink,
                        sanitized: fully_sanitized,
                        sanitizer: None,
                    },
                    path: path
                        .iter()
                        .filter(|n| n.line < line.line_number)
                        .cloned()
                        .collect(),
                    variable: alias.clone(),
                    fully_sanitized,
                    category: sink.category,
                    base_confidence: if fully_sanitized {
                        self.config.sanitized_confidence
                    } else {
                        self.config.unsanitized_confidence
                    },
                });
            }

            // 3. Propagation.
            if let Some(a) = assignment {
                if !aliases.iter().any(|v| v == a.target) {
                    trace!(line = line.line_number, from = %alias, to = a.target, "alias added");
                    aliases.push(a.target.to_string());
                    path.push(DataFlowNode {
                        line: line.line_number,
                        variable: Some(a.target.to_string()),
                        content: line.text.clone(),
                        role: NodeRole::Transform,
                        sanitized: false,
                        sanitizer: None,
                    });
                }
            }
        }
    }
}

/// Whole-word identifier match. A preceding `.` means a property of some
/// other object, which does not count.
#[must_use]
pub fn mentions_identifier(text: &str, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let is_ident = |c: char| c.is_alphanumeric() || c == '_' || c == '$';
    text.match_indices(name).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + name.len()..].chars().next();
        !before.is_some_and(|c| is_ident(c) || c == '.') && !after.is_some_and(is_ident)
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
