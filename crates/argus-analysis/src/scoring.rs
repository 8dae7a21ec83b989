//! Score fusion and finding construction.
//!
//! For every candidate `(line, category)` the engine computes
//!
//! ```text
//! combined = pattern_weight * pattern + semantic_weight * semantic
//! combined *= protection_multiplier   if a real sanitizer for the category is on the line
//! combined *= taint_multiplier        else if untrusted input reaches the line
//! combined  = clamp(combined, 0, 1)
//! ```
//!
//! and reports it when `combined > inclusion_threshold`. Candidates are the
//! pairs whose catalog tiers give a non-zero pattern score, plus every sink.
//!
//! Data-flow findings do not go through fusion: their risk is fixed by
//! whether the flow was sanitized for its category.
//!
//! All constants live in [`ScoringConfig`]. They were fitted empirically and
//! are due for recalibration whenever catalog signals change.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use argus_rules::{
    CategoryScoring, LanguageTables, PatternCatalog, PatternCategory, Severity, Signal,
};

use crate::dataflow::DataFlow;
use crate::finding::{AnalysisError, DetectionMethod, Finding, FindingBuilder};
use crate::locator::Located;
use crate::preprocess::CodeLine;
use crate::secrets::builtin_signal_fires;
use crate::semantic::{ProviderError, SimilarityProvider};

// ---------------------------------------------------------------------------
// ScoringConfig
// ---------------------------------------------------------------------------

/// Fusion weights, context multipliers and thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Weight of the catalog pattern score.
    pub pattern_weight: f64,
    /// Weight of the semantic score.
    pub semantic_weight: f64,
    /// Applied when untrusted input reaches an unprotected line.
    pub taint_multiplier: f64,
    /// Applied when a real sanitizer for the category is on the line.
    pub protection_multiplier: f64,
    /// A fused score must be strictly above this to be reported.
    pub inclusion_threshold: f64,
    /// A result is vulnerable when its top score reaches this.
    pub vulnerable_threshold: f64,
    /// Risk of a flow that reaches its sink unsanitized.
    pub flow_risk_unsanitized: f64,
    /// Risk of a flow sanitized for its sink's category.
    pub flow_risk_sanitized: f64,
    /// Lines shorter than this (trimmed, in characters) are not pattern-scored.
    pub min_line_length: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            pattern_weight: 0.75,
            semantic_weight: 0.25,
            taint_multiplier: 1.15,
            protection_multiplier: 0.40,
            inclusion_threshold: 0.52,
            vulnerable_threshold: 0.57,
            flow_risk_unsanitized: 0.85,
            flow_risk_sanitized: 0.25,
            min_line_length: 3,
        }
    }
}

/// Fuses the pattern and semantic scores and applies line context.
#[must_use]
pub fn fuse(
    pattern: f64,
    semantic: f64,
    has_taint_source: bool,
    has_protection: bool,
    config: &ScoringConfig,
) -> f64 {
    let mut combined = config.pattern_weight * pattern + config.semantic_weight * semantic;
    if has_protection {
        combined *= config.protection_multiplier;
    } else if has_taint_source {
        combined *= config.taint_multiplier;
    }
    if combined.is_nan() {
        return 0.0;
    }
    combined.clamp(0.0, 1.0)
}

/// Returns `true` if a fused score is reported. The threshold is exclusive.
#[must_use]
pub fn passes_inclusion(combined: f64, config: &ScoringConfig) -> bool {
    combined > config.inclusion_threshold
}

// ---------------------------------------------------------------------------
// LineScore
// ---------------------------------------------------------------------------

/// Score breakdown of one candidate `(line, category)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineScore {
    /// 1-based line number.
    pub line: u32,
    /// Category scored.
    pub category: PatternCategory,
    /// First matching catalog tier, or `0.0`.
    pub pattern_score: f64,
    /// Provider similarity, `0.0` when unavailable.
    pub semantic_score: f64,
    /// Fused, context-adjusted score.
    pub combined: f64,
    /// Untrusted input reaches the line.
    pub has_taint_source: bool,
    /// A real sanitizer for the category is on the line.
    pub has_protection: bool,
}

/// Everything the scoring pass produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoringOutcome {
    /// One entry per candidate, in line then category order.
    pub scores: Vec<LineScore>,
    /// At least one semantic score was computed.
    pub semantic_succeeded: bool,
    /// The provider was absent or failed at least once.
    pub semantic_unavailable: bool,
    /// Lines whose evaluation faulted and contributed nothing.
    pub faulted_lines: Vec<u32>,
}

#[derive(Default)]
struct SemanticStatus {
    succeeded: bool,
    unavailable: bool,
}

// ---------------------------------------------------------------------------
// ScoringEngine
// ---------------------------------------------------------------------------

/// Scores candidate lines for one analysis.
pub struct ScoringEngine<'a> {
    catalog: &'a PatternCatalog,
    tables: &'a LanguageTables,
    config: &'a ScoringConfig,
    provider: Option<&'a dyn SimilarityProvider>,
}

impl<'a> ScoringEngine<'a> {
    /// Creates an engine without a semantic provider.
    #[must_use]
    pub fn new(
        catalog: &'a PatternCatalog,
        tables: &'a LanguageTables,
        config: &'a ScoringConfig,
    ) -> Self {
        Self {
            catalog,
            tables,
            config,
            provider: None,
        }
    }

    /// Attaches a semantic provider.
    #[must_use]
    pub fn with_provider(mut self, provider: Option<&'a dyn SimilarityProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Pattern score of `line` under one category's tiers.
    ///
    /// Regex signals see the raw line (SQL keywords live inside literals);
    /// built-in signals use the secret heuristics.
    #[must_use]
    pub fn pattern_score(scoring: &CategoryScoring, line: &CodeLine) -> f64 {
        scoring.pattern_score(|signal| match signal {
            Signal::Regex(re) => re.is_match(&line.text),
            Signal::Builtin(builtin) => builtin_signal_fires(*builtin, line),
        })
    }

    /// Scores every candidate in `lines`.
    ///
    /// A line whose evaluation panics is logged and skipped; the rest of the
    /// analysis continues.
    #[must_use]
    pub fn score(&self, lines: &[CodeLine], located: &Located, flows: &[DataFlow]) -> ScoringOutcome {
        let mut outcome = ScoringOutcome::default();
        for line in lines {
            if line.trimmed_len() < self.config.min_line_length {
                continue;
            }
            let evaluated = catch_unwind(AssertUnwindSafe(|| {
                let mut status = SemanticStatus::default();
                let scores = self.score_line(line, located, flows, &mut status);
                (scores, status)
            }));
            match evaluated {
                Ok((scores, status)) => {
                    outcome.scores.extend(scores);
                    outcome.semantic_succeeded |= status.succeeded;
                    outcome.semantic_unavailable |= status.unavailable;
                }
                Err(_) => {
                    warn!(line = line.line_number, "pattern evaluation fault; skipping line");
                    outcome.faulted_lines.push(line.line_number);
                }
            }
        }
        debug!(
            candidates = outcome.scores.len(),
            faulted = outcome.faulted_lines.len(),
            "scoring complete"
        );
        outcome
    }

    fn score_line(
        &self,
        line: &CodeLine,
        located: &Located,
        flows: &[DataFlow],
        status: &mut SemanticStatus,
    ) -> Vec<LineScore> {
        let mut candidates: Vec<(PatternCategory, f64)> = self
            .catalog
            .scored_categories()
            .map(|(category, scoring)| (category, Self::pattern_score(scoring, line)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        for sink in located.sinks_on(line.line_number) {
            if !candidates.iter().any(|(c, _)| *c == sink.category) {
                let score = self
                    .catalog
                    .scoring(sink.category)
                    .map_or(0.0, |s| Self::pattern_score(s, line));
                candidates.push((sink.category, score));
            }
        }
        candidates.sort_by_key(|(category, _)| *category);

        let masked = line.masked.text.as_str();
        let mentions_input = self.tables.mentions_untrusted_input(masked);
        candidates
            .into_iter()
            .map(|(category, pattern_score)| {
                let semantic_score = match self.semantic_score(&line.text, category) {
                    Ok(score) => {
                        status.succeeded = true;
                        score
                    }
                    Err(ProviderError::MissingPrototype(_)) => 0.0,
                    Err(e) => {
                        debug!(line = line.line_number, error = %e, "semantic score unavailable");
                        status.unavailable = true;
                        0.0
                    }
                };
                let has_taint_source = mentions_input
                    || flows.iter().any(|f| {
                        f.sink.line == line.line_number && f.category == category && !f.fully_sanitized
                    });
                let has_protection = self.tables.is_protected(masked, category);
                LineScore {
                    line: line.line_number,
                    category,
                    pattern_score,
                    semantic_score,
                    combined: fuse(
                        pattern_score,
                        semantic_score,
                        has_taint_source,
                        has_protection,
                        self.config,
                    ),
                    has_taint_source,
                    has_protection,
                }
            })
            .collect()
    }

    fn semantic_score(&self, text: &str, category: PatternCategory) -> Result<f64, ProviderError> {
        let provider = self
            .provider
            .ok_or_else(|| ProviderError::Unavailable("no provider configured".to_string()))?;
        let similarity = provider.category_score(text, category)?;
        let safe = provider.safe_score(text)?;
        let score = similarity - safe;
        Ok(if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) })
    }
}

impl std::fmt::Debug for ScoringEngine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringEngine")
            .field("catalog", &self.catalog.version())
            .field("config", self.config)
            .field("has_provider", &self.provider.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Finding construction
// ---------------------------------------------------------------------------

/// Builds the finding for a reported line score.
///
/// # Errors
///
/// Propagates [`FindingBuilder::build`] validation errors.
pub fn pattern_finding(line: &CodeLine, score: &LineScore) -> Result<Finding, AnalysisError> {
    FindingBuilder::new()
        .line(score.line)
        .snippet(line.text.as_str())
        .category(score.category)
        .risk_score(score.combined)
        .confidence(score.pattern_score.clamp(0.0, 1.0))
        .has_taint_source(score.has_taint_source)
        .has_protection(score.has_protection)
        .detection_method(DetectionMethod::Pattern)
        .variable(line.assignment().map(|a| a.target.to_string()))
        .build()
}

/// Builds the finding for a traced flow. Sanitized flows are reported at low
/// severity.
///
/// # Errors
///
/// Propagates [`FindingBuilder::build`] validation errors.
pub fn flow_finding(flow: &DataFlow, config: &ScoringConfig) -> Result<Finding, AnalysisError> {
    let (risk, severity) = if flow.fully_sanitized {
        (
            config.flow_risk_sanitized,
            flow.category.default_severity().cap_at(Severity::Low),
        )
    } else {
        (config.flow_risk_unsanitized, flow.category.default_severity())
    };
    let source_variable = flow.source.variable.clone().unwrap_or_default();
    FindingBuilder::new()
        .line(flow.sink.line)
        .snippet(flow.sink.content.as_str())
        .category(flow.category)
        .severity(severity)
        .risk_score(risk)
        .confidence(flow.base_confidence)
        .has_taint_source(true)
        .has_protection(flow.fully_sanitized)
        .detection_method(DetectionMethod::DataFlow)
        .variable(Some(flow.variable.clone()))
        .source(flow.source.line, source_variable)
        .build()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
