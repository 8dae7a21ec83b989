//! Finding and analysis-result types.
//!
//! This module defines the output data model:
//! - [`AnalysisError`] -- error type for the analysis crate.
//! - [`Finding`] -- one scored, categorised line with a content fingerprint.
//! - [`FindingBuilder`] -- validated construction of findings.
//! - [`AnalysisResult`] -- the ranked findings of one analysis plus verdict.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use argus_rules::{PatternCategory, Severity};

// ---------------------------------------------------------------------------
// AnalysisError
// ---------------------------------------------------------------------------

/// Error type for the argus-analysis crate.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// A required field is missing.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// Line numbers are 1-based.
    #[error("invalid line number {0}: lines are 1-indexed")]
    InvalidLine(u32),

    /// A score or confidence fell outside `[0, 1]`.
    #[error("{field} must be within [0, 1] (got {value})")]
    ScoreOutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: f64,
    },
}

// ---------------------------------------------------------------------------
// Finding
// ---------------------------------------------------------------------------

/// Longest snippet kept on a finding, in characters.
pub const MAX_SNIPPET_CHARS: usize = 100;

/// How a finding was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Line-level pattern tiers fused with semantic and context scores.
    Pattern,
    /// A traced source-to-sink flow.
    DataFlow,
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pattern => "pattern",
            Self::DataFlow => "data_flow",
        })
    }
}

/// One reported line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// SHA-256 hex digest of `category + line + normalized snippet`.
    pub fingerprint: String,

    /// 1-based line number.
    pub line: u32,

    /// Trimmed line text, at most [`MAX_SNIPPET_CHARS`] characters.
    pub snippet: String,

    /// Vulnerability category.
    pub category: PatternCategory,

    /// CWE identifier (e.g. `"CWE-89"`), if the category has one.
    pub cwe: Option<String>,

    /// Reported severity.
    pub severity: Severity,

    /// Calibrated risk in `[0, 1]`.
    pub risk_score: f64,

    /// Detection confidence in `[0, 1]`.
    pub confidence: f64,

    /// Untrusted input reaches this line.
    pub has_taint_source: bool,

    /// A real sanitizer for the category is present on this line or path.
    pub has_protection: bool,

    /// Which pass produced the finding.
    pub detection_method: DetectionMethod,

    /// Variable involved on this line: the flow alias for data-flow findings,
    /// the assigned name for pattern findings.
    pub variable: Option<String>,

    /// Line of the flow's source.
    pub source_line: Option<u32>,

    /// Variable the flow's source assigned.
    pub source_variable: Option<String>,
}

impl Finding {
    /// Computes the content fingerprint for a finding.
    #[must_use]
    pub fn compute_fingerprint(category: PatternCategory, line: u32, snippet: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(category.as_str().as_bytes());
        hasher.update(line.to_string().as_bytes());
        hasher.update(Self::normalize_snippet(snippet).as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Collapses runs of whitespace so formatting-only edits keep the
    /// fingerprint stable.
    fn normalize_snippet(snippet: &str) -> String {
        snippet.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Trims `text` and cuts it to [`MAX_SNIPPET_CHARS`] characters.
    #[must_use]
    pub fn truncate_snippet(text: &str) -> String {
        text.trim().chars().take(MAX_SNIPPET_CHARS).collect::<String>().trim_end().to_string()
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} line {} (risk {:.2}, {}) -- {}",
            self.severity,
            self.category,
            self.line,
            self.risk_score,
            self.detection_method,
            self.snippet
        )
    }
}

// ---------------------------------------------------------------------------
// FindingBuilder
// ---------------------------------------------------------------------------

/// Builder for [`Finding`].
///
/// `line`, `snippet`, `category`, `risk_score`, `confidence` and
/// `detection_method` are required. Severity and CWE default to the
/// category's.
#[derive(Debug, Default)]
pub struct FindingBuilder {
    line: Option<u32>,
    snippet: Option<String>,
    category: Option<PatternCategory>,
    severity: Option<Severity>,
    risk_score: Option<f64>,
    confidence: Option<f64>,
    has_taint_source: bool,
    has_protection: bool,
    detection_method: Option<DetectionMethod>,
    variable: Option<String>,
    source_line: Option<u32>,
    source_variable: Option<String>,
}

impl FindingBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the 1-based line number.
    #[must_use]
    pub fn line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// Sets the snippet. It is trimmed and truncated on build.
    #[must_use]
    pub fn snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    /// Sets the category.
    #[must_use]
    pub fn category(mut self, category: PatternCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Overrides the category's default severity.
    #[must_use]
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Sets the risk score.
    #[must_use]
    pub fn risk_score(mut self, risk_score: f64) -> Self {
        self.risk_score = Some(risk_score);
        self
    }

    /// Sets the confidence.
    #[must_use]
    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Marks untrusted input as reaching the line.
    #[must_use]
    pub fn has_taint_source(mut self, value: bool) -> Self {
        self.has_taint_source = value;
        self
    }

    /// Marks a real sanitizer as present.
    #[must_use]
    pub fn has_protection(mut self, value: bool) -> Self {
        self.has_protection = value;
        self
    }

    /// Sets the detection method.
    #[must_use]
    pub fn detection_method(mut self, method: DetectionMethod) -> Self {
        self.detection_method = Some(method);
        self
    }

    /// Sets the variable involved on the line.
    #[must_use]
    pub fn variable(mut self, variable: Option<String>) -> Self {
        self.variable = variable;
        self
    }

    /// Sets the flow source location.
    #[must_use]
    pub fn source(mut self, line: u32, variable: impl Into<String>) -> Self {
        self.source_line = Some(line);
        self.source_variable = Some(variable.into());
        self
    }

    /// Builds the [`Finding`], truncating the snippet and computing the
    /// fingerprint.
    ///
    /// # Errors
    ///
    /// - [`AnalysisError::MissingField`] if a required field is not set.
    /// - [`AnalysisError::InvalidLine`] for line `0`.
    /// - [`AnalysisError::ScoreOutOfRange`] for a risk score or confidence
    ///   outside `[0, 1]` (or NaN).
    pub fn build(self) -> Result<Finding, AnalysisError> {
        let line = self
            .line
            .ok_or_else(|| AnalysisError::MissingField("line".to_string()))?;
        let snippet = self
            .snippet
            .ok_or_else(|| AnalysisError::MissingField("snippet".to_string()))?;
        let category = self
            .category
            .ok_or_else(|| AnalysisError::MissingField("category".to_string()))?;
        let risk_score = self
            .risk_score
            .ok_or_else(|| AnalysisError::MissingField("risk_score".to_string()))?;
        let confidence = self
            .confidence
            .ok_or_else(|| AnalysisError::MissingField("confidence".to_string()))?;
        let detection_method = self
            .detection_method
            .ok_or_else(|| AnalysisError::MissingField("detection_method".to_string()))?;

        if line == 0 {
            return Err(AnalysisError::InvalidLine(line));
        }
        check_unit_interval("risk_score", risk_score)?;
        check_unit_interval("confidence", confidence)?;

        let snippet = Finding::truncate_snippet(&snippet);
        let fingerprint = Finding::compute_fingerprint(category, line, &snippet);

        Ok(Finding {
            fingerprint,
            line,
            snippet,
            category,
            cwe: category.cwe_id().map(str::to_string),
            severity: self.severity.unwrap_or_else(|| category.default_severity()),
            risk_score,
            confidence,
            has_taint_source: self.has_taint_source,
            has_protection: self.has_protection,
            detection_method,
            variable: self.variable,
            source_line: self.source_line,
            source_variable: self.source_variable,
        })
    }
}

fn check_unit_interval(field: &'static str, value: f64) -> Result<(), AnalysisError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(AnalysisError::ScoreOutOfRange { field, value })
    }
}

// ---------------------------------------------------------------------------
// AnalysisResult
// ---------------------------------------------------------------------------

/// Outcome of one analysis call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// `max_risk_score` reached the vulnerability threshold.
    pub vulnerable: bool,
    /// Highest risk score among the findings, `0.0` if none.
    pub max_risk_score: f64,
    /// Findings, descending by risk, unique per `(line, category)`.
    pub findings: Vec<Finding>,
    /// Language tag as supplied by the caller.
    pub language: String,
    /// Names of the passes that ran (`pattern`, `dataflow`, `semantic`, ...).
    pub methods_used: BTreeSet<String>,
}

impl AnalysisResult {
    /// A non-vulnerable result with no findings and no methods.
    #[must_use]
    pub fn empty(language: impl Into<String>) -> Self {
        Self {
            vulnerable: false,
            max_risk_score: 0.0,
            findings: Vec::new(),
            language: language.into(),
            methods_used: BTreeSet::new(),
        }
    }

    /// Assembles a result from ranked findings. `vulnerable` is set when the
    /// top score is at least `vulnerable_threshold`.
    #[must_use]
    pub fn from_findings(
        language: impl Into<String>,
        findings: Vec<Finding>,
        methods_used: BTreeSet<String>,
        vulnerable_threshold: f64,
    ) -> Self {
        let max_risk_score = findings
            .iter()
            .map(|f| f.risk_score)
            .fold(0.0_f64, f64::max);
        Self {
            vulnerable: max_risk_score >= vulnerable_threshold,
            max_risk_score,
            findings,
            language: language.into(),
            methods_used,
        }
    }

    /// Findings of one category, in rank order.
    pub fn findings_for(&self, category: PatternCategory) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.category == category)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
