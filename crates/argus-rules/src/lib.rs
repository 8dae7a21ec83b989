//! Argus Rules -- vulnerability categories, the pattern catalog and scoring tiers.
//!
//! This crate owns everything the detector treats as *data* rather than
//! logic:
//!
//! - [`PatternCategory`] and [`Severity`], shared by every downstream crate.
//! - [`catalog::PatternCatalog`] -- per-language source, sink and sanitizer
//!   tables plus per-category scoring tiers, compiled from YAML.
//! - [`handle::CatalogHandle`] -- a shared, hot-swappable catalog reference.
//!
//! Rules never execute code. A scoring tier is a closed combination
//! (`all` / `any` / `none`) over named signals, and a signal is either a
//! regex or one of a fixed set of built-in heuristics.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod catalog;
pub mod handle;
pub mod scoring;

pub use argus_lang::Language;
pub use catalog::{
    CompiledSanitizer, CompiledSink, CompiledSource, LanguageTables, PatternCatalog, TypeHints,
};
pub use handle::CatalogHandle;
pub use scoring::{BuiltinSignal, CategoryScoring, Condition, Signal, Tier};

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Finding severity levels, ordered from highest to lowest impact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Critical severity -- must be fixed immediately.
    Critical,
    /// High severity -- should be fixed before release.
    High,
    /// Medium severity -- should be addressed in a timely manner.
    Medium,
    /// Low severity -- minor issue, fix when convenient.
    Low,
    /// Informational -- no direct risk, advisory only.
    Info,
}

impl Severity {
    /// Caps this severity so it is no more severe than `ceiling`.
    ///
    /// `Critical.cap_at(Low)` is `Low`; `Info.cap_at(Low)` stays `Info`.
    #[must_use]
    pub fn cap_at(self, ceiling: Severity) -> Severity {
        self.max(ceiling)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// PatternCategory
// ---------------------------------------------------------------------------

/// Vulnerability class a finding belongs to.
///
/// The set is fixed. Catalog entries extend coverage within a category,
/// never the set of categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternCategory {
    /// SQL built from untrusted data.
    SqlInjection,
    /// Untrusted data rendered as HTML or script.
    CrossSiteScripting,
    /// Untrusted data reaching a shell or process spawn.
    CommandInjection,
    /// Untrusted data used as a filesystem path.
    PathTraversal,
    /// Untrusted data fed to an object deserializer.
    InsecureDeserialization,
    /// Broken or weak hash, cipher or randomness.
    WeakCryptography,
    /// Untrusted data evaluated as code.
    CodeInjection,
    /// Credentials embedded in source.
    HardcodedSecret,
    /// Unchecked buffer writes.
    BufferOverflow,
    /// Anything else.
    Other,
}

impl PatternCategory {
    /// Returns all categories in declaration order.
    #[must_use]
    pub const fn all() -> &'static [PatternCategory] {
        &[
            Self::SqlInjection,
            Self::CrossSiteScripting,
            Self::CommandInjection,
            Self::PathTraversal,
            Self::InsecureDeserialization,
            Self::WeakCryptography,
            Self::CodeInjection,
            Self::HardcodedSecret,
            Self::BufferOverflow,
            Self::Other,
        ]
    }

    /// Snake-case label, identical to the serialized form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SqlInjection => "sql_injection",
            Self::CrossSiteScripting => "cross_site_scripting",
            Self::CommandInjection => "command_injection",
            Self::PathTraversal => "path_traversal",
            Self::InsecureDeserialization => "insecure_deserialization",
            Self::WeakCryptography => "weak_cryptography",
            Self::CodeInjection => "code_injection",
            Self::HardcodedSecret => "hardcoded_secret",
            Self::BufferOverflow => "buffer_overflow",
            Self::Other => "other",
        }
    }

    /// Primary CWE identifier for the category (e.g. `"CWE-89"`).
    #[must_use]
    pub const fn cwe_id(self) -> Option<&'static str> {
        match self {
            Self::SqlInjection => Some("CWE-89"),
            Self::CrossSiteScripting => Some("CWE-79"),
            Self::CommandInjection => Some("CWE-78"),
            Self::PathTraversal => Some("CWE-22"),
            Self::InsecureDeserialization => Some("CWE-502"),
            Self::WeakCryptography => Some("CWE-327"),
            Self::CodeInjection => Some("CWE-95"),
            Self::HardcodedSecret => Some("CWE-798"),
            Self::BufferOverflow => Some("CWE-120"),
            Self::Other => None,
        }
    }

    /// Severity reported for an unsanitized finding of this category.
    #[must_use]
    pub const fn default_severity(self) -> Severity {
        match self {
            Self::CommandInjection | Self::CodeInjection => Severity::Critical,
            Self::SqlInjection
            | Self::CrossSiteScripting
            | Self::PathTraversal
            | Self::InsecureDeserialization
            | Self::HardcodedSecret
            | Self::BufferOverflow => Severity::High,
            Self::WeakCryptography | Self::Other => Severity::Medium,
        }
    }

    /// Maps a free-form vulnerability label onto a category.
    ///
    /// Accepts the snake-case names as well as the loose labels produced by
    /// training pipelines and CWE descriptions (`"SQL_INJECTION"`, `"XSS"`,
    /// `"Improper Neutralization ... OS Command"`, ...). Returns `None` when
    /// nothing matches.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        let l = label.trim().to_lowercase().replace(['-', ' '], "_");
        if l.is_empty() {
            return None;
        }
        if let Some(exact) = Self::all().iter().find(|c| c.as_str() == l) {
            return Some(*exact);
        }
        let has = |needle: &str| l.contains(needle);
        let category = if has("deserializ") {
            Self::InsecureDeserialization
        } else if has("sqli") || (has("sql") && has("injection")) {
            Self::SqlInjection
        } else if has("eval") || (has("code") && has("injection")) {
            Self::CodeInjection
        } else if has("buffer") && has("overflow") {
            Self::BufferOverflow
        } else if has("xss") || (has("cross") && has("script")) {
            Self::CrossSiteScripting
        } else if has("command") || has("shell") {
            Self::CommandInjection
        } else if has("traversal") || (has("path") && has("injection")) {
            Self::PathTraversal
        } else if has("crypto") || has("hash") || has("cipher") {
            Self::WeakCryptography
        } else if has("secret") || has("credential") || has("hardcoded") {
            Self::HardcodedSecret
        } else {
            return None;
        };
        Some(category)
    }
}

impl fmt::Display for PatternCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SourceKind / SanitizerKind
// ---------------------------------------------------------------------------

/// Where untrusted data enters. Sources carry no category: the category of a
/// flow is decided by the sink it reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// HTTP request parameters, body, headers.
    Request,
    /// Interactive input.
    Input,
    /// Environment variables.
    Environment,
    /// Command-line arguments.
    Argv,
    /// Raw socket reads.
    Network,
    /// Browser location / URL.
    Location,
    /// Document properties (referrer, URL, DOM reads).
    Document,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Request => "request",
            Self::Input => "input",
            Self::Environment => "environment",
            Self::Argv => "argv",
            Self::Network => "network",
            Self::Location => "location",
            Self::Document => "document",
        };
        f.write_str(label)
    }
}

/// Whether a sanitizer actually neutralizes a danger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SanitizerKind {
    /// Neutralizes the danger for the categories it applies to.
    Real,
    /// Changes the value's shape only (trim, case fold, generic encode).
    Cosmetic,
}

// ---------------------------------------------------------------------------
// RuleError
// ---------------------------------------------------------------------------

/// Errors arising from catalog loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// A catalog file could not be read.
    #[error("I/O error reading catalog '{path}': {source}")]
    Io {
        /// The path that could not be read.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A catalog document is not valid YAML for the catalog schema.
    #[error("YAML parse error in catalog '{origin}': {source}")]
    Yaml {
        /// File path or label of the document.
        origin: String,
        /// The underlying YAML error.
        source: serde_yml::Error,
    },

    /// A pattern failed to compile.
    #[error("invalid pattern '{pattern}' in catalog '{origin}': {source}")]
    InvalidPattern {
        /// File path or label of the document.
        origin: String,
        /// The offending pattern text.
        pattern: String,
        /// The underlying regex error.
        source: regex::Error,
    },

    /// A scoring tier references a signal the category does not define.
    #[error("tier {tier} of '{category}' references unknown signal '{signal}'")]
    UnknownSignal {
        /// Category whose tier is broken.
        category: PatternCategory,
        /// Zero-based tier index.
        tier: usize,
        /// The undefined signal name.
        signal: String,
    },

    /// A scoring tier has neither `all` nor `any` signals and would always fire.
    #[error("tier {tier} of '{category}' has an empty condition")]
    EmptyCondition {
        /// Category whose tier is broken.
        category: PatternCategory,
        /// Zero-based tier index.
        tier: usize,
    },

    /// A tier score lies outside `[0, 1]`.
    #[error("tier {tier} of '{category}' has score {score} outside [0, 1]")]
    ScoreOutOfRange {
        /// Category whose tier is broken.
        category: PatternCategory,
        /// Zero-based tier index.
        tier: usize,
        /// The offending score.
        score: f64,
    },

    /// No document in the catalog declared any language tables.
    #[error("catalog defines no language tables")]
    EmptyCatalog,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
