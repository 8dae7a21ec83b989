//! Pattern catalog: per-language source, sink and sanitizer tables.
//!
//! Each supported language has a YAML document under `rules/catalog/`
//! describing:
//!
//! - **sources**: where untrusted data enters (`request.args`, `req.query`),
//! - **sinks**: dangerous operations, grouped by [`PatternCategory`],
//! - **sanitizers**: real neutralizers bound to categories, and cosmetic
//!   transforms that must never count as neutralization,
//! - **input_hints** / **type_hints**: extra patterns used by line-level
//!   scoring and type inference.
//!
//! A separate document holds the per-category scoring tiers (see
//! [`crate::scoring`]). The built-in documents are embedded at compile time;
//! operators can point [`PatternCatalog::from_yaml_dir`] at their own copy.
//!
//! All patterns are compiled case-insensitively once, at load time. A
//! compiled catalog is immutable.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::scoring::{CategoryScoring, CategoryScoringSpec};
use crate::{Language, PatternCategory, RuleError, SanitizerKind, SourceKind};

// ---------------------------------------------------------------------------
// Embedded documents
// ---------------------------------------------------------------------------

const PYTHON_CATALOG: &str = include_str!("../../../rules/catalog/python.yaml");
const JAVASCRIPT_CATALOG: &str = include_str!("../../../rules/catalog/javascript.yaml");
const SCORING_CATALOG: &str = include_str!("../../../rules/catalog/scoring.yaml");

/// Upper bound on a compiled pattern's size, guarding against pathological
/// operator-supplied catalogs.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

// ---------------------------------------------------------------------------
// YAML document model
// ---------------------------------------------------------------------------

/// One catalog YAML document.
///
/// A document may carry language tables (when `language` is set), scoring
/// blocks, or both.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogDocument {
    /// Document version (SemVer by convention).
    pub version: Option<String>,
    /// Language the tables below belong to.
    pub language: Option<Language>,
    /// Taint sources.
    pub sources: Vec<SourceEntry>,
    /// Dangerous sinks.
    pub sinks: Vec<SinkEntry>,
    /// Real and cosmetic sanitizers.
    pub sanitizers: Vec<SanitizerEntry>,
    /// Extra patterns marking a line as carrying untrusted input.
    pub input_hints: Vec<String>,
    /// Patterns used by type inference.
    pub type_hints: TypeHintEntries,
    /// Per-category scoring tiers.
    pub scoring: BTreeMap<PatternCategory, CategoryScoringSpec>,
}

/// YAML source row.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceEntry {
    /// What kind of input this is.
    pub kind: SourceKind,
    /// Regex matched against a line.
    pub pattern: String,
}

/// YAML sink row.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkEntry {
    /// Category of the danger.
    pub category: PatternCategory,
    /// Regex matched against a line.
    pub pattern: String,
}

/// YAML sanitizer row.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SanitizerEntry {
    /// Short identifier reported on flow nodes.
    pub name: String,
    /// Real or cosmetic.
    pub kind: SanitizerKind,
    /// Categories neutralized. Ignored for cosmetic sanitizers.
    #[serde(default)]
    pub applies_to: Vec<PatternCategory>,
    /// Regex matched against a line.
    pub pattern: String,
}

/// YAML type-hint lists.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TypeHintEntries {
    /// Right-hand sides that produce a sanitized value.
    pub sanitized: Vec<String>,
    /// Right-hand sides that read from a database.
    pub database: Vec<String>,
    /// Right-hand sides that read from a file.
    pub file: Vec<String>,
}

// ---------------------------------------------------------------------------
// Compiled tables
// ---------------------------------------------------------------------------

/// A compiled source pattern.
#[derive(Debug, Clone)]
pub struct CompiledSource {
    /// What kind of input this is.
    pub kind: SourceKind,
    /// Case-insensitive regex.
    pub regex: Regex,
}

/// A compiled sink pattern.
#[derive(Debug, Clone)]
pub struct CompiledSink {
    /// Category of the danger.
    pub category: PatternCategory,
    /// Case-insensitive regex.
    pub regex: Regex,
}

/// A compiled sanitizer pattern.
#[derive(Debug, Clone)]
pub struct CompiledSanitizer {
    /// Short identifier.
    pub name: String,
    /// Real or cosmetic.
    pub kind: SanitizerKind,
    /// Categories neutralized (empty for cosmetic sanitizers).
    pub applies_to: BTreeSet<PatternCategory>,
    /// Case-insensitive regex.
    pub regex: Regex,
}

impl CompiledSanitizer {
    /// Returns `true` if this is a real sanitizer for `category`.
    #[must_use]
    pub fn neutralizes(&self, category: PatternCategory) -> bool {
        self.kind == SanitizerKind::Real && self.applies_to.contains(&category)
    }
}

/// Compiled type-inference hints.
#[derive(Debug, Clone, Default)]
pub struct TypeHints {
    /// Right-hand sides that produce a sanitized value.
    pub sanitized: Vec<Regex>,
    /// Right-hand sides that read from a database.
    pub database: Vec<Regex>,
    /// Right-hand sides that read from a file.
    pub file: Vec<Regex>,
}

/// All compiled tables for one language.
#[derive(Debug, Clone)]
pub struct LanguageTables {
    /// The language these tables describe.
    pub language: Language,
    /// Taint sources.
    pub sources: Vec<CompiledSource>,
    /// Dangerous sinks.
    pub sinks: Vec<CompiledSink>,
    /// Real and cosmetic sanitizers.
    pub sanitizers: Vec<CompiledSanitizer>,
    /// Extra untrusted-input markers.
    pub input_hints: Vec<Regex>,
    /// Type-inference hints.
    pub type_hints: TypeHints,
}

impl LanguageTables {
    fn empty(language: Language) -> Self {
        Self {
            language,
            sources: Vec::new(),
            sinks: Vec::new(),
            sanitizers: Vec::new(),
            input_hints: Vec::new(),
            type_hints: TypeHints::default(),
        }
    }

    /// Returns `true` if a source pattern or input hint matches `text`.
    #[must_use]
    pub fn mentions_untrusted_input(&self, text: &str) -> bool {
        self.sources.iter().any(|s| s.regex.is_match(text))
            || self.input_hints.iter().any(|r| r.is_match(text))
    }

    /// Iterates the cosmetic sanitizers.
    pub fn cosmetic_sanitizers(&self) -> impl Iterator<Item = &CompiledSanitizer> {
        self.sanitizers
            .iter()
            .filter(|s| s.kind == SanitizerKind::Cosmetic)
    }

    /// Returns `true` if any cosmetic sanitizer matches `text`.
    #[must_use]
    pub fn has_cosmetic_match(&self, text: &str) -> bool {
        self.cosmetic_sanitizers().any(|s| s.regex.is_match(text))
    }

    /// Returns `true` if a real sanitizer for `category` matches `text` and
    /// no cosmetic sanitizer does.
    #[must_use]
    pub fn is_protected(&self, text: &str, category: PatternCategory) -> bool {
        !self.has_cosmetic_match(text)
            && self
                .sanitizers
                .iter()
                .any(|s| s.neutralizes(category) && s.regex.is_match(text))
    }
}

// ---------------------------------------------------------------------------
// PatternCatalog
// ---------------------------------------------------------------------------

/// The complete, compiled pattern catalog.
#[derive(Debug, Clone)]
pub struct PatternCatalog {
    version: String,
    fingerprint: String,
    tables: BTreeMap<Language, LanguageTables>,
    scoring: BTreeMap<PatternCategory, CategoryScoring>,
}

impl PatternCatalog {
    /// Compiles the catalog embedded in the binary.
    ///
    /// # Errors
    ///
    /// Fails only if the embedded documents are broken, which the crate's
    /// tests rule out.
    pub fn builtin() -> Result<Self, RuleError> {
        Self::from_documents([
            ("builtin:python.yaml".to_string(), PYTHON_CATALOG.to_string()),
            (
                "builtin:javascript.yaml".to_string(),
                JAVASCRIPT_CATALOG.to_string(),
            ),
            ("builtin:scoring.yaml".to_string(), SCORING_CATALOG.to_string()),
        ])
    }

    /// Compiles a catalog from a single YAML document.
    ///
    /// # Errors
    ///
    /// See [`PatternCatalog::from_documents`].
    pub fn from_yaml_str(origin: &str, yaml: &str) -> Result<Self, RuleError> {
        Self::from_documents([(origin.to_string(), yaml.to_string())])
    }

    /// Loads every `.yaml` / `.yml` file under `dir`, in file-name order.
    ///
    /// # Errors
    ///
    /// - [`RuleError::Io`] if a file cannot be read.
    /// - Anything [`PatternCatalog::from_documents`] returns.
    pub fn from_yaml_dir(dir: &Path) -> Result<Self, RuleError> {
        let mut documents = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| RuleError::Io {
                path: dir.display().to_string(),
                source: e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
            })?;
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == "yaml" || e == "yml");
            if !entry.file_type().is_file() || !is_yaml {
                continue;
            }
            let text = std::fs::read_to_string(path).map_err(|source| RuleError::Io {
                path: path.display().to_string(),
                source,
            })?;
            debug!(path = %path.display(), "read catalog document");
            documents.push((path.display().to_string(), text));
        }
        Self::from_documents(documents)
    }

    /// Compiles a catalog from `(origin, yaml)` documents.
    ///
    /// Tables for the same language are concatenated in document order. A
    /// later scoring block for a category replaces an earlier one.
    ///
    /// # Errors
    ///
    /// - [`RuleError::Yaml`] for malformed documents.
    /// - [`RuleError::InvalidPattern`] for patterns that fail to compile.
    /// - Tier validation errors from [`CategoryScoring::compile`].
    /// - [`RuleError::EmptyCatalog`] if no document declares a language.
    pub fn from_documents(
        documents: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, RuleError> {
        let mut tables: BTreeMap<Language, LanguageTables> = BTreeMap::new();
        let mut scoring: BTreeMap<PatternCategory, CategoryScoring> = BTreeMap::new();
        let mut versions: Vec<String> = Vec::new();
        let mut hasher = Sha256::new();

        for (origin, yaml) in documents {
            hasher.update(yaml.as_bytes());
            let doc: CatalogDocument =
                serde_yml::from_str(&yaml).map_err(|source| RuleError::Yaml {
                    origin: origin.clone(),
                    source,
                })?;
            let compile = |pattern: &str| compile_pattern(&origin, pattern);

            if let Some(language) = doc.language {
                let target = tables
                    .entry(language)
                    .or_insert_with(|| LanguageTables::empty(language));
                compile_tables(target, &doc, &compile, &origin)?;
            }
            for (category, spec) in doc.scoring {
                scoring.insert(category, CategoryScoring::compile(category, spec, &compile)?);
            }

            let label = doc
                .language
                .map_or_else(|| "scoring".to_string(), |l| l.tag().to_string());
            versions.push(format!(
                "{label}@{}",
                doc.version.as_deref().unwrap_or("unversioned")
            ));
        }

        if tables.is_empty() {
            return Err(RuleError::EmptyCatalog);
        }

        let catalog = Self {
            version: versions.join("+"),
            fingerprint: hex::encode(hasher.finalize()),
            tables,
            scoring,
        };
        info!(
            version = %catalog.version,
            languages = catalog.tables.len(),
            scored_categories = catalog.scoring.len(),
            "pattern catalog compiled"
        );
        Ok(catalog)
    }

    /// Human-readable version made of each document's `version`.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// SHA-256 hex digest over the raw documents, in load order.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Tables used for `language` (TypeScript resolves to JavaScript).
    #[must_use]
    pub fn tables(&self, language: Language) -> Option<&LanguageTables> {
        self.tables
            .get(&language)
            .or_else(|| self.tables.get(&language.catalog_language()))
    }

    /// Returns `true` if the catalog can analyse `language`.
    #[must_use]
    pub fn supports(&self, language: Language) -> bool {
        self.tables(language).is_some()
    }

    /// Scoring rules for `category`, if the catalog scores it.
    #[must_use]
    pub fn scoring(&self, category: PatternCategory) -> Option<&CategoryScoring> {
        self.scoring.get(&category)
    }

    /// Iterates scored categories in category order.
    pub fn scored_categories(&self) -> impl Iterator<Item = (PatternCategory, &CategoryScoring)> {
        self.scoring.iter().map(|(c, s)| (*c, s))
    }
}

fn compile_pattern(origin: &str, pattern: &str) -> Result<Regex, RuleError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|source| RuleError::InvalidPattern {
            origin: origin.to_string(),
            pattern: pattern.to_string(),
            source,
        })
}

fn compile_tables(
    target: &mut LanguageTables,
    doc: &CatalogDocument,
    compile: &impl Fn(&str) -> Result<Regex, RuleError>,
    origin: &str,
) -> Result<(), RuleError> {
    for source in &doc.sources {
        target.sources.push(CompiledSource {
            kind: source.kind,
            regex: compile(&source.pattern)?,
        });
    }
    for sink in &doc.sinks {
        target.sinks.push(CompiledSink {
            category: sink.category,
            regex: compile(&sink.pattern)?,
        });
    }
    for sanitizer in &doc.sanitizers {
        let applies_to: BTreeSet<PatternCategory> = match sanitizer.kind {
            SanitizerKind::Real => sanitizer.applies_to.iter().copied().collect(),
            SanitizerKind::Cosmetic => BTreeSet::new(),
        };
        if sanitizer.kind == SanitizerKind::Real && applies_to.is_empty() {
            warn!(
                origin,
                sanitizer = %sanitizer.name,
                "real sanitizer applies to no category; it will never neutralize"
            );
        }
        target.sanitizers.push(CompiledSanitizer {
            name: sanitizer.name.clone(),
            kind: sanitizer.kind,
            applies_to,
            regex: compile(&sanitizer.pattern)?,
        });
    }
    for hint in &doc.input_hints {
        target.input_hints.push(compile(hint)?);
    }
    for hint in &doc.type_hints.sanitized {
        target.type_hints.sanitized.push(compile(hint)?);
    }
    for hint in &doc.type_hints.database {
        target.type_hints.database.push(compile(hint)?);
    }
    for hint in &doc.type_hints.file {
        target.type_hints.file.push(compile(hint)?);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
