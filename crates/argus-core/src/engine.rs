//! Analysis orchestrator.
//!
//! [`Analyzer::analyze`] runs the passes for one snippet:
//!
//! 1. **Preprocess** into code lines (blank and comment lines dropped).
//! 2. **Locate** source and sink lines.
//! 3. **Trace** data flows from each source to later sinks.
//! 4. **Infer** variable types.
//! 5. **Score** candidate lines and keep those above the inclusion threshold;
//!    every traced flow becomes a finding as well.
//! 6. **Filter** false positives.
//! 7. **Deduplicate** and rank.
//!
//! Nothing here returns an error for bad input. An unknown language yields an
//! empty result; a fault while scoring one line drops that line only.
//!
//! # Example
//!
//! ```
//! use argus_core::Analyzer;
//!
//! let analyzer = Analyzer::builtin().unwrap();
//! let code = "user = req.query.name;\nel.innerHTML = user;\n";
//! let result = analyzer.analyze(code, "javascript");
//! assert!(result.vulnerable);
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::{debug, error, info, warn};

use argus_analysis::{
    deduplicate, flow_finding, infer_types, locate, passes_inclusion, pattern_finding, preprocess,
    AnalysisResult, CodeLine, DataFlowTracer, FalsePositiveFilter, Finding, ScoringEngine,
    SimilarityProvider,
};
use argus_rules::{CatalogHandle, Language, PatternCatalog};

use crate::cache::AnalysisCache;
use crate::config::ArgusConfig;
use crate::CoreError;

/// Method names recorded in [`AnalysisResult::methods_used`].
pub mod methods {
    /// Catalog tier scoring.
    pub const PATTERN: &str = "pattern";
    /// Source-to-sink tracing.
    pub const DATAFLOW: &str = "dataflow";
    /// Variable type inference.
    pub const TYPE_INFERENCE: &str = "type_inference";
    /// False-positive filtering.
    pub const FP_FILTER: &str = "fp_filter";
    /// Semantic similarity contributed at least one score.
    pub const SEMANTIC: &str = "semantic";
    /// Semantic similarity was missing or failed.
    pub const SEMANTIC_UNAVAILABLE: &str = "semantic_unavailable";
}

// ---------------------------------------------------------------------------
// Catalog source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum CatalogSource {
    Fixed(Arc<PatternCatalog>),
    Live(CatalogHandle),
}

impl CatalogSource {
    fn snapshot(&self) -> Arc<PatternCatalog> {
        match self {
            Self::Fixed(catalog) => Arc::clone(catalog),
            Self::Live(handle) => handle.snapshot(),
        }
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// Runs analyses against one catalog, configuration and optional semantic
/// provider. Cheap to share across threads.
pub struct Analyzer {
    catalog: CatalogSource,
    provider: Option<Arc<dyn SimilarityProvider>>,
    config: ArgusConfig,
    cache: Option<AnalysisCache>,
}

impl Analyzer {
    /// Creates an analyzer over a fixed catalog with default settings and no
    /// cache.
    #[must_use]
    pub fn new(catalog: Arc<PatternCatalog>) -> Self {
        Self {
            catalog: CatalogSource::Fixed(catalog),
            provider: None,
            config: ArgusConfig::default(),
            cache: None,
        }
    }

    /// Creates an analyzer that follows a hot-reloadable catalog. Each
    /// analysis uses the catalog current when it starts.
    #[must_use]
    pub fn with_handle(handle: CatalogHandle) -> Self {
        Self {
            catalog: CatalogSource::Live(handle),
            provider: None,
            config: ArgusConfig::default(),
            cache: None,
        }
    }

    /// Creates an analyzer over the embedded catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Catalog`] if the embedded catalog fails to compile.
    pub fn builtin() -> Result<Self, CoreError> {
        Ok(Self::new(Arc::new(PatternCatalog::builtin()?)))
    }

    /// Builds an analyzer from configuration: the catalog comes from
    /// `config.catalog.path` (or the embedded one) and the cache is enabled
    /// as configured.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Catalog`] if the catalog fails to load.
    pub fn from_config(config: ArgusConfig) -> Result<Self, CoreError> {
        let catalog = match config.catalog.path.as_deref() {
            Some(dir) => PatternCatalog::from_yaml_dir(Path::new(dir))?,
            None => PatternCatalog::builtin()?,
        };
        info!(
            version = %catalog.version(),
            fingerprint = %catalog.fingerprint(),
            "pattern catalog loaded"
        );
        let cache = config
            .cache
            .enabled
            .then(|| AnalysisCache::new(config.cache.max_entries));
        Ok(Self {
            catalog: CatalogSource::Live(CatalogHandle::new(Arc::new(catalog))),
            provider: None,
            config,
            cache,
        })
    }

    /// Replaces the configuration. Cached results are dropped.
    #[must_use]
    pub fn with_config(mut self, config: ArgusConfig) -> Self {
        self.config = config;
        if let Some(cache) = &self.cache {
            cache.clear();
        }
        self
    }

    /// Attaches a semantic similarity provider.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn SimilarityProvider>) -> Self {
        self.provider = Some(provider);
        if let Some(cache) = &self.cache {
            cache.clear();
        }
        self
    }

    /// Enables result caching.
    #[must_use]
    pub fn with_cache(mut self, cache: AnalysisCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// The configuration in effect.
    #[must_use]
    pub fn config(&self) -> &ArgusConfig {
        &self.config
    }

    /// The catalog the next analysis will use.
    #[must_use]
    pub fn catalog(&self) -> Arc<PatternCatalog> {
        self.catalog.snapshot()
    }

    /// The hot-reload handle, if this analyzer follows one.
    #[must_use]
    pub fn catalog_handle(&self) -> Option<&CatalogHandle> {
        match &self.catalog {
            CatalogSource::Live(handle) => Some(handle),
            CatalogSource::Fixed(_) => None,
        }
    }

    /// Analyzes `code` written in `language` (`"python"`, `"javascript"`,
    /// `"typescript"`, case-insensitive).
    #[must_use]
    pub fn analyze(&self, code: &str, language: &str) -> AnalysisResult {
        let lang = match Language::from_tag(language) {
            Ok(lang) => lang,
            Err(e) => {
                debug!(language, error = %e, "unsupported language");
                return AnalysisResult::empty(language);
            }
        };

        let catalog = self.catalog.snapshot();
        if !catalog.supports(lang) {
            debug!(language, "catalog has no tables for language");
            return AnalysisResult::empty(language);
        }

        let key = self
            .cache
            .as_ref()
            .map(|_| AnalysisCache::key(language, code, catalog.fingerprint()));
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(hit) = cache.get(key) {
                debug!(language, "analysis cache hit");
                return (*hit).clone();
            }
        }

        let result = self.run(&catalog, lang, code, language);

        if let (Some(cache), Some(key)) = (&self.cache, key) {
            cache.insert(key, Arc::new(result.clone()));
        }
        result
    }

    fn run(&self, catalog: &PatternCatalog, lang: Language, code: &str, tag: &str) -> AnalysisResult {
        let Some(tables) = catalog.tables(lang) else {
            return AnalysisResult::empty(tag);
        };

        let lines = preprocess(code, lang);
        let located = locate(&lines, tables);
        let flows = DataFlowTracer::new(tables, &self.config.dataflow).trace(&lines, &located);
        let types = infer_types(&lines, tables);

        let outcome = ScoringEngine::new(catalog, tables, &self.config.scoring)
            .with_provider(self.provider.as_deref())
            .score(&lines, &located, &flows);

        let mut findings: Vec<Finding> = Vec::new();
        for flow in &flows {
            match flow_finding(flow, &self.config.scoring) {
                Ok(finding) => findings.push(finding),
                Err(e) => warn!(line = flow.sink.line, error = %e, "skipping malformed flow finding"),
            }
        }
        for score in outcome
            .scores
            .iter()
            .filter(|s| passes_inclusion(s.combined, &self.config.scoring))
        {
            let Some(line) = line_at(&lines, score.line) else {
                continue;
            };
            match pattern_finding(line, score) {
                Ok(finding) => findings.push(finding),
                Err(e) => warn!(line = score.line, error = %e, "skipping malformed pattern finding"),
            }
        }
        let raw = findings.len();

        let filtered =
            FalsePositiveFilter::new(self.config.filter.clone()).apply(findings, &lines, &types);
        let ranked = deduplicate(filtered);

        let mut methods_used: BTreeSet<String> = [
            methods::PATTERN,
            methods::DATAFLOW,
            methods::TYPE_INFERENCE,
            methods::FP_FILTER,
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        if outcome.semantic_succeeded {
            methods_used.insert(methods::SEMANTIC.to_string());
        }
        if self.provider.is_none() || outcome.semantic_unavailable {
            methods_used.insert(methods::SEMANTIC_UNAVAILABLE.to_string());
        }

        let result = AnalysisResult::from_findings(
            tag,
            ranked,
            methods_used,
            self.config.scoring.vulnerable_threshold,
        );
        debug!(
            language = tag,
            lines = lines.len(),
            sources = located.sources.len(),
            sinks = located.sinks.len(),
            flows = flows.len(),
            raw_findings = raw,
            findings = result.findings.len(),
            faulted_lines = outcome.faulted_lines.len(),
            max_risk = result.max_risk_score,
            "analysis complete"
        );
        result
    }
}

fn line_at(lines: &[CodeLine], number: u32) -> Option<&CodeLine> {
    lines
        .binary_search_by_key(&number, |l| l.line_number)
        .ok()
        .map(|idx| &lines[idx])
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("catalog", &self.catalog.snapshot().version().to_string())
            .field("has_provider", &self.provider.is_some())
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Default analyzer
// ---------------------------------------------------------------------------

static DEFAULT_ANALYZER: Lazy<Option<Analyzer>> = Lazy::new(|| match Analyzer::builtin() {
    Ok(analyzer) => Some(analyzer),
    Err(e) => {
        error!(error = %e, "embedded pattern catalog failed to compile");
        None
    }
});

/// Analyzes `code` with the embedded catalog and default settings.
#[must_use]
pub fn analyze(code: &str, language: &str) -> AnalysisResult {
    match DEFAULT_ANALYZER.as_ref() {
        Some(analyzer) => analyzer.analyze(code, language),
        None => AnalysisResult::empty(language),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use argus_analysis::{ProviderError, ScoringConfig};
    use argus_rules::PatternCategory;

    fn analyzer() -> Analyzer {
        Analyzer::builtin().unwrap()
    }

    #[test]
    fn unsupported_language_is_empty() {
        let result = analyzer().analyze("eval(x)", "cobol");
        assert!(!result.vulnerable);
        assert!(result.findings.is_empty());
        assert!(result.methods_used.is_empty());
        assert_eq!(result.language, "cobol");
    }

    #[test]
    fn empty_code_is_clean() {
        let result = analyzer().analyze("", "python");
        assert!(!result.vulnerable);
        assert!(result.findings.is_empty());
        assert!(result.methods_used.contains(methods::PATTERN));
        assert!(result.methods_used.contains(methods::SEMANTIC_UNAVAILABLE));
    }

    #[test]
    fn language_tag_is_case_insensitive() {
        let result = analyzer().analyze("eval(request.args.get('x'))", "Python");
        assert!(result.vulnerable);
        assert_eq!(result.language, "Python");
    }

    #[test]
    fn flow_and_pattern_collapse_per_line() {
        let code = "\
uid = request.args.get('id')
cursor.execute(\"SELECT * FROM users WHERE id = '\" + uid + \"'\")
";
        let result = analyzer().analyze(code, "python");
        let sql: Vec<&Finding> = result.findings_for(PatternCategory::SqlInjection).collect();
        assert_eq!(sql.len(), 1);
        assert_eq!(sql[0].line, 2);
        assert_eq!(sql[0].risk_score, 0.85);
    }

    #[test]
    fn config_thresholds_apply() {
        let mut config = ArgusConfig::default();
        config.scoring = ScoringConfig {
            vulnerable_threshold: 0.9,
            ..ScoringConfig::default()
        };
        let code = "uid = request.args.get('id')\ncursor.execute('SELECT ' + uid)\n";
        let result = analyzer().with_config(config).analyze(code, "python");
        assert!(!result.findings.is_empty());
        assert!(!result.vulnerable);
    }

    struct Offline;

    impl SimilarityProvider for Offline {
        fn category_score(&self, _: &str, _: PatternCategory) -> Result<f64, ProviderError> {
            Err(ProviderError::Unavailable("offline".to_string()))
        }
        fn safe_score(&self, _: &str) -> Result<f64, ProviderError> {
            Err(ProviderError::Unavailable("offline".to_string()))
        }
    }

    #[test]
    fn failing_provider_is_recorded() {
        let result = analyzer()
            .with_provider(Arc::new(Offline))
            .analyze("eval(user_code)", "python");
        assert!(result.methods_used.contains(methods::SEMANTIC_UNAVAILABLE));
        assert!(!result.methods_used.contains(methods::SEMANTIC));
        assert!(!result.findings.is_empty());
    }

    struct CodeOnly;

    impl SimilarityProvider for CodeOnly {
        fn category_score(&self, _: &str, category: PatternCategory) -> Result<f64, ProviderError> {
            match category {
                PatternCategory::CodeInjection => Ok(0.7),
                other => Err(ProviderError::MissingPrototype(other)),
            }
        }
        fn safe_score(&self, _: &str) -> Result<f64, ProviderError> {
            Ok(0.0)
        }
    }

    #[test]
    fn partial_prototypes_do_not_mark_provider_unavailable() {
        let code = "eval(user_code)\nobj = pickle.loads(blob)\n";
        let result = analyzer()
            .with_provider(Arc::new(CodeOnly))
            .analyze(code, "python");
        assert!(result.methods_used.contains(methods::SEMANTIC));
        assert!(!result.methods_used.contains(methods::SEMANTIC_UNAVAILABLE));
    }

    #[test]
    fn cached_results_match_fresh_ones() {
        let cache = AnalysisCache::new(4);
        let analyzer = analyzer().with_cache(cache.clone());
        let code = "os.system('ls ' + request.args.get('d'))\n";
        let first = analyzer.analyze(code, "python");
        let key = AnalysisCache::key("python", code, analyzer.catalog().fingerprint());
        assert!(cache.get(&key).is_some());
        assert_eq!(analyzer.analyze(code, "python"), first);
    }

    #[test]
    fn hot_reload_changes_later_analyses() {
        let handle = CatalogHandle::new(Arc::new(PatternCatalog::builtin().unwrap()));
        let analyzer = Analyzer::with_handle(handle.clone());
        let code = "eval(request.args.get('x'))";
        assert!(analyzer.analyze(code, "python").vulnerable);

        let js_only = PatternCatalog::from_yaml_str(
            "inline",
            "version: \"0.1\"\nlanguage: javascript\nsources: []\nsinks: []\n",
        )
        .unwrap();
        handle.replace(Arc::new(js_only));
        let result = analyzer.analyze(code, "python");
        assert!(result.findings.is_empty());
        assert!(result.methods_used.is_empty());
    }

    #[test]
    fn free_function_uses_embedded_catalog() {
        let result = analyze("el.innerHTML = location.hash;", "javascript");
        assert!(result
            .findings_for(PatternCategory::CrossSiteScripting)
            .next()
            .is_some());
    }

    #[test]
    fn analyzer_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Analyzer>();
    }
}
