//! Semantic similarity seam.
//!
//! The scoring engine asks a [`SimilarityProvider`] how close a line is to
//! each vulnerability category and to known-safe code. The provider is an
//! external collaborator: a failure is never fatal, the semantic component
//! simply scores `0.0` for that line.
//!
//! [`PrototypeSimilarity`] is the stock provider. It embeds the line with an
//! [`EmbeddingBackend`] and compares it, by cosine similarity, to
//! precomputed prototype vectors loaded from JSON:
//!
//! ```json
//! {
//!   "dimension": 3,
//!   "safe": [0.1, 0.9, 0.0],
//!   "categories": {
//!     "SQL_INJECTION": [0.9, 0.1, 0.0],
//!     "xss": [0.0, 0.2, 0.9]
//!   }
//! }
//! ```
//!
//! Category keys go through [`PatternCategory::from_label`], so labels from
//! training pipelines load as-is.

use std::collections::BTreeMap;
use std::path::Path;

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};

use argus_rules::PatternCategory;

// ---------------------------------------------------------------------------
// ProviderError
// ---------------------------------------------------------------------------

/// Errors raised by similarity providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider cannot answer right now (model not loaded, service down).
    #[error("semantic provider unavailable: {0}")]
    Unavailable(String),

    /// The embedding backend failed on this input.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// No prototype exists for the requested category.
    #[error("no prototype vector for category {0}")]
    MissingPrototype(PatternCategory),

    /// Embedding and prototype lengths differ.
    #[error("embedding has dimension {actual}, prototypes expect {expected}")]
    DimensionMismatch {
        /// Prototype dimension.
        expected: usize,
        /// Embedding dimension.
        actual: usize,
    },

    /// Prototype file could not be read.
    #[error("failed to read prototypes from {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Prototype file is not valid JSON for the expected shape.
    #[error("invalid prototype file: {0}")]
    Parse(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Scores how close a line is to a vulnerability category and to safe code.
pub trait SimilarityProvider: Send + Sync {
    /// Similarity of `text` to `category`, in `[0, 1]`.
    fn category_score(&self, text: &str, category: PatternCategory) -> Result<f64, ProviderError>;

    /// Similarity of `text` to known-safe code, in `[0, 1]`.
    fn safe_score(&self, text: &str) -> Result<f64, ProviderError>;
}

/// Turns text into a fixed-size vector.
pub trait EmbeddingBackend: Send + Sync {
    /// Embeds one text.
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Length of the vectors `embed` returns.
    fn dimension(&self) -> usize;
}

/// Cosine similarity of two vectors. `0.0` when lengths differ or either
/// vector is zero.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a * norm_b)
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// PrototypeSet
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PrototypeFile {
    #[serde(default)]
    dimension: Option<usize>,
    safe: Vec<f32>,
    #[serde(default)]
    categories: BTreeMap<String, Vec<f32>>,
}

/// Precomputed prototype vectors: one per category plus one for safe code.
#[derive(Debug, Clone, PartialEq)]
pub struct PrototypeSet {
    dimension: usize,
    safe: Vec<f32>,
    categories: BTreeMap<PatternCategory, Vec<f32>>,
}

impl PrototypeSet {
    /// Parses a prototype JSON document.
    ///
    /// Unrecognised category labels and vectors of the wrong length are
    /// skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Parse`] for malformed JSON and
    /// [`ProviderError::DimensionMismatch`] if `safe` disagrees with the
    /// declared `dimension`.
    pub fn from_json_str(json: &str) -> Result<Self, ProviderError> {
        let file: PrototypeFile = serde_json::from_str(json)?;
        let dimension = file.dimension.unwrap_or(file.safe.len());
        if file.safe.len() != dimension {
            return Err(ProviderError::DimensionMismatch {
                expected: dimension,
                actual: file.safe.len(),
            });
        }

        let mut categories = BTreeMap::new();
        for (label, vector) in file.categories {
            let Some(category) = PatternCategory::from_label(&label) else {
                warn!(label = %label, "unknown prototype category; skipping");
                continue;
            };
            if vector.len() != dimension {
                warn!(
                    label = %label,
                    expected = dimension,
                    actual = vector.len(),
                    "prototype has wrong dimension; skipping"
                );
                continue;
            }
            categories.insert(category, vector);
        }

        debug!(dimension, categories = categories.len(), "prototype vectors loaded");
        Ok(Self {
            dimension,
            safe: file.safe,
            categories,
        })
    }

    /// Reads and parses a prototype JSON file.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Io`] if the file cannot be read, otherwise as
    /// [`PrototypeSet::from_json_str`].
    pub fn from_json_file(path: &Path) -> Result<Self, ProviderError> {
        let json = std::fs::read_to_string(path).map_err(|source| ProviderError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Vector length shared by every prototype.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Prototype for `category`, if one was loaded.
    #[must_use]
    pub fn category(&self, category: PatternCategory) -> Option<&[f32]> {
        self.categories.get(&category).map(Vec::as_slice)
    }

    /// The safe-code prototype.
    #[must_use]
    pub fn safe(&self) -> &[f32] {
        &self.safe
    }
}

// ---------------------------------------------------------------------------
// PrototypeSimilarity
// ---------------------------------------------------------------------------

/// [`SimilarityProvider`] comparing embeddings against a [`PrototypeSet`].
///
/// The scorer asks for a category score and then the safe score of the same
/// line, so the most recent embedding is memoized.
pub struct PrototypeSimilarity<B> {
    backend: B,
    prototypes: PrototypeSet,
    last: Mutex<Option<(String, Vec<f32>)>>,
}

impl<B: EmbeddingBackend> PrototypeSimilarity<B> {
    /// Pairs a backend with prototypes.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::DimensionMismatch`] if the backend's
    /// dimension differs from the prototypes'.
    pub fn new(backend: B, prototypes: PrototypeSet) -> Result<Self, ProviderError> {
        if backend.dimension() != prototypes.dimension() {
            return Err(ProviderError::DimensionMismatch {
                expected: prototypes.dimension(),
                actual: backend.dimension(),
            });
        }
        Ok(Self {
            backend,
            prototypes,
            last: Mutex::new(None),
        })
    }

    fn embedding(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let cached = self
            .last
            .lock()
            .as_ref()
            .filter(|(cached_text, _)| cached_text == text)
            .map(|(_, vector)| vector.clone());
        if let Some(vector) = cached {
            return Ok(vector);
        }
        // Not held across `embed`.
        let vector = self.backend.embed(text)?;
        if vector.len() != self.prototypes.dimension() {
            return Err(ProviderError::DimensionMismatch {
                expected: self.prototypes.dimension(),
                actual: vector.len(),
            });
        }
        *self.last.lock() = Some((text.to_string(), vector.clone()));
        Ok(vector)
    }
}

impl<B: EmbeddingBackend> SimilarityProvider for PrototypeSimilarity<B> {
    fn category_score(&self, text: &str, category: PatternCategory) -> Result<f64, ProviderError> {
        let prototype = self
            .prototypes
            .category(category)
            .ok_or(ProviderError::MissingPrototype(category))?;
        let embedding = self.embedding(text)?;
        Ok(f64::from(cosine_similarity(&embedding, prototype)).clamp(0.0, 1.0))
    }

    fn safe_score(&self, text: &str) -> Result<f64, ProviderError> {
        let embedding = self.embedding(text)?;
        Ok(f64::from(cosine_similarity(&embedding, self.prototypes.safe())).clamp(0.0, 1.0))
    }
}

impl<B> std::fmt::Debug for PrototypeSimilarity<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrototypeSimilarity")
            .field("dimension", &self.prototypes.dimension())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PROTOTYPES: &str = r#"{
        "dimension": 3,
        "safe": [0.0, 1.0, 0.0],
        "categories": {
            "SQL_INJECTION": [1.0, 0.0, 0.0],
            "xss": [0.0, 0.0, 1.0],
            "not a category": [1.0, 1.0, 1.0],
            "command_injection": [1.0, 0.0]
        }
    }"#;

    /// Maps keywords onto axes: `sql` -> x, `safe` -> y, `html` -> z.
    struct KeywordBackend {
        calls: AtomicUsize,
    }

    impl EmbeddingBackend for KeywordBackend {
        fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text.is_empty() {
                return Err(ProviderError::Embedding("empty input".to_string()));
            }
            let axis = |k: &str| if text.contains(k) { 1.0 } else { 0.0 };
            Ok(vec![axis("sql"), axis("safe"), axis("html")])
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    fn provider() -> PrototypeSimilarity<KeywordBackend> {
        PrototypeSimilarity::new(
            KeywordBackend {
                calls: AtomicUsize::new(0),
            },
            PrototypeSet::from_json_str(PROTOTYPES).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn prototype_labels_are_normalized_and_filtered() {
        let set = PrototypeSet::from_json_str(PROTOTYPES).unwrap();
        assert!(set.category(PatternCategory::SqlInjection).is_some());
        assert!(set.category(PatternCategory::CrossSiteScripting).is_some());
        assert!(
            set.category(PatternCategory::CommandInjection).is_none(),
            "wrong dimension is skipped"
        );
        assert_eq!(set.dimension(), 3);
    }

    #[test]
    fn safe_vector_must_match_dimension() {
        let json = r#"{ "dimension": 4, "safe": [0.0, 1.0] }"#;
        assert!(matches!(
            PrototypeSet::from_json_str(json),
            Err(ProviderError::DimensionMismatch { expected: 4, actual: 2 })
        ));
        assert!(matches!(
            PrototypeSet::from_json_str("{ not json"),
            Err(ProviderError::Parse(_))
        ));
    }

    #[test]
    fn scores_follow_similarity() {
        let p = provider();
        let sql = p.category_score("raw sql here", PatternCategory::SqlInjection).unwrap();
        assert!((sql - 1.0).abs() < 1e-6);
        assert!(p.safe_score("raw sql here").unwrap().abs() < 1e-6);
        assert!((p.safe_score("a safe call").unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn embedding_is_memoized_per_text() {
        let p = provider();
        p.category_score("sql", PatternCategory::SqlInjection).unwrap();
        p.safe_score("sql").unwrap();
        assert_eq!(p.backend.calls.load(Ordering::SeqCst), 1);
        p.safe_score("html").unwrap();
        assert_eq!(p.backend.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_embeddings_do_not_wait_on_each_other() {
        use std::sync::{Arc, Barrier};
        use std::time::Duration;

        struct SlowBackend {
            in_flight: AtomicUsize,
            peak: AtomicUsize,
        }

        impl EmbeddingBackend for SlowBackend {
            fn embed(&self, _: &str) -> Result<Vec<f32>, ProviderError> {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(vec![0.0, 1.0, 0.0])
            }

            fn dimension(&self) -> usize {
                3
            }
        }

        let provider = Arc::new(
            PrototypeSimilarity::new(
                SlowBackend {
                    in_flight: AtomicUsize::new(0),
                    peak: AtomicUsize::new(0),
                },
                PrototypeSet::from_json_str(PROTOTYPES).unwrap(),
            )
            .unwrap(),
        );
        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let provider = Arc::clone(&provider);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    provider.safe_score(&format!("line {i}")).unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert!((handle.join().unwrap() - 1.0).abs() < 1e-6);
        }
        assert!(provider.backend.peak.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn failures_surface_as_errors() {
        let p = provider();
        assert!(matches!(
            p.category_score("x", PatternCategory::PathTraversal),
            Err(ProviderError::MissingPrototype(PatternCategory::PathTraversal))
        ));
        assert!(matches!(p.safe_score(""), Err(ProviderError::Embedding(_))));
    }

    #[test]
    fn backend_dimension_is_checked() {
        struct Tiny;
        impl EmbeddingBackend for Tiny {
            fn embed(&self, _: &str) -> Result<Vec<f32>, ProviderError> {
                Ok(vec![1.0])
            }
            fn dimension(&self) -> usize {
                1
            }
        }
        let set = PrototypeSet::from_json_str(PROTOTYPES).unwrap();
        assert!(PrototypeSimilarity::new(Tiny, set).is_err());
    }

    #[test]
    fn loads_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("prototypes.json");
        std::fs::write(&path, PROTOTYPES).unwrap();
        let set = PrototypeSet::from_json_file(&path).unwrap();
        assert_eq!(set.safe(), &[0.0, 1.0, 0.0]);
        assert!(matches!(
            PrototypeSet::from_json_file(&tmp.path().join("missing.json")),
            Err(ProviderError::Io { .. })
        ));
    }
}
