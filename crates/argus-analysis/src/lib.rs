//! Argus Analysis -- line-level detection passes, the finding model and scoring.
//!
//! The passes run in this order for one analysis:
//!
//! 1. [`preprocess`] splits code into [`CodeLine`]s and drops blanks/comments.
//! 2. [`locator`] finds source and sink lines.
//! 3. [`dataflow`] traces aliases from each source to later sinks.
//! 4. [`types`] infers a coarse type for every assigned variable.
//! 5. [`scoring`] fuses catalog tiers, semantic similarity and line context.
//! 6. [`filter`] removes findings on comment and literal-only lines.
//! 7. [`dedup`] keeps one finding per `(line, category)` and ranks them.

pub mod dataflow;
pub mod dedup;
pub mod filter;
pub mod finding;
pub mod locator;
pub mod preprocess;
pub mod scoring;
pub mod secrets;
pub mod semantic;
pub mod types;

pub use dataflow::{DataFlow, DataFlowConfig, DataFlowNode, DataFlowTracer, NodeRole};
pub use dedup::deduplicate;
pub use filter::{is_safe_context, FalsePositiveFilter, FilterConfig};
pub use finding::{
    AnalysisError, AnalysisResult, DetectionMethod, Finding, FindingBuilder, MAX_SNIPPET_CHARS,
};
pub use locator::{locate, Located, SinkHit, SourceHit};
pub use preprocess::{preprocess, CodeLine};
pub use scoring::{
    flow_finding, fuse, passes_inclusion, pattern_finding, LineScore, ScoringConfig,
    ScoringEngine, ScoringOutcome,
};
pub use semantic::{
    cosine_similarity, EmbeddingBackend, PrototypeSet, PrototypeSimilarity, ProviderError,
    SimilarityProvider,
};
pub use types::{infer_types, TypeMap, VariableType};
