//! Argus Lang -- language tags and lexical syntax tables.
//!
//! This crate provides:
//!
//! - [`Language`] -- the canonical enum of languages the detector has pattern tables for.
//! - [`LexicalSyntax`] -- per-language comment markers, quotes and interpolation style.
//! - [`mask_literals`] -- blanks out string literal contents on a single line.
//!
//! # Architecture
//!
//! [`Language`] lives here (rather than in `argus-rules`) so the catalog and
//! the analysis passes can both reference it without a dependency cycle.

pub mod error;
pub mod language;
pub mod syntax;

// Re-exports for convenience.
pub use error::{LangError, LangResult};
pub use language::Language;
pub use syntax::{mask_literals, Interpolation, LexicalSyntax, MaskedLine};
