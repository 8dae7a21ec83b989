//! Supported programming languages for the Argus detector.
//!
//! This module defines the [`Language`] enum and the tag parsing used at the
//! analysis entry point. It lives in `argus-lang` so that both the pattern
//! catalog and the analysis passes can reference it without a dependency
//! cycle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LangError, LangResult};

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// Programming languages the detector has pattern tables for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Python (`.py`, `.pyi`).
    Python,
    /// JavaScript (`.js`, `.jsx`, `.mjs`, `.cjs`).
    JavaScript,
    /// TypeScript (`.ts`, `.tsx`). Analysed with the JavaScript tables.
    TypeScript,
}

impl Language {
    /// Returns the file extensions associated with this language.
    ///
    /// Extensions include the leading dot (e.g. `".py"`).
    #[must_use]
    pub const fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Python => &[".py", ".pyi"],
            Self::JavaScript => &[".js", ".jsx", ".mjs", ".cjs"],
            Self::TypeScript => &[".ts", ".tsx"],
        }
    }

    /// Returns all supported language variants.
    #[must_use]
    pub const fn all() -> &'static [Language] {
        &[Self::Python, Self::JavaScript, Self::TypeScript]
    }

    /// Canonical lowercase tag, echoed back in analysis results.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
        }
    }

    /// The language whose pattern tables are used for this language.
    ///
    /// TypeScript shares the JavaScript catalog: the sources, sinks and
    /// sanitizers the detector looks for are identical at the line level.
    #[must_use]
    pub const fn catalog_language(self) -> Language {
        match self {
            Self::TypeScript => Self::JavaScript,
            other => other,
        }
    }

    /// Attempts to determine the language from a file extension (including the dot).
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            ".py" | ".pyi" => Some(Self::Python),
            ".js" | ".jsx" | ".mjs" | ".cjs" => Some(Self::JavaScript),
            ".ts" | ".tsx" => Some(Self::TypeScript),
            _ => None,
        }
    }

    /// Resolves a caller-supplied language tag.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace. Both
    /// names (`python`, `javascript`) and short forms (`py`, `js`, `node`)
    /// are accepted, as is a dotted file extension (`.ts`).
    ///
    /// # Errors
    ///
    /// Returns [`LangError::EmptyTag`] for a blank tag and
    /// [`LangError::UnsupportedLanguage`] for anything unrecognized.
    pub fn from_tag(tag: &str) -> LangResult<Self> {
        let normalized = tag.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(LangError::EmptyTag);
        }
        if normalized.starts_with('.') {
            return Self::from_extension(&normalized).ok_or(LangError::UnsupportedLanguage {
                language: tag.trim().to_string(),
            });
        }
        match normalized.as_str() {
            "python" | "py" | "python3" => Ok(Self::Python),
            "javascript" | "js" | "jsx" | "node" | "nodejs" | "ecmascript" => Ok(Self::JavaScript),
            "typescript" | "ts" | "tsx" => Ok(Self::TypeScript),
            _ => Err(LangError::UnsupportedLanguage {
                language: tag.trim().to_string(),
            }),
        }
    }
}

impl FromStr for Language {
    type Err = LangError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Python => "Python",
            Self::JavaScript => "JavaScript",
            Self::TypeScript => "TypeScript",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_tag_accepts_names_and_short_forms() {
        assert_eq!(Language::from_tag("python").unwrap(), Language::Python);
        assert_eq!(Language::from_tag("PY").unwrap(), Language::Python);
        assert_eq!(Language::from_tag(" js ").unwrap(), Language::JavaScript);
        assert_eq!(Language::from_tag("JavaScript").unwrap(), Language::JavaScript);
        assert_eq!(Language::from_tag("node").unwrap(), Language::JavaScript);
        assert_eq!(Language::from_tag("tsx").unwrap(), Language::TypeScript);
    }

    #[test]
    fn from_tag_accepts_dotted_extensions() {
        assert_eq!(Language::from_tag(".pyi").unwrap(), Language::Python);
        assert_eq!(Language::from_tag(".MJS").unwrap(), Language::JavaScript);
        assert!(Language::from_tag(".rs").is_err());
    }

    #[test]
    fn from_tag_rejects_unknown_and_empty() {
        match Language::from_tag("cobol") {
            Err(LangError::UnsupportedLanguage { language }) => assert_eq!(language, "cobol"),
            other => panic!("expected UnsupportedLanguage, got {other:?}"),
        }
        assert!(matches!(Language::from_tag("   "), Err(LangError::EmptyTag)));
    }

    #[test]
    fn typescript_uses_javascript_catalog() {
        assert_eq!(Language::TypeScript.catalog_language(), Language::JavaScript);
        assert_eq!(Language::Python.catalog_language(), Language::Python);
        assert_eq!(Language::JavaScript.catalog_language(), Language::JavaScript);
    }

    #[test]
    fn language_serde_uses_lowercase_tags() {
        let json = serde_json::to_string(&Language::JavaScript).unwrap();
        assert_eq!(json, "\"javascript\"");
        let back: Language = serde_json::from_str("\"python\"").unwrap();
        assert_eq!(back, Language::Python);
    }

    #[test]
    fn all_languages_round_trip_through_tags_and_extensions() {
        for lang in Language::all() {
            assert_eq!(Language::from_tag(lang.tag()).unwrap(), *lang);
            let ext = lang.extensions()[0];
            assert_eq!(Language::from_extension(ext), Some(*lang));
        }
    }
}
