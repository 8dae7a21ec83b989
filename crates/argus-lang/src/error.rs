//! Error types for the argus-lang crate.

/// Errors that can occur while resolving a language tag.
#[derive(Debug, thiserror::Error)]
pub enum LangError {
    /// The tag is empty or only whitespace.
    #[error("language tag must not be empty")]
    EmptyTag,

    /// No language is registered for the requested tag.
    #[error("unsupported language: {language}")]
    UnsupportedLanguage {
        /// The tag that was not recognized.
        language: String,
    },
}

/// Convenience alias for `Result<T, LangError>`.
pub type LangResult<T> = Result<T, LangError>;
