//! Lexical preprocessing: split code into analysable lines.
//!
//! Keeps every non-blank, non-comment line together with its original
//! 1-based line number. Whole-line comments, block comments that occupy
//! whole lines (`/* ... */`) and standalone Python docstrings are dropped.
//! Each kept line carries a [`MaskedLine`] so later passes can tell code
//! from string literal contents without re-lexing.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use argus_lang::{mask_literals, Language, LexicalSyntax, MaskedLine};

/// `name = ...`, `let|const|var name = ...` and annotated `name: T = ...`.
/// The caller rejects `==` and `=>` by looking at the next character.
static ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:(?:let|const|var)\s+)?([A-Za-z_$][\w$]*)\s*(?::[^=]*)?=")
        .expect("assignment regex is valid")
});

/// Words the assignment regex can capture that are never assignment targets
/// (`else: x = 1`, `case 1: y = 2`).
const NON_TARGETS: &[&str] = &[
    "if", "elif", "else", "while", "for", "try", "except", "finally", "with", "case", "default",
    "return", "lambda",
];

// ---------------------------------------------------------------------------
// CodeLine
// ---------------------------------------------------------------------------

/// One kept source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLine {
    /// 1-based line number in the original input.
    pub line_number: u32,
    /// The line as written, without the line terminator.
    pub text: String,
    /// The line with string literal bodies and trailing comments blanked.
    pub masked: MaskedLine,
}

/// A simple `target = rhs` assignment found on a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment<'a> {
    /// The assigned identifier.
    pub target: &'a str,
    /// Right-hand side, taken from the masked text.
    pub rhs: &'a str,
}

impl CodeLine {
    /// Builds a line, masking its literals with `syntax`.
    #[must_use]
    pub fn new(line_number: u32, text: impl Into<String>, syntax: &LexicalSyntax) -> Self {
        let text = text.into();
        let masked = mask_literals(&text, syntax);
        Self {
            line_number,
            text,
            masked,
        }
    }

    /// Builds a line that starts inside a multi-line literal closed by
    /// `close`. Text up to the closer is literal body, the rest is masked
    /// as ordinary code.
    #[must_use]
    pub fn continuing(
        line_number: u32,
        text: impl Into<String>,
        syntax: &LexicalSyntax,
        close: &'static str,
    ) -> Self {
        let text = text.into();
        let masked = match text.find(close) {
            None => MaskedLine {
                text: " ".repeat(text.chars().count()),
                literal_count: 1,
                has_interpolation: false,
                literals: vec![text.clone()],
                open_delimiter: Some(close),
            },
            Some(pos) => {
                let body = &text[..pos];
                let rest = mask_literals(&text[pos + close.len()..], syntax);
                let mut masked_text = " ".repeat(body.chars().count());
                masked_text.push_str(close);
                masked_text.push_str(&rest.text);
                let mut literals = vec![body.to_string()];
                literals.extend(rest.literals);
                MaskedLine {
                    text: masked_text,
                    literal_count: 1 + rest.literal_count,
                    has_interpolation: rest.has_interpolation,
                    literals,
                    open_delimiter: rest.open_delimiter,
                }
            }
        };
        Self {
            line_number,
            text,
            masked,
        }
    }

    /// Length of the line without surrounding whitespace, in characters.
    #[must_use]
    pub fn trimmed_len(&self) -> usize {
        self.text.trim().chars().count()
    }

    /// Returns the assignment on this line, if the line starts with one.
    ///
    /// Matching runs on the masked text, so an `=` inside a literal never
    /// counts. Comparisons (`==`, `===`) and arrows (`=>`) are rejected.
    #[must_use]
    pub fn assignment(&self) -> Option<Assignment<'_>> {
        let masked = self.masked.text.as_str();
        let caps = ASSIGNMENT.captures(masked)?;
        let whole = caps.get(0)?;
        let target = caps.get(1)?.as_str();
        let rhs = &masked[whole.end()..];
        if rhs.starts_with('=') || rhs.starts_with('>') || NON_TARGETS.contains(&target) {
            return None;
        }
        Some(Assignment { target, rhs })
    }

    /// Returns `true` if the line, minus an optional `name =` prefix, is made
    /// only of string literals: at least one literal, no interpolation and
    /// no identifier outside the literals.
    #[must_use]
    pub fn is_literal_only(&self) -> bool {
        if self.masked.literal_count == 0 || self.masked.has_interpolation {
            return false;
        }
        let rest = self
            .assignment()
            .map_or(self.masked.text.as_str(), |a| a.rhs);
        !has_identifier_outside_literals(rest)
    }
}

/// Scans masked text for an identifier. A run of at most two letters directly
/// before a quote is a string prefix (`r"..."`, `b'...'`) and does not count.
fn has_identifier_outside_literals(masked: &str) -> bool {
    let chars: Vec<char> = masked.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                i += 1;
            }
            let is_prefix = i - start <= 2
                && chars[start..i].iter().all(char::is_ascii_alphabetic)
                && matches!(chars.get(i), Some('"' | '\'' | '`'));
            if !is_prefix {
                return true;
            }
            continue;
        }
        i += 1;
    }
    false
}

// ---------------------------------------------------------------------------
// preprocess
// ---------------------------------------------------------------------------

/// Multi-line construct the scan is inside of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Open {
    /// Block comment or statement-level docstring; its lines are dropped.
    Comment { close: &'static str, from: usize },
    /// String or template literal that started in code; its lines are kept.
    Literal { close: &'static str },
}

/// Splits `code` into [`CodeLine`]s for `language`.
///
/// CRLF line endings are accepted. Line numbers refer to the original input
/// and start at 1. Lines inside a multi-line string literal are kept with
/// their contents masked. A block comment or docstring still open at end of
/// input is not a comment, so its lines are kept as well.
#[must_use]
pub fn preprocess(code: &str, language: Language) -> Vec<CodeLine> {
    let syntax = language.syntax();
    let raw_lines: Vec<&str> = code.lines().collect();
    let mut lines = Vec::new();
    let mut open: Option<Open> = None;

    for (idx, raw) in raw_lines.iter().enumerate() {
        let line_number = u32::try_from(idx + 1).unwrap_or(u32::MAX);
        let trimmed = raw.trim();

        match open {
            Some(Open::Comment { close, .. }) => {
                let Some(pos) = trimmed.find(close) else {
                    continue;
                };
                open = None;
                if trimmed[pos + close.len()..].trim().is_empty() {
                    continue;
                }
                let line = CodeLine::new(line_number, *raw, syntax);
                open = line.masked.open_delimiter.map(|close| Open::Literal { close });
                lines.push(line);
            }
            Some(Open::Literal { close }) => {
                if trimmed.is_empty() {
                    continue;
                }
                let line = CodeLine::continuing(line_number, *raw, syntax, close);
                open = line.masked.open_delimiter.map(|close| Open::Literal { close });
                lines.push(line);
            }
            None => {
                if trimmed.is_empty() || syntax.is_line_comment(trimmed) {
                    continue;
                }
                if let Some(close) = opens_block(trimmed, syntax) {
                    open = Some(Open::Comment { close, from: idx });
                    continue;
                }
                if is_whole_line_block(trimmed, syntax) {
                    continue;
                }
                let line = CodeLine::new(line_number, *raw, syntax);
                open = line.masked.open_delimiter.map(|close| Open::Literal { close });
                lines.push(line);
            }
        }
    }

    if let Some(Open::Comment { from, .. }) = open {
        debug!(%language, line = from + 1, "unterminated block at end of input; keeping its lines");
        for (idx, raw) in raw_lines.iter().enumerate().skip(from) {
            if raw.trim().is_empty() {
                continue;
            }
            let line_number = u32::try_from(idx + 1).unwrap_or(u32::MAX);
            lines.push(CodeLine::new(line_number, *raw, syntax));
        }
    }

    debug!(%language, total = raw_lines.len(), kept = lines.len(), "preprocessed code");
    lines
}

/// Opening delimiters that can start a comment-like block on their own line,
/// with the matching closer.
fn block_delimiters(syntax: &LexicalSyntax) -> impl Iterator<Item = (&'static str, &'static str)> {
    let docstrings: &'static [&'static str] = syntax.docstring_quotes;
    syntax
        .block_comment
        .into_iter()
        .chain(docstrings.iter().map(|q| (*q, *q)))
}

/// If `trimmed` opens a block that does not close on the same line, returns
/// the closing delimiter.
fn opens_block(trimmed: &str, syntax: &LexicalSyntax) -> Option<&'static str> {
    block_delimiters(syntax).find_map(|(open, close)| {
        let after = trimmed.strip_prefix(open)?;
        (!after.contains(close)).then_some(close)
    })
}

/// Returns `true` if `trimmed` is a block comment or docstring that opens and
/// closes on this line with nothing after it.
fn is_whole_line_block(trimmed: &str, syntax: &LexicalSyntax) -> bool {
    block_delimiters(syntax).any(|(open, close)| {
        trimmed
            .strip_prefix(open)
            .and_then(|after| after.find(close).map(|pos| &after[pos + close.len()..]))
            .is_some_and(|rest| rest.trim().is_empty())
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
