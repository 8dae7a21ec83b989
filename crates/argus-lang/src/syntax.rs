//! Lexical syntax tables and string-literal masking.
//!
//! The detector never builds an AST. Everything downstream works on single
//! lines, so the only lexical knowledge it needs is:
//!
//! - which markers start a whole-line comment,
//! - which delimiters open and close block comments or docstrings,
//! - where string literals start and end, and which of them interpolate.
//!
//! [`mask_literals`] uses the last point to blank out literal contents so
//! that identifier checks do not fire on text inside quotes, while keeping
//! interpolated expressions (`f"{x}"`, `` `${x}` ``) visible.

use crate::language::Language;

// ---------------------------------------------------------------------------
// LexicalSyntax
// ---------------------------------------------------------------------------

/// How a language embeds expressions inside string literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    /// Strings carrying one of the given prefix letters interpolate `{expr}`
    /// (Python f-strings).
    PrefixedBraces {
        /// Prefix letters that enable interpolation, e.g. `f`.
        prefixes: &'static [char],
    },
    /// Backtick template literals interpolate `${expr}` (JavaScript).
    TemplateLiteral,
}

/// Per-language lexical facts used by the line-level passes.
#[derive(Debug, Clone, Copy)]
pub struct LexicalSyntax {
    /// Markers that start a comment running to the end of the line.
    pub line_comments: &'static [&'static str],
    /// Block comment delimiters, if the language has them.
    pub block_comment: Option<(&'static str, &'static str)>,
    /// Delimiters of statement-level docstrings that span lines.
    pub docstring_quotes: &'static [&'static str],
    /// Characters that open a string literal.
    pub quotes: &'static [char],
    /// Interpolation style.
    pub interpolation: Interpolation,
}

const PYTHON_SYNTAX: LexicalSyntax = LexicalSyntax {
    line_comments: &["#"],
    block_comment: None,
    docstring_quotes: &["\"\"\"", "'''"],
    quotes: &['"', '\''],
    interpolation: Interpolation::PrefixedBraces {
        prefixes: &['f', 'F'],
    },
};

const JAVASCRIPT_SYNTAX: LexicalSyntax = LexicalSyntax {
    line_comments: &["//"],
    block_comment: Some(("/*", "*/")),
    docstring_quotes: &[],
    quotes: &['"', '\'', '`'],
    interpolation: Interpolation::TemplateLiteral,
};

impl Language {
    /// Returns the lexical syntax table for this language.
    #[must_use]
    pub const fn syntax(self) -> &'static LexicalSyntax {
        match self {
            Self::Python => &PYTHON_SYNTAX,
            Self::JavaScript | Self::TypeScript => &JAVASCRIPT_SYNTAX,
        }
    }
}

impl LexicalSyntax {
    /// Returns `true` if `text`, once trimmed, starts with a line-comment marker.
    #[must_use]
    pub fn is_line_comment(&self, text: &str) -> bool {
        let trimmed = text.trim_start();
        self.line_comments.iter().any(|m| trimmed.starts_with(m))
    }
}

// ---------------------------------------------------------------------------
// Literal masking
// ---------------------------------------------------------------------------

/// A line with its string-literal contents blanked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedLine {
    /// The masked text. Same number of characters as the input; literal
    /// bodies and trailing comments are replaced with spaces, quotes and
    /// interpolated expressions are kept.
    pub text: String,
    /// Number of string literals opened on the line.
    pub literal_count: usize,
    /// Whether any literal on the line interpolates an expression.
    pub has_interpolation: bool,
    /// Contents of each literal, without quotes or interpolated expressions.
    pub literals: Vec<String>,
    /// Closing delimiter of a multi-line literal (triple-quoted string or
    /// template literal) still open at end of line.
    pub open_delimiter: Option<&'static str>,
}

impl MaskedLine {
    /// Returns `true` if an identifier-like token survives masking.
    ///
    /// Interpolated expressions count, literal contents do not.
    #[must_use]
    pub fn has_code_identifier(&self) -> bool {
        self.text
            .chars()
            .any(|c| c.is_alphabetic() || c == '_' || c == '$')
    }
}

#[derive(Debug, Clone, Copy)]
enum State {
    Code,
    Literal {
        quote: char,
        triple: bool,
        interpolating: bool,
    },
    Interp {
        depth: u32,
        resume_quote: char,
        resume_triple: bool,
    },
}

/// Masks string literal contents on one line.
///
/// Literals left open at end of line (multi-line strings) are masked to the
/// end of the line. Escapes are honoured. Interpolation openers (`{` in
/// f-strings, `${` in template literals) switch back to code until the
/// matching brace.
#[must_use]
pub fn mask_literals(line: &str, syntax: &LexicalSyntax) -> MaskedLine {
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len());
    let mut literal_count = 0usize;
    let mut has_interpolation = false;
    let mut literals: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut state = State::Code;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        match state {
            State::Code | State::Interp { .. } => {
                if let State::Interp {
                    depth,
                    resume_quote,
                    resume_triple,
                } = state
                {
                    if c == '{' {
                        state = State::Interp {
                            depth: depth + 1,
                            resume_quote,
                            resume_triple,
                        };
                    } else if c == '}' {
                        state = if depth <= 1 {
                            State::Literal {
                                quote: resume_quote,
                                triple: resume_triple,
                                interpolating: true,
                            }
                        } else {
                            State::Interp {
                                depth: depth - 1,
                                resume_quote,
                                resume_triple,
                            }
                        };
                    }
                    out.push(c);
                    i += 1;
                    continue;
                }

                if starts_with_at(&chars, i, syntax.line_comments) {
                    out.extend(std::iter::repeat(' ').take(chars.len() - i));
                    break;
                }

                if syntax.quotes.contains(&c) {
                    let triple = i + 2 < chars.len() && chars[i + 1] == c && chars[i + 2] == c;
                    let interpolating = opens_interpolating(&chars, i, c, syntax);
                    literal_count += 1;
                    if triple {
                        out.extend([c, c, c]);
                        i += 3;
                    } else {
                        out.push(c);
                        i += 1;
                    }
                    state = State::Literal {
                        quote: c,
                        triple,
                        interpolating,
                    };
                    continue;
                }

                out.push(c);
                i += 1;
            }
            State::Literal {
                quote,
                triple,
                interpolating,
            } => {
                if c == '\\' {
                    out.push(' ');
                    if let Some(&escaped) = chars.get(i + 1) {
                        out.push(' ');
                        current.push(escaped);
                    }
                    i += 2;
                    continue;
                }
                if c == quote {
                    if !triple {
                        out.push(c);
                        i += 1;
                        literals.push(std::mem::take(&mut current));
                        state = State::Code;
                        continue;
                    }
                    if i + 2 < chars.len() && chars[i + 1] == c && chars[i + 2] == c {
                        out.extend([c, c, c]);
                        i += 3;
                        literals.push(std::mem::take(&mut current));
                        state = State::Code;
                        continue;
                    }
                }
                if interpolating {
                    let opener = match syntax.interpolation {
                        Interpolation::PrefixedBraces { .. } => {
                            if c == '{' && chars.get(i + 1) == Some(&'{') {
                                // Escaped brace.
                                out.push_str("  ");
                                i += 2;
                                continue;
                            }
                            (c == '{').then_some(1usize)
                        }
                        Interpolation::TemplateLiteral => {
                            (c == '$' && chars.get(i + 1) == Some(&'{')).then_some(2usize)
                        }
                    };
                    if let Some(width) = opener {
                        has_interpolation = true;
                        out.extend(chars[i..i + width].iter());
                        i += width;
                        state = State::Interp {
                            depth: 1,
                            resume_quote: quote,
                            resume_triple: triple,
                        };
                        continue;
                    }
                }
                out.push(' ');
                current.push(c);
                i += 1;
            }
        }
    }

    let open_delimiter = match state {
        State::Code => None,
        State::Literal { quote, triple, .. }
        | State::Interp {
            resume_quote: quote,
            resume_triple: triple,
            ..
        } => {
            literals.push(current);
            multiline_closer(quote, triple)
        }
    };

    MaskedLine {
        text: out,
        literal_count,
        has_interpolation,
        literals,
        open_delimiter,
    }
}

/// Literals that may legally run past the end of a line, by closer.
fn multiline_closer(quote: char, triple: bool) -> Option<&'static str> {
    match (quote, triple) {
        ('"', true) => Some("\"\"\""),
        ('\'', true) => Some("'''"),
        ('`', false) => Some("`"),
        _ => None,
    }
}

fn starts_with_at(chars: &[char], at: usize, markers: &[&str]) -> bool {
    markers.iter().any(|marker| {
        let mut idx = at;
        for m in marker.chars() {
            if chars.get(idx) != Some(&m) {
                return false;
            }
            idx += 1;
        }
        true
    })
}

/// Decides whether the literal opening at `at` interpolates.
fn opens_interpolating(chars: &[char], at: usize, quote: char, syntax: &LexicalSyntax) -> bool {
    match syntax.interpolation {
        Interpolation::TemplateLiteral => quote == '`',
        Interpolation::PrefixedBraces { prefixes } => {
            let mut start = at;
            while start > 0 && chars[start - 1].is_ascii_alphabetic() {
                start -= 1;
            }
            let prefix = &chars[start..at];
            !prefix.is_empty()
                && prefix.len() <= 3
                && prefix.iter().all(|p| "rRbBfFuU".contains(*p))
                && prefix.iter().any(|p| prefixes.contains(p))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
