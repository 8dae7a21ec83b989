//! Coarse variable type inference.
//!
//! A single forward pass over assignments. The inferred type is only used to
//! suppress findings (a variable holding a plain string literal cannot carry
//! taint), so the classification is deliberately shallow.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use argus_rules::LanguageTables;

use crate::preprocess::CodeLine;

/// What an assigned variable most likely holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    /// Value read from a source or input accessor.
    UserInput,
    /// One or more plain string literals, no interpolation.
    StringLiteral,
    /// Result of a sanitizing call.
    Sanitized,
    /// Result of a database read.
    DatabaseResult,
    /// Contents of a file.
    FileContent,
    /// Anything else.
    Unknown,
}

/// Inferred types by variable name. The last assignment wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMap {
    types: BTreeMap<String, VariableType>,
}

impl TypeMap {
    /// Type of `variable`; [`VariableType::Unknown`] if it was never assigned.
    #[must_use]
    pub fn get(&self, variable: &str) -> VariableType {
        self.types
            .get(variable)
            .copied()
            .unwrap_or(VariableType::Unknown)
    }

    /// Returns `true` if `variable` was last assigned a plain string literal.
    #[must_use]
    pub fn is_string_literal(&self, variable: &str) -> bool {
        self.get(variable) == VariableType::StringLiteral
    }

    /// Number of distinct assigned variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` if no assignment was seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Infers a type for every assigned variable in `lines`.
#[must_use]
pub fn infer_types(lines: &[CodeLine], tables: &LanguageTables) -> TypeMap {
    let mut map = TypeMap::default();
    for line in lines {
        let Some(assignment) = line.assignment() else {
            continue;
        };
        let rhs = assignment.rhs;
        let hints = &tables.type_hints;
        let inferred = if tables.mentions_untrusted_input(rhs) {
            VariableType::UserInput
        } else if line.is_literal_only() {
            VariableType::StringLiteral
        } else if hints.sanitized.iter().any(|r| r.is_match(rhs)) {
            VariableType::Sanitized
        } else if hints.database.iter().any(|r| r.is_match(rhs)) {
            VariableType::DatabaseResult
        } else if hints.file.iter().any(|r| r.is_match(rhs)) {
            VariableType::FileContent
        } else {
            VariableType::Unknown
        };
        map.types.insert(assignment.target.to_string(), inferred);
    }
    map
}
