//! Per-category scoring tiers.
//!
//! A category's pattern score is decided by an ordered list of tiers. Each
//! tier names a score and a condition over the category's signals; the first
//! tier whose condition holds wins, and a line matching no tier scores `0.0`.
//!
//! ```yaml
//! sql_injection:
//!   signals:
//!     sql_ops: { regex: '\bselect\b.*\bfrom\b' }
//!     concat:  { regex: '[+]\s*["'']' }
//!     safe:    { regex: 'bindparams' }
//!   tiers:
//!     - score: 0.88
//!       all: [sql_ops, concat]
//!       none: [safe]
//! ```
//!
//! Conditions are a closed set of combinators. There is deliberately no
//! expression language: the YAML only selects which signals take part.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{PatternCategory, RuleError};

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Heuristics that are too structural for a single regex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinSignal {
    /// A literal assigned on the line starts with a known credential prefix
    /// (`AKIA`, `ghp_`, `sk_live_`, ...).
    KnownSecretPrefix,
    /// A secret-sounding name is assigned a long, high-entropy literal.
    ContextualSecret,
    /// A secret-sounding name is assigned any non-trivial literal.
    SuspiciousAssignment,
}

/// A compiled signal.
#[derive(Debug, Clone)]
pub enum Signal {
    /// Fires when the regex matches the line.
    Regex(Regex),
    /// Fires when the built-in heuristic holds for the line.
    Builtin(BuiltinSignal),
}

/// YAML form of a signal: `{ regex: '...' }` or `{ builtin: name }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum SignalSpec {
    /// A case-insensitive regular expression.
    Regex(String),
    /// A built-in heuristic.
    Builtin(BuiltinSignal),
}

// ---------------------------------------------------------------------------
// Condition / Tier
// ---------------------------------------------------------------------------

/// Combination of signals, by index into the category's signal list.
///
/// Holds when every `all` signal fires, at least one `any` signal fires
/// (if `any` is non-empty), and no `none` signal fires.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Condition {
    /// Signals that must all fire.
    pub all: Vec<usize>,
    /// Signals of which at least one must fire.
    pub any: Vec<usize>,
    /// Signals that must not fire.
    pub none: Vec<usize>,
}

impl Condition {
    /// Evaluates the condition. `fires` is called lazily, at most once per
    /// signal index per call.
    pub fn holds(&self, fires: &mut impl FnMut(usize) -> bool) -> bool {
        self.all.iter().all(|&i| fires(i))
            && (self.any.is_empty() || self.any.iter().any(|&i| fires(i)))
            && !self.none.iter().any(|&i| fires(i))
    }
}

/// One scoring rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Tier {
    /// Pattern score assigned when the condition holds.
    pub score: f64,
    /// When the tier applies.
    pub condition: Condition,
}

/// YAML form of a tier.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierSpec {
    /// Score in `[0, 1]`.
    pub score: f64,
    /// Signal names that must all fire.
    #[serde(default)]
    pub all: Vec<String>,
    /// Signal names of which one must fire.
    #[serde(default)]
    pub any: Vec<String>,
    /// Signal names that must not fire.
    #[serde(default)]
    pub none: Vec<String>,
}

/// YAML form of a category's scoring block.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryScoringSpec {
    /// Named signals.
    #[serde(default)]
    pub signals: BTreeMap<String, SignalSpec>,
    /// Ordered tiers; the first match wins.
    #[serde(default)]
    pub tiers: Vec<TierSpec>,
}

// ---------------------------------------------------------------------------
// CategoryScoring
// ---------------------------------------------------------------------------

/// Compiled scoring rules for one category.
#[derive(Debug, Clone)]
pub struct CategoryScoring {
    /// Signal names, parallel to `signals`.
    pub names: Vec<String>,
    /// Compiled signals.
    pub signals: Vec<Signal>,
    /// Ordered tiers.
    pub tiers: Vec<Tier>,
}

impl CategoryScoring {
    /// Compiles a scoring block, resolving signal names to indices.
    ///
    /// `compile` turns a pattern into a regex; it is supplied by the catalog
    /// so every pattern in a catalog shares one set of regex options.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::UnknownSignal`], [`RuleError::EmptyCondition`] or
    /// [`RuleError::ScoreOutOfRange`] for malformed tiers, and whatever
    /// `compile` returns for a bad pattern.
    pub fn compile(
        category: PatternCategory,
        spec: CategoryScoringSpec,
        compile: &impl Fn(&str) -> Result<Regex, RuleError>,
    ) -> Result<Self, RuleError> {
        let mut names = Vec::with_capacity(spec.signals.len());
        let mut signals = Vec::with_capacity(spec.signals.len());
        for (name, signal) in spec.signals {
            let compiled = match signal {
                SignalSpec::Regex(pattern) => Signal::Regex(compile(&pattern)?),
                SignalSpec::Builtin(builtin) => Signal::Builtin(builtin),
            };
            names.push(name);
            signals.push(compiled);
        }

        let resolve = |tier: usize, list: &[String]| -> Result<Vec<usize>, RuleError> {
            list.iter()
                .map(|signal| {
                    names
                        .iter()
                        .position(|n| n == signal)
                        .ok_or_else(|| RuleError::UnknownSignal {
                            category,
                            tier,
                            signal: signal.clone(),
                        })
                })
                .collect()
        };

        let mut tiers = Vec::with_capacity(spec.tiers.len());
        for (idx, tier) in spec.tiers.into_iter().enumerate() {
            if !(0.0..=1.0).contains(&tier.score) {
                return Err(RuleError::ScoreOutOfRange {
                    category,
                    tier: idx,
                    score: tier.score,
                });
            }
            if tier.all.is_empty() && tier.any.is_empty() {
                return Err(RuleError::EmptyCondition { category, tier: idx });
            }
            tiers.push(Tier {
                score: tier.score,
                condition: Condition {
                    all: resolve(idx, &tier.all)?,
                    any: resolve(idx, &tier.any)?,
                    none: resolve(idx, &tier.none)?,
                },
            });
        }

        Ok(Self {
            names,
            signals,
            tiers,
        })
    }

    /// Returns the score of the first tier whose condition holds, capped at
    /// `1.0`, or `0.0` if none does.
    ///
    /// `evaluate` decides whether a single signal fires; results are memoized
    /// so each signal is evaluated at most once.
    pub fn pattern_score(&self, mut evaluate: impl FnMut(&Signal) -> bool) -> f64 {
        let mut memo: Vec<Option<bool>> = vec![None; self.signals.len()];
        let mut fires = |i: usize| -> bool {
            if let Some(known) = memo[i] {
                return known;
            }
            let fired = evaluate(&self.signals[i]);
            memo[i] = Some(fired);
            fired
        };
        self.tiers
            .iter()
            .find(|tier| tier.condition.holds(&mut fires))
            .map_or(0.0, |tier| tier.score.min(1.0))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_regex(p: &str) -> Result<Regex, RuleError> {
        regex::RegexBuilder::new(p)
            .case_insensitive(true)
            .build()
            .map_err(|source| RuleError::InvalidPattern {
                origin: "test".to_string(),
                pattern: p.to_string(),
                source,
            })
    }

    fn sql_spec() -> CategoryScoringSpec {
        serde_yml::from_str(
            r#"
signals:
  sql_ops: { regex: '\bselect\b.*\bfrom\b' }
  concat: { regex: '[+]' }
  safe: { regex: 'bindparams' }
tiers:
  - score: 0.88
    all: [sql_ops, concat]
    none: [safe]
  - score: 0.75
    all: [sql_ops]
    none: [safe]
"#,
        )
        .unwrap()
    }

    fn score_line(scoring: &CategoryScoring, line: &str) -> f64 {
        scoring.pattern_score(|signal| match signal {
            Signal::Regex(re) => re.is_match(line),
            Signal::Builtin(_) => false,
        })
    }

    #[test]
    fn first_matching_tier_wins() {
        let scoring =
            CategoryScoring::compile(PatternCategory::SqlInjection, sql_spec(), &compile_regex)
                .unwrap();
        assert_eq!(score_line(&scoring, "q = 'SELECT a FROM t' + x"), 0.88);
        assert_eq!(score_line(&scoring, "q = 'SELECT a FROM t'"), 0.75);
        assert_eq!(score_line(&scoring, "q = 'SELECT a FROM t' + bindparams(x)"), 0.0);
        assert_eq!(score_line(&scoring, "x = 1 + 2"), 0.0);
    }

    #[test]
    fn any_requires_one_member() {
        let spec: CategoryScoringSpec = serde_yml::from_str(
            r#"
signals:
  a: { regex: 'alpha' }
  b: { regex: 'beta' }
tiers:
  - score: 0.5
    any: [a, b]
"#,
        )
        .unwrap();
        let scoring =
            CategoryScoring::compile(PatternCategory::Other, spec, &compile_regex).unwrap();
        assert_eq!(score_line(&scoring, "beta"), 0.5);
        assert_eq!(score_line(&scoring, "gamma"), 0.0);
    }

    #[test]
    fn unknown_signal_is_rejected() {
        let spec: CategoryScoringSpec = serde_yml::from_str(
            r#"
signals:
  a: { regex: 'alpha' }
tiers:
  - score: 0.5
    all: [a, missing]
"#,
        )
        .unwrap();
        let err = CategoryScoring::compile(PatternCategory::Other, spec, &compile_regex)
            .unwrap_err();
        assert!(
            matches!(err, RuleError::UnknownSignal { ref signal, tier: 0, .. } if signal == "missing"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn empty_condition_and_bad_score_are_rejected() {
        let spec: CategoryScoringSpec = serde_yml::from_str(
            r#"
signals:
  a: { regex: 'alpha' }
tiers:
  - score: 0.5
    none: [a]
"#,
        )
        .unwrap();
        assert!(matches!(
            CategoryScoring::compile(PatternCategory::Other, spec, &compile_regex),
            Err(RuleError::EmptyCondition { tier: 0, .. })
        ));

        let spec: CategoryScoringSpec = serde_yml::from_str(
            r#"
signals:
  a: { regex: 'alpha' }
tiers:
  - score: 1.5
    all: [a]
"#,
        )
        .unwrap();
        assert!(matches!(
            CategoryScoring::compile(PatternCategory::Other, spec, &compile_regex),
            Err(RuleError::ScoreOutOfRange { .. })
        ));
    }

    #[test]
    fn builtin_signals_parse() {
        let spec: CategoryScoringSpec = serde_yml::from_str(
            r#"
signals:
  prefix: { builtin: known_secret_prefix }
tiers:
  - score: 0.9
    all: [prefix]
"#,
        )
        .unwrap();
        let scoring =
            CategoryScoring::compile(PatternCategory::HardcodedSecret, spec, &compile_regex)
                .unwrap();
        assert!(matches!(
            scoring.signals[0],
            Signal::Builtin(BuiltinSignal::KnownSecretPrefix)
        ));
        let score = scoring.pattern_score(|s| matches!(s, Signal::Builtin(_)));
        assert_eq!(score, 0.9);
    }
}
