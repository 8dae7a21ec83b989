//! Deduplication and ranking.

use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use argus_rules::PatternCategory;

use crate::finding::Finding;

/// Keeps the highest-risk finding per `(line, category)` and ranks the rest.
///
/// On a tie the finding seen first wins, so callers control precedence by
/// input order. The output is sorted by `risk_score` descending, then line,
/// then category.
#[must_use]
pub fn deduplicate(findings: Vec<Finding>) -> Vec<Finding> {
    let mut best: BTreeMap<(u32, PatternCategory), Finding> = BTreeMap::new();
    for finding in findings {
        match best.entry((finding.line, finding.category)) {
            Entry::Vacant(slot) => {
                slot.insert(finding);
            }
            Entry::Occupied(mut slot) => {
                if finding.risk_score > slot.get().risk_score {
                    slot.insert(finding);
                }
            }
        }
    }

    let mut ranked: Vec<Finding> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.risk_score
            .partial_cmp(&a.risk_score)
            .unwrap_or(Ordering::Equal)
            .then(a.line.cmp(&b.line))
            .then(a.category.cmp(&b.category))
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::{DetectionMethod, FindingBuilder};
    use proptest::prelude::*;

    fn finding(line: u32, category: PatternCategory, risk: f64, method: DetectionMethod) -> Finding {
        FindingBuilder::new()
            .line(line)
            .snippet(format!("line {line}"))
            .category(category)
            .risk_score(risk)
            .confidence(0.5)
            .detection_method(method)
            .build()
            .unwrap()
    }

    #[test]
    fn keeps_highest_per_line_and_category() {
        let out = deduplicate(vec![
            finding(3, PatternCategory::SqlInjection, 0.66, DetectionMethod::Pattern),
            finding(3, PatternCategory::SqlInjection, 0.85, DetectionMethod::DataFlow),
            finding(3, PatternCategory::CommandInjection, 0.60, DetectionMethod::Pattern),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].risk_score, 0.85);
        assert_eq!(out[0].detection_method, DetectionMethod::DataFlow);
        assert_eq!(out[1].category, PatternCategory::CommandInjection);
    }

    #[test]
    fn first_seen_wins_a_tie() {
        let out = deduplicate(vec![
            finding(1, PatternCategory::CrossSiteScripting, 0.7, DetectionMethod::DataFlow),
            finding(1, PatternCategory::CrossSiteScripting, 0.7, DetectionMethod::Pattern),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].detection_method, DetectionMethod::DataFlow);
    }

    #[test]
    fn ties_in_risk_are_ordered_by_line_then_category() {
        let out = deduplicate(vec![
            finding(9, PatternCategory::SqlInjection, 0.6, DetectionMethod::Pattern),
            finding(2, PatternCategory::PathTraversal, 0.6, DetectionMethod::Pattern),
            finding(2, PatternCategory::SqlInjection, 0.6, DetectionMethod::Pattern),
        ]);
        let order: Vec<(u32, PatternCategory)> = out.iter().map(|f| (f.line, f.category)).collect();
        assert_eq!(
            order,
            vec![
                (2, PatternCategory::SqlInjection),
                (2, PatternCategory::PathTraversal),
                (9, PatternCategory::SqlInjection),
            ]
        );
    }

    #[test]
    fn empty_input() {
        assert!(deduplicate(Vec::new()).is_empty());
    }

    fn category() -> impl Strategy<Value = PatternCategory> {
        prop::sample::select(PatternCategory::all().to_vec())
    }

    proptest! {
        #[test]
        fn output_is_unique_sorted_and_maximal(
            raw in prop::collection::vec((1u32..20, category(), 0.0f64..=1.0), 0..40)
        ) {
            let input: Vec<Finding> = raw
                .iter()
                .map(|(line, cat, risk)| finding(*line, *cat, *risk, DetectionMethod::Pattern))
                .collect();
            let out = deduplicate(input.clone());

            let mut keys: Vec<(u32, PatternCategory)> = out.iter().map(|f| (f.line, f.category)).collect();
            let total = keys.len();
            keys.sort();
            keys.dedup();
            prop_assert_eq!(keys.len(), total);

            for pair in out.windows(2) {
                prop_assert!(pair[0].risk_score >= pair[1].risk_score);
            }

            for f in &out {
                let max = input
                    .iter()
                    .filter(|g| g.line == f.line && g.category == f.category)
                    .map(|g| g.risk_score)
                    .fold(0.0f64, f64::max);
                prop_assert_eq!(f.risk_score, max);
            }

            prop_assert_eq!(deduplicate(out.clone()), out);
        }
    }
}
