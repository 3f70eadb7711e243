//! Property-based tests for strategy grouping invariants.
//!
//! These tests use proptest to verify that deduplication and freshness hold
//! across randomly generated screener outputs.

use std::collections::BTreeSet;

use proptest::prelude::*;
use stratbook::{StrategyGroups, TickerUniverseEntry, group_and_combine};

/// Generate a small ticker alphabet so overlaps are common
fn ticker_set_strategy() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set("[A-F]{1,2}", 0..12)
}

/// Generate an ISO date inside one month
fn date_strategy() -> impl Strategy<Value = String> {
    (1u32..=28).prop_map(|d| format!("2026-10-{d:02}"))
}

fn entries_strategy() -> impl Strategy<Value = Vec<TickerUniverseEntry>> {
    prop::collection::vec((ticker_set_strategy(), date_strategy()), 1..6).prop_map(|lists| {
        lists
            .into_iter()
            .enumerate()
            .map(|(i, (tickers, date))| TickerUniverseEntry::new(&format!("f{i}"), &date, tickers))
            .collect()
    })
}

fn all_filters(entries: &[TickerUniverseEntry]) -> StrategyGroups {
    let mut groups = StrategyGroups::new();
    groups.insert(
        "all".into(),
        entries.iter().map(|e| e.filter.clone()).collect(),
    );
    groups
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Combined size never exceeds the sum of per-filter sizes, with equality iff disjoint
    #[test]
    fn dedup_bound(entries in entries_strategy()) {
        let out = group_and_combine(&entries, &all_filters(&entries));
        let total: usize = entries.iter().map(|e| e.tickers.len()).sum();

        let combined = out.get("all").map(|s| s.tickers.len()).unwrap_or(0);
        prop_assert!(combined <= total);

        let mut seen = BTreeSet::new();
        let disjoint = entries
            .iter()
            .flat_map(|e| e.tickers.iter())
            .all(|t| seen.insert(t.clone()));
        prop_assert_eq!(combined == total, disjoint);
    }

    /// Output tickers are sorted and unique
    #[test]
    fn tickers_sorted_unique(entries in entries_strategy()) {
        let out = group_and_combine(&entries, &all_filters(&entries));
        if let Some(s) = out.get("all") {
            prop_assert!(s.tickers.windows(2).all(|w| w[0] < w[1]));
        }
    }

    /// Freshness is the max date over filters that contributed
    #[test]
    fn latest_date_is_max(entries in entries_strategy()) {
        let out = group_and_combine(&entries, &all_filters(&entries));
        if let Some(s) = out.get("all") {
            let max = entries
                .iter()
                .filter(|e| !e.tickers.is_empty())
                .map(|e| e.as_of.clone())
                .max()
                .unwrap();
            prop_assert_eq!(&s.latest_date, &max);
        } else {
            prop_assert!(entries.iter().all(|e| e.tickers.is_empty()));
        }
    }
}
