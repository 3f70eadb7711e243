//! Strategy grouper: per-filter ticker lists → per-strategy universes.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;

/// Strategy name → constituent filter names.
pub type StrategyGroups = BTreeMap<String, Vec<String>>;

/// One screener filter's output as of a given date.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TickerUniverseEntry {
    pub filter: String,
    /// ISO-8601 date (`YYYY-MM-DD`); lexical order is chronological order.
    pub as_of: String,
    pub tickers: Vec<String>,
}

impl TickerUniverseEntry {
    pub fn new<I, S>(filter: &str, as_of: &str, tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            filter: filter.to_string(),
            as_of: as_of.to_string(),
            tickers: tickers.into_iter().map(Into::into).collect(),
        }
    }
}

/// A strategy's deduplicated universe.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Strategy {
    pub name: String,
    pub filters: Vec<String>,
    /// Sorted, unique by exact string match.
    pub tickers: Vec<String>,
    /// Most recent as-of date among the constituents that contributed.
    pub latest_date: String,
}

impl Strategy {
    /// True if the freshest constituent is older than `today` (`YYYY-MM-DD`).
    pub fn is_stale(&self, today: &str) -> bool {
        self.latest_date.as_str() < today
    }
}

/// Combine per-filter entries into per-strategy universes.
///
/// Filters named by a strategy but absent from `entries` are ignored. A
/// strategy whose constituents contribute no tickers is omitted, so an empty
/// map means no data is available yet rather than an error.
pub fn group_and_combine(
    entries: &[TickerUniverseEntry],
    groups: &StrategyGroups,
) -> BTreeMap<String, Strategy> {
    let mut by_filter: FxHashMap<&str, Vec<&TickerUniverseEntry>> = FxHashMap::default();
    for entry in entries {
        by_filter.entry(entry.filter.as_str()).or_default().push(entry);
    }

    let mut strategies = BTreeMap::new();

    for (name, filters) in groups {
        let mut tickers: BTreeSet<&str> = BTreeSet::new();
        let mut latest: Option<&str> = None;

        for filter in filters {
            let Some(matching) = by_filter.get(filter.as_str()) else {
                continue;
            };
            for entry in matching.iter().filter(|e| !e.tickers.is_empty()) {
                tickers.extend(entry.tickers.iter().map(String::as_str));
                if latest.is_none_or(|d| entry.as_of.as_str() > d) {
                    latest = Some(entry.as_of.as_str());
                }
            }
        }

        if tickers.is_empty() {
            continue;
        }

        strategies.insert(
            name.clone(),
            Strategy {
                name: name.clone(),
                filters: filters.clone(),
                tickers: tickers.into_iter().map(str::to_string).collect(),
                latest_date: latest.unwrap_or_default().to_string(),
            },
        );
    }

    strategies
}
