use std::collections::BTreeMap;
use std::fmt;

/// Running count of consumed events per classification tag. Owned by the
/// consumer loop and handed back when it stops.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AggregateCounters {
    counts: BTreeMap<String, u64>,
}

impl AggregateCounters {
    /// Counts one more event of this type, returning the new count.
    pub fn record(&mut self, kind: &str) -> u64 {
        match self.counts.get_mut(kind) {
            Some(count) => {
                *count += 1;
                *count
            }
            None => {
                self.counts.insert(kind.to_owned(), 1);
                1
            }
        }
    }

    /// `None` for a type never seen.
    pub fn get(&self, kind: &str) -> Option<u64> {
        self.counts.get(kind).copied()
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sorted by type.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(kind, count)| (kind.as_str(), *count))
    }
}

impl fmt::Display for AggregateCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("no events");
        }
        let entries: Vec<String> = self
            .iter()
            .map(|(kind, count)| format!("{kind}: {count}"))
            .collect();
        write!(f, "{} (total: {})", entries.join(", "), self.total())
    }
}
