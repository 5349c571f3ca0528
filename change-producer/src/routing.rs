use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteParseError {
    #[error("invalid route entry '{0}', expected <type>:<topic>")]
    InvalidEntry(String),
    #[error("event type '{0}' is routed more than once")]
    DuplicateType(String),
}

/// Maps a classification tag to the topic its events are published to.
/// Tags without an entry are not published.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    routes: BTreeMap<String, String>,
}

impl RoutingTable {
    pub fn route(&self, kind: &str) -> Option<&str> {
        self.routes.get(kind).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.routes.iter().map(|(k, t)| (k.as_str(), t.as_str()))
    }
}

/// Parses `new:new_events,categorize:categorize_events`.
impl FromStr for RoutingTable {
    type Err = RouteParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut routes = BTreeMap::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((kind, topic)) = entry.split_once(':') else {
                return Err(RouteParseError::InvalidEntry(entry.to_owned()));
            };
            let (kind, topic) = (kind.trim(), topic.trim());
            if kind.is_empty() || topic.is_empty() {
                return Err(RouteParseError::InvalidEntry(entry.to_owned()));
            }
            if routes.insert(kind.to_owned(), topic.to_owned()).is_some() {
                return Err(RouteParseError::DuplicateType(kind.to_owned()));
            }
        }
        Ok(RoutingTable { routes })
    }
}

impl fmt::Display for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self
            .iter()
            .map(|(kind, topic)| format!("{kind} -> {topic}"))
            .collect();
        write!(f, "[{}]", entries.join(", "))
    }
}
