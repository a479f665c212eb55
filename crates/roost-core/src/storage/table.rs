//! Logical tables
//!
//! Every table is one JSON file in the data directory. The set is closed:
//! adding a table means adding a variant here.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Users,
    Pigeons,
    Training,
    Races,
    Breeding,
    Health,
    News,
    Events,
    Logs,
    Tokens,
    NewsSources,
    UsageStats,
    UserData,
    Backups,
    Settings,
}

impl Table {
    pub const ALL: [Table; 15] = [
        Table::Users,
        Table::Pigeons,
        Table::Training,
        Table::Races,
        Table::Breeding,
        Table::Health,
        Table::News,
        Table::Events,
        Table::Logs,
        Table::Tokens,
        Table::NewsSources,
        Table::UsageStats,
        Table::UserData,
        Table::Backups,
        Table::Settings,
    ];

    /// Name of the table, also used as the file stem and remote relation name
    pub fn name(&self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Pigeons => "pigeons",
            Table::Training => "training",
            Table::Races => "races",
            Table::Breeding => "breeding",
            Table::Health => "health",
            Table::News => "news",
            Table::Events => "events",
            Table::Logs => "logs",
            Table::Tokens => "tokens",
            Table::NewsSources => "news_sources",
            Table::UsageStats => "usage_stats",
            Table::UserData => "user_data",
            Table::Backups => "backups",
            Table::Settings => "settings",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.name())
    }

    /// Object tables hold a single JSON object instead of a record array
    pub fn is_object(&self) -> bool {
        matches!(self, Table::Settings)
    }

    /// Whether writes to this table are replicated to the cloud backend
    pub fn is_mirrored(&self) -> bool {
        matches!(
            self,
            Table::Users
                | Table::Pigeons
                | Table::Training
                | Table::Races
                | Table::Logs
                | Table::Tokens
                | Table::NewsSources
                | Table::UsageStats
                | Table::UserData
                | Table::Backups
        )
    }

    /// Content written when neither disk nor cloud has anything
    pub fn default_value(&self) -> Value {
        if self.is_object() {
            Value::Object(Default::default())
        } else {
            Value::Array(Vec::new())
        }
    }

    pub fn mirrored() -> impl Iterator<Item = Table> {
        Self::ALL.into_iter().filter(Table::is_mirrored)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| format!("unknown table '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for table in Table::ALL {
            assert_eq!(table.name().parse::<Table>(), Ok(table));
        }
        assert!("pigeon".parse::<Table>().is_err());
    }

    #[test]
    fn test_defaults() {
        assert_eq!(Table::Settings.default_value(), serde_json::json!({}));
        assert_eq!(Table::Pigeons.default_value(), serde_json::json!([]));
        assert_eq!(Table::NewsSources.file_name(), "news_sources.json");
    }

    #[test]
    fn test_mirrored_set() {
        let mirrored: Vec<_> = Table::mirrored().collect();
        assert_eq!(mirrored.len(), 10);
        assert!(mirrored.contains(&Table::Backups));
        assert!(!mirrored.contains(&Table::Settings));
        assert!(!mirrored.contains(&Table::Breeding));
    }
}
