//! Business entities that can arrive from several sources under different
//! names: clients (organizations) and staff members (people).
//!
//! Each kind owns a base table, an alias table and a set of dependent tables
//! that point at it by foreign key. The entity resolver walks these lists when
//! it merges two records, so a new dependent table only needs to be added here.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::matcher::NameStyle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Client,
    Staff,
}

/// A table holding a foreign key to a canonical entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependentTable {
    pub table: &'static str,
    pub column: &'static str,
    /// Set when a unique key includes `column`, so reassignment can collide
    /// with a row the kept entity already owns.
    pub unique_with_fk: bool,
}

const CLIENT_DEPENDENTS: &[DependentTable] = &[
    DependentTable { table: "time_entries", column: "client_id", unique_with_fk: false },
    DependentTable { table: "deliverables", column: "client_id", unique_with_fk: false },
    DependentTable { table: "financial_records", column: "client_id", unique_with_fk: true },
    DependentTable { table: "communication_logs", column: "client_id", unique_with_fk: false },
    DependentTable { table: "meeting_logs", column: "client_id", unique_with_fk: false },
    DependentTable { table: "assignments", column: "client_id", unique_with_fk: true },
];

const STAFF_DEPENDENTS: &[DependentTable] = &[
    DependentTable { table: "time_entries", column: "staff_id", unique_with_fk: false },
    DependentTable { table: "assignments", column: "staff_id", unique_with_fk: true },
];

impl EntityKind {
    /// String label for SQL storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Client => "client",
            EntityKind::Staff => "staff",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Client => "clients",
            EntityKind::Staff => "staff",
        }
    }

    pub fn alias_table(&self) -> &'static str {
        match self {
            EntityKind::Client => "client_aliases",
            EntityKind::Staff => "staff_aliases",
        }
    }

    /// Column name used by alias and dependent tables.
    pub fn fk_column(&self) -> &'static str {
        match self {
            EntityKind::Client => "client_id",
            EntityKind::Staff => "staff_id",
        }
    }

    pub fn dependents(&self) -> &'static [DependentTable] {
        match self {
            EntityKind::Client => CLIENT_DEPENDENTS,
            EntityKind::Staff => STAFF_DEPENDENTS,
        }
    }

    /// How display names of this kind are normalized before matching.
    pub fn name_style(&self) -> NameStyle {
        match self {
            EntityKind::Client => NameStyle::Organization,
            EntityKind::Staff => NameStyle::Person,
        }
    }

    /// Parse from SQL string.
    pub fn from_str_lossy(s: &str) -> Option<Self> {
        match s {
            "client" => Some(EntityKind::Client),
            "staff" => Some(EntityKind::Staff),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "client" | "clients" => Ok(EntityKind::Client),
            "staff" | "staff_member" | "staff_members" | "people" => Ok(EntityKind::Staff),
            other => Err(format!("Unknown entity kind '{}' (expected clients or staff)", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plural_and_singular_labels() {
        assert_eq!("clients".parse::<EntityKind>().unwrap(), EntityKind::Client);
        assert_eq!("Staff".parse::<EntityKind>().unwrap(), EntityKind::Staff);
        assert!("projects".parse::<EntityKind>().is_err());
    }

    #[test]
    fn storage_label_round_trips() {
        for kind in [EntityKind::Client, EntityKind::Staff] {
            assert_eq!(EntityKind::from_str_lossy(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn every_dependent_uses_the_kind_fk_column() {
        for kind in [EntityKind::Client, EntityKind::Staff] {
            assert!(kind
                .dependents()
                .iter()
                .all(|d| d.column == kind.fk_column()));
        }
    }
}
