use std::fmt;

use serde::{Deserialize, Serialize};

use crate::compiler::CompiledKey;

/// Generation-checked handle into a classifier backend's table arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableHandle {
    pub slot: u32,
    pub generation: u32,
}

impl fmt::Display for TableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}.{}", self.slot, self.generation)
    }
}

/// Control-plane bookkeeping for one classifier table in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub handle: TableHandle,
    pub mask: Vec<u8>,
    pub skip: u32,
    pub match_len: u32,
    pub previous: Option<TableHandle>,
    pub next: Option<TableHandle>,
    pub entry_count: u32,
    pub capacity: u32,
}

impl Table {
    pub fn is_full(&self) -> bool {
        self.entry_count >= self.capacity
    }

    pub fn is_head(&self) -> bool {
        self.previous.is_none()
    }

    /// Whether a compiled key belongs in this table.
    pub fn accepts(&self, key: &CompiledKey) -> bool {
        self.skip == key.skip && self.match_len == key.match_len && self.mask == key.mask
    }
}

/// What to do with a table whose last session was deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyTablePolicy {
    /// Unlink and delete the table.
    #[default]
    Reclaim,
    /// Keep the empty table in the chain.
    Retain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSettings {
    pub initial_capacity: u32,
    pub growth_ratio: u32,
    pub empty_table_policy: EmptyTablePolicy,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            initial_capacity: 32,
            growth_ratio: 2,
            empty_table_policy: EmptyTablePolicy::Reclaim,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_table(entry_count: u32, capacity: u32) -> Table {
        Table {
            handle: TableHandle {
                slot: 0,
                generation: 1,
            },
            mask: vec![0xF0; 16],
            skip: 0,
            match_len: 1,
            previous: None,
            next: None,
            entry_count,
            capacity,
        }
    }

    #[test]
    fn full_at_capacity() {
        assert!(!make_table(1, 2).is_full());
        assert!(make_table(2, 2).is_full());
    }

    #[test]
    fn accepts_same_triplet_only() {
        let table = make_table(0, 4);
        let key = CompiledKey {
            skip: 0,
            match_len: 1,
            mask: vec![0xF0; 16],
            key: vec![0x40; 16],
        };
        assert!(table.accepts(&key));
        let other = CompiledKey {
            skip: 1,
            ..key.clone()
        };
        assert!(!table.accepts(&other));
    }

    #[test]
    fn handle_display() {
        let handle = TableHandle {
            slot: 3,
            generation: 7,
        };
        assert_eq!(handle.to_string(), "t3.7");
    }

    #[test]
    fn default_settings() {
        let settings = ChainSettings::default();
        assert_eq!(settings.initial_capacity, 32);
        assert_eq!(settings.growth_ratio, 2);
        assert_eq!(settings.empty_table_policy, EmptyTablePolicy::Reclaim);
    }
}
