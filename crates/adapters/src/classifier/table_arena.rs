use std::collections::HashMap;

use domain::compiler::BLOCK_SIZE;
use domain::table::{ClassifierError, TableHandle};
use ports::secondary::classifier_port::ClassifierBackendPort;
use tracing::debug;

struct StoredTable {
    mask: Vec<u8>,
    skip: u32,
    capacity: u32,
    next: Option<TableHandle>,
    sessions: HashMap<Vec<u8>, u32>,
}

struct Slot {
    generation: u32,
    table: Option<StoredTable>,
}

/// Classifier backend keeping tables in a generation-checked arena.
///
/// Freed slots are reused with a bumped generation, so a stale handle to
/// a deleted table is reported as `TableNotFound` instead of aliasing the
/// table that took its slot.
#[derive(Default)]
pub struct InMemoryClassifier {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl InMemoryClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live tables.
    pub fn table_count(&self) -> usize {
        self.slots.iter().filter(|s| s.table.is_some()).count()
    }

    pub fn session_count(&self, table: TableHandle) -> Result<usize, ClassifierError> {
        Ok(self.get(table)?.sessions.len())
    }

    pub fn capacity(&self, table: TableHandle) -> Result<u32, ClassifierError> {
        Ok(self.get(table)?.capacity)
    }

    pub fn next_of(&self, table: TableHandle) -> Result<Option<TableHandle>, ClassifierError> {
        Ok(self.get(table)?.next)
    }

    /// Walk the chain from `head` and return the rule index of the first
    /// session whose key equals the masked header bytes.
    pub fn classify(&self, head: TableHandle, header: &[u8]) -> Option<u32> {
        let mut current = Some(head);
        let mut hops = 0;
        while let Some(handle) = current {
            let table = self.get(handle).ok()?;
            let start = table.skip as usize * BLOCK_SIZE;
            let key: Vec<u8> = table
                .mask
                .iter()
                .enumerate()
                .map(|(i, m)| header.get(start + i).copied().unwrap_or(0) & m)
                .collect();
            if let Some(index) = table.sessions.get(&key) {
                return Some(*index);
            }
            hops += 1;
            if hops > self.slots.len() {
                return None;
            }
            current = table.next;
        }
        None
    }

    fn get(&self, handle: TableHandle) -> Result<&StoredTable, ClassifierError> {
        self.slots
            .get(handle.slot as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.table.as_ref())
            .ok_or(ClassifierError::TableNotFound { table: handle })
    }

    fn get_mut(&mut self, handle: TableHandle) -> Result<&mut StoredTable, ClassifierError> {
        self.slots
            .get_mut(handle.slot as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.table.as_mut())
            .ok_or(ClassifierError::TableNotFound { table: handle })
    }

    fn release(&mut self, handle: TableHandle) -> Result<Option<TableHandle>, ClassifierError> {
        let next = self.get(handle)?.next;
        if let Some(slot) = self.slots.get_mut(handle.slot as usize) {
            slot.table = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(handle.slot);
        }
        Ok(next)
    }
}

impl ClassifierBackendPort for InMemoryClassifier {
    fn create_table(
        &mut self,
        mask: &[u8],
        skip: u32,
        match_len: u32,
        capacity: u32,
        next: Option<TableHandle>,
    ) -> Result<TableHandle, ClassifierError> {
        if match_len == 0 || mask.len() != match_len as usize * BLOCK_SIZE {
            return Err(ClassifierError::InvalidGeometry {
                reason: "mask must be match_len blocks long",
            });
        }
        if capacity == 0 {
            return Err(ClassifierError::InvalidGeometry {
                reason: "capacity must be at least 1",
            });
        }
        if let Some(next) = next {
            self.get(next)?;
        }
        let table = StoredTable {
            mask: mask.to_vec(),
            skip,
            capacity,
            next,
            sessions: HashMap::new(),
        };
        let handle = if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.table = Some(table);
            TableHandle {
                slot,
                generation: entry.generation,
            }
        } else {
            let slot = u32::try_from(self.slots.len()).map_err(|_| {
                ClassifierError::InvalidGeometry {
                    reason: "table arena exhausted",
                }
            })?;
            self.slots.push(Slot {
                generation: 0,
                table: Some(table),
            });
            TableHandle {
                slot,
                generation: 0,
            }
        };
        debug!(table = %handle, skip, match_len, capacity, "classifier table created");
        Ok(handle)
    }

    fn delete_table(
        &mut self,
        table: TableHandle,
        cascade_chain: bool,
    ) -> Result<(), ClassifierError> {
        let mut next = self.release(table)?;
        debug!(table = %table, cascade_chain, "classifier table deleted");
        if cascade_chain {
            while let Some(handle) = next {
                next = self.release(handle)?;
                debug!(table = %handle, "classifier table deleted by cascade");
            }
        }
        Ok(())
    }

    fn update_table_next(
        &mut self,
        table: TableHandle,
        next: Option<TableHandle>,
    ) -> Result<(), ClassifierError> {
        if let Some(next) = next {
            self.get(next)?;
        }
        self.get_mut(table)?.next = next;
        Ok(())
    }

    fn add_session(
        &mut self,
        table: TableHandle,
        key: &[u8],
        rule_index: u32,
    ) -> Result<(), ClassifierError> {
        let stored = self.get_mut(table)?;
        if key.len() != stored.mask.len() {
            return Err(ClassifierError::InvalidKeyLength {
                table,
                len: key.len(),
                expected: stored.mask.len(),
            });
        }
        if stored.sessions.contains_key(key) {
            return Err(ClassifierError::DuplicateSession { table });
        }
        if stored.sessions.len() >= stored.capacity as usize {
            return Err(ClassifierError::CapacityExceeded {
                table,
                capacity: stored.capacity,
            });
        }
        stored.sessions.insert(key.to_vec(), rule_index);
        Ok(())
    }

    fn delete_session(&mut self, table: TableHandle, key: &[u8]) -> Result<(), ClassifierError> {
        self.get_mut(table)?
            .sessions
            .remove(key)
            .map(|_| ())
            .ok_or(ClassifierError::SessionNotFound { table })
    }

    fn find_session(&self, table: TableHandle, key: &[u8]) -> Result<Option<u32>, ClassifierError> {
        Ok(self.get(table)?.sessions.get(key).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask() -> Vec<u8> {
        let mut m = vec![0u8; BLOCK_SIZE];
        m[0] = 0xF0;
        m[9] = 0xFF;
        m
    }

    fn key(proto: u8) -> Vec<u8> {
        let mut k = vec![0u8; BLOCK_SIZE];
        k[0] = 0x40;
        k[9] = proto;
        k
    }

    fn header(proto: u8) -> Vec<u8> {
        let mut h = vec![0u8; 40];
        h[0] = 0x45;
        h[9] = proto;
        h
    }

    // ── Tables ─────────────────────────────────────────────────────

    #[test]
    fn create_validates_geometry() {
        let mut c = InMemoryClassifier::new();
        assert!(matches!(
            c.create_table(&[0xFF; 8], 0, 1, 4, None),
            Err(ClassifierError::InvalidGeometry { .. })
        ));
        assert!(matches!(
            c.create_table(&mask(), 0, 1, 0, None),
            Err(ClassifierError::InvalidGeometry { .. })
        ));
        assert!(c.create_table(&mask(), 0, 1, 4, None).is_ok());
    }

    #[test]
    fn stale_handle_is_not_found() {
        let mut c = InMemoryClassifier::new();
        let old = c.create_table(&mask(), 0, 1, 4, None).unwrap();
        c.delete_table(old, false).unwrap();
        let new = c.create_table(&mask(), 0, 1, 4, None).unwrap();
        assert_eq!(new.slot, old.slot);
        assert_ne!(new.generation, old.generation);
        assert_eq!(
            c.find_session(old, &key(6)),
            Err(ClassifierError::TableNotFound { table: old })
        );
    }

    #[test]
    fn next_must_exist() {
        let mut c = InMemoryClassifier::new();
        let t = c.create_table(&mask(), 0, 1, 4, None).unwrap();
        c.delete_table(t, false).unwrap();
        assert!(matches!(
            c.create_table(&mask(), 0, 1, 4, Some(t)),
            Err(ClassifierError::TableNotFound { .. })
        ));
    }

    #[test]
    fn cascade_deletes_whole_chain() {
        let mut c = InMemoryClassifier::new();
        let tail = c.create_table(&mask(), 0, 1, 4, None).unwrap();
        let mid = c.create_table(&mask(), 0, 1, 4, Some(tail)).unwrap();
        let head = c.create_table(&mask(), 0, 1, 4, Some(mid)).unwrap();
        assert_eq!(c.table_count(), 3);
        c.delete_table(head, true).unwrap();
        assert_eq!(c.table_count(), 0);
    }

    #[test]
    fn non_cascade_keeps_successor() {
        let mut c = InMemoryClassifier::new();
        let tail = c.create_table(&mask(), 0, 1, 4, None).unwrap();
        let head = c.create_table(&mask(), 0, 1, 4, Some(tail)).unwrap();
        c.delete_table(head, false).unwrap();
        assert_eq!(c.table_count(), 1);
        assert_eq!(c.next_of(tail), Ok(None));
    }

    // ── Sessions ───────────────────────────────────────────────────

    #[test]
    fn duplicate_session_rejected() {
        let mut c = InMemoryClassifier::new();
        let t = c.create_table(&mask(), 0, 1, 4, None).unwrap();
        c.add_session(t, &key(6), 0).unwrap();
        assert_eq!(
            c.add_session(t, &key(6), 1),
            Err(ClassifierError::DuplicateSession { table: t })
        );
        assert_eq!(c.find_session(t, &key(6)), Ok(Some(0)));
    }

    #[test]
    fn capacity_enforced() {
        let mut c = InMemoryClassifier::new();
        let t = c.create_table(&mask(), 0, 1, 1, None).unwrap();
        c.add_session(t, &key(6), 0).unwrap();
        assert_eq!(
            c.add_session(t, &key(17), 1),
            Err(ClassifierError::CapacityExceeded {
                table: t,
                capacity: 1
            })
        );
    }

    #[test]
    fn key_length_checked() {
        let mut c = InMemoryClassifier::new();
        let t = c.create_table(&mask(), 0, 1, 2, None).unwrap();
        assert!(matches!(
            c.add_session(t, &[0x40], 0),
            Err(ClassifierError::InvalidKeyLength { .. })
        ));
    }

    #[test]
    fn delete_missing_session() {
        let mut c = InMemoryClassifier::new();
        let t = c.create_table(&mask(), 0, 1, 2, None).unwrap();
        assert_eq!(
            c.delete_session(t, &key(6)),
            Err(ClassifierError::SessionNotFound { table: t })
        );
    }

    // ── Lookup ─────────────────────────────────────────────────────

    #[test]
    fn classify_walks_chain() {
        let mut c = InMemoryClassifier::new();
        let mut wide = vec![0u8; BLOCK_SIZE * 2];
        wide[0] = 0xF0;
        wide[23] = 0xFF;
        let tail = c.create_table(&wide, 0, 2, 4, None).unwrap();
        let head = c.create_table(&mask(), 0, 1, 4, Some(tail)).unwrap();
        c.add_session(head, &key(6), 0).unwrap();
        let mut k = vec![0u8; BLOCK_SIZE * 2];
        k[0] = 0x40;
        k[23] = 53;
        c.add_session(tail, &k, 1).unwrap();

        assert_eq!(c.classify(head, &header(6)), Some(0));
        let mut udp = header(17);
        udp[23] = 53;
        assert_eq!(c.classify(head, &udp), Some(1));
        assert_eq!(c.classify(head, &header(1)), None);
    }
}
