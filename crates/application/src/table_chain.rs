use domain::compiler::{BLOCK_SIZE, CompiledKey};
use domain::table::{ChainError, ChainSettings, ClassifierError, EmptyTablePolicy, Table, TableHandle};
use ports::secondary::classifier_port::ClassifierBackendPort;
use ports::secondary::interface_port::InterfaceAttachPort;
use tracing::{debug, error, info, warn};

/// Where a rule's classify key lives in the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Placement {
    table: TableHandle,
    key: Vec<u8>,
}

/// Result of placing a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementReport {
    pub table: TableHandle,
    /// A new table was appended to the chain.
    pub created: bool,
    /// The target table was full and replaced by a larger one.
    pub grown: bool,
}

/// Inverse of one backend mutation.
#[derive(Debug)]
enum Undo {
    DeleteSession {
        table: TableHandle,
        key: Vec<u8>,
    },
    AddSession {
        table: TableHandle,
        key: Vec<u8>,
        rule_index: u32,
    },
    DeleteTable(TableHandle),
    SetNext {
        table: TableHandle,
        next: Option<TableHandle>,
    },
    /// Point `interface` back at `table`, or detach it.
    Reattach {
        interface: u32,
        table: Option<TableHandle>,
    },
}

/// Backend mutations made by one chain operation.
#[derive(Debug, Default)]
struct Journal {
    undo: Vec<Undo>,
    /// Unlinked tables, deleted once the operation has succeeded.
    retired: Vec<TableHandle>,
}

/// Table chain manager.
///
/// Keeps one classifier table per distinct (mask, skip, match) triplet,
/// linked in order of first appearance. Placements are indexed by rule
/// position; inserting or deleting a rule renumbers the sessions of every
/// rule after it. Only the head table is attached to interfaces.
///
/// Every mutating operation is all-or-nothing: a backend failure undoes
/// the calls already made and leaves tables and placements as they were.
pub struct TableChain {
    backend: Box<dyn ClassifierBackendPort + Send>,
    attach: Box<dyn InterfaceAttachPort + Send>,
    settings: ChainSettings,
    /// Chain order: `tables[0]` is the head.
    tables: Vec<Table>,
    placements: Vec<Placement>,
    interfaces: Vec<u32>,
}

impl TableChain {
    pub fn new(
        backend: Box<dyn ClassifierBackendPort + Send>,
        attach: Box<dyn InterfaceAttachPort + Send>,
        settings: ChainSettings,
    ) -> Self {
        Self {
            backend,
            attach,
            settings,
            tables: Vec::new(),
            placements: Vec::new(),
            interfaces: Vec::new(),
        }
    }

    pub fn settings(&self) -> ChainSettings {
        self.settings
    }

    /// Tables in chain order.
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn head(&self) -> Option<TableHandle> {
        self.tables.first().map(|t| t.handle)
    }

    pub fn interfaces(&self) -> &[u32] {
        &self.interfaces
    }

    /// Number of placed keys.
    pub fn len(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    /// Handles from the head following `next` links.
    pub fn chain_order(&self) -> Vec<TableHandle> {
        let mut order = Vec::with_capacity(self.tables.len());
        let mut current = self.head();
        while let Some(handle) = current {
            if order.len() > self.tables.len() {
                break;
            }
            order.push(handle);
            current = self
                .tables
                .iter()
                .find(|t| t.handle == handle)
                .and_then(|t| t.next);
        }
        order
    }

    /// Place the classify key of the rule at `index`, shifting the rules
    /// at `index..` down by one.
    pub fn place(&mut self, index: usize, key: &CompiledKey) -> Result<PlacementReport, ChainError> {
        self.transact(|chain, journal| chain.place_in(journal, index, key))
    }

    /// Remove the session of the rule at `index` and shift later rules up.
    /// Returns the table reclaimed because it became empty, if any.
    pub fn remove(&mut self, index: usize) -> Result<Option<TableHandle>, ChainError> {
        self.transact(|chain, journal| chain.remove_in(journal, index))
    }

    /// Delete every table and session. Enabled interfaces stay enabled and
    /// get the next head once one exists.
    pub fn flush(&mut self) -> Result<(), ChainError> {
        if let Some(head) = self.head() {
            self.transact(|chain, journal| {
                chain.detach_all(journal, head)?;
                chain.backend.delete_table(head, true)?;
                Ok(())
            })?;
            info!(tables = self.tables.len(), "table chain flushed");
        }
        self.tables.clear();
        self.placements.clear();
        Ok(())
    }

    pub fn enable_interface(&mut self, interface: u32) -> Result<(), ChainError> {
        if self.interfaces.contains(&interface) {
            return Err(ChainError::InterfaceAlreadyEnabled { interface });
        }
        if let Some(head) = self.head() {
            self.attach.attach(head, interface)?;
        }
        self.interfaces.push(interface);
        info!(interface, "interface enabled");
        Ok(())
    }

    pub fn disable_interface(&mut self, interface: u32) -> Result<(), ChainError> {
        let Some(pos) = self.interfaces.iter().position(|&i| i == interface) else {
            return Err(ChainError::InterfaceNotEnabled { interface });
        };
        if self.head().is_some() {
            self.attach.detach(interface)?;
        }
        self.interfaces.remove(pos);
        info!(interface, "interface disabled");
        Ok(())
    }

    /// Rule index stored for `key`, looked up in the table of its shape.
    pub fn find(&self, key: &CompiledKey) -> Result<Option<u32>, ChainError> {
        match self.tables.iter().find(|t| t.accepts(key)) {
            Some(table) => Ok(self.backend.find_session(table.handle, &key.key)?),
            None => Ok(None),
        }
    }

    /// Walk the chain the way the data plane does: mask the header with
    /// each table's mask and stop at the first session hit.
    pub fn classify(&self, header: &[u8]) -> Result<Option<u32>, ChainError> {
        for table in &self.tables {
            let start = table.skip as usize * BLOCK_SIZE;
            let key: Vec<u8> = table
                .mask
                .iter()
                .enumerate()
                .map(|(i, m)| header.get(start + i).copied().unwrap_or(0) & m)
                .collect();
            if let Some(index) = self.backend.find_session(table.handle, &key)? {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Run `op`, undoing its backend calls and restoring the bookkeeping
    /// if it fails. Tables it retired are deleted only on success.
    fn transact<T>(
        &mut self,
        op: impl FnOnce(&mut Self, &mut Journal) -> Result<T, ChainError>,
    ) -> Result<T, ChainError> {
        let tables = self.tables.clone();
        let placements = self.placements.clone();
        let mut journal = Journal::default();
        match op(self, &mut journal) {
            Ok(value) => {
                for handle in journal.retired {
                    if let Err(err) = self.backend.delete_table(handle, false) {
                        // already unlinked, only the backend memory leaks
                        warn!(table = %handle, %err, "deleting unlinked table failed");
                    }
                }
                Ok(value)
            }
            Err(err) => {
                if !journal.undo.is_empty() {
                    warn!(steps = journal.undo.len(), %err, "chain operation rolled back");
                }
                self.rollback(journal.undo);
                self.tables = tables;
                self.placements = placements;
                Err(err)
            }
        }
    }

    fn rollback(&mut self, undo: Vec<Undo>) {
        for step in undo.into_iter().rev() {
            let result = match &step {
                Undo::DeleteSession { table, key } => self.backend.delete_session(*table, key),
                Undo::AddSession {
                    table,
                    key,
                    rule_index,
                } => self.backend.add_session(*table, key, *rule_index),
                Undo::DeleteTable(table) => self.backend.delete_table(*table, false),
                Undo::SetNext { table, next } => self.backend.update_table_next(*table, *next),
                Undo::Reattach {
                    interface,
                    table: Some(table),
                } => self.attach.attach(*table, *interface),
                Undo::Reattach {
                    interface,
                    table: None,
                } => self.attach.detach(*interface),
            };
            if let Err(err) = result {
                error!(?step, %err, "rollback step failed");
            }
        }
    }

    fn place_in(
        &mut self,
        journal: &mut Journal,
        index: usize,
        key: &CompiledKey,
    ) -> Result<PlacementReport, ChainError> {
        let index = index.min(self.placements.len());
        // the last rule moves to `len` after the shift
        to_rule_index(self.placements.len())?;

        let mut created = false;
        let mut grown = false;
        let position = match self.tables.iter().position(|t| t.accepts(key)) {
            Some(position) => {
                let handle = self.tables[position].handle;
                if self.backend.find_session(handle, &key.key)?.is_some() {
                    return Err(ClassifierError::DuplicateSession { table: handle }.into());
                }
                if self.tables[position].is_full() {
                    self.grow(journal, position)?;
                    grown = true;
                }
                position
            }
            None => {
                self.append_table(journal, key)?;
                created = true;
                self.tables.len() - 1
            }
        };

        self.renumber(journal, index, 0, 1)?;
        let table = self.tables[position].handle;
        self.add_session(journal, table, &key.key, to_rule_index(index)?)?;
        self.tables[position].entry_count += 1;
        self.placements.insert(
            index,
            Placement {
                table,
                key: key.key.clone(),
            },
        );
        debug!(rule_index = index, table = %table, created, grown, "classify key placed");
        Ok(PlacementReport {
            table,
            created,
            grown,
        })
    }

    fn remove_in(&mut self, journal: &mut Journal, index: usize) -> Result<Option<TableHandle>, ChainError> {
        let placement = self
            .placements
            .get(index)
            .cloned()
            .ok_or(ChainError::NoPlacement { position: index })?;
        let position = self.position_of(placement.table)?;

        self.delete_session(journal, placement.table, &placement.key, to_rule_index(index)?)?;
        self.placements.remove(index);
        let table = &mut self.tables[position];
        table.entry_count = table.entry_count.saturating_sub(1);
        let emptied = table.entry_count == 0;
        self.renumber(journal, index, 1, 0)?;
        debug!(rule_index = index, table = %placement.table, "classify key removed");

        if emptied && self.settings.empty_table_policy == EmptyTablePolicy::Reclaim {
            self.unlink(journal, position)?;
            return Ok(Some(placement.table));
        }
        Ok(None)
    }

    fn position_of(&self, handle: TableHandle) -> Result<usize, ChainError> {
        self.tables
            .iter()
            .position(|t| t.handle == handle)
            .ok_or(ChainError::Inconsistent { table: handle })
    }

    fn append_table(&mut self, journal: &mut Journal, key: &CompiledKey) -> Result<(), ChainError> {
        let capacity = self.settings.initial_capacity.max(1);
        let handle = self.create_table(journal, &key.mask, key.skip, key.match_len, capacity, None)?;
        let previous = self.tables.last().map(|t| t.handle);
        match previous {
            Some(tail) => self.set_next(journal, tail, Some(handle), None)?,
            None => self.attach_all(journal, handle, None)?,
        }

        if let Some(tail) = self.tables.last_mut() {
            tail.next = Some(handle);
        }
        self.tables.push(Table {
            handle,
            mask: key.mask.clone(),
            skip: key.skip,
            match_len: key.match_len,
            previous,
            next: None,
            entry_count: 0,
            capacity,
        });
        info!(table = %handle, skip = key.skip, match_len = key.match_len, capacity, "table appended to chain");
        Ok(())
    }

    /// Replace the table at `position` with one `growth_ratio` times larger.
    fn grow(&mut self, journal: &mut Journal, position: usize) -> Result<(), ChainError> {
        let old = self.tables[position].clone();
        let capacity = old
            .capacity
            .saturating_mul(self.settings.growth_ratio.max(2));
        let new = self.create_table(journal, &old.mask, old.skip, old.match_len, capacity, old.next)?;
        self.copy_sessions(journal, old.handle, new)?;
        match old.previous {
            Some(previous) => self.set_next(journal, previous, Some(new), Some(old.handle))?,
            None => self.attach_all(journal, new, Some(old.handle))?,
        }
        journal.retired.push(old.handle);

        for placement in &mut self.placements {
            if placement.table == old.handle {
                placement.table = new;
            }
        }
        if position > 0 {
            self.tables[position - 1].next = Some(new);
        }
        if let Some(successor) = self.tables.get_mut(position + 1) {
            successor.previous = Some(new);
        }
        let table = &mut self.tables[position];
        table.handle = new;
        table.capacity = capacity;
        info!(old = %old.handle, new = %new, capacity, "table grown");
        Ok(())
    }

    fn copy_sessions(&mut self, journal: &mut Journal, from: TableHandle, to: TableHandle) -> Result<(), ChainError> {
        let sessions: Vec<(usize, Vec<u8>)> = self
            .placements
            .iter()
            .enumerate()
            .filter(|(_, p)| p.table == from)
            .map(|(index, p)| (index, p.key.clone()))
            .collect();
        for (index, key) in sessions {
            self.add_session(journal, to, &key, to_rule_index(index)?)?;
        }
        Ok(())
    }

    /// Move the sessions of the placements at `from..` from rule index
    /// `position + old_offset` to `position + new_offset`.
    fn renumber(
        &mut self,
        journal: &mut Journal,
        from: usize,
        old_offset: usize,
        new_offset: usize,
    ) -> Result<(), ChainError> {
        let moved: Vec<(usize, Placement)> = self
            .placements
            .iter()
            .cloned()
            .enumerate()
            .skip(from)
            .collect();
        for (position, placement) in moved {
            let old = shifted(position, old_offset)?;
            let new = shifted(position, new_offset)?;
            self.delete_session(journal, placement.table, &placement.key, old)?;
            self.add_session(journal, placement.table, &placement.key, new)?;
        }
        Ok(())
    }

    /// Unlink the empty table at `position` and retire it.
    fn unlink(&mut self, journal: &mut Journal, position: usize) -> Result<(), ChainError> {
        let table = self.tables[position].clone();
        match table.previous {
            Some(previous) => self.set_next(journal, previous, table.next, Some(table.handle))?,
            None => match table.next {
                Some(next) => self.attach_all(journal, next, Some(table.handle))?,
                None => self.detach_all(journal, table.handle)?,
            },
        }
        journal.retired.push(table.handle);

        self.tables.remove(position);
        if position > 0 {
            self.tables[position - 1].next = table.next;
        }
        if let Some(successor) = self.tables.get_mut(position) {
            successor.previous = table.previous;
        }
        info!(table = %table.handle, "empty table reclaimed");
        Ok(())
    }

    // ── Journaled backend calls ────────────────────────────────────

    fn create_table(
        &mut self,
        journal: &mut Journal,
        mask: &[u8],
        skip: u32,
        match_len: u32,
        capacity: u32,
        next: Option<TableHandle>,
    ) -> Result<TableHandle, ChainError> {
        let handle = self
            .backend
            .create_table(mask, skip, match_len, capacity, next)?;
        journal.undo.push(Undo::DeleteTable(handle));
        Ok(handle)
    }

    fn set_next(
        &mut self,
        journal: &mut Journal,
        table: TableHandle,
        next: Option<TableHandle>,
        was: Option<TableHandle>,
    ) -> Result<(), ChainError> {
        self.backend.update_table_next(table, next)?;
        journal.undo.push(Undo::SetNext { table, next: was });
        Ok(())
    }

    fn add_session(
        &mut self,
        journal: &mut Journal,
        table: TableHandle,
        key: &[u8],
        rule_index: u32,
    ) -> Result<(), ChainError> {
        self.backend.add_session(table, key, rule_index)?;
        journal.undo.push(Undo::DeleteSession {
            table,
            key: key.to_vec(),
        });
        Ok(())
    }

    fn delete_session(
        &mut self,
        journal: &mut Journal,
        table: TableHandle,
        key: &[u8],
        rule_index: u32,
    ) -> Result<(), ChainError> {
        self.backend.delete_session(table, key)?;
        journal.undo.push(Undo::AddSession {
            table,
            key: key.to_vec(),
            rule_index,
        });
        Ok(())
    }

    /// Attach `table` to every enabled interface; `was` is the table they
    /// pointed at before.
    fn attach_all(
        &mut self,
        journal: &mut Journal,
        table: TableHandle,
        was: Option<TableHandle>,
    ) -> Result<(), ChainError> {
        for &interface in &self.interfaces {
            self.attach.attach(table, interface)?;
            journal.undo.push(Undo::Reattach {
                interface,
                table: was,
            });
        }
        Ok(())
    }

    fn detach_all(&mut self, journal: &mut Journal, was: TableHandle) -> Result<(), ChainError> {
        for &interface in &self.interfaces {
            self.attach.detach(interface)?;
            journal.undo.push(Undo::Reattach {
                interface,
                table: Some(was),
            });
        }
        Ok(())
    }
}

fn to_rule_index(index: usize) -> Result<u32, ChainError> {
    u32::try_from(index).map_err(|_| ChainError::IndexOverflow { index })
}

fn shifted(position: usize, offset: usize) -> Result<u32, ChainError> {
    position
        .checked_add(offset)
        .ok_or(ChainError::IndexOverflow { index: position })
        .and_then(to_rule_index)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use adapters::classifier::InMemoryClassifier;
    use ports::test_utils::{FaultInjector, Faulty};

    use super::*;

    /// Classifier shared with the test so its state can be inspected.
    #[derive(Clone, Default)]
    pub(crate) struct SharedClassifier(pub Arc<Mutex<InMemoryClassifier>>);

    impl ClassifierBackendPort for SharedClassifier {
        fn create_table(
            &mut self,
            mask: &[u8],
            skip: u32,
            match_len: u32,
            capacity: u32,
            next: Option<TableHandle>,
        ) -> Result<TableHandle, ClassifierError> {
            self.0
                .lock()
                .unwrap()
                .create_table(mask, skip, match_len, capacity, next)
        }

        fn delete_table(
            &mut self,
            table: TableHandle,
            cascade_chain: bool,
        ) -> Result<(), ClassifierError> {
            self.0.lock().unwrap().delete_table(table, cascade_chain)
        }

        fn update_table_next(
            &mut self,
            table: TableHandle,
            next: Option<TableHandle>,
        ) -> Result<(), ClassifierError> {
            self.0.lock().unwrap().update_table_next(table, next)
        }

        fn add_session(
            &mut self,
            table: TableHandle,
            key: &[u8],
            rule_index: u32,
        ) -> Result<(), ClassifierError> {
            self.0.lock().unwrap().add_session(table, key, rule_index)
        }

        fn delete_session(
            &mut self,
            table: TableHandle,
            key: &[u8],
        ) -> Result<(), ClassifierError> {
            self.0.lock().unwrap().delete_session(table, key)
        }

        fn find_session(
            &self,
            table: TableHandle,
            key: &[u8],
        ) -> Result<Option<u32>, ClassifierError> {
            self.0.lock().unwrap().find_session(table, key)
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) enum AttachEvent {
        Attach(TableHandle, u32),
        Detach(u32),
    }

    /// Attach port recording every call.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingAttach(pub Arc<Mutex<Vec<AttachEvent>>>);

    impl RecordingAttach {
        pub(crate) fn events(&self) -> Vec<AttachEvent> {
            self.0.lock().unwrap().clone()
        }
    }

    impl InterfaceAttachPort for RecordingAttach {
        fn attach(&mut self, table: TableHandle, interface: u32) -> Result<(), ClassifierError> {
            self.0
                .lock()
                .unwrap()
                .push(AttachEvent::Attach(table, interface));
            Ok(())
        }

        fn detach(&mut self, interface: u32) -> Result<(), ClassifierError> {
            self.0.lock().unwrap().push(AttachEvent::Detach(interface));
            Ok(())
        }
    }

    fn make_chain(capacity: u32) -> (TableChain, SharedClassifier, RecordingAttach) {
        let classifier = SharedClassifier::default();
        let attach = RecordingAttach::default();
        let chain = TableChain::new(
            Box::new(classifier.clone()),
            Box::new(attach.clone()),
            ChainSettings {
                initial_capacity: capacity,
                ..ChainSettings::default()
            },
        );
        (chain, classifier, attach)
    }

    /// One-block key constraining byte 0 with `mask`, value `value`.
    fn make_key(skip: u32, mask: u8, value: u8) -> CompiledKey {
        let mut m = vec![0u8; BLOCK_SIZE];
        let mut k = vec![0u8; BLOCK_SIZE];
        m[0] = mask;
        k[0] = value & mask;
        CompiledKey {
            skip,
            match_len: 1,
            mask: m,
            key: k,
        }
    }

    /// Chain whose backend and attach calls share one [`FaultInjector`].
    pub(crate) fn make_faulty_chain(
        capacity: u32,
    ) -> (TableChain, SharedClassifier, RecordingAttach, FaultInjector) {
        let classifier = SharedClassifier::default();
        let attach = RecordingAttach::default();
        let faults = FaultInjector::default();
        let chain = TableChain::new(
            Box::new(Faulty::new(classifier.clone(), faults.clone())),
            Box::new(Faulty::new(attach.clone(), faults.clone())),
            ChainSettings {
                initial_capacity: capacity,
                ..ChainSettings::default()
            },
        );
        (chain, classifier, attach, faults)
    }

    /// Table `interface` currently points at, replayed from the events.
    fn attached_to(events: &[AttachEvent], interface: u32) -> Option<TableHandle> {
        events.iter().fold(None, |current, event| match *event {
            AttachEvent::Attach(table, i) if i == interface => Some(table),
            AttachEvent::Detach(i) if i == interface => None,
            _ => current,
        })
    }

    /// Bookkeeping and backend state that a failed operation must not touch.
    #[derive(Debug, PartialEq)]
    struct ChainState {
        tables: Vec<Table>,
        placements: Vec<Placement>,
        sessions: Vec<Option<u32>>,
        session_counts: Vec<usize>,
        links: Vec<Option<TableHandle>>,
        backend_tables: usize,
        attached: Vec<Option<TableHandle>>,
    }

    fn capture(chain: &TableChain, classifier: &SharedClassifier, attach: &RecordingAttach) -> ChainState {
        let backend = classifier.0.lock().unwrap();
        let events = attach.events();
        ChainState {
            tables: chain.tables.clone(),
            placements: chain.placements.clone(),
            sessions: chain
                .placements
                .iter()
                .map(|p| backend.find_session(p.table, &p.key).unwrap())
                .collect(),
            session_counts: chain
                .tables
                .iter()
                .map(|t| backend.session_count(t.handle).unwrap())
                .collect(),
            links: chain
                .tables
                .iter()
                .map(|t| backend.next_of(t.handle).unwrap())
                .collect(),
            backend_tables: backend.table_count(),
            attached: chain
                .interfaces
                .iter()
                .map(|&i| attached_to(&events, i))
                .collect(),
        }
    }

    /// Every placement is found at its own rule index and the table
    /// counters add up to the number of placements.
    fn assert_consistent(chain: &TableChain, classifier: &SharedClassifier) {
        let backend = classifier.0.lock().unwrap();
        for (index, placement) in chain.placements.iter().enumerate() {
            assert_eq!(
                backend.find_session(placement.table, &placement.key).unwrap(),
                Some(index as u32)
            );
        }
        let counted: u32 = chain.tables.iter().map(|t| t.entry_count).sum();
        assert_eq!(counted as usize, chain.len());
        let handles: Vec<TableHandle> = chain.tables.iter().map(|t| t.handle).collect();
        assert_eq!(chain.chain_order(), handles);
    }

    /// Fail every backend call of `op` in turn. Each failure must leave
    /// the chain exactly as `setup` built it, and the operation must then
    /// succeed once the backend recovers.
    fn assert_all_or_nothing(
        capacity: u32,
        setup: impl Fn(&mut TableChain),
        op: impl Fn(&mut TableChain) -> Result<(), ChainError>,
    ) {
        for successes in 0..256 {
            let (mut chain, classifier, attach, faults) = make_faulty_chain(capacity);
            setup(&mut chain);
            assert_consistent(&chain, &classifier);
            let before = capture(&chain, &classifier, &attach);

            faults.arm(successes);
            let result = op(&mut chain);
            if faults.is_armed() {
                // every call succeeded
                result.unwrap();
                assert!(successes > 0);
                assert_consistent(&chain, &classifier);
                return;
            }
            match result {
                Err(err) => {
                    assert!(
                        matches!(err, ChainError::Classifier(ClassifierError::Backend { .. })),
                        "unexpected error {err}"
                    );
                    assert_eq!(
                        capture(&chain, &classifier, &attach),
                        before,
                        "state changed after failing call {successes}"
                    );
                    op(&mut chain).unwrap();
                    assert_consistent(&chain, &classifier);
                }
                // only deleting a retired table fails without failing the operation
                Ok(()) => assert_consistent(&chain, &classifier),
            }
        }
        panic!("operation never ran to completion");
    }

    // ── Placement ──────────────────────────────────────────────────

    #[test]
    fn first_key_creates_attached_head() {
        let (mut chain, _, attach) = make_chain(4);
        chain.enable_interface(1).unwrap();
        let report = chain.place(0, &make_key(0, 0xFF, 1)).unwrap();
        assert!(report.created);
        assert_eq!(chain.head(), Some(report.table));
        assert_eq!(
            attach.events(),
            vec![AttachEvent::Attach(report.table, 1)]
        );
    }

    #[test]
    fn same_shape_shares_table() {
        let (mut chain, _, _) = make_chain(4);
        let a = chain.place(0, &make_key(0, 0xFF, 1)).unwrap();
        let b = chain.place(1, &make_key(0, 0xFF, 2)).unwrap();
        assert_eq!(a.table, b.table);
        assert!(!b.created);
        assert_eq!(chain.tables().len(), 1);
        assert_eq!(chain.tables()[0].entry_count, 2);
    }

    #[test]
    fn new_shape_appends_tail() {
        let (mut chain, classifier, attach) = make_chain(4);
        chain.enable_interface(1).unwrap();
        let head = chain.place(0, &make_key(0, 0xFF, 1)).unwrap().table;
        let tail = chain.place(1, &make_key(1, 0xFF, 1)).unwrap().table;
        assert_eq!(chain.chain_order(), vec![head, tail]);
        assert_eq!(classifier.0.lock().unwrap().next_of(head), Ok(Some(tail)));
        assert_eq!(chain.tables()[1].previous, Some(head));
        // only the head is attached
        assert_eq!(attach.events(), vec![AttachEvent::Attach(head, 1)]);
    }

    #[test]
    fn duplicate_key_rejected() {
        let (mut chain, _, _) = make_chain(4);
        chain.place(0, &make_key(0, 0xFF, 1)).unwrap();
        let err = chain.place(1, &make_key(0, 0xFF, 1)).unwrap_err();
        assert!(matches!(
            err,
            ChainError::Classifier(ClassifierError::DuplicateSession { .. })
        ));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn insert_renumbers_later_rules() {
        let (mut chain, _, _) = make_chain(4);
        let a = make_key(0, 0xFF, 1);
        let b = make_key(1, 0xFF, 2);
        let c = make_key(0, 0xFF, 3);
        chain.place(0, &a).unwrap();
        chain.place(1, &b).unwrap();
        chain.place(0, &c).unwrap();
        assert_eq!(chain.find(&c).unwrap(), Some(0));
        assert_eq!(chain.find(&a).unwrap(), Some(1));
        assert_eq!(chain.find(&b).unwrap(), Some(2));
    }

    // ── Growth ─────────────────────────────────────────────────────

    #[test]
    fn growth_multiplies_capacity_and_keeps_sessions() {
        let capacity = 4;
        let (mut chain, classifier, _) = make_chain(capacity);
        let keys: Vec<CompiledKey> = (0..=capacity as u8).map(|v| make_key(0, 0xFF, v)).collect();
        let mut reports = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            reports.push(chain.place(i, key).unwrap());
        }
        assert!(reports.last().unwrap().grown);
        assert!(reports[..capacity as usize].iter().all(|r| !r.grown));
        assert_eq!(chain.tables().len(), 1);
        assert_eq!(chain.tables()[0].capacity, capacity * 2);
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(chain.find(key).unwrap(), Some(i as u32));
        }
        assert_eq!(classifier.0.lock().unwrap().table_count(), 1);
    }

    #[test]
    fn growth_of_middle_table_relinks_neighbours() {
        let (mut chain, classifier, _) = make_chain(1);
        let head = chain.place(0, &make_key(0, 0xFF, 1)).unwrap().table;
        let middle = chain.place(1, &make_key(1, 0xFF, 1)).unwrap().table;
        let tail = chain.place(2, &make_key(2, 0xFF, 1)).unwrap().table;
        let grown = chain.place(3, &make_key(1, 0xFF, 2)).unwrap();
        assert!(grown.grown);
        assert_ne!(grown.table, middle);
        assert_eq!(chain.chain_order(), vec![head, grown.table, tail]);
        let backend = classifier.0.lock().unwrap();
        assert_eq!(backend.next_of(head), Ok(Some(grown.table)));
        assert_eq!(backend.next_of(grown.table), Ok(Some(tail)));
        assert!(backend.next_of(middle).is_err());
    }

    #[test]
    fn growth_of_head_reattaches() {
        let (mut chain, _, attach) = make_chain(1);
        chain.enable_interface(9).unwrap();
        let old = chain.place(0, &make_key(0, 0xFF, 1)).unwrap().table;
        let new = chain.place(1, &make_key(0, 0xFF, 2)).unwrap().table;
        assert_ne!(old, new);
        assert_eq!(chain.head(), Some(new));
        assert_eq!(
            attach.events(),
            vec![AttachEvent::Attach(old, 9), AttachEvent::Attach(new, 9)]
        );
    }

    // ── Removal ────────────────────────────────────────────────────

    #[test]
    fn remove_unknown_position() {
        let (mut chain, _, _) = make_chain(4);
        assert_eq!(chain.remove(0), Err(ChainError::NoPlacement { position: 0 }));
    }

    #[test]
    fn remove_shifts_later_rules_up() {
        let (mut chain, _, _) = make_chain(4);
        let a = make_key(0, 0xFF, 1);
        let b = make_key(0, 0xFF, 2);
        chain.place(0, &a).unwrap();
        chain.place(1, &b).unwrap();
        assert_eq!(chain.remove(0).unwrap(), None);
        assert_eq!(chain.find(&a).unwrap(), None);
        assert_eq!(chain.find(&b).unwrap(), Some(0));
        assert_eq!(chain.tables()[0].entry_count, 1);
    }

    #[test]
    fn emptied_middle_table_is_reclaimed() {
        let (mut chain, classifier, _) = make_chain(4);
        let head = chain.place(0, &make_key(0, 0xFF, 1)).unwrap().table;
        let middle = chain.place(1, &make_key(1, 0xFF, 1)).unwrap().table;
        let tail = chain.place(2, &make_key(2, 0xFF, 1)).unwrap().table;
        assert_eq!(chain.remove(1).unwrap(), Some(middle));
        assert_eq!(chain.chain_order(), vec![head, tail]);
        let backend = classifier.0.lock().unwrap();
        assert_eq!(backend.next_of(head), Ok(Some(tail)));
        assert_eq!(backend.table_count(), 2);
    }

    #[test]
    fn emptied_head_hands_over_attachment() {
        let (mut chain, _, attach) = make_chain(4);
        chain.enable_interface(2).unwrap();
        let head = chain.place(0, &make_key(0, 0xFF, 1)).unwrap().table;
        let tail = chain.place(1, &make_key(1, 0xFF, 1)).unwrap().table;
        chain.remove(0).unwrap();
        assert_eq!(chain.head(), Some(tail));
        assert!(chain.tables()[0].is_head());
        assert_eq!(
            attach.events(),
            vec![AttachEvent::Attach(head, 2), AttachEvent::Attach(tail, 2)]
        );
    }

    #[test]
    fn last_table_reclaimed_detaches() {
        let (mut chain, _, attach) = make_chain(4);
        chain.enable_interface(2).unwrap();
        chain.place(0, &make_key(0, 0xFF, 1)).unwrap();
        chain.remove(0).unwrap();
        assert!(chain.tables().is_empty());
        assert_eq!(attach.events().last(), Some(&AttachEvent::Detach(2)));
    }

    #[test]
    fn retain_policy_keeps_empty_table() {
        let classifier = SharedClassifier::default();
        let mut chain = TableChain::new(
            Box::new(classifier.clone()),
            Box::new(RecordingAttach::default()),
            ChainSettings {
                empty_table_policy: EmptyTablePolicy::Retain,
                ..ChainSettings::default()
            },
        );
        chain.place(0, &make_key(0, 0xFF, 1)).unwrap();
        assert_eq!(chain.remove(0).unwrap(), None);
        assert_eq!(chain.tables().len(), 1);
        assert_eq!(chain.tables()[0].entry_count, 0);
    }

    // ── Flush and interfaces ───────────────────────────────────────

    #[test]
    fn flush_deletes_whole_chain() {
        let (mut chain, classifier, attach) = make_chain(4);
        chain.enable_interface(3).unwrap();
        chain.place(0, &make_key(0, 0xFF, 1)).unwrap();
        chain.place(1, &make_key(1, 0xFF, 1)).unwrap();
        chain.flush().unwrap();
        assert!(chain.is_empty());
        assert!(chain.tables().is_empty());
        assert_eq!(classifier.0.lock().unwrap().table_count(), 0);
        assert_eq!(attach.events().last(), Some(&AttachEvent::Detach(3)));
        assert_eq!(chain.interfaces(), &[3]);
    }

    #[test]
    fn interface_enable_twice_rejected() {
        let (mut chain, _, _) = make_chain(4);
        chain.enable_interface(1).unwrap();
        assert_eq!(
            chain.enable_interface(1),
            Err(ChainError::InterfaceAlreadyEnabled { interface: 1 })
        );
        assert_eq!(
            chain.disable_interface(2),
            Err(ChainError::InterfaceNotEnabled { interface: 2 })
        );
    }

    #[test]
    fn enabling_after_rules_attaches_head() {
        let (mut chain, _, attach) = make_chain(4);
        let head = chain.place(0, &make_key(0, 0xFF, 1)).unwrap().table;
        chain.enable_interface(5).unwrap();
        chain.disable_interface(5).unwrap();
        assert_eq!(
            attach.events(),
            vec![AttachEvent::Attach(head, 5), AttachEvent::Detach(5)]
        );
    }

    // ── Lookup ─────────────────────────────────────────────────────

    #[test]
    fn classify_follows_chain_order() {
        let (mut chain, _, _) = make_chain(4);
        // high nibble only, then the whole byte
        chain.place(0, &make_key(0, 0xF0, 0x40)).unwrap();
        chain.place(1, &make_key(0, 0xFF, 0x45)).unwrap();
        let mut header = vec![0u8; 32];
        header[0] = 0x45;
        assert_eq!(chain.classify(&header).unwrap(), Some(0));
        header[0] = 0x55;
        assert_eq!(chain.classify(&header).unwrap(), None);
    }

    // ── Backend failures ───────────────────────────────────────────

    #[test]
    fn failed_first_table_is_discarded() {
        assert_all_or_nothing(
            4,
            |chain| {
                chain.enable_interface(1).unwrap();
                chain.enable_interface(2).unwrap();
            },
            |chain| chain.place(0, &make_key(0, 0xFF, 1)).map(|_| ()),
        );
    }

    #[test]
    fn failed_append_unlinks_new_tail() {
        assert_all_or_nothing(
            4,
            |chain| {
                chain.enable_interface(1).unwrap();
                chain.place(0, &make_key(0, 0xFF, 1)).unwrap();
                chain.place(1, &make_key(0, 0xFF, 2)).unwrap();
            },
            |chain| chain.place(0, &make_key(2, 0xFF, 1)).map(|_| ()),
        );
    }

    #[test]
    fn failed_growth_keeps_old_head() {
        assert_all_or_nothing(
            2,
            |chain| {
                chain.enable_interface(7).unwrap();
                chain.place(0, &make_key(0, 0xFF, 1)).unwrap();
                chain.place(1, &make_key(1, 0xFF, 1)).unwrap();
                chain.place(2, &make_key(0, 0xFF, 2)).unwrap();
            },
            |chain| chain.place(0, &make_key(0, 0xFF, 3)).map(|_| ()),
        );
    }

    #[test]
    fn failed_growth_of_middle_table_keeps_links() {
        assert_all_or_nothing(
            1,
            |chain| {
                chain.place(0, &make_key(0, 0xFF, 1)).unwrap();
                chain.place(1, &make_key(1, 0xFF, 1)).unwrap();
                chain.place(2, &make_key(2, 0xFF, 1)).unwrap();
            },
            |chain| chain.place(1, &make_key(1, 0xFF, 2)).map(|_| ()),
        );
    }

    #[test]
    fn failed_head_removal_keeps_rule() {
        assert_all_or_nothing(
            4,
            |chain| {
                chain.enable_interface(3).unwrap();
                chain.place(0, &make_key(0, 0xFF, 1)).unwrap();
                chain.place(1, &make_key(1, 0xFF, 1)).unwrap();
                chain.place(2, &make_key(1, 0xFF, 2)).unwrap();
            },
            |chain| chain.remove(0).map(|_| ()),
        );
    }

    #[test]
    fn failed_middle_removal_keeps_rule() {
        assert_all_or_nothing(
            4,
            |chain| {
                chain.place(0, &make_key(0, 0xFF, 1)).unwrap();
                chain.place(1, &make_key(1, 0xFF, 1)).unwrap();
                chain.place(2, &make_key(2, 0xFF, 1)).unwrap();
            },
            |chain| chain.remove(1).map(|_| ()),
        );
    }

    #[test]
    fn failed_last_table_removal_keeps_attachment() {
        assert_all_or_nothing(
            4,
            |chain| {
                chain.enable_interface(3).unwrap();
                chain.enable_interface(4).unwrap();
                chain.place(0, &make_key(0, 0xFF, 1)).unwrap();
            },
            |chain| chain.remove(0).map(|_| ()),
        );
    }

    #[test]
    fn failed_flush_keeps_chain() {
        assert_all_or_nothing(
            4,
            |chain| {
                chain.enable_interface(3).unwrap();
                chain.enable_interface(4).unwrap();
                chain.place(0, &make_key(0, 0xFF, 1)).unwrap();
                chain.place(1, &make_key(1, 0xFF, 1)).unwrap();
            },
            |chain| chain.flush(),
        );
    }

    #[test]
    fn failed_retired_table_delete_keeps_operation() {
        let (mut chain, classifier, _, faults) = make_faulty_chain(4);
        chain.place(0, &make_key(0, 0xFF, 1)).unwrap();
        chain.place(1, &make_key(1, 0xFF, 1)).unwrap();
        // delete_session and the relink succeed, deleting the retired table fails
        faults.arm(2);
        let reclaimed = chain.remove(1).unwrap();
        assert!(reclaimed.is_some());
        assert!(!faults.is_armed());
        assert_eq!(chain.tables().len(), 1);
        assert_consistent(&chain, &classifier);
        // unlinked but leaked in the backend
        assert_eq!(classifier.0.lock().unwrap().table_count(), 2);
    }
}
