use domain::table::{ClassifierError, TableHandle};

/// Secondary port to the classifier backend that stores mask/key tables.
///
/// Tables form singly-linked chains through their `next` pointer: a miss
/// in one table continues the lookup in the next. Sessions map an exact
/// key to a rule index.
pub trait ClassifierBackendPort: Send + Sync {
    /// Create an empty table for keys of `match_len` blocks after `skip`
    /// blocks, holding at most `capacity` sessions.
    fn create_table(
        &mut self,
        mask: &[u8],
        skip: u32,
        match_len: u32,
        capacity: u32,
        next: Option<TableHandle>,
    ) -> Result<TableHandle, ClassifierError>;

    /// Delete a table and its sessions. With `cascade_chain`, every table
    /// reachable through `next` is deleted too.
    fn delete_table(&mut self, table: TableHandle, cascade_chain: bool)
    -> Result<(), ClassifierError>;

    fn update_table_next(
        &mut self,
        table: TableHandle,
        next: Option<TableHandle>,
    ) -> Result<(), ClassifierError>;

    /// Add a session. Fails on an existing key rather than overwriting it.
    fn add_session(
        &mut self,
        table: TableHandle,
        key: &[u8],
        rule_index: u32,
    ) -> Result<(), ClassifierError>;

    fn delete_session(&mut self, table: TableHandle, key: &[u8]) -> Result<(), ClassifierError>;

    /// Rule index stored under `key`, if any.
    fn find_session(&self, table: TableHandle, key: &[u8]) -> Result<Option<u32>, ClassifierError>;
}
