use std::collections::HashMap;

use domain::table::{ClassifierError, TableHandle};
use ports::secondary::interface_port::InterfaceAttachPort;
use tracing::info;

/// Records which chain head each ingress interface classifies against.
#[derive(Debug, Default)]
pub struct InterfaceRegistry {
    attached: HashMap<u32, TableHandle>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attached(&self, interface: u32) -> Option<TableHandle> {
        self.attached.get(&interface).copied()
    }

    pub fn len(&self) -> usize {
        self.attached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }
}

impl InterfaceAttachPort for InterfaceRegistry {
    fn attach(&mut self, table: TableHandle, interface: u32) -> Result<(), ClassifierError> {
        let previous = self.attached.insert(interface, table);
        info!(interface, table = %table, ?previous, "classifier head attached");
        Ok(())
    }

    fn detach(&mut self, interface: u32) -> Result<(), ClassifierError> {
        let table = self
            .attached
            .remove(&interface)
            .ok_or(ClassifierError::InterfaceNotAttached { interface })?;
        info!(interface, table = %table, "classifier head detached");
        Ok(())
    }
}
