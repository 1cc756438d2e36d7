use domain::table::{ClassifierError, TableHandle};

/// Secondary port binding a chain head table to ingress interfaces.
pub trait InterfaceAttachPort: Send + Sync {
    /// Point `interface` at `table`, replacing any previous attachment.
    fn attach(&mut self, table: TableHandle, interface: u32) -> Result<(), ClassifierError>;

    fn detach(&mut self, interface: u32) -> Result<(), ClassifierError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_port_is_object_safe() {
        fn _check(_port: &mut dyn InterfaceAttachPort) {}
    }
}
