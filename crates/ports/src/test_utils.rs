use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use domain::table::{ClassifierError, TableHandle};

use crate::secondary::classifier_port::ClassifierBackendPort;
use crate::secondary::interface_port::InterfaceAttachPort;
use crate::secondary::metrics_port::{PacketMetrics, RuleMetrics};

/// No-op implementation of all metrics sub-traits for use in tests.
///
/// All methods inherit the default no-op implementations from the sub-traits.
pub struct NoopMetrics;

impl PacketMetrics for NoopMetrics {}
impl RuleMetrics for NoopMetrics {}

const DISARMED: usize = usize::MAX;

/// Countdown shared by [`Faulty`] ports that fails exactly one mutating call.
///
/// Disarmed by default. After `arm(n)` the next `n` mutating calls succeed,
/// the one after fails with [`ClassifierError::Backend`] and the injector
/// disarms itself.
#[derive(Clone)]
pub struct FaultInjector(Arc<AtomicUsize>);

impl Default for FaultInjector {
    fn default() -> Self {
        Self(Arc::new(AtomicUsize::new(DISARMED)))
    }
}

impl FaultInjector {
    pub fn arm(&self, successes: usize) {
        self.0.store(successes.min(DISARMED - 1), Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.0.store(DISARMED, Ordering::SeqCst);
    }

    /// `false` once the armed fault has fired.
    pub fn is_armed(&self) -> bool {
        self.0.load(Ordering::SeqCst) != DISARMED
    }

    fn check(&self, call: &str) -> Result<(), ClassifierError> {
        let previous = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                DISARMED => None,
                0 => Some(DISARMED),
                n => Some(n - 1),
            });
        match previous {
            Ok(0) => Err(ClassifierError::Backend {
                reason: format!("injected {call} failure"),
            }),
            _ => Ok(()),
        }
    }
}

/// Port wrapper that fails the call selected by its [`FaultInjector`].
/// Lookups are never failed.
pub struct Faulty<P> {
    inner: P,
    faults: FaultInjector,
}

impl<P> Faulty<P> {
    pub fn new(inner: P, faults: FaultInjector) -> Self {
        Self { inner, faults }
    }
}

impl<P: ClassifierBackendPort> ClassifierBackendPort for Faulty<P> {
    fn create_table(
        &mut self,
        mask: &[u8],
        skip: u32,
        match_len: u32,
        capacity: u32,
        next: Option<TableHandle>,
    ) -> Result<TableHandle, ClassifierError> {
        self.faults.check("create_table")?;
        self.inner
            .create_table(mask, skip, match_len, capacity, next)
    }

    fn delete_table(&mut self, table: TableHandle, cascade_chain: bool) -> Result<(), ClassifierError> {
        self.faults.check("delete_table")?;
        self.inner.delete_table(table, cascade_chain)
    }

    fn update_table_next(
        &mut self,
        table: TableHandle,
        next: Option<TableHandle>,
    ) -> Result<(), ClassifierError> {
        self.faults.check("update_table_next")?;
        self.inner.update_table_next(table, next)
    }

    fn add_session(&mut self, table: TableHandle, key: &[u8], rule_index: u32) -> Result<(), ClassifierError> {
        self.faults.check("add_session")?;
        self.inner.add_session(table, key, rule_index)
    }

    fn delete_session(&mut self, table: TableHandle, key: &[u8]) -> Result<(), ClassifierError> {
        self.faults.check("delete_session")?;
        self.inner.delete_session(table, key)
    }

    fn find_session(&self, table: TableHandle, key: &[u8]) -> Result<Option<u32>, ClassifierError> {
        self.inner.find_session(table, key)
    }
}

impl<P: InterfaceAttachPort> InterfaceAttachPort for Faulty<P> {
    fn attach(&mut self, table: TableHandle, interface: u32) -> Result<(), ClassifierError> {
        self.faults.check("attach")?;
        self.inner.attach(table, interface)
    }

    fn detach(&mut self, interface: u32) -> Result<(), ClassifierError> {
        self.faults.check("detach")?;
        self.inner.detach(interface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disarmed_injector_never_fails() {
        let faults = FaultInjector::default();
        for _ in 0..8 {
            assert!(faults.check("add_session").is_ok());
        }
        assert!(!faults.is_armed());
    }

    #[test]
    fn armed_injector_fails_once_after_countdown() {
        let faults = FaultInjector::default();
        faults.arm(2);
        assert!(faults.check("a").is_ok());
        assert!(faults.check("b").is_ok());
        assert!(faults.is_armed());
        assert_eq!(
            faults.check("c"),
            Err(ClassifierError::Backend {
                reason: "injected c failure".to_string()
            })
        );
        assert!(!faults.is_armed());
        assert!(faults.check("d").is_ok());
    }
}
