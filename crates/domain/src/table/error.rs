use thiserror::Error;

use super::entity::TableHandle;

/// Failures reported by a classifier backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("table not found: {table}")]
    TableNotFound { table: TableHandle },

    #[error("session not found in table {table}")]
    SessionNotFound { table: TableHandle },

    #[error("duplicate session in table {table}")]
    DuplicateSession { table: TableHandle },

    #[error("table {table} is full (capacity {capacity})")]
    CapacityExceeded { table: TableHandle, capacity: u32 },

    #[error("key length {len} does not match table {table} ({expected} bytes)")]
    InvalidKeyLength {
        table: TableHandle,
        len: usize,
        expected: usize,
    },

    #[error("invalid table geometry: {reason}")]
    InvalidGeometry { reason: &'static str },

    #[error("interface {interface} has no table attached")]
    InterfaceNotAttached { interface: u32 },

    #[error("classifier backend failure: {reason}")]
    Backend { reason: String },
}

/// Failures of the table chain manager.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error("no rule at position {position}")]
    NoPlacement { position: usize },

    #[error("rule index {index} exceeds the classifier index range")]
    IndexOverflow { index: usize },

    #[error("interface {interface} is already enabled")]
    InterfaceAlreadyEnabled { interface: u32 },

    #[error("interface {interface} is not enabled")]
    InterfaceNotEnabled { interface: u32 },

    #[error("chain bookkeeping lost table {table}")]
    Inconsistent { table: TableHandle },
}
