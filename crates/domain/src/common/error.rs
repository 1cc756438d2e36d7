use thiserror::Error;

use crate::compiler::error::CompileError;
use crate::rule::error::RuleError;
use crate::table::error::{ChainError, ClassifierError};

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("rule not found: {0}")]
    RuleNotFound(String),

    #[error("duplicate rule: {0}")]
    DuplicateRule(String),

    #[error("invalid rule: {0}")]
    InvalidRule(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("engine error: {0}")]
    EngineError(String),
}

impl From<RuleError> for DomainError {
    fn from(err: RuleError) -> Self {
        Self::InvalidRule(err.to_string())
    }
}

impl From<CompileError> for DomainError {
    fn from(err: CompileError) -> Self {
        Self::InvalidRule(err.to_string())
    }
}

impl From<ClassifierError> for DomainError {
    fn from(err: ClassifierError) -> Self {
        match err {
            ClassifierError::DuplicateSession { .. } => Self::DuplicateRule(err.to_string()),
            _ => Self::EngineError(err.to_string()),
        }
    }
}

impl From<ChainError> for DomainError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Classifier(inner) => inner.into(),
            ChainError::NoPlacement { position } => Self::RuleNotFound(position.to_string()),
            other => Self::EngineError(other.to_string()),
        }
    }
}
