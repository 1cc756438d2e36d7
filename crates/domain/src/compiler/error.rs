use thiserror::Error;

use super::entity::Pass;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    /// Canonicalisation trimmed every block: the rule would program an
    /// empty classifier key.
    #[error("BUG: empty {pass} key")]
    EmptyKey { pass: Pass },
}
