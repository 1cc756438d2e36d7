use thiserror::Error;

use crate::field::Field;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("multiple l3 protocols")]
    MultipleL3,

    #[error("multiple l4 protocols")]
    MultipleL4,

    #[error("'all' in <match> must be used alone, without condition, value or negation")]
    AllNotAlone,

    #[error("'all' in a <target> can only be used with the 'strip' keyword and no value")]
    AllInTarget,

    #[error("negated 'strip all' has no effect")]
    NegatedStripAll,

    #[error("{field} does not take a condition nor a value")]
    UnexpectedValue { field: Field },

    #[error("{field} is missing a value")]
    MissingValue { field: Field },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: Field, reason: &'static str },

    #[error("negated {field} without a value can never match")]
    UnsatisfiableUnary { field: Field },

    #[error("tcp-opt requires an option kind")]
    MissingOptionKind,

    #[error("multiple {field} interfaces")]
    MultipleInterfaces { field: Field },

    #[error("{field} must be compared with '==' and cannot be negated")]
    InvalidInterfaceMatch { field: Field },

    #[error("invalid field in target: {field}")]
    InvalidTargetField { field: Field },

    #[error("{field} cannot be modified")]
    NotModifiable { field: Field },

    #[error("strip <field> must be a tcp option or 'all'")]
    StripRequiresOption,

    #[error("add <field> must be a tcp option")]
    AddRequiresOption,

    #[error("inconsistent use of ! in strip")]
    InconsistentStripPolarity,

    #[error("ordered comparison on {field} is not supported")]
    OrderedPayload { field: Field },

    #[error("drop cannot be negated")]
    NegatedDrop,
}
