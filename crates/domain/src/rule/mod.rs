pub mod entity;
pub mod error;
pub mod option;
mod validate;

pub use entity::{Condition, MatchPredicate, Rule, TargetAction, TargetKeyword};
pub use option::{OptionStripList, TcpOptionValue};
