pub mod entity;
pub mod error;

pub use entity::{ChainSettings, EmptyTablePolicy, Table, TableHandle};
pub use error::{ChainError, ClassifierError};
