pub mod entity;
pub mod error;
pub mod mask_key;

pub use entity::{BLOCK_SIZE, CompiledKey, CompiledRule, Pass};
pub use mask_key::{compile, compile_key};
